//! Tail duplication: turning traces into superblocks
//!
//! For each trace, interior blocks reached from outside the trace (side
//! entrances) are cloned, and the on-trace predecessor is rewired to the
//! clone. Once cloning starts it continues to the end of the trace, so the
//! duplicated tail forms its own chain. A single value map accumulates
//! original-to-clone bindings across the whole run; operand uses inside a
//! clone that name an earlier clone's definition are rewired through it,
//! and unknown values are left untouched. Off-trace predecessors keep
//! reaching the original blocks.

use crate::cfg::{build_cfg, predecessors};
use crate::ir::{Block, BlockId, Function, IrError, Operand, ValueId};
use crate::trace::TraceSet;
use std::collections::HashMap;
use tracing::debug;

/// Outcome of a duplication run over one function
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct DuplicationReport {
    /// Whether any block was cloned
    pub modified: bool,
    /// Number of cloned blocks appended to the function
    pub cloned_blocks: usize,
}

/// Running original-to-clone bindings
#[derive(Default)]
struct CloneMap {
    values: HashMap<ValueId, ValueId>,
    blocks: HashMap<BlockId, BlockId>,
}

/// Duplicate side-entered trace tails in place
///
/// The function is only modified when the whole run succeeds; on error it
/// is left untouched and the error describes the offending terminator.
pub fn tail_duplicate(
    func: &mut Function,
    traces: &TraceSet,
) -> Result<DuplicationReport, IrError> {
    let mut working = func.clone();
    let original_cfg = build_cfg(&working);
    let preds: Vec<Vec<BlockId>> = (0..working.blocks.len())
        .map(|b| predecessors(&original_cfg, b))
        .collect();

    let mut map = CloneMap::default();
    let mut next_value = working.next_value_id();
    let mut report = DuplicationReport::default();

    for trace in &traces.traces {
        let mut prev = trace.blocks[0];
        let mut cloning = false;

        for &original in &trace.blocks[1..] {
            if !cloning {
                let side_entered = preds[original]
                    .iter()
                    .any(|p| traces.trace_of(*p) != traces.trace_of(original));
                if !side_entered {
                    prev = original;
                    continue;
                }
                cloning = true;
            }

            let clone = clone_block(&mut working, original, &mut map, &mut next_value);
            rewire(&mut working, prev, original, clone)?;
            remap_block(&mut working, clone, &map);
            debug!(original, clone, "duplicated trace block");
            report.modified = true;
            report.cloned_blocks += 1;
            prev = clone;
        }
    }

    *func = working;
    Ok(report)
}

/// Append a structural copy of `original`, giving each result a fresh SSA
/// id and recording the bindings
fn clone_block(
    func: &mut Function,
    original: BlockId,
    map: &mut CloneMap,
    next_value: &mut ValueId,
) -> BlockId {
    let mut block: Block = func.blocks[original].clone();
    for inst in &mut block.instructions {
        if let Some(result) = inst.result {
            let fresh = *next_value;
            *next_value += 1;
            map.values.insert(result, fresh);
            inst.result = Some(fresh);
        }
    }
    let clone = func.blocks.len();
    func.blocks.push(block);
    map.blocks.insert(original, clone);
    clone
}

/// Point every successor slot of `prev` that targets `from` at `to`
fn rewire(func: &mut Function, prev: BlockId, from: BlockId, to: BlockId) -> Result<(), IrError> {
    let mut rewired = false;
    for slot in func.blocks[prev].terminator.successor_slots_mut() {
        if *slot == from {
            *slot = to;
            rewired = true;
        }
    }
    if rewired {
        Ok(())
    } else {
        Err(IrError::MalformedTerminator {
            block: prev,
            target: from,
        })
    }
}

/// Rewrite operand uses and branch targets in a clone through the running
/// map; missing keys are left unchanged
fn remap_block(func: &mut Function, clone: BlockId, map: &CloneMap) {
    let block = &mut func.blocks[clone];
    let remap_operand = |op: &mut Operand| {
        if let Operand::Value(v) = op {
            if let Some(mapped) = map.values.get(v) {
                *v = *mapped;
            }
        }
    };

    for inst in &mut block.instructions {
        for op in &mut inst.operands {
            remap_operand(op);
        }
    }
    match &mut block.terminator {
        crate::ir::Terminator::CondBr { cond, .. } => remap_operand(cond),
        crate::ir::Terminator::Switch { value, .. } => remap_operand(value),
        crate::ir::Terminator::Ret { value: Some(v) } => remap_operand(v),
        _ => {}
    }
    for slot in block.terminator.successor_slots_mut() {
        if let Some(mapped) = map.blocks.get(slot) {
            *slot = *mapped;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Instruction, Opcode, Terminator, Type};
    use crate::profile::Profile;
    use crate::trace::{form_traces, FnContext, FormationConfig};
    use std::collections::HashMap;

    /// Diamond with a hot path [0, 1, 3]; block 3 is side-entered from 2
    fn hot_diamond() -> Function {
        Function {
            name: "d".to_string(),
            params: vec![],
            blocks: vec![
                Block {
                    instructions: vec![],
                    terminator: Terminator::CondBr {
                        cond: Operand::Int(1),
                        taken: 1,
                        fall_through: 2,
                    },
                },
                Block {
                    instructions: vec![],
                    terminator: Terminator::Br { target: 3 },
                },
                Block {
                    instructions: vec![],
                    terminator: Terminator::Br { target: 3 },
                },
                Block {
                    instructions: vec![Instruction {
                        result: Some(20),
                        opcode: Opcode::Add,
                        operands: vec![Operand::Int(1), Operand::Int(2)],
                        predicate: None,
                        ty: Type::Int,
                    }],
                    terminator: Terminator::Ret { value: Some(Operand::Value(20)) },
                },
            ],
            profile: Profile {
                counts: vec![100, 80, 20, 100],
                edge_probs: HashMap::from([(0, vec![0.8, 0.2])]),
            },
        }
    }

    fn profile_traces(func: &Function) -> TraceSet {
        let ctx = FnContext::new(func).unwrap();
        form_traces(&ctx, &FormationConfig::default())
    }

    #[test]
    fn test_diamond_duplicates_join_block() {
        let mut f = hot_diamond();
        let traces = profile_traces(&f);
        let report = tail_duplicate(&mut f, &traces).unwrap();

        assert!(report.modified);
        assert_eq!(report.cloned_blocks, 1);
        assert_eq!(f.blocks.len(), 5);

        // On-trace predecessor 1 now reaches the clone
        assert_eq!(f.blocks[1].terminator, Terminator::Br { target: 4 });
        // Off-trace predecessor 2 still reaches the original
        assert_eq!(f.blocks[2].terminator, Terminator::Br { target: 3 });
    }

    #[test]
    fn test_clone_gets_fresh_values_and_remapped_uses() {
        let mut f = hot_diamond();
        let traces = profile_traces(&f);
        tail_duplicate(&mut f, &traces).unwrap();

        let clone = &f.blocks[4];
        let fresh = clone.instructions[0].result.unwrap();
        assert_ne!(fresh, 20);
        // The clone returns its own definition, not the original's
        assert_eq!(clone.terminator, Terminator::Ret { value: Some(Operand::Value(fresh)) });
        // The original block is untouched
        assert_eq!(
            f.blocks[3].terminator,
            Terminator::Ret { value: Some(Operand::Value(20)) }
        );
    }

    #[test]
    fn test_cloning_continues_to_trace_end() {
        // Trace [0, 1, 2, 3] where 1 is side-entered from 4: blocks 1, 2
        // and 3 must all be cloned even though only 1 is side-entered
        let f = Function {
            name: "chain".to_string(),
            params: vec![],
            blocks: vec![
                Block {
                    instructions: vec![],
                    terminator: Terminator::CondBr {
                        cond: Operand::Int(1),
                        taken: 1,
                        fall_through: 4,
                    },
                },
                Block {
                    instructions: vec![],
                    terminator: Terminator::Br { target: 2 },
                },
                Block {
                    instructions: vec![],
                    terminator: Terminator::Br { target: 3 },
                },
                Block {
                    instructions: vec![],
                    terminator: Terminator::Ret { value: None },
                },
                Block {
                    instructions: vec![],
                    terminator: Terminator::Br { target: 1 },
                },
            ],
            profile: Profile {
                counts: vec![100, 90, 90, 90, 10],
                edge_probs: HashMap::from([(0, vec![0.9, 0.1])]),
            },
        };
        let mut f = f;
        let traces = profile_traces(&f);
        assert_eq!(traces.traces[0].blocks, vec![0, 1, 2, 3]);

        let report = tail_duplicate(&mut f, &traces).unwrap();
        assert_eq!(report.cloned_blocks, 3);
        assert_eq!(f.blocks.len(), 8);

        // The cloned chain threads 5 -> 6 -> 7
        assert_eq!(f.blocks[0].terminator.successors()[0], 5);
        assert_eq!(f.blocks[5].terminator, Terminator::Br { target: 6 });
        assert_eq!(f.blocks[6].terminator, Terminator::Br { target: 7 });
        // Side entrance still reaches the original chain
        assert_eq!(f.blocks[4].terminator, Terminator::Br { target: 1 });
        assert_eq!(f.blocks[1].terminator, Terminator::Br { target: 2 });
    }

    #[test]
    fn test_no_side_entrance_no_duplication() {
        // Straight line: one trace covers everything, nothing side-enters
        let mut f = Function {
            name: "line".to_string(),
            params: vec![],
            blocks: vec![
                Block {
                    instructions: vec![],
                    terminator: Terminator::Br { target: 1 },
                },
                Block {
                    instructions: vec![],
                    terminator: Terminator::Ret { value: None },
                },
            ],
            profile: Profile {
                counts: vec![10, 10],
                edge_probs: HashMap::new(),
            },
        };
        let traces = profile_traces(&f);
        let report = tail_duplicate(&mut f, &traces).unwrap();
        assert!(!report.modified);
        assert_eq!(f.blocks.len(), 2);
    }

    #[test]
    fn test_first_trace_block_never_cloned() {
        let mut f = hot_diamond();
        let traces = profile_traces(&f);
        // Block 0 heads the hot trace and has no clone afterwards
        tail_duplicate(&mut f, &traces).unwrap();
        assert!(matches!(
            f.blocks[0].terminator,
            Terminator::CondBr { taken: 1, .. }
        ));
    }

    #[test]
    fn test_both_slots_targeting_block_are_rewired() {
        // Both arms of block 0 target block 1, which is also reachable
        // from block 2's trace
        let mut f = Function {
            name: "both_arms".to_string(),
            params: vec![],
            blocks: vec![
                Block {
                    instructions: vec![],
                    terminator: Terminator::CondBr {
                        cond: Operand::Int(1),
                        taken: 1,
                        fall_through: 1,
                    },
                },
                Block {
                    instructions: vec![],
                    terminator: Terminator::Ret { value: None },
                },
                Block {
                    instructions: vec![],
                    terminator: Terminator::Br { target: 1 },
                },
            ],
            profile: Profile {
                counts: vec![100, 100, 5],
                edge_probs: HashMap::from([(0, vec![0.7, 0.3])]),
            },
        };
        let traces = profile_traces(&f);
        assert_eq!(traces.traces[0].blocks, vec![0, 1]);

        tail_duplicate(&mut f, &traces).unwrap();
        assert_eq!(
            f.blocks[0].terminator,
            Terminator::CondBr {
                cond: Operand::Int(1),
                taken: 3,
                fall_through: 3,
            }
        );
    }
}
