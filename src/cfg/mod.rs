// CFG construction and analyses over the serialized function model

pub mod analysis;
pub mod dominators;
pub mod edge;
pub mod export;
pub mod loops;
pub mod post_dominators;

pub use analysis::{find_entry, find_exits};
pub use dominators::DominatorTree;
pub use edge::EdgeType;
pub use export::{export_dot, export_json, CfgExport};
pub use loops::{find_loops, NaturalLoop};
pub use post_dominators::PostDominatorTree;

use crate::ir::{BlockId, Function, Terminator};
use petgraph::graph::{DiGraph, NodeIndex};

/// Control flow graph: node weights are block ids, edge weights classify
/// the branch kind. Node `i` always corresponds to block `i`.
pub type Cfg = DiGraph<BlockId, EdgeType>;

/// NodeIndex for a block id
pub fn node(block: BlockId) -> NodeIndex {
    NodeIndex::new(block)
}

/// Build the CFG for a function
///
/// Nodes are added in block order so node indices and block ids coincide.
/// Edges come from terminator successor slots, preserving slot order, so a
/// conditional branch contributes its taken edge before its fall-through
/// edge. Parallel edges are kept when several slots target the same block.
pub fn build_cfg(func: &Function) -> Cfg {
    let mut graph = Cfg::with_capacity(func.blocks.len(), func.blocks.len() * 2);
    for id in 0..func.blocks.len() {
        graph.add_node(id);
    }
    for (id, block) in func.blocks.iter().enumerate() {
        for (slot, target) in block.terminator.successors().into_iter().enumerate() {
            graph.add_edge(node(id), node(target), edge_type(&block.terminator, slot));
        }
    }
    graph
}

fn edge_type(terminator: &Terminator, slot: usize) -> EdgeType {
    match terminator {
        Terminator::Br { .. } => EdgeType::Goto,
        Terminator::CondBr { .. } => {
            if slot == 0 {
                EdgeType::Taken
            } else {
                EdgeType::FallThrough
            }
        }
        Terminator::Switch { cases, .. } => {
            if slot < cases.len() {
                EdgeType::Case
            } else {
                EdgeType::Default
            }
        }
        Terminator::IndirectBr { .. } => EdgeType::Indirect,
        Terminator::Ret { .. } | Terminator::Unreachable => EdgeType::Goto,
    }
}

/// Predecessor block ids of `block`
///
/// Duplicate entries from parallel edges are collapsed; order follows the
/// graph's incoming-edge order and is deterministic for a given function.
pub fn predecessors(cfg: &Cfg, block: BlockId) -> Vec<BlockId> {
    let mut preds = Vec::new();
    for n in cfg.neighbors_directed(node(block), petgraph::Direction::Incoming) {
        let id = n.index();
        if !preds.contains(&id) {
            preds.push(id);
        }
    }
    preds
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Block, Operand};
    use crate::profile::Profile;

    fn function_from_terminators(terminators: Vec<Terminator>) -> Function {
        Function {
            name: "t".to_string(),
            params: vec![],
            blocks: terminators
                .into_iter()
                .map(|terminator| Block {
                    instructions: vec![],
                    terminator,
                })
                .collect(),
            profile: Profile::default(),
        }
    }

    #[test]
    fn test_build_cfg_diamond() {
        let f = function_from_terminators(vec![
            Terminator::CondBr {
                cond: Operand::Int(1),
                taken: 1,
                fall_through: 2,
            },
            Terminator::Br { target: 3 },
            Terminator::Br { target: 3 },
            Terminator::Ret { value: None },
        ]);
        let cfg = build_cfg(&f);
        assert_eq!(cfg.node_count(), 4);
        assert_eq!(cfg.edge_count(), 4);
        assert_eq!(predecessors(&cfg, 3), vec![2, 1]);
        assert!(predecessors(&cfg, 0).is_empty());
    }

    #[test]
    fn test_parallel_edges_collapse_in_predecessors() {
        let f = function_from_terminators(vec![
            Terminator::CondBr {
                cond: Operand::Int(1),
                taken: 1,
                fall_through: 1,
            },
            Terminator::Ret { value: None },
        ]);
        let cfg = build_cfg(&f);
        assert_eq!(cfg.edge_count(), 2);
        assert_eq!(predecessors(&cfg, 1), vec![0]);
    }
}
