//! Growth policies: how a trace picks its next block
//!
//! The seed-and-grow loop is shared across variants; policies only answer
//! "which neighbor extends the trace from here, if any". Returning None
//! ends growth in that direction.

use crate::ir::{BlockId, Terminator};
use crate::trace::{FnContext, Predictions};
use rand::rngs::StdRng;
use rand::Rng;

/// One growth step in either direction
pub trait GrowthPolicy {
    /// Next block after `current`, or None to stop forward growth
    fn best_successor(
        &mut self,
        ctx: &FnContext,
        current: BlockId,
        visited: &[bool],
    ) -> Option<BlockId>;

    /// Block to prepend before `current`, or None to stop backward growth
    fn best_predecessor(
        &mut self,
        ctx: &FnContext,
        current: BlockId,
        visited: &[bool],
    ) -> Option<BlockId>;
}

/// Profile-directed growth
///
/// Extends forward along the first unvisited non-back-edge successor whose
/// edge probability exceeds the taken threshold. Extends backward along a
/// predecessor whose weight fraction `count(pred) * prob(pred->cur) /
/// count(cur)` exceeds the predecessor threshold.
pub struct ProfilePolicy {
    pub taken_threshold: f64,
    pub predecessor_threshold: f64,
}

impl GrowthPolicy for ProfilePolicy {
    fn best_successor(
        &mut self,
        ctx: &FnContext,
        current: BlockId,
        visited: &[bool],
    ) -> Option<BlockId> {
        let profile = &ctx.func.profile;
        for (index, succ) in ctx.func.successors(current).into_iter().enumerate() {
            if ctx.doms.is_back_edge(current, succ) || visited[succ] {
                continue;
            }
            if profile.edge_prob(ctx.func, current, index) > self.taken_threshold {
                return Some(succ);
            }
        }
        None
    }

    fn best_predecessor(
        &mut self,
        ctx: &FnContext,
        current: BlockId,
        visited: &[bool],
    ) -> Option<BlockId> {
        let profile = &ctx.func.profile;
        let current_count = profile.block_count(current);
        if current_count == 0 {
            return None;
        }
        for pred in ctx.predecessors(current) {
            if ctx.doms.is_back_edge(pred, current) || visited[pred] {
                continue;
            }
            let weight =
                profile.block_count(pred) as f64 * profile.edge_prob_to(ctx.func, pred, current);
            if weight / current_count as f64 > self.predecessor_threshold {
                return Some(pred);
            }
        }
        None
    }
}

/// Random growth
///
/// In the default mode one neighbor is sampled per step; a visited or
/// back-edge draw ends the trace rather than retrying. The
/// without-replacement mode samples uniformly among the neighbors that
/// could actually extend the trace, which produces longer traces.
pub struct RandomPolicy {
    rng: StdRng,
    without_replacement: bool,
}

impl RandomPolicy {
    pub fn new(rng: StdRng, without_replacement: bool) -> Self {
        Self {
            rng,
            without_replacement,
        }
    }

    fn pick(
        &mut self,
        ctx: &FnContext,
        neighbors: Vec<BlockId>,
        visited: &[bool],
        is_back_edge: impl Fn(&FnContext, BlockId) -> bool,
    ) -> Option<BlockId> {
        if neighbors.is_empty() {
            return None;
        }
        if self.without_replacement {
            let candidates: Vec<BlockId> = neighbors
                .into_iter()
                .filter(|&n| !visited[n] && !is_back_edge(ctx, n))
                .collect();
            if candidates.is_empty() {
                return None;
            }
            let index = self.rng.gen_range(0..candidates.len());
            Some(candidates[index])
        } else {
            let candidate = neighbors[self.rng.gen_range(0..neighbors.len())];
            if visited[candidate] || is_back_edge(ctx, candidate) {
                return None;
            }
            Some(candidate)
        }
    }
}

impl GrowthPolicy for RandomPolicy {
    fn best_successor(
        &mut self,
        ctx: &FnContext,
        current: BlockId,
        visited: &[bool],
    ) -> Option<BlockId> {
        let succs = ctx.func.successors(current);
        self.pick(ctx, succs, visited, |ctx, succ| {
            ctx.doms.is_back_edge(current, succ)
        })
    }

    fn best_predecessor(
        &mut self,
        ctx: &FnContext,
        current: BlockId,
        visited: &[bool],
    ) -> Option<BlockId> {
        let preds = ctx.predecessors(current);
        self.pick(ctx, preds, visited, |ctx, pred| {
            ctx.doms.is_back_edge(pred, current)
        })
    }
}

/// Static-heuristic growth
///
/// Follows the predicted arm of each conditional branch: the hazard
/// prediction when present, else the path prediction, else a coin flip.
/// Growth stops at blocks ending in returns or indirect branches, at
/// non-branch terminators, and at visited or back-edge targets. Grows
/// forward only.
pub struct HeuristicPolicy {
    predictions: Predictions,
    rng: StdRng,
}

impl HeuristicPolicy {
    pub fn new(predictions: Predictions, rng: StdRng) -> Self {
        Self { predictions, rng }
    }
}

impl GrowthPolicy for HeuristicPolicy {
    fn best_successor(
        &mut self,
        ctx: &FnContext,
        current: BlockId,
        visited: &[bool],
    ) -> Option<BlockId> {
        let flags = ctx.hazards[current];
        if flags.has_return || flags.has_indirect_branch {
            return None;
        }

        let likely = match &ctx.func.block(current).terminator {
            Terminator::CondBr {
                taken,
                fall_through,
                ..
            } => {
                let branch = ctx.branch_at[&current];
                let arm = self
                    .predictions
                    .predicted(branch)
                    .unwrap_or_else(|| self.rng.gen_range(0..2));
                if arm == 0 {
                    *taken
                } else {
                    *fall_through
                }
            }
            Terminator::Br { target } => *target,
            _ => return None,
        };

        if visited[likely] || ctx.doms.terminator_dominates(likely, current) {
            return None;
        }
        Some(likely)
    }

    fn best_predecessor(
        &mut self,
        _ctx: &FnContext,
        _current: BlockId,
        _visited: &[bool],
    ) -> Option<BlockId> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Block, Function, Opcode, Operand, Terminator, Type};
    use crate::profile::Profile;
    use crate::trace::FnContext;
    use rand::SeedableRng;
    use std::collections::HashMap;

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
                    instructions: vec![],
                    terminator: Terminator::Ret { value: None },
                },
            ],
            profile: Profile {
                counts: vec![100, 80, 20, 100],
                edge_probs: HashMap::from([(0, vec![0.8, 0.2])]),
            },
        }
    }

    #[test]
    fn test_profile_successor_respects_threshold() {
        let f = hot_diamond();
        let ctx = FnContext::new(&f).unwrap();
        let visited = vec![false; 4];
        let mut policy = ProfilePolicy {
            taken_threshold: 0.60,
            predecessor_threshold: 0.60,
        };
        assert_eq!(policy.best_successor(&ctx, 0, &visited), Some(1));

        // A threshold above the hot edge's probability rejects it
        policy.taken_threshold = 0.85;
        assert_eq!(policy.best_successor(&ctx, 0, &visited), None);
    }

    #[test]
    fn test_profile_successor_skips_visited() {
        let f = hot_diamond();
        let ctx = FnContext::new(&f).unwrap();
        let mut visited = vec![false; 4];
        visited[1] = true;
        let mut policy = ProfilePolicy {
            taken_threshold: 0.60,
            predecessor_threshold: 0.60,
        };
        assert_eq!(policy.best_successor(&ctx, 0, &visited), None);
    }

    #[test]
    fn test_profile_predecessor_weight_fraction() {
        let f = hot_diamond();
        let ctx = FnContext::new(&f).unwrap();
        let visited = vec![false; 4];
        let mut policy = ProfilePolicy {
            taken_threshold: 0.60,
            predecessor_threshold: 0.60,
        };
        // weight(0 -> 1) = 100 * 0.8 / 80 = 1.0 > 0.6
        assert_eq!(policy.best_predecessor(&ctx, 1, &visited), Some(0));
        // weight(0 -> 2) = 100 * 0.2 / 20 = 1.0, also above threshold
        assert_eq!(policy.best_predecessor(&ctx, 2, &visited), Some(0));
        // Entry has no predecessors
        assert_eq!(policy.best_predecessor(&ctx, 0, &visited), None);
    }

    #[test]
    fn test_random_single_draw_stops_on_bad_candidate() {
        // 0 -> {1, 1}: both slots hit a visited block
        let f = Function {
            name: "r".to_string(),
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
            ],
            profile: Profile::default(),
        };
        let ctx = FnContext::new(&f).unwrap();
        let mut visited = vec![false, true];
        let mut policy = RandomPolicy::new(StdRng::seed_from_u64(1), false);
        assert_eq!(policy.best_successor(&ctx, 0, &visited), None);

        visited[1] = false;
        assert_eq!(policy.best_successor(&ctx, 0, &visited), Some(1));
    }

    #[test]
    fn test_random_without_replacement_finds_the_open_arm() {
        let f = hot_diamond();
        let ctx = FnContext::new(&f).unwrap();
        let mut visited = vec![false; 4];
        visited[1] = true;
        // Only block 2 can extend; every seed must find it
        for seed in 0..16 {
            let mut policy = RandomPolicy::new(StdRng::seed_from_u64(seed), true);
            assert_eq!(policy.best_successor(&ctx, 0, &visited), Some(2));
        }
    }

    #[test]
    fn test_heuristic_stops_on_return_block() {
        let f = hot_diamond();
        let ctx = FnContext::new(&f).unwrap();
        let visited = vec![false; 4];
        let mut policy = HeuristicPolicy::new(
            crate::trace::predict_branches(&ctx),
            StdRng::seed_from_u64(0),
        );
        // Block 3 returns; growth never leaves it
        assert_eq!(policy.best_successor(&ctx, 3, &visited), None);
        // Block 1 follows its unconditional branch
        assert_eq!(policy.best_successor(&ctx, 1, &visited), Some(3));
    }

    #[test]
    fn test_heuristic_follows_hazard_prediction() {
        // Branch where the taken arm stores (hazardous)
        let f = Function {
            name: "hz".to_string(),
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
                    instructions: vec![store_inst()],
                    terminator: Terminator::Br { target: 3 },
                },
                Block {
                    instructions: vec![],
                    terminator: Terminator::Br { target: 3 },
                },
                Block {
                    instructions: vec![],
                    terminator: Terminator::Ret { value: None },
                },
            ],
            profile: Profile::default(),
        };
        let ctx = FnContext::new(&f).unwrap();
        let visited = vec![false; 4];
        let mut policy = HeuristicPolicy::new(
            crate::trace::predict_branches(&ctx),
            StdRng::seed_from_u64(0),
        );
        assert_eq!(policy.best_successor(&ctx, 0, &visited), Some(2));
        // Heuristic growth never extends backward
        assert_eq!(policy.best_predecessor(&ctx, 2, &visited), None);
    }

    fn store_inst() -> crate::ir::Instruction {
        crate::ir::Instruction {
            result: None,
            opcode: Opcode::Store,
            operands: vec![],
            predicate: None,
            ty: Type::Void,
        }
    }
}
