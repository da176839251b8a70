//! Trace formation: partitioning a function's blocks into linear traces
//!
//! A trace is an ordered block sequence along one expected execution path:
//! no block repeats, no internal edge is a back-edge, and every internal
//! edge is a real CFG edge. Three growth policies are supported (profile
//! directed, random, static heuristic); the surrounding seed-and-grow loop
//! is shared. Every block of the function lands in exactly one trace;
//! blocks nothing wants to extend become singleton traces.

pub mod consistency;
pub mod duplicate;
pub mod hazards;
pub mod policy;
pub mod predict;

pub use duplicate::{tail_duplicate, DuplicationReport};
pub use hazards::{classify_blocks, conditional_branches, BranchRef, HazardInfo};
pub use policy::{GrowthPolicy, HeuristicPolicy, ProfilePolicy, RandomPolicy};
pub use predict::{predict_branches, PredictionStats, Predictions};

use crate::cfg::{
    build_cfg, find_loops, loops::loop_bfs, loops::loops_by_depth_desc, node, Cfg, DominatorTree,
    NaturalLoop, PostDominatorTree,
};
use crate::ir::{BlockId, Function, IrError, Type, ValueId};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// Dense trace identifier, assigned in emission order
pub type TraceId = usize;

/// One trace: an ordered, non-empty block sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub id: TraceId,
    pub blocks: Vec<BlockId>,
}

impl Trace {
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// All traces of a function plus the block-to-trace map
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceSet {
    pub traces: Vec<Trace>,
    trace_of: HashMap<BlockId, TraceId>,
}

impl TraceSet {
    /// Trace id of a block, if the block was visited
    pub fn trace_of(&self, block: BlockId) -> Option<TraceId> {
        self.trace_of.get(&block).copied()
    }

    fn push(&mut self, blocks: Vec<BlockId>) {
        let id = self.traces.len();
        for &b in &blocks {
            self.trace_of.insert(b, id);
        }
        self.traces.push(Trace { id, blocks });
    }
}

/// Trace growth variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Profile,
    Random,
    Heuristic,
}

/// Formation parameters
#[derive(Debug, Clone)]
pub struct FormationConfig {
    pub variant: Variant,
    /// Forward growth threshold on edge probability (profile variant)
    pub taken_threshold: f64,
    /// Backward growth threshold on the predecessor weight fraction
    /// (profile variant)
    pub predecessor_threshold: f64,
    /// RNG seed (random growth and heuristic tie-breaking)
    pub seed: u64,
    /// Sample predecessors/successors without replacement instead of
    /// ending the trace on the first bad draw (random variant)
    pub sample_without_replacement: bool,
}

impl Default for FormationConfig {
    fn default() -> Self {
        Self {
            variant: Variant::Profile,
            taken_threshold: 0.60,
            predecessor_threshold: 0.60,
            seed: 0,
            sample_without_replacement: false,
        }
    }
}

/// Per-function view shared by the predictor, trace former, tail
/// duplicator, and feature extractor: the CFG plus every analysis they
/// consume.
pub struct FnContext<'a> {
    pub func: &'a Function,
    pub cfg: Cfg,
    pub hazards: Vec<HazardInfo>,
    pub branches: Vec<BranchRef>,
    /// Branch id per owning block
    pub branch_at: HashMap<BlockId, usize>,
    pub doms: DominatorTree,
    /// None when the function has no exit block
    pub pdoms: Option<PostDominatorTree>,
    pub loops: Vec<NaturalLoop>,
    pub value_types: HashMap<ValueId, Type>,
    /// Defining site (block, instruction index) per SSA value
    pub defs: HashMap<ValueId, (BlockId, usize)>,
}

impl<'a> FnContext<'a> {
    /// Validate the function and run every analysis once
    pub fn new(func: &'a Function) -> Result<Self, IrError> {
        func.validate()?;
        let cfg = build_cfg(func);
        let doms =
            DominatorTree::new(&cfg).ok_or_else(|| IrError::EmptyFunction(func.name.clone()))?;
        let pdoms = PostDominatorTree::new(&cfg, func);
        let loops = find_loops(func, &doms);
        let hazards = classify_blocks(func);
        let branches = conditional_branches(func);
        let branch_at = branches.iter().map(|b| (b.block, b.id)).collect();
        let value_types = func.value_types();
        let defs = func.def_sites();
        Ok(Self {
            func,
            cfg,
            hazards,
            branches,
            branch_at,
            doms,
            pdoms,
            loops,
            value_types,
            defs,
        })
    }

    pub fn block_count(&self) -> usize {
        self.func.blocks.len()
    }

    pub fn predecessors(&self, block: BlockId) -> Vec<BlockId> {
        crate::cfg::predecessors(&self.cfg, block)
    }

    /// Whether the terminator of `a` post-dominates the terminator of `b`.
    /// Functions without exits have no post-dominator tree; nothing
    /// post-dominates anything there.
    pub fn terminator_post_dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.pdoms
            .as_ref()
            .map_or(false, |p| p.terminator_post_dominates(a, b))
    }
}

/// Form traces over a function
///
/// Seeds are taken in descending block-count order for the profile and
/// random variants, and from loop-then-function BFS orders for the
/// heuristic variant. Each seed grows forward (and backward, where the
/// policy supports it) until the policy declines to extend the trace.
pub fn form_traces(ctx: &FnContext, config: &FormationConfig) -> TraceSet {
    match config.variant {
        Variant::Profile => {
            let mut policy = ProfilePolicy {
                taken_threshold: config.taken_threshold,
                predecessor_threshold: config.predecessor_threshold,
            };
            grow_all(ctx, seeds_by_count(ctx), &mut policy)
        }
        Variant::Random => {
            let mut policy = RandomPolicy::new(
                StdRng::seed_from_u64(config.seed),
                config.sample_without_replacement,
            );
            grow_all(ctx, seeds_by_count(ctx), &mut policy)
        }
        Variant::Heuristic => {
            let predictions = predict_branches(ctx);
            let mut policy = HeuristicPolicy::new(predictions, StdRng::seed_from_u64(config.seed));
            grow_all(ctx, seeds_heuristic(ctx), &mut policy)
        }
    }
}

/// Blocks in descending execution-count order (stable on ties)
///
/// Unprofiled blocks count as zero and sort to the end.
fn seeds_by_count(ctx: &FnContext) -> Vec<BlockId> {
    if ctx.func.profile.counts.len() < ctx.block_count() {
        tracing::warn!(
            function = %ctx.func.name,
            "profile counts missing for some blocks; treating them as zero"
        );
    }
    let mut seeds: Vec<BlockId> = (0..ctx.block_count()).collect();
    seeds.sort_by_key(|&b| std::cmp::Reverse(ctx.func.profile.block_count(b)));
    seeds
}

/// Heuristic seed order: BFS over each loop (deepest loops first), then
/// BFS over the whole function from the entry, then any leftover blocks
/// unreachable from the entry
fn seeds_heuristic(ctx: &FnContext) -> Vec<BlockId> {
    let mut seeds = Vec::new();
    let mut queued = HashSet::new();

    for index in loops_by_depth_desc(&ctx.loops) {
        for block in loop_bfs(ctx.func, &ctx.loops[index]) {
            if queued.insert(block) {
                seeds.push(block);
            }
        }
    }

    for block in function_bfs(ctx) {
        if queued.insert(block) {
            seeds.push(block);
        }
    }

    for block in 0..ctx.block_count() {
        if queued.insert(block) {
            seeds.push(block);
        }
    }

    seeds
}

fn function_bfs(ctx: &FnContext) -> Vec<BlockId> {
    let entry = ctx.func.entry();
    let mut seen = HashSet::from([entry]);
    let mut order = vec![entry];
    let mut queue = VecDeque::from([entry]);

    while let Some(current) = queue.pop_front() {
        for succ in ctx.cfg.neighbors(node(current)) {
            let child = succ.index();
            if seen.insert(child) {
                queue.push_back(child);
                order.push(child);
            }
        }
    }

    order
}

fn grow_all(ctx: &FnContext, seeds: Vec<BlockId>, policy: &mut dyn GrowthPolicy) -> TraceSet {
    let mut visited = vec![false; ctx.block_count()];
    let mut set = TraceSet::default();

    for seed in seeds {
        if visited[seed] {
            continue;
        }
        visited[seed] = true;
        let mut blocks = vec![seed];

        // Grow forward
        let mut current = seed;
        while let Some(next) = policy.best_successor(ctx, current, &visited) {
            blocks.push(next);
            visited[next] = true;
            current = next;
        }

        // Grow backward
        current = seed;
        while let Some(prev) = policy.best_predecessor(ctx, current, &visited) {
            blocks.insert(0, prev);
            visited[prev] = true;
            current = prev;
        }

        set.push(blocks);
    }

    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Block, Operand, Terminator};
    use crate::profile::Profile;

    /// Diamond with a hot path through the taken arm:
    /// 0 -> {1, 2}, both -> 3; prob(0->1) = 0.8, counts favor 0/1/3
    fn hot_diamond() -> Function {
        Function {
            name: "hot_diamond".to_string(),
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
    fn test_profile_diamond_traces() {
        let f = hot_diamond();
        let ctx = FnContext::new(&f).unwrap();
        let set = form_traces(&ctx, &FormationConfig::default());

        // Hot path [0, 1, 3] seeded from block 0, then singleton [2]
        assert_eq!(set.traces.len(), 2);
        assert_eq!(set.traces[0].blocks, vec![0, 1, 3]);
        assert_eq!(set.traces[1].blocks, vec![2]);
        assert_eq!(set.trace_of(3), Some(0));
        assert_eq!(set.trace_of(2), Some(1));
    }

    #[test]
    fn test_partition_covers_every_block() {
        let f = hot_diamond();
        let ctx = FnContext::new(&f).unwrap();
        for variant in [Variant::Profile, Variant::Random, Variant::Heuristic] {
            let set = form_traces(
                &ctx,
                &FormationConfig {
                    variant,
                    seed: 7,
                    ..FormationConfig::default()
                },
            );
            let mut seen = HashSet::new();
            for trace in &set.traces {
                for &b in &trace.blocks {
                    assert!(seen.insert(b), "block {} appears twice", b);
                }
            }
            assert_eq!(seen.len(), f.blocks.len());
        }
    }

    #[test]
    fn test_traces_contain_no_back_edges() {
        let f = hot_diamond();
        let ctx = FnContext::new(&f).unwrap();
        for variant in [Variant::Profile, Variant::Random, Variant::Heuristic] {
            let set = form_traces(
                &ctx,
                &FormationConfig {
                    variant,
                    seed: 3,
                    ..FormationConfig::default()
                },
            );
            for trace in &set.traces {
                for pair in trace.blocks.windows(2) {
                    assert!(!ctx.doms.is_back_edge(pair[0], pair[1]));
                }
            }
        }
    }

    #[test]
    fn test_self_loop_block_is_singleton() {
        // 0 -> 0 with prob 0.9, 0 -> 1 with 0.1
        let f = Function {
            name: "selfloop".to_string(),
            params: vec![],
            blocks: vec![
                Block {
                    instructions: vec![],
                    terminator: Terminator::CondBr {
                        cond: Operand::Int(1),
                        taken: 0,
                        fall_through: 1,
                    },
                },
                Block {
                    instructions: vec![],
                    terminator: Terminator::Ret { value: None },
                },
            ],
            profile: Profile {
                counts: vec![100, 10],
                edge_probs: HashMap::from([(0, vec![0.9, 0.1])]),
            },
        };
        let ctx = FnContext::new(&f).unwrap();
        let set = form_traces(&ctx, &FormationConfig::default());
        assert_eq!(set.traces.len(), 2);
        assert_eq!(set.traces[0].blocks, vec![0]);
        assert_eq!(set.traces[1].blocks, vec![1]);
    }

    #[test]
    fn test_determinism_profile_and_heuristic() {
        let f = hot_diamond();
        let ctx = FnContext::new(&f).unwrap();
        for variant in [Variant::Profile, Variant::Heuristic] {
            let config = FormationConfig {
                variant,
                seed: 42,
                ..FormationConfig::default()
            };
            let a = form_traces(&ctx, &config);
            let b = form_traces(&ctx, &config);
            let blocks = |s: &TraceSet| {
                s.traces
                    .iter()
                    .map(|t| t.blocks.clone())
                    .collect::<Vec<_>>()
            };
            assert_eq!(blocks(&a), blocks(&b));
        }
    }

    #[test]
    fn test_random_growth_terminates_within_block_count() {
        // Loop: 0 -> 1 -> 0 plus 0 -> 2
        let f = Function {
            name: "looped".to_string(),
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
                    terminator: Terminator::Br { target: 0 },
                },
                Block {
                    instructions: vec![],
                    terminator: Terminator::Ret { value: None },
                },
            ],
            profile: Profile {
                counts: vec![100, 90, 10],
                edge_probs: HashMap::new(),
            },
        };
        let ctx = FnContext::new(&f).unwrap();
        for seed in 0..32 {
            let set = form_traces(
                &ctx,
                &FormationConfig {
                    variant: Variant::Random,
                    seed,
                    ..FormationConfig::default()
                },
            );
            for trace in &set.traces {
                assert!(trace.len() <= f.blocks.len());
            }
        }
    }

    #[test]
    fn test_heuristic_seeds_inner_loops_first() {
        // Outer loop 1..3 with inner loop at 2
        let f = Function {
            name: "nested".to_string(),
            params: vec![],
            blocks: vec![
                Block {
                    instructions: vec![],
                    terminator: Terminator::Br { target: 1 },
                },
                Block {
                    instructions: vec![],
                    terminator: Terminator::CondBr {
                        cond: Operand::Int(1),
                        taken: 2,
                        fall_through: 4,
                    },
                },
                Block {
                    instructions: vec![],
                    terminator: Terminator::CondBr {
                        cond: Operand::Int(1),
                        taken: 2,
                        fall_through: 3,
                    },
                },
                Block {
                    instructions: vec![],
                    terminator: Terminator::Br { target: 1 },
                },
                Block {
                    instructions: vec![],
                    terminator: Terminator::Ret { value: None },
                },
            ],
            profile: Profile::default(),
        };
        let ctx = FnContext::new(&f).unwrap();
        let seeds = seeds_heuristic(&ctx);
        // The self-loop at block 2 is the deepest loop, so it seeds first
        assert_eq!(seeds[0], 2);
        assert_eq!(seeds.len(), f.blocks.len());
    }
}
