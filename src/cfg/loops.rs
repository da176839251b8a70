//! Natural loops
//!
//! A back-edge is an edge whose target dominates its source, and each
//! distinct back-edge target is a loop header. All back-edges closing on
//! the same header are folded into a single loop whose body is every block
//! that can flow into one of those latches without first leaving through
//! the header. Nesting depth is recorded at detection time so callers can
//! order loops inner-to-outer without re-deriving containment.

use crate::cfg::DominatorTree;
use crate::ir::{BlockId, Function};
use std::collections::{BTreeMap, VecDeque};

/// A single-entry loop, identified by its header
#[derive(Debug, Clone)]
pub struct NaturalLoop {
    /// Sole entry block; target of every back-edge into the loop
    pub header: BlockId,
    /// Back-edge sources, in block order
    pub latches: Vec<BlockId>,
    /// Member blocks in ascending order, header included
    pub body: Vec<BlockId>,
    /// Number of enclosing loops (0 for an outermost loop)
    pub depth: usize,
}

impl NaturalLoop {
    pub fn contains(&self, block: BlockId) -> bool {
        self.body.binary_search(&block).is_ok()
    }
}

/// Find every natural loop of a function
///
/// Returns loops in ascending header order with depths filled in. A
/// function whose dominator tree admits no back-edge has no loops.
pub fn find_loops(func: &Function, doms: &DominatorTree) -> Vec<NaturalLoop> {
    let mut latches_of: BTreeMap<BlockId, Vec<BlockId>> = BTreeMap::new();
    for (block, data) in func.blocks.iter().enumerate() {
        for succ in data.terminator.successors() {
            if doms.is_back_edge(block, succ) {
                let latches = latches_of.entry(succ).or_default();
                if !latches.contains(&block) {
                    latches.push(block);
                }
            }
        }
    }

    let preds = predecessor_lists(func);
    let mut loops: Vec<NaturalLoop> = latches_of
        .into_iter()
        .map(|(header, latches)| NaturalLoop {
            body: flow_into_latches(func.blocks.len(), &preds, header, &latches),
            header,
            latches,
            depth: 0,
        })
        .collect();

    // A loop sits one level inside every other loop whose body holds its
    // header, so the enclosing-loop count is the nesting depth directly.
    let depths: Vec<usize> = loops
        .iter()
        .map(|l| {
            loops
                .iter()
                .filter(|outer| outer.header != l.header && outer.contains(l.header))
                .count()
        })
        .collect();
    for (l, depth) in loops.iter_mut().zip(depths) {
        l.depth = depth;
    }

    loops
}

/// Blocks that can reach a latch while staying clear of the header,
/// gathered by walking predecessor lists backward from the latches
fn flow_into_latches(
    block_count: usize,
    preds: &[Vec<BlockId>],
    header: BlockId,
    latches: &[BlockId],
) -> Vec<BlockId> {
    let mut member = vec![false; block_count];
    member[header] = true;

    let mut pending: Vec<BlockId> = latches.iter().copied().filter(|&l| !member[l]).collect();
    while let Some(block) = pending.pop() {
        if member[block] {
            continue;
        }
        member[block] = true;
        pending.extend(preds[block].iter().copied().filter(|&p| !member[p]));
    }

    member
        .iter()
        .enumerate()
        .filter_map(|(block, &inside)| inside.then_some(block))
        .collect()
}

fn predecessor_lists(func: &Function) -> Vec<Vec<BlockId>> {
    let mut preds = vec![Vec::new(); func.blocks.len()];
    for (block, data) in func.blocks.iter().enumerate() {
        for succ in data.terminator.successors() {
            if !preds[succ].contains(&block) {
                preds[succ].push(block);
            }
        }
    }
    preds
}

/// Index of the deepest loop containing `block`, if any
pub fn innermost_loop(loops: &[NaturalLoop], block: BlockId) -> Option<usize> {
    loops
        .iter()
        .enumerate()
        .filter(|(_, l)| l.contains(block))
        .max_by_key(|(_, l)| l.depth)
        .map(|(index, _)| index)
}

/// Loop indices ordered deepest first; equal depths keep header order
pub fn loops_by_depth_desc(loops: &[NaturalLoop]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..loops.len()).collect();
    order.sort_by_key(|&i| std::cmp::Reverse(loops[i].depth));
    order
}

/// Breadth-first order over a loop's body, starting at its header
///
/// Successors outside the body are ignored, so the order never leaves the
/// loop even when exit edges are interleaved with internal ones.
pub fn loop_bfs(func: &Function, l: &NaturalLoop) -> Vec<BlockId> {
    let mut seen = vec![false; func.blocks.len()];
    seen[l.header] = true;
    let mut order = vec![l.header];
    let mut frontier = VecDeque::from([l.header]);

    while let Some(block) = frontier.pop_front() {
        for succ in func.successors(block) {
            if l.contains(succ) && !seen[succ] {
                seen[succ] = true;
                order.push(succ);
                frontier.push_back(succ);
            }
        }
    }

    order
}
