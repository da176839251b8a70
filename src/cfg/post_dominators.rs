//! Post-dominator tree construction and queries
//!
//! A node d post-dominates node n if every path from n to function exit
//! must go through d. Post-dominance is the dual of dominance, computed by
//! running the dominance algorithm on a reversed CFG. Functions with
//! several exit blocks are handled by augmenting the graph with a virtual
//! exit that every real exit feeds into.

use crate::cfg::{Cfg, EdgeType};
use crate::ir::{BlockId, Function};
use petgraph::algo::dominators::simple_fast;
use petgraph::visit::Reversed;
use std::collections::HashMap;

/// Post-dominator tree for a CFG
///
/// Blocks that cannot reach any exit (for example infinite loops) have no
/// immediate post-dominator and post-dominate only themselves.
#[derive(Debug, Clone)]
pub struct PostDominatorTree {
    /// Immediate post-dominator per block; None for blocks whose
    /// post-dominator is the virtual exit, and for blocks that reach no
    /// exit at all
    immediate_post_dominator: HashMap<BlockId, Option<BlockId>>,
    /// Real exit blocks of the function
    exits: Vec<BlockId>,
}

impl PostDominatorTree {
    /// Compute the post-dominator tree
    ///
    /// Returns None if the function has no exit blocks.
    ///
    /// Algorithm:
    /// 1. Collect exit blocks (return / unreachable terminators)
    /// 2. Clone the graph and add a virtual exit fed by every real exit
    /// 3. Compute dominators on the reversed graph rooted at the virtual exit
    /// 4. Strip the virtual exit from the resulting tree
    pub fn new(cfg: &Cfg, func: &Function) -> Option<Self> {
        let exits = crate::cfg::analysis::find_exits(func);
        if exits.is_empty() {
            return None;
        }

        let mut augmented = cfg.clone();
        let virtual_exit = augmented.add_node(usize::MAX);
        for &exit in &exits {
            augmented.add_edge(exit, virtual_exit, EdgeType::Goto);
        }

        let dominators = simple_fast(Reversed(&augmented), virtual_exit);

        let mut immediate_post_dominator = HashMap::new();
        for n in cfg.node_indices() {
            let ipdom = dominators
                .immediate_dominator(n)
                .filter(|d| *d != virtual_exit)
                .map(|d| d.index());
            immediate_post_dominator.insert(n.index(), ipdom);
        }

        Some(Self {
            immediate_post_dominator,
            exits: exits.iter().map(|n| n.index()).collect(),
        })
    }

    /// The function's real exit blocks
    pub fn exits(&self) -> &[BlockId] {
        &self.exits
    }

    /// Immediate post-dominator of a block
    ///
    /// Returns None when the block's only post-dominator is the function
    /// exit itself (or when it reaches no exit).
    pub fn immediate_post_dominator(&self, block: BlockId) -> Option<BlockId> {
        self.immediate_post_dominator.get(&block).copied().flatten()
    }

    /// Check if `a` post-dominates `b`
    ///
    /// Non-strict: every block post-dominates itself.
    pub fn post_dominates(&self, a: BlockId, b: BlockId) -> bool {
        if a == b {
            return true;
        }
        let mut current = b;
        while let Some(ipdom) = self.immediate_post_dominator(current) {
            if ipdom == a {
                return true;
            }
            current = ipdom;
        }
        false
    }

    /// Check if `a` strictly post-dominates `b`
    pub fn strictly_post_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.post_dominates(a, b)
    }

    /// Whether the terminator of `a` post-dominates the terminator of `b`
    ///
    /// Block-level post-dominance for distinct blocks; within a single
    /// block the two terminators are the same instruction.
    pub fn terminator_post_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a == b || self.post_dominates(a, b)
    }
}
