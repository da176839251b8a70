//! Execution profile: block counts and branch probabilities
//!
//! Profile data rides alongside each function in the module file. Missing
//! block counts degrade to zero, which pushes the affected block to the end
//! of the seed order. Missing edge probabilities fall back to a uniform
//! split over the block's successors.

use crate::ir::{BlockId, Function, Terminator};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-function profile data
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    /// Execution count per block, aligned with the function's block vector.
    /// Shorter vectors leave trailing blocks at count zero.
    #[serde(default)]
    pub counts: Vec<u64>,
    /// Probability per successor slot, keyed by source block
    #[serde(default)]
    pub edge_probs: HashMap<BlockId, Vec<f64>>,
}

impl Profile {
    /// Execution count of a block (zero when unprofiled)
    pub fn block_count(&self, block: BlockId) -> u64 {
        self.counts.get(block).copied().unwrap_or(0)
    }

    /// Probability of the edge leaving `block` through successor slot `index`
    ///
    /// Falls back to a uniform split when the profile has no entry for the
    /// block: 1.0 for a single successor, 1/n for n successors.
    pub fn edge_prob(&self, func: &Function, block: BlockId, index: usize) -> f64 {
        if let Some(probs) = self.edge_probs.get(&block) {
            if let Some(p) = probs.get(index) {
                return *p;
            }
        }
        let n = func.successors(block).len();
        if n == 0 {
            0.0
        } else {
            1.0 / n as f64
        }
    }

    /// Total probability of reaching `to` from `from`, summed over every
    /// successor slot that targets `to`
    pub fn edge_prob_to(&self, func: &Function, from: BlockId, to: BlockId) -> f64 {
        func.successors(from)
            .iter()
            .enumerate()
            .filter(|(_, succ)| **succ == to)
            .map(|(index, _)| self.edge_prob(func, from, index))
            .sum()
    }

    /// Profile-predicted successor of a two-way conditional branch: the
    /// first successor index whose probability exceeds one half, defaulting
    /// to 0 on a tie
    pub fn branch_label(&self, func: &Function, block: BlockId) -> Option<usize> {
        match func.block(block).terminator {
            Terminator::CondBr { .. } => {}
            _ => return None,
        }
        for index in 0..2 {
            if self.edge_prob(func, block, index) > 0.5 {
                return Some(index);
            }
        }
        Some(0)
    }
}
