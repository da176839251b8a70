//! Relational consistency between path predictions
//!
//! Branches whose conditions compare the same operand pair can be
//! predicted independently and end up contradicting each other (`p == q`
//! predicted to hold while `p != q` is also predicted to hold). The
//! earliest-priority prediction over each operand pair is the standard;
//! every lower-priority prediction over the same pair is flipped when the
//! predicate-pair table says the two predicates cannot agree.

use crate::ir::PredClass;
use crate::trace::predict::{CmpDesc, Predictions, PATH_HEURISTIC_COUNT};
use std::collections::HashMap;

/// Operand order of the candidate relative to the standard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PairOrder {
    Same,
    Swapped,
}

/// Order pattern a flip rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrderMask {
    Same,
    Swapped,
    Either,
}

impl OrderMask {
    fn matches(&self, order: PairOrder) -> bool {
        match self {
            OrderMask::Either => true,
            OrderMask::Same => order == PairOrder::Same,
            OrderMask::Swapped => order == PairOrder::Swapped,
        }
    }
}

/// Predicate pairs that cannot both hold over one operand pair.
/// (standard, candidate, operand order) entries; a matching candidate
/// takes the opposite direction of the standard.
const FLIP_RULES: &[(PredClass, PredClass, OrderMask)] = &[
    // standard =: flip !=, <, > in either order
    (PredClass::Eq, PredClass::Ne, OrderMask::Either),
    (PredClass::Eq, PredClass::Lt, OrderMask::Either),
    (PredClass::Eq, PredClass::Gt, OrderMask::Either),
    // standard !=: flip =
    (PredClass::Ne, PredClass::Eq, OrderMask::Either),
    // standard >: flip <, <=, = in the same order and >, >=, = swapped
    (PredClass::Gt, PredClass::Lt, OrderMask::Same),
    (PredClass::Gt, PredClass::Le, OrderMask::Same),
    (PredClass::Gt, PredClass::Eq, OrderMask::Same),
    (PredClass::Gt, PredClass::Gt, OrderMask::Swapped),
    (PredClass::Gt, PredClass::Ge, OrderMask::Swapped),
    (PredClass::Gt, PredClass::Eq, OrderMask::Swapped),
    // standard <: mirror of >
    (PredClass::Lt, PredClass::Gt, OrderMask::Same),
    (PredClass::Lt, PredClass::Ge, OrderMask::Same),
    (PredClass::Lt, PredClass::Eq, OrderMask::Same),
    (PredClass::Lt, PredClass::Lt, OrderMask::Swapped),
    (PredClass::Lt, PredClass::Le, OrderMask::Swapped),
    (PredClass::Lt, PredClass::Eq, OrderMask::Swapped),
    // standard >=: flip <, != in the same order and >, != swapped
    (PredClass::Ge, PredClass::Lt, OrderMask::Same),
    (PredClass::Ge, PredClass::Ne, OrderMask::Same),
    (PredClass::Ge, PredClass::Gt, OrderMask::Swapped),
    (PredClass::Ge, PredClass::Ne, OrderMask::Swapped),
    // standard <=: mirror of >=
    (PredClass::Le, PredClass::Gt, OrderMask::Same),
    (PredClass::Le, PredClass::Ne, OrderMask::Same),
    (PredClass::Le, PredClass::Lt, OrderMask::Swapped),
    (PredClass::Le, PredClass::Ne, OrderMask::Swapped),
];

fn must_flip(standard: PredClass, candidate: PredClass, order: PairOrder) -> bool {
    FLIP_RULES
        .iter()
        .any(|(s, c, mask)| *s == standard && *c == candidate && mask.matches(order))
}

/// Flip lower-priority predictions that contradict the standard over the
/// same operand pair
pub(crate) fn resolve(descs: &HashMap<usize, CmpDesc>, predictions: &mut Predictions) {
    for standard_rank in 0..PATH_HEURISTIC_COUNT {
        for position in 0..predictions.ranks[standard_rank].len() {
            let standard = predictions.ranks[standard_rank][position];
            let Some(standard_cmp) = descs.get(&standard).copied() else {
                continue;
            };

            for candidate_rank in standard_rank + 1..PATH_HEURISTIC_COUNT {
                for candidate_pos in 0..predictions.ranks[candidate_rank].len() {
                    let candidate = predictions.ranks[candidate_rank][candidate_pos];
                    let Some(candidate_cmp) = descs.get(&candidate).copied() else {
                        continue;
                    };

                    let same = standard_cmp.op1 == candidate_cmp.op1
                        && standard_cmp.op2 == candidate_cmp.op2;
                    let swapped = standard_cmp.op1 == candidate_cmp.op2
                        && standard_cmp.op2 == candidate_cmp.op1;
                    if !same && !swapped {
                        continue;
                    }

                    let standard_class = standard_cmp.predicate.class();
                    let candidate_class = candidate_cmp.predicate.class();
                    let flip = (same
                        && must_flip(standard_class, candidate_class, PairOrder::Same))
                        || (swapped
                            && must_flip(standard_class, candidate_class, PairOrder::Swapped));

                    if flip {
                        let standard_arm = predictions.path[&standard];
                        predictions.path.insert(candidate, 1 - standard_arm);
                    }
                }
            }
        }
    }
}
