//! Static branch prediction
//!
//! Two passes over the function's conditional branches. The hazard pass
//! steers traces away from arms that reach hazardous blocks. The path
//! pass applies five structural heuristics in a fixed priority order
//! (pointer, loop, opcode, guard, direction); once a heuristic fires for
//! a branch, later ones never overwrite it. A final relational pass keeps
//! predictions over shared operand pairs mutually consistent.
//!
//! Predictions name the successor arm to follow: 0 is taken, 1 is
//! fall-through.

use crate::ir::{Opcode, Operand, PredClass, Predicate, Terminator, Type};
use crate::trace::{consistency, BranchRef, FnContext};
use serde::Serialize;
use std::collections::HashMap;

/// The comparison feeding a conditional branch
#[derive(Debug, Clone, Copy)]
pub struct CmpDesc {
    pub predicate: Predicate,
    pub op1: Operand,
    pub op2: Operand,
    /// Condition comes from a float comparison
    pub is_float: bool,
}

/// Path heuristics in application order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PathHeuristic {
    Pointer = 0,
    Loop = 1,
    Opcode = 2,
    Guard = 3,
    Direction = 4,
}

pub const PATH_HEURISTIC_COUNT: usize = 5;

/// Prediction maps produced by the two passes
///
/// The hazard and path maps are disjoint: a hazard prediction suppresses
/// the path pass for that branch.
#[derive(Debug, Clone, Default)]
pub struct Predictions {
    pub(crate) hazard: HashMap<usize, usize>,
    pub(crate) path: HashMap<usize, usize>,
    /// Path-predicted branch ids grouped by the heuristic that fired
    pub(crate) ranks: [Vec<usize>; PATH_HEURISTIC_COUNT],
}

impl Predictions {
    /// Effective prediction for a branch: hazard first, then path
    pub fn predicted(&self, branch: usize) -> Option<usize> {
        self.hazard
            .get(&branch)
            .or_else(|| self.path.get(&branch))
            .copied()
    }

    pub fn hazard_of(&self, branch: usize) -> Option<usize> {
        self.hazard.get(&branch).copied()
    }

    pub fn path_of(&self, branch: usize) -> Option<usize> {
        self.path.get(&branch).copied()
    }
}

/// One prediction, flattened for reporting
#[derive(Debug, Clone, Serialize)]
pub struct PredictionRecord {
    pub branch: usize,
    pub block: usize,
    pub source: &'static str,
    /// Predicted successor arm (0 taken, 1 fall-through)
    pub arm: usize,
}

/// Run both passes plus the relational-consistency pass
pub fn predict_branches(ctx: &FnContext) -> Predictions {
    let mut predictions = Predictions::default();
    let mut descs: HashMap<usize, CmpDesc> = HashMap::new();

    for branch in &ctx.branches {
        if let Some(arm) = hazard_prediction(ctx, branch) {
            predictions.hazard.insert(branch.id, arm);
        }
    }

    for branch in &ctx.branches {
        if predictions.hazard.contains_key(&branch.id) {
            continue;
        }
        let Some(cmp) = comparison_of(ctx, branch.cond) else {
            continue;
        };
        if let Some((heuristic, arm)) = path_prediction(ctx, branch, &cmp) {
            predictions.path.insert(branch.id, arm);
            predictions.ranks[heuristic as usize].push(branch.id);
            descs.insert(branch.id, cmp);
        }
    }

    consistency::resolve(&descs, &mut predictions);
    predictions
}

/// Flattened prediction list in branch order, for reporting
pub fn prediction_records(ctx: &FnContext, predictions: &Predictions) -> Vec<PredictionRecord> {
    let mut records = Vec::new();
    for branch in &ctx.branches {
        if let Some(arm) = predictions.hazard_of(branch.id) {
            records.push(PredictionRecord {
                branch: branch.id,
                block: branch.block,
                source: "hazard",
                arm,
            });
        } else if let Some(arm) = predictions.path_of(branch.id) {
            records.push(PredictionRecord {
                branch: branch.id,
                block: branch.block,
                source: "path",
                arm,
            });
        }
    }
    records
}

/// Resolve the comparison a branch condition comes from
pub fn comparison_of(ctx: &FnContext, cond: Operand) -> Option<CmpDesc> {
    let value = cond.as_value()?;
    let (block, index) = ctx.defs.get(&value).copied()?;
    let inst = &ctx.func.block(block).instructions[index];
    if !matches!(inst.opcode, Opcode::ICmp | Opcode::FCmp) {
        return None;
    }
    if inst.operands.len() != 2 {
        return None;
    }
    Some(CmpDesc {
        predicate: inst.predicate?,
        op1: inst.operands[0],
        op2: inst.operands[1],
        is_float: inst.opcode == Opcode::FCmp,
    })
}

/// Hazard heuristic
///
/// An arm is avoided when it is hazardous itself, or when it falls
/// through an unconditional branch into a hazardous block that does not
/// post-dominate the branch (the hazard is reached only via that arm).
/// The heuristic fires only when exactly one arm is avoided.
fn hazard_prediction(ctx: &FnContext, branch: &BranchRef) -> Option<usize> {
    let avoid_taken = avoid_arm(ctx, branch.taken, branch.block);
    let avoid_fall_through = avoid_arm(ctx, branch.fall_through, branch.block);
    if avoid_taken == avoid_fall_through {
        return None;
    }
    Some(if avoid_taken { 1 } else { 0 })
}

fn avoid_arm(ctx: &FnContext, arm: usize, branch_block: usize) -> bool {
    if ctx.hazards[arm].has_hazard {
        return true;
    }
    if let Terminator::Br { target } = ctx.func.block(arm).terminator {
        if ctx.hazards[target].has_hazard && !ctx.terminator_post_dominates(target, branch_block) {
            return true;
        }
    }
    false
}

/// Which side of the comparison holds the constant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConstSide {
    Left,
    Right,
}

/// Constant-versus-variable comparisons predicted to fall through when the
/// constant is negative. Directions flip with the operand order.
const NEGATIVE_FALL_THROUGH: &[(ConstSide, PredClass)] = &[
    (ConstSide::Left, PredClass::Ge),
    (ConstSide::Left, PredClass::Gt),
    (ConstSide::Right, PredClass::Le),
    (ConstSide::Right, PredClass::Lt),
];

/// Same table for a zero constant
const ZERO_FALL_THROUGH: &[(ConstSide, PredClass)] = &[
    (ConstSide::Left, PredClass::Gt),
    (ConstSide::Right, PredClass::Lt),
];

/// Path heuristics, first match wins
fn path_prediction(
    ctx: &FnContext,
    branch: &BranchRef,
    cmp: &CmpDesc,
) -> Option<(PathHeuristic, usize)> {
    // Pointer: distinct pointers are unlikely to compare equal
    if operand_type(ctx, cmp.op1) == Some(Type::Ptr)
        && operand_type(ctx, cmp.op2) == Some(Type::Ptr)
        && cmp.op1 != cmp.op2
    {
        let arm = if cmp.predicate.class() == PredClass::Eq {
            1
        } else {
            0
        };
        return Some((PathHeuristic::Pointer, arm));
    }

    // Loop: prefer the arm that stays in a loop
    let taken_in_loop = crate::cfg::loops::innermost_loop(&ctx.loops, branch.taken).is_some();
    let fall_in_loop = crate::cfg::loops::innermost_loop(&ctx.loops, branch.fall_through).is_some();
    if taken_in_loop != fall_in_loop {
        return Some((PathHeuristic::Loop, if taken_in_loop { 0 } else { 1 }));
    }

    // Opcode: comparisons against negative or zero constants rarely hold
    if cmp.op1.is_constant() != cmp.op2.is_constant() {
        let (constant, side) = if cmp.op1.is_constant() {
            (cmp.op1, ConstSide::Left)
        } else {
            (cmp.op2, ConstSide::Right)
        };
        let class = cmp.predicate.class();
        if constant.is_negative() {
            if class == PredClass::Eq {
                return Some((PathHeuristic::Opcode, 1));
            }
            if cmp.predicate.is_relational() && NEGATIVE_FALL_THROUGH.contains(&(side, class)) {
                return Some((PathHeuristic::Opcode, 1));
            }
        }
        if constant.is_zero()
            && cmp.predicate.is_relational()
            && ZERO_FALL_THROUGH.contains(&(side, class))
        {
            return Some((PathHeuristic::Opcode, 1));
        }
    }

    // Opcode: float values are unlikely to compare equal
    if cmp.is_float && cmp.predicate.is_equality() {
        let arm = if cmp.predicate.is_true_when_equal() {
            1
        } else {
            0
        };
        return Some((PathHeuristic::Opcode, arm));
    }

    // Guard: a branch guards the arm that uses one of its operands
    let guard_op1 = guarded_arm(ctx, branch, cmp.op1);
    let guard_op2 = guarded_arm(ctx, branch, cmp.op2);
    match (guard_op1, guard_op2) {
        (Some(arm), None) | (None, Some(arm)) => {
            return Some((PathHeuristic::Guard, arm));
        }
        _ => {}
    }

    // Direction: when one arm is a back-edge target, predict the other
    let taken_backward = ctx.doms.terminator_dominates(branch.taken, branch.block);
    let fall_backward = ctx.doms.terminator_dominates(branch.fall_through, branch.block);
    if taken_backward != fall_backward {
        return Some((
            PathHeuristic::Direction,
            if taken_backward { 1 } else { 0 },
        ));
    }

    None
}

/// Arm guarded by uses of `op`, when exactly one arm uses it and that arm
/// does not post-dominate the branch
fn guarded_arm(ctx: &FnContext, branch: &BranchRef, op: Operand) -> Option<usize> {
    let value = op.as_value()?;
    let used_taken = ctx.func.value_used_in(branch.taken, value)
        && !ctx.terminator_post_dominates(branch.taken, branch.block);
    let used_fall = ctx.func.value_used_in(branch.fall_through, value)
        && !ctx.terminator_post_dominates(branch.fall_through, branch.block);
    if used_taken == used_fall {
        return None;
    }
    Some(if used_taken { 0 } else { 1 })
}

fn operand_type(ctx: &FnContext, op: Operand) -> Option<Type> {
    match op {
        Operand::Value(v) => ctx.value_types.get(&v).copied(),
        Operand::Int(_) => Some(Type::Int),
        Operand::Float(_) => Some(Type::Float),
    }
}

/// Agreement counters between static predictions and the profile
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PredictionStats {
    pub conditional_branches: usize,
    pub hazard_predicted: usize,
    pub hazard_agree: usize,
    pub path_predicted: usize,
    pub path_agree: usize,
}

impl PredictionStats {
    pub fn covered(&self) -> usize {
        self.hazard_predicted + self.path_predicted
    }

    pub fn agreeing(&self) -> usize {
        self.hazard_agree + self.path_agree
    }

    /// Fraction of covered branches agreeing with the profile
    pub fn accuracy(&self) -> f64 {
        if self.covered() == 0 {
            0.0
        } else {
            self.agreeing() as f64 / self.covered() as f64
        }
    }

    /// Fraction of conditional branches covered by either pass
    pub fn coverage(&self) -> f64 {
        if self.conditional_branches == 0 {
            0.0
        } else {
            self.covered() as f64 / self.conditional_branches as f64
        }
    }

    /// Fold another function's counters into this accumulator
    pub fn add(&mut self, other: &PredictionStats) {
        self.conditional_branches += other.conditional_branches;
        self.hazard_predicted += other.hazard_predicted;
        self.hazard_agree += other.hazard_agree;
        self.path_predicted += other.path_predicted;
        self.path_agree += other.path_agree;
    }
}

/// Compare predictions against the profile's preferred successor
pub fn prediction_stats(ctx: &FnContext, predictions: &Predictions) -> PredictionStats {
    let mut stats = PredictionStats {
        conditional_branches: ctx.branches.len(),
        ..PredictionStats::default()
    };
    for branch in &ctx.branches {
        let label = ctx
            .func
            .profile
            .branch_label(ctx.func, branch.block)
            .unwrap_or(0);
        if let Some(arm) = predictions.hazard_of(branch.id) {
            stats.hazard_predicted += 1;
            if arm == label {
                stats.hazard_agree += 1;
            }
        } else if let Some(arm) = predictions.path_of(branch.id) {
            stats.path_predicted += 1;
            if arm == label {
                stats.path_agree += 1;
            }
        }
    }
    stats
}
