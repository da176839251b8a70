//! Branch feature extraction for predictor training
//!
//! Emits one fixed-schema CSV row per two-way conditional branch: 38
//! boolean features describing the branch's comparison, loop placement,
//! operand uses, direction, and successor contents, followed by the
//! profile-derived label (the successor arm whose edge probability
//! exceeds one half). Rows are appended so multi-function modules and
//! repeated runs accumulate into one dataset.

use crate::ir::{BlockId, Opcode, Operand, PredClass, Predicate, Terminator};
use crate::trace::predict::{comparison_of, CmpDesc};
use crate::trace::FnContext;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Column names, label last
pub const COLUMNS: [&str; 39] = [
    "is_pointer_cmp",
    "is_pointer_eq",
    "is_taken_loop",
    "is_fall_through_loop",
    "is_ifcmp",
    "is_ifcmp_lt_zero",
    "is_ifcmp_gt_zero",
    "is_ifcmp_eq_zero",
    "is_ifcmp_ne_zero",
    "is_ifcmp_le_zero",
    "is_ifcmp_ge_zero",
    "is_ifcmp_lt_negative",
    "is_ifcmp_gt_negative",
    "is_ifcmp_eq_negative",
    "is_ifcmp_ne_negative",
    "is_ifcmp_le_negative",
    "is_ifcmp_ge_negative",
    "is_fcmp_eq",
    "is_op1_used_taken",
    "is_op1_used_fall_through",
    "is_op2_used_taken",
    "is_op2_used_fall_through",
    "is_taken_backward",
    "is_fall_through_backward",
    "has_taken_call",
    "has_taken_invoke",
    "has_taken_store",
    "has_taken_ret",
    "has_taken_indirectbr",
    "has_taken_yield",
    "is_taken_pdom",
    "has_fall_through_call",
    "has_fall_through_invoke",
    "has_fall_through_store",
    "has_fall_through_ret",
    "has_fall_through_indirectbr",
    "has_fall_through_yield",
    "is_fall_through_pdom",
    "label",
];

/// One dataset row, column order matching [`COLUMNS`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureRow(pub [u8; 39]);

impl FeatureRow {
    /// Comma-separated line without trailing newline
    pub fn to_csv_line(&self) -> String {
        self.0
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// How the per-opcode successor flags are collected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpcodeFlagMode {
    /// Flag is set when any instruction in the successor matches
    #[default]
    Any,
    /// Flags reflect only the final opcode observation of the successor,
    /// reproducing the historical dataset layout
    LastOnly,
}

/// Extract one row per conditional branch, in branch-discovery order
pub fn extract_function(ctx: &FnContext, mode: OpcodeFlagMode) -> Vec<FeatureRow> {
    ctx.branches
        .iter()
        .map(|branch| {
            let cmp = comparison_of(ctx, branch.cond);
            extract_row(ctx, branch.block, branch.taken, branch.fall_through, cmp, mode)
        })
        .collect()
}

fn extract_row(
    ctx: &FnContext,
    block: BlockId,
    taken: BlockId,
    fall_through: BlockId,
    cmp: Option<CmpDesc>,
    mode: OpcodeFlagMode,
) -> FeatureRow {
    let mut is_pointer_cmp = 0;
    let mut is_pointer_eq = 0;
    let mut is_ifcmp = 0;
    let mut is_fcmp_eq = 0;
    let mut zero_flags = [0u8; 6];
    let mut negative_flags = [0u8; 6];
    let mut is_op1_used_taken = 0;
    let mut is_op1_used_fall_through = 0;
    let mut is_op2_used_taken = 0;
    let mut is_op2_used_fall_through = 0;

    if let Some(cmp) = cmp {
        if operand_is_pointer(ctx, cmp.op1) && operand_is_pointer(ctx, cmp.op2) {
            is_pointer_cmp = 1;
            if cmp.predicate.is_equality() && cmp.predicate.is_true_when_equal() {
                is_pointer_eq = 1;
            }
        }

        if !cmp.is_float {
            is_ifcmp = 1;
        }

        // Constant-versus-variable comparisons, normalized to
        // "variable op constant"
        if cmp.op1.is_constant() != cmp.op2.is_constant() {
            let (constant, class) = if cmp.op1.is_constant() {
                (cmp.op1, mirror(cmp.predicate.class()))
            } else {
                (cmp.op2, cmp.predicate.class())
            };
            if constant.is_zero() {
                zero_flags[class_slot(class)] = 1;
            }
            if constant.is_negative() {
                negative_flags[class_slot(class)] = 1;
            }
        }

        if matches!(cmp.predicate, Predicate::Oeq | Predicate::Ueq) {
            is_fcmp_eq = 1;
        }

        if let Some(v) = cmp.op1.as_value() {
            is_op1_used_taken = ctx.func.value_used_in(taken, v) as u8;
            is_op1_used_fall_through = ctx.func.value_used_in(fall_through, v) as u8;
        }
        if let Some(v) = cmp.op2.as_value() {
            is_op2_used_taken = ctx.func.value_used_in(taken, v) as u8;
            is_op2_used_fall_through = ctx.func.value_used_in(fall_through, v) as u8;
        }
    }

    let is_taken_loop = crate::cfg::loops::innermost_loop(&ctx.loops, taken).is_some() as u8;
    let is_fall_through_loop =
        crate::cfg::loops::innermost_loop(&ctx.loops, fall_through).is_some() as u8;

    let is_taken_backward = ctx.doms.terminator_dominates(taken, block) as u8;
    let is_fall_through_backward = ctx.doms.terminator_dominates(fall_through, block) as u8;

    let taken_opcodes = successor_opcode_flags(ctx, taken, mode);
    let fall_opcodes = successor_opcode_flags(ctx, fall_through, mode);

    let has_taken_yield = yields_to_hazard(ctx, taken) as u8;
    let has_fall_through_yield = yields_to_hazard(ctx, fall_through) as u8;
    let is_taken_pdom = ctx.terminator_post_dominates(taken, block) as u8;
    let is_fall_through_pdom = ctx.terminator_post_dominates(fall_through, block) as u8;

    let label = ctx.func.profile.branch_label(ctx.func, block).unwrap_or(0) as u8;

    FeatureRow([
        is_pointer_cmp,
        is_pointer_eq,
        is_taken_loop,
        is_fall_through_loop,
        is_ifcmp,
        zero_flags[class_slot(PredClass::Lt)],
        zero_flags[class_slot(PredClass::Gt)],
        zero_flags[class_slot(PredClass::Eq)],
        zero_flags[class_slot(PredClass::Ne)],
        zero_flags[class_slot(PredClass::Le)],
        zero_flags[class_slot(PredClass::Ge)],
        negative_flags[class_slot(PredClass::Lt)],
        negative_flags[class_slot(PredClass::Gt)],
        negative_flags[class_slot(PredClass::Eq)],
        negative_flags[class_slot(PredClass::Ne)],
        negative_flags[class_slot(PredClass::Le)],
        negative_flags[class_slot(PredClass::Ge)],
        is_fcmp_eq,
        is_op1_used_taken,
        is_op1_used_fall_through,
        is_op2_used_taken,
        is_op2_used_fall_through,
        is_taken_backward,
        is_fall_through_backward,
        taken_opcodes[0],
        taken_opcodes[1],
        taken_opcodes[2],
        taken_opcodes[3],
        taken_opcodes[4],
        has_taken_yield,
        is_taken_pdom,
        fall_opcodes[0],
        fall_opcodes[1],
        fall_opcodes[2],
        fall_opcodes[3],
        fall_opcodes[4],
        has_fall_through_yield,
        is_fall_through_pdom,
        label,
    ])
}

fn operand_is_pointer(ctx: &FnContext, op: Operand) -> bool {
    match op {
        Operand::Value(v) => ctx.value_types.get(&v) == Some(&crate::ir::Type::Ptr),
        _ => false,
    }
}

/// Swap the comparison direction for constant-on-the-left comparisons
fn mirror(class: PredClass) -> PredClass {
    match class {
        PredClass::Lt => PredClass::Gt,
        PredClass::Gt => PredClass::Lt,
        PredClass::Le => PredClass::Ge,
        PredClass::Ge => PredClass::Le,
        PredClass::Eq | PredClass::Ne => class,
    }
}

fn class_slot(class: PredClass) -> usize {
    match class {
        PredClass::Lt => 0,
        PredClass::Gt => 1,
        PredClass::Eq => 2,
        PredClass::Ne => 3,
        PredClass::Le => 4,
        PredClass::Ge => 5,
    }
}

/// [call, invoke, store, ret, indirectbr] flags for a successor block
///
/// The observation sequence is the block's instruction opcodes followed by
/// its terminator. Any-mode ORs observations; last-only mode keeps the
/// final observation's flags.
fn successor_opcode_flags(ctx: &FnContext, successor: BlockId, mode: OpcodeFlagMode) -> [u8; 5] {
    #[derive(Clone, Copy, PartialEq)]
    enum Obs {
        Op(Opcode),
        Ret,
        IndirectBr,
        Other,
    }

    let block = ctx.func.block(successor);
    let observations = block
        .instructions
        .iter()
        .map(|inst| Obs::Op(inst.opcode))
        .chain(std::iter::once(match block.terminator {
            Terminator::Ret { .. } => Obs::Ret,
            Terminator::IndirectBr { .. } => Obs::IndirectBr,
            _ => Obs::Other,
        }));

    let mut flags = [0u8; 5];
    for obs in observations {
        let current = [
            (obs == Obs::Op(Opcode::Call)) as u8,
            (obs == Obs::Op(Opcode::Invoke)) as u8,
            (obs == Obs::Op(Opcode::Store)) as u8,
            (obs == Obs::Ret) as u8,
            (obs == Obs::IndirectBr) as u8,
        ];
        match mode {
            OpcodeFlagMode::Any => {
                for (flag, cur) in flags.iter_mut().zip(current) {
                    *flag |= cur;
                }
            }
            OpcodeFlagMode::LastOnly => flags = current,
        }
    }
    flags
}

/// Whether the block ends in an unconditional branch into a hazardous
/// block
fn yields_to_hazard(ctx: &FnContext, block: BlockId) -> bool {
    if let Terminator::Br { target } = ctx.func.block(block).terminator {
        ctx.hazards[target].has_hazard
    } else {
        false
    }
}

/// Append-mode CSV sink
///
/// Write failures are logged and the affected row dropped; extraction
/// continues with the remaining rows.
pub struct CsvSink {
    path: PathBuf,
}

impl CsvSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Append rows, returning how many were actually written
    pub fn append(&self, rows: &[FeatureRow]) -> usize {
        let mut file = match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to open dataset file");
                return 0;
            }
        };

        let mut written = 0;
        for row in rows {
            match writeln!(file, "{}", row.to_csv_line()) {
                Ok(()) => written += 1,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "dropping dataset row");
                }
            }
        }
        written
    }
}
