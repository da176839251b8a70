//! Block classification: hazard scan and branch collection
//!
//! A single linear pass over each block flags instructions that make a
//! block unsuitable as a trace interior (stores, invokes, callbr) and
//! terminators that stop trace growth outright (returns, indirect
//! branches). The same pass collects every two-way conditional branch for
//! the predictor.

use crate::ir::{BlockId, Function, Opcode, Operand, Terminator};

/// Per-block hazard flags
#[derive(Debug, Clone, Copy, Default)]
pub struct HazardInfo {
    /// Block contains any hazardous instruction or terminator
    pub has_hazard: bool,
    /// Block ends in a return
    pub has_return: bool,
    /// Block ends in an indirect branch
    pub has_indirect_branch: bool,
}

/// A two-way conditional branch
#[derive(Debug, Clone, Copy)]
pub struct BranchRef {
    /// Index into the function's branch list
    pub id: usize,
    /// Block owning the branch
    pub block: BlockId,
    /// Successor slot 0
    pub taken: BlockId,
    /// Successor slot 1
    pub fall_through: BlockId,
    /// Branch condition
    pub cond: Operand,
}

/// Classify every block of a function
pub fn classify_blocks(func: &Function) -> Vec<HazardInfo> {
    func.blocks
        .iter()
        .map(|block| {
            let mut info = HazardInfo::default();
            for inst in &block.instructions {
                if matches!(inst.opcode, Opcode::Store | Opcode::Invoke | Opcode::CallBr) {
                    info.has_hazard = true;
                }
            }
            match block.terminator {
                Terminator::Ret { .. } => {
                    info.has_return = true;
                    info.has_hazard = true;
                }
                Terminator::IndirectBr { .. } => {
                    info.has_indirect_branch = true;
                    info.has_hazard = true;
                }
                _ => {}
            }
            info
        })
        .collect()
}

/// Collect every conditional branch in block order
pub fn conditional_branches(func: &Function) -> Vec<BranchRef> {
    let mut branches = Vec::new();
    for (block, b) in func.blocks.iter().enumerate() {
        if let Terminator::CondBr {
            cond,
            taken,
            fall_through,
        } = b.terminator
        {
            branches.push(BranchRef {
                id: branches.len(),
                block,
                taken,
                fall_through,
                cond,
            });
        }
    }
    branches
}
