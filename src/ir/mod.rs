//! Serialized function representation
//!
//! Functions arrive as JSON module files: a list of basic blocks per
//! function, each block holding straight-line instructions and a typed
//! terminator. Blocks are addressed by dense indices into the function's
//! block vector, so block ids stay valid while the tail duplicator appends
//! cloned blocks at the end.

use crate::profile::Profile;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Block identifier: dense index into `Function::blocks`
pub type BlockId = usize;

/// SSA value identifier, unique within a function
pub type ValueId = u32;

/// Errors raised while validating or transforming a function
#[derive(Debug, Error)]
pub enum IrError {
    #[error("function `{0}` has no blocks")]
    EmptyFunction(String),

    #[error("function `{function}`: block {block} targets out-of-range block {target}")]
    BadBlockRef {
        function: String,
        block: BlockId,
        target: BlockId,
    },

    #[error("block {block}: terminator has no successor slot targeting block {target}")]
    MalformedTerminator { block: BlockId, target: BlockId },
}

/// A module: one source file's worth of functions plus profile data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    /// Name of the source file this module was compiled from
    pub source_file: String,
    pub functions: Vec<Function>,
}

impl Module {
    /// Load a module from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        use anyhow::Context;

        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read module file {}", path.display()))?;
        let module: Module = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse module file {}", path.display()))?;
        Ok(module)
    }

    /// Write the module back out as pretty-printed JSON
    pub fn to_json_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        use anyhow::Context;

        let path = path.as_ref();
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)
            .with_context(|| format!("Failed to write module file {}", path.display()))
    }
}

/// A function: parameters, basic blocks, and optional profile data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    #[serde(default)]
    pub params: Vec<Param>,
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub profile: Profile,
}

/// Function parameter: an SSA value with a type
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Param {
    pub value: ValueId,
    pub ty: Type,
}

impl Function {
    /// The entry block (always block 0)
    pub fn entry(&self) -> BlockId {
        0
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id]
    }

    /// Successor block ids of `id`, in terminator slot order
    pub fn successors(&self, id: BlockId) -> Vec<BlockId> {
        self.blocks[id].terminator.successors()
    }

    /// Check that every terminator targets an existing block
    pub fn validate(&self) -> Result<(), IrError> {
        if self.blocks.is_empty() {
            return Err(IrError::EmptyFunction(self.name.clone()));
        }
        for (id, block) in self.blocks.iter().enumerate() {
            for target in block.terminator.successors() {
                if target >= self.blocks.len() {
                    return Err(IrError::BadBlockRef {
                        function: self.name.clone(),
                        block: id,
                        target,
                    });
                }
            }
        }
        Ok(())
    }

    /// Map from SSA value to its type (parameters and instruction results)
    pub fn value_types(&self) -> HashMap<ValueId, Type> {
        let mut types = HashMap::new();
        for param in &self.params {
            types.insert(param.value, param.ty);
        }
        for block in &self.blocks {
            for inst in &block.instructions {
                if let Some(result) = inst.result {
                    types.insert(result, inst.ty);
                }
            }
        }
        types
    }

    /// Map from SSA value to its defining instruction site
    pub fn def_sites(&self) -> HashMap<ValueId, (BlockId, usize)> {
        let mut defs = HashMap::new();
        for (bid, block) in self.blocks.iter().enumerate() {
            for (iid, inst) in block.instructions.iter().enumerate() {
                if let Some(result) = inst.result {
                    defs.insert(result, (bid, iid));
                }
            }
        }
        defs
    }

    /// Whether any instruction or the terminator of `block` uses `value`
    pub fn value_used_in(&self, block: BlockId, value: ValueId) -> bool {
        let b = &self.blocks[block];
        let uses = |op: &Operand| matches!(op, Operand::Value(v) if *v == value);
        b.instructions
            .iter()
            .any(|inst| inst.operands.iter().any(uses))
            || b.terminator.operand().map_or(false, |op| uses(&op))
    }

    /// First unused SSA value id
    pub fn next_value_id(&self) -> ValueId {
        let param_max = self.params.iter().map(|p| p.value).max();
        let inst_max = self
            .blocks
            .iter()
            .flat_map(|b| b.instructions.iter().filter_map(|i| i.result))
            .max();
        param_max.into_iter().chain(inst_max).max().map_or(0, |v| v + 1)
    }
}

/// A basic block: straight-line instructions plus a terminator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    #[serde(default)]
    pub instructions: Vec<Instruction>,
    pub terminator: Terminator,
}

/// A non-terminator instruction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instruction {
    /// Result value, if the instruction produces one
    #[serde(default)]
    pub result: Option<ValueId>,
    pub opcode: Opcode,
    #[serde(default)]
    pub operands: Vec<Operand>,
    /// Comparison predicate (icmp/fcmp only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<Predicate>,
    /// Result type
    #[serde(default)]
    pub ty: Type,
}

/// Instruction opcodes the engine distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Opcode {
    ICmp,
    FCmp,
    Add,
    Sub,
    Mul,
    Div,
    Load,
    Store,
    Call,
    Invoke,
    CallBr,
    Phi,
    Cast,
    Gep,
}

/// Value types, as far as the heuristics care
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Type {
    Int,
    Float,
    Ptr,
    Bool,
    #[default]
    Void,
}

/// Instruction operand: an SSA value or an immediate constant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Value(ValueId),
    Int(i64),
    Float(f64),
}

impl Operand {
    pub fn as_value(&self) -> Option<ValueId> {
        match self {
            Operand::Value(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        !matches!(self, Operand::Value(_))
    }

    pub fn is_negative(&self) -> bool {
        match self {
            Operand::Int(i) => *i < 0,
            Operand::Float(f) => *f < 0.0,
            Operand::Value(_) => false,
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Operand::Int(i) => *i == 0,
            Operand::Float(f) => *f == 0.0,
            Operand::Value(_) => false,
        }
    }
}

/// Comparison predicates (integer signed/unsigned, float ordered/unordered)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Predicate {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ule,
    Ugt,
    Uge,
    Oeq,
    One,
    Olt,
    Ole,
    Ogt,
    Oge,
    Ueq,
    Une,
}

/// Predicate shape, ignoring signedness and float ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredClass {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Predicate {
    pub fn class(&self) -> PredClass {
        use Predicate::*;
        match self {
            Eq | Oeq | Ueq => PredClass::Eq,
            Ne | One | Une => PredClass::Ne,
            Slt | Ult | Olt => PredClass::Lt,
            Sle | Ule | Ole => PredClass::Le,
            Sgt | Ugt | Ogt => PredClass::Gt,
            Sge | Uge | Oge => PredClass::Ge,
        }
    }

    /// Equality or inequality predicate
    pub fn is_equality(&self) -> bool {
        matches!(self.class(), PredClass::Eq | PredClass::Ne)
    }

    /// Predicate that holds when both operands are equal
    pub fn is_true_when_equal(&self) -> bool {
        matches!(self.class(), PredClass::Eq | PredClass::Ge | PredClass::Le)
    }

    /// Ordering predicate (not an equality test)
    pub fn is_relational(&self) -> bool {
        matches!(
            self.class(),
            PredClass::Lt | PredClass::Le | PredClass::Gt | PredClass::Ge
        )
    }
}

/// Block terminators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terminator {
    /// Unconditional branch
    Br { target: BlockId },
    /// Two-way conditional branch; slot 0 is taken, slot 1 is fall-through
    CondBr {
        cond: Operand,
        taken: BlockId,
        fall_through: BlockId,
    },
    Switch {
        value: Operand,
        cases: Vec<BlockId>,
        default: BlockId,
    },
    IndirectBr { destinations: Vec<BlockId> },
    Ret {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Operand>,
    },
    Unreachable,
}

impl Terminator {
    /// Successor block ids in slot order
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Br { target } => vec![*target],
            Terminator::CondBr {
                taken, fall_through, ..
            } => vec![*taken, *fall_through],
            Terminator::Switch { cases, default, .. } => {
                let mut succs = cases.clone();
                succs.push(*default);
                succs
            }
            Terminator::IndirectBr { destinations } => destinations.clone(),
            Terminator::Ret { .. } | Terminator::Unreachable => vec![],
        }
    }

    /// Mutable references to every successor slot, in slot order
    pub fn successor_slots_mut(&mut self) -> Vec<&mut BlockId> {
        match self {
            Terminator::Br { target } => vec![target],
            Terminator::CondBr {
                taken, fall_through, ..
            } => vec![taken, fall_through],
            Terminator::Switch { cases, default, .. } => {
                let mut slots: Vec<&mut BlockId> = cases.iter_mut().collect();
                slots.push(default);
                slots
            }
            Terminator::IndirectBr { destinations } => destinations.iter_mut().collect(),
            Terminator::Ret { .. } | Terminator::Unreachable => vec![],
        }
    }

    /// The value operand consumed by the terminator, if any
    pub fn operand(&self) -> Option<Operand> {
        match self {
            Terminator::CondBr { cond, .. } => Some(*cond),
            Terminator::Switch { value, .. } => Some(*value),
            Terminator::Ret { value } => *value,
            _ => None,
        }
    }
}
