//! Edge type classification for CFG edges

use serde::{Deserialize, Serialize};

/// Type of control flow edge between basic blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeType {
    /// Conditional branch taken (successor slot 0)
    Taken,
    /// Conditional branch fall-through (successor slot 1)
    FallThrough,
    /// Unconditional branch
    Goto,
    /// Switch case arm
    Case,
    /// Switch default arm
    Default,
    /// Indirect branch destination
    Indirect,
}

impl EdgeType {
    /// Color for DOT visualization
    pub fn dot_color(&self) -> &'static str {
        match self {
            EdgeType::Taken => "green",
            EdgeType::FallThrough => "red",
            EdgeType::Goto => "black",
            EdgeType::Case => "blue",
            EdgeType::Default => "orange",
            EdgeType::Indirect => "purple",
        }
    }

    /// Label for DOT visualization
    pub fn dot_label(&self) -> &'static str {
        match self {
            EdgeType::Taken => "T",
            EdgeType::FallThrough => "F",
            EdgeType::Goto => "",
            EdgeType::Case => "case",
            EdgeType::Default => "default",
            EdgeType::Indirect => "indirect",
        }
    }
}
