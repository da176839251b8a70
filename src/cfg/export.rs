//! CFG export to DOT and JSON formats

use crate::cfg::{find_exits, Cfg};
use crate::ir::{BlockId, Function, Terminator};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Export a function's CFG to DOT format for Graphviz
pub fn export_dot(func: &Function, cfg: &Cfg) -> String {
    let exits: Vec<BlockId> = find_exits(func).iter().map(|n| n.index()).collect();

    let mut dot = String::from("digraph CFG {\n");
    dot.push_str("  rankdir=TB;\n");
    dot.push_str("  node [shape=box, style=rounded];\n\n");

    for (id, block) in func.blocks.iter().enumerate() {
        let label = escape_dot_string(&format!(
            "Block {}\\n{} inst\\n{}",
            id,
            block.instructions.len(),
            format_terminator(&block.terminator)
        ));

        let style = if id == func.entry() {
            "fillcolor=lightgreen, style=filled"
        } else if exits.contains(&id) {
            "fillcolor=lightcoral, style=filled"
        } else {
            ""
        };

        writeln!(dot, "  \"{}\" [label=\"{}\" {}];", id, label, style).ok();
    }

    dot.push('\n');
    for edge in cfg.edge_references() {
        let edge_type = edge.weight();
        let label = edge_type.dot_label();
        let label_attr = if label.is_empty() {
            String::new()
        } else {
            format!(", label=\"{}\"", label)
        };

        writeln!(
            dot,
            "  \"{}\" -> \"{}\" [color={}{}];",
            edge.source().index(),
            edge.target().index(),
            edge_type.dot_color(),
            label_attr
        )
        .ok();
    }

    dot.push_str("}\n");
    dot
}

fn escape_dot_string(s: &str) -> String {
    s.replace('"', "\\\"")
}

fn format_terminator(term: &Terminator) -> String {
    match term {
        Terminator::Br { target } => format!("br {}", target),
        Terminator::CondBr {
            taken, fall_through, ..
        } => format!("condbr {} / {}", taken, fall_through),
        Terminator::Switch { cases, default, .. } => {
            format!("switch({} cases, default {})", cases.len(), default)
        }
        Terminator::IndirectBr { destinations } => {
            format!("indirectbr({} dests)", destinations.len())
        }
        Terminator::Ret { .. } => "ret".to_string(),
        Terminator::Unreachable => "unreachable".to_string(),
    }
}

/// Complete CFG export for JSON serialization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CfgExport {
    pub function_name: String,
    pub entry: BlockId,
    pub exits: Vec<BlockId>,
    pub blocks: Vec<BlockExport>,
    pub edges: Vec<EdgeExport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockExport {
    pub id: BlockId,
    pub instructions: usize,
    pub terminator: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeExport {
    pub from: BlockId,
    pub to: BlockId,
    pub kind: String,
}

/// Export a function's CFG to a JSON-serializable structure
pub fn export_json(func: &Function, cfg: &Cfg) -> CfgExport {
    CfgExport {
        function_name: func.name.clone(),
        entry: func.entry(),
        exits: find_exits(func).iter().map(|n| n.index()).collect(),
        blocks: func
            .blocks
            .iter()
            .enumerate()
            .map(|(id, block)| BlockExport {
                id,
                instructions: block.instructions.len(),
                terminator: format_terminator(&block.terminator),
            })
            .collect(),
        edges: cfg
            .edge_references()
            .map(|edge| EdgeExport {
                from: edge.source().index(),
                to: edge.target().index(),
                kind: format!("{:?}", edge.weight()),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::build_cfg;
    use crate::ir::{Block, Operand};
    use crate::profile::Profile;

    fn branchy() -> Function {
        Function {
            name: "branchy".to_string(),
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
                    terminator: Terminator::Ret { value: None },
                },
                Block {
                    instructions: vec![],
                    terminator: Terminator::Ret { value: None },
                },
            ],
            profile: Profile::default(),
        }
    }

    #[test]
    fn test_export_dot_contains_nodes_and_edges() {
        let f = branchy();
        let cfg = build_cfg(&f);
        let dot = export_dot(&f, &cfg);
        assert!(dot.starts_with("digraph CFG {"));
        assert!(dot.contains("\"0\" -> \"1\""));
        assert!(dot.contains("\"0\" -> \"2\""));
        assert!(dot.contains("condbr 1 / 2"));
    }

    #[test]
    fn test_export_json_shape() {
        let f = branchy();
        let cfg = build_cfg(&f);
        let export = export_json(&f, &cfg);
        assert_eq!(export.entry, 0);
        assert_eq!(export.exits, vec![1, 2]);
        assert_eq!(export.blocks.len(), 3);
        assert_eq!(export.edges.len(), 2);
    }
}
