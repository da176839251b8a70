//! CFG analysis: entry/exit detection, degree queries

use crate::cfg::{node, Cfg};
use crate::ir::{Function, Terminator};
use petgraph::graph::NodeIndex;

/// Find the entry node of a CFG
///
/// The entry is always the first basic block (block 0).
/// Returns None if the CFG is empty.
pub fn find_entry(cfg: &Cfg) -> Option<NodeIndex> {
    cfg.node_indices().next()
}

/// Find all exit nodes of a function
///
/// Exits are blocks that terminate execution: returns and unreachable
/// terminators. Functions commonly have several due to early returns.
pub fn find_exits(func: &Function) -> Vec<NodeIndex> {
    func.blocks
        .iter()
        .enumerate()
        .filter(|(_, block)| {
            matches!(
                block.terminator,
                Terminator::Ret { .. } | Terminator::Unreachable
            )
        })
        .map(|(id, _)| node(id))
        .collect()
}

/// Count incoming edges to a node
pub fn in_degree(cfg: &Cfg, block: NodeIndex) -> usize {
    cfg.neighbors_directed(block, petgraph::Direction::Incoming)
        .count()
}

/// Count outgoing edges from a node
pub fn out_degree(cfg: &Cfg, block: NodeIndex) -> usize {
    cfg.neighbors_directed(block, petgraph::Direction::Outgoing)
        .count()
}

/// Check if a node is a merge point (multiple incoming edges)
pub fn is_merge_point(cfg: &Cfg, block: NodeIndex) -> bool {
    in_degree(cfg, block) > 1
}

/// Check if a node is a branch point (multiple outgoing edges)
pub fn is_branch_point(cfg: &Cfg, block: NodeIndex) -> bool {
    out_degree(cfg, block) > 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::build_cfg;
    use crate::ir::{Block, Operand};
    use crate::profile::Profile;

    fn create_test_function() -> Function {
        // 0 -> 1 -> {2, 3}; 2 and 3 return
        Function {
            name: "t".to_string(),
            params: vec![],
            blocks: vec![
                Block {
                    instructions: vec![],
                    terminator: Terminator::Br { target: 1 },
                },
                Block {
                    instructions: vec![],
                    terminator: Terminator::CondBr {
                        cond: Operand::Int(1),
                        taken: 2,
                        fall_through: 3,
                    },
                },
                Block {
                    instructions: vec![],
                    terminator: Terminator::Ret { value: None },
                },
                Block {
                    instructions: vec![],
                    terminator: Terminator::Unreachable,
                },
            ],
            profile: Profile::default(),
        }
    }

    #[test]
    fn test_find_entry() {
        let f = create_test_function();
        let cfg = build_cfg(&f);
        assert_eq!(find_entry(&cfg), Some(node(0)));
    }

    #[test]
    fn test_find_entry_empty() {
        let cfg = Cfg::new();
        assert!(find_entry(&cfg).is_none());
    }

    #[test]
    fn test_find_exits() {
        let f = create_test_function();
        let exits = find_exits(&f);
        assert_eq!(exits, vec![node(2), node(3)]);
    }

    #[test]
    fn test_degrees() {
        let f = create_test_function();
        let cfg = build_cfg(&f);
        assert_eq!(in_degree(&cfg, node(1)), 1);
        assert_eq!(out_degree(&cfg, node(1)), 2);
        assert!(is_branch_point(&cfg, node(1)));
        assert!(!is_merge_point(&cfg, node(1)));
    }
}
