//! Traversal toolkit: the prunable pre-order walk is the single primitive;
//! flattening, height, node counts and subtree clones are built on it.

use std::collections::HashMap;
use std::sync::Arc;

use super::{NodeId, ProcessNode, ProcessTree};

impl ProcessTree {
    /// Pre-order walk from the root. The visitor receives
    /// `(node, parent, depth)` (root depth = 1) and returns whether to
    /// descend into the node's children.
    pub fn walk<F>(&self, visit: &mut F)
    where
        F: FnMut(NodeId, Option<NodeId>, usize) -> bool,
    {
        self.walk_from(self.root(), None, 1, visit);
    }

    /// Pre-order walk of the subtree rooted at `id`, starting at `depth`.
    pub fn walk_from<F>(&self, id: NodeId, parent: Option<NodeId>, depth: usize, visit: &mut F)
    where
        F: FnMut(NodeId, Option<NodeId>, usize) -> bool,
    {
        if visit(id, parent, depth) {
            for &child in &self.node(id).children {
                self.walk_from(child, Some(id), depth + 1, visit);
            }
        }
    }

    /// Flattened pre-order node sequence, children in their stored
    /// (descending-by-creation) order. The basis of positional comparison.
    pub fn flatten(&self) -> Vec<NodeId> {
        let mut flat = Vec::with_capacity(self.len());
        self.walk(&mut |id, _, _| {
            flat.push(id);
            true
        });
        flat
    }

    /// Longest root-to-leaf path in edges + 1; a lone leaf has height 1.
    pub fn height(&self) -> usize {
        self.height_of(self.root())
    }

    pub fn height_of(&self, id: NodeId) -> usize {
        1 + self
            .node(id)
            .children
            .iter()
            .map(|&child| self.height_of(child))
            .max()
            .unwrap_or(0)
    }

    /// Nodes reachable from the root. Orphans are excluded, so this can be
    /// smaller than `len()`.
    pub fn size(&self) -> usize {
        self.size_of(self.root())
    }

    pub fn size_of(&self, id: NodeId) -> usize {
        let mut count = 0;
        self.walk_from(id, None, 1, &mut |_, _, _| {
            count += 1;
            true
        });
        count
    }

    /// Structurally independent clone of the subtree rooted at `id`.
    /// Records and technique sets are shared by reference; topology is not,
    /// so experiments on the clone never touch the original.
    pub fn subtree(&self, id: NodeId) -> ProcessTree {
        self.clone_subtree(id, None)
    }

    /// Subtree clone truncated below `max_depth` (the subtree root counts as
    /// depth 1): every node deeper than `max_depth` is dropped, which bounds
    /// the clone's height for candidate evaluation.
    pub fn pruned_subtree(&self, id: NodeId, max_depth: usize) -> ProcessTree {
        self.clone_subtree(id, Some(max_depth))
    }

    fn clone_subtree(&self, id: NodeId, max_depth: Option<usize>) -> ProcessTree {
        let mut nodes: Vec<ProcessNode> = Vec::new();
        let mut by_oid = HashMap::new();
        let mut by_pid = HashMap::new();
        let mut mapping: HashMap<NodeId, NodeId> = HashMap::new();

        self.walk_from(id, None, 1, &mut |src_id, parent, depth| {
            if max_depth.is_some_and(|limit| depth > limit) {
                return false;
            }
            let src = self.node(src_id);
            let new_id = nodes.len();
            nodes.push(ProcessNode {
                record: Arc::clone(&src.record),
                parent: None,
                children: Vec::new(),
                techniques: Arc::clone(&src.techniques),
            });
            by_oid.insert(src.record.oid.clone(), new_id);
            by_pid.entry(src.record.pid).or_insert(new_id);
            if let Some(parent) = parent {
                // pre-order guarantees the parent was mapped first
                let new_parent = mapping[&parent];
                nodes[new_id].parent = Some(new_parent);
                nodes[new_parent].children.push(new_id);
            }
            mapping.insert(src_id, new_id);
            max_depth.is_none_or(|limit| depth < limit)
        });

        let mut tree = ProcessTree {
            nodes,
            root: 0,
            by_oid,
            by_pid,
            levels: Vec::new(),
        };
        tree.finalize();
        tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{ProcessRecord, Report};
    use crate::tree::MAIN_PROCESS;

    /// root(r) -> a -> c
    ///         -> b        (a created after b, so a is visited first)
    fn sample_tree() -> ProcessTree {
        let mut root = ProcessRecord::test("r", 100, 0, "root.exe", 10);
        root.process_type = MAIN_PROCESS.to_string();
        let report = Report::test(
            "walk-run",
            vec![
                root,
                ProcessRecord::test("a", 200, 100, "a.exe", 30),
                ProcessRecord::test("b", 300, 100, "b.exe", 20),
                ProcessRecord::test("c", 400, 200, "c.exe", 40),
            ],
            vec![],
        );
        ProcessTree::build(&report).unwrap()
    }

    fn oids(tree: &ProcessTree, ids: &[NodeId]) -> Vec<String> {
        ids.iter()
            .map(|&id| tree.node(id).record.oid.clone())
            .collect()
    }

    #[test]
    fn flatten_is_preorder_in_stored_child_order() {
        let tree = sample_tree();
        assert_eq!(oids(&tree, &tree.flatten()), vec!["r", "a", "c", "b"]);
    }

    #[test]
    fn visitor_can_prune_descent() {
        let tree = sample_tree();
        let mut visited = Vec::new();
        tree.walk(&mut |id, _, depth| {
            visited.push(id);
            depth < 2 // never descend below the root's children
        });
        assert_eq!(oids(&tree, &visited), vec!["r", "a", "b"]);
    }

    #[test]
    fn height_and_size() {
        let tree = sample_tree();
        assert_eq!(tree.height(), 3);
        assert_eq!(tree.size(), 4);
        let a = tree.node_by_oid("a").unwrap();
        assert_eq!(tree.height_of(a), 2);
        assert_eq!(tree.size_of(a), 2);
        let b = tree.node_by_oid("b").unwrap();
        assert_eq!(tree.height_of(b), 1);
    }

    #[test]
    fn subtree_clone_is_independent() {
        let tree = sample_tree();
        let a = tree.node_by_oid("a").unwrap();
        let clone = tree.subtree(a);
        assert_eq!(clone.size(), 2);
        assert_eq!(clone.levels(), &[1, 1]);
        assert_eq!(clone.node(clone.root()).record.oid, "a");
        // shared record, independent topology
        assert!(Arc::ptr_eq(
            &clone.node(clone.root()).record,
            &tree.node(a).record
        ));
        assert_eq!(tree.size(), 4);
    }

    #[test]
    fn pruned_clone_bounds_the_height() {
        let tree = sample_tree();
        let pruned = tree.pruned_subtree(tree.root(), 2);
        assert_eq!(pruned.height(), 2);
        assert_eq!(pruned.size(), 3);
        assert_eq!(pruned.levels(), &[1, 2]);
        assert!(pruned.node_by_oid("c").is_none());
    }
}
