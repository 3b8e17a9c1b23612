//! Process-tree model built from a sandbox report.
//!
//! Trees use an arena representation: nodes live in a `Vec` and refer to each
//! other by index. Records and technique sets are shared through `Arc` so
//! that subtree clones stay cheap. Trees are immutable once finalized; the
//! loose-alignment search keeps all of its transient state in per-call
//! scratch buffers instead of flags on the nodes, so a tree can be compared
//! from several places without any undo discipline.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::prelude::*;
use crate::report::{ModelError, Report};

mod walk;

/// Classification label marking the root of the process tree.
pub const MAIN_PROCESS: &str = "Main process";

pub type NodeId = usize;

#[derive(Debug, Clone)]
pub struct ProcessNode {
    pub record: Arc<crate::report::ProcessRecord>,
    pub parent: Option<NodeId>,
    /// Sorted descending by creation timestamp once the tree is finalized;
    /// this is the canonical traversal order.
    pub children: Vec<NodeId>,
    /// Union of the MITRE technique ids of every incident naming this
    /// process. May be empty.
    pub techniques: Arc<BTreeSet<String>>,
}

#[derive(Debug, Clone)]
pub struct ProcessTree {
    nodes: Vec<ProcessNode>,
    root: NodeId,
    /// Authoritative lookup: OIDs are unique per report.
    by_oid: HashMap<String, NodeId>,
    /// Best-effort lookup: PIDs can collide across sibling subtrees, in
    /// which case the first occurrence wins. Parent linkage is resolved once
    /// at build time and stored on the nodes, never re-derived through this
    /// map.
    by_pid: HashMap<i64, NodeId>,
    /// Live-node count per depth, root at depth 1 (`levels[0]`).
    levels: Vec<usize>,
}

impl ProcessTree {
    /// Build a tree from a report.
    ///
    /// Fails only when the report has no "Main process" entry. Processes
    /// whose parent PID matches nothing stay indexed but unattached: capture
    /// gaps upstream are common and must not poison the whole corpus.
    pub fn build(report: &Report) -> Result<Self, ModelError> {
        let mut nodes: Vec<ProcessNode> = Vec::with_capacity(report.processes.len());
        let mut by_oid = HashMap::with_capacity(report.processes.len());
        let mut by_pid = HashMap::with_capacity(report.processes.len());
        let mut root = None;

        for record in &report.processes {
            let id = nodes.len();
            nodes.push(ProcessNode {
                record: Arc::new(record.clone()),
                parent: None,
                children: Vec::new(),
                techniques: Arc::new(BTreeSet::new()),
            });
            by_oid.insert(record.oid.clone(), id);
            by_pid.entry(record.pid).or_insert(id);
            if root.is_none() && record.process_type == MAIN_PROCESS {
                root = Some(id);
            }
        }

        let root = root.ok_or_else(|| ModelError::CorruptedData {
            uuid: report.uuid.clone(),
        })?;

        let mut links: Vec<(NodeId, NodeId)> = Vec::with_capacity(nodes.len());
        for (id, node) in nodes.iter().enumerate() {
            if id == root {
                continue;
            }
            match by_pid.get(&node.record.parent_pid) {
                Some(&parent) if parent != id => links.push((parent, id)),
                _ => warn!(
                    "process {} (pid {}) has no captured parent (ppid {}), left unattached",
                    node.record.oid, node.record.pid, node.record.parent_pid
                ),
            }
        }
        for (parent, child) in links {
            nodes[child].parent = Some(parent);
            nodes[parent].children.push(child);
        }

        let mut techniques: HashMap<NodeId, BTreeSet<String>> = HashMap::new();
        for incident in &report.incidents {
            if incident.techniques.is_empty() {
                continue;
            }
            // incidents naming unknown OIDs are dropped
            if let Some(&id) = by_oid.get(&incident.process_oid) {
                techniques
                    .entry(id)
                    .or_default()
                    .extend(incident.techniques.iter().cloned());
            }
        }
        for (id, set) in techniques {
            nodes[id].techniques = Arc::new(set);
        }

        let mut tree = ProcessTree {
            nodes,
            root,
            by_oid,
            by_pid,
            levels: Vec::new(),
        };
        tree.finalize();
        Ok(tree)
    }

    /// Re-establish the canonical form: children sorted descending by
    /// creation timestamp (most recent first) and the per-depth histogram
    /// recomputed from a full traversal.
    fn finalize(&mut self) {
        let created: Vec<i64> = self.nodes.iter().map(|n| n.record.created).collect();
        for node in &mut self.nodes {
            node.children.sort_by(|&a, &b| created[b].cmp(&created[a]));
        }

        let mut levels: Vec<usize> = Vec::new();
        self.walk(&mut |_, _, depth| {
            if levels.len() < depth {
                levels.resize(depth, 0);
            }
            levels[depth - 1] += 1;
            true
        });
        self.levels = levels;
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &ProcessNode {
        &self.nodes[id]
    }

    /// Number of nodes in the arena, attached or not.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_by_oid(&self, oid: &str) -> Option<NodeId> {
        self.by_oid.get(oid).copied()
    }

    pub fn node_by_pid(&self, pid: i64) -> Option<NodeId> {
        self.by_pid.get(&pid).copied()
    }

    /// Node count at the given depth (root = 1); zero beyond the height.
    pub fn level_count(&self, depth: usize) -> usize {
        depth
            .checked_sub(1)
            .and_then(|i| self.levels.get(i))
            .copied()
            .unwrap_or(0)
    }

    /// Per-depth node counts, index 0 = root level.
    pub fn levels(&self) -> &[usize] {
        &self.levels
    }
}
