//! Loose alignment: search for an embedded occurrence of the profile's shape
//! inside a larger candidate subtree by discarding whole branches.
//!
//! The search simulates deletions in per-call scratch state (an excluded
//! mask plus a private copy of the level histogram); the candidate tree is
//! never touched, so the search is re-entrant and leaves no state behind,
//! win or lose.

use crate::tree::{NodeId, ProcessTree};

/// Try to reduce `candidate` to the profile's exact per-depth node counts by
/// discarding whole subtrees. Returns the surviving candidate nodes in
/// pre-order (ready for positional scoring) or `None` when no reduction
/// exists. The first feasible reduction wins; the search does not look for
/// alternatives.
pub(crate) fn find_embedding(
    profile: &ProcessTree,
    candidate: &ProcessTree,
) -> Option<Vec<NodeId>> {
    let mut search = Search {
        candidate,
        profile_levels: profile.levels().to_vec(),
        live_levels: candidate.levels().to_vec(),
        excluded: vec![false; candidate.len()],
        live: candidate.size(),
        target: profile.size(),
    };
    if search.live < search.target {
        return None;
    }
    let mut found = None;
    search.explore(&mut found);
    found
}

struct Search<'a> {
    candidate: &'a ProcessTree,
    profile_levels: Vec<usize>,
    /// Scratch copies; only these are mutated during the search.
    live_levels: Vec<usize>,
    excluded: Vec<bool>,
    live: usize,
    target: usize,
}

impl Search<'_> {
    fn explore(&mut self, found: &mut Option<Vec<NodeId>>) -> bool {
        if self.live == self.target {
            if self.matches_profile() {
                *found = Some(self.live_order().into_iter().map(|(id, _)| id).collect());
                return true;
            }
            // at the target count with the wrong histogram: discards can only
            // shrink further, this configuration is dead
            return false;
        }

        // the root is never a discard candidate
        let order = self.live_order();
        for &(id, depth) in order.iter().skip(1) {
            let need = self
                .profile_levels
                .get(depth - 1)
                .copied()
                .unwrap_or(0);
            let have = self.live_levels[depth - 1];
            if have < need {
                // deletions never grow counts, so no sibling choice can
                // repair this depth either
                return false;
            }
            if have > need {
                let discarded = self.discard(id, depth);
                let hit = self.explore(found);
                self.restore(discarded);
                if hit {
                    return true;
                }
            }
        }
        false
    }

    fn matches_profile(&self) -> bool {
        let mut end = self.live_levels.len();
        while end > 0 && self.live_levels[end - 1] == 0 {
            end -= 1;
        }
        self.live_levels[..end] == self.profile_levels[..]
    }

    /// Live nodes in pre-order with their depths; excluded subtrees are
    /// skipped wholesale.
    fn live_order(&self) -> Vec<(NodeId, usize)> {
        let mut order = Vec::with_capacity(self.live);
        let excluded = &self.excluded;
        self.candidate.walk(&mut |id, _, depth| {
            if excluded[id] {
                return false;
            }
            order.push((id, depth));
            true
        });
        order
    }

    /// Simulate deleting the subtree rooted at `id`. Returns the affected
    /// nodes so `restore` can undo exactly this discard.
    fn discard(&mut self, id: NodeId, depth: usize) -> Vec<(NodeId, usize)> {
        let mut marked = Vec::new();
        let candidate = self.candidate;
        candidate.walk_from(id, None, depth, &mut |node, _, node_depth| {
            if self.excluded[node] {
                return false;
            }
            self.excluded[node] = true;
            self.live_levels[node_depth - 1] -= 1;
            self.live -= 1;
            marked.push((node, node_depth));
            true
        });
        marked
    }

    fn restore(&mut self, marked: Vec<(NodeId, usize)>) {
        for (node, depth) in marked {
            self.excluded[node] = false;
            self.live_levels[depth - 1] += 1;
            self.live += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{ProcessRecord, Report};
    use crate::tree::MAIN_PROCESS;

    fn build_tree(uuid: &str, mut processes: Vec<ProcessRecord>) -> ProcessTree {
        processes[0].process_type = MAIN_PROCESS.to_string();
        ProcessTree::build(&Report::test(uuid, processes, vec![])).unwrap()
    }

    fn survivor_oids(tree: &ProcessTree, survivors: &[NodeId]) -> Vec<String> {
        survivors
            .iter()
            .map(|&id| tree.node(id).record.oid.clone())
            .collect()
    }

    #[test]
    fn equal_shapes_survive_untouched() {
        let profile = build_tree(
            "p",
            vec![
                ProcessRecord::test("r", 100, 0, "root.exe", 10),
                ProcessRecord::test("a", 200, 100, "a.exe", 20),
            ],
        );
        let candidate = build_tree(
            "c",
            vec![
                ProcessRecord::test("r", 100, 0, "root.exe", 10),
                ProcessRecord::test("a", 200, 100, "a.exe", 20),
            ],
        );
        let survivors = find_embedding(&profile, &candidate).unwrap();
        assert_eq!(survivor_oids(&candidate, &survivors), vec!["r", "a"]);
    }

    #[test]
    fn surplus_branch_is_discarded() {
        // profile levels [1, 2]; candidate levels [1, 3]
        let profile = build_tree(
            "p",
            vec![
                ProcessRecord::test("r", 100, 0, "root.exe", 10),
                ProcessRecord::test("b", 200, 100, "b.exe", 30),
                ProcessRecord::test("c", 300, 100, "c.exe", 20),
            ],
        );
        let candidate = build_tree(
            "c",
            vec![
                ProcessRecord::test("r", 100, 0, "root.exe", 10),
                ProcessRecord::test("b", 200, 100, "b.exe", 30),
                ProcessRecord::test("c", 300, 100, "c.exe", 20),
                ProcessRecord::test("d", 400, 100, "d.exe", 40),
            ],
        );
        let survivors = find_embedding(&profile, &candidate).unwrap();
        // d (created last, visited first) is the first surplus subtree tried
        assert_eq!(survivor_oids(&candidate, &survivors), vec!["r", "b", "c"]);
    }

    #[test]
    fn discards_remove_whole_subtrees_only() {
        // profile: chain of 2, levels [1, 1]
        // candidate: root -> {x -> y, b}, levels [1, 2, 1]; the only way down
        // to [1, 1] is dropping the whole x subtree, leaving root -> b
        let profile = build_tree(
            "p",
            vec![
                ProcessRecord::test("r", 100, 0, "root.exe", 10),
                ProcessRecord::test("a", 200, 100, "a.exe", 20),
            ],
        );
        let candidate = build_tree(
            "c",
            vec![
                ProcessRecord::test("r", 100, 0, "root.exe", 10),
                ProcessRecord::test("x", 200, 100, "x.exe", 40),
                ProcessRecord::test("y", 300, 200, "y.exe", 50),
                ProcessRecord::test("b", 400, 100, "b.exe", 20),
            ],
        );
        let survivors = find_embedding(&profile, &candidate).unwrap();
        assert_eq!(survivor_oids(&candidate, &survivors), vec!["r", "b"]);
    }

    #[test]
    fn infeasible_shapes_return_none() {
        // profile is a 3-chain, candidate a flat star: the star can never
        // reach depth 3
        let profile = build_tree(
            "p",
            vec![
                ProcessRecord::test("r", 100, 0, "root.exe", 10),
                ProcessRecord::test("a", 200, 100, "a.exe", 20),
                ProcessRecord::test("b", 300, 200, "b.exe", 30),
            ],
        );
        let candidate = build_tree(
            "c",
            vec![
                ProcessRecord::test("r", 100, 0, "root.exe", 10),
                ProcessRecord::test("a", 200, 100, "a.exe", 20),
                ProcessRecord::test("b", 300, 100, "b.exe", 30),
                ProcessRecord::test("c", 400, 100, "c.exe", 40),
            ],
        );
        assert!(find_embedding(&profile, &candidate).is_none());
    }

    #[test]
    fn search_leaves_no_state_behind() {
        let profile = build_tree(
            "p",
            vec![
                ProcessRecord::test("r", 100, 0, "root.exe", 10),
                ProcessRecord::test("a", 200, 100, "a.exe", 20),
            ],
        );
        let candidate = build_tree(
            "c",
            vec![
                ProcessRecord::test("r", 100, 0, "root.exe", 10),
                ProcessRecord::test("x", 200, 100, "x.exe", 40),
                ProcessRecord::test("y", 300, 200, "y.exe", 50),
                ProcessRecord::test("b", 400, 100, "b.exe", 20),
            ],
        );
        let levels_before = candidate.levels().to_vec();
        let flat_before = candidate.flatten();

        find_embedding(&profile, &candidate);
        find_embedding(&profile, &candidate);

        assert_eq!(candidate.levels(), &levels_before[..]);
        assert_eq!(candidate.flatten(), flat_before);
    }
}
