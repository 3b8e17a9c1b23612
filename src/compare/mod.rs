//! Pairwise similarity between process trees.
//!
//! Node scores are asymmetric containment relative to the profile; tree
//! scores combine positional alignment (equal size) with an embedded-subtree
//! search (candidate larger than the profile).

use crate::prelude::*;
use crate::tree::{NodeId, ProcessNode, ProcessTree};

mod loose;

/// File-name component of an image path. Records come from Windows
/// sandboxes, so both separators appear in the wild.
pub(crate) fn image_name(path: &str) -> &str {
    path.rsplit(['\\', '/']).next().unwrap_or(path)
}

/// Similarity of a candidate node relative to a profile node, in [0, 1].
///
/// A profile node without recorded techniques falls back to
/// identity-by-binary-name: 1.0 iff the image file names match
/// case-insensitively. Otherwise the score is the fraction of the profile's
/// techniques the candidate also exhibits; a candidate with a superset still
/// scores 1.0 (containment, deliberately not Jaccard).
pub fn node_score(profile: &ProcessNode, candidate: &ProcessNode) -> f64 {
    if profile.techniques.is_empty() {
        let matches = image_name(&profile.record.image).to_lowercase()
            == image_name(&candidate.record.image).to_lowercase();
        return if matches { 1.0 } else { 0.0 };
    }

    let matched = candidate
        .techniques
        .iter()
        .filter(|technique| profile.techniques.contains(*technique))
        .count();
    matched as f64 / profile.techniques.len() as f64
}

/// Mean node score over two equal-length pre-order sequences, index i of the
/// profile against index i of the candidate.
fn positional_score(
    profile: &ProcessTree,
    candidate: &ProcessTree,
    profile_order: &[NodeId],
    candidate_order: &[NodeId],
) -> f64 {
    debug_assert_eq!(profile_order.len(), candidate_order.len());
    let total: f64 = profile_order
        .iter()
        .zip(candidate_order)
        .map(|(&p, &c)| node_score(profile.node(p), candidate.node(c)))
        .sum();
    total / profile_order.len() as f64
}

/// Similarity of a candidate tree relative to a profile tree, in [0, 1].
///
/// - profile larger than candidate: 0, the profile cannot embed in a
///   strictly smaller tree;
/// - equal sizes: positional comparison of the two pre-order flattenings.
///   Equal size is assumed to imply equal shape; equal-size trees of
///   different shape can be mis-scored. Known accuracy limitation, kept for
///   compatibility with existing corpora;
/// - candidate larger: search for an embedded occurrence of the profile's
///   shape. The first candidate subtree admitting a loose alignment is
///   accepted and scored; the walk does not continue looking for a
///   higher-scoring site, which bounds the cost on large trees.
pub fn tree_score(profile: &ProcessTree, candidate: &ProcessTree) -> f64 {
    let profile_nodes = profile.size();
    let candidate_nodes = candidate.size();

    if profile_nodes > candidate_nodes {
        return 0.0;
    }
    if profile_nodes == candidate_nodes {
        return positional_score(profile, candidate, &profile.flatten(), &candidate.flatten());
    }

    let profile_height = profile.height();
    let profile_order = profile.flatten();
    let mut score = None;

    candidate.walk(&mut |id, _, _| {
        if score.is_some() {
            return false;
        }
        // a subtree shorter or smaller than the profile cannot contain it,
        // and neither can anything below it
        if candidate.height_of(id) < profile_height || candidate.size_of(id) < profile_nodes {
            return false;
        }
        let potential = candidate.pruned_subtree(id, profile_height);
        if potential.size() < profile_nodes {
            return true;
        }
        if let Some(survivors) = loose::find_embedding(profile, &potential) {
            let node = candidate.node(id);
            debug!(
                "embedding site: pid {}, image {}",
                node.record.pid, node.record.image
            );
            score = Some(positional_score(
                profile,
                &potential,
                &profile_order,
                &survivors,
            ));
            return false;
        }
        true
    });

    score.unwrap_or(0.0)
}
