//! Corpus loading and the clustering driver built on the tree comparator.
//!
//! Corpus scans are O(n²) and deliberately single-threaded: the corpora are
//! small (hundreds to low thousands of runs) and deterministic output
//! matters more than throughput, so entries are processed in stable
//! UUID order.

use std::fs;
use std::path::{Path, PathBuf};

use console::style;
use itertools::Itertools;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::compare::{image_name, tree_score};
use crate::prelude::*;
use crate::report::{self, ModelError, Report};
use crate::tree::ProcessTree;

pub const DEFAULT_THRESHOLD: f64 = 0.7;

pub struct CorpusEntry {
    /// File stem, accepted as an id alias next to the run UUID.
    pub stem: String,
    pub report: Report,
    pub tree: ProcessTree,
}

pub struct Corpus {
    entries: Vec<CorpusEntry>,
}

/// A profile and the corpus entries it matched at or above the threshold.
pub struct TreeGroup<'c> {
    pub profile: &'c CorpusEntry,
    /// Sorted by score descending.
    pub matches: Vec<(&'c CorpusEntry, f64)>,
}

impl TreeGroup<'_> {
    /// Profile plus matches; what coverage is measured in.
    pub fn size(&self) -> usize {
        1 + self.matches.len()
    }
}

fn load_entry(path: &Path) -> Result<CorpusEntry, ModelError> {
    let report = report::load_report(path)?;
    let tree = ProcessTree::build(&report)?;
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(CorpusEntry { stem, report, tree })
}

impl Corpus {
    /// Load every `*.json` report under `dir`. Records that cannot be read
    /// or have no root process are skipped with a warning, never aborting
    /// the scan; trees smaller than `min_nodes` are filtered out.
    pub fn load(dir: &Path, min_nodes: usize) -> Result<Self> {
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)
            .with_context(|| format!("Failed to read corpus directory {}", dir.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut entries = Vec::with_capacity(paths.len());
        for path in &paths {
            match load_entry(path) {
                Ok(entry) => {
                    if entry.tree.size() >= min_nodes {
                        entries.push(entry);
                    } else {
                        debug!(
                            "ignoring {}: only {} nodes (min {})",
                            path.display(),
                            entry.tree.size(),
                            min_nodes
                        );
                    }
                }
                Err(err) => warn!("cannot load process tree model at {}: {err}", path.display()),
            }
        }

        // stable scan order: greedy clustering depends on iteration order,
        // so pin it to the run UUID
        entries.sort_by(|a, b| a.report.uuid.cmp(&b.report.uuid));
        info!("considering {} tasks", entries.len());
        Ok(Corpus { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn find(&self, id: &str) -> Result<usize, ModelError> {
        self.entries
            .iter()
            .position(|entry| entry.report.uuid == id || entry.stem == id)
            .ok_or_else(|| ModelError::NotFound(id.to_string()))
    }
}

/// Score one profile against every other live entry; candidates at or above
/// the threshold join the group. With `consume`, matched candidates are
/// marked so they can neither re-seed nor re-match later groups.
fn match_against_corpus<'c>(
    profile_idx: usize,
    entries: &'c [CorpusEntry],
    consumed: &mut [bool],
    threshold: f64,
    consume: bool,
) -> TreeGroup<'c> {
    let profile = &entries[profile_idx];
    let mut matches = Vec::new();

    for (idx, entry) in entries.iter().enumerate() {
        if idx == profile_idx || consumed[idx] {
            continue;
        }
        if entry.report.uuid == profile.report.uuid {
            continue;
        }
        let score = tree_score(&profile.tree, &entry.tree);
        if score >= threshold {
            matches.push((entry, score));
            if consume {
                consumed[idx] = true;
            }
        }
    }

    matches.sort_by(|a, b| b.1.total_cmp(&a.1));
    TreeGroup { profile, matches }
}

/// Greedy whole-corpus clustering: every still-live entry seeds a group in
/// stable order; seeds with no matches stay live as later candidates.
fn cluster_groups(corpus: &Corpus, threshold: f64) -> Vec<TreeGroup<'_>> {
    let mut consumed = vec![false; corpus.len()];
    let mut groups = Vec::new();

    for idx in 0..corpus.len() {
        if consumed[idx] {
            continue;
        }
        let group = match_against_corpus(idx, &corpus.entries, &mut consumed, threshold, true);
        if group.matches.is_empty() {
            continue;
        }
        consumed[idx] = true;
        groups.push(group);
    }

    groups.sort_by(|a, b| b.matches.len().cmp(&a.matches.len()));
    groups
}

fn print_group(group: &TreeGroup, corpus_size: usize) {
    let profile = &group.profile.report;
    info!("");
    info!(
        "[*] coverage: {:.2}%, md5: {}, uuid: {}, profile: {}",
        group.size() as f64 * 100.0 / corpus_size as f64,
        profile.md5,
        profile.uuid,
        profile.name
    );
    for (entry, score) in &group.matches {
        info!(
            "P: {:.2}, md5: {}, uuid: {}, name: {}",
            score, entry.report.md5, entry.report.uuid, entry.report.name
        );
    }
}

#[derive(Tabled)]
struct GroupRow {
    #[tabled(rename = "Profile")]
    profile: String,
    #[tabled(rename = "UUID")]
    uuid: String,
    #[tabled(rename = "Matches")]
    matches: usize,
    #[tabled(rename = "Coverage")]
    coverage: String,
}

/// Cluster the whole corpus and report the groups ranked by size.
pub fn cluster(corpus: &Corpus, threshold: f64) -> Result<()> {
    if corpus.is_empty() {
        bail!("the corpus is empty, nothing to cluster");
    }
    let corpus_size = corpus.len();
    let groups = cluster_groups(corpus, threshold);

    for group in &groups {
        print_group(group, corpus_size);
    }

    let rows: Vec<GroupRow> = groups
        .iter()
        .map(|group| GroupRow {
            profile: group.profile.report.name.clone(),
            uuid: group.profile.report.uuid.clone(),
            matches: group.matches.len(),
            coverage: format!(
                "{:.2}%",
                group.size() as f64 * 100.0 / corpus_size as f64
            ),
        })
        .collect();
    if !rows.is_empty() {
        let table = Table::new(rows).with(Style::sharp()).to_string();
        info!("\n{table}");
    }

    let total_coverage: f64 = groups
        .iter()
        .map(|group| group.size() as f64 / corpus_size as f64)
        .sum();
    info!(
        "[*] total effective profile: {}/{}, total coverage: {:.2}%",
        groups.len(),
        corpus_size,
        total_coverage * 100.0
    );
    Ok(())
}

/// Report how much of the corpus a single profile covers, without consuming
/// anything.
pub fn evaluate(corpus: &Corpus, profile_id: &str, threshold: f64) -> Result<()> {
    let profile_idx = corpus.find(profile_id)?;
    let mut consumed = vec![false; corpus.len()];
    let group = match_against_corpus(profile_idx, &corpus.entries, &mut consumed, threshold, false);
    print_group(&group, corpus.len());
    Ok(())
}

/// Score exactly two identified runs against each other.
pub fn compare_two(corpus: &Corpus, profile_id: &str, candidate_id: &str) -> Result<f64> {
    let profile = &corpus.entries[corpus.find(profile_id)?];
    let candidate = &corpus.entries[corpus.find(candidate_id)?];
    let score = tree_score(&profile.tree, &candidate.tree);

    info!(
        "[*] md5: {}, uuid: {}, profile: {}",
        profile.report.md5, profile.report.uuid, profile.report.name
    );
    info!(
        "P: {:.2}, md5: {}, uuid: {}, name: {}",
        score, candidate.report.md5, candidate.report.uuid, candidate.report.name
    );
    Ok(score)
}

/// Pretty-print one run's process tree with techniques and event counters.
pub fn show(corpus: &Corpus, id: &str) -> Result<()> {
    let entry = &corpus.entries[corpus.find(id)?];
    let report = &entry.report;
    info!(
        "[*] md5: {}, uuid: {}, name: {}",
        report.md5, report.uuid, report.name
    );

    entry.tree.walk(&mut |id, _, depth| {
        let node = entry.tree.node(id);
        let record = &node.record;
        let techniques = node.techniques.iter().join(", ");
        info!(
            "{}{} (pid {}) [{}] reg: {}, files: {}, mod: {}, net: {}",
            "  ".repeat(depth - 1),
            style(image_name(&record.image)).bold(),
            record.pid,
            techniques,
            record.registry_events,
            record.file_events,
            record.module_events,
            record.network_events
        );
        true
    });

    if !report.threats.is_empty() {
        info!("threats: {}", report.threats.len());
    }
    if !report.connections.is_empty() {
        info!("network connections: {}", report.connections.len());
    }
    Ok(())
}
