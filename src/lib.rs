//! Process-tree similarity engine for sandboxed malware runs.
//!
//! Loads persisted sandbox reports (one JSON document per analyzed sample),
//! builds a process tree per run with MITRE ATT&CK techniques attached to
//! the nodes, and scores trees against each other to cluster a corpus into
//! malware families.

pub mod app;
pub mod compare;
pub mod config;
pub mod corpus;
pub mod logger;
mod prelude;
pub mod report;
pub mod tree;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
