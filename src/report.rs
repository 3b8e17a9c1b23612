//! Serde model of the persisted sandbox report.
//!
//! One JSON document per analyzed sample, produced by the external crawler.
//! The field names are the crawler's wire contract and must not change; the
//! irregular casing (`UUID`, `OID`, `EventsCounters_Network`, ...) is
//! reproduced with explicit renames.

use std::path::{Path, PathBuf};
use std::{fs, io};

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    /// The record has no "Main process" entry and cannot be turned into a
    /// tree. Skipped with a warning during a corpus scan, fatal for an
    /// explicit single load.
    #[error("corrupted data: no \"Main process\" in record {uuid}")]
    CorruptedData { uuid: String },

    /// The referenced profile id matches nothing in the loaded corpus.
    #[error("no record matching {0:?} in the corpus")]
    NotFound(String),

    /// The report file could not be read or parsed. Never retried.
    #[error("cannot read report at {path}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// One process captured during the sandboxed execution.
///
/// The event counters and behavior flags are carried for display only; the
/// comparison engine never consults them.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ProcessRecord {
    #[serde(rename = "OID")]
    pub oid: String,
    /// Not globally unique: PIDs may repeat across sibling subtrees or runs.
    #[serde(rename = "ProcessID")]
    pub pid: i64,
    #[serde(rename = "ParentPID")]
    pub parent_pid: i64,
    #[serde(rename = "CommandLine")]
    pub command_line: String,
    #[serde(rename = "Image")]
    pub image: String,
    /// Classification label; `"Main process"` marks the tree root.
    #[serde(rename = "ProcessType")]
    pub process_type: String,
    #[serde(rename = "CreationTimestamp")]
    pub created: i64,
    #[serde(rename = "Registry")]
    pub registry_events: i64,
    #[serde(rename = "Files")]
    pub file_events: i64,
    #[serde(rename = "Modules")]
    pub module_events: i64,
    #[serde(rename = "DroppedFiles")]
    pub dropped_files: i64,
    #[serde(rename = "DebugStrings")]
    pub debug_strings: i64,
    #[serde(rename = "EventsCounters_Network")]
    pub network_events: i64,
    #[serde(rename = "Scores_Network")]
    pub network: bool,
    #[serde(rename = "Autostart")]
    pub autostart: bool,
    #[serde(rename = "LowAccess")]
    pub low_access: bool,
    #[serde(rename = "FileType")]
    pub file_type: String,
}

/// A threat observation attributing MITRE ATT&CK techniques to one process.
/// Several incidents may reference the same process OID.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Incident {
    #[serde(rename = "ProcessOID")]
    pub process_oid: String,
    #[serde(rename = "ThreatLevel")]
    pub threat_level: i64,
    #[serde(rename = "MitreAttacks", deserialize_with = "null_as_empty")]
    pub techniques: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Connection {
    #[serde(rename = "ProcessOID")]
    pub process_oid: String,
    #[serde(rename = "ProcessName")]
    pub process_name: String,
    #[serde(rename = "Domain")]
    pub domain: String,
    #[serde(rename = "IP")]
    pub ip: String,
    #[serde(rename = "Port")]
    pub port: i64,
    #[serde(rename = "Prot")]
    pub protocol: String,
    #[serde(rename = "Send")]
    pub sent: i64,
    #[serde(rename = "Recv")]
    pub received: i64,
    #[serde(rename = "Type")]
    pub kind: i64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DnsQuery {
    #[serde(rename = "Domain")]
    pub domain: String,
    #[serde(rename = "Ips", deserialize_with = "null_as_empty")]
    pub ips: Vec<String>,
    #[serde(rename = "Status")]
    pub status: i64,
    #[serde(rename = "Type")]
    pub kind: i64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpRequest {
    #[serde(rename = "ProcessOID")]
    pub process_oid: String,
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "Method")]
    pub method: String,
    #[serde(rename = "Type")]
    pub kind: i64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Threat {
    #[serde(rename = "ProcessOID")]
    pub process_oid: String,
    #[serde(rename = "ProcessName")]
    pub process_name: String,
    #[serde(rename = "Priority")]
    pub priority: i64,
}

/// A full sandbox report: one analyzed sample.
///
/// Only `processes` and `incidents` feed the similarity engine; the network
/// and threat arrays are parsed for contract completeness and surfaced by
/// `treesim show` only.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Report {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Md5")]
    pub md5: String,
    #[serde(rename = "UUID")]
    pub uuid: String,
    #[serde(rename = "Processes", deserialize_with = "null_as_empty")]
    pub processes: Vec<ProcessRecord>,
    #[serde(rename = "Incidents", deserialize_with = "null_as_empty")]
    pub incidents: Vec<Incident>,
    #[serde(rename = "Ips", deserialize_with = "null_as_empty")]
    pub connections: Vec<Connection>,
    #[serde(rename = "Domain", deserialize_with = "null_as_empty")]
    pub dns_queries: Vec<DnsQuery>,
    #[serde(rename = "HttpRequests", deserialize_with = "null_as_empty")]
    pub http_requests: Vec<HttpRequest>,
    #[serde(rename = "Threats", deserialize_with = "null_as_empty")]
    pub threats: Vec<Threat>,
}

/// The crawler serializes nil slices as `null`; treat them as empty.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

pub fn load_report(path: &Path) -> Result<Report, ModelError> {
    let bytes = fs::read(path).map_err(|e: io::Error| ModelError::Unreadable {
        path: path.to_path_buf(),
        source: e.into(),
    })?;
    let report = serde_json::from_slice(&bytes).map_err(|e| ModelError::Unreadable {
        path: path.to_path_buf(),
        source: e.into(),
    })?;
    Ok(report)
}

#[cfg(test)]
impl ProcessRecord {
    /// Minimal record for building test trees
    pub(crate) fn test(oid: &str, pid: i64, parent_pid: i64, image: &str, created: i64) -> Self {
        Self {
            oid: oid.to_string(),
            pid,
            parent_pid,
            image: image.to_string(),
            created,
            ..Default::default()
        }
    }
}

#[cfg(test)]
impl Incident {
    pub(crate) fn test(process_oid: &str, techniques: &[&str]) -> Self {
        Self {
            process_oid: process_oid.to_string(),
            threat_level: 2,
            techniques: techniques.iter().map(|t| t.to_string()).collect(),
        }
    }
}

#[cfg(test)]
impl Report {
    pub(crate) fn test(uuid: &str, processes: Vec<ProcessRecord>, incidents: Vec<Incident>) -> Self {
        Self {
            name: format!("{uuid}.bin"),
            md5: format!("md5-{uuid}"),
            uuid: uuid.to_string(),
            processes,
            incidents,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_crawler_wire_format() {
        let raw = r#"{
            "Name": "invoice.exe",
            "Md5": "9e107d9d372bb6826bd81d3542a419d6",
            "UUID": "0f7a1c2e-aaaa-bbbb-cccc-000000000001",
            "Processes": [{
                "OID": "oid-1",
                "ProcessID": 4242,
                "ParentPID": 0,
                "CommandLine": "invoice.exe /s",
                "Image": "C:\\Users\\admin\\invoice.exe",
                "ProcessType": "Main process",
                "CreationTimestamp": 1500000000000,
                "Registry": 12,
                "Files": 3,
                "Modules": 40,
                "EventsCounters_Network": 2,
                "Scores_Network": true,
                "FileType": "executable"
            }],
            "Incidents": [{
                "ProcessOID": "oid-1",
                "ThreatLevel": 2,
                "MitreAttacks": ["T1059", "T1547.001"]
            }],
            "Ips": null,
            "Domain": null,
            "HttpRequests": null,
            "Threats": null
        }"#;

        let report: Report = serde_json::from_str(raw).unwrap();
        assert_eq!(report.uuid, "0f7a1c2e-aaaa-bbbb-cccc-000000000001");
        assert_eq!(report.processes.len(), 1);
        let proc = &report.processes[0];
        assert_eq!(proc.pid, 4242);
        assert_eq!(proc.process_type, "Main process");
        assert_eq!(proc.network_events, 2);
        assert!(proc.network);
        assert_eq!(report.incidents[0].techniques, vec!["T1059", "T1547.001"]);
        assert!(report.connections.is_empty());
        assert!(report.threats.is_empty());
    }

    #[test]
    fn null_technique_list_is_empty() {
        let raw = r#"{"ProcessOID": "oid-9", "ThreatLevel": 1, "MitreAttacks": null}"#;
        let incident: Incident = serde_json::from_str(raw).unwrap();
        assert!(incident.techniques.is_empty());
    }

    #[test]
    fn unreadable_file_is_surfaced() {
        let err = load_report(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, ModelError::Unreadable { .. }));
    }
}
