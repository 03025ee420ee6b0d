//! Log pipeline data model
//!
//! Everything that flows between the ingest stream, the aggregator and the
//! enricher: routed OS kinds, parsed/templated lines and cluster candidates.

use serde::{Deserialize, Serialize};

/// Operating-system (or device-class) bucket a log line is routed into.
/// Every vector-store collection and counter is scoped by this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsKind {
    Linux,
    Macos,
    Windows,
    Network,
    Unknown,
}

impl OsKind {
    pub const ALL: [OsKind; 5] =
        [OsKind::Linux, OsKind::Macos, OsKind::Windows, OsKind::Network, OsKind::Unknown];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Macos => "macos",
            Self::Windows => "windows",
            Self::Network => "network",
            Self::Unknown => "unknown",
        }
    }

    /// Normalize loose OS spellings ("mac", "osx", "win") into the canonical
    /// collection suffix.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "linux" => Self::Linux,
            "mac" | "macos" | "osx" => Self::Macos,
            "windows" | "win" => Self::Windows,
            "network" => Self::Network,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for OsKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured view of a raw log line after parsing/normalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedLog {
    pub component: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_id: Option<String>,
}

/// One log sample carried inside a cluster candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleLog {
    pub raw: String,
    pub templated: String,
    pub os: String,
    #[serde(default)]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_id: Option<String>,
}

/// Signal that a cluster has accumulated enough exemplars for LLM
/// classification. Stream field values are strings; the list fields travel
/// as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterCandidate {
    pub os: String,
    pub cluster_id: String,
    #[serde(default)]
    pub env_ids: Vec<String>,
    #[serde(default)]
    pub sample_logs: Vec<SampleLog>,
}

/// Log entry retained inside an in-memory issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueLogEntry {
    pub raw: String,
    pub templated: String,
    pub parsed: ParsedLog,
    pub ts: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_kind_parse_aliases() {
        assert_eq!(OsKind::parse("osx"), OsKind::Macos);
        assert_eq!(OsKind::parse("Mac"), OsKind::Macos);
        assert_eq!(OsKind::parse("win"), OsKind::Windows);
        assert_eq!(OsKind::parse("LINUX"), OsKind::Linux);
        assert_eq!(OsKind::parse("solaris"), OsKind::Unknown);
    }

    #[test]
    fn cluster_candidate_roundtrips_env_ids() {
        let candidate = ClusterCandidate {
            os: "linux".into(),
            cluster_id: "cluster_abc123def456".into(),
            env_ids: vec!["env-001".into()],
            sample_logs: vec![],
        };
        let json = serde_json::to_string(&candidate).unwrap();
        let back: ClusterCandidate = serde_json::from_str(&json).unwrap();
        assert_eq!(back.env_ids, vec!["env-001".to_string()]);
    }
}
