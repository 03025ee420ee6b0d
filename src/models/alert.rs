//! Alert data model
//!
//! Alerts are published by the cluster enricher to the `alerts` stream and
//! mirrored into an `alert:<id>` hash. The shape is schema-light by necessity:
//! the LLM result varies, so it rides along as an open JSON map.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Alert as returned by the list endpoint: stream entry merged with its hash,
/// hash fields winning.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AlertListItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub os: String,
    #[serde(default)]
    pub issue_key: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub solution: String,
    /// Raw LLM classification output.
    #[schema(value_type = Object)]
    pub result: serde_json::Value,
    pub persisted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_id: Option<String>,
    #[serde(default)]
    pub env_ids: Vec<String>,
    /// Evidence logs backing the classification.
    #[schema(value_type = Vec<Object>)]
    #[serde(default)]
    pub logs: Vec<serde_json::Value>,
    #[serde(default)]
    pub cluster_id: String,
}

/// Alert feedback verdicts. The two Redis sets backing them are mutually
/// exclusive per alert id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    Correct,
    Incorrect,
}

impl FeedbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Correct => "correct",
            Self::Incorrect => "incorrect",
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AlertOpResponse {
    pub status: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feedback_kind_deserializes_lowercase() {
        let kind: FeedbackKind = serde_json::from_str("\"correct\"").unwrap();
        assert_eq!(kind, FeedbackKind::Correct);
        let kind: FeedbackKind = serde_json::from_str("\"incorrect\"").unwrap();
        assert_eq!(kind, FeedbackKind::Incorrect);
        assert!(serde_json::from_str::<FeedbackKind>("\"maybe\"").is_err());
    }
}
