//! LLM Data Models
//!
//! The classification shape is deliberately open: providers vary in what they
//! return, so unknown fields ride along in `extra` and reach the alert
//! consumer untouched.

use serde::{Deserialize, Serialize};

/// Structured classification of a log cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterClassification {
    #[serde(default = "default_failure_type")]
    pub failure_type: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_failure_type() -> String {
    "unknown".to_string()
}

/// Call accounting attached to every classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LlmCallMetadata {
    pub tokens: i64,
    pub latency_ms: i64,
    pub success: bool,
}

#[derive(Debug, Clone)]
pub struct EnrichedClassification {
    pub classification: ClusterClassification,
    pub metadata: LlmCallMetadata,
}

impl EnrichedClassification {
    /// Alert `result` field: the classification with `_llm_metadata` folded in.
    pub fn to_result_json(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(&self.classification)
            .unwrap_or_else(|_| serde_json::json!({}));
        if let Some(map) = value.as_object_mut() {
            map.insert(
                "_llm_metadata".to_string(),
                serde_json::json!({
                    "tokens": self.metadata.tokens,
                    "latency_ms": self.metadata.latency_ms,
                    "success": self.metadata.success,
                }),
            );
        }
        value
    }
}

/// LLM service errors
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("LLM API error: {0}")]
    ApiError(String),

    #[error("LLM response parsing error: {0}")]
    ParseError(String),

    #[error("LLM timeout after {0}s")]
    Timeout(u64),

    #[error("LLM rate limited, retry after {0}s")]
    RateLimited(u64),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("LLM service disabled")]
    Disabled,
}

impl LLMError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::RateLimited(_) | Self::ApiError(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_tolerates_partial_llm_output() {
        let parsed: ClusterClassification =
            serde_json::from_str(r#"{"confidence": 0.9, "novel_field": "x"}"#).unwrap();
        assert_eq!(parsed.failure_type, "unknown");
        assert_eq!(parsed.confidence, Some(0.9));
        assert_eq!(parsed.extra.get("novel_field").and_then(|v| v.as_str()), Some("x"));
    }

    #[test]
    fn result_json_embeds_llm_metadata() {
        let enriched = EnrichedClassification {
            classification: ClusterClassification {
                failure_type: "disk_failure".into(),
                confidence: Some(0.8),
                recommendation: Some("replace disk".into()),
                summary: None,
                extra: Default::default(),
            },
            metadata: LlmCallMetadata { tokens: 321, latency_ms: 1500, success: true },
        };
        let value = enriched.to_result_json();
        assert_eq!(value["failure_type"], "disk_failure");
        assert_eq!(value["_llm_metadata"]["tokens"], 321);
        assert_eq!(value["_llm_metadata"]["success"], true);
    }
}
