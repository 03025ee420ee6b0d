//! Cluster classification service.
//!
//! Wraps the chat client with the prompt for log-cluster diagnosis. When no
//! provider is configured the service degrades to a keyword heuristic so the
//! enrichment pipeline still produces alerts in offline/demo setups (the
//! `_llm_metadata.success` flag records the difference).

use serde::Serialize;
use std::time::Instant;

use super::client::LlmClient;
use super::models::{ClusterClassification, EnrichedClassification, LlmCallMetadata, LLMError};
use crate::config::LlmConfig;
use crate::models::OsKind;

const SYSTEM_PROMPT: &str = r#"You are a senior site reliability engineer triaging clustered log events from a heterogeneous IT estate (Linux/macOS/Windows hosts, network devices, synthetic probes).

You receive one semantic log cluster: its representative (medoid) template, nearby templates, and up to 30 evidence log lines.

Respond with a single JSON object, nothing else:
{
  "failure_type": short snake_case category (e.g. "auth_failure", "disk_failure", "memory_pressure", "network_link", "dns_failure", "service_crash", "timeout", "unknown"),
  "confidence": number between 0 and 1,
  "recommendation": one concrete remediation step an operator can execute,
  "summary": one sentence describing what is happening
}

Rules:
- Base the classification on the evidence, not on speculation.
- Prefer "unknown" with low confidence over inventing a failure mode.
- Keep the summary free of raw timestamps, IPs and ids."#;

#[derive(Debug, Clone, Serialize)]
pub struct NeighborForLlm {
    pub id: String,
    pub document: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvidenceForLlm {
    pub id: String,
    pub templated: String,
    pub raw: String,
}

#[derive(Serialize)]
struct ClassifyContext<'a> {
    os: &'a str,
    cluster_id: &'a str,
    medoid: &'a str,
    neighbors: &'a [NeighborForLlm],
    evidence: &'a [EvidenceForLlm],
}

pub struct LlmService {
    client: LlmClient,
    config: LlmConfig,
}

impl LlmService {
    pub fn new(config: LlmConfig) -> Self {
        Self { client: LlmClient::new(), config }
    }

    pub fn is_available(&self) -> bool {
        self.config.enabled && !self.config.api_key.is_empty()
    }

    /// Classify one cluster from its medoid, neighbor templates and evidence
    /// logs.
    pub async fn classify_cluster(
        &self,
        os: OsKind,
        cluster_id: &str,
        medoid: &str,
        neighbors: &[NeighborForLlm],
        evidence: &[EvidenceForLlm],
    ) -> Result<EnrichedClassification, LLMError> {
        let started = Instant::now();

        if !self.is_available() {
            let classification = classify_heuristic(medoid, evidence);
            return Ok(EnrichedClassification {
                classification,
                metadata: LlmCallMetadata {
                    tokens: 0,
                    latency_ms: started.elapsed().as_millis() as i64,
                    success: false,
                },
            });
        }

        let context = ClassifyContext {
            os: os.as_str(),
            cluster_id,
            medoid,
            neighbors,
            evidence,
        };
        let user_prompt = serde_json::to_string_pretty(&context)?;

        let (content, input_tokens, output_tokens) = self
            .client
            .chat_completion(&self.config, SYSTEM_PROMPT, &user_prompt)
            .await?;

        let classification: ClusterClassification =
            serde_json::from_str(&content).map_err(|e| {
                LLMError::ParseError(format!(
                    "Failed to parse LLM response: {}. Content: {}",
                    e, content
                ))
            })?;

        Ok(EnrichedClassification {
            classification,
            metadata: LlmCallMetadata {
                tokens: input_tokens + output_tokens,
                latency_ms: started.elapsed().as_millis() as i64,
                success: true,
            },
        })
    }
}

/// Keyword fallback used when no LLM provider is configured.
fn classify_heuristic(medoid: &str, evidence: &[EvidenceForLlm]) -> ClusterClassification {
    let mut corpus = medoid.to_lowercase();
    for entry in evidence.iter().take(5) {
        corpus.push(' ');
        corpus.push_str(&entry.templated.to_lowercase());
    }

    let failure_type = if corpus.contains("authentication") || corpus.contains("login fail") {
        "auth_failure"
    } else if corpus.contains("i/o error") || corpus.contains("disk") || corpus.contains("smart") {
        "disk_failure"
    } else if corpus.contains("out of memory") || corpus.contains("oom") {
        "memory_pressure"
    } else if corpus.contains("link down") || corpus.contains("interface down") {
        "network_link"
    } else if corpus.contains("servfail") || corpus.contains("dns") {
        "dns_failure"
    } else if corpus.contains("timeout") || corpus.contains("timed out") {
        "timeout"
    } else if corpus.contains("segfault") || corpus.contains("core dump") || corpus.contains("crash")
    {
        "service_crash"
    } else {
        "unknown"
    };

    ClusterClassification {
        failure_type: failure_type.to_string(),
        confidence: Some(if failure_type == "unknown" { 0.1 } else { 0.3 }),
        recommendation: None,
        summary: Some(medoid.chars().take(180).collect()),
        extra: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evidence(templated: &str) -> EvidenceForLlm {
        EvidenceForLlm { id: "1-0".into(), templated: templated.into(), raw: templated.into() }
    }

    #[tokio::test]
    async fn unconfigured_service_falls_back_to_heuristic() {
        let service = LlmService::new(LlmConfig::default());
        let result = service
            .classify_cluster(
                OsKind::Linux,
                "cluster_abc",
                "sshd: authentication failure for user root",
                &[],
                &[evidence("sshd: authentication failure for user root")],
            )
            .await
            .unwrap();
        assert!(!result.metadata.success);
        assert_eq!(result.classification.failure_type, "auth_failure");
    }

    #[test]
    fn heuristic_maps_known_symptoms() {
        let cases = [
            ("kernel: i/o error on device sda", "disk_failure"),
            ("kernel: nic eth0 link down", "network_link"),
            ("named: query SERVFAIL for example.com", "dns_failure"),
            ("app: request timed out after 30s", "timeout"),
            ("something entirely novel", "unknown"),
        ];
        for (medoid, expected) in cases {
            let classification = classify_heuristic(medoid, &[]);
            assert_eq!(classification.failure_type, expected, "medoid: {}", medoid);
        }
    }

    #[test]
    fn heuristic_unknown_has_low_confidence() {
        let classification = classify_heuristic("opaque line", &[]);
        assert!(classification.confidence.unwrap() < 0.2);
    }
}
