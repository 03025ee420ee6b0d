//! LLM-backed cluster classification.

pub mod client;
pub mod models;
pub mod service;

pub use client::LlmClient;
pub use models::{ClusterClassification, EnrichedClassification, LlmCallMetadata, LLMError};
pub use service::LlmService;
