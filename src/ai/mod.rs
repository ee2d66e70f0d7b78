//! Language-model collaborator.
//!
//! Steps talk to models only through [`LanguageModel`], so tests and offline
//! runs can swap in a deterministic implementation.

pub mod http;
pub mod offline;

use async_trait::async_trait;
use serde::Serialize;

use crate::engine::usage::UsageRecord;
use crate::errors::AiError;

pub use http::HttpLanguageModel;
pub use offline::OfflineModel;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    /// Optional assistant prefill that the model continues from.
    pub assistant: Option<String>,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            assistant: None,
        }
    }

    pub fn with_prefill(mut self, assistant: impl Into<String>) -> Self {
        self.assistant = Some(assistant.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: Prompt,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct Generated {
    pub text: String,
    pub usage: UsageRecord,
}

#[derive(Debug, Clone)]
pub struct StructuredGenerated {
    pub value: serde_json::Value,
    pub usage: UsageRecord,
}

/// JSON schema the structured model must conform to.
#[derive(Debug, Clone)]
pub struct OutputSchema {
    pub name: &'static str,
    pub schema: serde_json::Value,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Free-text generation.
    async fn generate(&self, request: &GenerateRequest) -> Result<Generated, AiError>;

    /// Generation constrained to `schema`; the returned value is parsed JSON.
    async fn generate_structured(
        &self,
        request: &GenerateRequest,
        schema: &OutputSchema,
    ) -> Result<StructuredGenerated, AiError>;
}
