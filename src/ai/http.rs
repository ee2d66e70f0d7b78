//! HTTP providers: Anthropic Messages for text, OpenAI Chat Completions with
//! a `json_schema` response format for structured output.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{GenerateRequest, Generated, LanguageModel, OutputSchema, StructuredGenerated};
use crate::engine::usage::UsageRecord;
use crate::errors::AiError;

pub const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
pub const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct HttpLanguageModel {
    client: reqwest::Client,
    anthropic_url: String,
    anthropic_key: Option<String>,
    openai_url: String,
    openai_key: Option<String>,
}

impl HttpLanguageModel {
    pub fn new(
        anthropic_url: impl Into<String>,
        anthropic_key: Option<String>,
        openai_url: impl Into<String>,
        openai_key: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            anthropic_url: anthropic_url.into(),
            anthropic_key,
            openai_url: openai_url.into(),
            openai_key,
        })
    }

    async fn post(
        &self,
        provider: &'static str,
        builder: reqwest::RequestBuilder,
        body: &serde_json::Value,
    ) -> Result<String, AiError> {
        let response = builder.json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                AiError::Timeout { provider }
            } else {
                AiError::Transport {
                    provider,
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| AiError::Transport {
            provider,
            message: e.to_string(),
        })?;
        if !(200..300).contains(&status) {
            return Err(AiError::Http {
                provider,
                status,
                body: text,
            });
        }
        Ok(text)
    }
}

pub fn anthropic_body(request: &GenerateRequest) -> serde_json::Value {
    let mut messages = vec![json!({"role": "user", "content": request.prompt.user})];
    if let Some(prefill) = &request.prompt.assistant {
        messages.push(json!({"role": "assistant", "content": prefill}));
    }
    json!({
        "model": request.model,
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
        "system": request.prompt.system,
        "messages": messages,
    })
}

pub fn openai_body(request: &GenerateRequest, schema: &OutputSchema) -> serde_json::Value {
    let mut messages = vec![
        json!({"role": "system", "content": request.prompt.system}),
        json!({"role": "user", "content": request.prompt.user}),
    ];
    if let Some(prefill) = &request.prompt.assistant {
        messages.push(json!({"role": "assistant", "content": prefill}));
    }
    json!({
        "model": request.model,
        "temperature": request.temperature,
        "max_tokens": request.max_tokens,
        "messages": messages,
        "response_format": {
            "type": "json_schema",
            "json_schema": {
                "name": schema.name,
                "schema": schema.schema,
                "strict": true,
            }
        }
    })
}

#[derive(Deserialize)]
struct AnthropicResponse {
    model: Option<String>,
    content: Vec<AnthropicBlock>,
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: i64,
    output_tokens: i64,
}

pub fn parse_anthropic(body: &str, requested_model: &str) -> Result<Generated, AiError> {
    let parsed: AnthropicResponse = serde_json::from_str(body).map_err(|e| AiError::Malformed {
        provider: "anthropic",
        message: e.to_string(),
    })?;
    let text: String = parsed
        .content
        .iter()
        .filter(|b| b.kind == "text")
        .map(|b| b.text.as_str())
        .collect();
    if text.trim().is_empty() {
        return Err(AiError::Malformed {
            provider: "anthropic",
            message: "response contained no text".to_string(),
        });
    }
    Ok(Generated {
        text,
        usage: UsageRecord::new(
            parsed.model.unwrap_or_else(|| requested_model.to_string()),
            parsed.usage.input_tokens,
            parsed.usage.output_tokens,
        ),
    })
}

#[derive(Deserialize)]
struct OpenAiResponse {
    model: Option<String>,
    choices: Vec<OpenAiChoice>,
    usage: OpenAiUsage,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: i64,
    completion_tokens: i64,
}

pub fn parse_openai(body: &str, requested_model: &str) -> Result<StructuredGenerated, AiError> {
    let malformed = |message: String| AiError::Malformed {
        provider: "openai",
        message,
    };
    let parsed: OpenAiResponse =
        serde_json::from_str(body).map_err(|e| malformed(e.to_string()))?;
    let content = parsed
        .choices
        .first()
        .and_then(|c| c.message.content.as_deref())
        .ok_or_else(|| malformed("response contained no message content".to_string()))?;
    let value = serde_json::from_str(content)
        .map_err(|e| malformed(format!("structured content is not JSON: {}", e)))?;
    Ok(StructuredGenerated {
        value,
        usage: UsageRecord::new(
            parsed.model.unwrap_or_else(|| requested_model.to_string()),
            parsed.usage.prompt_tokens,
            parsed.usage.completion_tokens,
        ),
    })
}

#[async_trait]
impl LanguageModel for HttpLanguageModel {
    async fn generate(&self, request: &GenerateRequest) -> Result<Generated, AiError> {
        let api_key = self.anthropic_key.as_ref().ok_or(AiError::MissingApiKey {
            provider: "anthropic",
            env_var: "ANTHROPIC_API_KEY",
        })?;
        debug!(model = %request.model, max_tokens = request.max_tokens, "anthropic request");
        let builder = self
            .client
            .post(&self.anthropic_url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION);
        let body = self.post("anthropic", builder, &anthropic_body(request)).await?;
        parse_anthropic(&body, &request.model)
    }

    async fn generate_structured(
        &self,
        request: &GenerateRequest,
        schema: &OutputSchema,
    ) -> Result<StructuredGenerated, AiError> {
        let api_key = self.openai_key.as_ref().ok_or(AiError::MissingApiKey {
            provider: "openai",
            env_var: "OPENAI_API_KEY",
        })?;
        debug!(model = %request.model, schema = schema.name, "openai structured request");
        let builder = self.client.post(&self.openai_url).bearer_auth(api_key);
        let body = self
            .post("openai", builder, &openai_body(request, schema))
            .await?;
        parse_openai(&body, &request.model)
    }
}
