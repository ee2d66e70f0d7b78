//! Deterministic provider for dry runs: no network, no keys.
//!
//! Text responses are a single coloured HTML paragraph so every downstream
//! step (including colour coding) has something well-formed to work on.
//! Structured responses are synthesised from the requested JSON schema.

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use super::{GenerateRequest, Generated, LanguageModel, OutputSchema, StructuredGenerated};
use crate::engine::usage::UsageRecord;
use crate::errors::AiError;

const EXCERPT_CHARS: usize = 160;

#[derive(Debug, Clone, Default)]
pub struct OfflineModel;

impl OfflineModel {
    pub fn new() -> Self {
        Self
    }
}

/// Rough 4-characters-per-token estimate.
fn estimate_tokens(text: &str) -> i64 {
    (text.chars().count() as i64 / 4).max(1)
}

fn excerpt(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    flat.chars().take(EXCERPT_CHARS).collect()
}

/// Build a value that satisfies `schema`, honouring `minItems` on arrays.
pub fn synthesize(schema: &Value, label: &str) -> Value {
    match schema.get("type").and_then(Value::as_str) {
        Some("object") => {
            let mut object = Map::new();
            if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
                for (name, property) in properties {
                    object.insert(name.clone(), synthesize(property, name));
                }
            }
            Value::Object(object)
        }
        Some("array") => {
            let count = schema.get("minItems").and_then(Value::as_u64).unwrap_or(1);
            let item_schema = schema.get("items").cloned().unwrap_or(json!({"type": "string"}));
            Value::Array(
                (1..=count)
                    .map(|i| synthesize(&item_schema, &format!("{} {}", label, i)))
                    .collect(),
            )
        }
        Some("integer") | Some("number") => json!(0),
        Some("boolean") => json!(false),
        _ => json!(format!("offline {}", label)),
    }
}

#[async_trait]
impl LanguageModel for OfflineModel {
    async fn generate(&self, request: &GenerateRequest) -> Result<Generated, AiError> {
        let text = format!(
            "<p><span style=\"color:#2563eb\">{}</span></p>",
            excerpt(&request.prompt.user)
        );
        let input = estimate_tokens(&request.prompt.system) + estimate_tokens(&request.prompt.user);
        let output = estimate_tokens(&text);
        Ok(Generated {
            text,
            usage: UsageRecord::new(request.model.clone(), input, output),
        })
    }

    async fn generate_structured(
        &self,
        request: &GenerateRequest,
        schema: &OutputSchema,
    ) -> Result<StructuredGenerated, AiError> {
        let value = synthesize(&schema.schema, schema.name);
        let input = estimate_tokens(&request.prompt.system) + estimate_tokens(&request.prompt.user);
        let output = estimate_tokens(&value.to_string());
        Ok(StructuredGenerated {
            value,
            usage: UsageRecord::new(request.model.clone(), input, output),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::Prompt;

    #[test]
    fn test_synthesize_honours_min_items() {
        let schema = json!({
            "type": "object",
            "properties": {
                "headline": {"type": "string"},
                "blobs": {"type": "array", "items": {"type": "string"}, "minItems": 3},
                "score": {"type": "number"}
            }
        });
        let value = synthesize(&schema, "headline");
        assert_eq!(value["headline"], "offline headline");
        assert_eq!(value["blobs"].as_array().unwrap().len(), 3);
        assert_eq!(value["score"], 0);
    }

    #[tokio::test]
    async fn test_generate_is_deterministic_html() {
        let request = GenerateRequest {
            model: "claude-sonnet-4-20250514".into(),
            prompt: Prompt::new("system", "Write   about\nthe budget."),
            temperature: 0.5,
            max_tokens: 100,
        };
        let a = OfflineModel::new().generate(&request).await.unwrap();
        let b = OfflineModel::new().generate(&request).await.unwrap();
        assert_eq!(a.text, b.text);
        assert!(a.text.contains("Write about the budget."));
        assert!(a.usage.input_tokens > 0);
    }
}
