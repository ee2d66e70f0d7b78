//! Maps a model tier and step to concrete model ids and sampling parameters.

use serde::{Deserialize, Serialize};

use crate::store::models::{ModelTier, WorkflowKind};

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 4000;
pub const STRUCTURED_TEMPERATURE: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepKind {
    ExtractFacts,
    SummarizeFacts,
    ExtractFactsConditional,
    GenerateHeadline,
    CreateOutline,
    VerbatimRewrite,
    DraftArticle,
    ReviseArticle,
    AddSourceAttribution,
    ApplyColorCoding,
    DetectRips,
}

impl StepKind {
    /// Memoization name of the step within a run.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ExtractFacts => "extract-facts",
            Self::SummarizeFacts => "summarize-facts",
            Self::ExtractFactsConditional => "extract-facts-conditional",
            Self::GenerateHeadline => "generate-headline",
            Self::CreateOutline => "create-outline",
            Self::VerbatimRewrite => "verbatim-rewrite",
            Self::DraftArticle => "draft-article",
            Self::ReviseArticle => "revise-article",
            Self::AddSourceAttribution => "add-source-attribution",
            Self::ApplyColorCoding => "apply-color-coding",
            Self::DetectRips => "detect-rips",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepConfig {
    pub step: StepKind,
    pub model: String,
    pub structured_model: Option<String>,
    pub temperature: f32,
    pub structured_temperature: Option<f32>,
    pub max_tokens: u32,
}

pub fn claude_model(tier: ModelTier) -> &'static str {
    match tier {
        ModelTier::Claude37 => "claude-3-7-sonnet-20250219",
        ModelTier::Claude4 => "claude-sonnet-4-20250514",
        ModelTier::Claude45 => "claude-sonnet-4-5-20250929",
    }
}

/// Structured output goes through the same JSON-schema model on every tier.
pub fn structured_model(_tier: ModelTier) -> &'static str {
    "gpt-4o"
}

pub fn resolve(kind: WorkflowKind, step: StepKind, tier: ModelTier) -> StepConfig {
    use StepKind::*;

    let (temperature, max_tokens) = match (kind, step) {
        (WorkflowKind::Digestion, ExtractFacts) => (DEFAULT_TEMPERATURE, 2500),
        (WorkflowKind::Digestion, SummarizeFacts) => (DEFAULT_TEMPERATURE, DEFAULT_MAX_TOKENS),
        (WorkflowKind::Digestion, GenerateHeadline) => (0.5, 500),
        (WorkflowKind::Digestion, CreateOutline) => (0.6, DEFAULT_MAX_TOKENS),
        (WorkflowKind::Digestion, VerbatimRewrite) => (0.2, 4000),
        (WorkflowKind::Digestion, DraftArticle) => (0.6, 3000),
        (WorkflowKind::Digestion, ReviseArticle) => (0.5, 3700),
        (WorkflowKind::Digestion, AddSourceAttribution) => (0.2, 3700),

        (WorkflowKind::Aggregation, ExtractFacts) => (0.8, 4000),
        (WorkflowKind::Aggregation, ExtractFactsConditional) => (0.8, 4000),
        (WorkflowKind::Aggregation, GenerateHeadline) => (0.4, 500),
        (WorkflowKind::Aggregation, CreateOutline) => (0.6, 3000),
        (WorkflowKind::Aggregation, DraftArticle) => (0.4, 4000),
        (WorkflowKind::Aggregation, ReviseArticle) => (0.5, 3700),
        (WorkflowKind::Aggregation, AddSourceAttribution) => (0.2, 3700),
        (WorkflowKind::Aggregation, ApplyColorCoding) => (0.7, 3000),
        (WorkflowKind::Aggregation, DetectRips) => (STRUCTURED_TEMPERATURE, 4000),

        _ => (DEFAULT_TEMPERATURE, DEFAULT_MAX_TOKENS),
    };

    let structured = matches!(step, GenerateHeadline | DetectRips);
    StepConfig {
        step,
        model: claude_model(tier).to_string(),
        structured_model: structured.then(|| structured_model(tier).to_string()),
        temperature,
        structured_temperature: structured.then_some(STRUCTURED_TEMPERATURE),
        max_tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_maps_to_model_id() {
        let cfg = resolve(WorkflowKind::Digestion, StepKind::DraftArticle, ModelTier::Claude45);
        assert_eq!(cfg.model, "claude-sonnet-4-5-20250929");
        assert_eq!(cfg.temperature, 0.6);
        assert_eq!(cfg.max_tokens, 3000);
        assert!(cfg.structured_model.is_none());
    }

    #[test]
    fn test_headline_step_carries_structured_model() {
        let cfg = resolve(
            WorkflowKind::Aggregation,
            StepKind::GenerateHeadline,
            ModelTier::Claude37,
        );
        assert_eq!(cfg.model, "claude-3-7-sonnet-20250219");
        assert_eq!(cfg.structured_model.as_deref(), Some("gpt-4o"));
        assert_eq!(cfg.structured_temperature, Some(0.1));
        assert_eq!(cfg.temperature, 0.4);
        assert_eq!(cfg.max_tokens, 500);
    }

    #[test]
    fn test_same_step_differs_by_workflow() {
        let digest = resolve(WorkflowKind::Digestion, StepKind::ExtractFacts, ModelTier::Claude4);
        let aggregate = resolve(WorkflowKind::Aggregation, StepKind::ExtractFacts, ModelTier::Claude4);
        assert_eq!(digest.max_tokens, 2500);
        assert_eq!(aggregate.max_tokens, 4000);
        assert_eq!(aggregate.temperature, 0.8);
    }

    #[test]
    fn test_step_names_are_kebab_case() {
        assert_eq!(StepKind::AddSourceAttribution.name(), "add-source-attribution");
        assert_eq!(
            serde_json::to_string(&StepKind::ExtractFactsConditional).unwrap(),
            "\"extract-facts-conditional\""
        );
    }
}
