//! The units of work wrapped by the executor.
//!
//! Each function performs the model call(s) for one step and classifies
//! failures for the retry policy. None of them touches the database; the
//! pipeline persists their outputs through the executor.

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::lexical;
use super::prompts;
use crate::ai::{GenerateRequest, Generated, LanguageModel, OutputSchema, Prompt, StructuredGenerated};
use crate::engine::fanout::SourceKeyed;
use crate::engine::step::StepOutput;
use crate::engine::step_config::{self, StepConfig, StepKind};
use crate::errors::StepError;
use crate::store::models::{LengthRange, ModelTier, Source, WorkflowKind};

static OUTPUT_TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"</?output[^>]*>").unwrap());
static DRAFT_TAG_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?(final-draft|rewrite)[^>]*>").unwrap());

/// Everything about a run the steps read. Built once per drive from the
/// run row and the article; never mutated.
#[derive(Debug, Clone)]
pub struct StepInput {
    pub kind: WorkflowKind,
    pub tier: ModelTier,
    pub sources: Vec<Source>,
    pub instructions: String,
    pub length_range: LengthRange,
    pub number_of_blobs: u8,
    pub verbose: bool,
}

impl StepInput {
    fn config(&self, step: StepKind) -> StepConfig {
        step_config::resolve(self.kind, step, self.tier)
    }

    fn primary_source(&self) -> Result<&Source, StepError> {
        self.sources
            .first()
            .ok_or_else(|| StepError::non_retriable("run has no sources"))
    }
}

// ── Step outputs ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFacts {
    pub facts: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummarizedFacts {
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFacts {
    pub source_number: u32,
    pub facts: String,
}

impl SourceKeyed for SourceFacts {
    fn source_number(&self) -> u32 {
        self.source_number
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalFacts {
    pub source_number: u32,
    pub facts: String,
}

impl SourceKeyed for ConditionalFacts {
    fn source_number(&self) -> u32 {
        self.source_number
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Headline {
    pub headline: String,
    pub blobs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outline {
    pub outline: String,
}

/// Article text produced by draft, revise, attribution or verbatim rewrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleText {
    pub article: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorCoded {
    pub html: String,
    pub lexical: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RipComparison {
    pub article_quote: String,
    pub source_quote: String,
    pub source_number: u32,
    pub rip_analysis: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RipReport {
    pub overall_rip_analysis: String,
    pub overall_rip_score: f64,
    pub rip_comparisons: Vec<RipComparison>,
}

// ── Model call helpers ────────────────────────────────────────────────

fn log_prompt(input: &StepInput, step: StepKind, prompt: &Prompt) {
    if input.verbose {
        info!(
            step = step.name(),
            system = %prompt.system,
            user = %prompt.user,
            assistant = ?prompt.assistant,
            "step prompt"
        );
    }
}

async fn generate_text(
    model: &dyn LanguageModel,
    input: &StepInput,
    step: StepKind,
    prompt: Prompt,
) -> Result<Generated, StepError> {
    let config = input.config(step);
    log_prompt(input, step, &prompt);
    let request = GenerateRequest {
        model: config.model,
        prompt,
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    };
    let generated = model.generate(&request).await?;
    if generated.text.trim().is_empty() {
        return Err(StepError::retriable(format!("{} returned empty text", step.name())));
    }
    Ok(generated)
}

async fn generate_object(
    model: &dyn LanguageModel,
    input: &StepInput,
    step: StepKind,
    prompt: Prompt,
    schema: OutputSchema,
    max_tokens: u32,
) -> Result<StructuredGenerated, StepError> {
    let config = input.config(step);
    log_prompt(input, step, &prompt);
    let request = GenerateRequest {
        model: config.structured_model.unwrap_or(config.model),
        prompt,
        temperature: config
            .structured_temperature
            .unwrap_or(step_config::STRUCTURED_TEMPERATURE),
        max_tokens,
    };
    Ok(model.generate_structured(&request, &schema).await?)
}

fn decode<T: DeserializeOwned>(step: StepKind, value: serde_json::Value) -> Result<T, StepError> {
    serde_json::from_value(value)
        .map_err(|e| StepError::retriable(format!("{} returned unexpected shape: {}", step.name(), e)))
}

pub fn strip_output_tags(text: &str) -> String {
    OUTPUT_TAG_REGEX.replace_all(text, "").trim().to_string()
}

fn strip_draft_tags(text: &str) -> String {
    DRAFT_TAG_REGEX.replace_all(text, "").trim().to_string()
}

// ── Fact gathering ────────────────────────────────────────────────────

pub async fn extract_facts(
    model: &dyn LanguageModel,
    input: &StepInput,
) -> Result<StepOutput<ExtractedFacts>, StepError> {
    let source = input.primary_source()?;
    let prompt = prompts::extract_facts(source, &input.instructions);
    let generated = generate_text(model, input, StepKind::ExtractFacts, prompt).await?;
    Ok(StepOutput::new(
        ExtractedFacts {
            facts: generated.text,
        },
        vec![generated.usage],
    ))
}

pub async fn summarize_facts(
    model: &dyn LanguageModel,
    input: &StepInput,
    facts: &ExtractedFacts,
) -> Result<StepOutput<SummarizedFacts>, StepError> {
    let prompt = prompts::summarize_facts(&facts.facts, &input.instructions);
    let generated = generate_text(model, input, StepKind::SummarizeFacts, prompt).await?;
    Ok(StepOutput::new(
        SummarizedFacts {
            summary: generated.text,
        },
        vec![generated.usage],
    ))
}

pub async fn extract_source_facts(
    model: &dyn LanguageModel,
    input: &StepInput,
    source: Source,
) -> Result<StepOutput<SourceFacts>, StepError> {
    let prompt = prompts::extract_facts(&source, &input.instructions);
    let generated = generate_text(model, input, StepKind::ExtractFacts, prompt).await?;
    Ok(StepOutput::new(
        SourceFacts {
            source_number: source.number,
            facts: generated.text,
        },
        vec![generated.usage],
    ))
}

/// Joins per-source facts into one tagged block, in source order.
pub fn join_source_facts<'a>(facts: impl IntoIterator<Item = (u32, &'a str)>) -> String {
    facts
        .into_iter()
        .map(|(number, text)| format!("<source-facts number=\"{}\">\n{}\n</source-facts>", number, text))
        .collect::<Vec<_>>()
        .join("\n")
}

pub async fn extract_source_facts_conditional(
    model: &dyn LanguageModel,
    input: &StepInput,
    source: Source,
    all_facts: &[SourceFacts],
) -> Result<StepOutput<ConditionalFacts>, StepError> {
    let joined = join_source_facts(all_facts.iter().map(|f| (f.source_number, f.facts.as_str())));
    let prompt = prompts::extract_facts_conditional(&source, &joined, &input.instructions);
    let generated = generate_text(model, input, StepKind::ExtractFactsConditional, prompt).await?;
    Ok(StepOutput::new(
        ConditionalFacts {
            source_number: source.number,
            facts: generated.text,
        },
        vec![generated.usage],
    ))
}

// ── Headline ──────────────────────────────────────────────────────────

const HEADLINE_STRUCTURE_MAX_TOKENS: u32 = 500;

fn headline_schema(number_of_blobs: u8) -> OutputSchema {
    OutputSchema {
        name: "headline_and_blobs",
        schema: json!({
            "type": "object",
            "properties": {
                "headline": {"type": "string"},
                "blobs": {
                    "type": "array",
                    "items": {"type": "string"},
                    "minItems": number_of_blobs,
                    "maxItems": number_of_blobs
                }
            },
            "required": ["headline", "blobs"],
            "additionalProperties": false
        }),
    }
}

/// Free-text headline and blobs, then a structured pass that only reformats
/// them. Both calls' usage is reported.
pub async fn generate_headline(
    model: &dyn LanguageModel,
    input: &StepInput,
    digest: &str,
) -> Result<StepOutput<Headline>, StepError> {
    let step = StepKind::GenerateHeadline;
    let raw_prompt = prompts::generate_headline(digest, input.number_of_blobs, &input.instructions);
    let raw = generate_text(model, input, step, raw_prompt).await?;

    let structured = generate_object(
        model,
        input,
        step,
        prompts::structure_headline(&raw.text),
        headline_schema(input.number_of_blobs),
        HEADLINE_STRUCTURE_MAX_TOKENS,
    )
    .await?;

    let mut headline: Headline = decode(step, structured.value)?;
    let wanted = usize::from(input.number_of_blobs);
    if headline.headline.trim().is_empty() {
        return Err(StepError::retriable("generate-headline returned an empty headline"));
    }
    if headline.blobs.len() < wanted {
        return Err(StepError::retriable(format!(
            "generate-headline returned {} blobs, expected {}",
            headline.blobs.len(),
            wanted
        )));
    }
    headline.blobs.truncate(wanted);

    Ok(StepOutput::new(headline, vec![raw.usage, structured.usage]))
}

// ── Drafting ──────────────────────────────────────────────────────────

pub async fn create_outline(
    model: &dyn LanguageModel,
    input: &StepInput,
    headline: &Headline,
    digest: &str,
) -> Result<StepOutput<Outline>, StepError> {
    let prompt = prompts::create_outline(&headline.headline, &headline.blobs, digest, &input.instructions);
    let generated = generate_text(model, input, StepKind::CreateOutline, prompt).await?;
    Ok(StepOutput::new(
        Outline {
            outline: generated.text,
        },
        vec![generated.usage],
    ))
}

pub async fn verbatim_rewrite(
    model: &dyn LanguageModel,
    input: &StepInput,
    headline: &Headline,
) -> Result<StepOutput<ArticleText>, StepError> {
    let source = match input.sources.iter().find(|s| s.flags.copy_source_verbatim) {
        Some(source) => source,
        None => input.primary_source()?,
    };
    let prompt = prompts::verbatim_rewrite(source, &headline.headline, &input.instructions);
    let generated = generate_text(model, input, StepKind::VerbatimRewrite, prompt).await?;
    let article = strip_output_tags(&generated.text);
    if article.is_empty() {
        return Err(StepError::retriable("verbatim-rewrite returned only tags"));
    }
    Ok(StepOutput::new(ArticleText { article }, vec![generated.usage]))
}

pub async fn draft_article(
    model: &dyn LanguageModel,
    input: &StepInput,
    outline: &Outline,
    digest: &str,
) -> Result<StepOutput<ArticleText>, StepError> {
    let prompt = prompts::draft_article(&outline.outline, digest, input.length_range, &input.instructions);
    let generated = generate_text(model, input, StepKind::DraftArticle, prompt).await?;
    Ok(StepOutput::new(
        ArticleText {
            article: generated.text,
        },
        vec![generated.usage],
    ))
}

pub async fn revise_article(
    model: &dyn LanguageModel,
    input: &StepInput,
    draft: &ArticleText,
) -> Result<StepOutput<ArticleText>, StepError> {
    let prompt = prompts::revise_article(&draft.article, input.length_range, &input.instructions);
    let generated = generate_text(model, input, StepKind::ReviseArticle, prompt).await?;
    Ok(StepOutput::new(
        ArticleText {
            article: generated.text,
        },
        vec![generated.usage],
    ))
}

pub async fn add_source_attribution(
    model: &dyn LanguageModel,
    input: &StepInput,
    revised: &ArticleText,
) -> Result<StepOutput<ArticleText>, StepError> {
    let prompt = prompts::add_source_attribution(&revised.article, &input.sources);
    let generated = generate_text(model, input, StepKind::AddSourceAttribution, prompt).await?;
    Ok(StepOutput::new(
        ArticleText {
            article: generated.text,
        },
        vec![generated.usage],
    ))
}

// ── Aggregation extras ────────────────────────────────────────────────

pub async fn apply_color_coding(
    model: &dyn LanguageModel,
    input: &StepInput,
    attributed: &ArticleText,
) -> Result<StepOutput<ColorCoded>, StepError> {
    let prompt = prompts::apply_color_coding(&attributed.article, &input.sources);
    let generated = generate_text(model, input, StepKind::ApplyColorCoding, prompt).await?;
    let html = strip_draft_tags(&generated.text);
    let lexical = lexical::html_to_lexical(&html);
    Ok(StepOutput::new(ColorCoded { html, lexical }, vec![generated.usage]))
}

const RIP_MAX_TOKENS: u32 = 4000;

fn rip_schema() -> OutputSchema {
    OutputSchema {
        name: "rip_analysis",
        schema: json!({
            "type": "object",
            "properties": {
                "overallRipAnalysis": {"type": "string"},
                "overallRipScore": {"type": "number"},
                "ripComparisons": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "articleQuote": {"type": "string"},
                            "sourceQuote": {"type": "string"},
                            "sourceNumber": {"type": "integer"},
                            "ripAnalysis": {"type": "string"}
                        },
                        "required": ["articleQuote", "sourceQuote", "sourceNumber", "ripAnalysis"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["overallRipAnalysis", "overallRipScore", "ripComparisons"],
            "additionalProperties": false
        }),
    }
}

pub async fn detect_rips(
    model: &dyn LanguageModel,
    input: &StepInput,
    colored: &ColorCoded,
) -> Result<StepOutput<RipReport>, StepError> {
    let step = StepKind::DetectRips;
    let text = lexical::display_text(&colored.lexical);
    let prompt = prompts::detect_rips(&text, &input.sources);
    let structured = generate_object(model, input, step, prompt, rip_schema(), RIP_MAX_TOKENS).await?;
    let report: RipReport = decode(step, structured.value)?;
    Ok(StepOutput::new(report, vec![structured.usage]))
}
