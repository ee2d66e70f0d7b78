//! Multi-source workflow.
//!
//! Facts are gathered per source in two fan-out rounds; everything after the
//! fan-in runs sequentially over all sources.

use super::PipelineController;
use super::steps::{
    self, ArticleText, ColorCoded, ConditionalFacts, Headline, Outline, SourceFacts, StepInput,
};
use crate::engine::{Context, StepKind};
use crate::errors::EngineError;
use crate::store::models::{FinalContent, Run, RunStatus, RunTotals};

fn digest(ctx: &Context) -> Result<String, EngineError> {
    let facts: Vec<SourceFacts> = ctx.get(StepKind::ExtractFacts.name())?;
    let conditional: Vec<ConditionalFacts> = ctx.get(StepKind::ExtractFactsConditional.name())?;
    Ok(format!(
        "{}\n\n{}",
        steps::join_source_facts(facts.iter().map(|f| (f.source_number, f.facts.as_str()))),
        steps::join_source_facts(conditional.iter().map(|f| (f.source_number, f.facts.as_str()))),
    ))
}

pub async fn run(
    pipeline: &PipelineController,
    run: &Run,
    input: &StepInput,
) -> Result<RunTotals, EngineError> {
    let model = pipeline.model();
    let mut ctx = Context::new();

    // ── Fan-out rounds ────────────────────────────────────────────────

    let kind = StepKind::ExtractFacts;
    let extracted = pipeline
        .fan_out()
        .fan_out(&run.id, kind.name(), &input.sources, |source| {
            steps::extract_source_facts(model, input, source)
        })
        .await?;
    pipeline
        .checkpoint(run, kind.name(), RunStatus::Progress10, &extracted.usage)
        .await?;
    pipeline.log_output(run, kind.name(), &extracted.results, &extracted.usage);
    ctx.insert(kind.name(), &extracted.into_ordered())?;

    let prior: Vec<SourceFacts> = ctx.get(kind.name())?;
    let kind = StepKind::ExtractFactsConditional;
    let conditional = pipeline
        .fan_out()
        .fan_out(&run.id, kind.name(), &input.sources, |source| {
            steps::extract_source_facts_conditional(model, input, source, &prior)
        })
        .await?;
    pipeline
        .checkpoint(run, kind.name(), RunStatus::Progress20, &conditional.usage)
        .await?;
    pipeline.log_output(run, kind.name(), &conditional.results, &conditional.usage);
    ctx.insert(kind.name(), &conditional.into_ordered())?;

    // ── Sequential drafting ───────────────────────────────────────────

    let digest = digest(&ctx)?;
    let kind = StepKind::GenerateHeadline;
    let headlined = pipeline
        .step(run, &mut ctx, kind, || steps::generate_headline(model, input, &digest))
        .await?;
    pipeline
        .checkpoint(run, kind.name(), RunStatus::Progress30, &headlined.usage)
        .await?;

    let headline: Headline = ctx.get(kind.name())?;
    let kind = StepKind::CreateOutline;
    let outlined = pipeline
        .step(run, &mut ctx, kind, || steps::create_outline(model, input, &headline, &digest))
        .await?;
    pipeline
        .checkpoint(run, kind.name(), RunStatus::Progress40, &outlined.usage)
        .await?;

    let outline: Outline = ctx.get(kind.name())?;
    let kind = StepKind::DraftArticle;
    let drafted = pipeline
        .step(run, &mut ctx, kind, || steps::draft_article(model, input, &outline, &digest))
        .await?;
    pipeline
        .checkpoint(run, kind.name(), RunStatus::Progress70, &drafted.usage)
        .await?;

    let draft: ArticleText = ctx.get(kind.name())?;
    let kind = StepKind::ReviseArticle;
    let revised = pipeline
        .step(run, &mut ctx, kind, || steps::revise_article(model, input, &draft))
        .await?;
    pipeline
        .checkpoint(run, kind.name(), RunStatus::Progress80, &revised.usage)
        .await?;

    let revision: ArticleText = ctx.get(kind.name())?;
    let kind = StepKind::AddSourceAttribution;
    let attributed = pipeline
        .step(run, &mut ctx, kind, || steps::add_source_attribution(model, input, &revision))
        .await?;
    pipeline
        .checkpoint(run, kind.name(), RunStatus::Progress90, &attributed.usage)
        .await?;

    // Colour coding and rip detection have no marker of their own: the
    // first folds its usage at 90%, the second with the terminal marker.
    let article: ArticleText = ctx.get(kind.name())?;
    let kind = StepKind::ApplyColorCoding;
    let colored = pipeline
        .step(run, &mut ctx, kind, || steps::apply_color_coding(model, input, &article))
        .await?;
    pipeline
        .checkpoint(run, kind.name(), RunStatus::Progress90, &colored.usage)
        .await?;

    let coded: ColorCoded = ctx.get(kind.name())?;
    let kind = StepKind::DetectRips;
    let rips = pipeline
        .step(run, &mut ctx, kind, || steps::detect_rips(model, input, &coded))
        .await?;

    let rip_report = serde_json::to_value(&rips.value).map_err(|source| EngineError::Codec {
        step: kind.name().to_string(),
        source,
    })?;
    let content = pipeline
        .finalize(
            run,
            FinalContent {
                headline: headline.headline,
                blobs: headline.blobs,
                body: article.article,
                rich_content: Some(coded.lexical.to_string()),
                rip_report: Some(rip_report),
            },
        )
        .await?;
    let totals = pipeline
        .checkpoint(run, kind.name(), RunStatus::Completed, &rips.usage)
        .await?;
    pipeline.notify(run, &content.headline).await?;
    Ok(totals)
}
