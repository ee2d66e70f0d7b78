//! Single-source workflow.
//!
//! Normal path: extract, summarize, headline, outline, draft, revise,
//! attribution, finalize. When the source is flagged verbatim the run takes
//! the short path: extract, summarize, headline, verbatim rewrite, finalize.

use super::PipelineController;
use super::steps::{self, ArticleText, ExtractedFacts, Headline, Outline, StepInput, SummarizedFacts};
use crate::engine::{Context, StepKind, UsageRecord};
use crate::errors::EngineError;
use crate::store::models::{FinalContent, Run, RunStatus, RunTotals};

/// Progress markers reached after each step, per path.
struct Markers {
    extract: RunStatus,
    summarize: RunStatus,
    headline: RunStatus,
}

const NORMAL: Markers = Markers {
    extract: RunStatus::Progress10,
    summarize: RunStatus::Progress20,
    headline: RunStatus::Progress30,
};

const VERBATIM: Markers = Markers {
    extract: RunStatus::Progress30,
    summarize: RunStatus::Progress60,
    headline: RunStatus::Progress80,
};

fn digest(ctx: &Context) -> Result<String, EngineError> {
    let facts: ExtractedFacts = ctx.get(StepKind::ExtractFacts.name())?;
    let summary: SummarizedFacts = ctx.get(StepKind::SummarizeFacts.name())?;
    Ok(format!(
        "<summary>\n{}\n</summary>\n<facts>\n{}\n</facts>",
        summary.summary, facts.facts
    ))
}

/// Steps shared by both paths, up to and including the headline.
async fn gather(
    pipeline: &PipelineController,
    run: &Run,
    input: &StepInput,
    ctx: &mut Context,
    markers: &Markers,
) -> Result<(), EngineError> {
    let model = pipeline.model();

    let kind = StepKind::ExtractFacts;
    let extracted = pipeline
        .step(run, ctx, kind, || steps::extract_facts(model, input))
        .await?;
    pipeline
        .checkpoint(run, kind.name(), markers.extract, &extracted.usage)
        .await?;

    let facts: ExtractedFacts = ctx.get(StepKind::ExtractFacts.name())?;
    let kind = StepKind::SummarizeFacts;
    let summarized = pipeline
        .step(run, ctx, kind, || steps::summarize_facts(model, input, &facts))
        .await?;
    pipeline
        .checkpoint(run, kind.name(), markers.summarize, &summarized.usage)
        .await?;

    let digest = digest(ctx)?;
    let kind = StepKind::GenerateHeadline;
    let headline = pipeline
        .step(run, ctx, kind, || steps::generate_headline(model, input, &digest))
        .await?;
    pipeline
        .checkpoint(run, kind.name(), markers.headline, &headline.usage)
        .await?;
    Ok(())
}

async fn complete(
    pipeline: &PipelineController,
    run: &Run,
    headline: Headline,
    body: String,
    last_step: StepKind,
    last_usage: &[UsageRecord],
) -> Result<RunTotals, EngineError> {
    let content = pipeline
        .finalize(
            run,
            FinalContent {
                headline: headline.headline,
                blobs: headline.blobs,
                body,
                rich_content: None,
                rip_report: None,
            },
        )
        .await?;
    // The last step's usage lands together with the terminal marker.
    let totals = pipeline
        .checkpoint(run, last_step.name(), RunStatus::Completed, last_usage)
        .await?;
    pipeline.notify(run, &content.headline).await?;
    Ok(totals)
}

pub async fn run_normal(
    pipeline: &PipelineController,
    run: &Run,
    input: &StepInput,
) -> Result<RunTotals, EngineError> {
    let model = pipeline.model();
    let mut ctx = Context::new();
    gather(pipeline, run, input, &mut ctx, &NORMAL).await?;

    let digest = digest(&ctx)?;
    let headline: Headline = ctx.get(StepKind::GenerateHeadline.name())?;
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
        .checkpoint(run, kind.name(), RunStatus::Progress90, &revised.usage)
        .await?;

    let revision: ArticleText = ctx.get(kind.name())?;
    let kind = StepKind::AddSourceAttribution;
    let attributed = pipeline
        .step(run, &mut ctx, kind, || steps::add_source_attribution(model, input, &revision))
        .await?;

    complete(
        pipeline,
        run,
        headline,
        attributed.value.article,
        kind,
        &attributed.usage,
    )
    .await
}

pub async fn run_verbatim(
    pipeline: &PipelineController,
    run: &Run,
    input: &StepInput,
) -> Result<RunTotals, EngineError> {
    let model = pipeline.model();
    let mut ctx = Context::new();
    gather(pipeline, run, input, &mut ctx, &VERBATIM).await?;

    let headline: Headline = ctx.get(StepKind::GenerateHeadline.name())?;
    let kind = StepKind::VerbatimRewrite;
    let rewritten = pipeline
        .step(run, &mut ctx, kind, || steps::verbatim_rewrite(model, input, &headline))
        .await?;

    complete(
        pipeline,
        run,
        headline,
        rewritten.value.article,
        kind,
        &rewritten.usage,
    )
    .await
}
