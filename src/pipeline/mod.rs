//! Drafting pipelines built on the execution engine.
//!
//! | Module        | Role                                                  |
//! |---------------|-------------------------------------------------------|
//! | `digestion`   | single-source pipeline with the verbatim short path   |
//! | `aggregation` | multi-source pipeline with per-source fan-out         |
//! | `steps`       | the model calls each step wraps                       |
//! | `prompts`     | deterministic prompt formatting                       |
//! | `lexical`     | colour-coded HTML to Lexical editor JSON              |

pub mod aggregation;
pub mod digestion;
pub mod lexical;
pub mod prompts;
pub mod steps;

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::ai::LanguageModel;
use crate::engine::{
    Checkpointer, Context, FanOutCoordinator, RetryPolicy, StepExecutor, StepKind, StepOutput,
    StepResult, UsageRecord,
};
use crate::errors::{EngineError, StepError};
use crate::notify::{CompletionEmail, Notifier};
use crate::store::DbHandle;
use crate::store::models::{
    Branch, FinalContent, MAX_BLOBS, MIN_BLOBS, NewRun, Run, RunStatus, RunTotals, TriggerEvent,
    WorkflowKind,
};
use steps::StepInput;

/// Name of the memoized step that writes the finished article.
pub const FINALIZE_STEP: &str = "finalize";
/// Name of the memoized notification step.
pub const NOTIFY_STEP: &str = "send-completion-email";
/// Checkpoint key for the `started` marker.
pub const STARTED_CHECKPOINT: &str = "started";

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub frontend_url: String,
    /// Fan-out concurrency limit; 0 is unbounded.
    pub max_parallel: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            frontend_url: "http://localhost:3000".to_string(),
            max_parallel: 0,
        }
    }
}

/// Outcome of the best-effort notification step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationOutcome {
    pub delivered: bool,
    pub error: Option<String>,
}

/// Drives one run through its workflow.
///
/// Every step goes through the executor and every status change through the
/// checkpointer, so driving the same run again after a crash replays the
/// finished steps and continues from the first unfinished one.
#[derive(Clone)]
pub struct PipelineController {
    executor: StepExecutor,
    checkpointer: Checkpointer,
    model: Arc<dyn LanguageModel>,
    notifier: Arc<dyn Notifier>,
    settings: PipelineSettings,
}

impl PipelineController {
    pub fn new(
        db: DbHandle,
        policy: RetryPolicy,
        model: Arc<dyn LanguageModel>,
        notifier: Arc<dyn Notifier>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            executor: StepExecutor::new(db.clone(), policy),
            checkpointer: Checkpointer::new(db),
            model,
            notifier,
            settings,
        }
    }

    pub fn db(&self) -> &DbHandle {
        self.executor.db()
    }

    /// Validate a trigger and create (or look up) its run.
    ///
    /// Validation failures surface before any run row exists.
    pub async fn prepare(&self, event: &TriggerEvent) -> Result<Run, EngineError> {
        if !(MIN_BLOBS..=MAX_BLOBS).contains(&event.number_of_blobs) {
            return Err(EngineError::Validation(format!(
                "numberOfBlobs must be between {} and {}",
                MIN_BLOBS, MAX_BLOBS
            )));
        }

        let article_id = event.article_id.clone();
        let (article, sources) = self
            .db()
            .call(move |db| {
                let article = db.get_article(&article_id)?;
                let sources = db.load_sources(&article_id)?;
                Ok((article, sources))
            })
            .await?;
        if article.is_none() {
            return Err(EngineError::ArticleNotFound {
                id: event.article_id.clone(),
            });
        }

        if let Some(empty) = sources.iter().find(|s| s.text.trim().is_empty()) {
            return Err(EngineError::Validation(format!(
                "Source {} has no content to process",
                empty.number
            )));
        }

        let branch = match event.kind {
            WorkflowKind::Digestion => {
                if sources.is_empty() {
                    return Err(EngineError::Validation(
                        "Digestion pipeline requires a source".to_string(),
                    ));
                }
                Branch::for_sources(&sources)
            }
            WorkflowKind::Aggregation => {
                if sources.len() < 2 {
                    return Err(EngineError::Validation(format!(
                        "Aggregation pipeline requires at least 2 sources, found {}",
                        sources.len()
                    )));
                }
                Branch::Normal
            }
        };

        let new_run = NewRun {
            event: event.clone(),
            branch,
        };
        let run_id = Uuid::new_v4().to_string();
        let run = self
            .db()
            .call(move |db| {
                db.record_event(&new_run.event)?;
                db.create_run(&run_id, &new_run)
            })
            .await?;
        info!(
            run_id = %run.id,
            article_id = %run.article_id,
            kind = %run.kind,
            branch = run.branch.as_str(),
            "run prepared"
        );
        Ok(run)
    }

    /// Run (or resume) the workflow of `run` until it completes.
    pub async fn drive(&self, run: &Run) -> Result<RunTotals, EngineError> {
        let run_id = run.id.clone();
        let article_id = run.article_id.clone();
        let (current, sources, instructions) = self
            .db()
            .call(move |db| {
                Ok((
                    db.get_run(&run_id)?,
                    db.load_sources(&article_id)?,
                    db.load_instructions(&article_id)?,
                ))
            })
            .await?;
        let run = current.ok_or_else(|| EngineError::RunNotFound { id: run.id.clone() })?;
        if run.status == RunStatus::Failed {
            return Err(EngineError::RunFailed {
                run_id: run.id.clone(),
                step: STARTED_CHECKPOINT.to_string(),
            });
        }

        let input = StepInput {
            kind: run.kind,
            tier: run.model_tier,
            sources,
            instructions: instructions.unwrap_or_default(),
            length_range: run.length_range,
            number_of_blobs: run.number_of_blobs,
            verbose: run.verbose,
        };

        self.checkpoint(&run, STARTED_CHECKPOINT, RunStatus::Started, &[])
            .await?;
        info!(run_id = %run.id, kind = %run.kind, branch = run.branch.as_str(), "driving run");
        if run.verbose {
            info!(
                run_id = %run.id,
                event_id = %run.event_id,
                article_id = %run.article_id,
                user_id = %run.user_id,
                model_tier = run.model_tier.as_str(),
                length_range = run.length_range.as_str(),
                number_of_blobs = run.number_of_blobs,
                sources = input.sources.len(),
                "run request"
            );
        }

        let totals = match (run.kind, run.branch) {
            (WorkflowKind::Digestion, Branch::Verbatim) => digestion::run_verbatim(self, &run, &input).await?,
            (WorkflowKind::Digestion, Branch::Normal) => digestion::run_normal(self, &run, &input).await?,
            (WorkflowKind::Aggregation, _) => aggregation::run(self, &run, &input).await?,
        };
        info!(
            run_id = %run.id,
            status = %totals.status,
            cost_usd = %totals.cost_usd(),
            "run finished"
        );
        Ok(totals)
    }

    // ── Building blocks for the workflows ─────────────────────────────

    fn model(&self) -> &dyn LanguageModel {
        self.model.as_ref()
    }

    fn fan_out(&self) -> FanOutCoordinator<'_> {
        FanOutCoordinator::new(&self.executor, self.settings.max_parallel)
    }

    /// Execute one memoized step and add its output to the context.
    async fn step<T, F, Fut>(
        &self,
        run: &Run,
        ctx: &mut Context,
        kind: StepKind,
        work: F,
    ) -> Result<StepResult<T>, EngineError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<StepOutput<T>, StepError>>,
    {
        let result = self.executor.execute(&run.id, kind.name(), work).await?;
        self.log_output(run, kind.name(), &result.value, &result.usage);
        ctx.insert(kind.name(), &result.value)?;
        Ok(result)
    }

    /// With `verbose` set, log what a step produced.
    fn log_output<T: Serialize>(&self, run: &Run, step: &str, value: &T, usage: &[UsageRecord]) {
        if !run.verbose {
            return;
        }
        let output = serde_json::to_string(value).unwrap_or_default();
        let tokens: i64 = usage.iter().map(UsageRecord::total_tokens).sum();
        info!(run_id = %run.id, step, tokens, output = %output, "step output");
    }

    async fn checkpoint(
        &self,
        run: &Run,
        key: &str,
        status: RunStatus,
        usage: &[UsageRecord],
    ) -> Result<RunTotals, EngineError> {
        self.checkpointer.checkpoint(&run.id, key, status, usage).await
    }

    /// Write the finished article. The user's own headline, when set,
    /// replaces the generated one.
    async fn finalize(&self, run: &Run, content: FinalContent) -> Result<FinalContent, EngineError> {
        let db = self.db().clone();
        let article_id = run.article_id.clone();
        let result = self
            .executor
            .execute(&run.id, FINALIZE_STEP, || {
                let db = db.clone();
                let article_id = article_id.clone();
                let mut content = content.clone();
                async move {
                    let stored = db
                        .call(move |db| {
                            if let Some(article) = db.get_article(&article_id)?
                                && let Some(headline) = article.headline.filter(|h| !h.trim().is_empty())
                            {
                                content.headline = headline;
                            }
                            let updated = db.persist_final_content(&article_id, &content)?;
                            Ok((updated, content))
                        })
                        .await
                        .map_err(|e| StepError::retriable(format!("{:#}", e)))?;
                    match stored {
                        (true, content) => Ok(StepOutput::new(content, Vec::new())),
                        (false, _) => Err(StepError::non_retriable("article disappeared before finalize")),
                    }
                }
            })
            .await?;
        Ok(result.value)
    }

    /// Best-effort completion email. Failure is recorded on the step and
    /// logged; it never changes the run status.
    async fn notify(&self, run: &Run, headline: &str) -> Result<(), EngineError> {
        let db = self.db().clone();
        let notifier = self.notifier.clone();
        let frontend_url = self.settings.frontend_url.clone();
        let run_id = run.id.clone();
        let (article_id, user_id) = (run.article_id.clone(), run.user_id.clone());
        let headline = headline.to_string();

        let result = self
            .executor
            .execute(&run.id, NOTIFY_STEP, || {
                let db = db.clone();
                let notifier = notifier.clone();
                let (article_id, user_id) = (article_id.clone(), user_id.clone());
                let (frontend_url, headline) = (frontend_url.clone(), headline.clone());
                async move {
                    let lookup = db
                        .call(move |db| Ok((db.get_article(&article_id)?, db.get_user(&user_id)?)))
                        .await;
                    let outcome = match lookup {
                        Ok((Some(article), Some(user))) => {
                            let email = CompletionEmail::new(
                                &frontend_url,
                                &user,
                                &article.slug,
                                article.version,
                                &headline,
                            );
                            notifier
                                .send_completion(&email)
                                .await
                                .map_err(|e| format!("{:#}", e))
                        }
                        Ok((None, _)) => Err("article not found".to_string()),
                        Ok((_, None)) => Err("user not found".to_string()),
                        Err(e) => Err(format!("{:#}", e)),
                    };
                    Ok(match outcome {
                        Ok(()) => StepOutput::new(
                            NotificationOutcome {
                                delivered: true,
                                error: None,
                            },
                            Vec::new(),
                        ),
                        Err(error) => StepOutput::new(
                            NotificationOutcome {
                                delivered: false,
                                error: Some(error),
                            },
                            Vec::new(),
                        )
                        .unsuccessful(),
                    })
                }
            })
            .await?;

        if let Some(error) = &result.value.error {
            warn!(run_id = %run_id, error = %error, "completion email not delivered");
        }
        Ok(())
    }
}
