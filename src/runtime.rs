//! Background execution of runs.
//!
//! The HTTP handler and the CLI both hand runs to a [`Dispatcher`], which
//! drives them on the tokio runtime and routes terminal errors to the
//! failure handler.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::ai::{HttpLanguageModel, LanguageModel, OfflineModel};
use crate::config::{ANTHROPIC_KEY_ENV, DraftlineToml, OPENAI_KEY_ENV, ProviderKind};
use crate::engine::FailureHandler;
use crate::errors::EngineError;
use crate::notify::{HttpNotifier, LogNotifier, Notifier};
use crate::pipeline::PipelineController;
use crate::store::DbHandle;
use crate::store::models::{Run, RunTotals, TriggerEvent};

fn env_secret(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

/// Build the model collaborator selected by `[ai] provider`.
pub fn build_model(config: &DraftlineToml) -> Result<Arc<dyn LanguageModel>> {
    match config.ai.provider {
        ProviderKind::Offline => Ok(Arc::new(OfflineModel::new())),
        ProviderKind::Http => {
            for var in config.missing_secrets() {
                warn!(var, "provider key not set; calls needing it will fail");
            }
            let model = HttpLanguageModel::new(
                config.ai.anthropic_base_url.clone(),
                env_secret(ANTHROPIC_KEY_ENV),
                config.ai.openai_base_url.clone(),
                env_secret(OPENAI_KEY_ENV),
                Duration::from_secs(config.ai.request_timeout_secs),
            )?;
            Ok(Arc::new(model))
        }
    }
}

/// Completion emails go over HTTP only when `[notify] enabled` is set.
pub fn build_notifier(config: &DraftlineToml) -> Result<Arc<dyn Notifier>> {
    if config.notify.enabled {
        let notifier = HttpNotifier::new(
            &config.notify.app_url,
            Duration::from_secs(config.notify.timeout_secs),
        )?;
        Ok(Arc::new(notifier))
    } else {
        Ok(Arc::new(LogNotifier))
    }
}

/// How often a waiting trigger checks whether another task still drives
/// its run.
const IN_FLIGHT_POLL: Duration = Duration::from_millis(50);

type InFlightSet = Arc<Mutex<HashSet<String>>>;

/// Marks a run as being driven; dropping it releases the run.
struct InFlight {
    set: InFlightSet,
    run_id: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut set = match self.set.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        set.remove(&self.run_id);
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    pipeline: PipelineController,
    failures: FailureHandler,
    /// Runs currently being driven in this process.
    in_flight: InFlightSet,
}

impl Dispatcher {
    pub fn new(pipeline: PipelineController) -> Self {
        let failures = FailureHandler::new(pipeline.db().clone());
        Self {
            pipeline,
            failures,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Wire a dispatcher from configuration over an open database.
    pub fn from_config(config: &DraftlineToml, db: DbHandle) -> Result<Self> {
        let pipeline = PipelineController::new(
            db,
            config.retry.to_policy(),
            build_model(config)?,
            build_notifier(config)?,
            config.pipeline_settings(),
        );
        Ok(Self::new(pipeline))
    }

    pub fn pipeline(&self) -> &PipelineController {
        &self.pipeline
    }

    /// Drive a run to a terminal state.
    ///
    /// Any error once the run exists is terminal for it: the failure handler
    /// marks it failed with whatever usage was already checkpointed, and the
    /// original error is returned.
    pub async fn execute(&self, run: &Run) -> Result<RunTotals, EngineError> {
        match self.pipeline.drive(run).await {
            Ok(totals) => Ok(totals),
            Err(err) => {
                error!(run_id = %run.id, error = %err, "run aborted");
                if let Err(mark_err) = self.failures.on_exhausted(&run.id).await {
                    error!(run_id = %run.id, error = %mark_err, "failed to mark run failed");
                }
                Err(err)
            }
        }
    }

    /// Validate and create the run for `event`, then drive it in the
    /// background. Validation errors are returned before anything is spawned.
    /// A repeated event resolves to its existing run and is not re-driven
    /// once that run is terminal.
    pub async fn trigger(&self, event: &TriggerEvent) -> Result<Run, EngineError> {
        let run = self.pipeline.prepare(event).await?;
        if !run.status.is_terminal() {
            self.spawn(run.clone());
        }
        Ok(run)
    }

    /// Validate, create and drive a run in the current task.
    ///
    /// When another task is already driving the run, wait for it to let go
    /// and then drive it here, which replays its memoized steps.
    pub async fn trigger_and_wait(&self, event: &TriggerEvent) -> Result<RunTotals, EngineError> {
        let run = self.pipeline.prepare(event).await?;
        loop {
            if let Some(_claim) = self.claim(&run.id) {
                return self.execute(&run).await;
            }
            debug!(run_id = %run.id, "waiting for in-flight run");
            tokio::time::sleep(IN_FLIGHT_POLL).await;
        }
    }

    /// Drive `run` on a new task, unless a task for it is already running.
    pub fn spawn(&self, run: Run) -> Option<JoinHandle<()>> {
        let claim = self.claim(&run.id)?;
        let dispatcher = self.clone();
        Some(tokio::spawn(async move {
            let _claim = claim;
            // Errors are already logged and recorded by `execute`.
            let _ = dispatcher.execute(&run).await;
        }))
    }

    fn claim(&self, run_id: &str) -> Option<InFlight> {
        let mut set = match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !set.insert(run_id.to_string()) {
            debug!(run_id, "run already in flight");
            return None;
        }
        Some(InFlight {
            set: self.in_flight.clone(),
            run_id: run_id.to_string(),
        })
    }

    /// Re-dispatch every run that has neither completed nor failed.
    pub async fn resume_pending(&self) -> Result<Vec<JoinHandle<()>>> {
        let runs = self
            .pipeline
            .db()
            .call(|db| db.list_resumable_runs())
            .await?;
        if !runs.is_empty() {
            info!(count = runs.len(), "resuming unfinished runs");
        }
        Ok(runs.into_iter().filter_map(|run| self.spawn(run)).collect())
    }
}
