//! Memoized, retried execution of a single named step.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};

use super::usage::UsageRecord;
use crate::errors::{EngineError, StepError};
use crate::store::DbHandle;
use crate::store::models::{RunStatus, StepRecord};

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1_000);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(300);

/// What a unit of work hands back on success.
#[derive(Debug, Clone)]
pub struct StepOutput<T> {
    pub value: T,
    pub usage: Vec<UsageRecord>,
    pub success: bool,
}

impl<T> StepOutput<T> {
    pub fn new(value: T, usage: Vec<UsageRecord>) -> Self {
        Self {
            value,
            usage,
            success: true,
        }
    }

    /// Record the step as completed-but-unsuccessful. Used by best-effort
    /// side effects such as notifications, which must not be retried forever
    /// nor fail the run.
    pub fn unsuccessful(mut self) -> Self {
        self.success = false;
        self
    }
}

/// The memoized result of one step, identical whether it was just computed
/// or replayed from storage.
#[derive(Debug, Clone)]
pub struct StepResult<T> {
    pub step: String,
    pub value: T,
    pub usage: Vec<UsageRecord>,
    pub success: bool,
    pub attempts: u32,
    pub replayed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff: `base * 2^retries`, capped at `max_delay`.
    pub fn backoff(&self, retries_used: u32) -> Duration {
        let base_ms = self.base_delay.as_millis();
        if base_ms == 0 {
            return Duration::from_millis(0);
        }
        let max_ms = self.max_delay.as_millis().max(base_ms);
        let multiplier = 1u128 << retries_used.min(20);
        let backoff_ms = base_ms.saturating_mul(multiplier).min(max_ms);
        Duration::from_millis(u64::try_from(backoff_ms).unwrap_or(u64::MAX))
    }
}

/// Runs named units of work exactly once per run.
///
/// The memoization key is `(run_id, step_name)`. A recorded step is returned
/// without invoking its work again, so re-entering a pipeline after a crash
/// resumes at the first unrecorded step.
#[derive(Clone)]
pub struct StepExecutor {
    db: DbHandle,
    policy: RetryPolicy,
}

impl StepExecutor {
    pub fn new(db: DbHandle, policy: RetryPolicy) -> Self {
        Self { db, policy }
    }

    pub fn db(&self) -> &DbHandle {
        &self.db
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn execute<T, F, Fut>(
        &self,
        run_id: &str,
        step: &str,
        mut work: F,
    ) -> Result<StepResult<T>, EngineError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<StepOutput<T>, StepError>>,
    {
        let (rid, name) = (run_id.to_string(), step.to_string());
        if let Some(record) = self.db.call(move |db| db.get_step(&rid, &name)).await? {
            debug!(run_id, step, "replaying memoized step");
            return decode(record, true);
        }

        let rid = run_id.to_string();
        let run = self
            .db
            .call(move |db| db.get_run(&rid))
            .await?
            .ok_or_else(|| EngineError::RunNotFound {
                id: run_id.to_string(),
            })?;
        if run.status == RunStatus::Failed {
            return Err(EngineError::RunFailed {
                run_id: run_id.to_string(),
                step: step.to_string(),
            });
        }

        let mut retries_used = 0u32;
        loop {
            let attempt = retries_used + 1;
            debug!(run_id, step, attempt, "starting step attempt");
            let outcome = match tokio::time::timeout(self.policy.attempt_timeout, work()).await {
                Ok(result) => result,
                Err(_) => Err(StepError::Timeout(self.policy.attempt_timeout)),
            };

            match outcome {
                Ok(output) => return self.persist(run_id, step, output, attempt).await,
                Err(err) if !err.is_retriable() => {
                    warn!(run_id, step, attempt, error = %err, "step failed with non-retriable error");
                    return Err(EngineError::Step {
                        step: step.to_string(),
                        source: err,
                    });
                }
                Err(err) => {
                    if attempt >= self.policy.max_attempts {
                        error!(run_id, step, attempts = attempt, error = %err, "step retries exhausted");
                        return Err(EngineError::Exhausted {
                            step: step.to_string(),
                            attempts: attempt,
                            source: err,
                        });
                    }
                    let delay = self.policy.backoff(retries_used);
                    warn!(
                        run_id,
                        step,
                        retry_attempt = attempt + 1,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying step after retriable error"
                    );
                    tokio::time::sleep(delay).await;
                    retries_used += 1;
                }
            }
        }
    }

    async fn persist<T>(
        &self,
        run_id: &str,
        step: &str,
        output: StepOutput<T>,
        attempts: u32,
    ) -> Result<StepResult<T>, EngineError>
    where
        T: Serialize + DeserializeOwned,
    {
        let value = serde_json::to_value(&output.value).map_err(|source| EngineError::Codec {
            step: step.to_string(),
            source,
        })?;
        let record = StepRecord {
            run_id: run_id.to_string(),
            step_name: step.to_string(),
            output: value,
            usage: output.usage,
            success: output.success,
            attempts,
            recorded_at: String::new(),
        };
        let stored = self.db.call(move |db| db.insert_step(&record)).await?;
        debug!(run_id, step, attempts, "step recorded");
        // Return what was persisted so a first run and a replay observe the
        // same bytes.
        decode(stored, false)
    }
}

fn decode<T: DeserializeOwned>(record: StepRecord, replayed: bool) -> Result<StepResult<T>, EngineError> {
    let value = serde_json::from_value(record.output).map_err(|source| EngineError::Codec {
        step: record.step_name.clone(),
        source,
    })?;
    Ok(StepResult {
        step: record.step_name,
        value,
        usage: record.usage,
        success: record.success,
        attempts: record.attempts,
        replayed,
    })
}
