//! Per-source fan-out with fan-in keyed by source number.
//!
//! Every item runs as its own memoized step named `{stage}-source-{n}`, so a
//! retry of the whole fan-out only re-executes the items that did not finish.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;

use futures::future::join_all;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use super::step::{StepExecutor, StepOutput, StepResult};
use super::usage::UsageRecord;
use crate::errors::{EngineError, StepError};
use crate::store::models::Source;

/// Implemented by every per-source result so the fan-in can match it back to
/// the item that produced it without trusting completion order.
pub trait SourceKeyed {
    fn source_number(&self) -> u32;
}

pub fn item_step_name(stage: &str, source_number: u32) -> String {
    format!("{}-source-{}", stage, source_number)
}

/// Reassembled output of a fan-out.
#[derive(Debug, Clone)]
pub struct FanIn<T> {
    pub results: BTreeMap<u32, T>,
    /// Usage of every item, in source-number order.
    pub usage: Vec<UsageRecord>,
}

impl<T> FanIn<T> {
    pub fn get(&self, source_number: u32) -> Option<&T> {
        self.results.get(&source_number)
    }

    pub fn into_ordered(self) -> Vec<T> {
        self.results.into_values().collect()
    }
}

pub struct FanOutCoordinator<'a> {
    executor: &'a StepExecutor,
    max_parallel: usize,
}

impl<'a> FanOutCoordinator<'a> {
    /// `max_parallel == 0` lets every item run at once.
    pub fn new(executor: &'a StepExecutor, max_parallel: usize) -> Self {
        Self {
            executor,
            max_parallel,
        }
    }

    pub async fn fan_out<T, F, Fut>(
        &self,
        run_id: &str,
        stage: &str,
        sources: &[Source],
        work: F,
    ) -> Result<FanIn<T>, EngineError>
    where
        T: SourceKeyed + Serialize + DeserializeOwned,
        F: Fn(Source) -> Fut,
        Fut: Future<Output = Result<StepOutput<T>, StepError>>,
    {
        let distinct: BTreeSet<u32> = sources.iter().map(|s| s.number).collect();
        if distinct.len() != sources.len() {
            return Err(EngineError::FanIn {
                stage: stage.to_string(),
                message: "source numbers are not unique".to_string(),
            });
        }

        let permits = if self.max_parallel == 0 {
            sources.len().max(1)
        } else {
            self.max_parallel
        };
        let semaphore = Semaphore::new(permits);
        info!(run_id, stage, items = sources.len(), max_parallel = permits, "fanning out");

        let work = &work;
        let semaphore = &semaphore;
        let pending = sources.iter().map(|source| async move {
            let number = source.number;
            let outcome = match semaphore.acquire().await {
                Ok(_permit) => {
                    let name = item_step_name(stage, number);
                    self.executor
                        .execute(run_id, &name, || work(source.clone()))
                        .await
                }
                Err(_) => Err(EngineError::FanIn {
                    stage: stage.to_string(),
                    message: "concurrency limiter closed".to_string(),
                }),
            };
            (number, outcome)
        });

        // Wait for every item, even after one fails, so siblings finish and
        // stay memoized for the retry.
        let mut outcomes = join_all(pending).await;
        outcomes.sort_by_key(|(number, _)| *number);

        let mut results = BTreeMap::new();
        let mut usage = Vec::new();
        let mut first_error = None;
        for (number, outcome) in outcomes {
            match outcome {
                Ok(step) => {
                    let StepResult {
                        value, usage: item_usage, ..
                    } = step;
                    let declared = value.source_number();
                    if declared != number {
                        return Err(EngineError::FanIn {
                            stage: stage.to_string(),
                            message: format!(
                                "item for source {} reported source {}",
                                number, declared
                            ),
                        });
                    }
                    usage.extend(item_usage);
                    results.insert(declared, value);
                }
                Err(err) => {
                    warn!(run_id, stage, source = number, error = %err, "fan-out item failed");
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(FanIn { results, usage }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde::Deserialize;

    use super::*;
    use crate::testing::{fast_policy, seeded_run};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Facts {
        source_number: u32,
        facts: String,
    }

    impl SourceKeyed for Facts {
        fn source_number(&self) -> u32 {
            self.source_number
        }
    }

    async fn load_sources(db: &crate::store::DbHandle) -> Vec<Source> {
        db.call(|db| db.load_sources("article-1")).await.unwrap()
    }

    #[tokio::test]
    async fn test_results_keyed_by_source_not_completion_order() {
        let (db, run) = seeded_run(4, false).await;
        let sources = load_sources(&db).await;
        let executor = StepExecutor::new(db, fast_policy(1));
        let coordinator = FanOutCoordinator::new(&executor, 0);

        let fan_in = coordinator
            .fan_out(&run.id, "extract-facts", &sources, |source| async move {
                // Later sources finish first.
                let delay = 10 * (5 - source.number as u64);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(StepOutput::new(
                    Facts {
                        source_number: source.number,
                        facts: format!("facts from {}", source.attribution),
                    },
                    vec![UsageRecord::new("claude-sonnet-4", source.number as i64, 1)],
                ))
            })
            .await
            .unwrap();

        assert_eq!(fan_in.results.len(), 4);
        for n in 1..=4 {
            assert_eq!(fan_in.get(n).unwrap().facts, format!("facts from Outlet {}", n));
        }
        let inputs: Vec<i64> = fan_in.usage.iter().map(|u| u.input_tokens).collect();
        assert_eq!(inputs, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_failed_item_fails_fan_out_but_siblings_stay_memoized() {
        let (db, run) = seeded_run(3, false).await;
        let sources = load_sources(&db).await;
        let executor = StepExecutor::new(db.clone(), fast_policy(1));
        let coordinator = FanOutCoordinator::new(&executor, 0);
        let calls = Arc::new(AtomicUsize::new(0));

        let flaky = |fail_on: Option<u32>| {
            let calls = calls.clone();
            move |source: Source| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if Some(source.number) == fail_on {
                        return Err(StepError::non_retriable("provider rejected request"));
                    }
                    Ok(StepOutput::new(
                        Facts {
                            source_number: source.number,
                            facts: "ok".into(),
                        },
                        vec![],
                    ))
                }
            }
        };

        let err = coordinator
            .fan_out(&run.id, "extract-facts", &sources, flaky(Some(2)))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Step { ref step, .. } if step == "extract-facts-source-2"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let rid = run.id.clone();
        let steps = db.call(move |db| db.list_steps(&rid)).await.unwrap();
        assert_eq!(steps.len(), 2);

        // Re-running only executes the missing item.
        let fan_in = coordinator
            .fan_out(&run.id, "extract-facts", &sources, flaky(None))
            .await
            .unwrap();
        assert_eq!(fan_in.results.len(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_mismatched_source_number_is_rejected() {
        let (db, run) = seeded_run(2, false).await;
        let sources = load_sources(&db).await;
        let executor = StepExecutor::new(db, fast_policy(1));
        let coordinator = FanOutCoordinator::new(&executor, 0);

        let err = coordinator
            .fan_out(&run.id, "extract-facts-conditional", &sources, |_source| async move {
                Ok(StepOutput::new(
                    Facts {
                        source_number: 1,
                        facts: "always one".into(),
                    },
                    vec![],
                ))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::FanIn { .. }));
    }

    #[tokio::test]
    async fn test_max_parallel_bounds_concurrency() {
        let (db, run) = seeded_run(5, false).await;
        let sources = load_sources(&db).await;
        let executor = StepExecutor::new(db, fast_policy(1));
        let coordinator = FanOutCoordinator::new(&executor, 2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        coordinator
            .fan_out(&run.id, "extract-facts", &sources, |source| {
                let active = active.clone();
                let peak = peak.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(StepOutput::new(
                        Facts {
                            source_number: source.number,
                            facts: String::new(),
                        },
                        vec![],
                    ))
                }
            })
            .await
            .unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_duplicate_source_numbers_are_rejected() {
        let (db, run) = seeded_run(2, false).await;
        let mut sources = load_sources(&db).await;
        sources[1].number = 1;
        let executor = StepExecutor::new(db, fast_policy(1));
        let coordinator = FanOutCoordinator::new(&executor, 0);

        let err = coordinator
            .fan_out(&run.id, "extract-facts", &sources, |source| async move {
                Ok(StepOutput::new(
                    Facts {
                        source_number: source.number,
                        facts: String::new(),
                    },
                    vec![],
                ))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::FanIn { .. }));
    }
}
