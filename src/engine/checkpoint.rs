use tracing::info;

use super::usage::{UsageRecord, cost_nanos};
use crate::errors::EngineError;
use crate::store::DbHandle;
use crate::store::models::{PricedUsage, RunStatus, RunTotals};

/// Single entry point for writing run progress.
///
/// Each call prices the usage deltas and hands them to one database
/// transaction that folds them into the run totals and advances the status
/// marker. `key` names the checkpoint; replaying a key never folds its usage
/// a second time.
#[derive(Clone)]
pub struct Checkpointer {
    db: DbHandle,
}

impl Checkpointer {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    pub async fn checkpoint(
        &self,
        run_id: &str,
        key: &str,
        status: RunStatus,
        usage: &[UsageRecord],
    ) -> Result<RunTotals, EngineError> {
        let deltas: Vec<PricedUsage> = usage
            .iter()
            .map(|u| PricedUsage {
                usage: u.clone(),
                cost_nanos: cost_nanos(u),
            })
            .collect();

        let (rid, k) = (run_id.to_string(), key.to_string());
        let totals = self
            .db
            .call(move |db| db.apply_checkpoint(&rid, &k, status, &deltas))
            .await?;

        info!(
            run_id,
            checkpoint = key,
            status = %totals.status,
            input_tokens = totals.input_tokens,
            output_tokens = totals.output_tokens,
            cost_usd = %totals.cost_usd(),
            "checkpoint applied"
        );
        Ok(totals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::seeded_run;

    #[tokio::test]
    async fn test_totals_equal_sum_of_deltas() {
        let (db, run) = seeded_run(1, false).await;
        let checkpointer = Checkpointer::new(db);

        checkpointer
            .checkpoint(
                &run.id,
                "extract-facts",
                RunStatus::Progress10,
                &[UsageRecord::new("claude-sonnet-4-20250514", 1_000, 200)],
            )
            .await
            .unwrap();
        let totals = checkpointer
            .checkpoint(
                &run.id,
                "generate-headline",
                RunStatus::Progress30,
                &[
                    UsageRecord::new("claude-sonnet-4-20250514", 500, 100),
                    UsageRecord::new("gpt-4o", 400, 40),
                ],
            )
            .await
            .unwrap();

        assert_eq!(totals.status, RunStatus::Progress30);
        assert_eq!(totals.input_tokens, 1_900);
        assert_eq!(totals.output_tokens, 340);
        // sonnet: 1500*3000 + 300*15000 ; gpt-4o: 400*2500 + 40*10000
        assert_eq!(totals.cost_nanos, 4_500_000 + 4_500_000 + 1_000_000 + 400_000);
    }

    #[tokio::test]
    async fn test_empty_deltas_only_advance_status() {
        let (db, run) = seeded_run(1, false).await;
        let checkpointer = Checkpointer::new(db);

        let totals = checkpointer
            .checkpoint(&run.id, "started", RunStatus::Started, &[])
            .await
            .unwrap();
        assert_eq!(totals.status, RunStatus::Started);
        assert_eq!(totals.cost_nanos, 0);
    }

    #[tokio::test]
    async fn test_replayed_checkpoint_is_idempotent() {
        let (db, run) = seeded_run(1, false).await;
        let checkpointer = Checkpointer::new(db.clone());
        let usage = [UsageRecord::new("gpt-4o-mini", 1_000, 1_000)];

        let first = checkpointer
            .checkpoint(&run.id, "summarize-facts", RunStatus::Progress20, &usage)
            .await
            .unwrap();
        let second = checkpointer
            .checkpoint(&run.id, "summarize-facts", RunStatus::Progress20, &usage)
            .await
            .unwrap();
        assert_eq!(first, second);

        let rid = run.id.clone();
        let history = db.call(move |db| db.status_history(&rid)).await.unwrap();
        assert_eq!(history, vec![RunStatus::Pending, RunStatus::Progress20]);
    }
}
