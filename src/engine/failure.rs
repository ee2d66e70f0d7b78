use tracing::error;

use crate::errors::EngineError;
use crate::store::DbHandle;
use crate::store::models::RunTotals;

/// Terminal hook for runs whose step retries ran out.
///
/// Reads whatever usage was last persisted, marks the run failed and returns
/// the final totals. Safe to call more than once; a completed run is left as
/// it is.
#[derive(Clone)]
pub struct FailureHandler {
    db: DbHandle,
}

impl FailureHandler {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    pub async fn on_exhausted(&self, run_id: &str) -> Result<RunTotals, EngineError> {
        let rid = run_id.to_string();
        let totals = self.db.call(move |db| db.mark_failed(&rid)).await?;
        error!(
            run_id,
            status = %totals.status,
            input_tokens = totals.input_tokens,
            output_tokens = totals.output_tokens,
            cost_usd = %totals.cost_usd(),
            "run marked failed"
        );
        Ok(totals)
    }
}
