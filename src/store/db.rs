use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};

use super::models::*;
use crate::engine::usage::UsageRecord;

/// Async-safe handle to the run database.
///
/// Wraps `DraftDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`. The mutex also serializes
/// checkpoint transactions across concurrently executing runs.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<DraftDb>>,
}

impl DbHandle {
    pub fn new(db: DraftDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&DraftDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. Only for CLI commands,
    /// startup and tests; never from a hot async path.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, DraftDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

pub struct DraftDb {
    conn: Connection,
}

impl DraftDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS users (
                    id TEXT PRIMARY KEY,
                    email TEXT NOT NULL,
                    name TEXT NOT NULL DEFAULT ''
                );

                CREATE TABLE IF NOT EXISTS articles (
                    id TEXT PRIMARY KEY,
                    org_id TEXT NOT NULL,
                    created_by_user_id TEXT,
                    slug TEXT NOT NULL,
                    version INTEGER NOT NULL DEFAULT 1,
                    headline TEXT,
                    instructions TEXT NOT NULL DEFAULT '',
                    final_headline TEXT,
                    final_blobs TEXT,
                    final_body TEXT,
                    rich_content TEXT,
                    rip_report TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS article_sources (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    article_id TEXT NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
                    sort_order INTEGER NOT NULL DEFAULT 0,
                    attribution TEXT,
                    url TEXT,
                    description TEXT,
                    text TEXT NOT NULL,
                    is_primary INTEGER NOT NULL DEFAULT 0,
                    is_verbatim INTEGER NOT NULL DEFAULT 0,
                    is_base INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS events (
                    id TEXT PRIMARY KEY,
                    kind TEXT NOT NULL,
                    article_id TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    received_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS runs (
                    id TEXT PRIMARY KEY,
                    event_id TEXT NOT NULL UNIQUE REFERENCES events(id),
                    article_id TEXT NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
                    user_id TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    branch TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    model_tier TEXT NOT NULL,
                    length_range TEXT NOT NULL,
                    number_of_blobs INTEGER NOT NULL,
                    verbose INTEGER NOT NULL DEFAULT 0,
                    input_tokens INTEGER NOT NULL DEFAULT 0,
                    output_tokens INTEGER NOT NULL DEFAULT 0,
                    cost_nanos INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS run_status_history (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                    status TEXT NOT NULL,
                    recorded_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS step_results (
                    run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                    step_name TEXT NOT NULL,
                    output TEXT NOT NULL,
                    usage TEXT NOT NULL DEFAULT '[]',
                    success INTEGER NOT NULL DEFAULT 1,
                    attempts INTEGER NOT NULL DEFAULT 1,
                    recorded_at TEXT NOT NULL DEFAULT (datetime('now')),
                    PRIMARY KEY (run_id, step_name)
                );

                CREATE TABLE IF NOT EXISTS checkpoints (
                    run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                    checkpoint_key TEXT NOT NULL,
                    status TEXT NOT NULL,
                    applied_at TEXT NOT NULL DEFAULT (datetime('now')),
                    PRIMARY KEY (run_id, checkpoint_key)
                );

                CREATE TABLE IF NOT EXISTS usage_records (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                    checkpoint_key TEXT NOT NULL,
                    model TEXT NOT NULL,
                    input_tokens INTEGER NOT NULL,
                    output_tokens INTEGER NOT NULL,
                    cost_nanos INTEGER NOT NULL,
                    recorded_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_article_sources_article ON article_sources(article_id);
                CREATE INDEX IF NOT EXISTS idx_runs_article ON runs(article_id);
                CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status);
                CREATE INDEX IF NOT EXISTS idx_status_history_run ON run_status_history(run_id);
                CREATE INDEX IF NOT EXISTS idx_usage_records_run ON usage_records(run_id);
                ",
            )
            .context("Failed to run migrations")?;
        Ok(())
    }

    // ── Users ─────────────────────────────────────────────────────────

    pub fn upsert_user(&self, user: &User) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO users (id, email, name) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET email = excluded.email, name = excluded.name",
                params![user.id, user.email, user.name],
            )
            .context("Failed to upsert user")?;
        Ok(())
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT id, email, name FROM users WHERE id = ?1",
                params![id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        email: row.get(1)?,
                        name: row.get(2)?,
                    })
                },
            )
            .optional()
            .context("Failed to query user")
    }

    // ── Articles & sources ────────────────────────────────────────────

    /// Insert an article together with its ordered sources.
    pub fn import_article(&self, article: &NewArticle) -> Result<Article> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        tx.execute(
            "INSERT INTO articles (id, org_id, created_by_user_id, slug, version, headline, instructions)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                article.id,
                article.org_id,
                article.created_by_user_id,
                article.slug,
                article.version,
                article.headline,
                article.instructions,
            ],
        )
        .context("Failed to insert article")?;

        for (position, source) in article.sources.iter().enumerate() {
            tx.execute(
                "INSERT INTO article_sources (article_id, sort_order, attribution, url, description, text, is_primary, is_verbatim, is_base)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    article.id,
                    position as i64,
                    source.attribution,
                    source.url,
                    source.description,
                    source.text,
                    source.is_primary,
                    source.is_verbatim,
                    source.is_base,
                ],
            )
            .context("Failed to insert article source")?;
        }

        tx.commit().context("Failed to commit article import")?;
        self.get_article(&article.id)?
            .context("Article not found after import")
    }

    pub fn get_article(&self, id: &str) -> Result<Option<Article>> {
        self.conn
            .query_row(
                "SELECT id, org_id, created_by_user_id, slug, version, headline, instructions, final_headline, final_body, created_at
                 FROM articles WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Article {
                        id: row.get(0)?,
                        org_id: row.get(1)?,
                        created_by_user_id: row.get(2)?,
                        slug: row.get(3)?,
                        version: row.get(4)?,
                        headline: row.get(5)?,
                        instructions: row.get(6)?,
                        final_headline: row.get(7)?,
                        final_body: row.get(8)?,
                        created_at: row.get(9)?,
                    })
                },
            )
            .optional()
            .context("Failed to query article")
    }

    /// Sources in editor order, numbered from 1.
    pub fn load_sources(&self, article_id: &str) -> Result<Vec<Source>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT attribution, url, description, text, is_primary, is_verbatim, is_base
                 FROM article_sources WHERE article_id = ?1 ORDER BY sort_order, id",
            )
            .context("Failed to prepare load_sources")?;
        let rows = stmt
            .query_map(params![article_id], |row| {
                Ok(SourceRow {
                    attribution: row.get(0)?,
                    url: row.get(1)?,
                    description: row.get(2)?,
                    text: row.get(3)?,
                    is_primary: row.get(4)?,
                    is_verbatim: row.get(5)?,
                    is_base: row.get(6)?,
                })
            })
            .context("Failed to query sources")?;

        let mut sources = Vec::new();
        for (index, row) in rows.enumerate() {
            let row = row.context("Failed to read source row")?;
            sources.push(row.into_source(index as u32 + 1));
        }
        Ok(sources)
    }

    pub fn load_instructions(&self, article_id: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT instructions FROM articles WHERE id = ?1",
                params![article_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query article instructions")
    }

    pub fn persist_final_content(&self, article_id: &str, content: &FinalContent) -> Result<bool> {
        let rip_report = content
            .rip_report
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to serialize rip report")?;
        let count = self
            .conn
            .execute(
                "UPDATE articles SET final_headline = ?1, final_blobs = ?2, final_body = ?3, rich_content = ?4, rip_report = ?5, updated_at = datetime('now')
                 WHERE id = ?6",
                params![
                    content.headline,
                    content.blobs.join("\n"),
                    content.body,
                    content.rich_content,
                    rip_report,
                    article_id,
                ],
            )
            .context("Failed to persist final content")?;
        Ok(count > 0)
    }

    pub fn get_final_content(&self, article_id: &str) -> Result<Option<FinalContent>> {
        let row = self
            .conn
            .query_row(
                "SELECT final_headline, final_blobs, final_body, rich_content, rip_report FROM articles WHERE id = ?1",
                params![article_id],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query final content")?;

        match row {
            Some((Some(headline), blobs, Some(body), rich_content, rip_report)) => {
                let rip_report = rip_report
                    .map(|r| serde_json::from_str(&r))
                    .transpose()
                    .context("Failed to parse stored rip report")?;
                Ok(Some(FinalContent {
                    headline,
                    blobs: blobs
                        .map(|b| b.lines().map(str::to_string).collect())
                        .unwrap_or_default(),
                    body,
                    rich_content,
                    rip_report,
                }))
            }
            _ => Ok(None),
        }
    }

    // ── Events ────────────────────────────────────────────────────────

    pub fn record_event(&self, event: &TriggerEvent) -> Result<()> {
        let payload = serde_json::to_string(event).context("Failed to serialize event")?;
        self.conn
            .execute(
                "INSERT OR IGNORE INTO events (id, kind, article_id, payload) VALUES (?1, ?2, ?3, ?4)",
                params![event.id, event.kind.as_str(), event.article_id, payload],
            )
            .context("Failed to record event")?;
        Ok(())
    }

    pub fn get_event(&self, id: &str) -> Result<Option<TriggerEvent>> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM events WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query event")?;
        payload
            .map(|p| serde_json::from_str(&p).context("Failed to parse stored event"))
            .transpose()
    }

    // ── Runs ──────────────────────────────────────────────────────────

    /// Create the run for an event, or return the existing one if the event
    /// was already processed.
    pub fn create_run(&self, run_id: &str, new_run: &NewRun) -> Result<Run> {
        if let Some(existing) = self.find_run_by_event(&new_run.event.id)? {
            return Ok(existing);
        }

        let event = &new_run.event;
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "INSERT INTO runs (id, event_id, article_id, user_id, kind, branch, status, model_tier, length_range, number_of_blobs, verbose)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?8, ?9, ?10)",
            params![
                run_id,
                event.id,
                event.article_id,
                event.user_id,
                event.kind.as_str(),
                new_run.branch.as_str(),
                event.model_tier.as_str(),
                event.length_range.as_str(),
                event.number_of_blobs,
                event.verbose,
            ],
        )
        .context("Failed to insert run")?;
        tx.execute(
            "INSERT INTO run_status_history (run_id, status) VALUES (?1, 'pending')",
            params![run_id],
        )
        .context("Failed to record initial status")?;
        tx.commit().context("Failed to commit run creation")?;

        self.get_run(run_id)?.context("Run not found after insert")
    }

    pub fn get_run(&self, id: &str) -> Result<Option<Run>> {
        self.query_one_run(&format!("{} WHERE id = ?1", RUN_SELECT), id)
    }

    pub fn find_run_by_event(&self, event_id: &str) -> Result<Option<Run>> {
        self.query_one_run(&format!("{} WHERE event_id = ?1", RUN_SELECT), event_id)
    }

    pub fn latest_run_for_article(&self, article_id: &str) -> Result<Option<Run>> {
        self.query_one_run(
            &format!(
                "{} WHERE article_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                RUN_SELECT
            ),
            article_id,
        )
    }

    /// Status and usage of the most recent run for an article.
    pub fn read_run_status(&self, article_id: &str) -> Result<Option<RunTotals>> {
        Ok(self.latest_run_for_article(article_id)?.map(|r| r.totals()))
    }

    /// Runs that have neither completed nor failed, oldest first.
    pub fn list_resumable_runs(&self) -> Result<Vec<Run>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{} WHERE status NOT IN ('completed', 'failed') ORDER BY rowid",
                RUN_SELECT
            ))
            .context("Failed to prepare list_resumable_runs")?;
        let rows = stmt
            .query_map([], map_run_row)
            .context("Failed to query resumable runs")?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row.context("Failed to read run row")?.into_run()?);
        }
        Ok(runs)
    }

    fn query_one_run(&self, sql: &str, key: &str) -> Result<Option<Run>> {
        let row = self
            .conn
            .query_row(sql, params![key], map_run_row)
            .optional()
            .context("Failed to query run")?;
        row.map(RunRow::into_run).transpose()
    }

    pub fn run_totals(&self, run_id: &str) -> Result<Option<RunTotals>> {
        Ok(self.get_run(run_id)?.map(|r| r.totals()))
    }

    pub fn status_history(&self, run_id: &str) -> Result<Vec<RunStatus>> {
        let mut stmt = self
            .conn
            .prepare("SELECT status FROM run_status_history WHERE run_id = ?1 ORDER BY id")
            .context("Failed to prepare status_history")?;
        let rows = stmt
            .query_map(params![run_id], |row| row.get::<_, String>(0))
            .context("Failed to query status history")?;
        let mut history = Vec::new();
        for row in rows {
            let raw = row.context("Failed to read status history row")?;
            let status = RunStatus::from_str(&raw)
                .map_err(|e| anyhow::anyhow!(e))
                .context("Failed to parse status history entry")?;
            history.push(status);
        }
        Ok(history)
    }

    // ── Checkpoints ───────────────────────────────────────────────────

    /// Fold usage and advance status in one transaction.
    ///
    /// Usage is applied only the first time `key` is seen for the run. The
    /// status moves only forward and never leaves a terminal state, so a
    /// replayed checkpoint is a no-op apart from returning current totals.
    pub fn apply_checkpoint(
        &self,
        run_id: &str,
        key: &str,
        status: RunStatus,
        deltas: &[PricedUsage],
    ) -> Result<RunTotals> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        let current = current_status(&tx, run_id)?;

        let first_application = tx
            .execute(
                "INSERT OR IGNORE INTO checkpoints (run_id, checkpoint_key, status) VALUES (?1, ?2, ?3)",
                params![run_id, key, status.as_str()],
            )
            .context("Failed to record checkpoint")?
            == 1;

        if first_application {
            for delta in deltas {
                tx.execute(
                    "INSERT INTO usage_records (run_id, checkpoint_key, model, input_tokens, output_tokens, cost_nanos)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        run_id,
                        key,
                        delta.usage.model,
                        delta.usage.input_tokens,
                        delta.usage.output_tokens,
                        delta.cost_nanos,
                    ],
                )
                .context("Failed to insert usage record")?;
                tx.execute(
                    "UPDATE runs SET input_tokens = input_tokens + ?1, output_tokens = output_tokens + ?2, cost_nanos = cost_nanos + ?3, updated_at = datetime('now')
                     WHERE id = ?4",
                    params![
                        delta.usage.input_tokens,
                        delta.usage.output_tokens,
                        delta.cost_nanos,
                        run_id,
                    ],
                )
                .context("Failed to fold usage into run totals")?;
            }
        }

        if current.can_advance_to(status) {
            set_status(&tx, run_id, status)?;
        }

        tx.commit().context("Failed to commit checkpoint")?;
        self.run_totals(run_id)?
            .context("Run not found after checkpoint")
    }

    /// Mark a run failed unless it already reached a terminal state.
    pub fn mark_failed(&self, run_id: &str) -> Result<RunTotals> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let current = current_status(&tx, run_id)?;
        if !current.is_terminal() {
            set_status(&tx, run_id, RunStatus::Failed)?;
        }
        tx.commit().context("Failed to commit failure")?;
        self.run_totals(run_id)?
            .context("Run not found after marking failed")
    }

    pub fn list_usage_records(&self, run_id: &str) -> Result<Vec<PricedUsage>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT model, input_tokens, output_tokens, cost_nanos FROM usage_records WHERE run_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare list_usage_records")?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok(PricedUsage {
                    usage: UsageRecord {
                        model: row.get(0)?,
                        input_tokens: row.get(1)?,
                        output_tokens: row.get(2)?,
                    },
                    cost_nanos: row.get(3)?,
                })
            })
            .context("Failed to query usage records")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read usage record row")
    }

    // ── Step results ──────────────────────────────────────────────────

    pub fn get_step(&self, run_id: &str, step_name: &str) -> Result<Option<StepRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT run_id, step_name, output, usage, success, attempts, recorded_at
                 FROM step_results WHERE run_id = ?1 AND step_name = ?2",
                params![run_id, step_name],
                map_step_row,
            )
            .optional()
            .context("Failed to query step result")?;
        row.map(StepRow::into_step_record).transpose()
    }

    /// Persist a step result. If the step was already recorded the earlier
    /// row wins and is returned unchanged.
    pub fn insert_step(&self, record: &StepRecord) -> Result<StepRecord> {
        let output = serde_json::to_string(&record.output).context("Failed to serialize step output")?;
        let usage = serde_json::to_string(&record.usage).context("Failed to serialize step usage")?;
        self.conn
            .execute(
                "INSERT OR IGNORE INTO step_results (run_id, step_name, output, usage, success, attempts)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.run_id,
                    record.step_name,
                    output,
                    usage,
                    record.success,
                    record.attempts,
                ],
            )
            .context("Failed to insert step result")?;
        self.get_step(&record.run_id, &record.step_name)?
            .context("Step result not found after insert")
    }

    pub fn list_steps(&self, run_id: &str) -> Result<Vec<StepRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT run_id, step_name, output, usage, success, attempts, recorded_at
                 FROM step_results WHERE run_id = ?1 ORDER BY rowid",
            )
            .context("Failed to prepare list_steps")?;
        let rows = stmt
            .query_map(params![run_id], map_step_row)
            .context("Failed to query step results")?;
        let mut steps = Vec::new();
        for row in rows {
            steps.push(row.context("Failed to read step row")?.into_step_record()?);
        }
        Ok(steps)
    }
}

// ── Transaction helpers ───────────────────────────────────────────────

fn current_status(conn: &Connection, run_id: &str) -> Result<RunStatus> {
    let raw: String = conn
        .query_row(
            "SELECT status FROM runs WHERE id = ?1",
            params![run_id],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to query run status")?
        .with_context(|| format!("Run {} not found", run_id))?;
    RunStatus::from_str(&raw)
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to parse run status")
}

fn set_status(conn: &Connection, run_id: &str, status: RunStatus) -> Result<()> {
    conn.execute(
        "UPDATE runs SET status = ?1, updated_at = datetime('now') WHERE id = ?2",
        params![status.as_str(), run_id],
    )
    .context("Failed to update run status")?;
    conn.execute(
        "INSERT INTO run_status_history (run_id, status) VALUES (?1, ?2)",
        params![run_id, status.as_str()],
    )
    .context("Failed to record status history")?;
    Ok(())
}

// ── Row types ─────────────────────────────────────────────────────────

const RUN_SELECT: &str = "SELECT id, event_id, article_id, user_id, kind, branch, status, model_tier, length_range, number_of_blobs, verbose, input_tokens, output_tokens, cost_nanos, created_at, updated_at FROM runs";

struct RunRow {
    id: String,
    event_id: String,
    article_id: String,
    user_id: String,
    kind: String,
    branch: String,
    status: String,
    model_tier: String,
    length_range: String,
    number_of_blobs: u8,
    verbose: bool,
    input_tokens: i64,
    output_tokens: i64,
    cost_nanos: i64,
    created_at: String,
    updated_at: String,
}

fn map_run_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRow> {
    Ok(RunRow {
        id: row.get(0)?,
        event_id: row.get(1)?,
        article_id: row.get(2)?,
        user_id: row.get(3)?,
        kind: row.get(4)?,
        branch: row.get(5)?,
        status: row.get(6)?,
        model_tier: row.get(7)?,
        length_range: row.get(8)?,
        number_of_blobs: row.get(9)?,
        verbose: row.get(10)?,
        input_tokens: row.get(11)?,
        output_tokens: row.get(12)?,
        cost_nanos: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

impl RunRow {
    fn into_run(self) -> Result<Run> {
        let parse = |what: &str, e: String| anyhow::anyhow!(e).context(format!("Failed to parse run {}", what));
        Ok(Run {
            kind: WorkflowKind::from_str(&self.kind).map_err(|e| parse("kind", e))?,
            branch: Branch::from_str(&self.branch).map_err(|e| parse("branch", e))?,
            status: RunStatus::from_str(&self.status).map_err(|e| parse("status", e))?,
            model_tier: ModelTier::from_str(&self.model_tier).map_err(|e| parse("model tier", e))?,
            length_range: LengthRange::from_str(&self.length_range)
                .map_err(|e| parse("length range", e))?,
            id: self.id,
            event_id: self.event_id,
            article_id: self.article_id,
            user_id: self.user_id,
            number_of_blobs: self.number_of_blobs,
            verbose: self.verbose,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            cost_nanos: self.cost_nanos,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct SourceRow {
    attribution: Option<String>,
    url: Option<String>,
    description: Option<String>,
    text: String,
    is_primary: bool,
    is_verbatim: bool,
    is_base: bool,
}

impl SourceRow {
    fn into_source(self, number: u32) -> Source {
        Source {
            number,
            attribution: self
                .attribution
                .filter(|a| !a.trim().is_empty())
                .unwrap_or_else(|| "Unknown Source".to_string()),
            url: self.url.filter(|u| !u.is_empty()),
            description: self.description.unwrap_or_default(),
            text: self.text,
            flags: SourceFlags {
                is_primary_source: self.is_primary,
                copy_source_verbatim: self.is_verbatim,
                is_base_source: self.is_base,
            },
        }
    }
}

struct StepRow {
    run_id: String,
    step_name: String,
    output: String,
    usage: String,
    success: bool,
    attempts: u32,
    recorded_at: String,
}

fn map_step_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StepRow> {
    Ok(StepRow {
        run_id: row.get(0)?,
        step_name: row.get(1)?,
        output: row.get(2)?,
        usage: row.get(3)?,
        success: row.get(4)?,
        attempts: row.get(5)?,
        recorded_at: row.get(6)?,
    })
}

impl StepRow {
    fn into_step_record(self) -> Result<StepRecord> {
        let output = serde_json::from_str(&self.output)
            .with_context(|| format!("Failed to parse stored output of {}", self.step_name))?;
        let usage = serde_json::from_str(&self.usage)
            .with_context(|| format!("Failed to parse stored usage of {}", self.step_name))?;
        Ok(StepRecord {
            run_id: self.run_id,
            step_name: self.step_name,
            output,
            usage,
            success: self.success,
            attempts: self.attempts,
            recorded_at: self.recorded_at,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
