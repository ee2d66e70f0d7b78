//! Shared fixtures for unit tests.

use std::time::Duration;

use crate::engine::step::RetryPolicy;
use crate::store::models::*;
use crate::store::{DbHandle, DraftDb};

pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        attempt_timeout: Duration::from_secs(5),
    }
}

pub fn new_source(n: usize, verbatim: bool) -> NewSource {
    NewSource {
        attribution: Some(format!("Outlet {}", n)),
        url: Some(format!("https://news.example.com/{}", n)),
        description: None,
        text: format!("Source {} reports that the council approved the budget.", n),
        is_primary: n == 1,
        is_verbatim: verbatim,
        is_base: false,
    }
}

/// An article with `sources` sources and a pending run for it.
pub async fn seeded_run(sources: usize, verbatim: bool) -> (DbHandle, Run) {
    let db = DbHandle::new(DraftDb::new_in_memory().unwrap());
    let run = db
        .call(move |db| {
            db.import_article(&NewArticle {
                id: "article-1".into(),
                org_id: "org-1".into(),
                created_by_user_id: Some("user-1".into()),
                slug: "council-budget".into(),
                version: 1,
                headline: None,
                instructions: String::new(),
                sources: (1..=sources).map(|n| new_source(n, verbatim)).collect(),
            })?;
            let event = TriggerEvent {
                id: "event-1".into(),
                kind: if sources > 1 {
                    WorkflowKind::Aggregation
                } else {
                    WorkflowKind::Digestion
                },
                article_id: "article-1".into(),
                user_id: "user-1".into(),
                org_id: "org-1".into(),
                length_range: LengthRange::Short,
                number_of_blobs: 2,
                model_tier: ModelTier::Claude4,
                verbose: false,
            };
            db.record_event(&event)?;
            let branch = if verbatim { Branch::Verbatim } else { Branch::Normal };
            db.create_run("run-1", &NewRun { event, branch })
        })
        .await
        .unwrap();
    (db, run)
}
