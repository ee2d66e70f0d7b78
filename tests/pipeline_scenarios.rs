//! Whole-run scenarios against an in-memory database through the public API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use draftline::ai::{
    GenerateRequest, Generated, LanguageModel, OfflineModel, OutputSchema, StructuredGenerated,
};
use draftline::engine::RetryPolicy;
use draftline::errors::{AiError, EngineError};
use draftline::notify::{CompletionEmail, LogNotifier, Notifier};
use draftline::pipeline::{PipelineController, PipelineSettings};
use draftline::runtime::Dispatcher;
use draftline::store::models::*;
use draftline::store::{DbHandle, DraftDb};

const DRAFT_PROMPT: &str = "Write the article following the outline.";

fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        attempt_timeout: Duration::from_secs(5),
    }
}

fn source(n: usize, verbatim: bool) -> NewSource {
    NewSource {
        attribution: Some(format!("Wire {}", n)),
        url: None,
        description: None,
        text: format!("Source {} reports the harbour expansion was approved.", n),
        is_primary: n == 1,
        is_verbatim: verbatim,
        is_base: false,
    }
}

fn seeded_db(sources: usize, verbatim: bool) -> DbHandle {
    seed((1..=sources).map(|n| source(n, verbatim)).collect(), None)
}

fn seed(sources: Vec<NewSource>, headline: Option<&str>) -> DbHandle {
    let db = DbHandle::new(DraftDb::new_in_memory().unwrap());
    {
        let guard = db.lock_sync().unwrap();
        guard
            .upsert_user(&User {
                id: "user-1".into(),
                email: "editor@example.com".into(),
                name: "Editor".into(),
            })
            .unwrap();
        guard
            .import_article(&NewArticle {
                id: "article-1".into(),
                org_id: "org-1".into(),
                created_by_user_id: Some("user-1".into()),
                slug: "harbour".into(),
                version: 2,
                headline: headline.map(str::to_string),
                instructions: String::new(),
                sources,
            })
            .unwrap();
    }
    db
}

fn event(kind: WorkflowKind) -> TriggerEvent {
    TriggerEvent {
        id: "event-1".into(),
        kind,
        article_id: "article-1".into(),
        user_id: "user-1".into(),
        org_id: "org-1".into(),
        length_range: LengthRange::Medium,
        number_of_blobs: 3,
        model_tier: ModelTier::Claude45,
        verbose: false,
    }
}

fn controller(db: &DbHandle, model: Arc<dyn LanguageModel>, max_parallel: usize) -> PipelineController {
    controller_with(db, model, Arc::new(LogNotifier), max_parallel)
}

fn controller_with(
    db: &DbHandle,
    model: Arc<dyn LanguageModel>,
    notifier: Arc<dyn Notifier>,
    max_parallel: usize,
) -> PipelineController {
    PipelineController::new(
        db.clone(),
        policy(3),
        model,
        notifier,
        PipelineSettings {
            max_parallel,
            ..Default::default()
        },
    )
}

/// Keeps every email it is handed and fails delivery when `fail` is set.
#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<CompletionEmail>>,
    fail: bool,
}

#[async_trait]
impl Notifier for Outbox {
    async fn send_completion(&self, email: &CompletionEmail) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(email.clone());
        if self.fail {
            anyhow::bail!("smtp down");
        }
        Ok(())
    }
}

/// Offline answers, counting every call and failing the draft prompt when
/// `fail_draft` is set.
#[derive(Default)]
struct Counting {
    calls: AtomicUsize,
    fail_draft: bool,
}

#[async_trait]
impl LanguageModel for Counting {
    async fn generate(&self, request: &GenerateRequest) -> Result<Generated, AiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_draft && request.prompt.user.starts_with(DRAFT_PROMPT) {
            return Err(AiError::Http {
                provider: "anthropic",
                status: 529,
                body: "overloaded".into(),
            });
        }
        OfflineModel::new().generate(request).await
    }

    async fn generate_structured(
        &self,
        request: &GenerateRequest,
        schema: &OutputSchema,
    ) -> Result<StructuredGenerated, AiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        OfflineModel::new().generate_structured(request, schema).await
    }
}

/// Answers later for lower source numbers, so fan-out items finish in
/// reverse order.
struct ReverseOrder;

#[async_trait]
impl LanguageModel for ReverseOrder {
    async fn generate(&self, request: &GenerateRequest) -> Result<Generated, AiError> {
        for n in 1..=4u64 {
            if request.prompt.user.contains(&format!("<source number=\"{}\"", n)) {
                tokio::time::sleep(Duration::from_millis((5 - n) * 20)).await;
                break;
            }
        }
        OfflineModel::new().generate(request).await
    }

    async fn generate_structured(
        &self,
        request: &GenerateRequest,
        schema: &OutputSchema,
    ) -> Result<StructuredGenerated, AiError> {
        OfflineModel::new().generate_structured(request, schema).await
    }
}

fn usage_sum(db: &DraftDb, run_id: &str) -> (i64, i64, i64) {
    db.list_usage_records(run_id)
        .unwrap()
        .iter()
        .fold((0, 0, 0), |(i, o, c), p| {
            (i + p.usage.input_tokens, o + p.usage.output_tokens, c + p.cost_nanos)
        })
}

#[tokio::test]
async fn digestion_happy_path_completes_with_content() {
    let db = seeded_db(1, false);
    let dispatcher = Dispatcher::new(controller(&db, Arc::new(OfflineModel::new()), 0));
    let totals = dispatcher
        .trigger_and_wait(&event(WorkflowKind::Digestion))
        .await
        .unwrap();

    assert_eq!(totals.status, RunStatus::Completed);
    assert!(totals.input_tokens > 0);
    assert!(totals.cost_nanos > 0);

    let guard = db.lock_sync().unwrap();
    let content = guard.get_final_content("article-1").unwrap().unwrap();
    assert!(!content.headline.is_empty());
    assert!(!content.body.is_empty());
    assert_eq!(content.blobs.len(), 3);

    let (input, output, cost) = usage_sum(&guard, &totals.run_id);
    assert_eq!((input, output, cost), (totals.input_tokens, totals.output_tokens, totals.cost_nanos));

    let history = guard.status_history(&totals.run_id).unwrap();
    assert!(history.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn verbatim_digestion_reports_exact_markers() {
    let db = seeded_db(1, true);
    let dispatcher = Dispatcher::new(controller(&db, Arc::new(OfflineModel::new()), 0));
    let totals = dispatcher
        .trigger_and_wait(&event(WorkflowKind::Digestion))
        .await
        .unwrap();

    let history = db.lock_sync().unwrap().status_history(&totals.run_id).unwrap();
    assert_eq!(
        history,
        vec![
            RunStatus::Pending,
            RunStatus::Started,
            RunStatus::Progress30,
            RunStatus::Progress60,
            RunStatus::Progress80,
            RunStatus::Completed,
        ]
    );
}

#[tokio::test]
async fn aggregation_without_sources_fails_before_any_run() {
    let db = seeded_db(0, false);
    let dispatcher = Dispatcher::new(controller(&db, Arc::new(OfflineModel::new()), 0));
    let err = dispatcher
        .trigger(&event(WorkflowKind::Aggregation))
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert!(matches!(err, EngineError::Validation(_)));
    let guard = db.lock_sync().unwrap();
    assert!(guard.latest_run_for_article("article-1").unwrap().is_none());
    assert!(guard.get_event("event-1").unwrap().is_none());
}

#[tokio::test]
async fn exhausted_draft_fails_run_with_prior_usage() {
    let db = seeded_db(1, false);
    let model = Arc::new(Counting {
        fail_draft: true,
        ..Default::default()
    });
    let dispatcher = Dispatcher::new(controller(&db, model, 0));
    let err = dispatcher
        .trigger_and_wait(&event(WorkflowKind::Digestion))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Exhausted { ref step, attempts: 3, .. } if step == "draft-article"
    ));

    let guard = db.lock_sync().unwrap();
    let run = guard.latest_run_for_article("article-1").unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.cost_nanos > 0);
    let (_, _, cost) = usage_sum(&guard, &run.id);
    assert_eq!(cost, run.cost_nanos);

    let history = guard.status_history(&run.id).unwrap();
    assert!(!history.contains(&RunStatus::Completed));
    assert_eq!(history[history.len() - 2], RunStatus::Progress40);
    assert_eq!(history.last(), Some(&RunStatus::Failed));
    assert!(guard.get_final_content("article-1").unwrap().is_none());
}

#[tokio::test]
async fn interrupted_run_resumes_without_repeating_work() {
    let db = seeded_db(1, false);
    let pipeline = controller(&db, Arc::new(OfflineModel::new()), 0);
    let run = pipeline.prepare(&event(WorkflowKind::Digestion)).await.unwrap();

    // First attempt dies at the draft; the run is left mid-flight.
    let failing = controller(
        &db,
        Arc::new(Counting {
            fail_draft: true,
            ..Default::default()
        }),
        0,
    );
    assert!(failing.drive(&run).await.is_err());
    let before = db.lock_sync().unwrap().run_totals(&run.id).unwrap().unwrap();
    assert_eq!(before.status, RunStatus::Progress40);

    // Resuming only calls the model for draft, revise and attribution.
    let counting = Arc::new(Counting::default());
    let totals = controller(&db, counting.clone(), 0).drive(&run).await.unwrap();
    assert_eq!(totals.status, RunStatus::Completed);
    assert_eq!(counting.calls.load(Ordering::SeqCst), 3);

    // Driving a finished run again replays everything.
    let replay = Arc::new(Counting::default());
    let again = controller(&db, replay.clone(), 0).drive(&run).await.unwrap();
    assert_eq!(replay.calls.load(Ordering::SeqCst), 0);
    assert_eq!(again, totals);

    let guard = db.lock_sync().unwrap();
    let (input, output, cost) = usage_sum(&guard, &run.id);
    assert_eq!((input, output, cost), (totals.input_tokens, totals.output_tokens, totals.cost_nanos));
}

#[tokio::test]
async fn fan_out_results_follow_source_numbers() {
    let db = seeded_db(4, false);
    let dispatcher = Dispatcher::new(controller(&db, Arc::new(ReverseOrder), 0));
    let totals = dispatcher
        .trigger_and_wait(&event(WorkflowKind::Aggregation))
        .await
        .unwrap();
    assert_eq!(totals.status, RunStatus::Completed);

    let steps = db.lock_sync().unwrap().list_steps(&totals.run_id).unwrap();
    for n in 1..=4 {
        let name = format!("extract-facts-source-{}", n);
        let item = steps.iter().find(|s| s.step_name == name).unwrap();
        assert_eq!(item.output["source_number"], n);
        let facts = item.output["facts"].as_str().unwrap();
        assert!(facts.contains(&format!("number=\"{}\"", n)), "{}", facts);
    }

    let combined = steps
        .iter()
        .find(|s| s.step_name == "extract-facts")
        .map(|s| s.output.clone());
    assert!(combined.is_none(), "fan-out stages record per-item steps only");
}

#[tokio::test]
async fn duplicate_event_maps_to_one_run() {
    let db = seeded_db(1, false);
    let dispatcher = Dispatcher::new(controller(&db, Arc::new(OfflineModel::new()), 0));
    let first = dispatcher
        .trigger_and_wait(&event(WorkflowKind::Digestion))
        .await
        .unwrap();
    let second = dispatcher
        .trigger_and_wait(&event(WorkflowKind::Digestion))
        .await
        .unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn blank_source_fails_before_any_run() {
    let mut blank = source(2, false);
    blank.text = "   ".into();
    let db = seed(vec![source(1, false), blank, source(3, false)], None);
    let dispatcher = Dispatcher::new(controller(&db, Arc::new(OfflineModel::new()), 0));
    let err = dispatcher
        .trigger(&event(WorkflowKind::Aggregation))
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert!(matches!(err, EngineError::Validation(ref msg) if msg == "Source 2 has no content to process"));
    let guard = db.lock_sync().unwrap();
    assert!(guard.latest_run_for_article("article-1").unwrap().is_none());
    assert!(guard.get_event("event-1").unwrap().is_none());
}

#[tokio::test]
async fn failed_notification_leaves_run_completed() {
    let db = seeded_db(1, false);
    let outbox = Arc::new(Outbox {
        fail: true,
        ..Default::default()
    });
    let dispatcher = Dispatcher::new(controller_with(
        &db,
        Arc::new(OfflineModel::new()),
        outbox.clone(),
        0,
    ));
    let totals = dispatcher
        .trigger_and_wait(&event(WorkflowKind::Digestion))
        .await
        .unwrap();
    assert_eq!(totals.status, RunStatus::Completed);
    assert_eq!(outbox.sent.lock().unwrap().len(), 1);

    let guard = db.lock_sync().unwrap();
    let run = guard.latest_run_for_article("article-1").unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert!(guard.get_final_content("article-1").unwrap().is_some());

    let steps = guard.list_steps(&run.id).unwrap();
    let notify = steps
        .iter()
        .find(|s| s.step_name == "send-completion-email")
        .unwrap();
    assert!(!notify.success);
    assert_eq!(notify.output["delivered"], false);
    assert!(notify.output["error"].as_str().unwrap().contains("smtp down"));
}

#[tokio::test]
async fn user_headline_replaces_generated_one() {
    let db = seed(vec![source(1, false)], Some("Mine"));
    let outbox = Arc::new(Outbox::default());
    let dispatcher = Dispatcher::new(controller_with(
        &db,
        Arc::new(OfflineModel::new()),
        outbox.clone(),
        0,
    ));
    let totals = dispatcher
        .trigger_and_wait(&event(WorkflowKind::Digestion))
        .await
        .unwrap();
    assert_eq!(totals.status, RunStatus::Completed);

    let content = db
        .lock_sync()
        .unwrap()
        .get_final_content("article-1")
        .unwrap()
        .unwrap();
    assert_eq!(content.headline, "Mine");

    let sent = outbox.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Article Complete: Mine version 2");
}

#[tokio::test]
async fn verbose_aggregation_logs_and_completes() {
    let db = seeded_db(3, false);
    let dispatcher = Dispatcher::new(controller(&db, Arc::new(OfflineModel::new()), 2));
    let totals = dispatcher
        .trigger_and_wait(&TriggerEvent {
            verbose: true,
            ..event(WorkflowKind::Aggregation)
        })
        .await
        .unwrap();
    assert_eq!(totals.status, RunStatus::Completed);

    let guard = db.lock_sync().unwrap();
    let run = guard.latest_run_for_article("article-1").unwrap().unwrap();
    assert!(run.verbose);
    assert!(guard.get_final_content("article-1").unwrap().unwrap().rip_report.is_some());
}
