//! Run commands: trigger a run, resume unfinished runs, inspect status.

use std::path::Path;

use anyhow::{Context, Result};
use draftline::runtime::Dispatcher;
use draftline::server::api::{RunStatusResponse, TriggerRequest};

use super::Workspace;

/// Accept either a path to a JSON file or the JSON text itself.
fn read_payload(payload: &str) -> Result<String> {
    let path = Path::new(payload);
    if !payload.trim_start().starts_with('{') && path.exists() {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read trigger payload: {}", path.display()))
    } else {
        Ok(payload.to_string())
    }
}

pub async fn cmd_trigger(workspace: &Workspace, payload: &str) -> Result<()> {
    let text = read_payload(payload)?;
    let request: TriggerRequest =
        serde_json::from_str(&text).context("Failed to parse trigger payload")?;
    let event = request.into_event().map_err(anyhow::Error::msg)?;

    let db = workspace.open_db()?;
    let dispatcher = Dispatcher::from_config(&workspace.config, db)?;
    let totals = dispatcher
        .trigger_and_wait(&event)
        .await
        .with_context(|| format!("{} run for article {} failed", event.kind, event.article_id))?;

    let response = RunStatusResponse::from(totals);
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

pub async fn cmd_resume(workspace: &Workspace) -> Result<()> {
    let db = workspace.open_db()?;
    let dispatcher = Dispatcher::from_config(&workspace.config, db)?;
    let handles = dispatcher.resume_pending().await?;
    if handles.is_empty() {
        println!("No unfinished runs.");
        return Ok(());
    }

    let count = handles.len();
    for handle in handles {
        handle.await.context("Run task panicked")?;
    }
    println!("Resumed {} run(s).", count);
    Ok(())
}

pub async fn cmd_status(workspace: &Workspace, article_id: &str, json: bool) -> Result<()> {
    let db = workspace.open_db()?;
    let lookup = article_id.to_string();
    let found = db
        .call(move |db| {
            let Some(run) = db.latest_run_for_article(&lookup)? else {
                return Ok(None);
            };
            let history = db.status_history(&run.id)?;
            Ok(Some((run, history)))
        })
        .await?;

    let Some((run, history)) = found else {
        anyhow::bail!("No run found for article {}", article_id);
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&RunStatusResponse::from(run.totals()))?
        );
        return Ok(());
    }

    let history: Vec<&str> = history.iter().map(|s| s.as_str()).collect();
    println!();
    println!("Run:      {}", run.id);
    println!("Article:  {}", run.article_id);
    println!("Pipeline: {} ({})", run.kind, run.branch.as_str());
    println!("Status:   {}", run.status);
    println!("Tokens:   {} in / {} out", run.input_tokens, run.output_tokens);
    println!("Cost:     ${}", run.totals().cost_usd());
    println!("History:  {}", history.join(" > "));
    println!();
    Ok(())
}
