//! End-to-end tests for the draftline CLI.
//!
//! Every test works in its own temp directory with the offline provider, so
//! no network access or API keys are needed.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn draftline() -> Command {
    cargo_bin_cmd!("draftline")
}

/// Temp workspace configured for the offline provider with zero backoff.
fn offline_workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("draftline.toml"),
        r#"
[ai]
provider = "offline"

[retry]
base_delay_ms = 0
max_delay_ms = 0
"#,
    )
    .unwrap();
    dir
}

fn write_article(dir: &TempDir, id: &str, sources: usize, verbatim: bool) {
    let sources: Vec<serde_json::Value> = (1..=sources)
        .map(|n| {
            serde_json::json!({
                "attribution": format!("Outlet {}", n),
                "url": format!("https://news.example.com/{}", n),
                "text": format!("Source {} says the bridge reopens on Monday.", n),
                "isPrimary": n == 1,
                "isVerbatim": verbatim,
            })
        })
        .collect();
    let bundle = serde_json::json!({
        "users": [{"id": "user-1", "email": "editor@example.com", "name": "Editor"}],
        "articles": [{
            "id": id,
            "orgId": "org-1",
            "createdByUserId": "user-1",
            "slug": format!("{}-slug", id),
            "sources": sources,
        }],
    });
    fs::write(dir.path().join(format!("{}.json", id)), bundle.to_string()).unwrap();
    draftline()
        .arg("--dir")
        .arg(dir.path())
        .arg("import")
        .arg(dir.path().join(format!("{}.json", id)))
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("Imported article {}", id)));
}

fn trigger_payload(article_id: &str, ingestion: &str) -> String {
    serde_json::json!({
        "articleId": article_id,
        "userId": "user-1",
        "orgId": "org-1",
        "ingestionType": ingestion,
        "lengthRange": "400-550",
        "numberOfBlobs": 3,
        "modelSelection": "claude-4.5",
    })
    .to_string()
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        draftline().arg("--help").assert().success();
    }

    #[test]
    fn test_version() {
        draftline().arg("--version").assert().success();
    }

    #[test]
    fn test_db_init_creates_database() {
        let dir = TempDir::new().unwrap();
        draftline()
            .arg("--dir")
            .arg(dir.path())
            .args(["db", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Database initialized"));
        assert!(dir.path().join(".draftline/draftline.db").exists());
    }
}

// =============================================================================
// Config Tests
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_config_init_then_validate() {
        let dir = TempDir::new().unwrap();
        draftline()
            .arg("--dir")
            .arg(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created draftline.toml"));
        assert!(dir.path().join("draftline.toml").exists());

        // Second init leaves the file alone.
        draftline()
            .arg("--dir")
            .arg(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("draftline.toml"),
            "[ai]\nprovider = \"offline\"\n\n[logging]\nlevel = \"loud\"\n",
        )
        .unwrap();
        draftline()
            .arg("--dir")
            .arg(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Invalid logging.level 'loud'"));
    }

    #[test]
    fn test_config_show_prints_effective_values() {
        let dir = offline_workspace();
        draftline()
            .arg("--dir")
            .arg(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("provider = \"offline\""))
            .stdout(predicate::str::contains("max_attempts = 3"));
    }

    #[test]
    fn test_malformed_config_fails() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("draftline.toml"), "[retry\n").unwrap();
        draftline()
            .arg("--dir")
            .arg(dir.path())
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to parse draftline.toml"));
    }
}

// =============================================================================
// Run Tests
// =============================================================================

mod runs {
    use super::*;

    #[test]
    fn test_digestion_trigger_then_status() {
        let dir = offline_workspace();
        write_article(&dir, "article-d", 1, false);

        draftline()
            .arg("--dir")
            .arg(dir.path())
            .arg("trigger")
            .arg(trigger_payload("article-d", "digest"))
            .assert()
            .success()
            .stdout(predicate::str::contains("\"status\": \"completed\""));

        draftline()
            .arg("--dir")
            .arg(dir.path())
            .args(["status", "article-d"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Status:   completed"))
            .stdout(predicate::str::contains(
                "pending > started > 10% > 20% > 30% > 40% > 70% > 90% > completed",
            ));
    }

    #[test]
    fn test_verbatim_digestion_status_history() {
        let dir = offline_workspace();
        write_article(&dir, "article-v", 1, true);

        let payload = dir.path().join("trigger.json");
        fs::write(&payload, trigger_payload("article-v", "digestion")).unwrap();
        draftline()
            .arg("--dir")
            .arg(dir.path())
            .arg("trigger")
            .arg(&payload)
            .assert()
            .success();

        draftline()
            .arg("--dir")
            .arg(dir.path())
            .args(["status", "article-v"])
            .assert()
            .success()
            .stdout(predicate::str::contains(
                "History:  pending > started > 30% > 60% > 80% > completed",
            ));
    }

    #[test]
    fn test_aggregation_trigger_completes() {
        let dir = offline_workspace();
        write_article(&dir, "article-a", 3, false);

        draftline()
            .arg("--dir")
            .arg(dir.path())
            .arg("trigger")
            .arg(trigger_payload("article-a", "aggregate"))
            .assert()
            .success()
            .stdout(predicate::str::contains("\"status\": \"completed\""));

        draftline()
            .arg("--dir")
            .arg(dir.path())
            .args(["status", "article-a", "--json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"cost_usd\""));
    }

    #[test]
    fn test_aggregation_with_one_source_fails_validation() {
        let dir = offline_workspace();
        write_article(&dir, "article-x", 1, false);

        draftline()
            .arg("--dir")
            .arg(dir.path())
            .arg("trigger")
            .arg(trigger_payload("article-x", "aggregation"))
            .assert()
            .failure()
            .stderr(predicate::str::contains(
                "Aggregation pipeline requires at least 2 sources, found 1",
            ));

        draftline()
            .arg("--dir")
            .arg(dir.path())
            .args(["status", "article-x"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("No run found"));
    }

    #[test]
    fn test_trigger_missing_field_fails() {
        let dir = offline_workspace();
        draftline()
            .arg("--dir")
            .arg(dir.path())
            .arg("trigger")
            .arg(r#"{"articleId": "a", "userId": "u"}"#)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Ingestion type is required"));
    }

    #[test]
    fn test_resume_with_nothing_pending() {
        let dir = offline_workspace();
        draftline()
            .arg("--dir")
            .arg(dir.path())
            .arg("resume")
            .assert()
            .success()
            .stdout(predicate::str::contains("No unfinished runs."));
    }
}
