//! Completion notifications.
//!
//! Delivery is best effort: a failed notification is logged and recorded
//! against the run but never changes its status.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::store::models::User;

pub const COMPLETION_EMAIL_PATH: &str = "/api/drafting/send-completion-email";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEmail {
    pub to: Vec<String>,
    pub subject: String,
    pub article_href: String,
    pub name: String,
    pub slug: String,
    pub version: i64,
}

impl CompletionEmail {
    pub fn new(frontend_url: &str, user: &User, slug: &str, version: i64, headline: &str) -> Self {
        Self {
            to: vec![user.email.clone()],
            subject: format!("Article Complete: {} version {}", headline, version),
            article_href: format!(
                "{}/article?slug={}&version={}",
                frontend_url.trim_end_matches('/'),
                slug,
                version
            ),
            name: user.name.clone(),
            slug: slug.to_string(),
            version,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_completion(&self, email: &CompletionEmail) -> Result<()>;
}

/// Posts the payload to the application's email endpoint.
pub struct HttpNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpNotifier {
    pub fn new(app_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}{}", app_url.trim_end_matches('/'), COMPLETION_EMAIL_PATH),
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send_completion(&self, email: &CompletionEmail) -> Result<()> {
        self.client
            .post(&self.endpoint)
            .json(email)
            .send()
            .await
            .context("Failed to send completion email request")?
            .error_for_status()
            .context("Completion email endpoint returned error status")?;
        info!(slug = %email.slug, version = email.version, "completion email sent");
        Ok(())
    }
}

/// Used when notifications are disabled: logs the payload instead.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_completion(&self, email: &CompletionEmail) -> Result<()> {
        info!(
            to = ?email.to,
            subject = %email.subject,
            href = %email.article_href,
            "notifications disabled; completion email not sent"
        );
        Ok(())
    }
}
