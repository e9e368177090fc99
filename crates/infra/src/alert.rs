//! Slack failure alerter
//!
//! Posts failure notifications to an incoming-webhook URL. Emission is
//! best-effort: delivery failures are logged, never raised, and alerts are
//! rate-limited so a broken downstream does not flood the channel.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use techsync_core::Alerter;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub struct SlackAlerter {
    client: Client,
    webhook_url: String,
    min_interval: Duration,
    last_sent: Mutex<Option<Instant>>,
}

impl SlackAlerter {
    pub fn new(client: Client, webhook_url: impl Into<String>, min_interval: Duration) -> Self {
        Self { client, webhook_url: webhook_url.into(), min_interval, last_sent: Mutex::new(None) }
    }

    /// Whether enough time has passed since the last delivered alert.
    /// Claims the slot when it has.
    async fn claim_slot(&self) -> bool {
        let mut last = self.last_sent.lock().await;
        match *last {
            Some(at) if at.elapsed() < self.min_interval => false,
            _ => {
                *last = Some(Instant::now());
                true
            }
        }
    }
}

#[async_trait]
impl Alerter for SlackAlerter {
    async fn notify_failure(&self, title: &str, details: &str) {
        if !self.claim_slot().await {
            debug!(title, "alert suppressed by rate limit");
            return;
        }

        let body = json!({ "text": format!("*{title}*\n```{details}```") });
        match self.client.post(&self.webhook_url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(title, "alert delivered");
            }
            Ok(response) => {
                warn!(title, status = %response.status(), "alert webhook rejected message");
            }
            Err(err) => {
                warn!(title, error = %err, "alert delivery failed");
            }
        }
    }
}
