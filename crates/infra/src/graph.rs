//! Microsoft Graph calendar source
//!
//! Implements `CalendarSource` over the Graph calendarView endpoints. The
//! delta variant yields a continuation link after draining all pages; the
//! plain variant backs the full-window sync mode. Pagination is followed
//! internally so the engine always sees whole batches.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use reqwest::Client;
use serde::Deserialize;
use techsync_core::{CalendarSource, ChangeBatch, SyncWindow};
use techsync_domain::{RawEvent, RawEventTime, Result, SyncError};
use tracing::debug;

use crate::auth::AccessTokenProvider;
use crate::retry::{network_error, status_error, RetryPolicy};

const OUTLOOK_TIMEZONE_HEADER: &str = r#"outlook.timezone="UTC""#;
const OUTLOOK_MAX_PAGE_SIZE_HEADER: &str = r#"odata.maxpagesize=100"#;
const OUTLOOK_ID_TYPE_HEADER: &str = r#"IdType="ImmutableId""#;

/// Calendar source backed by the Microsoft Graph API.
pub struct GraphCalendarSource {
    client: Client,
    base_url: String,
    auth: Arc<dyn AccessTokenProvider>,
    retry: RetryPolicy,
}

impl GraphCalendarSource {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        auth: Arc<dyn AccessTokenProvider>,
        retry: RetryPolicy,
    ) -> Self {
        Self { client, base_url: base_url.into(), auth, retry }
    }

    async fn get_page(&self, url: &str) -> Result<EventsPage> {
        self.retry
            .execute("graph page", || async {
                let token = self.auth.access_token().await?;
                let response = self
                    .client
                    .get(url)
                    .bearer_auth(&token)
                    .header("Prefer", OUTLOOK_TIMEZONE_HEADER)
                    .header("Prefer", OUTLOOK_MAX_PAGE_SIZE_HEADER)
                    .header("Prefer", OUTLOOK_ID_TYPE_HEADER)
                    .send()
                    .await
                    .map_err(|e| network_error("graph request", e))?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(status_error("graph request", status, &body));
                }

                response
                    .json()
                    .await
                    .map_err(|e| SyncError::Client(format!("graph response: {e}")))
            })
            .await
    }

    /// Drain every page starting from `first_url`, collecting events and
    /// the final delta link when the feed provides one.
    async fn drain(&self, first_url: String) -> Result<(Vec<RawEvent>, Option<String>)> {
        let mut events = Vec::new();
        let mut url = first_url;

        loop {
            let page = self.get_page(&url).await?;
            events.extend(page.value.into_iter().map(GraphEvent::into_raw));

            match (page.next_link, page.delta_link) {
                (Some(next), _) => url = next,
                (None, delta) => {
                    debug!(events = events.len(), has_delta = delta.is_some(), "feed drained");
                    return Ok((events, delta));
                }
            }
        }
    }

    fn window_query(&self, user_id: &str, endpoint: &str, window: &SyncWindow) -> String {
        let (from, to) = window.bounds(Utc::now());
        format!(
            "{}/users/{}/{}?startDateTime={}&endDateTime={}",
            self.base_url,
            user_id,
            endpoint,
            from.to_rfc3339_opts(SecondsFormat::Secs, true),
            to.to_rfc3339_opts(SecondsFormat::Secs, true),
        )
    }
}

#[async_trait]
impl CalendarSource for GraphCalendarSource {
    async fn fetch_changes(
        &self,
        user_id: &str,
        delta_link: Option<&str>,
        window: &SyncWindow,
    ) -> Result<ChangeBatch> {
        let first_url = match delta_link {
            Some(link) => link.to_string(),
            None => self.window_query(user_id, "calendarView/delta", window),
        };
        let (events, delta_link) = self.drain(first_url).await?;
        Ok(ChangeBatch { events, delta_link })
    }

    async fn fetch_window(&self, user_id: &str, window: &SyncWindow) -> Result<Vec<RawEvent>> {
        let (events, _) = self.drain(self.window_query(user_id, "calendarView", window)).await?;
        Ok(events)
    }
}

#[derive(Debug, Deserialize)]
struct EventsPage {
    #[serde(default)]
    value: Vec<GraphEvent>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
    #[serde(rename = "@odata.deltaLink")]
    delta_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphEvent {
    id: String,
    #[serde(rename = "iCalUId")]
    ical_uid: Option<String>,
    subject: Option<String>,
    start: Option<GraphDateTime>,
    end: Option<GraphDateTime>,
    is_all_day: Option<bool>,
    show_as: Option<String>,
    sensitivity: Option<String>,
    last_modified_date_time: Option<String>,
    /// Present on delta tombstones
    #[serde(rename = "@removed")]
    removed: Option<serde_json::Value>,
}

impl GraphEvent {
    fn into_raw(self) -> RawEvent {
        RawEvent {
            id: self.id,
            ical_uid: self.ical_uid,
            subject: self.subject,
            start: self.start.map(GraphDateTime::into_raw),
            end: self.end.map(GraphDateTime::into_raw),
            is_all_day: self.is_all_day,
            show_as: self.show_as,
            sensitivity: self.sensitivity,
            last_modified: self.last_modified_date_time,
            removed: self.removed.is_some(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphDateTime {
    date_time: String,
    time_zone: Option<String>,
}

impl GraphDateTime {
    fn into_raw(self) -> RawEventTime {
        RawEventTime { date_time: self.date_time, time_zone: self.time_zone }
    }
}
