//! Excel workbook mapping store
//!
//! Implements `MappingStore` over the Microsoft Graph workbook API. The
//! workbook holds three sheets, each with a header row:
//!
//! - `Technicians` — user_id | technician_id | timesheet_code | enabled
//! - `Cursors`     — user_id | delta_link | last_run
//! - `Mappings`    — event_key | user_id | provider_id | appointment_ids |
//!                   fingerprint | last_synced | status
//!
//! Appointment ids are stored semicolon-joined to keep one row per event.
//! The mapping table carries a short-TTL read cache, updated optimistically
//! on writes; staleness only costs extra upserts, never correctness, since
//! the reconciler re-checks fingerprints.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Method};
use serde_json::{json, Value};
use techsync_core::MappingStore;
use techsync_domain::{
    EventMapping, MappingStatus, Result, StoreConfig, SyncCursor, SyncError, TechnicianConfig,
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::auth::AccessTokenProvider;
use crate::retry::{network_error, status_error, RetryPolicy};

const TECHNICIANS_SHEET: &str = "Technicians";
const CURSORS_SHEET: &str = "Cursors";
const MAPPINGS_SHEET: &str = "Mappings";

const CURSOR_COLS: usize = 3;
const MAPPING_COLS: usize = 7;

/// Clear range bottom bound; sheets never grow anywhere near this.
const MAX_ROW: usize = 100_000;

struct MappingCache {
    fetched_at: Instant,
    rows: Vec<EventMapping>,
}

/// Mapping store backed by an Excel workbook on OneDrive/SharePoint.
pub struct WorkbookStore {
    client: Client,
    /// `…/users/{owner}/drive/items/{item}/workbook`
    base_url: String,
    auth: Arc<dyn AccessTokenProvider>,
    retry: RetryPolicy,
    cache_ttl: Duration,
    cache: Mutex<Option<MappingCache>>,
}

impl WorkbookStore {
    pub fn new(
        client: Client,
        config: &StoreConfig,
        auth: Arc<dyn AccessTokenProvider>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            base_url: format!(
                "{}/users/{}/drive/items/{}/workbook",
                config.base_url, config.workbook_owner, config.workbook_item_id
            ),
            auth,
            retry,
            cache_ttl: Duration::from_secs(config.cache_ttl_secs),
            cache: Mutex::new(None),
        }
    }

    async fn call(&self, method: Method, url: &str, body: Option<Value>) -> Result<Value> {
        self.retry
            .execute("workbook request", || async {
                let token = self.auth.access_token().await?;
                let mut request = self.client.request(method.clone(), url).bearer_auth(&token);
                if let Some(body) = &body {
                    request = request.json(body);
                }

                let response = request
                    .send()
                    .await
                    .map_err(|e| network_error("workbook request", e))?;

                let status = response.status();
                if !status.is_success() {
                    let text = response.text().await.unwrap_or_default();
                    return Err(status_error("workbook request", status, &text));
                }
                if status == reqwest::StatusCode::NO_CONTENT {
                    return Ok(Value::Null);
                }

                response
                    .json()
                    .await
                    .map_err(|e| SyncError::Store(format!("workbook response: {e}")))
            })
            .await
    }

    /// All rows of a sheet, header included. An effectively empty sheet
    /// yields an empty vector.
    async fn rows(&self, sheet: &str) -> Result<Vec<Vec<Value>>> {
        let url = format!(
            "{}/worksheets('{}')/usedRange?$select=values",
            self.base_url, sheet
        );
        let body = self.call(Method::GET, &url, None).await?;
        let rows: Vec<Vec<Value>> = body
            .get("values")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| SyncError::Store(format!("sheet {sheet}: {e}")))?
            .unwrap_or_default();
        Ok(rows)
    }

    /// Overwrite one sheet row (1-based index) with `cells`.
    async fn write_row(&self, sheet: &str, row: usize, cells: Vec<Value>) -> Result<()> {
        let last_col = column_letter(cells.len());
        let url = format!(
            "{}/worksheets('{}')/range(address='A{}:{}{}')",
            self.base_url, sheet, row, last_col, row
        );
        self.call(Method::PATCH, &url, Some(json!({ "values": [cells] }))).await?;
        Ok(())
    }

    /// Clear a sheet's data region, keeping the header row.
    async fn clear_data_rows(&self, sheet: &str, cols: usize) -> Result<()> {
        let url = format!(
            "{}/worksheets('{}')/range(address='A2:{}{}')/clear",
            self.base_url,
            sheet,
            column_letter(cols),
            MAX_ROW
        );
        self.call(Method::POST, &url, Some(json!({ "applyTo": "Contents" }))).await?;
        Ok(())
    }

    /// The whole mapping table, via the TTL cache.
    async fn mappings(&self) -> Result<Vec<EventMapping>> {
        let mut guard = self.cache.lock().await;
        if let Some(cache) = guard.as_ref() {
            if cache.fetched_at.elapsed() < self.cache_ttl {
                return Ok(cache.rows.clone());
            }
        }

        let rows = self.rows(MAPPINGS_SHEET).await?;
        let mappings: Vec<EventMapping> =
            rows.iter().skip(1).filter_map(|row| parse_mapping_row(row)).collect();
        debug!(rows = mappings.len(), "mapping table loaded");

        *guard = Some(MappingCache { fetched_at: Instant::now(), rows: mappings.clone() });
        Ok(mappings)
    }

    /// Fold a written row into the cache so readers in the same pass see it
    /// without another fetch.
    async fn cache_put(&self, mapping: &EventMapping) {
        let mut guard = self.cache.lock().await;
        if let Some(cache) = guard.as_mut() {
            match cache.rows.iter_mut().find(|m| m.event_key == mapping.event_key) {
                Some(row) => *row = mapping.clone(),
                None => cache.rows.push(mapping.clone()),
            }
        }
    }

    /// Sheet row (1-based) whose first cell equals `key`, else the first
    /// free row for appending.
    fn target_row(rows: &[Vec<Value>], key: &str) -> usize {
        rows.iter()
            .position(|row| cell_str(row, 0).as_deref() == Some(key))
            .map(|i| i + 1)
            .unwrap_or(rows.len().max(1) + 1)
    }
}

#[async_trait]
impl MappingStore for WorkbookStore {
    async fn technician_configs(&self) -> Result<Vec<TechnicianConfig>> {
        let rows = self.rows(TECHNICIANS_SHEET).await?;
        Ok(rows
            .iter()
            .skip(1)
            .filter_map(|row| {
                let user_id = cell_str(row, 0)?;
                let technician_id = cell_i64(row, 1)?;
                Some(TechnicianConfig {
                    user_id,
                    technician_id,
                    timesheet_code: cell_str(row, 2),
                    enabled: cell_bool(row, 3).unwrap_or(true),
                })
            })
            .collect())
    }

    async fn cursor(&self, user_id: &str) -> Result<Option<SyncCursor>> {
        let rows = self.rows(CURSORS_SHEET).await?;
        Ok(rows
            .iter()
            .skip(1)
            .find(|row| cell_str(row, 0).as_deref() == Some(user_id))
            .map(|row| SyncCursor {
                user_id: user_id.to_string(),
                delta_link: cell_str(row, 1),
                last_run: cell_str(row, 2).and_then(|s| parse_instant(&s)),
            }))
    }

    async fn put_cursor(&self, cursor: &SyncCursor) -> Result<()> {
        let rows = self.rows(CURSORS_SHEET).await?;
        let row = Self::target_row(&rows, &cursor.user_id);
        self.write_row(
            CURSORS_SHEET,
            row,
            vec![
                Value::String(cursor.user_id.clone()),
                Value::String(cursor.delta_link.clone().unwrap_or_default()),
                Value::String(
                    cursor
                        .last_run
                        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
                        .unwrap_or_default(),
                ),
            ],
        )
        .await
    }

    async fn mapping(&self, event_key: &str) -> Result<Option<EventMapping>> {
        Ok(self.mappings().await?.into_iter().find(|m| m.event_key == event_key))
    }

    async fn mapping_by_provider_id(
        &self,
        user_id: &str,
        provider_id: &str,
    ) -> Result<Option<EventMapping>> {
        Ok(self
            .mappings()
            .await?
            .into_iter()
            .find(|m| m.user_id == user_id && m.provider_id == provider_id))
    }

    async fn put_mapping(&self, mapping: &EventMapping) -> Result<()> {
        let rows = self.rows(MAPPINGS_SHEET).await?;
        let row = Self::target_row(&rows, &mapping.event_key);
        self.write_row(MAPPINGS_SHEET, row, mapping_cells(mapping)).await?;
        self.cache_put(mapping).await;
        Ok(())
    }

    async fn all_mappings(&self) -> Result<Vec<EventMapping>> {
        self.mappings().await
    }

    async fn clear_sync_state(&self) -> Result<()> {
        self.clear_data_rows(CURSORS_SHEET, CURSOR_COLS).await?;
        self.clear_data_rows(MAPPINGS_SHEET, MAPPING_COLS).await?;
        *self.cache.lock().await = None;
        Ok(())
    }
}

fn mapping_cells(mapping: &EventMapping) -> Vec<Value> {
    vec![
        Value::String(mapping.event_key.clone()),
        Value::String(mapping.user_id.clone()),
        Value::String(mapping.provider_id.clone()),
        Value::String(join_ids(&mapping.appointment_ids)),
        Value::String(mapping.fingerprint.clone()),
        Value::String(mapping.last_synced.to_rfc3339_opts(SecondsFormat::Secs, true)),
        Value::String(mapping.status.as_str().to_string()),
    ]
}

fn parse_mapping_row(row: &[Value]) -> Option<EventMapping> {
    let event_key = cell_str(row, 0)?;
    let last_synced = match cell_str(row, 5).and_then(|s| parse_instant(&s)) {
        Some(t) => t,
        None => {
            warn!(event_key = %event_key, "mapping row has unparsable timestamp, skipping");
            return None;
        }
    };
    Some(EventMapping {
        event_key,
        user_id: cell_str(row, 1).unwrap_or_default(),
        provider_id: cell_str(row, 2).unwrap_or_default(),
        appointment_ids: split_ids(&cell_str(row, 3).unwrap_or_default()),
        fingerprint: cell_str(row, 4).unwrap_or_default(),
        last_synced,
        status: MappingStatus::parse(&cell_str(row, 6).unwrap_or_default()),
    })
}

fn join_ids(ids: &[i64]) -> String {
    ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(";")
}

fn split_ids(value: &str) -> Vec<i64> {
    value.split(';').filter_map(|part| part.trim().parse().ok()).collect()
}

/// A worksheet cell as a non-empty string. Excel delivers numbers as JSON
/// numbers, so those are stringified.
fn cell_str(row: &[Value], index: usize) -> Option<String> {
    match row.get(index)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn cell_i64(row: &[Value], index: usize) -> Option<i64> {
    match row.get(index)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn cell_bool(row: &[Value], index: usize) -> Option<bool> {
    match row.get(index)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        _ => None,
    }
}

fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value).ok().map(|t| t.with_timezone(&Utc))
}

/// 1-based column count to its letter ("C", "G"). Sheets stay well under
/// 26 columns.
fn column_letter(cols: usize) -> char {
    (b'A' + (cols.min(26) as u8) - 1) as char
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::auth::StaticTokenProvider;

    const WB: &str = "/users/ops@example.com/drive/items/item-1/workbook";

    fn store(server: &MockServer) -> WorkbookStore {
        store_with_ttl(server, 30)
    }

    fn store_with_ttl(server: &MockServer, ttl: u64) -> WorkbookStore {
        let config = StoreConfig {
            workbook_owner: "ops@example.com".into(),
            workbook_item_id: "item-1".into(),
            base_url: server.uri(),
            cache_ttl_secs: ttl,
        };
        WorkbookStore::new(
            Client::new(),
            &config,
            Arc::new(StaticTokenProvider("tok".into())),
            RetryPolicy::no_retry(),
        )
    }

    #[tokio::test]
    async fn technician_configs_skip_header_and_blank_rows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{WB}/worksheets('Technicians')/usedRange")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "values": [
                    ["user_id", "technician_id", "timesheet_code", "enabled"],
                    ["ann@example.com", 42, "12", true],
                    ["bo@example.com", "43", "", "false"],
                    ["", "", "", ""]
                ]
            })))
            .mount(&server)
            .await;

        let configs = store(&server).technician_configs().await.unwrap();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].technician_id, 42);
        assert_eq!(configs[0].timesheet_code.as_deref(), Some("12"));
        assert!(configs[0].enabled);
        assert_eq!(configs[1].technician_id, 43);
        assert!(!configs[1].enabled);
    }

    #[tokio::test]
    async fn put_cursor_updates_existing_row_in_place() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{WB}/worksheets('Cursors')/usedRange")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "values": [
                    ["user_id", "delta_link", "last_run"],
                    ["ann@example.com", "old-link", "2026-02-01T00:00:00Z"]
                ]
            })))
            .mount(&server)
            .await;

        // Row 2 holds ann's cursor, so the write must target A2:C2
        Mock::given(method("PATCH"))
            .and(path(format!("{WB}/worksheets('Cursors')/range(address='A2:C2')")))
            .and(body_partial_json(json!({
                "values": [["ann@example.com", "new-link"]]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        store(&server)
            .put_cursor(&SyncCursor {
                user_id: "ann@example.com".into(),
                delta_link: Some("new-link".into()),
                last_run: Some(Utc::now()),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn put_cursor_appends_for_new_user() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{WB}/worksheets('Cursors')/usedRange")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "values": [["user_id", "delta_link", "last_run"]]
            })))
            .mount(&server)
            .await;

        Mock::given(method("PATCH"))
            .and(path(format!("{WB}/worksheets('Cursors')/range(address='A2:C2')")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        store(&server)
            .put_cursor(&SyncCursor {
                user_id: "new@example.com".into(),
                delta_link: Some("link".into()),
                last_run: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn mapping_rows_round_trip_including_id_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{WB}/worksheets('Mappings')/usedRange")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "values": [
                    ["event_key", "user_id", "provider_id", "appointment_ids",
                     "fingerprint", "last_synced", "status"],
                    ["uid-1|s|e", "ann@example.com", "ev-1", "1000;1001;1002",
                     "v2|fp", "2026-02-01T08:00:00Z", "synced"],
                    ["uid-2|s|e", "ann@example.com", "ev-2", "",
                     "v2|fp2", "2026-02-01T09:00:00Z", "deleted"]
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = store(&server);
        let mapping = store.mapping("uid-1|s|e").await.unwrap().unwrap();
        assert_eq!(mapping.appointment_ids, vec![1000, 1001, 1002]);
        assert!(mapping.is_live());

        // Second read is served from cache (usedRange expected once)
        let retired = store.mapping("uid-2|s|e").await.unwrap().unwrap();
        assert!(retired.appointment_ids.is_empty());
        assert!(!retired.is_live());

        let by_provider =
            store.mapping_by_provider_id("ann@example.com", "ev-1").await.unwrap().unwrap();
        assert_eq!(by_provider.event_key, "uid-1|s|e");
    }

    #[tokio::test]
    async fn put_mapping_feeds_the_read_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{WB}/worksheets('Mappings')/usedRange")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "values": [["event_key", "user_id", "provider_id", "appointment_ids",
                            "fingerprint", "last_synced", "status"]]
            })))
            .mount(&server)
            .await;

        Mock::given(method("PATCH"))
            .and(path(format!("{WB}/worksheets('Mappings')/range(address='A2:G2')")))
            .and(body_partial_json(json!({
                "values": [["uid-1|s|e", "ann@example.com", "ev-1", "1;2"]]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let store = store(&server);
        // Prime the cache with the empty table
        assert!(store.all_mappings().await.unwrap().is_empty());

        store
            .put_mapping(&EventMapping {
                user_id: "ann@example.com".into(),
                event_key: "uid-1|s|e".into(),
                provider_id: "ev-1".into(),
                appointment_ids: vec![1, 2],
                fingerprint: "v2|fp".into(),
                last_synced: Utc::now(),
                status: MappingStatus::Synced,
            })
            .await
            .unwrap();

        let cached = store.mapping("uid-1|s|e").await.unwrap().unwrap();
        assert_eq!(cached.appointment_ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn clear_sync_state_clears_both_tables_below_headers() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(format!(
                "{WB}/worksheets('Cursors')/range(address='A2:C100000')/clear"
            )))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path(format!(
                "{WB}/worksheets('Mappings')/range(address='A2:G100000')/clear"
            )))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        store(&server).clear_sync_state().await.unwrap();
    }

    #[test]
    fn id_list_round_trips() {
        assert_eq!(join_ids(&[1000, 1001]), "1000;1001");
        assert_eq!(split_ids("1000;1001"), vec![1000, 1001]);
        assert_eq!(split_ids(""), Vec::<i64>::new());
        assert_eq!(split_ids("7"), vec![7]);
    }
}
