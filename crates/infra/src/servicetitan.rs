//! ServiceTitan appointment sink
//!
//! Implements `AppointmentSink` over the ServiceTitan JPM non-job
//! appointment endpoints plus the settings technician roster. Every call
//! carries the tenant app key and a client-credentials bearer token, and
//! runs under the shared retry policy.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use techsync_core::AppointmentSink;
use techsync_domain::{
    Appointment, AppointmentPayload, Result, ServiceTitanConfig, SyncError, Technician,
};
use tracing::debug;

use crate::auth::AccessTokenProvider;
use crate::retry::{network_error, status_error, RetryPolicy};

const APP_KEY_HEADER: &str = "ST-App-Key";
const PAGE_SIZE: usize = 200;

/// Appointment sink backed by the ServiceTitan API.
pub struct ServiceTitanSink {
    client: Client,
    base_url: String,
    tenant_id: String,
    app_key: String,
    auth: Arc<dyn AccessTokenProvider>,
    retry: RetryPolicy,
}

impl ServiceTitanSink {
    pub fn new(
        client: Client,
        config: &ServiceTitanConfig,
        auth: Arc<dyn AccessTokenProvider>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            base_url: config.base_url.clone(),
            tenant_id: config.tenant_id.clone(),
            app_key: config.app_key.clone(),
            auth,
            retry,
        }
    }

    fn appointments_url(&self) -> String {
        format!("{}/jpm/v2/tenant/{}/non-job-appointments", self.base_url, self.tenant_id)
    }

    fn technicians_url(&self) -> String {
        format!("{}/settings/v2/tenant/{}/technicians", self.base_url, self.tenant_id)
    }

    async fn send_json<B: Serialize, R: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> Result<R> {
        self.retry
            .execute("servicetitan request", || async {
                let token = self.auth.access_token().await?;
                let mut request = self
                    .client
                    .request(method.clone(), url)
                    .bearer_auth(&token)
                    .header(APP_KEY_HEADER, &self.app_key);
                if let Some(body) = body {
                    request = request.json(body);
                }

                let response = request
                    .send()
                    .await
                    .map_err(|e| network_error("servicetitan request", e))?;

                let status = response.status();
                if !status.is_success() {
                    let text = response.text().await.unwrap_or_default();
                    return Err(status_error("servicetitan request", status, &text));
                }

                if status == StatusCode::NO_CONTENT {
                    return serde_json::from_value(serde_json::Value::Null)
                        .map_err(|e| SyncError::Client(format!("servicetitan response: {e}")));
                }

                response
                    .json()
                    .await
                    .map_err(|e| SyncError::Client(format!("servicetitan response: {e}")))
            })
            .await
    }

    async fn list_pages<R: DeserializeOwned>(&self, base_query: &str) -> Result<Vec<R>> {
        let mut items = Vec::new();
        let mut page = 1;
        loop {
            let url = format!("{base_query}&page={page}&pageSize={PAGE_SIZE}");
            let chunk: Page<R> = self.send_json::<(), _>(Method::GET, &url, None).await?;
            items.extend(chunk.data);
            if !chunk.has_more {
                return Ok(items);
            }
            page += 1;
        }
    }
}

#[async_trait]
impl AppointmentSink for ServiceTitanSink {
    async fn create(&self, payload: &AppointmentPayload) -> Result<i64> {
        let created: CreatedAppointment =
            self.send_json(Method::POST, &self.appointments_url(), Some(payload)).await?;
        debug!(id = created.id, technician = payload.technician_id, "appointment created");
        Ok(created.id)
    }

    async fn update(&self, id: i64, payload: &AppointmentPayload) -> Result<()> {
        let url = format!("{}/{}", self.appointments_url(), id);
        let _: serde_json::Value = self.send_json(Method::PUT, &url, Some(payload)).await?;
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let url = format!("{}/{}", self.appointments_url(), id);
        match self.send_json::<(), serde_json::Value>(Method::DELETE, &url, None).await {
            Ok(_) => Ok(()),
            // Already gone counts as deleted
            Err(SyncError::NotFound(_)) => {
                debug!(id, "appointment already absent on delete");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn list(
        &self,
        technician_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>> {
        let query = format!(
            "{}?technicianIds={}&startsOnOrAfter={}&startsOnOrBefore={}",
            self.appointments_url(),
            technician_id,
            from.to_rfc3339_opts(SecondsFormat::Secs, true),
            to.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        self.list_pages(&query).await
    }

    async fn technicians(&self) -> Result<Vec<Technician>> {
        let query = format!("{}?active=true", self.technicians_url());
        self.list_pages(&query).await
    }
}

#[derive(Debug, Deserialize)]
struct CreatedAppointment {
    id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    has_more: bool,
}
