//! Application configuration structures
//!
//! Typed configuration consumed across the workspace. Loading (environment
//! variables with a TOML file fallback) lives in `techsync-infra`.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SyncError};

/// Top-level application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub graph: GraphConfig,
    pub servicetitan: ServiceTitanConfig,
    pub store: StoreConfig,
    pub sync: SyncConfig,
}

/// Microsoft Graph (Outlook calendar) access configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Azure AD tenant id
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    /// API base, overridable for tests
    #[serde(default = "default_graph_base")]
    pub base_url: String,
}

/// ServiceTitan API access configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceTitanConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub app_key: String,
    #[serde(default = "default_st_base")]
    pub base_url: String,
    #[serde(default = "default_st_auth")]
    pub auth_url: String,
}

/// Mapping store configuration (Excel workbook reached via Graph)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Graph user that owns the workbook
    pub workbook_owner: String,
    /// Drive item id of the workbook
    pub workbook_item_id: String,
    #[serde(default = "default_graph_base")]
    pub base_url: String,
    /// TTL for the read cache of the mapping table, in seconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

/// Reconciliation behaviour configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// IANA timezone name the downstream schedule lives in
    pub timezone: String,
    #[serde(default = "default_past_days")]
    pub past_days: i64,
    #[serde(default = "default_future_days")]
    pub future_days: i64,
    #[serde(default)]
    pub visibility: VisibilityFlags,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Slack webhook for failure alerts; alerts are disabled when unset
    #[serde(default)]
    pub alert_webhook_url: Option<String>,
    #[serde(default = "default_alert_interval")]
    pub alert_min_interval_secs: u64,
}

impl SyncConfig {
    /// Parse the configured timezone name.
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse()
            .map_err(|_| SyncError::Config(format!("invalid timezone: {}", self.timezone)))
    }
}

/// Visibility/placement flags written on every appointment.
///
/// Identical across all blocks of one event; the defaults here are also the
/// signature the cleanup engine uses to recognize appointments we wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VisibilityFlags {
    pub show_on_technician_schedule: bool,
    pub clear_dispatch_board: bool,
    pub clear_technician_view: bool,
    pub remove_from_capacity_planning: bool,
}

impl Default for VisibilityFlags {
    fn default() -> Self {
        Self {
            show_on_technician_schedule: true,
            clear_dispatch_board: false,
            clear_technician_view: false,
            remove_from_capacity_planning: true,
        }
    }
}

fn default_graph_base() -> String {
    "https://graph.microsoft.com/v1.0".to_string()
}

fn default_st_base() -> String {
    "https://api.servicetitan.io".to_string()
}

fn default_st_auth() -> String {
    "https://auth.servicetitan.io/connect/token".to_string()
}

fn default_cache_ttl() -> u64 {
    30
}

fn default_past_days() -> i64 {
    7
}

fn default_future_days() -> i64 {
    60
}

fn default_sweep_interval() -> u64 {
    900
}

fn default_alert_interval() -> u64 {
    300
}
