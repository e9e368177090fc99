//! # Techsync Infra
//!
//! Infrastructure adapters behind the ports defined in `techsync-core`:
//! - Microsoft Graph calendar source (delta and plain window queries)
//! - ServiceTitan non-job appointment sink
//! - Excel-workbook mapping store (reached via the Graph workbook API)
//! - OAuth2 client-credentials token providers with cached refresh
//! - Retry with exponential backoff and jitter
//! - Slack failure alerter
//! - Interval sweep scheduler and configuration loading

pub mod alert;
pub mod auth;
pub mod config;
pub mod graph;
pub mod retry;
pub mod servicetitan;
pub mod sweep;
pub mod workbook;

pub use alert::SlackAlerter;
pub use auth::{AccessTokenProvider, AzureTokenProvider, ServiceTitanTokenProvider};
pub use config::load_config;
pub use graph::GraphCalendarSource;
pub use retry::RetryPolicy;
pub use servicetitan::ServiceTitanSink;
pub use sweep::{SweepScheduler, SweepSchedulerConfig};
pub use workbook::WorkbookStore;
