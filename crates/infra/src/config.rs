//! Configuration loading
//!
//! Environment variables win; a TOML file (`techsync.toml` in the working
//! directory, or an explicit path) fills the gaps; hard defaults cover the
//! rest. Missing required values fail fast with a `Config` error naming
//! the variable.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use techsync_domain::{
    AppConfig, GraphConfig, Result, ServiceTitanConfig, StoreConfig, SyncConfig, SyncError,
    VisibilityFlags,
};
use tracing::debug;

const DEFAULT_CONFIG_FILE: &str = "techsync.toml";
const ENV_PREFIX: &str = "TECHSYNC";

/// Load configuration from the process environment, with an optional TOML
/// file as fallback for values the environment does not set.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let file = match path {
        Some(path) => Some(read_file(path)?),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            if default.exists() {
                Some(read_file(&default)?)
            } else {
                None
            }
        }
    };

    let env: HashMap<String, String> = std::env::vars().collect();
    resolve(&env, file.as_ref())
}

fn read_file(path: &Path) -> Result<toml::Value> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| SyncError::Config(format!("cannot read {}: {e}", path.display())))?;
    debug!(path = %path.display(), "loaded configuration file");
    text.parse()
        .map_err(|e| SyncError::Config(format!("cannot parse {}: {e}", path.display())))
}

fn resolve(env: &HashMap<String, String>, file: Option<&toml::Value>) -> Result<AppConfig> {
    let ctx = Resolver { env, file };

    let graph = GraphConfig {
        tenant_id: ctx.required("graph", "tenant_id")?,
        client_id: ctx.required("graph", "client_id")?,
        client_secret: ctx.required("graph", "client_secret")?,
        base_url: ctx
            .optional("graph", "base_url")
            .unwrap_or_else(|| "https://graph.microsoft.com/v1.0".to_string()),
    };

    let servicetitan = ServiceTitanConfig {
        tenant_id: ctx.required("servicetitan", "tenant_id")?,
        client_id: ctx.required("servicetitan", "client_id")?,
        client_secret: ctx.required("servicetitan", "client_secret")?,
        app_key: ctx.required("servicetitan", "app_key")?,
        base_url: ctx
            .optional("servicetitan", "base_url")
            .unwrap_or_else(|| "https://api.servicetitan.io".to_string()),
        auth_url: ctx
            .optional("servicetitan", "auth_url")
            .unwrap_or_else(|| "https://auth.servicetitan.io/connect/token".to_string()),
    };

    let store = StoreConfig {
        workbook_owner: ctx.required("store", "workbook_owner")?,
        workbook_item_id: ctx.required("store", "workbook_item_id")?,
        base_url: ctx.optional("store", "base_url").unwrap_or_else(|| graph.base_url.clone()),
        cache_ttl_secs: ctx.parsed("store", "cache_ttl_secs")?.unwrap_or(30),
    };

    let sync = SyncConfig {
        timezone: ctx.required("sync", "timezone")?,
        past_days: ctx.parsed("sync", "past_days")?.unwrap_or(7),
        future_days: ctx.parsed("sync", "future_days")?.unwrap_or(60),
        visibility: VisibilityFlags::default(),
        sweep_interval_secs: ctx.parsed("sync", "sweep_interval_secs")?.unwrap_or(900),
        alert_webhook_url: ctx.optional("sync", "alert_webhook_url"),
        alert_min_interval_secs: ctx.parsed("sync", "alert_min_interval_secs")?.unwrap_or(300),
    };

    // Reject a bad zone name at startup instead of on the first sweep
    sync.tz()?;

    Ok(AppConfig { graph, servicetitan, store, sync })
}

struct Resolver<'a> {
    env: &'a HashMap<String, String>,
    file: Option<&'a toml::Value>,
}

impl Resolver<'_> {
    /// `TECHSYNC_<SECTION>_<KEY>` from the environment, else
    /// `[section] key` from the file.
    fn optional(&self, section: &str, key: &str) -> Option<String> {
        let var = format!(
            "{ENV_PREFIX}_{}_{}",
            section.to_ascii_uppercase(),
            key.to_ascii_uppercase()
        );
        if let Some(value) = self.env.get(&var).map(|v| v.trim()).filter(|v| !v.is_empty()) {
            return Some(value.to_string());
        }
        self.file?.get(section)?.get(key).and_then(toml_to_string)
    }

    fn required(&self, section: &str, key: &str) -> Result<String> {
        self.optional(section, key).ok_or_else(|| {
            SyncError::Config(format!(
                "missing {ENV_PREFIX}_{}_{} (or [{section}] {key} in the config file)",
                section.to_ascii_uppercase(),
                key.to_ascii_uppercase()
            ))
        })
    }

    fn parsed<T: std::str::FromStr>(&self, section: &str, key: &str) -> Result<Option<T>> {
        match self.optional(section, key) {
            None => Ok(None),
            Some(raw) => raw.parse().map(Some).map_err(|_| {
                SyncError::Config(format!("invalid value for [{section}] {key}: {raw}"))
            }),
        }
    }
}

fn toml_to_string(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        _ => None,
    }
}
