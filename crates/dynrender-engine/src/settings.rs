use std::{collections::BTreeMap, time::Duration};

use dynrender_store::SettingsStore;
use serde_json::Value;

use crate::error::{RenderError, RenderResult};
use crate::patterns::ConsolePatterns;

/// Keys whose values are never echoed back to clients.
pub const REDACTED_KEYS: &[&str] = &["pterodactyl_api_key", "pterodactyl_server_id"];

/// Store key holding the persisted render queue.
pub const RENDER_QUEUE_KEY: &str = "render_queue";

/// Render configuration, re-read from the store at the start of every render.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub pterodactyl_api_host: Option<String>,
    pub pterodactyl_api_key: Option<String>,
    pub pterodactyl_server_id: Option<String>,

    pub render_world: String,
    pub render_dimension: String,
    pub render_default_radius: i64,
    pub render_min_radius: i64,
    pub render_max_radius: i64,
    pub render_max_coordinate: i64,
    pub render_queue_size: usize,

    pub queued_render_start_delay_in_seconds: u64,
    pub elapsed_time_interval_in_seconds: u64,
    pub cancellation_check_interval_in_seconds: u64,
    pub auth_timeout_in_seconds: u64,
    pub command_timeout_in_seconds: u64,
    pub render_timeout_in_seconds: u64,

    pub web_host: Option<String>,
    pub web_map: String,
    pub web_zoom: i64,
    pub web_y: i64,

    pub console_patterns: ConsolePatterns,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            pterodactyl_api_host: None,
            pterodactyl_api_key: None,
            pterodactyl_server_id: None,
            render_world: "new".to_string(),
            render_dimension: "overworld".to_string(),
            render_default_radius: 300,
            render_min_radius: 100,
            render_max_radius: 300,
            render_max_coordinate: 30_000,
            render_queue_size: 5,
            queued_render_start_delay_in_seconds: 5,
            elapsed_time_interval_in_seconds: 5,
            cancellation_check_interval_in_seconds: 1,
            auth_timeout_in_seconds: 10,
            command_timeout_in_seconds: 10,
            render_timeout_in_seconds: 600,
            web_host: None,
            web_map: "flat".to_string(),
            web_zoom: 6,
            web_y: 64,
            console_patterns: ConsolePatterns::default(),
        }
    }
}

/// Connection details for the hosting panel.
#[derive(Clone)]
pub struct PanelSettings {
    pub host: String,
    pub key: String,
    pub server_id: String,
}

impl std::fmt::Debug for PanelSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PanelSettings")
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

fn seconds(v: u64) -> Duration {
    Duration::from_secs(v.max(1))
}

fn required(value: &Option<String>, key: &str) -> RenderResult<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| RenderError::session(format!("`{key}` is not configured.")))
}

impl RenderSettings {
    pub const KEYS: &'static [&'static str] = &[
        "pterodactyl_api_host",
        "pterodactyl_api_key",
        "pterodactyl_server_id",
        "render_world",
        "render_dimension",
        "render_default_radius",
        "render_min_radius",
        "render_max_radius",
        "render_max_coordinate",
        "render_queue_size",
        "queued_render_start_delay_in_seconds",
        "elapsed_time_interval_in_seconds",
        "cancellation_check_interval_in_seconds",
        "auth_timeout_in_seconds",
        "command_timeout_in_seconds",
        "render_timeout_in_seconds",
        "web_host",
        "web_map",
        "web_zoom",
        "web_y",
        "console_patterns",
    ];

    pub async fn load(store: &dyn SettingsStore) -> RenderResult<Self> {
        let all = store.all().await.map_err(RenderError::store)?;
        Self::from_values(&all)
    }

    pub fn from_values(values: &BTreeMap<String, Value>) -> RenderResult<Self> {
        let known: serde_json::Map<String, Value> = values
            .iter()
            .filter(|(k, v)| Self::KEYS.contains(&k.as_str()) && !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        serde_json::from_value(Value::Object(known))
            .map_err(|e| RenderError::Store(format!("invalid render settings: {e}")))
    }

    /// Checks that `value` is acceptable for `key` before it is stored.
    pub fn validate_value(key: &str, value: &Value) -> Result<(), String> {
        if !Self::KEYS.contains(&key) {
            return Err(format!("unknown setting `{key}`"));
        }
        let mut values = BTreeMap::new();
        values.insert(key.to_string(), value.clone());
        Self::from_values(&values).map(|_| ()).map_err(|e| match e {
            RenderError::Store(msg) => msg,
            other => other.to_string(),
        })
    }

    pub fn panel(&self) -> RenderResult<PanelSettings> {
        Ok(PanelSettings {
            host: required(&self.pterodactyl_api_host, "pterodactyl_api_host")?,
            key: required(&self.pterodactyl_api_key, "pterodactyl_api_key")?,
            server_id: required(&self.pterodactyl_server_id, "pterodactyl_server_id")?,
        })
    }

    pub fn queued_render_start_delay(&self) -> Duration {
        Duration::from_secs(self.queued_render_start_delay_in_seconds)
    }

    pub fn elapsed_time_interval(&self) -> Duration {
        seconds(self.elapsed_time_interval_in_seconds)
    }

    pub fn cancellation_check_interval(&self) -> Duration {
        seconds(self.cancellation_check_interval_in_seconds)
    }

    pub fn auth_timeout(&self) -> Duration {
        seconds(self.auth_timeout_in_seconds)
    }

    pub fn command_timeout(&self) -> Duration {
        seconds(self.command_timeout_in_seconds)
    }

    pub fn render_timeout(&self) -> Duration {
        seconds(self.render_timeout_in_seconds)
    }

    pub fn map_url(&self, x: i64, z: i64) -> Option<String> {
        let host = self
            .web_host
            .as_deref()
            .map(|h| h.trim().trim_end_matches('/'))
            .filter(|h| !h.is_empty())?;
        Some(format!(
            "{host}/?worldname={}&mapname={}&zoom={}&x={x}&y={}&z={z}",
            self.render_world, self.web_map, self.web_zoom, self.web_y
        ))
    }
}

/// Replaces secret values with `<redacted>` for display.
pub fn redact(values: BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    values
        .into_iter()
        .map(|(k, v)| {
            if REDACTED_KEYS.contains(&k.as_str()) && !v.is_null() {
                (k, Value::String("<redacted>".to_string()))
            } else {
                (k, v)
            }
        })
        .collect()
}
