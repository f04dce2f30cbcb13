use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

// =============================================================================
// Synchronization config
// =============================================================================
//
// Passed explicitly to `LiveSync::new` / `ApiClient::new`. Nothing in this
// crate reads the environment; loading layers (config.toml, env vars) is the
// embedding application's job.

/// Top-level synchronization settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Origin of the telemetry API, e.g. `https://api.example.org`. Empty
    /// means paths are used as given (only useful in tests with full URLs).
    #[serde(default)]
    pub api_base_url: String,
    #[serde(default = "default_session_path")]
    pub session_path: String,
    #[serde(default = "default_sse_path")]
    pub sse_path: String,
    /// Base interval of the polling fallback.
    #[serde(default = "default_admin_poll_ms")]
    pub admin_poll_ms: u64,
    /// Admin access JWT, appended as `cf_jwt` to admin stream URLs.
    #[serde(default)]
    pub admin_jwt: Option<String>,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub map: MapConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: String::new(),
            session_path: default_session_path(),
            sse_path: default_sse_path(),
            admin_poll_ms: default_admin_poll_ms(),
            admin_jwt: None,
            reconnect: ReconnectConfig::default(),
            polling: PollingConfig::default(),
            map: MapConfig::default(),
        }
    }
}

/// Stream reconnection backoff (lives under `[reconnect]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_reconnect_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub max_ms: u64,
    /// Treat the channel as dead after this long without any bytes
    /// (heartbeats included).
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_ms: default_reconnect_base_ms(),
            max_ms: default_reconnect_max_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

/// Polling fallback backoff (lives under `[polling]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_backoff_seed_ms")]
    pub backoff_seed_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            backoff_seed_ms: default_backoff_seed_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

/// Map auto-fit tunables (lives under `[map]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MapConfig {
    /// Zoom used while centering on the car.
    #[serde(default = "default_center_zoom")]
    pub center_zoom: u8,
    /// Padding around fitted bounds, in pixels.
    #[serde(default = "default_fit_padding_px")]
    pub fit_padding_px: u32,
    /// Re-enable auto-fit this long after the last interaction. Off when unset.
    #[serde(default)]
    pub idle_resume_secs: Option<u64>,
    /// Include the path trace in fitted bounds.
    #[serde(default)]
    pub include_path: bool,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            center_zoom: default_center_zoom(),
            fit_padding_px: default_fit_padding_px(),
            idle_resume_secs: None,
            include_path: false,
        }
    }
}

fn default_session_path() -> String {
    "/api/v1/session".to_string()
}
fn default_sse_path() -> String {
    "/api/v1/stream".to_string()
}
fn default_admin_poll_ms() -> u64 {
    2000
}
fn default_reconnect_base_ms() -> u64 {
    1000
}
fn default_reconnect_max_ms() -> u64 {
    30_000
}
fn default_idle_timeout_ms() -> u64 {
    60_000
}
fn default_backoff_seed_ms() -> u64 {
    2000
}
fn default_backoff_max_ms() -> u64 {
    30_000
}
fn default_center_zoom() -> u8 {
    15
}
fn default_fit_padding_px() -> u32 {
    20
}

impl SyncConfig {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = self.api_base_url.trim();
        if !base.is_empty() && !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ConfigError::BaseUrl {
                url: self.api_base_url.clone(),
                reason: "must start with http:// or https://".to_string(),
            });
        }
        if self.admin_poll_ms == 0 {
            return Err(ConfigError::Zero {
                field: "admin_poll_ms",
            });
        }
        if self.reconnect.base_ms == 0 {
            return Err(ConfigError::Zero {
                field: "reconnect.base_ms",
            });
        }
        if self.reconnect.idle_timeout_ms == 0 {
            return Err(ConfigError::Zero {
                field: "reconnect.idle_timeout_ms",
            });
        }
        if self.polling.backoff_seed_ms == 0 {
            return Err(ConfigError::Zero {
                field: "polling.backoff_seed_ms",
            });
        }
        Ok(())
    }

    /// Join a path onto the API origin, tolerating a trailing slash.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url.trim_end_matches('/'), path)
    }

    pub fn session_url(&self) -> String {
        self.url(&self.session_path)
    }

    pub fn share_stream_url(&self) -> String {
        self.url(&self.sse_path)
    }

    pub fn admin_stream_url(&self, car_id: i64) -> String {
        let mut url = self.url(&format!("/api/v1/admin/cars/{car_id}/stream"));
        if let Some(jwt) = self.admin_jwt.as_deref().filter(|t| !t.is_empty()) {
            url.push_str("?cf_jwt=");
            url.push_str(&urlencoding::encode(jwt));
        }
        url
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.admin_poll_ms)
    }
}

impl ReconnectConfig {
    pub fn base(&self) -> Duration {
        Duration::from_millis(self.base_ms)
    }

    pub fn max(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

impl PollingConfig {
    pub fn seed(&self) -> Duration {
        Duration::from_millis(self.backoff_seed_ms)
    }

    pub fn max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}
