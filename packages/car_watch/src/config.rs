use std::path::Path;

use anyhow::{Context, Result};
use car_sync::SyncConfig;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

// =============================================================================
// Layered config: defaults → config file → CAR_SYNC_* env vars
// =============================================================================
//
//   car-watch.toml:  api_base_url = "https://telemetry.example.org"
//                    [polling]
//                    backoff_max_ms = 60000
//
//   env var:         CAR_SYNC_POLLING__BACKOFF_MAX_MS=60000   (double underscore = nesting)
//
// A missing config file is not an error; every key has a default.

pub const DEFAULT_CONFIG_FILE: &str = "car-watch.toml";

pub fn load_config(path: &Path) -> Figment {
    Figment::from(Serialized::defaults(SyncConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("CAR_SYNC_").split("__"))
}

/// Extract and validate. `api_base_url` from the command line wins over every
/// layer.
pub fn resolve(path: &Path, api_base_url: Option<String>) -> Result<SyncConfig> {
    let mut config: SyncConfig = load_config(path)
        .extract()
        .with_context(|| format!("reading config from {}", path.display()))?;
    if let Some(url) = api_base_url {
        config.api_base_url = url;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}
