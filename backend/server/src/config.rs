use std::{env, fmt::Display, fs::read_to_string, str::FromStr, time::Duration};

use tracing::{info, warn};

use crate::error::ConfigError;

pub const REDIS_URL: &str = "REDIS_URL";
pub const PORT: &str = "PORT";
pub const SYNC_INTERVAL_SECS: &str = "SYNC_INTERVAL_SECS";
pub const REDIS_KEY_PREFIX: &str = "REDIS_KEY_PREFIX";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub redis_url: String,
    pub key_prefix: String,
    pub sync_interval: Duration,
}

impl Config {
    /// Reads the process environment, falling back to Docker secrets for the store URL.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| {
            env::var(key)
                .ok()
                .or_else(|| if key == REDIS_URL { read_secret(key) } else { None })
        })
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let redis_url = lookup(REDIS_URL)
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::Missing(REDIS_URL))?;

        let sync_secs: u64 = try_load(&lookup, SYNC_INTERVAL_SECS, "10")?;
        if sync_secs == 0 {
            return Err(ConfigError::Invalid {
                key: SYNC_INTERVAL_SECS,
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            port: try_load(&lookup, PORT, "3000")?,
            redis_url,
            key_prefix: try_load(&lookup, REDIS_KEY_PREFIX, "clicker")?,
            sync_interval: Duration::from_secs(sync_secs),
        })
    }
}

fn try_load<F, T>(lookup: &F, key: &'static str, default: &str) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    lookup(key)
        .unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e: T::Err| {
            warn!("Invalid {key} value: {e}");

            ConfigError::Invalid {
                key,
                reason: e.to_string(),
            }
        })
}

fn read_secret(secret_name: &str) -> Option<String> {
    let path = format!("/run/secrets/{secret_name}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(|e| {
            warn!("Failed to read {secret_name} from file: {e}");
        })
        .ok()
}
