//! Settings type definitions.
//!
//! All types use camelCase JSON and `#[serde(default)]`, so a settings file
//! only needs to name the values it changes.

use std::path::PathBuf;
use std::time::Duration;

use dexdash_core::Commitment;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DashSettings {
    pub rpc: RpcSettings,
    pub cache: CacheSettings,
    pub analytics: AnalyticsSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

impl DashSettings {
    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.cache.refresh_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "cache.refreshIntervalMs must be positive".into(),
            ));
        }
        if self.analytics.poll_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "analytics.pollIntervalMs must be positive".into(),
            ));
        }
        if self.rpc.subscription_channel_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "rpc.subscriptionChannelCapacity must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RpcSettings {
    pub request_timeout_ms: u64,
    pub commitment: Commitment,
    /// Buffered pushes per subscription before new ones are dropped.
    pub subscription_channel_capacity: usize,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            commitment: Commitment::Confirmed,
            subscription_channel_capacity: 64,
        }
    }
}

impl RpcSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheSettings {
    pub refresh_interval_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 60_000,
        }
    }
}

impl CacheSettings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyticsSettings {
    pub url: String,
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:4000/graphql".to_string(),
            timeout_ms: 15_000,
            poll_interval_ms: 10_000,
        }
    }
}

impl AnalyticsSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    pub db_path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: crate::loader::settings_dir().join("database").join("local.db"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
    /// `[module, level]` pairs, e.g. `[["dexdash_rpc", "debug"]]`.
    pub module_levels: Vec<(String, String)>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            module_levels: Vec::new(),
        }
    }
}
