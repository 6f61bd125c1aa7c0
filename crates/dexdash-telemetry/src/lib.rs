use std::sync::Arc;

use parking_lot::RwLock;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "dexdash_rpc" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("subscriber already installed: {0}")]
    AlreadyInstalled(String),
    #[error("filter reload failed: {0}")]
    Reload(String),
}

/// Handle returned by [`init_telemetry`]; keeps the filter reloadable.
pub struct TelemetryGuard {
    base_level: Level,
    level_filter: Arc<RwLock<Vec<(String, Level)>>>,
    handle: reload::Handle<EnvFilter, Registry>,
}

impl TelemetryGuard {
    /// Change the log level for a specific module at runtime.
    pub fn set_module_level(&self, module: &str, level: Level) -> Result<(), TelemetryError> {
        let filter_str = {
            let mut levels = self.level_filter.write();
            if let Some(entry) = levels.iter_mut().find(|(m, _)| m == module) {
                entry.1 = level;
            } else {
                levels.push((module.to_string(), level));
            }
            filter_directives(self.base_level, &levels)
        };
        self.handle
            .reload(EnvFilter::new(filter_str))
            .map_err(|e| TelemetryError::Reload(e.to_string()))
    }

    /// Get current per-module log level overrides.
    pub fn module_levels(&self) -> Vec<(String, Level)> {
        self.level_filter.read().clone()
    }
}

/// Render a level plus per-module overrides as an `EnvFilter` directive string.
pub fn filter_directives(level: Level, module_levels: &[(String, Level)]) -> String {
    let mut filter_str = level.to_string().to_lowercase();
    for (module, level) in module_levels {
        filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    filter_str
}

/// Parse a level name, case-insensitively. Unknown names yield `None`.
pub fn parse_level(s: &str) -> Option<Level> {
    s.trim().parse().ok()
}

/// Initialize the global tracing subscriber. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let level_filter = Arc::new(RwLock::new(config.module_levels.clone()));

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(filter_directives(config.log_level, &config.module_levels))
    });
    let (filter_layer, handle) = reload::Layer::new(env_filter);

    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
    });
    let plain_layer = (!config.json).then(|| tracing_subscriber::fmt::layer().with_target(true));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(json_layer)
        .with(plain_layer)
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInstalled(e.to_string()))?;

    Ok(TelemetryGuard {
        base_level: config.log_level,
        level_filter,
        handle,
    })
}
