use serde::Deserialize;

/// Root application configuration. Loaded from an optional `nurture.toml`
/// and environment variables with the prefix `NURTURE__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Interval between overall status/event polls.
    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,
    /// Interval between per-stage batching polls.
    #[serde(default = "default_batching_interval_ms")]
    pub batching_interval_ms: u64,
    #[serde(default = "default_events_page_size")]
    pub events_page_size: u32,
}

// Default functions
fn default_base_url() -> String {
    "http://localhost:8000/api".to_string()
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_status_interval_ms() -> u64 {
    2000
}
fn default_batching_interval_ms() -> u64 {
    5000
}
fn default_events_page_size() -> u32 {
    50
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_token: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            status_interval_ms: default_status_interval_ms(),
            batching_interval_ms: default_batching_interval_ms(),
            events_page_size: default_events_page_size(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and optional config file.
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from("nurture")
    }

    /// Same as [`AppConfig::load`] with an explicit config file stem.
    pub fn load_from(file_stem: &str) -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name(file_stem).required(false))
            .add_source(
                config::Environment::with_prefix("NURTURE")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_polling_cadence() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.monitor.status_interval_ms, 2000);
        assert_eq!(cfg.monitor.batching_interval_ms, 5000);
        assert_eq!(cfg.monitor.events_page_size, 50);
        assert!(cfg.backend.api_token.is_none());
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let cfg: AppConfig =
            serde_json::from_str(r#"{"monitor": {"status_interval_ms": 500}}"#).unwrap();
        assert_eq!(cfg.monitor.status_interval_ms, 500);
        assert_eq!(cfg.monitor.batching_interval_ms, 5000);
        assert_eq!(cfg.backend.base_url, "http://localhost:8000/api");
    }
}
