use std::env;

use tracing::info;

use crate::error::CascadeError;

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Default `tracing` directive added on top of `RUST_LOG`.
    pub log_filter: String,

    /// Log handler replacement at warn level instead of debug.
    pub warn_on_overwrite: bool,

    /// Number of delayed ticks the demo binary schedules.
    pub demo_ticks: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            warn_on_overwrite: false,
            demo_ticks: 3,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    /// Every variable is optional; unparseable values are an error.
    pub fn from_env() -> Result<Self, CascadeError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`Config::from_env`] but reads from an arbitrary source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CascadeError> {
        let defaults = Self::default();
        Ok(Self {
            log_filter: lookup("CASCADE_LOG").unwrap_or(defaults.log_filter),
            warn_on_overwrite: match lookup("CASCADE_WARN_ON_OVERWRITE") {
                Some(raw) => parse_bool("CASCADE_WARN_ON_OVERWRITE", &raw)?,
                None => defaults.warn_on_overwrite,
            },
            demo_ticks: match lookup("CASCADE_DEMO_TICKS") {
                Some(raw) => raw.trim().parse().map_err(|_| {
                    CascadeError::Config(format!(
                        "CASCADE_DEMO_TICKS must be a non-negative integer, got {raw:?}"
                    ))
                })?,
                None => defaults.demo_ticks,
            },
        })
    }

    pub fn log_summary(&self) {
        info!(
            log_filter = self.log_filter.as_str(),
            warn_on_overwrite = self.warn_on_overwrite,
            demo_ticks = self.demo_ticks,
            "Loaded configuration"
        );
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, CascadeError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(CascadeError::Config(format!(
            "{key} must be a boolean, got {raw:?}"
        ))),
    }
}
