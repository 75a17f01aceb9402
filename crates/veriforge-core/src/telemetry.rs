//! Tracing setup driven by the `[logging]` settings table.
//!
//! `RUST_LOG` wins over the configured level when set. The global
//! subscriber can be installed once per process; later calls are no-ops.

use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use veriforge_domain::{Result, VerifyError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    /// Newline-delimited JSON, one object per event.
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub format: LogFormat,
    /// Filter directive, e.g. `info` or `veriforge_core=debug,warn`.
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            level: "info".to_string(),
        }
    }
}

impl LogSettings {
    /// Filter for the configured level.
    pub fn filter(&self) -> Result<EnvFilter> {
        EnvFilter::try_new(&self.level).map_err(|err| {
            VerifyError::Configuration(format!("logging.level '{}': {err}", self.level))
        })
    }
}

/// Install the global subscriber. Returns whether this call installed it.
pub fn init_tracing(settings: &LogSettings) -> Result<bool> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => settings.filter()?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match settings.format {
        LogFormat::Json => registry
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .is_ok(),
        LogFormat::Text => registry.with(fmt::layer().with_target(false)).try_init().is_ok(),
    };
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_level_is_a_configuration_error() {
        let settings = LogSettings {
            level: "veriforge_core=loud".to_string(),
            ..Default::default()
        };
        assert!(matches!(settings.filter(), Err(VerifyError::Configuration(_))));
    }

    #[test]
    fn test_second_install_is_a_no_op() {
        let json = LogSettings {
            format: LogFormat::Json,
            level: "debug".to_string(),
        };
        let _ = init_tracing(&LogSettings::default());
        assert!(!init_tracing(&json).expect("valid settings"));
    }
}
