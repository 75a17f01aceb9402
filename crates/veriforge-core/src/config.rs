//! Settings file and environment overrides.
//!
//! ```toml
//! repair_enabled = true
//!
//! [pipeline]
//! parallel = false
//! timeout = 600000
//!
//! [repair]
//! max_iterations = 2
//! confidence_threshold = 0.8
//!
//! [gates.static-analysis]
//! thresholds = { max_errors = 0 }
//!
//! [model]
//! base_url = "http://localhost:11434/v1"
//!
//! [logging]
//! format = "json"
//! level = "veriforge_core=debug,info"
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use veriforge_domain::{GateConfig, Result, VerifyError};

use crate::gate::{contract, static_analysis, unit_test};
use crate::gate::{ContractTestGate, StaticAnalysisGate, UnitTestGate};
use crate::llm::{ModelSettings, OpenAiCompatibleClient};
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::repair::{RepairConfig, RepairLoop};
use crate::telemetry::{self, LogFormat, LogSettings};

pub const ENV_PARALLEL: &str = "VERIFORGE_PARALLEL";
pub const ENV_TIMEOUT_MS: &str = "VERIFORGE_TIMEOUT_MS";
pub const ENV_MAX_ITERATIONS: &str = "VERIFORGE_MAX_ITERATIONS";
pub const ENV_CONFIDENCE_THRESHOLD: &str = "VERIFORGE_CONFIDENCE_THRESHOLD";
pub const ENV_MODEL_API_KEY: &str = "VERIFORGE_MODEL_API_KEY";
pub const ENV_MODEL_BASE_URL: &str = "VERIFORGE_MODEL_BASE_URL";
pub const ENV_LOG_LEVEL: &str = "VERIFORGE_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "VERIFORGE_LOG_FORMAT";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub pipeline: PipelineConfig,
    pub repair: RepairConfig,
    /// Attach a repair loop to pipelines built from these settings.
    pub repair_enabled: bool,
    /// Per-gate configuration keyed by gate name.
    pub gates: BTreeMap<String, GateConfig>,
    pub model: ModelSettings,
    pub logging: LogSettings,
}

impl Settings {
    /// Parse and validate a TOML document. Environment overrides are not
    /// applied.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load a settings file and apply `VERIFORGE_*` environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut settings: Settings = toml::from_str(&text)?;
        settings.apply_env_overrides(std::env::vars())?;
        settings.validate()?;
        info!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    /// Apply recognised `VERIFORGE_*` variables from `vars`.
    pub fn apply_env_overrides(
        &mut self,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<()> {
        for (key, value) in vars {
            match key.as_str() {
                ENV_PARALLEL => self.pipeline.parallel = parse_bool(&key, &value)?,
                ENV_TIMEOUT_MS => {
                    self.pipeline.timeout =
                        std::time::Duration::from_millis(parse_value::<u64>(&key, &value)?)
                }
                ENV_MAX_ITERATIONS => self.repair.max_iterations = parse_value(&key, &value)?,
                ENV_CONFIDENCE_THRESHOLD => {
                    self.repair.confidence_threshold = parse_value(&key, &value)?
                }
                ENV_MODEL_API_KEY => self.model.api_key = Some(value),
                ENV_MODEL_BASE_URL => self.model.base_url = value,
                ENV_LOG_LEVEL => self.logging.level = value,
                ENV_LOG_FORMAT => self.logging.format = parse_log_format(&key, &value)?,
                _ => {}
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let threshold = self.repair.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(config_error(format!(
                "repair.confidence_threshold must be within [0, 1], got {threshold}"
            )));
        }
        if self.repair.max_iterations == 0 {
            return Err(config_error("repair.max_iterations must be at least 1"));
        }
        if self.pipeline.timeout.is_zero() {
            return Err(config_error("pipeline.timeout must be non-zero"));
        }
        if self.pipeline.max_concurrent_gates == 0 {
            return Err(config_error("pipeline.max_concurrent_gates must be at least 1"));
        }
        if self.repair.timeout.is_zero() {
            return Err(config_error("repair.timeout must be non-zero"));
        }
        if self.model.request_timeout.is_zero() {
            return Err(config_error("model.request_timeout must be non-zero"));
        }
        self.logging.filter()?;
        for (name, gate) in &self.gates {
            if gate.timeout.is_zero() {
                return Err(config_error(format!("gates.{name}.timeout must be non-zero")));
            }
        }
        Ok(())
    }

    /// Install the global tracing subscriber from `[logging]`.
    pub fn init_tracing(&self) -> Result<bool> {
        telemetry::init_tracing(&self.logging)
    }

    /// Configuration for the gate called `name`, or the default.
    pub fn gate_config(&self, name: &str) -> GateConfig {
        self.gates.get(name).cloned().unwrap_or_default()
    }

    /// Pipeline with the three built-in gates and, when enabled, a repair
    /// loop talking to the configured model endpoint.
    pub fn build_pipeline(&self) -> Result<Pipeline> {
        let mut pipeline = Pipeline::new(self.pipeline.clone());
        pipeline.add_gate(Arc::new(StaticAnalysisGate::with_defaults(
            self.gate_config(static_analysis::DEFAULT_NAME),
        )))?;
        pipeline.add_gate(Arc::new(UnitTestGate::with_defaults(
            self.gate_config(unit_test::DEFAULT_NAME),
        )))?;
        pipeline.add_gate(Arc::new(ContractTestGate::with_defaults(
            self.gate_config(contract::DEFAULT_NAME),
        )))?;

        if self.repair_enabled {
            let client = OpenAiCompatibleClient::new(self.model.clone())?;
            pipeline = pipeline.with_repair(RepairLoop::new(Arc::new(client), self.repair.clone()));
        }
        Ok(pipeline)
    }
}

fn config_error(message: impl Into<String>) -> VerifyError {
    VerifyError::Configuration(message.into())
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| config_error(format!("{key}: cannot parse '{value}'")))
}

fn parse_log_format(key: &str, value: &str) -> Result<LogFormat> {
    match value.trim().to_ascii_lowercase().as_str() {
        "json" => Ok(LogFormat::Json),
        "text" | "pretty" => Ok(LogFormat::Text),
        _ => Err(config_error(format!("{key}: expected 'json' or 'text', got '{value}'"))),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(config_error(format!("{key}: expected a boolean, got '{value}'"))),
    }
}
