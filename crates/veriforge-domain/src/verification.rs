//! Gate identity, gate configuration and verification results.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::artifact::Artifact;
use crate::issue::{Issue, IssueKind, Severity, SeverityCounts};

/// Default per-gate timeout (5 minutes).
pub const DEFAULT_GATE_TIMEOUT: Duration = Duration::from_secs(300);

/// Threshold key: maximum tolerated `error` issues.
pub const MAX_ERRORS: &str = "max_errors";
/// Threshold key: maximum tolerated `critical` issues.
pub const MAX_CRITICAL: &str = "max_critical";
/// Threshold key: maximum tolerated `warning` issues.
pub const MAX_WARNINGS: &str = "max_warnings";

/// Verification category a gate belongs to. At most one gate per type is
/// registered in a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GateType {
    StaticAnalysis,
    UnitTest,
    ContractTest,
    /// Extension point for gates outside the built-in categories.
    Custom(String),
}

impl GateType {
    pub fn as_str(&self) -> &str {
        match self {
            GateType::StaticAnalysis => "static_analysis",
            GateType::UnitTest => "unit_test",
            GateType::ContractTest => "contract_test",
            GateType::Custom(name) => name,
        }
    }
}

impl fmt::Display for GateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-rule override inside a gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleOverride {
    /// Disabled rules have their issues dropped.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Replacement severity for issues produced by this rule.
    #[serde(default)]
    pub severity: Option<Severity>,
}

impl Default for RuleOverride {
    fn default() -> Self {
        Self {
            enabled: true,
            severity: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Configuration for one gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateConfig {
    /// Disabled gates are never executed.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Upper bound on one `verify` call.
    #[serde(with = "crate::duration_ms", default = "default_gate_timeout")]
    pub timeout: Duration,

    /// Run this gate's runners concurrently.
    #[serde(default)]
    pub parallel: bool,

    /// Rule overrides keyed by rule id.
    #[serde(default)]
    pub rules: BTreeMap<String, RuleOverride>,

    /// Numeric thresholds keyed by name (e.g. `max_errors`).
    #[serde(default)]
    pub thresholds: BTreeMap<String, f64>,

    /// Environment tags this configuration applies to.
    #[serde(default)]
    pub environments: Vec<String>,
}

fn default_gate_timeout() -> Duration {
    DEFAULT_GATE_TIMEOUT
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: DEFAULT_GATE_TIMEOUT,
            parallel: false,
            rules: BTreeMap::new(),
            thresholds: BTreeMap::new(),
            environments: Vec::new(),
        }
    }
}

impl GateConfig {
    pub fn with_threshold(mut self, name: impl Into<String>, value: f64) -> Self {
        self.thresholds.insert(name.into(), value);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_rule(mut self, rule: impl Into<String>, rule_override: RuleOverride) -> Self {
        self.rules.insert(rule.into(), rule_override);
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn threshold(&self, name: &str) -> Option<f64> {
        self.thresholds.get(name).copied()
    }

    /// Whether this configuration applies to `environment`. An empty tag
    /// list applies everywhere.
    pub fn applies_to(&self, environment: Option<&str>) -> bool {
        match environment {
            Some(env) if !self.environments.is_empty() => {
                self.environments.iter().any(|e| e == env)
            }
            _ => true,
        }
    }
}

/// Counters gathered during one gate execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VerificationMetrics {
    pub files_scanned: u32,
    pub lines_scanned: u64,
    pub issues: SeverityCounts,
    pub duration_ms: u64,
    /// Percentage in `[0, 100]`, reported by gates that measure coverage.
    pub coverage_percent: Option<f64>,
    /// Gate-specific numeric metrics.
    #[serde(default)]
    pub extra: BTreeMap<String, f64>,
}

/// Guidance attached to an issue for the repair stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepairHint {
    pub issue_id: String,
    pub kind: IssueKind,
    /// Whether a mechanical fix is expected to succeed.
    pub automated: bool,
    /// Confidence in `[0, 1]` that the hint leads to a correct fix.
    pub confidence: f64,
    pub guidance: String,
}

/// Outcome of one gate execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationResult {
    pub success: bool,
    pub gate_type: GateType,
    pub gate_name: String,
    /// The artifact set the gate verified.
    pub artifacts: Vec<Artifact>,
    pub issues: Vec<Issue>,
    /// Non-blocking operational notices (runner crashed, tool missing, ...).
    pub warnings: Vec<String>,
    pub metrics: VerificationMetrics,
    pub repair_hints: Vec<RepairHint>,
    pub timestamp: DateTime<Utc>,
}

impl VerificationResult {
    /// Start an empty, successful result for a gate.
    pub fn new(gate_type: GateType, gate_name: impl Into<String>, artifacts: Vec<Artifact>) -> Self {
        Self {
            success: true,
            gate_type,
            gate_name: gate_name.into(),
            artifacts,
            issues: Vec::new(),
            warnings: Vec::new(),
            metrics: VerificationMetrics::default(),
            repair_hints: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn count(&self, severity: Severity) -> u32 {
        self.issues.iter().filter(|i| i.severity() == severity).count() as u32
    }

    pub fn has_blocking(&self) -> bool {
        self.issues.iter().any(|i| i.severity() == Severity::Blocking)
    }
}
