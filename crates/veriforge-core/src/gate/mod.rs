//! Gate abstraction: one verification category over a set of runners.
//!
//! A gate decides whether it applies to an artifact set, runs its runners,
//! and turns their findings into a [`VerificationResult`]. Runner failures
//! become warnings; only the issues and the configured thresholds decide
//! success (see [`determine_success`]).

pub mod contract;
pub mod static_analysis;
pub mod unit_test;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use veriforge_domain::{
    Artifact, GateConfig, GateType, Issue, IssueKind, RepairHint, Result, RuleOverride, Severity,
    SeverityCounts, VerificationResult, MAX_CRITICAL, MAX_ERRORS, MAX_WARNINGS,
};

use crate::deadline::{bounded, CancelSignal, Deadline, Interrupted};
use crate::obs;
use crate::runner::{Runner, RunnerConfig, RunnerResult};

pub use contract::ContractTestGate;
pub use static_analysis::StaticAnalysisGate;
pub use unit_test::UnitTestGate;

// ---------------------------------------------------------------------------
// Gate trait and request
// ---------------------------------------------------------------------------

/// One verification category.
#[async_trait]
pub trait Gate: Send + Sync {
    fn gate_type(&self) -> GateType;

    fn name(&self) -> &str;

    /// Cheap, side-effect-free: true only if some runner would accept some
    /// eligible artifact.
    fn can_verify(&self, artifacts: &[Artifact]) -> bool;

    /// Verify the request's artifacts. `Err` is reserved for failures of the
    /// gate machinery itself; tool failures are warnings in the result.
    async fn verify(&self, request: &VerificationRequest) -> Result<VerificationResult>;

    fn config(&self) -> &GateConfig;
}

/// Input to one `verify` call. The artifact list is shared read-only between
/// concurrently running gates.
#[derive(Debug, Clone)]
pub struct VerificationRequest {
    artifacts: Arc<Vec<Artifact>>,
    pub environment: Option<String>,
    pub deadline: Deadline,
    pub cancel: CancelSignal,
}

impl VerificationRequest {
    pub fn new(artifacts: Vec<Artifact>) -> Self {
        Self::shared(Arc::new(artifacts))
    }

    pub fn shared(artifacts: Arc<Vec<Artifact>>) -> Self {
        Self {
            artifacts,
            environment: None,
            deadline: Deadline::none(),
            cancel: CancelSignal::never(),
        }
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }
}

// ---------------------------------------------------------------------------
// Shared gate settings
// ---------------------------------------------------------------------------

/// Name and configuration handed to every gate constructor.
#[derive(Debug, Clone, PartialEq)]
pub struct GateSettings {
    name: String,
    config: GateConfig,
}

impl GateSettings {
    pub fn new(name: impl Into<String>, config: GateConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    pub fn parallel(&self) -> bool {
        self.config.parallel
    }

    pub fn rule(&self, rule: &str) -> Option<&RuleOverride> {
        self.config.rules.get(rule)
    }

    /// Deadline for one `verify` call: the request deadline narrowed by this
    /// gate's timeout.
    pub fn deadline_for(&self, request: &VerificationRequest) -> Deadline {
        request.deadline.cap(self.config.timeout)
    }

    /// The runner's default configuration, bounded by `deadline`.
    pub fn runner_config(&self, runner: &dyn Runner, deadline: Deadline) -> RunnerConfig {
        let mut config = runner.default_config();
        if let Some(remaining) = deadline.remaining() {
            config.timeout = config.timeout.min(remaining);
        }
        config
    }
}

// ---------------------------------------------------------------------------
// Success determination
// ---------------------------------------------------------------------------

/// Gate verdict from its issues and thresholds.
///
/// A blocking issue fails immediately. Configured `max_critical`,
/// `max_errors` and `max_warnings` thresholds are checked next. The default
/// rule, fail on any critical or blocking issue, is then applied regardless
/// of thresholds, so a threshold can tighten the verdict but never relax it.
pub fn determine_success(issues: &[Issue], config: &GateConfig) -> bool {
    if issues.iter().any(|i| i.severity() == Severity::Blocking) {
        return false;
    }

    let counts = SeverityCounts::from_issues(issues);
    let limits = [
        (MAX_CRITICAL, counts.critical),
        (MAX_ERRORS, counts.error),
        (MAX_WARNINGS, counts.warning),
    ];
    for (name, count) in limits {
        if let Some(max) = config.threshold(name) {
            if f64::from(count) > max {
                return false;
            }
        }
    }

    counts.critical == 0 && counts.blocking == 0
}

/// Normalize severities and apply rule overrides: disabled rules drop their
/// issues, overridden rules get the configured severity.
pub fn apply_rule_overrides(issues: Vec<Issue>, config: &GateConfig) -> Vec<Issue> {
    issues
        .into_iter()
        .filter_map(|mut issue| {
            issue.normalize_severity();
            if let Some(rule) = issue.rule.as_deref().and_then(|r| config.rules.get(r)) {
                if !rule.enabled {
                    return None;
                }
                if let Some(severity) = rule.severity {
                    issue.severity = Some(severity);
                }
            }
            Some(issue)
        })
        .collect()
}

/// Repair guidance derived from an issue's kind.
pub fn repair_hint(issue: &Issue) -> RepairHint {
    let (automated, confidence, guidance) = match issue.kind {
        IssueKind::Style => (true, 0.9, "apply the formatter or the mechanical style fix".to_string()),
        IssueKind::Maintenance => (
            true,
            0.7,
            "resolve or remove the leftover marker".to_string(),
        ),
        IssueKind::Syntax => (
            false,
            0.6,
            format!(
                "fix the syntax error at {}",
                issue.location().unwrap_or_else(|| "the reported location".to_string())
            ),
        ),
        IssueKind::Security => (
            false,
            0.4,
            "review the construct by hand; prefer configuration or vetted APIs over inline secrets"
                .to_string(),
        ),
        IssueKind::Compliance => (
            false,
            0.5,
            "check the applicable policy before changing the code".to_string(),
        ),
        IssueKind::Performance => (
            false,
            0.5,
            "profile before rewriting the flagged code path".to_string(),
        ),
        IssueKind::Semantic => (
            false,
            0.3,
            "compare the behaviour against the failing expectation".to_string(),
        ),
    };
    RepairHint {
        issue_id: issue.id.clone(),
        kind: issue.kind,
        automated,
        confidence,
        guidance,
    }
}

/// Fill counters, duration and verdict once a gate has gathered its issues.
pub fn conclude(result: &mut VerificationResult, config: &GateConfig, started: Instant) {
    result.metrics.issues = SeverityCounts::from_issues(&result.issues);
    result.metrics.duration_ms = started.elapsed().as_millis() as u64;
    result.success = determine_success(&result.issues, config);
}

// ---------------------------------------------------------------------------
// Grouping and runner invocation
// ---------------------------------------------------------------------------

/// (language, framework) key used to batch artifacts for runners.
pub type StackKey = (String, String);

/// Group artifacts by (language, framework); unknown parts become `""`.
pub fn group_by_stack<'a>(
    artifacts: impl IntoIterator<Item = &'a Artifact>,
) -> BTreeMap<StackKey, Vec<Artifact>> {
    let mut groups: BTreeMap<StackKey, Vec<Artifact>> = BTreeMap::new();
    for artifact in artifacts {
        let key = (
            artifact.language.clone().unwrap_or_default(),
            artifact.framework.clone().unwrap_or_default(),
        );
        groups.entry(key).or_default().push(artifact.clone());
    }
    groups
}

/// Run one runner under the gate deadline. A failure comes back as the
/// warning text to record.
pub async fn invoke_runner(
    settings: &GateSettings,
    runner: &dyn Runner,
    artifacts: &[Artifact],
    deadline: Deadline,
    cancel: &CancelSignal,
) -> std::result::Result<RunnerResult, String> {
    let config = settings.runner_config(runner, deadline);
    let outcome = bounded(deadline, cancel, runner.run(artifacts, &config)).await;
    let reason = match outcome {
        Ok(Ok(result)) => return Ok(result),
        Ok(Err(err)) => format!("{err:#}"),
        Err(Interrupted::DeadlineExceeded) => "timed out".to_string(),
        Err(Interrupted::Cancelled) => "cancelled".to_string(),
    };
    obs::emit_runner_failed(settings.name(), runner.name(), &reason);
    Err(veriforge_domain::VerifyError::RunnerExecution {
        runner: runner.name().to_string(),
        reason,
    }
    .to_string())
}
