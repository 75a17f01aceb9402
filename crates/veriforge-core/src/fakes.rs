//! In-memory fakes for runners, gates and models (testing only)
//!
//! These satisfy the trait contracts without external tools or network
//! access, so pipelines can be exercised end to end in tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use veriforge_domain::{
    Artifact, GateConfig, GateType, Issue, IssueKind, Result, Severity, VerificationResult,
    VerifyError,
};

use crate::gate::{apply_rule_overrides, conclude, repair_hint, Gate, VerificationRequest};
use crate::llm::{ModelClient, ModelRequest, ModelResponse, TokenUsage};
use crate::runner::{Runner, RunnerConfig, RunnerResult};

// ---------------------------------------------------------------------------
// Runners
// ---------------------------------------------------------------------------

/// Runner that reports the same issues on every run.
#[derive(Debug, Clone)]
pub struct StaticRunner {
    name: String,
    languages: Vec<String>,
    issues: Vec<Issue>,
}

impl StaticRunner {
    pub fn new(name: impl Into<String>, issues: Vec<Issue>) -> Self {
        Self {
            name: name.into(),
            languages: Vec::new(),
            issues,
        }
    }

    /// Only accept artifacts of `language`.
    pub fn for_language(mut self, language: impl Into<String>) -> Self {
        self.languages.push(language.into());
        self
    }
}

#[async_trait]
impl Runner for StaticRunner {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "fake"
    }

    fn can_run(&self, artifacts: &[Artifact]) -> bool {
        if self.languages.is_empty() {
            return !artifacts.is_empty();
        }
        artifacts.iter().any(|a| {
            a.language
                .as_deref()
                .is_some_and(|l| self.languages.iter().any(|x| x == l))
        })
    }

    async fn run(&self, artifacts: &[Artifact], _config: &RunnerConfig) -> anyhow::Result<RunnerResult> {
        let mut result = RunnerResult::new(&self.name).scanned(artifacts);
        result.issues = self.issues.clone();
        Ok(result)
    }
}

/// Runner that reports one issue per line containing `marker`.
///
/// Once the marker is repaired away the issue disappears, which makes it
/// handy for repair-and-reverify tests.
#[derive(Debug, Clone)]
pub struct MarkerRunner {
    name: String,
    marker: String,
    kind: IssueKind,
    severity: Severity,
}

impl MarkerRunner {
    pub fn new(name: impl Into<String>, marker: impl Into<String>, kind: IssueKind, severity: Severity) -> Self {
        Self {
            name: name.into(),
            marker: marker.into(),
            kind,
            severity,
        }
    }
}

#[async_trait]
impl Runner for MarkerRunner {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "fake"
    }

    fn can_run(&self, artifacts: &[Artifact]) -> bool {
        !artifacts.is_empty()
    }

    async fn run(&self, artifacts: &[Artifact], _config: &RunnerConfig) -> anyhow::Result<RunnerResult> {
        let mut result = RunnerResult::new(&self.name).scanned(artifacts);
        for artifact in artifacts {
            for (n, line) in artifact.content.lines().enumerate() {
                if line.contains(&self.marker) {
                    result.issues.push(
                        Issue::new(self.kind, format!("found '{}'", self.marker))
                            .with_severity(self.severity)
                            .with_location(artifact.path.clone(), n as u32 + 1, None)
                            .with_source(self.name.clone()),
                    );
                }
            }
        }
        Ok(result)
    }
}

/// Runner whose tool always fails.
#[derive(Debug, Clone)]
pub struct FailingRunner {
    name: String,
    reason: String,
}

impl FailingRunner {
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Runner for FailingRunner {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "fake"
    }

    fn can_run(&self, _artifacts: &[Artifact]) -> bool {
        true
    }

    async fn run(&self, _artifacts: &[Artifact], _config: &RunnerConfig) -> anyhow::Result<RunnerResult> {
        anyhow::bail!("{}", self.reason)
    }
}

/// Runner that sleeps before returning a clean result.
#[derive(Debug, Clone)]
pub struct SlowRunner {
    name: String,
    delay: Duration,
}

impl SlowRunner {
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
        }
    }
}

#[async_trait]
impl Runner for SlowRunner {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "fake"
    }

    fn can_run(&self, _artifacts: &[Artifact]) -> bool {
        true
    }

    async fn run(&self, artifacts: &[Artifact], _config: &RunnerConfig) -> anyhow::Result<RunnerResult> {
        tokio::time::sleep(self.delay).await;
        Ok(RunnerResult::new(&self.name).scanned(artifacts))
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// Gate with canned issues and switchable behaviour.
#[derive(Debug)]
pub struct FakeGate {
    gate_type: GateType,
    name: String,
    config: GateConfig,
    issues: Vec<Issue>,
    applicable: bool,
    delay: Option<Duration>,
    failure: Option<String>,
    calls: AtomicUsize,
}

impl FakeGate {
    pub fn new(gate_type: GateType, issues: Vec<Issue>) -> Self {
        Self {
            name: format!("fake-{gate_type}"),
            gate_type,
            config: GateConfig::default(),
            issues,
            applicable: true,
            delay: None,
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_config(mut self, config: GateConfig) -> Self {
        self.config = config;
        self
    }

    /// `can_verify` returns false.
    pub fn not_applicable(mut self) -> Self {
        self.applicable = false;
        self
    }

    /// Sleep this long inside `verify`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// `verify` returns `Err`.
    pub fn failing(mut self, reason: impl Into<String>) -> Self {
        self.failure = Some(reason.into());
        self
    }

    /// Number of `verify` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Gate for FakeGate {
    fn gate_type(&self) -> GateType {
        self.gate_type.clone()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn can_verify(&self, artifacts: &[Artifact]) -> bool {
        self.applicable && !artifacts.is_empty()
    }

    async fn verify(&self, request: &VerificationRequest) -> Result<VerificationResult> {
        let started = Instant::now();
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = &self.failure {
            return Err(VerifyError::TaskFailed(reason.clone()));
        }
        let mut result =
            VerificationResult::new(self.gate_type.clone(), &self.name, request.artifacts().to_vec());
        result.issues = apply_rule_overrides(self.issues.clone(), &self.config);
        result.repair_hints = result.issues.iter().map(repair_hint).collect();
        conclude(&mut result, &self.config, started);
        Ok(result)
    }

    fn config(&self) -> &GateConfig {
        &self.config
    }
}

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

/// Model that replays scripted responses in order, then declines.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new<S: Into<String>>(responses: impl IntoIterator<Item = S>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests received so far.
    pub async fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.requests.lock().await.len()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(&self, request: &ModelRequest) -> anyhow::Result<ModelResponse> {
        self.requests.lock().await.push(request.clone());
        let text = self
            .responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| "NO_FIX: script exhausted".to_string());
        Ok(ModelResponse {
            usage: TokenUsage {
                prompt_tokens: (request.prompt.len() / 4 + 1) as u64,
                completion_tokens: (text.len() / 4 + 1) as u64,
                cost_usd: 0.0,
            },
            model: request
                .model
                .clone()
                .unwrap_or_else(|| format!("scripted-{}", request.tier.as_str())),
            text,
        })
    }
}

/// Model whose every call fails.
#[derive(Debug)]
pub struct FailingModel {
    reason: String,
    calls: AtomicUsize,
}

impl FailingModel {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelClient for FailingModel {
    async fn complete(&self, _request: &ModelRequest) -> anyhow::Result<ModelResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("{}", self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ModelTier;
    use veriforge_domain::ArtifactType;

    #[tokio::test]
    async fn test_marker_runner_locates_markers() {
        let runner = MarkerRunner::new("m", "XXX", IssueKind::Maintenance, Severity::Warning);
        let artifact = Artifact::new("a.py", ArtifactType::Source, "ok\nXXX here\n");
        let result = runner
            .run(&[artifact], &RunnerConfig::default())
            .await
            .expect("run");
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].line, Some(2));
    }

    #[tokio::test]
    async fn test_scripted_model_declines_when_exhausted() {
        let model = ScriptedModel::new(["CONFIDENCE: 1"]);
        let request = ModelRequest::new("p", ModelTier::Standard);
        assert_eq!(model.complete(&request).await.expect("first").text, "CONFIDENCE: 1");
        assert!(model.complete(&request).await.expect("second").text.starts_with("NO_FIX"));
        assert_eq!(model.call_count().await, 2);
    }
}
