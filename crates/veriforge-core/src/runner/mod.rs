//! Runner abstraction: an adapter to one concrete analysis or test tool.
//!
//! Runners are stateless. Given a batch of artifacts they return findings;
//! anything that goes wrong while invoking the tool is an `Err`, which the
//! owning gate turns into a warning.

pub mod command;
pub mod pattern;
pub mod process;
pub mod test_command;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use veriforge_domain::{Artifact, Issue, Result, VerifyError, DEFAULT_GATE_TIMEOUT};

pub use command::{CommandRunner, OutputFormat};
pub use pattern::PatternRunner;
pub use process::{materialize, run_process, ProcessOutput};
pub use test_command::{TestCommandRunner, TestFailure, TestFramework};

// ---------------------------------------------------------------------------
// Configuration and results
// ---------------------------------------------------------------------------

/// Per-invocation runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunnerConfig {
    /// Upper bound on one `run` call. The gate narrows it to its own deadline.
    #[serde(with = "veriforge_domain::duration_ms", default = "default_timeout")]
    pub timeout: Duration,

    /// Command line override for process-backed runners.
    #[serde(default)]
    pub command: Vec<String>,

    /// Extra environment variables for spawned processes.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Free-form runner options.
    #[serde(default)]
    pub options: BTreeMap<String, serde_json::Value>,
}

fn default_timeout() -> Duration {
    DEFAULT_GATE_TIMEOUT
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_GATE_TIMEOUT,
            command: Vec::new(),
            env: BTreeMap::new(),
            options: BTreeMap::new(),
        }
    }
}

impl RunnerConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn option_bool(&self, key: &str) -> Option<bool> {
        self.options.get(key).and_then(|v| v.as_bool())
    }

    pub fn option_u64(&self, key: &str) -> Option<u64> {
        self.options.get(key).and_then(|v| v.as_u64())
    }
}

/// Findings from one runner invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunnerResult {
    pub runner: String,
    pub issues: Vec<Issue>,
    pub files_scanned: u32,
    pub lines_scanned: u64,
    /// Raw tool output, kept for diagnostics.
    #[serde(default)]
    pub output: String,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

impl RunnerResult {
    pub fn new(runner: impl Into<String>) -> Self {
        Self {
            runner: runner.into(),
            ..Default::default()
        }
    }

    /// Record the scanned artifacts in the file/line counters.
    pub fn scanned(mut self, artifacts: &[Artifact]) -> Self {
        self.files_scanned = artifacts.len() as u32;
        self.lines_scanned = artifacts.iter().map(|a| a.line_count() as u64).sum();
        self
    }
}

// ---------------------------------------------------------------------------
// Runner trait
// ---------------------------------------------------------------------------

/// Adapter to one concrete tool.
#[async_trait]
pub trait Runner: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    /// Cheap, side-effect-free applicability check.
    fn can_run(&self, artifacts: &[Artifact]) -> bool;

    /// Execute the tool against `artifacts`. Bounded by the caller's deadline.
    async fn run(&self, artifacts: &[Artifact], config: &RunnerConfig)
        -> anyhow::Result<RunnerResult>;

    fn default_config(&self) -> RunnerConfig {
        RunnerConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Ordered set of runners owned by one gate. Built before the gate is
/// shared and never mutated afterwards.
#[derive(Default, Clone)]
pub struct RunnerRegistry {
    runners: Vec<Arc<dyn Runner>>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a runner. Unnamed runners and duplicate names are rejected.
    pub fn register(&mut self, runner: Arc<dyn Runner>) -> Result<()> {
        let name = runner.name().trim();
        if name.is_empty() {
            return Err(VerifyError::Configuration(
                "runner registered without a name".to_string(),
            ));
        }
        if self.runners.iter().any(|r| r.name() == runner.name()) {
            return Err(VerifyError::Configuration(format!(
                "runner '{}' registered twice",
                runner.name()
            )));
        }
        self.runners.push(runner);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Runner>> {
        self.runners.iter().find(|r| r.name() == name)
    }

    /// Runners that accept `artifacts`, in registration order.
    pub fn capable(&self, artifacts: &[Artifact]) -> Vec<Arc<dyn Runner>> {
        self.runners
            .iter()
            .filter(|r| r.can_run(artifacts))
            .cloned()
            .collect()
    }

    pub fn any_can_run(&self, artifacts: &[Artifact]) -> bool {
        self.runners.iter().any(|r| r.can_run(artifacts))
    }

    pub fn names(&self) -> Vec<&str> {
        self.runners.iter().map(|r| r.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.runners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }
}

impl std::fmt::Debug for RunnerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerRegistry")
            .field("runners", &self.names())
            .finish()
    }
}
