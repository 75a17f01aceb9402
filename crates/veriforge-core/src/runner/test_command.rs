//! Test-suite runners for the supported languages.
//!
//! Each framework knows its default command and how to read failing test
//! names (and locations, when printed) out of its output. The runner reports
//! one `semantic` error issue per failed test. A toolchain that cannot start
//! is an `Err`, which the unit-test gate records as a warning.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use veriforge_domain::{Artifact, Issue, IssueKind, Severity};

use super::process::{materialize, run_process};
use super::{Runner, RunnerConfig, RunnerResult};

/// Rule id attached to every test-failure issue.
pub const RULE_TEST_FAILURE: &str = "test-failure";

/// Exit code shells use for "command not found".
const EXIT_NOT_FOUND: i32 = 127;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TestFramework {
    GoTest,
    Pytest,
    Cargo,
    Jest,
}

impl TestFramework {
    pub const ALL: [TestFramework; 4] = [
        TestFramework::GoTest,
        TestFramework::Pytest,
        TestFramework::Cargo,
        TestFramework::Jest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TestFramework::GoTest => "go-test",
            TestFramework::Pytest => "pytest",
            TestFramework::Cargo => "cargo-test",
            TestFramework::Jest => "jest",
        }
    }

    /// Framework conventionally used for `language`.
    pub fn for_language(language: &str) -> Option<Self> {
        match language {
            "go" => Some(TestFramework::GoTest),
            "python" => Some(TestFramework::Pytest),
            "rust" => Some(TestFramework::Cargo),
            "javascript" | "typescript" => Some(TestFramework::Jest),
            _ => None,
        }
    }

    /// Framework named by an artifact's declared framework, if recognized.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "go" | "go-test" | "gotest" | "testing" => Some(TestFramework::GoTest),
            "pytest" | "python" | "unittest" => Some(TestFramework::Pytest),
            "cargo" | "cargo-test" | "rust" => Some(TestFramework::Cargo),
            "jest" | "vitest" | "npm" => Some(TestFramework::Jest),
            _ => None,
        }
    }

    pub fn languages(&self) -> &'static [&'static str] {
        match self {
            TestFramework::GoTest => &["go"],
            TestFramework::Pytest => &["python"],
            TestFramework::Cargo => &["rust"],
            TestFramework::Jest => &["javascript", "typescript"],
        }
    }

    pub fn default_command(&self) -> Vec<String> {
        let parts: &[&str] = match self {
            TestFramework::GoTest => &["go", "test", "./..."],
            TestFramework::Pytest => &["python", "-m", "pytest", "-q"],
            TestFramework::Cargo => &["cargo", "test"],
            TestFramework::Jest => &["npm", "test", "--silent"],
        };
        parts.iter().map(|s| s.to_string()).collect()
    }

    /// Extract failing tests from the suite output.
    pub fn parse_failures(&self, output: &str) -> Vec<TestFailure> {
        match self {
            TestFramework::GoTest => parse_go(output),
            TestFramework::Pytest => parse_pytest(output),
            TestFramework::Cargo => parse_cargo(output),
            TestFramework::Jest => parse_jest(output),
        }
    }
}

/// One failed test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestFailure {
    pub name: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub message: String,
}

impl TestFailure {
    fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file: None,
            line: None,
            message: String::new(),
        }
    }

    fn into_issue(self, framework: TestFramework, source: &str) -> Issue {
        let description = if self.message.is_empty() {
            format!("test '{}' failed", self.name)
        } else {
            self.message
        };
        let mut issue = Issue::new(IssueKind::Semantic, format!("test failed: {}", self.name))
            .with_severity(Severity::Error)
            .with_description(description)
            .with_rule(RULE_TEST_FAILURE)
            .with_category(framework.as_str())
            .with_source(source);
        issue.file = self.file;
        issue.line = self.line;
        issue
    }
}

/// Runs a language's test suite over materialized artifacts.
#[derive(Debug, Clone)]
pub struct TestCommandRunner {
    name: String,
    framework: TestFramework,
    command: Vec<String>,
}

impl TestCommandRunner {
    pub fn new(framework: TestFramework) -> Self {
        Self {
            name: framework.as_str().to_string(),
            framework,
            command: framework.default_command(),
        }
    }

    pub fn for_language(language: &str) -> Option<Self> {
        TestFramework::for_language(language).map(Self::new)
    }

    /// One runner per supported framework.
    pub fn all() -> Vec<Self> {
        TestFramework::ALL.into_iter().map(Self::new).collect()
    }

    /// Replace the default suite command.
    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    pub fn framework(&self) -> TestFramework {
        self.framework
    }

    fn accepts(&self, artifact: &Artifact) -> bool {
        if let Some(declared) = artifact.framework.as_deref().and_then(TestFramework::from_name) {
            return declared == self.framework;
        }
        artifact
            .language
            .as_deref()
            .is_some_and(|l| self.framework.languages().contains(&l))
    }
}

#[async_trait]
impl Runner for TestCommandRunner {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn can_run(&self, artifacts: &[Artifact]) -> bool {
        artifacts.iter().any(|a| self.accepts(a))
    }

    async fn run(
        &self,
        artifacts: &[Artifact],
        config: &RunnerConfig,
    ) -> anyhow::Result<RunnerResult> {
        let workdir = tempfile::tempdir()?;
        materialize(artifacts, workdir.path()).await?;

        let command = if config.command.is_empty() {
            &self.command
        } else {
            &config.command
        };
        debug!(runner = %self.name, files = artifacts.len(), "running test suite");
        let output = run_process(command, workdir.path(), &config.env, config.timeout).await?;
        if output.exit_code == EXIT_NOT_FOUND {
            anyhow::bail!("{}: test toolchain not available", self.name);
        }

        let combined = output.combined();
        let mut issues: Vec<Issue> = self
            .framework
            .parse_failures(&combined)
            .into_iter()
            .map(|f| f.into_issue(self.framework, &self.name))
            .collect();

        if !output.success() && issues.is_empty() {
            let tail: Vec<&str> = combined
                .lines()
                .rev()
                .filter(|l| !l.trim().is_empty())
                .take(5)
                .collect();
            let mut failure = TestFailure::named("suite");
            failure.message = format!(
                "test suite exited with code {}: {}",
                output.exit_code,
                tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
            );
            issues.push(failure.into_issue(self.framework, &self.name));
        }

        let mut result = RunnerResult::new(self.name.clone()).scanned(artifacts);
        result.issues = issues;
        result.output = combined;
        result.exit_code = Some(output.exit_code);
        result.duration_ms = output.duration_ms;
        Ok(result)
    }

    fn default_config(&self) -> RunnerConfig {
        RunnerConfig::default().with_command(self.command.clone())
    }
}

// ---------------------------------------------------------------------------
// Output parsers
// ---------------------------------------------------------------------------

fn cached(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("test output pattern"))
}

fn parse_go(output: &str) -> Vec<TestFailure> {
    static FAIL: OnceLock<Regex> = OnceLock::new();
    static LOC: OnceLock<Regex> = OnceLock::new();
    let fail = cached(&FAIL, r"^\s*--- FAIL: (\S+)");
    let loc = cached(&LOC, r"^\s+([\w./\-]+\.go):(\d+): (.*)$");

    let mut failures: Vec<TestFailure> = Vec::new();
    for line in output.lines() {
        if let Some(caps) = fail.captures(line) {
            failures.push(TestFailure::named(&caps[1]));
        } else if let Some(caps) = loc.captures(line) {
            if let Some(last) = failures.last_mut().filter(|f| f.file.is_none()) {
                last.file = Some(caps[1].to_string());
                last.line = caps[2].parse().ok();
                last.message = caps[3].trim().to_string();
            }
        }
    }
    failures
}

fn parse_pytest(output: &str) -> Vec<TestFailure> {
    static FAILED: OnceLock<Regex> = OnceLock::new();
    let re = cached(&FAILED, r"^FAILED ([^:\s]+)::(\S+)(?: - (.*))?$");
    output
        .lines()
        .filter_map(|line| re.captures(line.trim_end()))
        .map(|caps| TestFailure {
            name: caps[2].to_string(),
            file: Some(caps[1].to_string()),
            line: None,
            message: caps.get(3).map(|m| m.as_str().to_string()).unwrap_or_default(),
        })
        .collect()
}

fn parse_cargo(output: &str) -> Vec<TestFailure> {
    static FAILED: OnceLock<Regex> = OnceLock::new();
    static PANIC: OnceLock<Regex> = OnceLock::new();
    let failed = cached(&FAILED, r"^test (\S+) \.\.\. FAILED$");
    let panic = cached(&PANIC, r"^thread '([^']+)' panicked at ([^:]+):(\d+):\d+:?(.*)$");

    let mut failures: Vec<TestFailure> = Vec::new();
    let mut locations: Vec<(String, String, Option<u32>, String)> = Vec::new();
    for line in output.lines() {
        let line = line.trim_end();
        if let Some(caps) = failed.captures(line) {
            if !failures.iter().any(|f| f.name == caps[1]) {
                failures.push(TestFailure::named(&caps[1]));
            }
        } else if let Some(caps) = panic.captures(line) {
            locations.push((
                caps[1].to_string(),
                caps[2].to_string(),
                caps[3].parse().ok(),
                caps[4].trim().to_string(),
            ));
        }
    }
    for (name, file, line, message) in locations {
        if let Some(failure) = failures.iter_mut().find(|f| f.name == name) {
            failure.file = Some(file);
            failure.line = line;
            failure.message = message;
        }
    }
    failures
}

fn parse_jest(output: &str) -> Vec<TestFailure> {
    static FAILED: OnceLock<Regex> = OnceLock::new();
    let re = cached(&FAILED, r"^\s*(?:✕|×) (.+?)(?: \(\d+ ?ms\))?$");
    output
        .lines()
        .filter_map(|line| re.captures(line))
        .map(|caps| TestFailure::named(&caps[1]))
        .collect()
}
