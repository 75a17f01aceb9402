//! External analysis tool adapter.
//!
//! Artifacts are written into a fresh temporary directory and the configured
//! command runs there. Findings are read back from its output, either in the
//! `path:line[:col]: level: message` shape most compilers and linters print,
//! or as one JSON object per line.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use veriforge_domain::{Artifact, Issue, IssueKind, Severity};

use super::process::{materialize, run_process};
use super::{Runner, RunnerConfig, RunnerResult};

/// Placeholder in a command line replaced by the materialized file paths.
pub const FILES_PLACEHOLDER: &str = "{files}";

/// How a tool reports findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// `path:line[:col]: [level:] message [(rule)]`
    #[default]
    CompilerStyle,
    /// `{"file": ..., "line": ..., "column": ..., "severity": ..., "message": ..., "rule": ...}`
    JsonLines,
}

/// Runs an external tool over materialized artifacts.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    name: String,
    version: String,
    languages: Vec<String>,
    command: Vec<String>,
    format: OutputFormat,
    kind: IssueKind,
}

impl CommandRunner {
    /// A runner invoking `command`. Unless `{files}` appears in it, the
    /// materialized paths are appended as trailing arguments.
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            version: "external".to_string(),
            languages: Vec::new(),
            command,
            format: OutputFormat::CompilerStyle,
            kind: IssueKind::Syntax,
        }
    }

    /// Restrict to artifacts of these languages. Empty accepts any textual artifact.
    pub fn for_languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.languages = languages
            .into_iter()
            .map(|l| l.into().to_ascii_lowercase())
            .collect();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Kind assigned to every finding this tool reports.
    pub fn with_kind(mut self, kind: IssueKind) -> Self {
        self.kind = kind;
        self
    }

    fn accepts(&self, artifact: &Artifact) -> bool {
        if !artifact.artifact_type.is_textual() {
            return false;
        }
        if self.languages.is_empty() {
            return true;
        }
        artifact
            .language
            .as_deref()
            .is_some_and(|l| self.languages.iter().any(|x| x == l))
    }

    fn command_line(&self, config: &RunnerConfig, files: &[String]) -> Vec<String> {
        let base = if config.command.is_empty() {
            &self.command
        } else {
            &config.command
        };
        let mut line = Vec::with_capacity(base.len() + files.len());
        let mut expanded = false;
        for part in base {
            if part == FILES_PLACEHOLDER {
                line.extend(files.iter().cloned());
                expanded = true;
            } else {
                line.push(part.clone());
            }
        }
        if !expanded {
            line.extend(files.iter().cloned());
        }
        line
    }

    /// Parse tool output into issues.
    pub fn parse_output(&self, output: &str) -> Vec<Issue> {
        output
            .lines()
            .filter_map(|line| match self.format {
                OutputFormat::CompilerStyle => parse_compiler_line(line, self.kind),
                OutputFormat::JsonLines => parse_json_line(line, self.kind),
            })
            .map(|issue| issue.with_source(self.name.clone()))
            .collect()
    }
}

#[async_trait]
impl Runner for CommandRunner {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn can_run(&self, artifacts: &[Artifact]) -> bool {
        !self.command.is_empty() && artifacts.iter().any(|a| self.accepts(a))
    }

    async fn run(
        &self,
        artifacts: &[Artifact],
        config: &RunnerConfig,
    ) -> anyhow::Result<RunnerResult> {
        let batch: Vec<Artifact> = artifacts
            .iter()
            .filter(|a| self.accepts(a))
            .cloned()
            .collect();

        let workdir = tempfile::tempdir()?;
        materialize(&batch, workdir.path()).await?;
        let files: Vec<String> = batch.iter().map(|a| a.path.clone()).collect();
        let command = self.command_line(config, &files);

        debug!(runner = %self.name, files = files.len(), "running external tool");
        let output = run_process(&command, workdir.path(), &config.env, config.timeout).await?;

        let combined = output.combined();
        let mut issues = self.parse_output(&combined);
        let root = workdir.path().to_string_lossy().to_string();
        for issue in &mut issues {
            if let Some(file) = issue.file.as_mut() {
                *file = normalize_path(file, &root);
            }
        }

        if !output.success() && issues.is_empty() {
            let first = combined.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
            anyhow::bail!(
                "{} exited with code {} without reporting findings: {}",
                self.name,
                output.exit_code,
                first
            );
        }

        let mut result = RunnerResult::new(self.name.clone()).scanned(&batch);
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
// Output parsing
// ---------------------------------------------------------------------------

fn compiler_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<file>[^:\s][^:]*):(?P<line>\d+)(?::(?P<col>\d+))?:\s*(?:(?P<level>[A-Za-z]+):\s+)?(?P<msg>.+?)\s*$",
        )
        .expect("compiler line pattern")
    })
}

fn trailing_rule() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\s+[\(\[](?P<rule>[A-Za-z0-9_\-/.]+)[\)\]]$").expect("trailing rule pattern")
    })
}

fn parse_compiler_line(line: &str, kind: IssueKind) -> Option<Issue> {
    let caps = compiler_line().captures(line)?;
    let file = caps.name("file")?.as_str();
    let line_no: u32 = caps.name("line")?.as_str().parse().ok()?;
    let column = caps.name("col").and_then(|c| c.as_str().parse().ok());

    let mut message = caps.name("msg")?.as_str().to_string();
    let severity = match caps.name("level") {
        Some(level) => match Severity::parse_lenient(level.as_str()) {
            Some(sev) => Some(sev),
            None => {
                message = format!("{}: {}", level.as_str(), message);
                None
            }
        },
        None => None,
    };

    let mut rule = None;
    if let Some(rule_caps) = trailing_rule().captures(&message) {
        if let (Some(whole), Some(r)) = (rule_caps.get(0), rule_caps.name("rule")) {
            rule = Some(r.as_str().to_string());
            message.truncate(whole.start());
        }
    }

    let mut issue = Issue::new(kind, message).with_location(file, line_no, column);
    issue.severity = severity;
    issue.rule = rule;
    Some(issue)
}

#[derive(Debug, Deserialize)]
struct JsonFinding {
    file: Option<String>,
    line: Option<u32>,
    column: Option<u32>,
    severity: Option<String>,
    message: String,
    rule: Option<String>,
}

fn parse_json_line(line: &str, kind: IssueKind) -> Option<Issue> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    let finding: JsonFinding = serde_json::from_str(trimmed).ok()?;
    let mut issue = Issue::new(kind, finding.message);
    issue.file = finding.file;
    issue.line = finding.line;
    issue.column = finding.column;
    issue.rule = finding.rule;
    issue.severity = finding.severity.as_deref().and_then(Severity::parse_lenient);
    Some(issue)
}

fn normalize_path(file: &str, root: &str) -> String {
    let stripped = file
        .strip_prefix(root)
        .map(|rest| rest.trim_start_matches('/'))
        .unwrap_or(file);
    stripped.trim_start_matches("./").to_string()
}
