//! Unit-test gate: executes generated test suites.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use veriforge_domain::{
    Artifact, ArtifactType, GateConfig, GateType, Result, VerificationResult, VerifyError,
};

use super::{
    apply_rule_overrides, conclude, group_by_stack, invoke_runner, repair_hint, Gate,
    GateSettings, VerificationRequest,
};
use crate::runner::{Runner, RunnerRegistry, TestCommandRunner, TestFramework};

pub const DEFAULT_NAME: &str = "unit-test";

/// Metric key: number of failed tests.
pub const METRIC_TESTS_FAILED: &str = "tests_failed";
/// Metric key: number of (language, framework) groups executed.
pub const METRIC_GROUPS: &str = "groups";

pub struct UnitTestGate {
    settings: GateSettings,
    runners: RunnerRegistry,
}

impl UnitTestGate {
    pub fn new(settings: GateSettings) -> Self {
        Self {
            settings,
            runners: RunnerRegistry::new(),
        }
    }

    /// One test runner per supported framework, under the default name.
    pub fn with_defaults(config: GateConfig) -> Self {
        let mut gate = Self::new(GateSettings::new(DEFAULT_NAME, config));
        for runner in TestCommandRunner::all() {
            // framework names are distinct
            let _ = gate.runners.register(Arc::new(runner));
        }
        gate
    }

    pub fn register_runner(&mut self, runner: Arc<dyn Runner>) -> Result<()> {
        self.runners.register(runner)
    }

    pub fn with_runner(mut self, runner: Arc<dyn Runner>) -> Result<Self> {
        self.register_runner(runner)?;
        Ok(self)
    }

    pub fn settings(&self) -> &GateSettings {
        &self.settings
    }

    /// Test artifacts with language and framework filled in.
    fn test_artifacts(artifacts: &[Artifact]) -> Vec<Artifact> {
        artifacts
            .iter()
            .filter(|a| is_test_artifact(a))
            .map(with_inferred_stack)
            .collect()
    }
}

/// Whether an artifact is a test, by declared type or file naming convention.
pub fn is_test_artifact(artifact: &Artifact) -> bool {
    if artifact.artifact_type == ArtifactType::Test {
        return true;
    }
    if !matches!(artifact.artifact_type, ArtifactType::Source) {
        return false;
    }
    let name = artifact.file_name();
    let path = artifact.path.replace('\\', "/").to_ascii_lowercase();
    name.ends_with("_test.go")
        || (name.starts_with("test_") && name.ends_with(".py"))
        || name.ends_with("_test.py")
        || [".test.", ".spec."].iter().any(|marker| name.contains(marker))
        || path.starts_with("tests/")
        || path.contains("/tests/")
        || path.contains("__tests__/")
}

/// Fill language and framework from content heuristics when missing.
pub fn with_inferred_stack(artifact: &Artifact) -> Artifact {
    let mut artifact = artifact.clone();
    if artifact.language.is_none() {
        artifact.language = infer_language_from_content(&artifact.content).map(str::to_string);
    }
    if artifact.framework.is_none() {
        artifact.framework = artifact
            .language
            .as_deref()
            .and_then(TestFramework::for_language)
            .map(|f| f.as_str().to_string());
    }
    artifact
}

fn infer_language_from_content(content: &str) -> Option<&'static str> {
    if content.contains("\"testing\"") && content.contains("package ") {
        Some("go")
    } else if content.contains("#[test]") || content.contains("#[tokio::test]") {
        Some("rust")
    } else if content.contains("def test_") || content.contains("import pytest") {
        Some("python")
    } else if content.contains("describe(") || content.contains("it(") || content.contains("test(") {
        Some("javascript")
    } else {
        None
    }
}

#[async_trait]
impl Gate for UnitTestGate {
    fn gate_type(&self) -> GateType {
        GateType::UnitTest
    }

    fn name(&self) -> &str {
        self.settings.name()
    }

    fn can_verify(&self, artifacts: &[Artifact]) -> bool {
        let tests = Self::test_artifacts(artifacts);
        !tests.is_empty() && self.runners.any_can_run(&tests)
    }

    async fn verify(&self, request: &VerificationRequest) -> Result<VerificationResult> {
        let started = Instant::now();
        let deadline = self.settings.deadline_for(request);
        let mut result =
            VerificationResult::new(GateType::UnitTest, self.name(), request.artifacts().to_vec());

        let tests = Self::test_artifacts(request.artifacts());
        let groups = group_by_stack(&tests);
        let mut issues = Vec::new();
        let mut executed = 0u32;

        for ((language, framework), group) in &groups {
            let Some(runner) = self.runners.capable(group).into_iter().next() else {
                result.warnings.push(format!(
                    "{} (language '{}', framework '{}')",
                    VerifyError::RunnerUnavailable {
                        gate: self.name().to_string()
                    },
                    language,
                    framework
                ));
                continue;
            };

            // Tests run against the code they exercise.
            let mut batch = group.clone();
            batch.extend(
                request
                    .artifacts()
                    .iter()
                    .filter(|a| !is_test_artifact(a) && a.language.as_deref() == Some(language.as_str()))
                    .cloned(),
            );

            debug!(
                gate = %self.name(),
                runner = %runner.name(),
                tests = group.len(),
                files = batch.len(),
                "running test group"
            );
            match invoke_runner(&self.settings, runner.as_ref(), &batch, deadline, &request.cancel)
                .await
            {
                Ok(run) => {
                    executed += 1;
                    result.metrics.files_scanned += group.len() as u32;
                    result.metrics.lines_scanned +=
                        group.iter().map(|a| a.line_count() as u64).sum::<u64>();
                    issues.extend(run.issues);
                }
                Err(warning) => result.warnings.push(warning),
            }
        }

        result.issues = apply_rule_overrides(issues, self.settings.config());
        result.repair_hints = result.issues.iter().map(repair_hint).collect();
        result
            .metrics
            .extra
            .insert(METRIC_TESTS_FAILED.to_string(), result.issues.len() as f64);
        result
            .metrics
            .extra
            .insert(METRIC_GROUPS.to_string(), f64::from(executed));
        conclude(&mut result, self.settings.config(), started);
        result.success = result.success && result.issues.is_empty();
        Ok(result)
    }

    fn config(&self) -> &GateConfig {
        self.settings.config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FailingRunner, StaticRunner};
    use veriforge_domain::{Issue, IssueKind, Severity};

    #[test]
    fn test_test_file_conventions() {
        let cases = [
            ("handler_test.go", true),
            ("test_app.py", true),
            ("app_test.py", true),
            ("src/button.test.tsx", true),
            ("src/api.spec.js", true),
            ("tests/integration.rs", true),
            ("src/__tests__/a.js", true),
            ("main.go", false),
            ("src/testing_utils.py", false),
        ];
        for (path, expected) in cases {
            let a = Artifact::new(path, ArtifactType::Source, "");
            assert_eq!(is_test_artifact(&a), expected, "{path}");
        }
        assert!(is_test_artifact(&Artifact::new("whatever.txt", ArtifactType::Test, "")));
        assert!(!is_test_artifact(&Artifact::new("tests/x.md", ArtifactType::Documentation, "")));
    }

    #[test]
    fn test_stack_inferred_from_content() {
        let a = Artifact::new("suite", ArtifactType::Test, "package x\nimport \"testing\"\n");
        let a = with_inferred_stack(&a);
        assert_eq!(a.language.as_deref(), Some("go"));
        assert_eq!(a.framework.as_deref(), Some("go-test"));
    }

    #[test]
    fn test_non_test_artifacts_are_not_verifiable() {
        let gate = UnitTestGate::with_defaults(GateConfig::default());
        let sources = vec![
            Artifact::new("main.go", ArtifactType::Source, "package main"),
            Artifact::new("README.md", ArtifactType::Documentation, ""),
        ];
        assert!(!gate.can_verify(&sources));
        let with_test = vec![Artifact::new("main_test.go", ArtifactType::Source, "package main")];
        assert!(gate.can_verify(&with_test));
    }

    #[tokio::test]
    async fn test_failures_fail_the_gate() {
        let failure = Issue::new(IssueKind::Semantic, "test failed: TestAdd")
            .with_severity(Severity::Error);
        let gate = UnitTestGate::new(GateSettings::new("unit", GateConfig::default()))
            .with_runner(Arc::new(StaticRunner::new("go-test", vec![failure]).for_language("go")))
            .expect("register");
        let request = VerificationRequest::new(vec![
            Artifact::new("add.go", ArtifactType::Source, "package add"),
            Artifact::new("add_test.go", ArtifactType::Test, "package add"),
        ]);
        let result = gate.verify(&request).await.expect("verify");
        assert!(!result.success);
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.metrics.files_scanned, 1);
        assert_eq!(result.metrics.extra.get(METRIC_TESTS_FAILED), Some(&1.0));
    }

    #[tokio::test]
    async fn test_toolchain_failure_is_warning() {
        let gate = UnitTestGate::new(GateSettings::new("unit", GateConfig::default()))
            .with_runner(Arc::new(FailingRunner::new("pytest", "python not found")))
            .expect("register");
        let request =
            VerificationRequest::new(vec![Artifact::new("test_a.py", ArtifactType::Test, "")]);
        let result = gate.verify(&request).await.expect("verify");
        assert!(result.success);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.issues.is_empty());
    }
}
