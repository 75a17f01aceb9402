use std::sync::Arc;

use veriforge_core::gate::contract::METRIC_ENDPOINTS_DECLARED;
use veriforge_core::gate::unit_test::METRIC_TESTS_FAILED;
use veriforge_core::{
    determine_success, Artifact, ArtifactType, CommandRunner, ContractTestGate, Gate, GateConfig,
    GateSettings, Issue, IssueKind, Severity, StaticAnalysisGate, TestCommandRunner,
    TestFramework, UnitTestGate, VerificationRequest,
};
use veriforge_domain::{MAX_CRITICAL, MAX_ERRORS, MAX_WARNINGS};

fn issues(severity: Severity, n: usize) -> Vec<Issue> {
    (0..n)
        .map(|i| Issue::new(IssueKind::Syntax, format!("issue {i}")).with_severity(severity))
        .collect()
}

fn sh(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}

// ---- Verdict thresholds ----

#[test]
fn error_threshold_is_inclusive() {
    let config = GateConfig::default().with_threshold(MAX_ERRORS, 2.0);
    for n in 0..=4 {
        assert_eq!(determine_success(&issues(Severity::Error, n), &config), n <= 2, "n={n}");
    }
}

#[test]
fn warning_threshold_ignores_errors() {
    let config = GateConfig::default().with_threshold(MAX_WARNINGS, 0.0);
    assert!(!determine_success(&issues(Severity::Warning, 1), &config));
    assert!(determine_success(&issues(Severity::Error, 3), &config));
    assert!(determine_success(&issues(Severity::Info, 10), &config));
}

#[test]
fn thresholds_never_relax_critical_or_blocking() {
    let lenient = GateConfig::default()
        .with_threshold(MAX_CRITICAL, 50.0)
        .with_threshold(MAX_ERRORS, 50.0)
        .with_threshold(MAX_WARNINGS, 50.0);
    for severity in [Severity::Critical, Severity::Blocking] {
        assert!(!determine_success(&issues(severity, 1), &lenient));
    }
    for severity in [Severity::Info, Severity::Warning, Severity::Error] {
        assert!(determine_success(&issues(severity, 5), &lenient));
    }
}

// ---- Static analysis ----

#[tokio::test]
async fn pattern_checks_report_secrets_and_braces() {
    let gate = StaticAnalysisGate::with_defaults(GateConfig::default());
    let artifacts = vec![
        Artifact::new(
            "config.py",
            ArtifactType::Source,
            "api_key = \"sk-live-0123456789abcdef\"\n",
        ),
        Artifact::new("main.go", ArtifactType::Source, "package main\n\nfunc main() {\n"),
    ];
    assert!(gate.can_verify(&artifacts));

    let result = gate
        .verify(&VerificationRequest::new(artifacts))
        .await
        .expect("verify");
    assert!(result
        .issues
        .iter()
        .any(|i| i.kind == IssueKind::Security && i.file.as_deref() == Some("config.py")));
    assert!(result
        .issues
        .iter()
        .any(|i| i.kind == IssueKind::Syntax && i.file.as_deref() == Some("main.go")));
    assert_eq!(result.repair_hints.len(), result.issues.len());
    assert_eq!(result.metrics.files_scanned, 2);
}

#[tokio::test]
async fn command_runner_findings_become_issues() {
    let runner = CommandRunner::new(
        "vet",
        sh("echo 'main.go:3:5: error: undefined: serve (undeclared)'; exit 1"),
    )
    .for_languages(["go"]);
    let gate = StaticAnalysisGate::new(GateSettings::new("vet-gate", GateConfig::default()))
        .with_runner(Arc::new(runner))
        .expect("register");

    let result = gate
        .verify(&VerificationRequest::new(vec![Artifact::new(
            "main.go",
            ArtifactType::Source,
            "package main\n\nfunc main() { serve() }\n",
        )]))
        .await
        .expect("verify");

    assert_eq!(result.issues.len(), 1);
    let issue = &result.issues[0];
    assert_eq!(issue.severity(), Severity::Error);
    assert_eq!(issue.line, Some(3));
    assert_eq!(issue.column, Some(5));
    assert_eq!(issue.rule.as_deref(), Some("undeclared"));
    assert_eq!(issue.source.as_deref(), Some("vet"));
}

#[tokio::test]
async fn missing_tool_becomes_warning() {
    let runner = CommandRunner::new("ghost", vec!["veriforge-no-such-tool".to_string()]);
    let gate = StaticAnalysisGate::new(GateSettings::new("ghost-gate", GateConfig::default()))
        .with_runner(Arc::new(runner))
        .expect("register");
    let result = gate
        .verify(&VerificationRequest::new(vec![Artifact::new(
            "a.py",
            ArtifactType::Source,
            "x = 1\n",
        )]))
        .await
        .expect("verify");
    assert!(result.success);
    assert!(result.issues.is_empty());
    assert!(result.warnings.iter().any(|w| w.contains("ghost")));
}

// ---- Unit tests ----

#[tokio::test]
async fn go_test_failures_are_reported() {
    let runner = TestCommandRunner::new(TestFramework::GoTest).with_command(sh(
        "printf '%s\\n' '=== RUN   TestAdd' '--- FAIL: TestAdd (0.00s)' '    calc_test.go:12: expected 3, got 4' 'FAIL'; exit 1",
    ));
    let gate = UnitTestGate::new(GateSettings::new("unit", GateConfig::default()))
        .with_runner(Arc::new(runner))
        .expect("register");

    let artifacts = vec![
        Artifact::new("calc.go", ArtifactType::Source, "package calc\n"),
        Artifact::new(
            "calc_test.go",
            ArtifactType::Test,
            "package calc\n\nimport \"testing\"\n",
        ),
    ];
    assert!(gate.can_verify(&artifacts));

    let result = gate
        .verify(&VerificationRequest::new(artifacts))
        .await
        .expect("verify");
    assert!(!result.success);
    assert_eq!(result.issues.len(), 1);
    let failure = &result.issues[0];
    assert_eq!(failure.title, "test failed: TestAdd");
    assert_eq!(failure.file.as_deref(), Some("calc_test.go"));
    assert_eq!(failure.line, Some(12));
    assert_eq!(result.metrics.extra[METRIC_TESTS_FAILED], 1.0);
}

#[tokio::test]
async fn passing_suite_succeeds() {
    let runner = TestCommandRunner::new(TestFramework::Pytest)
        .with_command(sh("echo '2 passed in 0.01s'"));
    let gate = UnitTestGate::new(GateSettings::new("unit", GateConfig::default()))
        .with_runner(Arc::new(runner))
        .expect("register");
    let result = gate
        .verify(&VerificationRequest::new(vec![Artifact::new(
            "test_app.py",
            ArtifactType::Source,
            "def test_ok():\n    assert True\n",
        )]))
        .await
        .expect("verify");
    assert!(result.success);
    assert!(result.issues.is_empty());
}

// ---- Contracts ----

const ORDERS: &str = "openapi: 3.0.0
info:
  title: Orders
servers:
  - url: http://127.0.0.1:1
paths:
  /orders:
    get:
      responses:
        \"200\":
          description: ok
  /orders/{id}:
    get:
      responses:
        \"200\":
          description: ok
";

#[tokio::test]
async fn unreachable_service_falls_back_to_structure() {
    let gate = ContractTestGate::with_defaults(GateConfig::default());
    let artifacts = vec![Artifact::new("api/openapi.yaml", ArtifactType::Schema, ORDERS)];
    assert!(gate.can_verify(&artifacts));

    let result = gate
        .verify(&VerificationRequest::new(artifacts))
        .await
        .expect("verify");
    assert!(result.success);
    assert!(result.issues.is_empty());
    assert_eq!(result.metrics.coverage_percent, None);
    assert_eq!(result.metrics.extra[METRIC_ENDPOINTS_DECLARED], 2.0);
    assert!(!result.warnings.is_empty());
}

#[tokio::test]
async fn structural_problems_fail_contract_gate() {
    let broken = "openapi: 3.0.0\ninfo:\n  title: Orders\npaths:\n  /orders:\n    post: {}\n";
    let gate = ContractTestGate::with_defaults(GateConfig::default());
    let result = gate
        .verify(&VerificationRequest::new(vec![Artifact::new(
            "openapi.yaml",
            ArtifactType::Schema,
            broken,
        )]))
        .await
        .expect("verify");
    assert!(!result.success);
    let issue = &result.issues[0];
    assert_eq!(issue.kind, IssueKind::Semantic);
    assert!(issue.description.contains("POST /orders"));
}

#[tokio::test]
async fn source_without_contract_is_not_verifiable() {
    let gate = ContractTestGate::with_defaults(GateConfig::default());
    assert!(!gate.can_verify(&[Artifact::new(
        "main.go",
        ArtifactType::Source,
        "package main\n"
    )]));
}
