//! Contract-test gate: checks generated services against their API contracts.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tempfile::TempDir;
use tracing::debug;

use veriforge_domain::{
    Artifact, ArtifactType, GateConfig, GateType, Issue, IssueKind, Result, Severity,
    VerificationResult, VerifyError,
};

use super::{apply_rule_overrides, conclude, repair_hint, Gate, GateSettings, VerificationRequest};
use crate::contract::{
    looks_like_contract, parse_contract, ContractValidator, HttpProbeValidator, SpecType,
    DEFAULT_FRAMEWORK,
};
use crate::deadline::bounded;
use crate::runner::materialize;

pub const DEFAULT_NAME: &str = "contract-test";

pub const METRIC_ENDPOINTS_DECLARED: &str = "endpoints_declared";
pub const METRIC_ENDPOINTS_EXERCISED: &str = "endpoints_exercised";
pub const METRIC_CONTRACTS: &str = "contracts";

/// (spec type, framework)
type ValidatorKey = (String, String);

pub struct ContractTestGate {
    settings: GateSettings,
    validators: BTreeMap<ValidatorKey, Arc<dyn ContractValidator>>,
    base_url: Option<String>,
}

impl ContractTestGate {
    /// A gate with no validators.
    pub fn new(settings: GateSettings) -> Self {
        Self {
            settings,
            validators: BTreeMap::new(),
            base_url: None,
        }
    }

    /// HTTP probing for OpenAPI and Swagger contracts, under the default name.
    pub fn with_defaults(config: GateConfig) -> Self {
        let mut gate = Self::new(GateSettings::new(DEFAULT_NAME, config));
        for spec_type in [SpecType::OpenApi3, SpecType::Swagger2] {
            let validator = HttpProbeValidator::new(spec_type.as_str());
            gate.validators.insert(
                (spec_type.as_str().to_string(), DEFAULT_FRAMEWORK.to_string()),
                Arc::new(validator),
            );
        }
        gate
    }

    /// Register a validator under its (spec type, framework) key.
    pub fn register_validator(&mut self, validator: Arc<dyn ContractValidator>) -> Result<()> {
        let key = (
            validator.spec_type().to_string(),
            validator.framework().to_string(),
        );
        if key.0.is_empty() || key.1.is_empty() {
            return Err(VerifyError::Configuration(
                "contract validator needs a spec type and a framework".to_string(),
            ));
        }
        if self.validators.contains_key(&key) {
            return Err(VerifyError::Configuration(format!(
                "contract validator for ({}, {}) registered twice",
                key.0, key.1
            )));
        }
        self.validators.insert(key, validator);
        Ok(())
    }

    /// Probe this base URL instead of the one declared in the contract.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn settings(&self) -> &GateSettings {
        &self.settings
    }

    fn validator_for(&self, spec_type: SpecType, framework: &str) -> Option<&Arc<dyn ContractValidator>> {
        let spec_type = spec_type.as_str().to_string();
        self.validators
            .get(&(spec_type.clone(), framework.to_string()))
            .or_else(|| self.validators.get(&(spec_type, DEFAULT_FRAMEWORK.to_string())))
    }
}

#[async_trait]
impl Gate for ContractTestGate {
    fn gate_type(&self) -> GateType {
        GateType::ContractTest
    }

    fn name(&self) -> &str {
        self.settings.name()
    }

    fn can_verify(&self, artifacts: &[Artifact]) -> bool {
        !self.validators.is_empty() && artifacts.iter().any(looks_like_contract)
    }

    async fn verify(&self, request: &VerificationRequest) -> Result<VerificationResult> {
        let started = Instant::now();
        let deadline = self.settings.deadline_for(request);
        let mut result = VerificationResult::new(
            GateType::ContractTest,
            self.name(),
            request.artifacts().to_vec(),
        );

        let candidates: Vec<Artifact> = request
            .artifacts()
            .iter()
            .filter(|a| looks_like_contract(a))
            .cloned()
            .collect();

        let mut issues = Vec::new();
        let mut declared = 0usize;
        let mut exercised = 0usize;
        let mut probed = false;
        let mut contracts = 0u32;
        // Staged on first use; `Some(None)` records a failed attempt.
        let mut staged: Option<Option<TempDir>> = None;

        for artifact in &candidates {
            let spec = match parse_contract(&artifact.path, &artifact.content) {
                Ok(spec) => spec,
                Err(err) if artifact.artifact_type == ArtifactType::Schema => {
                    debug!(path = %artifact.path, error = %err, "schema is not an API contract");
                    result
                        .warnings
                        .push(format!("{}: no contract validator for this schema", artifact.path));
                    continue;
                }
                Err(err) => {
                    issues.push(
                        Issue::new(IssueKind::Semantic, "contract document could not be parsed")
                            .with_severity(Severity::Error)
                            .with_description(err.to_string())
                            .with_file(artifact.path.clone())
                            .with_rule(crate::contract::validator::RULE_CONTRACT_STRUCTURE),
                    );
                    continue;
                }
            };

            let framework = artifact.framework.as_deref().unwrap_or(DEFAULT_FRAMEWORK);
            let Some(validator) = self.validator_for(spec.spec_type, framework) else {
                result.warnings.push(format!(
                    "{}: no contract validator for ({}, {})",
                    artifact.path, spec.spec_type, framework
                ));
                continue;
            };

            if validator.needs_workdir() && staged.is_none() {
                staged = Some(match stage_contracts(&candidates).await {
                    Ok(dir) => Some(dir),
                    Err(err) => {
                        result
                            .warnings
                            .push(format!("could not stage contract files: {err:#}"));
                        None
                    }
                });
            }
            let workdir: Option<&Path> = if validator.needs_workdir() {
                staged.as_ref().and_then(Option::as_ref).map(TempDir::path)
            } else {
                None
            };

            let base_url = self.base_url.clone().or_else(|| spec.base_url.clone());
            contracts += 1;
            let outcome = bounded(
                deadline,
                &request.cancel,
                validator.validate(&spec, workdir, base_url.as_deref(), deadline, &request.cancel),
            )
            .await;

            match outcome {
                Ok(Ok(validation)) => {
                    declared += validation.endpoints_declared;
                    if validation.probed {
                        probed = true;
                        exercised += validation.endpoints_exercised;
                    }
                    issues.extend(validation.issues);
                    result.warnings.extend(validation.warnings);
                }
                Ok(Err(err)) => result.warnings.push(
                    VerifyError::RunnerExecution {
                        runner: format!("{}-validator", spec.spec_type),
                        reason: format!("{err:#}"),
                    }
                    .to_string(),
                ),
                Err(reason) => {
                    result
                        .warnings
                        .push(format!("validation of {} interrupted: {reason:?}", artifact.path));
                    break;
                }
            }
        }

        result.metrics.files_scanned = contracts;
        result.metrics.lines_scanned = candidates.iter().map(|a| a.line_count() as u64).sum();
        result
            .metrics
            .extra
            .insert(METRIC_CONTRACTS.to_string(), f64::from(contracts));
        result
            .metrics
            .extra
            .insert(METRIC_ENDPOINTS_DECLARED.to_string(), declared as f64);
        result
            .metrics
            .extra
            .insert(METRIC_ENDPOINTS_EXERCISED.to_string(), exercised as f64);
        if probed {
            result.metrics.coverage_percent = Some(if declared == 0 {
                100.0
            } else {
                exercised as f64 * 100.0 / declared as f64
            });
        }

        result.issues = apply_rule_overrides(issues, self.settings.config());
        result.repair_hints = result.issues.iter().map(repair_hint).collect();
        conclude(&mut result, self.settings.config(), started);
        // Contract violations fail the gate even without thresholds.
        result.success =
            result.success && !result.issues.iter().any(|i| i.severity() >= Severity::Error);
        Ok(result)
    }

    fn config(&self) -> &GateConfig {
        self.settings.config()
    }
}

/// Write the contract documents into a fresh temp directory.
async fn stage_contracts(candidates: &[Artifact]) -> anyhow::Result<TempDir> {
    let dir = tokio::task::spawn_blocking(tempfile::tempdir).await??;
    materialize(candidates, dir.path()).await?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{ContractSpec, ContractValidation};
    use crate::deadline::{CancelSignal, Deadline};

    /// Marks every declared endpoint as exercised without touching the
    /// network, reporting whether the document was found on disk.
    struct GinValidator;

    #[async_trait]
    impl ContractValidator for GinValidator {
        fn spec_type(&self) -> &str {
            SpecType::OpenApi3.as_str()
        }

        fn framework(&self) -> &str {
            "gin"
        }

        fn needs_workdir(&self) -> bool {
            true
        }

        async fn validate(
            &self,
            spec: &ContractSpec,
            workdir: Option<&Path>,
            _base_url: Option<&str>,
            _deadline: Deadline,
            _cancel: &CancelSignal,
        ) -> anyhow::Result<ContractValidation> {
            let on_disk = workdir.is_some_and(|dir| dir.join(&spec.source).is_file());
            Ok(ContractValidation {
                warnings: vec![format!("gin routes checked for {} (staged: {on_disk})", spec.source)],
                endpoints_declared: spec.endpoints.len(),
                endpoints_exercised: spec.endpoints.len(),
                probed: true,
                ..Default::default()
            })
        }
    }

    const CONTRACT: &str = "openapi: 3.0.0\ninfo:\n  title: Orders\nservers:\n  - url: http://127.0.0.1:1\npaths:\n  /orders:\n    get:\n      responses:\n        \"200\":\n          description: ok\n";

    fn gate() -> ContractTestGate {
        ContractTestGate::with_defaults(GateConfig::default())
    }

    #[test]
    fn test_can_verify_requires_contract() {
        let contract = Artifact::new("api/openapi.yaml", ArtifactType::Config, CONTRACT);
        let code = Artifact::new("main.go", ArtifactType::Source, "package main");
        assert!(gate().can_verify(&[code.clone(), contract]));
        assert!(!gate().can_verify(&[code]));
        assert!(!ContractTestGate::new(GateSettings::new("c", GateConfig::default()))
            .can_verify(&[Artifact::new("s.json", ArtifactType::Schema, "{}")]));
    }

    #[tokio::test]
    async fn test_structurally_broken_contract_fails() {
        let doc = "openapi: 3.0.0\ninfo:\n  title: Orders\npaths:\n  /orders:\n    get: {}\n";
        let request =
            VerificationRequest::new(vec![Artifact::new("openapi.yaml", ArtifactType::Config, doc)]);
        let result = gate().verify(&request).await.expect("verify");
        assert!(!result.success);
        assert_eq!(result.issues.len(), 1);
        assert!(result.issues[0].title.contains("GET /orders"));
    }

    #[tokio::test]
    async fn test_unparseable_contract_is_an_issue() {
        let request = VerificationRequest::new(vec![Artifact::new(
            "openapi.yaml",
            ArtifactType::Config,
            "openapi: [broken",
        )]);
        let result = gate().verify(&request).await.expect("verify");
        assert!(!result.success);
        assert_eq!(result.issues[0].kind, IssueKind::Semantic);
    }

    #[tokio::test]
    async fn test_non_contract_schema_is_a_warning() {
        let request = VerificationRequest::new(vec![Artifact::new(
            "user.schema.json",
            ArtifactType::Schema,
            "{\"type\": \"object\"}",
        )]);
        let result = gate().verify(&request).await.expect("verify");
        assert!(result.success);
        assert!(result.issues.is_empty());
        assert_eq!(result.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_register_validator_rejects_duplicates() {
        let mut gate = gate();
        let err = gate
            .register_validator(Arc::new(HttpProbeValidator::new("openapi")))
            .expect_err("duplicate");
        assert!(matches!(err, VerifyError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_base_url_override_is_used() {
        let gate = gate().with_base_url("http://127.0.0.1:1/");
        let doc = CONTRACT.replace("http://127.0.0.1:1", "https://never.invalid");
        let request =
            VerificationRequest::new(vec![Artifact::new("openapi.yaml", ArtifactType::Config, doc)]);
        let result = gate.verify(&request).await.expect("verify");
        assert!(result.success);
        assert!(result.warnings.iter().any(|w| w.contains("127.0.0.1:1")));
    }

    #[tokio::test]
    async fn test_framework_validator_preferred_over_default() {
        let mut gate = gate();
        gate.register_validator(Arc::new(GinValidator)).expect("register");
        let contract = Artifact::new("api/openapi.yaml", ArtifactType::Config, CONTRACT)
            .with_framework("gin");
        let result = gate
            .verify(&VerificationRequest::new(vec![contract]))
            .await
            .expect("verify");
        assert!(result.success);
        assert_eq!(result.warnings, vec!["gin routes checked for api/openapi.yaml (staged: true)"]);
        assert_eq!(result.metrics.coverage_percent, Some(100.0));
        assert_eq!(result.metrics.extra.get(METRIC_ENDPOINTS_DECLARED), Some(&1.0));
    }
}
