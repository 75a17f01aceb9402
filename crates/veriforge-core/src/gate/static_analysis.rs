//! Static analysis gate.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::debug;

use veriforge_domain::{
    Artifact, ArtifactType, GateConfig, GateType, Result, VerificationResult, VerifyError,
};

use super::{
    apply_rule_overrides, conclude, group_by_stack, invoke_runner, repair_hint, Gate,
    GateSettings, VerificationRequest,
};
use crate::runner::{PatternRunner, Runner, RunnerRegistry};

pub const DEFAULT_NAME: &str = "static-analysis";

/// Runs analysis tools over source, test and config artifacts, batched by
/// (language, framework).
pub struct StaticAnalysisGate {
    settings: GateSettings,
    runners: RunnerRegistry,
}

impl StaticAnalysisGate {
    /// A gate with no runners.
    pub fn new(settings: GateSettings) -> Self {
        Self {
            settings,
            runners: RunnerRegistry::new(),
        }
    }

    /// The built-in pattern checks under the default name.
    pub fn with_defaults(config: GateConfig) -> Self {
        let mut gate = Self::new(GateSettings::new(DEFAULT_NAME, config));
        // A fresh registry cannot reject its first runner.
        let _ = gate.runners.register(Arc::new(PatternRunner::new()));
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

    pub fn runners(&self) -> &RunnerRegistry {
        &self.runners
    }

    fn eligible(artifact: &Artifact) -> bool {
        matches!(
            artifact.artifact_type,
            ArtifactType::Source | ArtifactType::Test | ArtifactType::Config
        )
    }
}

#[async_trait]
impl Gate for StaticAnalysisGate {
    fn gate_type(&self) -> GateType {
        GateType::StaticAnalysis
    }

    fn name(&self) -> &str {
        self.settings.name()
    }

    fn can_verify(&self, artifacts: &[Artifact]) -> bool {
        artifacts
            .iter()
            .filter(|a| Self::eligible(a))
            .any(|a| self.runners.any_can_run(std::slice::from_ref(a)))
    }

    async fn verify(&self, request: &VerificationRequest) -> Result<VerificationResult> {
        let started = Instant::now();
        let deadline = self.settings.deadline_for(request);
        let mut result = VerificationResult::new(
            GateType::StaticAnalysis,
            self.name(),
            request.artifacts().to_vec(),
        );

        let groups = group_by_stack(request.artifacts().iter().filter(|a| Self::eligible(a)));
        let mut issues = Vec::new();
        let mut ran_any = false;

        for ((language, framework), batch) in &groups {
            let runners = self.runners.capable(batch);
            if runners.is_empty() {
                continue;
            }
            debug!(
                gate = %self.name(),
                language = %language,
                framework = %framework,
                runners = runners.len(),
                files = batch.len(),
                "analysing group"
            );

            let outcomes = if self.settings.parallel() {
                join_all(runners.iter().map(|r| {
                    invoke_runner(&self.settings, r.as_ref(), batch, deadline, &request.cancel)
                }))
                .await
            } else {
                let mut outcomes = Vec::with_capacity(runners.len());
                for runner in &runners {
                    outcomes.push(
                        invoke_runner(
                            &self.settings,
                            runner.as_ref(),
                            batch,
                            deadline,
                            &request.cancel,
                        )
                        .await,
                    );
                }
                outcomes
            };

            ran_any = true;
            result.metrics.files_scanned += batch.len() as u32;
            result.metrics.lines_scanned +=
                batch.iter().map(|a| a.line_count() as u64).sum::<u64>();

            for outcome in outcomes {
                match outcome {
                    Ok(run) => issues.extend(run.issues),
                    Err(warning) => result.warnings.push(warning),
                }
            }
        }

        if !ran_any {
            result.warnings.push(
                VerifyError::RunnerUnavailable {
                    gate: self.name().to_string(),
                }
                .to_string(),
            );
        }

        result.issues = apply_rule_overrides(issues, self.settings.config());
        result.repair_hints = result.issues.iter().map(repair_hint).collect();
        conclude(&mut result, self.settings.config(), started);
        Ok(result)
    }

    fn config(&self) -> &GateConfig {
        self.settings.config()
    }
}
