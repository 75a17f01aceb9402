//! Pipeline orchestrator.
//!
//! Holds an ordered set of gates (at most one per [`GateType`]), runs the
//! applicable ones against one artifact set, optionally repairs what they
//! found and re-verifies once, then aggregates a [`PipelineResult`].

pub mod quality;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, Instrument};

use veriforge_domain::{
    Artifact, GateType, Issue, RepairContext, RepairPreferences, RepairRequest, RepairResult,
    Result, VerificationResult, VerifyError,
};

use crate::deadline::{bounded, CancelSignal, Deadline, Interrupted};
use crate::gate::{Gate, VerificationRequest};
use crate::obs::{self, PipelineSpan};
use crate::pool::run_bounded;
use crate::repair::RepairLoop;

pub use quality::{Grade, QualityScore};

/// Orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Fan gates out concurrently instead of running them in order.
    pub parallel: bool,
    /// Sequential mode only: skip the remaining gates after a failure.
    pub stop_on_first_failure: bool,
    /// Overall budget for one `execute` call, repair included.
    #[serde(with = "veriforge_domain::duration_ms")]
    pub timeout: Duration,
    pub max_concurrent_gates: usize,
    /// Environment tag matched against each gate's `environments`.
    pub environment: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            stop_on_first_failure: false,
            timeout: Duration::from_secs(30 * 60),
            max_concurrent_gates: 4,
            environment: None,
        }
    }
}

/// Outcome of one `execute` call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineResult {
    pub run_id: String,
    /// AND of every executed gate's verdict; false when the run was cut short.
    pub success: bool,
    /// Results of the last verification pass, ordered by gate type. Gates an
    /// interrupted re-verification did not reach keep their first-pass result.
    pub gate_results: Vec<VerificationResult>,
    pub total_issues: usize,
    pub total_warnings: usize,
    /// Pipeline notices plus every gate warning, prefixed with the gate name.
    pub warnings: Vec<String>,
    pub duration_ms: u64,
    pub quality: QualityScore,
    /// Artifact set after any applied repairs.
    pub artifacts: Vec<Artifact>,
    pub repair: Option<RepairResult>,
    pub timed_out: bool,
}

impl PipelineResult {
    pub fn issues(&self) -> impl Iterator<Item = &Issue> {
        self.gate_results.iter().flat_map(|r| r.issues.iter())
    }

    pub fn gate(&self, gate_type: &GateType) -> Option<&VerificationResult> {
        self.gate_results.iter().find(|r| &r.gate_type == gate_type)
    }
}

enum GateOutcome {
    Completed(VerificationResult),
    /// The gate's own timeout elapsed; it counts as not executed.
    TimedOut { gate: String, after: Duration },
    Interrupted(Interrupted),
}

/// Results of one pass over the applicable gates.
struct Pass {
    results: Vec<VerificationResult>,
    interrupted: Option<Interrupted>,
}

pub struct Pipeline {
    gates: Vec<Arc<dyn Gate>>,
    config: PipelineConfig,
    repair: Option<RepairLoop>,
    repair_context: RepairContext,
    repair_preferences: RepairPreferences,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            gates: Vec::new(),
            config,
            repair: None,
            repair_context: RepairContext::default(),
            repair_preferences: RepairPreferences::default(),
        }
    }

    pub fn with_repair(mut self, repair: RepairLoop) -> Self {
        self.repair = Some(repair);
        self
    }

    pub fn with_repair_context(mut self, context: RepairContext, preferences: RepairPreferences) -> Self {
        self.repair_context = context;
        self.repair_preferences = preferences;
        self
    }

    /// Register a gate. A second gate of the same type is rejected.
    pub fn add_gate(&mut self, gate: Arc<dyn Gate>) -> Result<()> {
        let gate_type = gate.gate_type();
        if self.gates.iter().any(|g| g.gate_type() == gate_type) {
            return Err(VerifyError::DuplicateGate(gate_type));
        }
        self.gates.push(gate);
        Ok(())
    }

    pub fn remove_gate(&mut self, gate_type: &GateType) -> Option<Arc<dyn Gate>> {
        let index = self.gates.iter().position(|g| &g.gate_type() == gate_type)?;
        Some(self.gates.remove(index))
    }

    pub fn gate_types(&self) -> Vec<GateType> {
        self.gates.iter().map(|g| g.gate_type()).collect()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn repair_loop(&self) -> Option<&RepairLoop> {
        self.repair.as_ref()
    }

    pub async fn execute(&self, artifacts: Vec<Artifact>) -> Result<PipelineResult> {
        self.execute_with_cancel(artifacts, &CancelSignal::never())
            .await
    }

    /// Verify `artifacts`, repairing and re-verifying once when a repair loop
    /// is configured.
    ///
    /// Returns `Err` only when the orchestration itself breaks: a gate failing
    /// internally or a task that cannot be joined. Timeouts and cancellation
    /// yield the partial result with `timed_out` set.
    pub async fn execute_with_cancel(
        &self,
        artifacts: Vec<Artifact>,
        cancel: &CancelSignal,
    ) -> Result<PipelineResult> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = PipelineSpan::new(&run_id);
        self.run(run_id, artifacts, cancel)
            .instrument(span.span())
            .await
    }

    async fn run(
        &self,
        run_id: String,
        artifacts: Vec<Artifact>,
        cancel: &CancelSignal,
    ) -> Result<PipelineResult> {
        let started = Instant::now();
        let deadline = Deadline::after(self.config.timeout);
        obs::emit_pipeline_started(&run_id, self.gates.len(), artifacts.len(), self.config.parallel);

        let mut warnings = Vec::new();
        let mut artifacts = Arc::new(artifacts);
        let mut pass = self
            .verify_pass(Arc::clone(&artifacts), deadline, cancel, &mut warnings)
            .await?;

        let mut repair = None;
        let has_issues = pass.results.iter().any(|r| !r.issues.is_empty());
        if let (Some(repair_loop), None, true) = (&self.repair, pass.interrupted, has_issues) {
            let request = self.repair_request(&pass.results, &artifacts);
            let outcome = repair_loop.repair_bounded(&request, deadline, cancel).await;
            warnings.extend(outcome.warnings.iter().cloned());

            if !outcome.modified_files.is_empty() {
                artifacts = Arc::new(rebuild(&artifacts, &outcome.modified_files));
                debug!(files = outcome.modified_files.len(), "re-verifying repaired artifacts");
                let second = self
                    .verify_pass(Arc::clone(&artifacts), deadline, cancel, &mut warnings)
                    .await?;
                let first = std::mem::replace(&mut pass, second);
                if pass.interrupted.is_some() {
                    carry_over(&mut pass, first, &mut warnings);
                }
            }
            repair = Some(outcome);
        }

        let timed_out = match pass.interrupted {
            Some(Interrupted::DeadlineExceeded) => {
                warnings.push(
                    VerifyError::PipelineTimeout {
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    }
                    .to_string(),
                );
                true
            }
            Some(Interrupted::Cancelled) => {
                warnings.push(VerifyError::Cancelled.to_string());
                true
            }
            None => false,
        };

        let mut gate_results = pass.results;
        gate_results.sort_by(|a, b| a.gate_type.cmp(&b.gate_type));
        for result in &gate_results {
            warnings.extend(
                result
                    .warnings
                    .iter()
                    .map(|w| format!("[{}] {w}", result.gate_name)),
            );
        }

        let total_issues = gate_results.iter().map(|r| r.issues.len()).sum();
        let quality = QualityScore::from_issues(gate_results.iter().flat_map(|r| &r.issues));
        let success = !timed_out && gate_results.iter().all(|r| r.success);
        let duration_ms = started.elapsed().as_millis() as u64;
        obs::emit_pipeline_finished(&run_id, duration_ms, total_issues, success, timed_out);

        Ok(PipelineResult {
            run_id,
            success,
            total_warnings: warnings.len(),
            gate_results,
            total_issues,
            warnings,
            duration_ms,
            quality,
            artifacts: Arc::try_unwrap(artifacts).unwrap_or_else(|shared| (*shared).clone()),
            repair,
            timed_out,
        })
    }

    /// Gates that are enabled, match the environment, and accept the set.
    fn applicable(&self, artifacts: &[Artifact]) -> Vec<Arc<dyn Gate>> {
        let environment = self.config.environment.as_deref();
        self.gates
            .iter()
            .filter(|gate| {
                let config = gate.config();
                let reason = if !config.enabled {
                    Some("disabled")
                } else if !config.applies_to(environment) {
                    Some("not configured for this environment")
                } else if !gate.can_verify(artifacts) {
                    Some("no applicable artifacts")
                } else {
                    None
                };
                if let Some(reason) = reason {
                    obs::emit_gate_skipped(gate.name(), reason);
                }
                reason.is_none()
            })
            .cloned()
            .collect()
    }

    async fn verify_pass(
        &self,
        artifacts: Arc<Vec<Artifact>>,
        deadline: Deadline,
        cancel: &CancelSignal,
        warnings: &mut Vec<String>,
    ) -> Result<Pass> {
        let gates = self.applicable(&artifacts);
        let mut request = VerificationRequest::shared(artifacts)
            .with_deadline(deadline)
            .with_cancel(cancel.clone());
        request.environment = self.config.environment.clone();

        let mut pass = Pass {
            results: Vec::with_capacity(gates.len()),
            interrupted: None,
        };

        let outcomes = if self.config.parallel {
            let tasks = gates
                .into_iter()
                .map(|gate| evaluate(gate, request.clone()))
                .collect();
            let pooled =
                run_bounded(tasks, self.config.max_concurrent_gates, deadline, cancel).await?;
            pass.interrupted = pooled.interrupted;
            pooled.completed
        } else {
            let mut outcomes = Vec::with_capacity(gates.len());
            for gate in gates {
                let outcome = evaluate(gate, request.clone()).await?;
                let failed = matches!(&outcome, GateOutcome::Completed(r) if !r.success);
                let stop = matches!(outcome, GateOutcome::Interrupted(_));
                outcomes.push(outcome);
                if stop {
                    break;
                }
                if failed && self.config.stop_on_first_failure {
                    warnings.push("stopping after first failed gate".to_string());
                    break;
                }
            }
            outcomes
        };

        for outcome in outcomes {
            match outcome {
                GateOutcome::Completed(result) => pass.results.push(result),
                GateOutcome::TimedOut { gate, after } => warnings.push(format!(
                    "gate '{gate}' timed out after {}ms and was not counted",
                    after.as_millis()
                )),
                GateOutcome::Interrupted(reason) => {
                    pass.interrupted.get_or_insert(reason);
                }
            }
        }
        Ok(pass)
    }

    fn repair_request(&self, results: &[VerificationResult], artifacts: &[Artifact]) -> RepairRequest {
        let mut context = self.repair_context.clone();
        if context.language.is_none() {
            context.language = dominant_language(artifacts);
        }
        RepairRequest {
            issues: results.iter().flat_map(|r| r.issues.iter().cloned()).collect(),
            files: artifacts
                .iter()
                .filter(|a| a.artifact_type.is_textual())
                .map(|a| (a.path.clone(), a.content.clone()))
                .collect(),
            context,
            preferences: self.repair_preferences.clone(),
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("gates", &self.gate_types())
            .field("config", &self.config)
            .field("repair", &self.repair.is_some())
            .finish()
    }
}

/// Run one gate under its own timeout, nested inside the pipeline deadline.
async fn evaluate(gate: Arc<dyn Gate>, request: VerificationRequest) -> Result<GateOutcome> {
    let started = Instant::now();
    let pipeline_deadline = request.deadline;
    let gate_deadline = pipeline_deadline.cap(gate.config().timeout);
    let cancel = request.cancel.clone();
    let request = request.with_deadline(gate_deadline);

    match bounded(gate_deadline, &cancel, gate.verify(&request)).await {
        Ok(result) => {
            let result = result?;
            obs::emit_gate_evaluated(
                gate.name(),
                result.issues.len(),
                result.warnings.len(),
                result.metrics.duration_ms,
                result.success,
            );
            Ok(GateOutcome::Completed(result))
        }
        Err(Interrupted::DeadlineExceeded) if !pipeline_deadline.is_expired() => {
            Ok(GateOutcome::TimedOut {
                gate: gate.name().to_string(),
                after: started.elapsed(),
            })
        }
        Err(reason) => Ok(GateOutcome::Interrupted(reason)),
    }
}

/// Keep first-pass results for gates an interrupted re-verification did not
/// finish.
fn carry_over(pass: &mut Pass, first: Pass, warnings: &mut Vec<String>) {
    for result in first.results {
        if pass.results.iter().any(|r| r.gate_type == result.gate_type) {
            continue;
        }
        warnings.push(format!(
            "gate '{}' was not re-verified after repair; reporting its earlier result",
            result.gate_name
        ));
        pass.results.push(result);
    }
}

/// Replace the content of repaired artifacts with new versions.
fn rebuild(artifacts: &[Artifact], modified: &BTreeMap<String, String>) -> Vec<Artifact> {
    artifacts
        .iter()
        .map(|artifact| match modified.get(&artifact.path) {
            Some(content) if *content != artifact.content => artifact.with_content(content.clone()),
            _ => artifact.clone(),
        })
        .collect()
}

fn dominant_language(artifacts: &[Artifact]) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for language in artifacts.iter().filter_map(|a| a.language.as_deref()) {
        *counts.entry(language).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by_key(|(_, n)| *n)
        .map(|(language, _)| language.to_string())
}
