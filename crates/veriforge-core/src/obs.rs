//! Structured observability hooks for pipeline and repair lifecycle events.
//!
//! Every event carries an `event` field (`gate.evaluated`, `repair.round`,
//! ...) so JSON logs can be filtered without parsing messages. Export of
//! metrics or traces is left to the embedding process.

use tracing::{info, warn, Span};

/// Span scoping one pipeline execution, tagged with its run id.
///
/// Entered guards are not `Send`, so async callers attach the span with
/// `tracing::Instrument` via [`PipelineSpan::span`] instead of entering it.
pub struct PipelineSpan {
    span: Span,
    run_id: String,
}

impl PipelineSpan {
    pub fn new(run_id: &str) -> Self {
        let span = tracing::info_span!("veriforge.pipeline", run_id = %run_id);
        Self {
            span,
            run_id: run_id.to_string(),
        }
    }

    pub fn span(&self) -> Span {
        self.span.clone()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

pub fn emit_pipeline_started(run_id: &str, gates: usize, artifacts: usize, parallel: bool) {
    info!(
        event = "pipeline.started",
        run_id = %run_id,
        gates = gates,
        artifacts = artifacts,
        parallel = parallel,
    );
}

pub fn emit_pipeline_finished(
    run_id: &str,
    duration_ms: u64,
    total_issues: usize,
    success: bool,
    timed_out: bool,
) {
    info!(
        event = "pipeline.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        total_issues = total_issues,
        success = success,
        timed_out = timed_out,
    );
}

/// Gate filtered out before execution (disabled, not applicable, wrong environment).
pub fn emit_gate_skipped(gate: &str, reason: &str) {
    info!(event = "gate.skipped", gate = %gate, reason = %reason);
}

pub fn emit_gate_evaluated(gate: &str, issues: usize, warnings: usize, duration_ms: u64, passed: bool) {
    info!(
        event = "gate.evaluated",
        gate = %gate,
        issues = issues,
        warnings = warnings,
        duration_ms = duration_ms,
        passed = passed,
    );
}

/// Runner-level failure; reported as a warning, never as an issue.
pub fn emit_runner_failed(gate: &str, runner: &str, error: &dyn std::fmt::Display) {
    warn!(event = "runner.failed", gate = %gate, runner = %runner, error = %error);
}

pub fn emit_repair_round(iteration: u32, attempted: usize, fixed: usize, failed: usize) {
    info!(
        event = "repair.round",
        iteration = iteration,
        attempted = attempted,
        fixed = fixed,
        failed = failed,
    );
}

pub fn emit_fix_applied(issue_id: &str, file: &str, confidence: f64) {
    info!(event = "repair.fix_applied", issue_id = %issue_id, file = %file, confidence = confidence);
}

pub fn emit_fix_rejected(issue_id: &str, reason: &str) {
    info!(event = "repair.fix_rejected", issue_id = %issue_id, reason = %reason);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_span_keeps_run_id() {
        let span = PipelineSpan::new("run-42");
        assert_eq!(span.run_id(), "run-42");
        let _entered = span.span().entered();
        emit_gate_skipped("unit_test", "not applicable");
    }
}
