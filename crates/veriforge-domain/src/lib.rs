//! veriforge domain model.
//!
//! Shared types consumed by every verification component:
//! - `Artifact`: content-addressed generated output
//! - `Issue`: a finding with kind and severity
//! - `GateConfig` / `VerificationResult`: per-gate configuration and outcome
//! - `RepairRequest` / `RepairResult`: repair-loop input and output

pub mod artifact;
pub mod duration_ms;
pub mod error;
pub mod issue;
pub mod repair;
pub mod verification;

pub use artifact::{content_hash, infer_language, Artifact, ArtifactId, ArtifactType};
pub use error::{Result, VerifyError};
pub use issue::{Issue, IssueKind, Severity, SeverityCounts};
pub use repair::{
    AppliedFix, FailedRepair, FileChange, RepairContext, RepairFailureKind, RepairMetrics,
    RepairPreferences, RepairRequest, RepairResult, SkippedRepair,
};
pub use verification::{
    GateConfig, GateType, RepairHint, RuleOverride, VerificationMetrics, VerificationResult,
    DEFAULT_GATE_TIMEOUT, MAX_CRITICAL, MAX_ERRORS, MAX_WARNINGS,
};
