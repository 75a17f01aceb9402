//! veriforge core library
//!
//! Verification gates for generated code, the pipeline that runs them, and
//! the model-driven repair loop that patches what they find.

pub mod config;
pub mod contract;
pub mod deadline;
pub mod fakes;
pub mod gate;
pub mod llm;
pub mod obs;
pub mod pipeline;
pub mod pool;
pub mod repair;
pub mod runner;
pub mod telemetry;

pub use config::Settings;

pub use contract::{parse_contract, ContractSpec, ContractValidator, HttpProbeValidator, SpecType};

pub use deadline::{bounded, CancelHandle, CancelSignal, Deadline, Interrupted};

pub use gate::{
    determine_success, ContractTestGate, Gate, GateSettings, StaticAnalysisGate, UnitTestGate,
    VerificationRequest,
};

pub use llm::{
    ModelClient, ModelRequest, ModelResponse, ModelSettings, ModelTier, OpenAiCompatibleClient,
    TokenUsage,
};

pub use pipeline::{Grade, Pipeline, PipelineConfig, PipelineResult, QualityScore};

pub use repair::{RepairConfig, RepairLoop, RepairPhase};

pub use runner::{
    CommandRunner, PatternRunner, Runner, RunnerConfig, RunnerRegistry, RunnerResult,
    TestCommandRunner, TestFramework,
};

pub use telemetry::{init_tracing, LogFormat, LogSettings};

pub use veriforge_domain::{
    Artifact, ArtifactType, GateConfig, GateType, Issue, IssueKind, RepairRequest, RepairResult,
    Result, Severity, VerificationResult, VerifyError,
};
