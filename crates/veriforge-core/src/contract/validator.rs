//! Contract validators.
//!
//! A validator checks one parsed contract, keyed by (spec type, framework).
//! [`HttpProbeValidator`] reports structural problems and, when a base URL is
//! known and reachable, probes the declared endpoints over HTTP.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use veriforge_domain::{Issue, IssueKind, Severity};

use super::openapi::{ContractSpec, StructuralProblem};
use crate::deadline::{bounded, CancelSignal, Deadline, Interrupted};

/// Rule id for structural contract defects.
pub const RULE_CONTRACT_STRUCTURE: &str = "contract-structure";
/// Rule id for endpoints that misbehave when probed.
pub const RULE_CONTRACT_ENDPOINT: &str = "contract-endpoint";

/// Framework key used when an artifact declares none.
pub const DEFAULT_FRAMEWORK: &str = "http";

/// Endpoints tried, in order, to decide whether a service is up.
pub const HEALTH_ENDPOINTS: [&str; 4] = ["/health", "/healthz", "/ready", "/"];

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Outcome of validating one contract.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContractValidation {
    pub issues: Vec<Issue>,
    pub warnings: Vec<String>,
    pub endpoints_declared: usize,
    pub endpoints_exercised: usize,
    /// Whether live probing took place.
    pub probed: bool,
}

impl ContractValidation {
    /// Exercised / declared as a percentage; `None` when nothing was probed.
    pub fn coverage_percent(&self) -> Option<f64> {
        if !self.probed {
            return None;
        }
        if self.endpoints_declared == 0 {
            return Some(100.0);
        }
        Some(self.endpoints_exercised as f64 * 100.0 / self.endpoints_declared as f64)
    }
}

/// Validates contracts of one (spec type, framework) pair.
#[async_trait]
pub trait ContractValidator: Send + Sync {
    fn spec_type(&self) -> &str;

    fn framework(&self) -> &str;

    /// Whether `validate` reads the contract documents from disk.
    fn needs_workdir(&self) -> bool {
        false
    }

    /// `workdir` holds the contract documents at their artifact paths. It is
    /// only set for validators that need it and when staging succeeded.
    async fn validate(
        &self,
        spec: &ContractSpec,
        workdir: Option<&Path>,
        base_url: Option<&str>,
        deadline: Deadline,
        cancel: &CancelSignal,
    ) -> anyhow::Result<ContractValidation>;
}

/// Convert a structural problem into a `semantic` error issue naming the
/// offending method and path.
pub fn structural_issue(spec: &ContractSpec, problem: &StructuralProblem) -> Issue {
    let target = match (&problem.method, &problem.path) {
        (Some(m), Some(p)) => format!("{m} {p}: "),
        (None, Some(p)) => format!("{p}: "),
        _ => String::new(),
    };
    Issue::new(
        IssueKind::Semantic,
        format!("{target}{}", problem.message),
    )
    .with_severity(Severity::Error)
    .with_file(spec.source.clone())
    .with_rule(RULE_CONTRACT_STRUCTURE)
    .with_category(spec.spec_type.as_str())
}

/// Best-effort HTTP prober.
#[derive(Debug, Clone)]
pub struct HttpProbeValidator {
    spec_type: String,
    client: reqwest::Client,
    probe_timeout: Duration,
}

impl HttpProbeValidator {
    pub fn new(spec_type: impl Into<String>) -> Self {
        Self::with_timeout(spec_type, DEFAULT_PROBE_TIMEOUT)
    }

    pub fn with_timeout(spec_type: impl Into<String>, probe_timeout: Duration) -> Self {
        Self {
            spec_type: spec_type.into(),
            client: reqwest::Client::new(),
            probe_timeout,
        }
    }

    /// Issue one GET. `Ok(None)` means the transport failed.
    async fn get(
        &self,
        url: &str,
        deadline: Deadline,
        cancel: &CancelSignal,
    ) -> Result<Option<reqwest::StatusCode>, Interrupted> {
        let timeout = deadline
            .remaining()
            .map_or(self.probe_timeout, |r| r.min(self.probe_timeout));
        let request = self.client.get(url).timeout(timeout).send();
        match bounded(deadline, cancel, request).await? {
            Ok(response) => Ok(Some(response.status())),
            Err(err) => {
                debug!(url = %url, error = %err, "probe failed");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl ContractValidator for HttpProbeValidator {
    fn spec_type(&self) -> &str {
        &self.spec_type
    }

    fn framework(&self) -> &str {
        DEFAULT_FRAMEWORK
    }

    async fn validate(
        &self,
        spec: &ContractSpec,
        _workdir: Option<&Path>,
        base_url: Option<&str>,
        deadline: Deadline,
        cancel: &CancelSignal,
    ) -> anyhow::Result<ContractValidation> {
        let mut validation = ContractValidation {
            issues: spec
                .problems
                .iter()
                .map(|p| structural_issue(spec, p))
                .collect(),
            endpoints_declared: spec.endpoints.len(),
            ..Default::default()
        };

        let Some(base) = base_url.map(|b| b.trim_end_matches('/')) else {
            return Ok(validation);
        };

        let mut reachable = false;
        for health in HEALTH_ENDPOINTS {
            match self.get(&format!("{base}{health}"), deadline, cancel).await {
                Ok(Some(_)) => {
                    reachable = true;
                    break;
                }
                Ok(None) => {}
                Err(reason) => {
                    validation
                        .warnings
                        .push(format!("contract probing of {base} stopped: {reason:?}"));
                    return Ok(validation);
                }
            }
        }
        if !reachable {
            validation.warnings.push(format!(
                "base URL {base} is unreachable; validated {} structurally only",
                spec.source
            ));
            return Ok(validation);
        }

        validation.probed = true;
        for endpoint in spec.probeable() {
            let url = format!("{base}{}", endpoint.path);
            let status = match self.get(&url, deadline, cancel).await {
                Ok(Some(status)) => status,
                Ok(None) => {
                    validation
                        .warnings
                        .push(format!("{endpoint}: no response from {url}"));
                    continue;
                }
                Err(reason) => {
                    validation
                        .warnings
                        .push(format!("contract probing of {base} stopped: {reason:?}"));
                    break;
                }
            };
            validation.endpoints_exercised += 1;
            if status == reqwest::StatusCode::NOT_FOUND || status.is_server_error() {
                validation.issues.push(
                    Issue::new(
                        IssueKind::Semantic,
                        format!("{endpoint} returned {}", status.as_u16()),
                    )
                    .with_severity(Severity::Error)
                    .with_description(format!(
                        "declared endpoint {endpoint} answered {status} at {url}"
                    ))
                    .with_file(spec.source.clone())
                    .with_rule(RULE_CONTRACT_ENDPOINT)
                    .with_category(spec.spec_type.as_str()),
                );
            }
        }

        Ok(validation)
    }
}
