//! Confidence-gated repair loop.
//!
//! A loop moves through `Idle -> Filtering -> Iterating -> Done` once per
//! [`RepairLoop::repair`] call. Filtering keeps issues whose kind is allowed
//! and whose severity reaches the configured minimum. Each round then asks
//! the model once for every still-open issue:
//!
//! - a fix at or above the confidence threshold is applied and the issue is
//!   closed as fixed
//! - a model error, malformed response, or patch that does not apply closes
//!   the issue as failed; failed issues are never retried
//! - a decline (`NO_FIX` or low confidence) leaves the issue open for the
//!   next round
//!
//! A round without any fix ends the loop.

pub mod apply;
pub mod prompt;
pub mod protocol;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use veriforge_domain::{
    AppliedFix, FailedRepair, Issue, IssueKind, RepairFailureKind, RepairMetrics, RepairRequest,
    RepairResult, Severity, SkippedRepair,
};

use crate::deadline::{bounded, CancelSignal, Deadline, Interrupted};
use crate::llm::{ModelClient, ModelRequest, ModelTier, TokenUsage};
use crate::obs;

pub use apply::{apply_change, apply_fix, ApplyError};
pub use prompt::{build_prompt, system_prompt};
pub use protocol::{parse_response, render_response, ParsedResponse, ProposedFix, PROTOCOL_VERSION};

/// Repair-loop settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RepairConfig {
    pub max_iterations: u32,
    /// Fixes below this confidence are treated as declines.
    pub confidence_threshold: f64,
    pub min_severity: Severity,
    pub allowed_issue_types: Vec<IssueKind>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Upper bound for one `repair` call.
    #[serde(with = "veriforge_domain::duration_ms")]
    pub timeout: Duration,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            confidence_threshold: 0.7,
            min_severity: Severity::Info,
            allowed_issue_types: vec![IssueKind::Syntax, IssueKind::Style, IssueKind::Maintenance],
            max_tokens: 2048,
            temperature: 0.1,
            timeout: Duration::from_secs(600),
        }
    }
}

impl RepairConfig {
    pub fn allows(&self, issue: &Issue) -> bool {
        self.allowed_issue_types.contains(&issue.kind) && issue.severity() >= self.min_severity
    }

    /// Stronger model for critical and blocking issues.
    pub fn tier_for(&self, issue: &Issue) -> ModelTier {
        if issue.severity() >= Severity::Critical {
            ModelTier::Advanced
        } else {
            ModelTier::Standard
        }
    }
}

/// Lifecycle of one repair call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RepairPhase {
    Idle,
    Filtering,
    Iterating,
    Done,
}

impl RepairPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepairPhase::Idle => "idle",
            RepairPhase::Filtering => "filtering",
            RepairPhase::Iterating => "iterating",
            RepairPhase::Done => "done",
        }
    }
}

/// Result of asking the model about one issue.
enum Attempt {
    Proposed(ProposedFix),
    Declined(String),
    Failed(String),
}

pub struct RepairLoop {
    client: Arc<dyn ModelClient>,
    config: RepairConfig,
    /// Usage across every `repair` call on this loop.
    usage: Mutex<TokenUsage>,
}

impl RepairLoop {
    pub fn new(client: Arc<dyn ModelClient>, config: RepairConfig) -> Self {
        Self {
            client,
            config,
            usage: Mutex::new(TokenUsage::default()),
        }
    }

    pub fn config(&self) -> &RepairConfig {
        &self.config
    }

    /// Cumulative token and cost usage.
    pub async fn total_usage(&self) -> TokenUsage {
        *self.usage.lock().await
    }

    /// Run the loop without an external deadline or cancellation.
    pub async fn repair(&self, request: &RepairRequest) -> RepairResult {
        self.repair_bounded(request, Deadline::none(), &CancelSignal::never())
            .await
    }

    /// Run the loop over `request`.
    ///
    /// The working copy of `request.files` is owned by this call. Fixes
    /// applied before the deadline or a cancellation are kept.
    pub async fn repair_bounded(
        &self,
        request: &RepairRequest,
        deadline: Deadline,
        cancel: &CancelSignal,
    ) -> RepairResult {
        let started = Instant::now();
        let deadline = deadline.cap(self.config.timeout);
        let mut phase = RepairPhase::Idle;
        let mut result = RepairResult::default();
        let mut usage = TokenUsage::default();

        advance(&mut phase, RepairPhase::Filtering);
        let mut seen = HashSet::new();
        let mut open = Vec::new();
        for issue in &request.issues {
            if !seen.insert(issue.id.as_str()) {
                continue;
            }
            if self.config.allows(issue) {
                open.push(issue.clone());
            } else {
                result.skipped.push(SkippedRepair {
                    issue_id: issue.id.clone(),
                    reason: format!(
                        "{} issue of severity {} is not eligible for repair",
                        issue.kind,
                        issue.severity()
                    ),
                });
            }
        }
        let total = seen.len();

        advance(&mut phase, RepairPhase::Iterating);
        let mut files = request.files.clone();
        let mut original: BTreeMap<String, String> = BTreeMap::new();

        for iteration in 1..=self.config.max_iterations {
            if open.is_empty() {
                break;
            }
            result.iterations = iteration;

            let mut still_open = Vec::new();
            let mut fixed = 0usize;
            let mut failed = 0usize;
            let mut interrupted = None;
            let attempted = open.len();
            let mut queue = std::mem::take(&mut open).into_iter();

            for issue in queue.by_ref() {
                let attempt = bounded(
                    deadline,
                    cancel,
                    self.attempt(&issue, &files, request, &mut usage),
                )
                .await;

                let proposed = match attempt {
                    Err(reason) => {
                        interrupted = Some(reason);
                        still_open.push(issue);
                        break;
                    }
                    Ok(Attempt::Declined(reason)) => {
                        obs::emit_fix_rejected(&issue.id, &reason);
                        still_open.push(issue);
                        continue;
                    }
                    Ok(Attempt::Failed(reason)) => {
                        failed += 1;
                        result.failed.push(FailedRepair {
                            issue_id: issue.id.clone(),
                            kind: RepairFailureKind::Generation,
                            reason,
                            iteration,
                        });
                        continue;
                    }
                    Ok(Attempt::Proposed(fix)) => fix,
                };

                let snapshot: Vec<(String, String)> = proposed
                    .changes
                    .iter()
                    .filter_map(|c| files.get(&c.file).map(|content| (c.file.clone(), content.clone())))
                    .collect();
                match apply_fix(&mut files, &proposed.changes) {
                    Ok(touched) if touched.is_empty() => {
                        failed += 1;
                        result.failed.push(FailedRepair {
                            issue_id: issue.id.clone(),
                            kind: RepairFailureKind::Application,
                            reason: "fix left every file unchanged".to_string(),
                            iteration,
                        });
                    }
                    Ok(touched) => {
                        for (path, content) in snapshot {
                            if touched.contains(&path) {
                                original.entry(path).or_insert(content);
                            }
                        }
                        let file = proposed
                            .changes
                            .first()
                            .map(|c| c.file.as_str())
                            .unwrap_or_default();
                        obs::emit_fix_applied(&issue.id, file, proposed.confidence);
                        fixed += 1;
                        result.fixes.push(AppliedFix {
                            issue_id: issue.id.clone(),
                            confidence: proposed.confidence,
                            fix_type: proposed.fix_type,
                            description: proposed.description,
                            changes: proposed.changes,
                            iteration,
                        });
                    }
                    Err(err) => {
                        failed += 1;
                        result.failed.push(FailedRepair {
                            issue_id: issue.id.clone(),
                            kind: RepairFailureKind::Application,
                            reason: err.to_string(),
                            iteration,
                        });
                    }
                }
            }

            still_open.extend(queue);
            open = still_open;
            obs::emit_repair_round(iteration, attempted, fixed, failed);

            if let Some(reason) = interrupted {
                result.warnings.push(match reason {
                    Interrupted::DeadlineExceeded => {
                        format!("repair deadline reached during iteration {iteration}")
                    }
                    Interrupted::Cancelled => format!("repair cancelled during iteration {iteration}"),
                });
                break;
            }
            if fixed == 0 {
                debug!(iteration = iteration, "round produced no fixes");
                break;
            }
        }

        let unresolved = if result.warnings.is_empty() {
            "still open when the loop ended"
        } else {
            "not attempted before the loop was interrupted"
        };
        result
            .skipped
            .extend(open.into_iter().map(|issue| SkippedRepair {
                issue_id: issue.id,
                reason: unresolved.to_string(),
            }));

        result.modified_files = files
            .into_iter()
            .filter(|(path, content)| {
                original
                    .get(path)
                    .is_some_and(|before| before != content)
            })
            .collect();

        {
            let mut total_usage = self.usage.lock().await;
            total_usage.add(&usage);
        }

        result.duration_ms = started.elapsed().as_millis() as u64;
        result.metrics = metrics(&result, total, usage);
        advance(&mut phase, RepairPhase::Done);
        info!(
            fixed = result.metrics.fixed,
            failed = result.metrics.failed,
            skipped = result.metrics.skipped,
            iterations = result.iterations,
            "repair loop finished"
        );
        result
    }

    async fn attempt(
        &self,
        issue: &Issue,
        files: &BTreeMap<String, String>,
        request: &RepairRequest,
        usage: &mut TokenUsage,
    ) -> Attempt {
        let target = issue
            .file
            .as_deref()
            .and_then(|path| files.get_key_value(path))
            .or_else(|| {
                // a lone tracked file is the only possible target
                (issue.file.is_none() && files.len() == 1)
                    .then(|| files.iter().next())
                    .flatten()
            });
        let Some((path, content)) = target else {
            return Attempt::Failed(format!(
                "no tracked content for {}",
                issue.file.as_deref().unwrap_or("<unknown file>")
            ));
        };

        let prompt = build_prompt(
            issue,
            Some((path.as_str(), content.as_str())),
            &request.context,
            &request.preferences,
        );
        let model_request = ModelRequest::new(prompt, self.config.tier_for(issue))
            .with_system(system_prompt())
            .with_limits(self.config.max_tokens, self.config.temperature);

        let response = match self.client.complete(&model_request).await {
            Ok(response) => response,
            Err(err) => return Attempt::Failed(format!("model call failed: {err:#}")),
        };
        usage.add(&response.usage);

        match parse_response(&response.text) {
            Err(err) => Attempt::Failed(err.to_string()),
            Ok(ParsedResponse::Declined { reason }) => {
                Attempt::Declined(reason.unwrap_or_else(|| "model declined".to_string()))
            }
            Ok(ParsedResponse::Fix(fix)) if fix.confidence < self.config.confidence_threshold => {
                Attempt::Declined(format!(
                    "confidence {:.2} below threshold {:.2}",
                    fix.confidence, self.config.confidence_threshold
                ))
            }
            Ok(ParsedResponse::Fix(fix)) => Attempt::Proposed(fix),
        }
    }
}

fn advance(phase: &mut RepairPhase, next: RepairPhase) {
    debug_assert!(next > *phase, "repair phase moved backwards");
    debug!(from = phase.as_str(), to = next.as_str(), "repair phase");
    *phase = next;
}

fn metrics(result: &RepairResult, total: usize, usage: TokenUsage) -> RepairMetrics {
    let fixed = result.fixes.len();
    let average_confidence = if fixed == 0 {
        0.0
    } else {
        result.fixes.iter().map(|f| f.confidence).sum::<f64>() / fixed as f64
    };
    RepairMetrics {
        total_issues: total as u32,
        fixed: fixed as u32,
        failed: result.failed.len() as u32,
        skipped: result.skipped.len() as u32,
        success_rate: if total == 0 {
            0.0
        } else {
            fixed as f64 / total as f64
        },
        average_confidence,
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        cost_usd: usage.cost_usd,
        iterations: result.iterations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FailingModel, ScriptedModel};

    fn syntax_issue(file: &str) -> Issue {
        Issue::new(IssueKind::Syntax, "unbalanced '{'")
            .with_severity(Severity::Error)
            .with_location(file, 2, None)
    }

    fn request(issues: Vec<Issue>) -> RepairRequest {
        RepairRequest {
            issues,
            files: BTreeMap::from([(
                "main.go".to_string(),
                "package main\nfunc main() {\n".to_string(),
            )]),
            ..Default::default()
        }
    }

    const FIX: &str = "CONFIDENCE: 0.9\nFIX_TYPE: syntax\nDESCRIPTION: close brace\nFILE: main.go\nREPLACE: func main() {\nWITH: func main() {}\n";

    #[test]
    fn test_config_defaults() {
        let config = RepairConfig::default();
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.confidence_threshold, 0.7);
        assert!(!config.allowed_issue_types.contains(&IssueKind::Security));
    }

    #[test]
    fn test_tier_follows_severity() {
        let config = RepairConfig::default();
        assert_eq!(config.tier_for(&syntax_issue("a")), ModelTier::Standard);
        let critical = syntax_issue("a").with_severity(Severity::Critical);
        assert_eq!(config.tier_for(&critical), ModelTier::Advanced);
    }

    #[tokio::test]
    async fn test_fix_is_applied_and_usage_recorded() {
        let model = Arc::new(ScriptedModel::new(vec![FIX]));
        let repair = RepairLoop::new(model.clone(), RepairConfig::default());
        let issue = syntax_issue("main.go");
        let result = repair.repair(&request(vec![issue.clone()])).await;

        assert!(result.is_fixed(&issue.id));
        assert_eq!(result.iterations, 1);
        assert_eq!(result.modified_files["main.go"], "package main\nfunc main() {}\n");
        assert_eq!(result.metrics.success_rate, 1.0);
        assert!(result.metrics.total_tokens() > 0);
        assert_eq!(repair.total_usage().await.total_tokens(), result.metrics.total_tokens());
        assert_eq!(model.requests().await[0].tier, ModelTier::Standard);
    }

    #[tokio::test]
    async fn test_model_error_is_a_generation_failure() {
        let repair = RepairLoop::new(Arc::new(FailingModel::new("503")), RepairConfig::default());
        let issue = syntax_issue("main.go");
        let result = repair.repair(&request(vec![issue.clone()])).await;
        assert!(result.is_failed(&issue.id));
        assert_eq!(result.failed[0].kind, RepairFailureKind::Generation);
        assert!(result.modified_files.is_empty());
    }

    #[tokio::test]
    async fn test_issue_without_tracked_file_fails() {
        let model = Arc::new(ScriptedModel::new(vec![FIX]));
        let repair = RepairLoop::new(model.clone(), RepairConfig::default());
        let issue = syntax_issue("other.go");
        let result = repair.repair(&request(vec![issue.clone()])).await;
        assert!(result.is_failed(&issue.id));
        assert_eq!(model.call_count().await, 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_keeps_issue_open() {
        let model = Arc::new(ScriptedModel::new(vec![FIX]));
        let repair = RepairLoop::new(model, RepairConfig::default());
        let (handle, signal) = CancelSignal::pair();
        handle.cancel();
        let issue = syntax_issue("main.go");
        let result = repair
            .repair_bounded(&request(vec![issue.clone()]), Deadline::none(), &signal)
            .await;
        assert!(result.fixes.is_empty());
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.warnings.len(), 1);
    }
}
