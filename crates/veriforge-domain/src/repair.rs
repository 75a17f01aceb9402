//! Repair request and result types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::issue::Issue;

/// Ambient information about the code being repaired.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RepairContext {
    pub language: Option<String>,
    pub framework: Option<String>,
    /// Paths whose changes need extra care (auth, payments, migrations).
    #[serde(default)]
    pub safety_critical_paths: Vec<String>,
}

impl RepairContext {
    pub fn is_safety_critical(&self, path: &str) -> bool {
        self.safety_critical_paths
            .iter()
            .any(|p| path == p || path.starts_with(&format!("{}/", p.trim_end_matches('/'))))
    }
}

/// How fixes should be shaped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepairPreferences {
    pub favor_safety: bool,
    pub favor_readability: bool,
    pub minimal_changes: bool,
    #[serde(default)]
    pub avoid_patterns: Vec<String>,
    #[serde(default)]
    pub prefer_patterns: Vec<String>,
}

impl Default for RepairPreferences {
    fn default() -> Self {
        Self {
            favor_safety: true,
            favor_readability: true,
            minimal_changes: true,
            avoid_patterns: Vec::new(),
            prefer_patterns: Vec::new(),
        }
    }
}

/// Input to one repair-loop invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RepairRequest {
    pub issues: Vec<Issue>,
    /// Current file contents keyed by artifact path.
    pub files: BTreeMap<String, String>,
    pub context: RepairContext,
    pub preferences: RepairPreferences,
}

/// One literal replacement in one file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileChange {
    pub file: String,
    pub old_content: String,
    pub new_content: String,
}

/// A fix that passed the confidence gate and was applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppliedFix {
    pub issue_id: String,
    pub confidence: f64,
    pub fix_type: String,
    pub description: String,
    pub changes: Vec<FileChange>,
    /// 1-indexed round in which the fix was applied.
    pub iteration: u32,
}

/// Why an issue could not be repaired.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RepairFailureKind {
    /// The model call failed or its output could not be parsed.
    Generation,
    /// The patch did not apply to the tracked content.
    Application,
}

/// An issue that failed repair; it is never retried.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailedRepair {
    pub issue_id: String,
    pub kind: RepairFailureKind,
    pub reason: String,
    pub iteration: u32,
}

/// An issue the loop did not attempt or did not finish.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkippedRepair {
    pub issue_id: String,
    pub reason: String,
}

/// Counters for one repair-loop invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RepairMetrics {
    pub total_issues: u32,
    pub fixed: u32,
    pub failed: u32,
    pub skipped: u32,
    /// `fixed / total_issues`, 0 when nothing was eligible.
    pub success_rate: f64,
    pub average_confidence: f64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
    pub iterations: u32,
}

impl RepairMetrics {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Output of one repair-loop invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RepairResult {
    pub fixes: Vec<AppliedFix>,
    pub failed: Vec<FailedRepair>,
    pub skipped: Vec<SkippedRepair>,
    /// Final contents of every file touched by an applied fix.
    pub modified_files: BTreeMap<String, String>,
    pub iterations: u32,
    pub duration_ms: u64,
    /// Operational notices (deadline reached, cancelled).
    #[serde(default)]
    pub warnings: Vec<String>,
    pub metrics: RepairMetrics,
}

impl RepairResult {
    pub fn is_fixed(&self, issue_id: &str) -> bool {
        self.fixes.iter().any(|f| f.issue_id == issue_id)
    }

    pub fn is_failed(&self, issue_id: &str) -> bool {
        self.failed.iter().any(|f| f.issue_id == issue_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safety_critical_paths_match_prefixes() {
        let ctx = RepairContext {
            safety_critical_paths: vec!["internal/auth".to_string(), "billing.go".to_string()],
            ..Default::default()
        };
        assert!(ctx.is_safety_critical("internal/auth/token.go"));
        assert!(ctx.is_safety_critical("billing.go"));
        assert!(!ctx.is_safety_critical("internal/authz.go"));
    }

    #[test]
    fn test_preferences_default_favor_safety() {
        let prefs = RepairPreferences::default();
        assert!(prefs.favor_safety);
        assert!(prefs.minimal_changes);
    }

    #[test]
    fn test_metrics_total_tokens() {
        let metrics = RepairMetrics {
            prompt_tokens: 120,
            completion_tokens: 30,
            ..Default::default()
        };
        assert_eq!(metrics.total_tokens(), 150);
    }
}
