//! Quality score derived from issue severities.

use std::fmt;

use serde::{Deserialize, Serialize};

use veriforge_domain::{Issue, SeverityCounts};

const CRITICAL_WEIGHT: f64 = 0.5;
const ERROR_WEIGHT: f64 = 0.3;
const WARNING_WEIGHT: f64 = 0.1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 0.9 => Grade::A,
            s if s >= 0.8 => Grade::B,
            s if s >= 0.7 => Grade::C,
            s if s >= 0.6 => Grade::D,
            _ => Grade::F,
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        };
        f.write_str(letter)
    }
}

/// Scores in `[0, 1]`, higher is better.
///
/// Every category currently carries the composite score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityScore {
    pub security: f64,
    pub maintainability: f64,
    pub performance: f64,
    pub compliance: f64,
    pub overall: f64,
    pub grade: Grade,
    pub counts: SeverityCounts,
}

impl QualityScore {
    pub fn from_issues<'a>(issues: impl IntoIterator<Item = &'a Issue>) -> Self {
        Self::from_counts(SeverityCounts::from_issues(issues))
    }

    /// Weighted penalty normalized by the issue count, clamped at zero.
    /// Blocking issues weigh as much as critical ones.
    pub fn from_counts(counts: SeverityCounts) -> Self {
        let penalty = (f64::from(counts.critical + counts.blocking) * CRITICAL_WEIGHT
            + f64::from(counts.error) * ERROR_WEIGHT
            + f64::from(counts.warning) * WARNING_WEIGHT)
            / f64::from(counts.total().max(1));
        let score = (1.0 - penalty).clamp(0.0, 1.0);
        Self {
            security: score,
            maintainability: score,
            performance: score,
            compliance: score,
            overall: score,
            grade: Grade::from_score(score),
            counts,
        }
    }
}

impl Default for QualityScore {
    fn default() -> Self {
        Self::from_counts(SeverityCounts::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veriforge_domain::{IssueKind, Severity};

    fn issue(severity: Severity) -> Issue {
        Issue::new(IssueKind::Style, "x").with_severity(severity)
    }

    #[test]
    fn test_no_issues_is_perfect() {
        let score = QualityScore::default();
        assert_eq!(score.overall, 1.0);
        assert_eq!(score.grade, Grade::A);
    }

    #[test]
    fn test_weights() {
        let issues = [issue(Severity::Error)];
        let score = QualityScore::from_issues(&issues);
        assert!((score.overall - 0.7).abs() < 1e-9);
        assert_eq!(score.grade, Grade::C);

        let issues = [issue(Severity::Warning), issue(Severity::Info)];
        let score = QualityScore::from_issues(&issues);
        assert!((score.overall - 0.95).abs() < 1e-9);
        assert_eq!(score.grade, Grade::A);
    }

    #[test]
    fn test_blocking_weighs_like_critical() {
        let blocking = QualityScore::from_issues(&[issue(Severity::Blocking)]);
        let critical = QualityScore::from_issues(&[issue(Severity::Critical)]);
        assert_eq!(blocking.overall, critical.overall);
        assert_eq!(blocking.grade, Grade::F);
    }

    #[test]
    fn test_grade_boundaries() {
        assert_eq!(Grade::from_score(0.9), Grade::A);
        assert_eq!(Grade::from_score(0.8), Grade::B);
        assert_eq!(Grade::from_score(0.7), Grade::C);
        assert_eq!(Grade::from_score(0.6), Grade::D);
        assert_eq!(Grade::from_score(0.59), Grade::F);
    }
}
