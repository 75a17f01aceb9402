//! Verification findings.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Issue severity. The ordering is total and fixed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
    Blocking,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Info,
        Severity::Warning,
        Severity::Error,
        Severity::Critical,
        Severity::Blocking,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
            Severity::Blocking => "blocking",
        }
    }

    /// Critical and blocking issues fail a gate unconditionally.
    pub fn always_fails(&self) -> bool {
        matches!(self, Severity::Critical | Severity::Blocking)
    }

    /// Parse a tool-reported level (`"warn"`, `"ERROR"`, `"note"`, ...).
    pub fn parse_lenient(level: &str) -> Option<Self> {
        match level.trim().to_ascii_lowercase().as_str() {
            "info" | "note" | "hint" | "help" => Some(Severity::Info),
            "warning" | "warn" => Some(Severity::Warning),
            "error" | "err" => Some(Severity::Error),
            "critical" | "fatal" => Some(Severity::Critical),
            "blocking" | "blocker" => Some(Severity::Blocking),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of issue kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Syntax,
    Semantic,
    Style,
    Security,
    Performance,
    Maintenance,
    Compliance,
}

impl IssueKind {
    pub const ALL: [IssueKind; 7] = [
        IssueKind::Syntax,
        IssueKind::Semantic,
        IssueKind::Style,
        IssueKind::Security,
        IssueKind::Performance,
        IssueKind::Maintenance,
        IssueKind::Compliance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::Syntax => "syntax",
            IssueKind::Semantic => "semantic",
            IssueKind::Style => "style",
            IssueKind::Security => "security",
            IssueKind::Performance => "performance",
            IssueKind::Maintenance => "maintenance",
            IssueKind::Compliance => "compliance",
        }
    }

    /// Severity assigned to findings that arrive without one.
    pub fn default_severity(&self) -> Severity {
        match self {
            IssueKind::Security | IssueKind::Syntax | IssueKind::Semantic => Severity::Error,
            IssueKind::Compliance | IssueKind::Performance => Severity::Warning,
            IssueKind::Style | IssueKind::Maintenance => Severity::Info,
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single finding produced by a gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Issue {
    /// Unique identifier within one pipeline execution.
    pub id: String,

    pub kind: IssueKind,

    /// Severity as reported. `None` means "derive from kind"; read through
    /// [`Issue::severity`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,

    pub title: String,

    pub description: String,

    pub file: Option<String>,

    /// 1-indexed line.
    pub line: Option<u32>,

    /// 1-indexed column.
    pub column: Option<u32>,

    /// Rule identifier (e.g. "no-trailing-whitespace").
    pub rule: Option<String>,

    /// Rule category (e.g. "formatting").
    pub category: Option<String>,

    /// Name of the runner that produced this issue.
    pub source: Option<String>,

    pub suggested_fix: Option<String>,

    #[serde(default)]
    pub references: Vec<String>,
}

impl Issue {
    pub fn new(kind: IssueKind, title: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            severity: None,
            description: title.clone(),
            title,
            file: None,
            line: None,
            column: None,
            rule: None,
            category: None,
            source: None,
            suggested_fix: None,
            references: Vec::new(),
        }
    }

    /// Effective severity: the reported one, or the kind's default.
    pub fn severity(&self) -> Severity {
        self.severity.unwrap_or_else(|| self.kind.default_severity())
    }

    /// Fill in a missing severity from the kind.
    pub fn normalize_severity(&mut self) {
        if self.severity.is_none() {
            self.severity = Some(self.kind.default_severity());
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_location(mut self, file: impl Into<String>, line: u32, column: Option<u32>) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self.column = column;
        self
    }

    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule = Some(rule.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_suggested_fix(mut self, fix: impl Into<String>) -> Self {
        self.suggested_fix = Some(fix.into());
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.references.push(reference.into());
        self
    }

    /// `file:line:column` for display, omitting unknown parts.
    pub fn location(&self) -> Option<String> {
        let file = self.file.as_deref()?;
        Some(match (self.line, self.column) {
            (Some(l), Some(c)) => format!("{file}:{l}:{c}"),
            (Some(l), None) => format!("{file}:{l}"),
            _ => file.to_string(),
        })
    }

    /// Key identifying "the same finding" across executions, ignoring the
    /// per-execution id.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}",
            self.kind,
            self.severity(),
            self.rule.as_deref().unwrap_or(""),
            self.file.as_deref().unwrap_or(""),
            self.line.unwrap_or(0),
            self.title
        )
    }
}

/// Per-severity issue counts.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeverityCounts {
    pub info: u32,
    pub warning: u32,
    pub error: u32,
    pub critical: u32,
    pub blocking: u32,
}

impl SeverityCounts {
    pub fn from_issues<'a>(issues: impl IntoIterator<Item = &'a Issue>) -> Self {
        let mut counts = Self::default();
        for issue in issues {
            counts.add(issue.severity());
        }
        counts
    }

    pub fn add(&mut self, severity: Severity) {
        match severity {
            Severity::Info => self.info += 1,
            Severity::Warning => self.warning += 1,
            Severity::Error => self.error += 1,
            Severity::Critical => self.critical += 1,
            Severity::Blocking => self.blocking += 1,
        }
    }

    pub fn get(&self, severity: Severity) -> u32 {
        match severity {
            Severity::Info => self.info,
            Severity::Warning => self.warning,
            Severity::Error => self.error,
            Severity::Critical => self.critical,
            Severity::Blocking => self.blocking,
        }
    }

    pub fn total(&self) -> u32 {
        self.info + self.warning + self.error + self.critical + self.blocking
    }

    pub fn merge(&mut self, other: &SeverityCounts) {
        self.info += other.info;
        self.warning += other.warning;
        self.error += other.error;
        self.critical += other.critical;
        self.blocking += other.blocking;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering_is_total() {
        for pair in Severity::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_default_severity_by_kind() {
        assert_eq!(IssueKind::Security.default_severity(), Severity::Error);
        assert_eq!(IssueKind::Syntax.default_severity(), Severity::Error);
        assert_eq!(IssueKind::Compliance.default_severity(), Severity::Warning);
        assert_eq!(IssueKind::Performance.default_severity(), Severity::Warning);
        assert_eq!(IssueKind::Style.default_severity(), Severity::Info);
        assert_eq!(IssueKind::Maintenance.default_severity(), Severity::Info);
    }

    #[test]
    fn test_effective_severity() {
        let implicit = Issue::new(IssueKind::Style, "trailing whitespace");
        assert_eq!(implicit.severity(), Severity::Info);

        let explicit = Issue::new(IssueKind::Style, "x").with_severity(Severity::Critical);
        assert_eq!(explicit.severity(), Severity::Critical);
    }

    #[test]
    fn test_normalize_keeps_reported_severity() {
        let mut issue = Issue::new(IssueKind::Security, "secret").with_severity(Severity::Blocking);
        issue.normalize_severity();
        assert_eq!(issue.severity, Some(Severity::Blocking));

        let mut issue = Issue::new(IssueKind::Compliance, "license header");
        issue.normalize_severity();
        assert_eq!(issue.severity, Some(Severity::Warning));
    }

    #[test]
    fn test_parse_lenient() {
        assert_eq!(Severity::parse_lenient("WARN"), Some(Severity::Warning));
        assert_eq!(Severity::parse_lenient(" note "), Some(Severity::Info));
        assert_eq!(Severity::parse_lenient("fatal"), Some(Severity::Critical));
        assert_eq!(Severity::parse_lenient("weird"), None);
    }

    #[test]
    fn test_location_formatting() {
        let issue = Issue::new(IssueKind::Syntax, "x").with_location("a.go", 3, Some(7));
        assert_eq!(issue.location().as_deref(), Some("a.go:3:7"));
        let issue = Issue::new(IssueKind::Syntax, "x").with_location("a.go", 3, None);
        assert_eq!(issue.location().as_deref(), Some("a.go:3"));
        assert!(Issue::new(IssueKind::Syntax, "x").location().is_none());
    }

    #[test]
    fn test_fingerprint_ignores_id() {
        let a = Issue::new(IssueKind::Style, "tabs").with_location("a.py", 1, None);
        let b = Issue::new(IssueKind::Style, "tabs").with_location("a.py", 1, None);
        assert_ne!(a.id, b.id);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_severity_counts() {
        let issues = vec![
            Issue::new(IssueKind::Style, "a"),
            Issue::new(IssueKind::Syntax, "b"),
            Issue::new(IssueKind::Syntax, "c").with_severity(Severity::Blocking),
        ];
        let counts = SeverityCounts::from_issues(&issues);
        assert_eq!(counts.info, 1);
        assert_eq!(counts.error, 1);
        assert_eq!(counts.blocking, 1);
        assert_eq!(counts.total(), 3);
    }
}
