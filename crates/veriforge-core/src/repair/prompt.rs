//! Prompt construction for repair requests.

use std::fmt::Write as _;

use veriforge_domain::{Issue, RepairContext, RepairPreferences};

use super::protocol::PROTOCOL_VERSION;

/// System instructions describing the response protocol.
pub fn system_prompt() -> String {
    format!(
        "You repair defects in generated source code. Reply using response protocol v{PROTOCOL_VERSION}:\n\
         CONFIDENCE: <number between 0 and 1>\n\
         FIX_TYPE: <short label>\n\
         DESCRIPTION: <one line>\n\
         FILE: <path>\n\
         REPLACE:\n```\n<exact text currently in the file>\n```\n\
         WITH:\n```\n<replacement text>\n```\n\
         Repeat FILE/REPLACE/WITH for further changes. REPLACE text must match the file exactly.\n\
         If you cannot fix the issue safely, reply with NO_FIX: <reason>."
    )
}

/// Build the user prompt for one issue.
///
/// `file` is the path and current tracked content of the file the issue
/// points at, when known.
pub fn build_prompt(
    issue: &Issue,
    file: Option<(&str, &str)>,
    context: &RepairContext,
    preferences: &RepairPreferences,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Fix the following issue.");
    let _ = writeln!(out);
    let _ = writeln!(out, "Kind: {}", issue.kind.as_str());
    let _ = writeln!(out, "Severity: {}", issue.severity().as_str());
    let _ = writeln!(out, "Title: {}", issue.title);
    if !issue.description.is_empty() {
        let _ = writeln!(out, "Description: {}", issue.description);
    }
    if let Some(location) = issue.location() {
        let _ = writeln!(out, "Location: {location}");
    }
    if let Some(rule) = &issue.rule {
        let _ = writeln!(out, "Rule: {rule}");
    }
    if let Some(suggestion) = &issue.suggested_fix {
        let _ = writeln!(out, "Suggested fix: {suggestion}");
    }

    if context.language.is_some() || context.framework.is_some() {
        let _ = writeln!(out);
        if let Some(language) = &context.language {
            let _ = writeln!(out, "Language: {language}");
        }
        if let Some(framework) = &context.framework {
            let _ = writeln!(out, "Framework: {framework}");
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "Constraints:");
    if preferences.favor_safety {
        let _ = writeln!(out, "- Prefer the safest correct change; never weaken validation or error handling.");
    }
    if preferences.minimal_changes {
        let _ = writeln!(out, "- Change as little as possible.");
    }
    if preferences.favor_readability {
        let _ = writeln!(out, "- Keep the result readable and idiomatic.");
    }
    for pattern in &preferences.avoid_patterns {
        let _ = writeln!(out, "- Avoid: {pattern}");
    }
    for pattern in &preferences.prefer_patterns {
        let _ = writeln!(out, "- Prefer: {pattern}");
    }

    if let Some((path, content)) = file {
        if context.is_safety_critical(path) {
            let _ = writeln!(
                out,
                "- {path} is safety-critical: reply NO_FIX unless the fix is certain."
            );
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "Current content of {path}:");
        let _ = writeln!(out, "```");
        let _ = writeln!(out, "{content}");
        let _ = writeln!(out, "```");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use veriforge_domain::{IssueKind, Severity};

    #[test]
    fn test_prompt_embeds_issue_and_file() {
        let issue = Issue::new(IssueKind::Syntax, "unbalanced '{'")
            .with_severity(Severity::Error)
            .with_location("main.go", 3, Some(12))
            .with_rule("unbalanced-delimiter");
        let prompt = build_prompt(
            &issue,
            Some(("main.go", "package main\nfunc main() {\n")),
            &RepairContext {
                language: Some("go".to_string()),
                ..Default::default()
            },
            &RepairPreferences {
                avoid_patterns: vec!["panic".to_string()],
                ..Default::default()
            },
        );
        assert!(prompt.contains("Kind: syntax"));
        assert!(prompt.contains("Severity: error"));
        assert!(prompt.contains("Location: main.go:3:12"));
        assert!(prompt.contains("Language: go"));
        assert!(prompt.contains("- Avoid: panic"));
        assert!(prompt.contains("func main() {"));
        assert!(!prompt.contains("safety-critical"));
    }

    #[test]
    fn test_safety_critical_file_is_flagged() {
        let issue = Issue::new(IssueKind::Style, "trailing whitespace").with_file("auth/token.go");
        let context = RepairContext {
            safety_critical_paths: vec!["auth".to_string()],
            ..Default::default()
        };
        let prompt = build_prompt(
            &issue,
            Some(("auth/token.go", "x")),
            &context,
            &RepairPreferences::default(),
        );
        assert!(prompt.contains("auth/token.go is safety-critical"));
    }

    #[test]
    fn test_system_prompt_names_protocol_version() {
        assert!(system_prompt().contains(&format!("v{PROTOCOL_VERSION}")));
    }
}
