//! Text protocol spoken between the repair loop and the model.
//!
//! Version 1 grammar, one field per line:
//!
//! ```text
//! response   := no-fix | fix
//! no-fix     := "NO_FIX" [":" reason]
//! fix        := "CONFIDENCE:" number
//!               ["FIX_TYPE:" label]
//!               ["DESCRIPTION:" text]
//!               change+
//! change     := ["FILE:" path] "REPLACE:" body "WITH:" body
//! body       := inline-text | fenced-block | bare-block
//! ```
//!
//! A fenced block starts on the line after the label and runs to a closing
//! fence of the same length; its contents are taken verbatim. A bare block
//! runs to the next label line. The whole response may itself be wrapped in a
//! code fence. Prose lines between fields are ignored.

use veriforge_domain::{FileChange, Result, VerifyError};

pub const PROTOCOL_VERSION: u32 = 1;

pub const NO_FIX: &str = "NO_FIX";
const CONFIDENCE: &str = "CONFIDENCE:";
const FIX_TYPE: &str = "FIX_TYPE:";
const DESCRIPTION: &str = "DESCRIPTION:";
const FILE: &str = "FILE:";
const REPLACE: &str = "REPLACE:";
const WITH: &str = "WITH:";

const DEFAULT_FIX_TYPE: &str = "patch";

/// A fix as proposed by the model, before the confidence gate.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposedFix {
    pub confidence: f64,
    pub fix_type: String,
    pub description: String,
    pub changes: Vec<FileChange>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedResponse {
    Fix(ProposedFix),
    /// The model declined to produce a fix.
    Declined { reason: Option<String> },
}

/// Parse a model response.
///
/// Malformed responses are [`VerifyError::Protocol`] errors: a missing or
/// out-of-range confidence, a `REPLACE:` with no file or no `WITH:`, an empty
/// replacement anchor, or no changes at all.
pub fn parse_response(text: &str) -> Result<ParsedResponse> {
    let lines: Vec<&str> = strip_outer_fence(text).lines().collect();

    let mut confidence = None;
    let mut fix_type = None;
    let mut description = None;
    let mut file: Option<String> = None;
    let mut pending_old: Option<String> = None;
    let mut changes = Vec::new();

    let mut i = 0;
    while i < lines.len() {
        let trimmed = lines[i].trim();

        if let Some(rest) = trimmed.strip_prefix(NO_FIX) {
            if confidence.is_none() && changes.is_empty() {
                let reason = rest.trim_start_matches(':').trim();
                return Ok(ParsedResponse::Declined {
                    reason: (!reason.is_empty()).then(|| reason.to_string()),
                });
            }
        }

        if let Some(value) = label(trimmed, CONFIDENCE) {
            confidence = Some(parse_confidence(value)?);
        } else if let Some(value) = label(trimmed, FIX_TYPE) {
            fix_type = Some(value.to_string());
        } else if let Some(value) = label(trimmed, DESCRIPTION) {
            description = Some(value.to_string());
        } else if let Some(value) = label(trimmed, FILE) {
            if pending_old.is_some() {
                return Err(protocol("REPLACE: without WITH:"));
            }
            file = Some(value.trim_matches('`').to_string());
        } else if let Some(value) = label(trimmed, REPLACE) {
            if pending_old.is_some() {
                return Err(protocol("REPLACE: without WITH:"));
            }
            if file.is_none() {
                return Err(protocol("REPLACE: before any FILE:"));
            }
            let (body, next) = read_body(&lines, i, value, &[WITH])?;
            if body.is_empty() {
                return Err(protocol("REPLACE: body is empty"));
            }
            pending_old = Some(body);
            i = next;
            continue;
        } else if let Some(value) = label(trimmed, WITH) {
            let Some(old_content) = pending_old.take() else {
                return Err(protocol("WITH: without REPLACE:"));
            };
            let (body, next) = read_body(&lines, i, value, &[FILE, REPLACE])?;
            changes.push(FileChange {
                file: file.clone().unwrap_or_default(),
                old_content,
                new_content: body,
            });
            i = next;
            continue;
        }
        i += 1;
    }

    if pending_old.is_some() {
        return Err(protocol("REPLACE: without WITH:"));
    }
    let confidence = confidence.ok_or_else(|| protocol("CONFIDENCE: is missing"))?;
    if changes.is_empty() {
        return Err(protocol("fix contains no changes"));
    }

    Ok(ParsedResponse::Fix(ProposedFix {
        confidence,
        fix_type: fix_type
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_FIX_TYPE.to_string()),
        description: description.unwrap_or_default(),
        changes,
    }))
}

/// Render a response in the canonical form [`parse_response`] reads back.
pub fn render_response(response: &ParsedResponse) -> String {
    let fix = match response {
        ParsedResponse::Declined { reason: Some(reason) } => return format!("{NO_FIX}: {reason}\n"),
        ParsedResponse::Declined { reason: None } => return format!("{NO_FIX}\n"),
        ParsedResponse::Fix(fix) => fix,
    };

    let mut out = format!("{CONFIDENCE} {}\n", fix.confidence);
    out.push_str(&format!("{FIX_TYPE} {}\n", single_line(&fix.fix_type)));
    out.push_str(&format!("{DESCRIPTION} {}\n", single_line(&fix.description)));
    let mut current_file: Option<&str> = None;
    for change in &fix.changes {
        if current_file != Some(change.file.as_str()) {
            out.push_str(&format!("{FILE} {}\n", change.file));
            current_file = Some(&change.file);
        }
        out.push_str(REPLACE);
        out.push('\n');
        push_fenced(&mut out, &change.old_content);
        out.push_str(WITH);
        out.push('\n');
        push_fenced(&mut out, &change.new_content);
    }
    out
}

fn protocol(message: &str) -> VerifyError {
    VerifyError::Protocol(message.to_string())
}

/// Value after `name` when the line starts with it (case-insensitive).
fn label<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let head = line.get(..name.len())?;
    head.eq_ignore_ascii_case(name)
        .then(|| line[name.len()..].trim())
}

fn parse_confidence(value: &str) -> Result<f64> {
    let raw = value.trim_end_matches('%').trim();
    let parsed: f64 = raw
        .parse()
        .map_err(|_| VerifyError::Protocol(format!("confidence '{value}' is not a number")))?;
    // "85%" or "85" both mean 0.85
    let confidence = if value.ends_with('%') || (parsed > 1.0 && parsed <= 100.0) {
        parsed / 100.0
    } else {
        parsed
    };
    if !(0.0..=1.0).contains(&confidence) {
        return Err(VerifyError::Protocol(format!(
            "confidence '{value}' is outside [0, 1]"
        )));
    }
    Ok(confidence)
}

fn is_label_line(line: &str, stops: &[&str]) -> bool {
    let trimmed = line.trim();
    stops.iter().any(|stop| label(trimmed, stop).is_some())
}

/// Length of the backtick run opening a fence line, if any.
fn fence_len(line: &str) -> Option<usize> {
    let n = line.trim_start().chars().take_while(|c| *c == '`').count();
    (n >= 3).then_some(n)
}

/// Read the body of the label on `lines[at]`. Returns the body and the index
/// of the first line after it.
fn read_body(lines: &[&str], at: usize, inline: &str, stops: &[&str]) -> Result<(String, usize)> {
    if !inline.is_empty() && fence_len(inline).is_none() {
        return Ok((inline.to_string(), at + 1));
    }

    // fence opened on the label line itself, or on the next line
    let (open, first) = match fence_len(inline) {
        Some(n) => (Some(n), at + 1),
        None => match lines.get(at + 1).and_then(|l| fence_len(l)) {
            Some(n) => (Some(n), at + 2),
            None => (None, at + 1),
        },
    };

    match open {
        Some(n) => {
            let close = lines[first.min(lines.len())..]
                .iter()
                .position(|l| {
                    let t = l.trim();
                    t.len() == n && t.chars().all(|c| c == '`')
                })
                .map(|offset| first + offset)
                .ok_or_else(|| protocol("unterminated code fence"))?;
            Ok((lines[first..close].join("\n"), close + 1))
        }
        None => {
            let end = lines[first.min(lines.len())..]
                .iter()
                .position(|l| is_label_line(l, stops))
                .map_or(lines.len(), |offset| first + offset);
            let mut body = &lines[first.min(end)..end];
            while let Some((last, rest)) = body.split_last() {
                if !last.trim().is_empty() {
                    break;
                }
                body = rest;
            }
            Ok((body.join("\n"), end))
        }
    }
}

fn strip_outer_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(n) = fence_len(trimmed) else {
        return text;
    };
    let Some((first, rest)) = trimmed.split_once('\n') else {
        return text;
    };
    // only a wrapper when the response proper starts inside it
    if first.trim().len() > n + 12 {
        return text;
    }
    let Some(body) = rest.trim_end().strip_suffix(&"`".repeat(n)) else {
        return text;
    };
    let first_field = body.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    if label(first_field.trim(), CONFIDENCE).is_some() || first_field.trim().starts_with(NO_FIX) {
        body
    } else {
        text
    }
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn push_fenced(out: &mut String, body: &str) {
    let longest = body
        .lines()
        .filter_map(fence_len)
        .max()
        .unwrap_or(0);
    let fence = "`".repeat(longest.max(2) + 1);
    out.push_str(&fence);
    out.push('\n');
    if !body.is_empty() {
        out.push_str(body);
        out.push('\n');
    }
    out.push_str(&fence);
    out.push('\n');
}
