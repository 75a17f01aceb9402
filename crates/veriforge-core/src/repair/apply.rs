//! Literal patch application against tracked file contents.

use std::collections::BTreeMap;

use veriforge_domain::FileChange;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApplyError {
    #[error("{0} is not a tracked file")]
    UntrackedFile(String),

    #[error("replacement anchor not found in {0}")]
    AnchorNotFound(String),

    #[error("empty replacement anchor for {0}")]
    EmptyAnchor(String),
}

/// Apply one change to `content`.
///
/// Returns `None` when the change is already present, so re-applying a fix
/// never alters the file twice. A change counts as present when
/// `new_content` occurs in the text and the anchor either no longer occurs
/// or is itself part of `new_content`. Otherwise the first occurrence of
/// `old_content` is replaced.
pub fn apply_change(content: &str, change: &FileChange) -> Result<Option<String>, ApplyError> {
    if change.old_content.is_empty() {
        return Err(ApplyError::EmptyAnchor(change.file.clone()));
    }
    let anchored = content.contains(&change.old_content);
    let applied = !change.new_content.is_empty()
        && content.contains(&change.new_content)
        && (!anchored || change.new_content.contains(&change.old_content));
    if applied {
        return Ok(None);
    }
    if !anchored {
        return Err(ApplyError::AnchorNotFound(change.file.clone()));
    }
    Ok(Some(content.replacen(&change.old_content, &change.new_content, 1)))
}

/// Apply every change of one fix to `files`, all or nothing.
///
/// Changes are staged on copies; `files` is only written once every change
/// applied. Returns the paths whose content changed.
pub fn apply_fix(
    files: &mut BTreeMap<String, String>,
    changes: &[FileChange],
) -> Result<Vec<String>, ApplyError> {
    let mut staged: BTreeMap<&str, String> = BTreeMap::new();
    for change in changes {
        let current = match staged.get(change.file.as_str()) {
            Some(content) => content.as_str(),
            None => files
                .get(&change.file)
                .map(String::as_str)
                .ok_or_else(|| ApplyError::UntrackedFile(change.file.clone()))?,
        };
        if let Some(updated) = apply_change(current, change)? {
            staged.insert(change.file.as_str(), updated);
        }
    }

    let mut touched = Vec::with_capacity(staged.len());
    for (path, content) in staged {
        if files.get(path) != Some(&content) {
            files.insert(path.to_string(), content);
            touched.push(path.to_string());
        }
    }
    Ok(touched)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(file: &str, old: &str, new: &str) -> FileChange {
        FileChange {
            file: file.to_string(),
            old_content: old.to_string(),
            new_content: new.to_string(),
        }
    }

    #[test]
    fn test_replaces_first_occurrence_only() {
        let out = apply_change("a a a", &change("f", "a", "b")).expect("apply");
        assert_eq!(out.as_deref(), Some("b a a"));
    }

    #[test]
    fn test_reapplying_is_a_no_op() {
        let fix = change("main.go", "func main() {", "func main() {\n}");
        let once = apply_change("package main\nfunc main() {", &fix)
            .expect("apply")
            .expect("changed");
        assert_eq!(apply_change(&once, &fix).expect("reapply"), None);
    }

    #[test]
    fn test_deletion_applies_when_result_is_substring() {
        let trim = change("a.py", "x = 1 ", "x = 1");
        let out = apply_change("x = 1 \n", &trim).expect("apply");
        assert_eq!(out.as_deref(), Some("x = 1\n"));
        assert_eq!(apply_change("x = 1\n", &trim).expect("reapply"), None);

        let paren = change("a.py", "f(x))", "f(x)");
        let out = apply_change("y = f(x))\n", &paren).expect("apply");
        assert_eq!(out.as_deref(), Some("y = f(x)\n"));
    }

    #[test]
    fn test_missing_anchor() {
        assert_eq!(
            apply_change("abc", &change("f", "xyz", "q")),
            Err(ApplyError::AnchorNotFound("f".to_string()))
        );
        assert_eq!(
            apply_change("abc", &change("f", "", "q")),
            Err(ApplyError::EmptyAnchor("f".to_string()))
        );
    }

    #[test]
    fn test_fix_is_atomic() {
        let mut files = BTreeMap::from([
            ("a.py".to_string(), "x = 1 \n".to_string()),
            ("b.py".to_string(), "y = 2\n".to_string()),
        ]);
        let before = files.clone();
        let err = apply_fix(
            &mut files,
            &[change("a.py", "x = 1 ", "x = 1"), change("b.py", "zzz", "q")],
        )
        .expect_err("second change fails");
        assert_eq!(err, ApplyError::AnchorNotFound("b.py".to_string()));
        assert_eq!(files, before);
    }

    #[test]
    fn test_fix_chains_changes_in_one_file() {
        let mut files = BTreeMap::from([("a.rs".to_string(), "let a = 1\nlet b = 2\n".to_string())]);
        let touched = apply_fix(
            &mut files,
            &[
                change("a.rs", "let a = 1\n", "let a = 1;\n"),
                change("a.rs", "let b = 2\n", "let b = 2;\n"),
            ],
        )
        .expect("apply");
        assert_eq!(touched, vec!["a.rs".to_string()]);
        assert_eq!(files["a.rs"], "let a = 1;\nlet b = 2;\n");
    }

    #[test]
    fn test_untracked_file() {
        let mut files = BTreeMap::new();
        assert_eq!(
            apply_fix(&mut files, &[change("ghost.go", "a", "b")]),
            Err(ApplyError::UntrackedFile("ghost.go".to_string()))
        );
    }
}
