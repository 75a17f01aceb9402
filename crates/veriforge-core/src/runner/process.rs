//! Subprocess execution and working-area materialization shared by
//! process-backed runners.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::process::Command;

use veriforge_domain::Artifact;

/// Captured outcome of one subprocess.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit code, `-1` when terminated by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Run `command` in `working_dir`, killing it if `timeout` elapses.
///
/// The child is killed when the returned future is dropped, so an outer
/// deadline or cancellation also terminates it.
pub async fn run_process(
    command: &[String],
    working_dir: &Path,
    env: &BTreeMap<String, String>,
    timeout: Duration,
) -> anyhow::Result<ProcessOutput> {
    let start = Instant::now();

    let (exe, args) = command
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("empty command"))?;

    let child = Command::new(exe)
        .args(args)
        .current_dir(working_dir)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn '{exe}'"))?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| anyhow::anyhow!("'{}' timed out after {}ms", exe, timeout.as_millis()))??;

    Ok(ProcessOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

/// Write artifacts under `root`, preserving their relative paths.
///
/// Absolute paths and paths escaping `root` are rejected.
pub async fn materialize(artifacts: &[Artifact], root: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        let relative = safe_relative(&artifact.path)?;
        let target = root.join(relative);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        tokio::fs::write(&target, artifact.content.as_bytes())
            .await
            .with_context(|| format!("writing {}", target.display()))?;
        written.push(target);
    }
    Ok(written)
}

fn safe_relative(path: &str) -> anyhow::Result<PathBuf> {
    let candidate = Path::new(path);
    let mut clean = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => anyhow::bail!("artifact path '{path}' escapes the working area"),
        }
    }
    if clean.as_os_str().is_empty() {
        anyhow::bail!("artifact path is empty");
    }
    Ok(clean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use veriforge_domain::ArtifactType;

    fn cmd(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_run_simple_command() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = run_process(
            &cmd(&["echo", "hello"]),
            dir.path(),
            &BTreeMap::new(),
            Duration::from_secs(10),
        )
        .await
        .expect("run");
        assert!(out.success());
        assert!(out.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_run_failing_command() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = run_process(
            &cmd(&["false"]),
            dir.path(),
            &BTreeMap::new(),
            Duration::from_secs(10),
        )
        .await
        .expect("run");
        assert!(!out.success());
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = run_process(
            &cmd(&["sleep", "5"]),
            dir.path(),
            &BTreeMap::new(),
            Duration::from_millis(50),
        )
        .await
        .expect_err("timeout");
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_empty_command_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(run_process(&[], dir.path(), &BTreeMap::new(), Duration::from_secs(1))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_materialize_writes_nested_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let artifacts = vec![Artifact::new("pkg/a/b.go", ArtifactType::Source, "package a")];
        let written = materialize(&artifacts, dir.path()).await.expect("materialize");
        assert_eq!(written.len(), 1);
        let content = std::fs::read_to_string(dir.path().join("pkg/a/b.go")).expect("read");
        assert_eq!(content, "package a");
    }

    #[tokio::test]
    async fn test_materialize_rejects_escaping_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        for path in ["../evil.go", "/etc/passwd"] {
            let artifacts = vec![Artifact::new(path, ArtifactType::Source, "x")];
            assert!(materialize(&artifacts, dir.path()).await.is_err());
        }
    }
}
