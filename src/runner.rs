//! External tool invocation.
//!
//! Arguments are always passed as a discrete argv vector, never through a
//! shell, so user-controlled values (filenames, option strings) cannot
//! inject commands. The subprocess's stderr is inherited for operational
//! visibility but never parsed; the only signal we act on is the exit code.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{info, warn};

use crate::error::{Error, Result, ToolFailure};

/// One fully-specified external command. The runner knows nothing about
/// what the command does; argument construction belongs to the caller.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: None,
        }
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// The Python processor entry point, run from the processor directory.
    pub fn python(processor_dir: &Path, args: Vec<String>) -> Self {
        let mut full = vec!["process.py".to_string()];
        full.extend(args);
        Self::new("python3", full).current_dir(processor_dir)
    }

    fn tool_error(&self, reason: ToolFailure) -> Error {
        Error::Tool {
            tool: self.program.clone(),
            reason,
        }
    }
}

/// Runs the invocation to completion, bounded by `timeout`.
///
/// Anything but a zero exit is a failure. On timeout the subprocess is
/// killed so it cannot keep workspace file handles open past deletion.
pub async fn run(invocation: &Invocation, timeout: Duration) -> Result<()> {
    info!(
        program = %invocation.program,
        args = ?invocation.args,
        "running external tool"
    );

    let mut cmd = Command::new(&invocation.program);
    cmd.args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    if let Some(cwd) = &invocation.cwd {
        cmd.current_dir(cwd);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| invocation.tool_error(ToolFailure::Spawn(e)))?;

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(waited) => waited.map_err(Error::Io)?,
        Err(_) => {
            warn!(program = %invocation.program, "tool timed out, killing");
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(invocation.tool_error(ToolFailure::Timeout(timeout.as_secs())));
        }
    };

    if status.success() {
        Ok(())
    } else {
        match status.code() {
            Some(code) => Err(invocation.tool_error(ToolFailure::Exit(code))),
            None => Err(invocation.tool_error(ToolFailure::Signal)),
        }
    }
}

/// Tries `primary`; on tool failure, tries `fallback` once before giving
/// up. This is a different-strategy retry (e.g. Ghostscript, then the
/// Python processor), never a blind re-run of the same command.
pub async fn run_with_fallback(
    primary: &Invocation,
    fallback: &Invocation,
    timeout: Duration,
) -> Result<()> {
    match run(primary, timeout).await {
        Ok(()) => Ok(()),
        Err(Error::Tool { tool, reason }) => {
            warn!(%tool, %reason, fallback = %fallback.program, "primary tool failed, trying fallback");
            run(fallback, timeout).await
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn sh(script: &str) -> Invocation {
        Invocation::new("/bin/sh", vec!["-c".into(), script.into()])
    }

    #[tokio::test]
    async fn zero_exit_succeeds() {
        run(&sh("exit 0"), TIMEOUT).await.unwrap();
    }

    #[tokio::test]
    async fn nonzero_exit_surfaces_the_code() {
        let err = run(&sh("exit 2"), TIMEOUT).await.unwrap_err();
        match err {
            Error::Tool {
                reason: ToolFailure::Exit(code),
                ..
            } => assert_eq!(code, 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_failure() {
        let inv = Invocation::new("paperjet-no-such-tool", vec![]);
        let err = run(&inv, TIMEOUT).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Tool {
                reason: ToolFailure::Spawn(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn timeout_kills_and_reports() {
        let err = run(&sh("sleep 30"), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Tool {
                reason: ToolFailure::Timeout(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn respects_working_directory() {
        let tmp = tempfile::tempdir().unwrap();
        run(&sh("pwd > marker").current_dir(tmp.path()), TIMEOUT)
            .await
            .unwrap();
        assert!(tmp.path().join("marker").is_file());
    }

    #[tokio::test]
    async fn fallback_runs_only_after_primary_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let good = sh("touch ok").current_dir(tmp.path());

        // Primary succeeds: fallback must not run.
        run_with_fallback(&good, &sh("touch should-not-exist").current_dir(tmp.path()), TIMEOUT)
            .await
            .unwrap();
        assert!(!tmp.path().join("should-not-exist").exists());

        // Primary fails: fallback result wins.
        run_with_fallback(&sh("exit 1"), &sh("touch rescued").current_dir(tmp.path()), TIMEOUT)
            .await
            .unwrap();
        assert!(tmp.path().join("rescued").is_file());

        // Both fail: the fallback's error is what surfaces.
        let err = run_with_fallback(&sh("exit 1"), &sh("exit 3"), TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Tool {
                reason: ToolFailure::Exit(3),
                ..
            }
        ));
    }
}
