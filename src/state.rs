//! Shared application state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::runner::{self, Invocation};
use crate::workspace::Workspaces;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub workspaces: Workspaces,
    /// Bounds simultaneous external tool invocations; subprocess fan-out
    /// is otherwise limited only by host resources.
    run_permits: Arc<Semaphore>,
}

impl AppState {
    pub fn new(config: Config, workspaces: Workspaces) -> Self {
        let run_permits = Arc::new(Semaphore::new(config.max_concurrent_tools));
        Self {
            config: Arc::new(config),
            workspaces,
            run_permits,
        }
    }

    fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.config.tool_timeout_secs)
    }

    /// A closed semaphore would mean tools running outside the cap, so
    /// acquisition failure is an error, never ignored.
    async fn run_permit(&self) -> Result<OwnedSemaphorePermit> {
        self.run_permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Resource(std::io::Error::other("tool concurrency cap closed")))
    }

    /// Runs one external tool under the concurrency cap.
    pub async fn run_tool(&self, invocation: &Invocation) -> Result<()> {
        let _permit = self.run_permit().await?;
        runner::run(invocation, self.tool_timeout()).await
    }

    /// Runs `primary` under the concurrency cap, falling back to
    /// `fallback` once if it fails.
    pub async fn run_tool_with_fallback(
        &self,
        primary: &Invocation,
        fallback: &Invocation,
    ) -> Result<()> {
        let _permit = self.run_permit().await?;
        runner::run_with_fallback(primary, fallback, self.tool_timeout()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolFailure;
    use crate::workspace::Workspaces;

    fn test_state(root: &std::path::Path) -> AppState {
        let config = Config {
            work_root: root.to_path_buf(),
            processor_dir: root.to_path_buf(),
            ttl_minutes: 15,
            max_file_mb: 1,
            tool_timeout_secs: 10,
            max_concurrent_tools: 1,
            cors_origin: "*".to_string(),
        };
        let workspaces = Workspaces::open(root, config.ttl()).unwrap();
        AppState::new(config, workspaces)
    }

    #[tokio::test]
    async fn run_tool_holds_a_permit_and_surfaces_exit_codes() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(tmp.path());

        let ok = Invocation::new("/bin/sh", vec!["-c".to_string(), "exit 0".to_string()]);
        state.run_tool(&ok).await.unwrap();

        let failing = Invocation::new("/bin/sh", vec!["-c".to_string(), "exit 2".to_string()]);
        let err = state.run_tool(&failing).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Tool {
                reason: ToolFailure::Exit(2),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn closed_cap_is_a_resource_error_not_a_bypass() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(tmp.path());
        state.run_permits.close();

        let inv = Invocation::new("/bin/sh", vec!["-c".to_string(), "exit 0".to_string()]);
        let err = state.run_tool(&inv).await.unwrap_err();
        assert!(matches!(err, Error::Resource(_)));
    }
}
