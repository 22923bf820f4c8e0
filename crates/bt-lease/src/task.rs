//! Active task contract and the child-process implementation
//!
//! The lease manager starts the active task once per acquisition and cancels
//! it when the lease is lost or the process shuts down. After cancellation an
//! implementation must stop acting on the external stream before returning.

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{LeaseError, Result};

#[async_trait]
pub trait ActiveTask: Send + Sync + 'static {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Consume the external stream until `cancel` fires or the stream ends.
    async fn start(&self, cancel: CancellationToken) -> Result<()>;
}

/// Runs the listener as a child process and kills it on cancellation.
///
/// The child inherits this process's environment, which is how the
/// event-stream credential reaches it.
#[derive(Debug, Clone)]
pub struct CommandTask {
    program: String,
    args: Vec<String>,
}

impl CommandTask {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ActiveTask for CommandTask {
    fn name(&self) -> &str {
        &self.program
    }

    async fn start(&self, cancel: CancellationToken) -> Result<()> {
        // Never launch the listener for a hold that is already over.
        if cancel.is_cancelled() {
            return Ok(());
        }

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LeaseError::Task(format!("failed to spawn {}: {}", self.program, e)))?;

        info!(program = %self.program, pid = ?child.id(), "Listener started");

        tokio::select! {
            status = child.wait() => {
                let status = status
                    .map_err(|e| LeaseError::Task(format!("failed to wait for {}: {}", self.program, e)))?;
                if status.success() {
                    info!(program = %self.program, "Listener exited");
                    Ok(())
                } else {
                    Err(LeaseError::Task(format!("{} exited with {}", self.program, status)))
                }
            }
            _ = cancel.cancelled() => {
                info!(program = %self.program, pid = ?child.id(), "Stopping listener");
                if let Err(e) = child.kill().await {
                    warn!(program = %self.program, error = %e, "Failed to kill listener");
                }
                Ok(())
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_clean_exit_is_ok() {
        let task = CommandTask::new("true", Vec::<String>::new());
        task.start(CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_exit_is_an_error() {
        let task = CommandTask::new("false", Vec::<String>::new());
        let result = task.start(CancellationToken::new()).await;
        assert!(matches!(result, Err(LeaseError::Task(_))));
    }

    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        let task = CommandTask::new("/nonexistent/listener", ["--flag"]);
        assert!(task.start(CancellationToken::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_cancellation_kills_the_child() {
        let task = CommandTask::new("sleep", ["30"]);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn({
            let cancel = cancel.clone();
            async move { task.start(cancel).await }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("listener was not stopped")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_does_not_spawn() {
        let task = CommandTask::new("/nonexistent/listener", Vec::<String>::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        // Would fail to spawn if it tried.
        assert!(task.start(cancel).await.is_ok());
    }

    #[tokio::test]
    async fn test_child_inherits_environment() {
        // PATH is always set for the test process.
        let task = CommandTask::new("sh", ["-c", "test -n \"$PATH\""]);
        task.start(CancellationToken::new()).await.unwrap();
    }
}
