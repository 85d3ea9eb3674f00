//! Subprocess execution under a caller-selected identity.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::errors::{MigrateError, MigrateResult};

/// Runs external commands to completion.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run under the service identity.
    async fn run(&self, program: &str, args: &[&str]) -> MigrateResult<()>;

    /// Run under the named user's uid/gid so filesystem permissions on
    /// checkpoint and image paths are respected.
    async fn run_as(&self, user: &str, program: &str, args: &[&str]) -> MigrateResult<()>;
}

/// Production runner: tokio subprocesses with a bounded wait.
pub struct SystemRunner {
    tool_timeout: Duration,
}

impl SystemRunner {
    pub fn new(tool_timeout: Duration) -> Self {
        Self { tool_timeout }
    }

    async fn wait(&self, mut cmd: Command, label: String) -> MigrateResult<()> {
        // A timed-out tool must not keep running behind our back.
        cmd.kill_on_drop(true);
        let status = tokio::time::timeout(self.tool_timeout, cmd.status())
            .await
            .map_err(|_| {
                MigrateError::Timeout(format!(
                    "{label} did not finish within {:?}",
                    self.tool_timeout
                ))
            })?
            .map_err(|e| MigrateError::Tool(format!("failed to run {label}: {e}")))?;

        if !status.success() {
            return Err(MigrateError::Tool(format!("{label} exited with {status}")));
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str]) -> MigrateResult<()> {
        tracing::debug!(program, ?args, "running command");
        let mut cmd = Command::new(program);
        cmd.args(args);
        self.wait(cmd, format!("{program} {}", args.join(" "))).await
    }

    async fn run_as(&self, user: &str, program: &str, args: &[&str]) -> MigrateResult<()> {
        let entry = nix::unistd::User::from_name(user)
            .map_err(|e| MigrateError::Tool(format!("user lookup for {user} failed: {e}")))?
            .ok_or_else(|| MigrateError::Tool(format!("user {user} not found")))?;
        let (uid, gid) = (entry.uid.as_raw(), entry.gid.as_raw());

        tracing::debug!(program, ?args, user, uid, gid, "running command as user");
        let mut cmd = Command::new(program);
        cmd.args(args).uid(uid).gid(gid);
        self.wait(cmd, format!("{program} {}", args.join(" "))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_command_is_ok() {
        let runner = SystemRunner::new(Duration::from_secs(5));
        runner.run("true", &[]).await.unwrap();
    }

    #[tokio::test]
    async fn failing_command_is_tool_error() {
        let runner = SystemRunner::new(Duration::from_secs(5));
        let err = runner.run("false", &[]).await.unwrap_err();
        assert!(matches!(err, MigrateError::Tool(_)));
    }

    #[tokio::test]
    async fn hung_command_is_timeout() {
        let runner = SystemRunner::new(Duration::from_millis(100));
        let err = runner.run("sleep", &["5"]).await.unwrap_err();
        assert!(matches!(err, MigrateError::Timeout(_)));
    }
}
