//! Subprocess verification channel.
//!
//! Runs a configured shell command for a branch; the exit status maps to
//! pass/fail and stderr becomes the diagnostic attached to the branch.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;

use crate::domain::Verdict;

use super::Verifier;

/// Verifier that shells out to an external command
pub struct CommandVerifier {
    /// Shell command line to run
    command: String,

    /// Hard timeout for the command
    timeout: Duration,
}

impl CommandVerifier {
    /// Create a verifier for a command line with a timeout
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Verifier for CommandVerifier {
    async fn verify(&self, branch_id: &str) -> Result<Verdict> {
        let child = Command::new("sh")
            .args(["-c", &self.command])
            .env("CONVOY_BRANCH", branch_id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn verifier for branch '{}'", branch_id))?;

        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .with_context(|| {
                format!(
                    "Verifier for branch '{}' timed out after {:?}",
                    branch_id, self.timeout
                )
            })?
            .with_context(|| format!("Failed to wait for verifier for branch '{}'", branch_id))?;

        if output.status.success() {
            Ok(Verdict::pass())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let diagnostic = if stderr.trim().is_empty() {
                format!(
                    "verifier exited with code {}",
                    output.status.code().unwrap_or(-1)
                )
            } else {
                stderr.trim().to_string()
            };
            Ok(Verdict::fail(diagnostic))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_passing_command() {
        let verifier = CommandVerifier::new("true", Duration::from_secs(5));
        let verdict = verifier.verify("backend-track").await.unwrap();
        assert!(verdict.passed);
    }

    #[tokio::test]
    async fn test_failing_command_carries_diagnostic() {
        let verifier =
            CommandVerifier::new("echo 'schema mismatch' >&2; exit 1", Duration::from_secs(5));
        let verdict = verifier.verify("backend-track").await.unwrap();
        assert!(!verdict.passed);
        assert_eq!(verdict.diagnostic.as_deref(), Some("schema mismatch"));
    }

    #[tokio::test]
    async fn test_branch_id_in_environment() {
        let verifier = CommandVerifier::new(
            r#"test "$CONVOY_BRANCH" = "backend-track""#,
            Duration::from_secs(5),
        );
        let verdict = verifier.verify("backend-track").await.unwrap();
        assert!(verdict.passed);
    }

    #[tokio::test]
    async fn test_timeout() {
        let verifier = CommandVerifier::new("sleep 5", Duration::from_millis(100));
        assert!(verifier.verify("backend-track").await.is_err());
    }
}
