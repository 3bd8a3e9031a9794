//! az CLI wrapper
//!
//! Runs Azure CLI commands and classifies their failures. Secret material is
//! always handed over through files, so argv is safe to log.

use crate::error::{AzureError, Result};
use neodeploy_cloud::ProvisioningError;
use neodeploy_core::SecretError;
use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Upper bound for a single az invocation
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

const THROTTLE_MARKERS: &[&str] = &["toomanyrequests", "throttl", "429"];

const TRANSIENT_MARKERS: &[&str] = &[
    "timed out",
    "timeout",
    "connection reset",
    "connection aborted",
    "connectionerror",
    "temporarily unavailable",
    "serviceunavailable",
    "internalservererror",
    "badgateway",
    "gatewaytimeout",
    "anotheroperationinprogress",
];

/// az CLI wrapper
#[derive(Debug, Clone)]
pub struct AzCli {
    program: String,
    subscription: Option<String>,
    timeout: Duration,
}

impl AzCli {
    pub fn new(subscription: Option<String>) -> Self {
        Self {
            program: "az".to_string(),
            subscription,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Kill any single az invocation running longer than `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use a different executable instead of `az`
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn subscription(&self) -> Option<&str> {
        self.subscription.as_deref()
    }

    /// Check that az is installed
    pub async fn check_installed(&self) -> Result<String> {
        let output = self.run(&["version", "--output", "json"]).await?;
        let version: serde_json::Value = serde_json::from_str(&output)?;
        version
            .get("azure-cli")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| AzureError::UnexpectedOutput(output))
    }

    /// Run an az command and return stdout
    ///
    /// The child is killed when the call times out or its future is dropped.
    pub async fn run(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        if let Some(subscription) = &self.subscription {
            cmd.arg("--subscription").arg(subscription);
        }
        cmd.arg("--only-show-errors");
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        tracing::debug!("Running: {} {}", self.program, args.join(" "));

        let command = || args.iter().take(3).copied().collect::<Vec<_>>().join(" ");
        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => {
                tracing::warn!(command = %command(), secs = self.timeout.as_secs(), "az timed out");
                return Err(AzureError::Timeout {
                    command: command(),
                    secs: self.timeout.as_secs(),
                });
            }
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == ErrorKind::NotFound => return Err(AzureError::CliNotFound),
            Ok(Err(e)) => return Err(e.into()),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AzureError::CommandFailed {
                command: command(),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// First `(Code)` or `Code: X` in az error output
pub fn error_code(stderr: &str) -> Option<String> {
    let parenthesised = stderr.split('(').skip(1).find_map(|rest| {
        let code: String = rest
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect();
        let closed = rest[code.len()..].starts_with(')');
        (closed && code.starts_with(|c: char| c.is_ascii_uppercase())).then_some(code)
    });
    parenthesised.or_else(|| {
        stderr.split("Code:").nth(1).and_then(|rest| {
            let code: String = rest
                .trim_start()
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric())
                .collect();
            (!code.is_empty()).then_some(code)
        })
    })
}

fn first_line(stderr: &str) -> String {
    stderr
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("unknown error")
        .trim_start_matches("ERROR: ")
        .to_string()
}

/// Map az stderr to a provisioning error
pub fn classify_provisioning(stderr: &str) -> ProvisioningError {
    let lower = stderr.to_lowercase();
    if THROTTLE_MARKERS.iter().any(|m| lower.contains(m)) {
        return ProvisioningError::Throttled(first_line(stderr));
    }
    if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
        return ProvisioningError::Transient(first_line(stderr));
    }
    match error_code(stderr) {
        Some(code) => ProvisioningError::Rejected {
            code,
            message: first_line(stderr),
        },
        None => ProvisioningError::Failed(first_line(stderr)),
    }
}

/// Map az keyvault stderr to a secret store error
pub fn classify_secret(stderr: &str, reference: &str) -> SecretError {
    let code = error_code(stderr).unwrap_or_default();
    let lower = stderr.to_lowercase();
    if code == "SecretNotFound" || code == "NotFound" || lower.contains("was not found") {
        SecretError::NotFound(reference.to_string())
    } else if code == "Forbidden"
        || code == "AuthorizationFailed"
        || lower.contains("does not have secrets")
    {
        SecretError::Forbidden(reference.to_string())
    } else {
        SecretError::Unavailable(first_line(stderr))
    }
}

impl From<AzureError> for ProvisioningError {
    fn from(error: AzureError) -> Self {
        match error {
            AzureError::CommandFailed { stderr, .. } => classify_provisioning(&stderr),
            timeout @ AzureError::Timeout { .. } => {
                ProvisioningError::Transient(timeout.to_string())
            }
            AzureError::TemplateNotFound(path) => ProvisioningError::Rejected {
                code: "TemplateNotFound".to_string(),
                message: path.display().to_string(),
            },
            other => ProvisioningError::Failed(other.to_string()),
        }
    }
}
