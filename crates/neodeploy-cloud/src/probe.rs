//! End-to-end functional probe against a provisioned database
//!
//! One attempt opens a session, writes a tagged marker node, reads it back,
//! deletes it and closes the session. Only connectivity problems are retried;
//! every other classification ends the probe on first occurrence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neodeploy_core::{Backoff, ConnectionScheme, RetryPolicy, SecretValue};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Label attached to marker nodes so they can be found and removed.
pub const MARKER_LABEL: &str = "NeodeployProbe";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationClass {
    Success,
    ConnectivityTimeout,
    AuthFailure,
    ProtocolMismatch,
    DataIntegrityFailure,
}

impl ValidationClass {
    pub fn is_success(&self) -> bool {
        matches!(self, ValidationClass::Success)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ValidationClass::ConnectivityTimeout)
    }
}

impl fmt::Display for ValidationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValidationClass::Success => "success",
            ValidationClass::ConnectivityTimeout => "connectivity-timeout",
            ValidationClass::AuthFailure => "auth-failure",
            ValidationClass::ProtocolMismatch => "protocol-mismatch",
            ValidationClass::DataIntegrityFailure => "data-integrity-failure",
        };
        f.write_str(s)
    }
}

/// Outcome of one probe attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub class: ValidationClass,
    /// 1-based attempt number
    pub attempt: u32,
    pub duration_ms: u64,
    /// Free-form detail, scrubbed of the credential
    pub diagnostic: String,
    pub at: DateTime<Utc>,
}

/// Default probe policy: 5 retries, fixed 10 s apart.
pub fn probe_retry_policy() -> RetryPolicy<ValidationClass> {
    RetryPolicy::new(
        5,
        Backoff::fixed(Duration::from_secs(10)),
        ValidationClass::is_retryable,
    )
}

/// Errors surfaced by a database client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DatabaseError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("connection timed out")]
    Timeout,

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("routing unavailable: {0}")]
    Routing(String),

    #[error("query failed: {0}")]
    Query(String),
}

impl DatabaseError {
    pub fn class(&self) -> ValidationClass {
        match self {
            DatabaseError::Connect(_) | DatabaseError::Timeout => {
                ValidationClass::ConnectivityTimeout
            }
            DatabaseError::Auth(_) => ValidationClass::AuthFailure,
            DatabaseError::Routing(_) => ValidationClass::ProtocolMismatch,
            DatabaseError::Query(_) => ValidationClass::DataIntegrityFailure,
        }
    }
}

/// Where and how to connect
#[derive(Debug, Clone)]
pub struct ConnectTarget {
    /// `bolt://host:7687` or `neo4j://host:7687`
    pub uri: String,
    pub scheme: ConnectionScheme,
    pub username: String,
    pub password: SecretValue,
    /// Number of cluster members the scenario asked for
    pub expected_members: u8,
    /// Also look at the accepted license agreement
    pub evaluation_license: bool,
}

/// Database client boundary
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    async fn connect(
        &self,
        target: &ConnectTarget,
    ) -> Result<Box<dyn DatabaseSession>, DatabaseError>;
}

/// An open session
#[async_trait]
pub trait DatabaseSession: Send {
    async fn write_marker(&mut self, marker: &str, value: &str) -> Result<(), DatabaseError>;

    async fn read_marker(&mut self, marker: &str) -> Result<Option<String>, DatabaseError>;

    async fn delete_marker(&mut self, marker: &str) -> Result<(), DatabaseError>;

    /// Number of servers in the cluster, if the server reports it.
    async fn cluster_members(&mut self) -> Result<Option<usize>, DatabaseError>;

    /// Accepted license agreement as reported by the server; `30` is the
    /// 30-day evaluation. `None` when the server does not say.
    async fn accepted_license(&mut self) -> Result<Option<String>, DatabaseError> {
        Ok(None)
    }

    async fn close(self: Box<Self>) -> Result<(), DatabaseError>;
}

/// Every attempt of one probe run
#[derive(Debug, Clone, Default)]
pub struct ProbeReport {
    pub results: Vec<ValidationResult>,
    pub cancelled: bool,
}

impl ProbeReport {
    pub fn last(&self) -> Option<&ValidationResult> {
        self.results.last()
    }

    pub fn succeeded(&self) -> bool {
        !self.cancelled && self.last().is_some_and(|r| r.class.is_success())
    }

    pub fn retries(&self) -> usize {
        self.results.len().saturating_sub(1)
    }
}

pub struct ValidationProbe {
    client: Arc<dyn DatabaseClient>,
    policy: RetryPolicy<ValidationClass>,
    attempt_timeout: Duration,
}

impl ValidationProbe {
    pub fn new(client: Arc<dyn DatabaseClient>) -> Self {
        Self {
            client,
            policy: probe_retry_policy(),
            attempt_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy<ValidationClass>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Run attempts until success, a terminal class, the retry budget or
    /// cancellation.
    pub async fn run(&self, target: &ConnectTarget, cancel: &CancellationToken) -> ProbeReport {
        let mut report = ProbeReport::default();
        let mut retries = 0u32;

        loop {
            let attempt = retries + 1;
            let started = Instant::now();

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                r = tokio::time::timeout(self.attempt_timeout, self.attempt(target)) => Some(r),
            };
            let Some(outcome) = outcome else {
                report.cancelled = true;
                return report;
            };

            let (class, diagnostic) = match outcome {
                Ok(Ok(detail)) => (ValidationClass::Success, detail),
                Ok(Err((class, detail))) => (class, detail),
                Err(_) => (
                    ValidationClass::ConnectivityTimeout,
                    format!(
                        "attempt timed out after {}s",
                        self.attempt_timeout.as_secs()
                    ),
                ),
            };

            let result = ValidationResult {
                class,
                attempt,
                duration_ms: started.elapsed().as_millis() as u64,
                diagnostic: target.password.scrub(&diagnostic),
                at: Utc::now(),
            };
            info!(
                uri = %target.uri,
                attempt,
                class = %result.class,
                duration_ms = result.duration_ms,
                "Probe attempt finished"
            );
            report.results.push(result);

            if class.is_success() {
                return report;
            }

            let Some(delay) = self.policy.next_delay(retries, &class) else {
                return report;
            };
            debug!(delay_secs = delay.as_secs(), "Retrying probe");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    return report;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            retries += 1;
        }
    }

    async fn attempt(
        &self,
        target: &ConnectTarget,
    ) -> Result<String, (ValidationClass, String)> {
        let fail = |e: DatabaseError| (e.class(), e.to_string());

        let mut session = self.client.connect(target).await.map_err(fail)?;

        if target.scheme == ConnectionScheme::RoutingAware {
            match session.cluster_members().await {
                Ok(Some(n)) if n != target.expected_members as usize => {
                    close_quietly(session).await;
                    return Err((
                        ValidationClass::ProtocolMismatch,
                        format!(
                            "cluster reports {} member(s), expected {}",
                            n, target.expected_members
                        ),
                    ));
                }
                Ok(_) => {}
                Err(e) => {
                    close_quietly(session).await;
                    return Err(fail(e));
                }
            }
        }

        let marker = format!("probe-{}", uuid::Uuid::new_v4());
        let value = uuid::Uuid::new_v4().to_string();

        if let Err(e) = session.write_marker(&marker, &value).await {
            close_quietly(session).await;
            return Err(fail(e));
        }

        let read_back = match session.read_marker(&marker).await {
            Ok(v) => v,
            Err(e) => {
                close_quietly(session).await;
                return Err(fail(e));
            }
        };

        if let Err(e) = session.delete_marker(&marker).await {
            warn!(marker = %marker, error = %e, "Failed to delete probe marker");
        }
        let license = if target.evaluation_license {
            Some(license_note(session.as_mut()).await)
        } else {
            None
        };
        close_quietly(session).await;

        match read_back {
            Some(v) if v == value => {
                let mut detail = format!("marker {} written, read back and deleted", marker);
                if let Some(note) = license {
                    detail.push_str("; ");
                    detail.push_str(&note);
                }
                Ok(detail)
            }
            Some(v) => Err((
                ValidationClass::DataIntegrityFailure,
                format!("marker {} read back '{}', expected '{}'", marker, v, value),
            )),
            None => Err((
                ValidationClass::DataIntegrityFailure,
                format!("marker {} not found after write", marker),
            )),
        }
    }
}

/// Best-effort evaluation license check; never fails the attempt
async fn license_note(session: &mut dyn DatabaseSession) -> String {
    match session.accepted_license().await {
        Ok(Some(value)) if value == "30" => {
            info!("Evaluation license (30-day trial) verified");
            "evaluation license verified".to_string()
        }
        Ok(Some(value)) => {
            warn!(license = %value, "License agreement is not the 30-day evaluation");
            format!("license agreement '{}' inconclusive", value)
        }
        Ok(None) => {
            debug!("Server does not report its license agreement");
            "license agreement not reported".to_string()
        }
        Err(e) => {
            warn!(error = %e, "License check failed");
            format!("license check failed: {}", e)
        }
    }
}

async fn close_quietly(session: Box<dyn DatabaseSession>) {
    if let Err(e) = session.close().await {
        warn!(error = %e, "Failed to close probe session");
    }
}
