//! Deployment lifecycle state machine
//!
//! ```text
//! Pending ─▶ Submitting ─▶ Provisioning ─▶ Validating ─▶ Succeeded
//!                │              │              │
//!                └──────────────┴──────────────┴──────▶ Failed
//!
//! any state ─────────────────────────────────────────▶ Cleaned
//! ```
//!
//! Every transition is a single optimistic-concurrency update of the record.
//! A record that has been marked `Cleaned` (by a concurrent cleanup) is never
//! moved again; the machine stops and returns it as is.

use crate::error::{CloudError, Result};
use crate::probe::{ConnectTarget, ValidationProbe};
use crate::provider::{
    DeploymentOutputs, OperationHandle, OperationStatus, ProvisioningBoundary, ProvisioningError,
    provisioning_retry_policy,
};
use crate::state::{
    ConnectionInfo, DeploymentRecord, DeploymentState, Failure, FailureKind, StateStore,
    update_record,
};
use neodeploy_core::{CleanupMode, ResolvedDeployment, RetryPolicy, SecretValue};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Database user the probe authenticates as.
pub const ADMIN_USER: &str = "neo4j";

/// Timing and retry configuration
#[derive(Debug, Clone, Copy)]
pub struct MachineConfig {
    /// Delay between status polls
    pub poll_interval: Duration,

    /// Budget for submission plus provisioning; the probe has its own
    pub deployment_timeout: Duration,

    /// Applied to every submit and poll call
    pub retry: RetryPolicy<ProvisioningError>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            deployment_timeout: Duration::from_secs(1800),
            retry: provisioning_retry_policy(),
        }
    }
}

/// Result of one phase
enum Step<T> {
    Done(T),
    Fail(Failure),
    Cancelled,
    /// The record was cleaned up from under the machine
    Cleaned,
}

fn failure(kind: FailureKind, detail: impl Into<String>) -> Failure {
    Failure {
        kind,
        class: None,
        detail: detail.into(),
    }
}

pub struct DeploymentStateMachine {
    boundary: Arc<dyn ProvisioningBoundary>,
    store: Arc<dyn StateStore>,
    probe: Option<Arc<ValidationProbe>>,
    config: MachineConfig,
}

impl DeploymentStateMachine {
    pub fn new(boundary: Arc<dyn ProvisioningBoundary>, store: Arc<dyn StateStore>) -> Self {
        Self {
            boundary,
            store,
            probe: None,
            config: MachineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: MachineConfig) -> Self {
        self.config = config;
        self
    }

    /// Run the validation probe after provisioning succeeds.
    pub fn with_probe(mut self, probe: Arc<ValidationProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Create and persist a `Pending` record.
    ///
    /// Refused while another record still holds the same resource group.
    pub async fn start(
        &self,
        deployment: &ResolvedDeployment,
        cleanup_mode: CleanupMode,
    ) -> Result<DeploymentRecord> {
        let holder = self.store.list().await?.into_iter().find(|r| {
            r.resource_group == deployment.resource_group && r.state.holds_resources()
        });
        if let Some(holder) = holder {
            return Err(CloudError::ResourceGroupInUse {
                resource_group: holder.resource_group,
                deployment_id: holder.deployment_id,
            });
        }

        let record = DeploymentRecord::new(deployment, cleanup_mode);
        self.store.insert(&record).await?;
        info!(
            deployment_id = %record.deployment_id,
            scenario = %record.scenario,
            resource_group = %record.resource_group,
            "Deployment record created"
        );
        Ok(record)
    }

    /// `start` followed by `run`.
    pub async fn execute(
        &self,
        deployment: &ResolvedDeployment,
        cleanup_mode: CleanupMode,
        cancel: &CancellationToken,
    ) -> Result<DeploymentRecord> {
        let record = self.start(deployment, cleanup_mode).await?;
        self.run(deployment, &record.deployment_id, cancel).await
    }

    /// Drive an existing record to a terminal state.
    ///
    /// Returns `Err` only for state store failures; deployment failures end
    /// up in the returned record.
    pub async fn run(
        &self,
        deployment: &ResolvedDeployment,
        deployment_id: &str,
        cancel: &CancellationToken,
    ) -> Result<DeploymentRecord> {
        let secret = &deployment.secret;
        let deadline = Instant::now() + self.config.deployment_timeout;

        let record = self
            .advance(deployment_id, DeploymentState::Submitting, |_| {})
            .await?;
        if record.state == DeploymentState::Cleaned {
            return Ok(record);
        }

        let handle = match self.submit(deployment, deadline, cancel).await {
            Step::Done(handle) => handle,
            Step::Fail(f) => return self.fail(deployment_id, f, secret).await,
            Step::Cancelled => return self.cancelled(deployment_id, secret).await,
            Step::Cleaned => return self.store.get(deployment_id).await,
        };

        let record = self
            .advance(deployment_id, DeploymentState::Provisioning, |r| {
                r.operation = Some(handle.clone());
            })
            .await?;
        if record.state == DeploymentState::Cleaned {
            return Ok(record);
        }

        let outputs = match self.wait(deployment_id, &handle, secret, deadline, cancel).await {
            Step::Done(outputs) => outputs.scrubbed(secret),
            Step::Fail(f) => return self.fail(deployment_id, f, secret).await,
            Step::Cancelled => return self.cancelled(deployment_id, secret).await,
            Step::Cleaned => {
                info!(deployment_id, "Deployment was cleaned up while provisioning, stopping");
                return self.store.get(deployment_id).await;
            }
        };

        let scheme = deployment.protocol.scheme;
        let connection = ConnectionInfo {
            scheme,
            uri: scheme.uri_for(&outputs.endpoint_host),
            browser_url: outputs.browser_url.clone(),
        };
        info!(
            deployment_id,
            uri = %connection.uri,
            scheme = %scheme,
            "Provisioning succeeded"
        );

        let capture = |r: &mut DeploymentRecord| {
            r.outputs = Some(outputs.clone());
            r.connection = Some(connection.clone());
        };

        let Some(probe) = &self.probe else {
            return self
                .advance(deployment_id, DeploymentState::Succeeded, capture)
                .await;
        };

        let record = self
            .advance(deployment_id, DeploymentState::Validating, capture)
            .await?;
        if record.state == DeploymentState::Cleaned {
            return Ok(record);
        }

        let target = ConnectTarget {
            uri: connection.uri.clone(),
            scheme,
            username: ADMIN_USER.to_string(),
            password: secret.clone(),
            expected_members: deployment.node_count,
            evaluation_license: deployment.is_evaluation(),
        };
        let report = probe.run(&target, cancel).await;

        let (state, outcome) = if report.cancelled {
            (
                DeploymentState::Failed,
                Some(failure(FailureKind::Cancelled, "cancelled during validation")),
            )
        } else if report.succeeded() {
            (DeploymentState::Succeeded, None)
        } else {
            let last = report.last();
            (
                DeploymentState::Failed,
                Some(Failure {
                    kind: FailureKind::Validation,
                    class: last.map(|r| r.class),
                    detail: last
                        .map(|r| r.diagnostic.clone())
                        .unwrap_or_else(|| "probe produced no result".to_string()),
                }),
            )
        };

        self.advance(deployment_id, state, |r| {
            r.validations.extend(report.results.iter().cloned());
            r.failure = outcome.clone();
        })
        .await
    }

    async fn submit(
        &self,
        deployment: &ResolvedDeployment,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Step<OperationHandle> {
        let boundary = &self.boundary;
        let secret = &deployment.secret;
        self.with_retry("submit", secret, deadline, cancel, move || async move {
            boundary.ensure_resource_group(deployment).await?;
            let validation = boundary.validate_template(deployment).await?;
            debug!(
                deployment = %deployment.deployment_name,
                ?validation,
                "Template validated"
            );
            boundary.submit(deployment).await
        })
        .await
    }

    /// Poll until the boundary reports a terminal status or the record is
    /// cleaned up concurrently.
    async fn wait(
        &self,
        deployment_id: &str,
        handle: &OperationHandle,
        secret: &SecretValue,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Step<DeploymentOutputs> {
        let boundary = &self.boundary;
        loop {
            let status = match self
                .with_retry("poll", secret, deadline, cancel, move || boundary.poll(handle))
                .await
            {
                Step::Done(status) => status,
                Step::Fail(f) => return Step::Fail(f),
                Step::Cancelled => return Step::Cancelled,
                Step::Cleaned => return Step::Cleaned,
            };

            match status {
                OperationStatus::Succeeded(outputs) => return Step::Done(outputs),
                OperationStatus::Failed(detail) => {
                    return Step::Fail(failure(FailureKind::ProvisioningFailed, detail));
                }
                OperationStatus::Running => {
                    debug!(
                        deployment = %handle.deployment_name,
                        next_poll_secs = self.config.poll_interval.as_secs(),
                        "Deployment still running"
                    );
                    if let Some(step) = self.pause(self.config.poll_interval, deadline, cancel).await
                    {
                        return step;
                    }
                    match self.store.get(deployment_id).await {
                        Ok(record) if record.state == DeploymentState::Cleaned => {
                            return Step::Cleaned;
                        }
                        Ok(_) => {}
                        Err(e) => warn!(deployment_id, error = %e, "Could not re-read record"),
                    }
                }
            }
        }
    }

    /// Call `op`, retrying transient errors per policy, bounded by the
    /// deadline and the abort signal.
    async fn with_retry<T, F, Fut>(
        &self,
        operation: &'static str,
        secret: &SecretValue,
        deadline: Instant,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Step<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ProvisioningError>>,
    {
        let mut retries = 0;
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Step::Cancelled,
                _ = tokio::time::sleep_until(deadline) => return Step::Fail(self.timed_out()),
                r = op() => r,
            };

            let error = match result {
                Ok(value) => return Step::Done(value),
                Err(e) => e,
            };

            let Some(delay) = self.config.retry.next_delay(retries, &error) else {
                return Step::Fail(match &error {
                    e if e.is_transient() => failure(
                        FailureKind::ProvisioningExhausted,
                        format!("{} failed after {} retries: {}", operation, retries, e),
                    ),
                    ProvisioningError::Rejected { .. } => {
                        failure(FailureKind::ProvisioningRejected, error.to_string())
                    }
                    _ => failure(FailureKind::ProvisioningFailed, error.to_string()),
                });
            };

            retries += 1;
            warn!(
                operation,
                retry = retries,
                delay_secs = delay.as_secs(),
                error = %secret.scrub(&error.to_string()),
                "Transient provisioning error, retrying"
            );
            if let Some(step) = self.pause(delay, deadline, cancel).await {
                return step;
            }
        }
    }

    /// Sleep for `delay` unless cancelled or the deadline passes first.
    async fn pause<T>(
        &self,
        delay: Duration,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Option<Step<T>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Some(Step::Cancelled),
            _ = tokio::time::sleep_until(deadline) => Some(Step::Fail(self.timed_out())),
            _ = tokio::time::sleep(delay) => None,
        }
    }

    fn timed_out(&self) -> Failure {
        failure(
            FailureKind::Timeout,
            format!(
                "deployment did not complete within {}s",
                self.config.deployment_timeout.as_secs()
            ),
        )
    }

    async fn cancelled(&self, deployment_id: &str, secret: &SecretValue) -> Result<DeploymentRecord> {
        self.fail(
            deployment_id,
            failure(FailureKind::Cancelled, "cancelled by user"),
            secret,
        )
        .await
    }

    async fn fail(
        &self,
        deployment_id: &str,
        mut failure: Failure,
        secret: &SecretValue,
    ) -> Result<DeploymentRecord> {
        failure.detail = secret.scrub(&failure.detail);
        warn!(deployment_id, failure = %failure, "Deployment failed");
        self.advance(deployment_id, DeploymentState::Failed, |r| {
            r.failure = Some(failure.clone());
        })
        .await
    }

    /// Apply `change` and move to `state` in one record update. Records in
    /// `Cleaned` are left untouched.
    async fn advance<F>(
        &self,
        deployment_id: &str,
        state: DeploymentState,
        change: F,
    ) -> Result<DeploymentRecord>
    where
        F: Fn(&mut DeploymentRecord) + Send + Sync,
    {
        let record = update_record(self.store.as_ref(), deployment_id, |r| {
            if r.state == DeploymentState::Cleaned {
                return false;
            }
            let from = r.state;
            change(r);
            r.transition_to(state);
            debug!(deployment_id, from = %from, to = %state, "Transition");
            true
        })
        .await?;

        if record.state == DeploymentState::Cleaned && state != DeploymentState::Cleaned {
            info!(deployment_id, "Deployment was cleaned up concurrently, stopping");
        } else {
            info!(deployment_id, state = %record.state, "Deployment state changed");
        }
        Ok(record)
    }
}
