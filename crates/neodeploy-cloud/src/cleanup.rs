//! Resource group teardown for recorded deployments

use crate::error::Result;
use crate::provider::{
    DeleteOutcome, GroupOwnership, ProvisioningBoundary, ProvisioningError,
    provisioning_retry_policy,
};
use crate::state::{DeploymentRecord, DeploymentState, StateStore, find_record, update_record};
use chrono::Utc;
use futures_util::future::join_all;
use neodeploy_core::RetryPolicy;
use neodeploy_core::params::MANAGED_BY;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Which records to clean up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupSelector {
    /// Full id or unique id prefix
    Deployment(String),
    Scenario(String),
    /// Records created at least this many hours ago
    OlderThan(u64),
    All,
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("cleanup of {deployment_id} ({resource_group}) failed: {reason}")]
pub struct CleanupError {
    pub deployment_id: String,
    pub resource_group: String,
    pub reason: String,
}

/// A record whose resources are gone
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanedDeployment {
    pub deployment_id: String,
    pub scenario: String,
    pub resource_group: String,

    /// The resource group did not exist anymore
    pub already_absent: bool,

    /// The record was `Cleaned` before this run
    pub already_cleaned: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub cleaned: Vec<CleanedDeployment>,
    pub failures: Vec<CleanupError>,
    pub dry_run: bool,
}

impl CleanupReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct CleanupCoordinator {
    boundary: Arc<dyn ProvisioningBoundary>,
    store: Arc<dyn StateStore>,
    retry: RetryPolicy<ProvisioningError>,
    force: bool,
}

impl CleanupCoordinator {
    pub fn new(boundary: Arc<dyn ProvisioningBoundary>, store: Arc<dyn StateStore>) -> Self {
        Self {
            boundary,
            store,
            retry: provisioning_retry_policy(),
            force: false,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy<ProvisioningError>) -> Self {
        self.retry = retry;
        self
    }

    /// Delete resource groups that lack the `managed-by` tag
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Records matched by `selector`.
    ///
    /// A deployment named explicitly is returned even when already `Cleaned`
    /// so that repeating a cleanup succeeds. Bulk selectors skip `Cleaned`.
    pub async fn select(&self, selector: &CleanupSelector) -> Result<Vec<DeploymentRecord>> {
        if let CleanupSelector::Deployment(id) = selector {
            return Ok(vec![find_record(self.store.as_ref(), id).await?]);
        }

        let now = Utc::now();
        let records = self.store.list().await?;
        Ok(records
            .into_iter()
            .filter(|r| r.state != DeploymentState::Cleaned)
            .filter(|r| match selector {
                CleanupSelector::Scenario(name) => &r.scenario == name,
                CleanupSelector::OlderThan(hours) => {
                    r.age_hours(now) >= i64::try_from(*hours).unwrap_or(i64::MAX)
                }
                CleanupSelector::All | CleanupSelector::Deployment(_) => true,
            })
            .collect())
    }

    /// Delete the resource groups of every selected record concurrently and
    /// mark them `Cleaned`. Individual failures are collected, not raised.
    ///
    /// Records sharing a resource group are cleaned together. A group still
    /// held by an unselected record that is in flight or succeeded is left
    /// alone and reported as a failure.
    pub async fn cleanup(&self, selector: &CleanupSelector, dry_run: bool) -> Result<CleanupReport> {
        let records = self.select(selector).await?;
        let mut report = CleanupReport {
            dry_run,
            ..CleanupReport::default()
        };

        if dry_run {
            report.cleaned = records
                .iter()
                .map(|r| CleanedDeployment {
                    deployment_id: r.deployment_id.clone(),
                    scenario: r.scenario.clone(),
                    resource_group: r.resource_group.clone(),
                    already_absent: false,
                    already_cleaned: r.state == DeploymentState::Cleaned,
                })
                .collect();
            return Ok(report);
        }

        let everything = self.store.list().await?;
        let mut groups: BTreeMap<&str, Vec<&DeploymentRecord>> = BTreeMap::new();
        for record in &records {
            groups
                .entry(record.resource_group.as_str())
                .or_default()
                .push(record);
        }

        let outcomes = join_all(
            groups
                .into_iter()
                .map(|(group, selected)| self.clean_group(group, selected, &everything)),
        )
        .await;
        for outcome in outcomes {
            match outcome {
                Ok(cleaned) => report.cleaned.extend(cleaned),
                Err(errors) => {
                    for e in errors {
                        warn!(
                            deployment_id = %e.deployment_id,
                            resource_group = %e.resource_group,
                            reason = %e.reason,
                            "Cleanup failed"
                        );
                        report.failures.push(e);
                    }
                }
            }
        }

        info!(
            cleaned = report.cleaned.len(),
            failed = report.failures.len(),
            "Cleanup finished"
        );
        Ok(report)
    }

    async fn clean_group(
        &self,
        resource_group: &str,
        selected: Vec<&DeploymentRecord>,
        everything: &[DeploymentRecord],
    ) -> std::result::Result<Vec<CleanedDeployment>, Vec<CleanupError>> {
        let fail_all = |reason: String| {
            selected
                .iter()
                .map(|r| CleanupError {
                    deployment_id: r.deployment_id.clone(),
                    resource_group: resource_group.to_string(),
                    reason: reason.clone(),
                })
                .collect::<Vec<_>>()
        };

        let is_selected = |id: &str| selected.iter().any(|r| r.deployment_id == id);
        let siblings: Vec<&DeploymentRecord> = everything
            .iter()
            .filter(|r| r.resource_group == resource_group && !is_selected(&r.deployment_id))
            .filter(|r| r.state != DeploymentState::Cleaned)
            .collect();
        if let Some(holder) = siblings.iter().find(|r| r.state.holds_resources()) {
            return Err(fail_all(format!(
                "resource group still used by deployment {} ({})",
                holder.short_id(),
                holder.state
            )));
        }

        let outcome = self
            .delete_owned(resource_group)
            .await
            .map_err(fail_all)?;

        let mut cleaned = Vec::new();
        let mut errors = Vec::new();
        for record in selected.into_iter().chain(siblings) {
            match self.mark_cleaned(record, outcome).await {
                Ok(done) => cleaned.push(done),
                Err(e) => errors.push(e),
            }
        }
        if errors.is_empty() {
            Ok(cleaned)
        } else {
            Err(errors)
        }
    }

    /// Check the ownership tag, then delete with retries
    async fn delete_owned(&self, resource_group: &str) -> std::result::Result<DeleteOutcome, String> {
        let ownership = self
            .boundary
            .resource_group_ownership(resource_group)
            .await
            .map_err(|e| e.to_string())?;
        match ownership {
            GroupOwnership::Absent => return Ok(DeleteOutcome::AlreadyAbsent),
            GroupOwnership::Foreign if !self.force => {
                return Err(format!(
                    "not tagged managed-by={}; refusing to delete (use --force to override)",
                    MANAGED_BY
                ));
            }
            GroupOwnership::Foreign => {
                warn!(resource_group, "Deleting resource group without the managed-by tag");
            }
            GroupOwnership::Managed => {}
        }
        self.delete_with_retry(resource_group)
            .await
            .map_err(|e| e.to_string())
    }

    async fn mark_cleaned(
        &self,
        record: &DeploymentRecord,
        outcome: DeleteOutcome,
    ) -> std::result::Result<CleanedDeployment, CleanupError> {
        let mut already_cleaned = true;
        update_record(self.store.as_ref(), &record.deployment_id, |r| {
            let changed = r.transition_to(DeploymentState::Cleaned);
            already_cleaned = !changed;
            changed
        })
        .await
        .map_err(|e| CleanupError {
            deployment_id: record.deployment_id.clone(),
            resource_group: record.resource_group.clone(),
            reason: e.to_string(),
        })?;

        info!(
            deployment_id = %record.deployment_id,
            resource_group = %record.resource_group,
            ?outcome,
            "Deployment cleaned"
        );
        Ok(CleanedDeployment {
            deployment_id: record.deployment_id.clone(),
            scenario: record.scenario.clone(),
            resource_group: record.resource_group.clone(),
            already_absent: outcome == DeleteOutcome::AlreadyAbsent,
            already_cleaned,
        })
    }

    async fn delete_with_retry(
        &self,
        resource_group: &str,
    ) -> std::result::Result<DeleteOutcome, ProvisioningError> {
        let mut retries = 0;
        loop {
            match self.boundary.delete_resource_group(resource_group).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    let Some(delay) = self.retry.next_delay(retries, &e) else {
                        return Err(e);
                    };
                    retries += 1;
                    warn!(resource_group, retry = retries, error = %e, "Retrying delete");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
