//! Deployment records and their persistence
//!
//! Each record lives in its own JSON file under
//! `.neodeploy/state/deployments/<deployment-id>.json`. Updates are
//! record-scoped: a per-record lock file guards the read-compare-write and the
//! record's `version` stamp detects lost updates, so unrelated deployments
//! never contend.

use crate::error::{CloudError, Result};
use crate::probe::{ValidationClass, ValidationResult};
use crate::provider::{DeploymentOutputs, OperationHandle};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neodeploy_core::{CleanupMode, ConnectionScheme, ResolvedDeployment, SecretHandle};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::sync::RwLock;

pub const SCHEMA_VERSION: u32 = 1;
const LOCK_STALE_AFTER: Duration = Duration::from_secs(60);
const LOCK_WAIT: Duration = Duration::from_secs(5);
const LOCK_RETRY: Duration = Duration::from_millis(25);
const MAX_CONFLICT_RETRIES: u32 = 8;

/// Lifecycle state of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    /// Record created, nothing submitted yet
    Pending,
    /// Resource group and deployment being submitted
    Submitting,
    /// Accepted by the boundary, waiting for completion
    Provisioning,
    /// Provisioned, functional probe running
    Validating,
    Succeeded,
    Failed,
    /// Resources torn down; terminal
    Cleaned,
}

impl DeploymentState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentState::Succeeded | DeploymentState::Failed | DeploymentState::Cleaned
        )
    }

    /// In flight or live; the resource group must not be deleted from under it
    pub fn holds_resources(&self) -> bool {
        !matches!(self, DeploymentState::Failed | DeploymentState::Cleaned)
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeploymentState::Pending => "pending",
            DeploymentState::Submitting => "submitting",
            DeploymentState::Provisioning => "provisioning",
            DeploymentState::Validating => "validating",
            DeploymentState::Succeeded => "succeeded",
            DeploymentState::Failed => "failed",
            DeploymentState::Cleaned => "cleaned",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub state: DeploymentState,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    ProvisioningRejected,
    ProvisioningFailed,
    ProvisioningExhausted,
    Timeout,
    Cancelled,
    Validation,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::ProvisioningRejected => "provisioning-rejected",
            FailureKind::ProvisioningFailed => "provisioning-failed",
            FailureKind::ProvisioningExhausted => "provisioning-exhausted",
            FailureKind::Timeout => "timeout",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Validation => "validation",
        };
        f.write_str(s)
    }
}

/// Last failure of a deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,

    /// Probe classification when `kind` is `validation`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<ValidationClass>,

    /// Detail text, scrubbed of the credential
    pub detail: String,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.class {
            Some(class) => write!(f, "{} ({}): {}", self.kind, class, self.detail),
            None => write!(f, "{}: {}", self.kind, self.detail),
        }
    }
}

/// How clients reach the deployed database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub scheme: ConnectionScheme,
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_url: Option<String>,
}

/// One execution of a scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Record format version
    pub schema_version: u32,

    /// Unique id (UUIDv4)
    pub deployment_id: String,

    /// Scenario this record executes
    pub scenario: String,

    pub resource_group: String,
    pub deployment_name: String,
    pub region: String,

    /// Current lifecycle state
    pub state: DeploymentState,

    /// Every state entered, in order
    pub transitions: Vec<Transition>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Handle returned by the boundary on submission
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<OperationHandle>,

    /// Outputs captured on provisioning success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<DeploymentOutputs>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionInfo>,

    /// Reference to the admin credential; never the value
    pub secret: SecretHandle,

    /// Probe attempts, oldest first
    #[serde(default)]
    pub validations: Vec<ValidationResult>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,

    #[serde(default)]
    pub cleanup_mode: CleanupMode,

    /// Optimistic concurrency stamp, bumped on every write
    pub version: u64,
}

impl DeploymentRecord {
    /// New `Pending` record for a resolved deployment.
    pub fn new(deployment: &ResolvedDeployment, cleanup_mode: CleanupMode) -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION,
            deployment_id: uuid::Uuid::new_v4().to_string(),
            scenario: deployment.scenario.clone(),
            resource_group: deployment.resource_group.clone(),
            deployment_name: deployment.deployment_name.clone(),
            region: deployment.region.clone(),
            state: DeploymentState::Pending,
            transitions: vec![Transition {
                state: DeploymentState::Pending,
                at: now,
            }],
            created_at: now,
            updated_at: now,
            operation: None,
            outputs: None,
            connection: None,
            secret: deployment.secret_handle.clone(),
            validations: Vec::new(),
            failure: None,
            cleanup_mode,
            version: 0,
        }
    }

    /// Move to `state`, recording the transition. A `Cleaned` record never
    /// leaves `Cleaned`; returns whether anything changed.
    pub fn transition_to(&mut self, state: DeploymentState) -> bool {
        if self.state == DeploymentState::Cleaned || self.state == state {
            return false;
        }
        let now = Utc::now();
        self.state = state;
        self.transitions.push(Transition { state, at: now });
        self.updated_at = now;
        true
    }

    pub fn short_id(&self) -> &str {
        self.deployment_id.get(..8).unwrap_or(&self.deployment_id)
    }

    pub fn age_hours(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.created_at).num_hours()
    }
}

/// Durable record store
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Persist a new record; fails if the id already exists
    async fn insert(&self, record: &DeploymentRecord) -> Result<()>;

    async fn get(&self, deployment_id: &str) -> Result<DeploymentRecord>;

    /// Every record, oldest first
    async fn list(&self) -> Result<Vec<DeploymentRecord>>;

    /// Write `record` if the stored version equals `expected_version`.
    /// Returns the stored record with its bumped version.
    async fn compare_and_swap(
        &self,
        record: &DeploymentRecord,
        expected_version: u64,
    ) -> Result<DeploymentRecord>;

    /// Remove a record entirely
    async fn purge(&self, deployment_id: &str) -> Result<()>;
}

/// Read-modify-write with optimistic concurrency.
///
/// `apply` returns whether it changed the record; unchanged records are not
/// written. Conflicts re-read and re-apply a bounded number of times.
pub async fn update_record<F>(
    store: &dyn StateStore,
    deployment_id: &str,
    mut apply: F,
) -> Result<DeploymentRecord>
where
    F: FnMut(&mut DeploymentRecord) -> bool + Send,
{
    let mut conflicts = 0;
    loop {
        let current = store.get(deployment_id).await?;
        let mut next = current.clone();
        if !apply(&mut next) {
            return Ok(current);
        }
        match store.compare_and_swap(&next, current.version).await {
            Ok(stored) => return Ok(stored),
            Err(CloudError::VersionConflict { .. }) if conflicts < MAX_CONFLICT_RETRIES => {
                conflicts += 1;
                tracing::debug!(deployment_id, conflicts, "Version conflict, retrying update");
            }
            Err(e) => return Err(e),
        }
    }
}

/// Find a record by full id or unique id prefix.
pub async fn find_record(store: &dyn StateStore, id_or_prefix: &str) -> Result<DeploymentRecord> {
    if let Ok(record) = store.get(id_or_prefix).await {
        return Ok(record);
    }
    let mut matches: Vec<DeploymentRecord> = store
        .list()
        .await?
        .into_iter()
        .filter(|r| r.deployment_id.starts_with(id_or_prefix))
        .collect();
    match matches.len() {
        0 => Err(CloudError::DeploymentNotFound(id_or_prefix.to_string())),
        1 => Ok(matches.remove(0)),
        _ => Err(CloudError::AmbiguousDeployment {
            prefix: id_or_prefix.to_string(),
            candidates: matches.into_iter().map(|r| r.deployment_id).collect(),
        }),
    }
}

fn check_id(deployment_id: &str) -> Result<()> {
    let ok = !deployment_id.is_empty()
        && deployment_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-');
    if ok {
        Ok(())
    } else {
        Err(CloudError::DeploymentNotFound(deployment_id.to_string()))
    }
}

/// One JSON file per record
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn lock_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", id))
    }

    async fn ensure_dir(&self) -> Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir).await?;
            tracing::debug!("Created state directory: {}", self.dir.display());
        }
        Ok(())
    }

    async fn acquire_lock(&self, id: &str) -> Result<RecordLock> {
        self.ensure_dir().await?;
        let path = self.lock_path(id);
        let deadline = tokio::time::Instant::now() + LOCK_WAIT;

        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(_) => return Ok(RecordLock { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if lock_is_stale(&path).await {
                        tracing::warn!(lock = %path.display(), "Removing stale record lock");
                        let _ = fs::remove_file(&path).await;
                        continue;
                    }
                    if tokio::time::Instant::now() >= deadline {
                        return Err(CloudError::LockError(format!(
                            "record {} is locked by another process",
                            id
                        )));
                    }
                    tokio::time::sleep(LOCK_RETRY).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn read(&self, id: &str) -> Result<Option<DeploymentRecord>> {
        let path = self.record_path(id);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: DeploymentRecord = serde_json::from_str(&content)?;
        if record.schema_version > SCHEMA_VERSION {
            return Err(CloudError::StateError(format!(
                "record {} has schema version {}, newer than supported version {}",
                id, record.schema_version, SCHEMA_VERSION
            )));
        }
        Ok(Some(record))
    }

    async fn write(&self, record: &DeploymentRecord) -> Result<()> {
        let path = self.record_path(&record.deployment_id);
        let tmp = self.dir.join(format!("{}.json.tmp", record.deployment_id));
        let content = serde_json::to_string_pretty(record)?;
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

async fn lock_is_stale(path: &Path) -> bool {
    match fs::metadata(path).await.and_then(|m| m.modified()) {
        Ok(modified) => modified
            .elapsed()
            .map(|age| age > LOCK_STALE_AFTER)
            .unwrap_or(false),
        Err(_) => false,
    }
}

/// Removes the lock file when dropped
struct RecordLock {
    path: PathBuf,
}

impl Drop for RecordLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn insert(&self, record: &DeploymentRecord) -> Result<()> {
        check_id(&record.deployment_id)?;
        let _lock = self.acquire_lock(&record.deployment_id).await?;
        if self.record_path(&record.deployment_id).exists() {
            return Err(CloudError::DeploymentExists(record.deployment_id.clone()));
        }
        self.write(record).await?;
        tracing::debug!(deployment_id = %record.deployment_id, "Inserted record");
        Ok(())
    }

    async fn get(&self, deployment_id: &str) -> Result<DeploymentRecord> {
        check_id(deployment_id)?;
        self.read(deployment_id)
            .await?
            .ok_or_else(|| CloudError::DeploymentNotFound(deployment_id.to_string()))
    }

    async fn list(&self) -> Result<Vec<DeploymentRecord>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(record) = self.read(id).await? {
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tracing::debug!("Loaded {} deployment records", records.len());
        Ok(records)
    }

    async fn compare_and_swap(
        &self,
        record: &DeploymentRecord,
        expected_version: u64,
    ) -> Result<DeploymentRecord> {
        check_id(&record.deployment_id)?;
        let _lock = self.acquire_lock(&record.deployment_id).await?;
        let current = self
            .read(&record.deployment_id)
            .await?
            .ok_or_else(|| CloudError::DeploymentNotFound(record.deployment_id.clone()))?;
        if current.version != expected_version {
            return Err(CloudError::VersionConflict {
                id: record.deployment_id.clone(),
                expected: expected_version,
                found: current.version,
            });
        }
        let mut stored = record.clone();
        stored.version = expected_version + 1;
        self.write(&stored).await?;
        Ok(stored)
    }

    async fn purge(&self, deployment_id: &str) -> Result<()> {
        check_id(deployment_id)?;
        let _lock = self.acquire_lock(deployment_id).await?;
        match fs::remove_file(self.record_path(deployment_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CloudError::DeploymentNotFound(deployment_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store for tests and dry runs
#[derive(Default)]
pub struct MemoryStateStore {
    records: RwLock<HashMap<String, DeploymentRecord>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn insert(&self, record: &DeploymentRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.deployment_id) {
            return Err(CloudError::DeploymentExists(record.deployment_id.clone()));
        }
        records.insert(record.deployment_id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, deployment_id: &str) -> Result<DeploymentRecord> {
        self.records
            .read()
            .await
            .get(deployment_id)
            .cloned()
            .ok_or_else(|| CloudError::DeploymentNotFound(deployment_id.to_string()))
    }

    async fn list(&self) -> Result<Vec<DeploymentRecord>> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    async fn compare_and_swap(
        &self,
        record: &DeploymentRecord,
        expected_version: u64,
    ) -> Result<DeploymentRecord> {
        let mut records = self.records.write().await;
        let current = records
            .get(&record.deployment_id)
            .ok_or_else(|| CloudError::DeploymentNotFound(record.deployment_id.clone()))?;
        if current.version != expected_version {
            return Err(CloudError::VersionConflict {
                id: record.deployment_id.clone(),
                expected: expected_version,
                found: current.version,
            });
        }
        let mut stored = record.clone();
        stored.version = expected_version + 1;
        records.insert(stored.deployment_id.clone(), stored.clone());
        Ok(stored)
    }

    async fn purge(&self, deployment_id: &str) -> Result<()> {
        self.records
            .write()
            .await
            .remove(deployment_id)
            .map(|_| ())
            .ok_or_else(|| CloudError::DeploymentNotFound(deployment_id.to_string()))
    }
}
