//! Error types for deployment execution and state persistence

use crate::provider::ProvisioningError;
use neodeploy_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Deployment not found: {0}")]
    DeploymentNotFound(String),

    #[error("Deployment id prefix '{prefix}' is ambiguous: {candidates:?}")]
    AmbiguousDeployment {
        prefix: String,
        candidates: Vec<String>,
    },

    #[error("Deployment already exists: {0}")]
    DeploymentExists(String),

    #[error(
        "Resource group {resource_group} is in use by deployment {deployment_id}; \
         run `neodeploy cleanup --deployment {deployment_id}` first"
    )]
    ResourceGroupInUse {
        resource_group: String,
        deployment_id: String,
    },

    #[error("Version conflict on {id}: expected {expected}, found {found}")]
    VersionConflict { id: String, expected: u64, found: u64 },

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Provisioning error: {0}")]
    Provisioning(#[from] ProvisioningError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CloudError>;
