//! neodeploy deployment execution
//!
//! Drives resolved deployments through a provisioning boundary, records
//! their lifecycle and tears them down again.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  neodeploy CLI                   │
//! │          (deploy / status / cleanup)             │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                neodeploy-cloud                   │
//! │  ┌──────────────────┐  ┌──────────────────┐     │
//! │  │  State machine   │  │ Cleanup coord.   │     │
//! │  └────────┬─────────┘  └────────┬─────────┘     │
//! │  ┌────────▼─────────┐  ┌────────▼─────────┐     │
//! │  │ Validation probe │  │   State store    │     │
//! │  └──────────────────┘  └──────────────────┘     │
//! │  trait ProvisioningBoundary { ... }             │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//!           ┌───────▼────────┐
//!           │ azure (az CLI) │
//!           └────────────────┘
//! ```

pub mod cleanup;
pub mod error;
pub mod machine;
pub mod probe;
pub mod provider;
pub mod state;

#[cfg(test)]
mod testing;

// Re-exports
pub use cleanup::{CleanedDeployment, CleanupCoordinator, CleanupError, CleanupReport, CleanupSelector};
pub use error::{CloudError, Result};
pub use machine::{DeploymentStateMachine, MachineConfig};
pub use neodeploy_core::CleanupMode;
pub use probe::{
    ConnectTarget, DatabaseClient, DatabaseError, DatabaseSession, ProbeReport, ValidationClass,
    ValidationProbe, ValidationResult, probe_retry_policy,
};
pub use provider::{
    DeleteOutcome, DeploymentOutputs, GroupOwnership, OperationHandle, OperationStatus,
    ProvisioningBoundary, ProvisioningError, TemplateValidation, provisioning_retry_policy,
};
pub use state::{
    ConnectionInfo, DeploymentRecord, DeploymentState, Failure, FailureKind, FileStateStore,
    MemoryStateStore, StateStore, Transition, find_record, update_record,
};
