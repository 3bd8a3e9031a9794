//! neodeploy core
//!
//! Scenario model and registry, provisioning parameter resolution, connection
//! scheme selection, admin credential lifecycle and the shared retry policy.
//!
//! ```text
//! scenarios.yaml ─▶ ScenarioRegistry ─▶ Scenario
//!                                          │
//!        SecretLifecycleManager ─▶ ResolvedSecret
//!                                          │
//!                  params::resolve ─▶ ResolvedDeployment ─▶ provisioning
//! ```

pub mod error;
pub mod model;
pub mod params;
pub mod protocol;
pub mod registry;
pub mod retry;
pub mod secret;

pub use error::{CoreError, Result, ScenarioIssue, SecretError};
pub use model::{
    CleanupMode, CredentialBinding, DatabaseVersion, Edition, KubernetesConfig, LicenseType, Platform,
    PluginConfig, Plugins, ReadReplicas, Scenario, Sizing,
};
pub use params::{
    DeploymentContext, ParameterSet, ResolvedDeployment, SecureParameters, TemplateKind,
    naming_suffix,
};
pub use protocol::{ConnectionScheme, NetworkPlan, ProtocolSelection};
pub use registry::ScenarioRegistry;
pub use retry::{Backoff, RetryPolicy};
pub use secret::{
    DefaultStoreReference, MemorySecretStore, ResolvedSecret, SecretHandle,
    SecretLifecycleManager, SecretMode, SecretStore, SecretValue, StoreLocation,
};
