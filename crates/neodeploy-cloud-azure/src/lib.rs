//! Azure boundaries for neodeploy
//!
//! - [`ArmProvider`]: resource groups and ARM/Bicep deployments
//! - [`KeyVaultStore`]: admin credentials in Azure Key Vault
//!
//! Both drive the Azure CLI (`az`), which must be installed and logged in.

pub mod az;
pub mod error;
pub mod keyvault;
pub mod provider;

pub use az::AzCli;
pub use error::{AzureError, Result};
pub use keyvault::KeyVaultStore;
pub use provider::{ArmProvider, TEMPLATE_FILE};
