//! Azure Key Vault secret store
//!
//! Values travel through a private temporary file on write and through
//! stdout on read; they never appear in argv.

use crate::az::{AzCli, classify_secret};
use crate::error::AzureError;
use async_trait::async_trait;
use neodeploy_core::{SecretError, SecretStore, SecretValue, StoreLocation};

pub struct KeyVaultStore {
    az: AzCli,
    vault: String,
    resource_group: Option<String>,
}

impl KeyVaultStore {
    pub fn new(az: AzCli, vault: impl Into<String>) -> Self {
        Self {
            az,
            vault: vault.into(),
            resource_group: None,
        }
    }

    /// Resource group holding the vault, passed on to templates
    pub fn with_resource_group(mut self, resource_group: impl Into<String>) -> Self {
        self.resource_group = Some(resource_group.into());
        self
    }

    pub fn vault(&self) -> &str {
        &self.vault
    }
}

fn secret_error(error: AzureError, reference: &str) -> SecretError {
    match error {
        AzureError::CommandFailed { stderr, .. } => classify_secret(&stderr, reference),
        other => SecretError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl SecretStore for KeyVaultStore {
    fn name(&self) -> &str {
        "keyvault"
    }

    async fn get(&self, reference: &str) -> Result<SecretValue, SecretError> {
        let output = self
            .az
            .run(&[
                "keyvault",
                "secret",
                "show",
                "--vault-name",
                self.vault.as_str(),
                "--name",
                reference,
                "--query",
                "value",
                "--output",
                "tsv",
            ])
            .await
            .map_err(|e| secret_error(e, reference))?;

        let value = output.trim_end_matches(['\r', '\n']);
        if value.is_empty() {
            return Err(SecretError::NotFound(reference.to_string()));
        }
        tracing::debug!(vault = %self.vault, secret = reference, "Secret read from Key Vault");
        Ok(SecretValue::new(value))
    }

    async fn put(&self, reference: &str, value: &SecretValue) -> Result<String, SecretError> {
        let unavailable = |e: std::io::Error| SecretError::Unavailable(e.to_string());
        let file = tempfile::Builder::new()
            .prefix("neodeploy-secret-")
            .tempfile()
            .map_err(unavailable)?;
        tokio::fs::write(file.path(), value.expose())
            .await
            .map_err(unavailable)?;

        let path = file.path().display().to_string();
        self.az
            .run(&[
                "keyvault",
                "secret",
                "set",
                "--vault-name",
                self.vault.as_str(),
                "--name",
                reference,
                "--file",
                path.as_str(),
                "--encoding",
                "utf-8",
                "--output",
                "none",
            ])
            .await
            .map_err(|e| secret_error(e, reference))?;
        drop(file);

        tracing::info!(vault = %self.vault, secret = reference, "Secret stored in Key Vault");
        Ok(self.handle_reference(reference))
    }

    fn handle_reference(&self, reference: &str) -> String {
        format!("keyvault://{}/{}", self.vault, reference)
    }

    fn location(&self, reference: &str) -> StoreLocation {
        StoreLocation {
            store: self.vault.clone(),
            resource_group: self.resource_group.clone(),
            secret_name: reference.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> KeyVaultStore {
        KeyVaultStore::new(AzCli::new(None), "kv-neo4j-test").with_resource_group("rg-vaults")
    }

    #[test]
    fn test_handle_and_location() {
        let store = store();
        assert_eq!(
            store.handle_reference("neo4j-admin"),
            "keyvault://kv-neo4j-test/neo4j-admin"
        );
        let location = store.location("neo4j-admin");
        assert_eq!(location.store, "kv-neo4j-test");
        assert_eq!(location.resource_group.as_deref(), Some("rg-vaults"));
        assert_eq!(location.secret_name, "neo4j-admin");
    }

    #[test]
    fn test_command_failures_map_to_secret_errors() {
        let err = secret_error(
            AzureError::CommandFailed {
                command: "keyvault secret show".into(),
                stderr: "ERROR: (SecretNotFound) A secret with (name/id) neo4j-admin was not found"
                    .into(),
            },
            "neo4j-admin",
        );
        assert_eq!(err, SecretError::NotFound("neo4j-admin".into()));

        let err = secret_error(AzureError::CliNotFound, "neo4j-admin");
        assert!(matches!(err, SecretError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_missing_cli_is_unavailable() {
        let store = KeyVaultStore::new(
            AzCli::new(None).with_program("neodeploy-az-does-not-exist"),
            "kv",
        );
        let result = store.get("neo4j-admin").await;
        assert!(matches!(result, Err(SecretError::Unavailable(_))));
    }
}
