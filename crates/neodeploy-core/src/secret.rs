//! Admin credential lifecycle
//!
//! Resolution order for a scenario:
//!
//! 1. an environment variable bound to the scenario (`supplied`)
//! 2. a secret store reference, from the scenario or the workspace default
//!    (`store-backed`); a missing entry may be generated and stored
//! 3. a freshly generated value (`generated`)
//!
//! The raw value lives only in [`SecretValue`], which never prints itself and
//! has no serde implementation. What gets persisted is the [`SecretHandle`].

use crate::error::{CoreError, Result, SecretError};
use crate::model::{CredentialBinding, Scenario};
use async_trait::async_trait;
use rand::Rng;
use rand::seq::SliceRandom;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub const GENERATED_LENGTH: usize = 24;
pub const MIN_SUPPLIED_LENGTH: usize = 12;
pub const MAX_SUPPLIED_LENGTH: usize = 72;
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(10);

const REDACTED: &str = "[REDACTED]";

const UPPER: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
const LOWER: &[u8] = b"abcdefghijkmnopqrstuvwxyz";
const DIGITS: &[u8] = b"23456789";
const SYMBOLS: &[u8] = b"!#%+-=?@^_";

/// In-memory credential. Cheap to clone, redacted when formatted.
#[derive(Clone)]
pub struct SecretValue(Arc<SecretString>);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Arc::new(SecretString::from(value.into())))
    }

    /// Borrow the raw value. Callers must not log or persist it.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// Replace every occurrence of the raw value in `text`.
    pub fn scrub(&self, text: &str) -> String {
        let raw = self.expose();
        if raw.is_empty() {
            return text.to_string();
        }
        text.replace(raw, REDACTED)
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl fmt::Display for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecretMode {
    Generated,
    Supplied,
    StoreBacked,
}

impl fmt::Display for SecretMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretMode::Generated => write!(f, "generated"),
            SecretMode::Supplied => write!(f, "supplied"),
            SecretMode::StoreBacked => write!(f, "store-backed"),
        }
    }
}

/// Persistable stand-in for a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretHandle {
    pub mode: SecretMode,
    pub reference: String,
}

/// Where a store-backed secret lives, as exposed to the provisioning
/// template (vault name, its resource group and the secret name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLocation {
    pub store: String,
    pub resource_group: Option<String>,
    pub secret_name: String,
}

/// A credential plus how it was obtained.
#[derive(Debug, Clone)]
pub struct ResolvedSecret {
    pub value: SecretValue,
    pub handle: SecretHandle,
    pub location: Option<StoreLocation>,
}

/// External secret store boundary.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Store name used in handles and diagnostics.
    fn name(&self) -> &str;

    async fn get(&self, reference: &str) -> std::result::Result<SecretValue, SecretError>;

    /// Store `value` under `reference` and return the persisted handle
    /// reference.
    async fn put(
        &self,
        reference: &str,
        value: &SecretValue,
    ) -> std::result::Result<String, SecretError>;

    /// Handle reference for an entry of this store.
    fn handle_reference(&self, reference: &str) -> String {
        format!("{}://{}", self.name(), reference)
    }

    fn location(&self, reference: &str) -> StoreLocation {
        StoreLocation {
            store: self.name().to_string(),
            resource_group: None,
            secret_name: reference.to_string(),
        }
    }
}

/// Store backed by a map, for tests and dry runs.
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: RwLock<HashMap<String, SecretValue>>,
    forbidden: RwLock<Vec<String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, reference: impl Into<String>, value: impl Into<String>) {
        self.secrets
            .write()
            .await
            .insert(reference.into(), SecretValue::new(value));
    }

    /// Make `get`/`put` on this reference fail with `Forbidden`.
    pub async fn forbid(&self, reference: impl Into<String>) {
        self.forbidden.write().await.push(reference.into());
    }

    pub async fn contains(&self, reference: &str) -> bool {
        self.secrets.read().await.contains_key(reference)
    }

    async fn check_access(&self, reference: &str) -> std::result::Result<(), SecretError> {
        if self.forbidden.read().await.iter().any(|r| r == reference) {
            return Err(SecretError::Forbidden(reference.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, reference: &str) -> std::result::Result<SecretValue, SecretError> {
        self.check_access(reference).await?;
        self.secrets
            .read()
            .await
            .get(reference)
            .cloned()
            .ok_or_else(|| SecretError::NotFound(reference.to_string()))
    }

    async fn put(
        &self,
        reference: &str,
        value: &SecretValue,
    ) -> std::result::Result<String, SecretError> {
        self.check_access(reference).await?;
        self.secrets
            .write()
            .await
            .insert(reference.to_string(), value.clone());
        Ok(self.handle_reference(reference))
    }
}

/// Workspace-level default: a store reference used when the scenario has no
/// binding of its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultStoreReference {
    pub reference: String,
    pub generate_if_missing: bool,
}

pub struct SecretLifecycleManager {
    store: Option<Arc<dyn SecretStore>>,
    default_reference: Option<DefaultStoreReference>,
    timeout: Duration,
}

impl SecretLifecycleManager {
    pub fn new() -> Self {
        Self {
            store: None,
            default_reference: None,
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn SecretStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_default_reference(mut self, default: DefaultStoreReference) -> Self {
        self.default_reference = Some(default);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve the admin credential for one deployment of `scenario`.
    pub async fn resolve(&self, scenario: &Scenario) -> Result<ResolvedSecret> {
        let wrap = |source: SecretError| CoreError::SecretResolution {
            scenario: scenario.name.clone(),
            source,
        };

        match &scenario.credential {
            Some(CredentialBinding::Environment { variable }) => {
                self.from_environment(variable).map_err(wrap)
            }
            // A scenario-level reference never generates on its own.
            Some(CredentialBinding::Store { reference }) => {
                self.from_store(reference, false).await.map_err(wrap)
            }
            None => match &self.default_reference {
                Some(default) => self
                    .from_store(&default.reference, default.generate_if_missing)
                    .await
                    .map_err(wrap),
                None => {
                    debug!(scenario = %scenario.name, "Generating admin credential");
                    Ok(generated())
                }
            },
        }
    }

    fn from_environment(&self, variable: &str) -> std::result::Result<ResolvedSecret, SecretError> {
        let raw = std::env::var(variable)
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| SecretError::MissingEnvironment(variable.to_string()))?;
        check_policy(&raw)?;
        debug!(variable = %variable, "Using admin credential from environment");
        Ok(ResolvedSecret {
            value: SecretValue::new(raw),
            handle: SecretHandle {
                mode: SecretMode::Supplied,
                reference: format!("env:{}", variable),
            },
            location: None,
        })
    }

    async fn from_store(
        &self,
        reference: &str,
        generate_if_missing: bool,
    ) -> std::result::Result<ResolvedSecret, SecretError> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| SecretError::NoStore(reference.to_string()))?;

        let (value, handle_reference) = match self.bounded(store.get(reference)).await {
            Ok(value) => {
                check_policy(value.expose())?;
                info!(store = %store.name(), reference = %reference, "Fetched admin credential");
                (value, store.handle_reference(reference))
            }
            Err(SecretError::NotFound(_)) if generate_if_missing => {
                warn!(
                    store = %store.name(),
                    reference = %reference,
                    "Secret not found, generating and storing a new one"
                );
                let value = generate_password();
                let stored = self.bounded(store.put(reference, &value)).await?;
                (value, stored)
            }
            Err(e) => return Err(e),
        };

        Ok(ResolvedSecret {
            value,
            handle: SecretHandle {
                mode: SecretMode::StoreBacked,
                reference: handle_reference,
            },
            location: Some(store.location(reference)),
        })
    }

    async fn bounded<T>(
        &self,
        call: impl std::future::Future<Output = std::result::Result<T, SecretError>>,
    ) -> std::result::Result<T, SecretError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or_else(|_| Err(SecretError::Timeout(self.timeout.as_secs())))
    }
}

impl Default for SecretLifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

fn generated() -> ResolvedSecret {
    ResolvedSecret {
        value: generate_password(),
        handle: SecretHandle {
            mode: SecretMode::Generated,
            reference: format!("generated:{}", uuid::Uuid::new_v4()),
        },
        location: None,
    }
}

/// 24 random characters containing every character class.
pub fn generate_password() -> SecretValue {
    let mut rng = rand::thread_rng();
    let classes = [UPPER, LOWER, DIGITS, SYMBOLS];
    let all: Vec<u8> = classes.concat();

    let mut chars: Vec<u8> = classes
        .iter()
        .map(|class| class[rng.gen_range(0..class.len())])
        .collect();
    while chars.len() < GENERATED_LENGTH {
        chars.push(all[rng.gen_range(0..all.len())]);
    }
    chars.shuffle(&mut rng);

    SecretValue::new(String::from_utf8_lossy(&chars).into_owned())
}

fn character_classes(value: &str) -> usize {
    let upper = value.chars().any(|c| c.is_ascii_uppercase());
    let lower = value.chars().any(|c| c.is_ascii_lowercase());
    let digit = value.chars().any(|c| c.is_ascii_digit());
    let other = value.chars().any(|c| !c.is_ascii_alphanumeric());
    [upper, lower, digit, other].iter().filter(|b| **b).count()
}

/// Length 12..=72 with at least three character classes.
pub fn check_policy(value: &str) -> std::result::Result<(), SecretError> {
    let len = value.chars().count();
    if !(MIN_SUPPLIED_LENGTH..=MAX_SUPPLIED_LENGTH).contains(&len) {
        return Err(SecretError::Policy(format!(
            "length must be between {} and {} characters, got {}",
            MIN_SUPPLIED_LENGTH, MAX_SUPPLIED_LENGTH, len
        )));
    }
    let classes = character_classes(value);
    if classes < 3 {
        return Err(SecretError::Policy(format!(
            "at least 3 of upper, lower, digit and symbol characters are required, got {}",
            classes
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ScenarioRegistry;
    use proptest::prelude::*;
    use serial_test::serial;

    const ENV_PASSWORD: &str = "Supplied-Passw0rd!";

    fn scenario(credential: &str) -> Scenario {
        let yaml = format!(
            r#"
scenarios:
  - name: standalone
    edition: enterprise-standalone
    node_count: 1
    version: "5"
    sizing: {{ vm_size: Standard_E4s_v5, disk_size_gb: 32 }}
    {credential}
"#
        );
        let registry = ScenarioRegistry::from_yaml_str(&yaml).unwrap();
        registry.get("standalone").unwrap().clone()
    }

    #[test]
    fn test_secret_value_never_formats_raw() {
        let value = SecretValue::new("hunter2-Hunter2");
        assert_eq!(format!("{}", value), REDACTED);
        assert_eq!(format!("{:?}", value), REDACTED);
        assert_eq!(
            value.scrub("login failed for hunter2-Hunter2"),
            "login failed for [REDACTED]"
        );
    }

    #[test]
    fn test_policy() {
        assert!(check_policy("short1A!").is_err());
        assert!(check_policy("alllowercaseletters").is_err());
        assert!(check_policy("Lowercase-and-Upper").is_ok());
        assert!(check_policy(&"aA1!".repeat(19)).is_err());
    }

    #[tokio::test]
    async fn test_generated_when_nothing_configured() {
        let manager = SecretLifecycleManager::new();
        let a = manager.resolve(&scenario("")).await.unwrap();
        let b = manager.resolve(&scenario("")).await.unwrap();
        assert_eq!(a.handle.mode, SecretMode::Generated);
        assert!(a.handle.reference.starts_with("generated:"));
        assert_ne!(a.value.expose(), b.value.expose());
        assert_eq!(a.value.expose().len(), GENERATED_LENGTH);
    }

    #[tokio::test]
    #[serial]
    async fn test_environment_binding_takes_precedence() {
        let store = Arc::new(MemorySecretStore::new());
        let manager = SecretLifecycleManager::new()
            .with_store(store)
            .with_default_reference(DefaultStoreReference {
                reference: "neo4j-admin".into(),
                generate_if_missing: true,
            });
        let s = scenario("credential: { source: environment, variable: NEODEPLOY_TEST_PW }");

        let resolved = temp_env::async_with_vars(
            [("NEODEPLOY_TEST_PW", Some(ENV_PASSWORD))],
            manager.resolve(&s),
        )
        .await
        .unwrap();
        assert_eq!(resolved.handle.mode, SecretMode::Supplied);
        assert_eq!(resolved.handle.reference, "env:NEODEPLOY_TEST_PW");
        assert_eq!(resolved.value.expose(), ENV_PASSWORD);
    }

    #[tokio::test]
    #[serial]
    async fn test_missing_environment_variable_fails() {
        let manager = SecretLifecycleManager::new();
        let s = scenario("credential: { source: environment, variable: NEODEPLOY_TEST_PW }");
        let err = temp_env::async_with_vars(
            [("NEODEPLOY_TEST_PW", None::<&str>)],
            manager.resolve(&s),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            CoreError::SecretResolution {
                source: SecretError::MissingEnvironment(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_store_reference_is_stable() {
        let store = Arc::new(MemorySecretStore::new());
        store.insert("team-admin", "Stored-Passw0rd-1").await;
        let manager = SecretLifecycleManager::new().with_store(store);
        let s = scenario("credential: { source: store, reference: team-admin }");

        let a = manager.resolve(&s).await.unwrap();
        let b = manager.resolve(&s).await.unwrap();
        assert_eq!(a.handle.mode, SecretMode::StoreBacked);
        assert_eq!(a.handle.reference, "memory://team-admin");
        assert_eq!(a.value.expose(), b.value.expose());
        assert_eq!(a.location.unwrap().secret_name, "team-admin");
    }

    #[tokio::test]
    async fn test_default_reference_generates_and_stores_when_missing() {
        let store = Arc::new(MemorySecretStore::new());
        let manager = SecretLifecycleManager::new()
            .with_store(store.clone())
            .with_default_reference(DefaultStoreReference {
                reference: "neo4j-admin".into(),
                generate_if_missing: true,
            });

        let first = manager.resolve(&scenario("")).await.unwrap();
        assert!(store.contains("neo4j-admin").await);
        let second = manager.resolve(&scenario("")).await.unwrap();
        assert_eq!(first.value.expose(), second.value.expose());
    }

    #[tokio::test]
    async fn test_scenario_store_reference_does_not_generate() {
        let manager =
            SecretLifecycleManager::new().with_store(Arc::new(MemorySecretStore::new()));
        let s = scenario("credential: { source: store, reference: missing }");
        let err = manager.resolve(&s).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::SecretResolution {
                source: SecretError::NotFound(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_forbidden_is_distinguished() {
        let store = Arc::new(MemorySecretStore::new());
        store.forbid("locked").await;
        let manager = SecretLifecycleManager::new().with_store(store);
        let s = scenario("credential: { source: store, reference: locked }");
        let err = manager.resolve(&s).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::SecretResolution {
                source: SecretError::Forbidden(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_store_reference_without_store() {
        let manager = SecretLifecycleManager::new();
        let s = scenario("credential: { source: store, reference: anything }");
        let err = manager.resolve(&s).await.unwrap_err();
        assert!(err.to_string().contains("no secret store configured"));
    }

    struct StalledStore;

    #[async_trait]
    impl SecretStore for StalledStore {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn get(&self, _reference: &str) -> std::result::Result<SecretValue, SecretError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(SecretError::Unavailable("never".into()))
        }

        async fn put(
            &self,
            reference: &str,
            _value: &SecretValue,
        ) -> std::result::Result<String, SecretError> {
            Ok(reference.to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_calls_are_bounded() {
        let manager = SecretLifecycleManager::new().with_store(Arc::new(StalledStore));
        let s = scenario("credential: { source: store, reference: slow }");
        let err = manager.resolve(&s).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::SecretResolution {
                source: SecretError::Timeout(10),
                ..
            }
        ));
    }

    /// Records a version with every write, like a vault does
    #[derive(Default)]
    struct VersionedStore {
        secrets: RwLock<HashMap<String, SecretValue>>,
    }

    #[async_trait]
    impl SecretStore for VersionedStore {
        fn name(&self) -> &str {
            "versioned"
        }

        async fn get(&self, reference: &str) -> std::result::Result<SecretValue, SecretError> {
            self.secrets
                .read()
                .await
                .get(reference)
                .cloned()
                .ok_or_else(|| SecretError::NotFound(reference.to_string()))
        }

        async fn put(
            &self,
            reference: &str,
            value: &SecretValue,
        ) -> std::result::Result<String, SecretError> {
            self.secrets
                .write()
                .await
                .insert(reference.to_string(), value.clone());
            Ok(format!("versioned://{}/v7", reference))
        }
    }

    #[tokio::test]
    async fn test_generated_secret_keeps_stored_reference() {
        let manager = SecretLifecycleManager::new()
            .with_store(Arc::new(VersionedStore::default()))
            .with_default_reference(DefaultStoreReference {
                reference: "neo4j-admin".into(),
                generate_if_missing: true,
            });

        let generated = manager.resolve(&scenario("")).await.unwrap();
        assert_eq!(generated.handle.mode, SecretMode::StoreBacked);
        assert_eq!(generated.handle.reference, "versioned://neo4j-admin/v7");

        // later reads go through the plain handle reference
        let fetched = manager.resolve(&scenario("")).await.unwrap();
        assert_eq!(fetched.handle.reference, "versioned://neo4j-admin");
        assert_eq!(fetched.value.expose(), generated.value.expose());
    }

    proptest! {
        #[test]
        fn generated_passwords_meet_policy(_seed in 0u32..64) {
            let value = generate_password();
            prop_assert_eq!(value.expose().len(), GENERATED_LENGTH);
            prop_assert_eq!(character_classes(value.expose()), 4);
            prop_assert!(check_policy(value.expose()).is_ok());
        }
    }
}
