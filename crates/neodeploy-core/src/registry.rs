//! Scenario registry
//!
//! Loads `scenarios.yaml`, validates every entry and rejects the whole file
//! with the full list of problems if anything is wrong.

use crate::error::{CoreError, Result, ScenarioIssue};
use crate::model::{Scenario, ScenarioSpec};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, instrument};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScenarioFile {
    #[serde(default)]
    scenarios: Vec<ScenarioSpec>,
}

#[derive(Debug, Clone, Default)]
pub struct ScenarioRegistry {
    scenarios: Vec<Scenario>,
}

impl ScenarioRegistry {
    #[instrument(skip(path), fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::ScenarioFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let registry = Self::from_yaml_str(&content)?;
        info!(scenarios = registry.len(), "Scenarios loaded");
        Ok(registry)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let file: ScenarioFile = serde_yaml::from_str(content)?;

        let mut issues: Vec<ScenarioIssue> = Vec::new();
        let mut seen = HashSet::new();
        let mut scenarios = Vec::with_capacity(file.scenarios.len());

        for spec in file.scenarios {
            if !seen.insert(spec.name.clone()) {
                issues.push(ScenarioIssue::new(
                    spec.name.clone(),
                    "duplicate scenario name",
                ));
                continue;
            }
            match spec.validate() {
                Ok(scenario) => {
                    debug!(scenario = %scenario.name, edition = %scenario.edition, "Scenario valid");
                    scenarios.push(scenario);
                }
                Err(mut found) => issues.append(&mut found),
            }
        }

        if !issues.is_empty() {
            return Err(CoreError::ScenarioValidation(issues));
        }
        Ok(Self { scenarios })
    }

    pub fn get(&self, name: &str) -> Result<&Scenario> {
        self.scenarios
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| CoreError::ScenarioNotFound(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Scenario> {
        self.scenarios.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.scenarios.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    /// Pick scenarios for a command: one by name, or all of them.
    ///
    /// With neither a name nor `all`, a registry holding exactly one scenario
    /// yields that scenario; anything else is ambiguous.
    pub fn select(&self, name: Option<&str>, all: bool) -> Result<Vec<&Scenario>> {
        match (name, all) {
            (Some(name), _) => Ok(vec![self.get(name)?]),
            (None, true) => Ok(self.scenarios.iter().collect()),
            (None, false) if self.scenarios.len() == 1 => Ok(self.scenarios.iter().collect()),
            (None, false) => Err(CoreError::ScenarioNotFound(format!(
                "no scenario selected; choose one of: {}",
                self.names().join(", ")
            ))),
        }
    }
}
