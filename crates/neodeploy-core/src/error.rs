use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A single reason a scenario was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioIssue {
    pub scenario: String,
    pub reason: String,
}

impl ScenarioIssue {
    pub fn new(scenario: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ScenarioIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.scenario, self.reason)
    }
}

/// Renders the issue list one per line for error messages.
fn render_issues(issues: &[ScenarioIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("  - {}", i))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("scenario file not readable: {path}\nreason: {message}")]
    ScenarioFile { path: PathBuf, message: String },

    #[error("scenario file is not valid YAML for the scenario schema: {0}")]
    ScenarioSchema(#[from] serde_yaml::Error),

    #[error("rejected {} scenario issue(s):\n{}", .0.len(), render_issues(.0))]
    ScenarioValidation(Vec<ScenarioIssue>),

    #[error("scenario not found: {0}")]
    ScenarioNotFound(String),

    #[error("unsupported topology: {edition} with {node_count} node(s)")]
    UnsupportedTopology { edition: String, node_count: u8 },

    #[error("credential resolution failed for scenario '{scenario}': {source}")]
    SecretResolution {
        scenario: String,
        #[source]
        source: SecretError,
    },
}

impl CoreError {
    /// Whether the error means the scenario itself is invalid, as opposed to
    /// an execution-time failure.
    pub fn is_scenario_invalid(&self) -> bool {
        matches!(
            self,
            CoreError::ScenarioFile { .. }
                | CoreError::ScenarioSchema(_)
                | CoreError::ScenarioValidation(_)
                | CoreError::ScenarioNotFound(_)
                | CoreError::UnsupportedTopology { .. }
        )
    }
}

/// Secret store and credential policy errors.
///
/// None of the variants carry a secret value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecretError {
    #[error("secret not found: {0}")]
    NotFound(String),

    #[error("access to secret forbidden: {0}")]
    Forbidden(String),

    #[error("secret store unavailable: {0}")]
    Unavailable(String),

    #[error("secret store timed out after {0}s")]
    Timeout(u64),

    #[error("environment variable {0} is not set or empty")]
    MissingEnvironment(String),

    #[error("credential does not meet policy: {0}")]
    Policy(String),

    #[error("no secret store configured for reference {0}")]
    NoStore(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
