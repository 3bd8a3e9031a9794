pub mod error;
pub mod settings;

pub use error::*;
pub use settings::{KeyVaultSettings, RetrySettings, Settings, TimeoutSettings};

use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the workspace directory.
pub const WORKSPACE_DIR: &str = ".neodeploy";
/// Points directly at a workspace directory, bypassing discovery.
pub const HOME_ENV: &str = "NEODEPLOY_HOME";

const SETTINGS_FILE: &str = "settings.yaml";
const SCENARIOS_FILE: &str = "scenarios.yaml";

/// A `.neodeploy/` directory and the files it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Find the workspace for the current process.
    ///
    /// 1. `NEODEPLOY_HOME`
    /// 2. `.neodeploy/` in the current directory or any parent
    /// 3. `<user config dir>/neodeploy/`
    pub fn discover() -> Result<Self> {
        let current_dir = std::env::current_dir()?;
        Self::discover_from(&current_dir)
    }

    pub fn discover_from(start: &Path) -> Result<Self> {
        if let Ok(home) = std::env::var(HOME_ENV) {
            let dir = PathBuf::from(home);
            if dir.is_dir() {
                debug!(dir = %dir.display(), "Workspace from {}", HOME_ENV);
                return Ok(Self::at(dir));
            }
        }

        for ancestor in start.ancestors() {
            let candidate = ancestor.join(WORKSPACE_DIR);
            if candidate.join(SETTINGS_FILE).is_file() {
                debug!(dir = %candidate.display(), "Workspace discovered");
                return Ok(Self::at(candidate));
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let global = config_dir.join("neodeploy");
            if global.join(SETTINGS_FILE).is_file() {
                debug!(dir = %global.display(), "Using user-level workspace");
                return Ok(Self::at(global));
            }
        }

        Err(ConfigError::WorkspaceNotFound {
            start: start.to_path_buf(),
        })
    }

    /// Create `<parent>/.neodeploy/` with the given settings and scenarios.
    pub fn init(
        parent: &Path,
        settings: &Settings,
        scenarios_yaml: &str,
        force: bool,
    ) -> Result<Self> {
        let workspace = Self::at(parent.join(WORKSPACE_DIR));
        if workspace.settings_path().exists() && !force {
            return Err(ConfigError::AlreadyInitialized(workspace.dir.clone()));
        }
        std::fs::create_dir_all(workspace.deployments_dir())?;
        settings.save(&workspace.settings_path())?;
        if !workspace.scenarios_path().exists() || force {
            std::fs::write(workspace.scenarios_path(), scenarios_yaml)?;
        }
        Ok(workspace)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Directory containing `.neodeploy/`.
    pub fn root(&self) -> &Path {
        self.dir.parent().unwrap_or(&self.dir)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.dir.join(SETTINGS_FILE)
    }

    pub fn scenarios_path(&self) -> PathBuf {
        self.dir.join(SCENARIOS_FILE)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.dir.join("state")
    }

    pub fn deployments_dir(&self) -> PathBuf {
        self.state_dir().join("deployments")
    }

    pub fn load_settings(&self) -> Result<Settings> {
        Settings::load(&self.settings_path())
    }

    /// Template directory from the settings, resolved against the root.
    pub fn template_dir(&self, settings: &Settings) -> PathBuf {
        if settings.template_dir.is_absolute() {
            settings.template_dir.clone()
        } else {
            self.root().join(&settings.template_dir)
        }
    }
}
