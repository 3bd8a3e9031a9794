use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "no neodeploy workspace found from {start}. Looked for:\n\
        - the NEODEPLOY_HOME environment variable\n\
        - a .neodeploy/ directory in the current or any parent directory\n\
        - the user configuration directory (neodeploy/)\n\
        Run `neodeploy setup` to create one"
    )]
    WorkspaceNotFound { start: PathBuf },

    #[error("workspace already initialized at {0} (use --force to overwrite)")]
    AlreadyInitialized(PathBuf),

    #[error("settings file {path} is invalid: {source}")]
    Settings {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid settings: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
