//! Azure boundary error types

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AzureError {
    #[error("az not found. Please install the Azure CLI: https://aka.ms/azure-cli")]
    CliNotFound,

    #[error("az {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("az {command} did not finish within {secs}s")]
    Timeout { command: String, secs: u64 },

    #[error("Template not found: {0}")]
    TemplateNotFound(PathBuf),

    #[error("Unexpected az output: {0}")]
    UnexpectedOutput(String),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AzureError>;
