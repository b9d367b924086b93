use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CiGraphError {
    #[error("Failed to parse CI configuration {path}: {reason}")]
    ConfigParse { path: PathBuf, reason: String },

    #[error("Failed to include {path}: {reason}")]
    Include { path: String, reason: String },

    #[error("Unresolved !reference [{}]", .path.join(", "))]
    UnresolvedReference { path: Vec<String> },

    #[error("Invalid CI configuration: {0}")]
    InvalidConfig(String),

    #[error("Pipeline {0} has no job execution records")]
    EmptyPipeline(String),

    #[error("Package listing failed for module {module}: {reason}")]
    SubprocessFailure { module: String, reason: String },

    #[error("No packages matched in module {module}")]
    NoPackagesMatched { module: String },

    #[error("No go.mod found for modified file {0}")]
    MissingModule(PathBuf),

    #[error("No file matches trigger glob '{0}', was the target renamed?")]
    UnmatchedTriggerGlob(String),

    #[error("GitLab API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("GitLab API error (status {status}) after {retries} retries")]
    ApiErrorAfterRetries { status: u16, retries: u32 },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CiGraphError>;
