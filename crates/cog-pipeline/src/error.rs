//! Error types for the conversion pipeline.

use thiserror::Error;

/// Errors that can occur while converting or staging datasets.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("filename {filename:?} does not match template {template:?}")]
    TemplateMismatch { template: String, filename: String },

    #[error("invalid time mode: {0}")]
    InvalidTimeMode(String),

    #[error("command `{command}` failed with status {status}: {stderr}")]
    ExternalTool {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("filesystem operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to process metadata document: {0}")]
    Metadata(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
