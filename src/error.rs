use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HarvestError {
    #[error("input file not found: {0}")]
    MissingInput(PathBuf),

    #[error("failed to read input file at {0}")]
    InputRead(PathBuf),

    #[error("line {line} is not an app id: {value:?}")]
    InvalidIdentifier { line: usize, value: String },

    #[error("not a positive app id: {0:?}")]
    InvalidAppId(String),

    #[error("invalid country code: {0}")]
    InvalidCountry(String),

    #[error("invalid locale: {0}")]
    InvalidLocale(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("could not extract bearer token: {0}")]
    #[diagnostic(help("the storefront page layout may have changed; check the bootstrap app id"))]
    AuthExtraction(String),

    #[error("request failed: {0}")]
    Http(String),

    #[error("upstream returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unexpected response payload: {0}")]
    Payload(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("fetch engine is no longer accepting tasks")]
    EngineClosed,
}

impl HarvestError {
    pub fn status(&self) -> Option<u16> {
        match self {
            HarvestError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
