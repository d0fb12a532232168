use std::path::PathBuf;

use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

use crate::domain::Network;

#[derive(Debug, Error, Diagnostic)]
pub enum FluxError {
    #[error("invalid network: {0}")]
    InvalidNetwork(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("{network} metadata source unavailable: {reason}")]
    #[diagnostic(help("every configured network must load; the registry is never built partially"))]
    SourceUnavailable { network: Network, reason: String },

    #[error("failed to read catalog table {path}: {reason}")]
    CatalogRead { path: PathBuf, reason: String },

    #[error("no catalog match for site {0}")]
    NoMatch(String),

    #[error("no versioned catalog entry for site {0}")]
    NoVersion(String),

    #[error("catalog link does not follow the catalog path layout: {0}")]
    CatalogPath(String),

    #[error("no candidate download URL responded for {site} ({tried} tried)")]
    ProbesExhausted { site: String, tried: usize },

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("{url} returned status {status}")]
    HttpStatus { status: u16, url: String },

    #[error("transfer interrupted: {0}")]
    Transfer(String),

    #[error("NetCDF conversion failed: {0}")]
    Conversion(String),

    #[error("failed to write export {path}: {reason}")]
    Export { path: PathBuf, reason: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    Configuration,
    SourceUnavailable,
    ResolutionFailure,
    TransportFailure,
    MalformedInput,
    Filesystem,
}

impl FluxError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            FluxError::InvalidNetwork(_)
            | FluxError::ConfigRead(_)
            | FluxError::ConfigParse(_)
            | FluxError::InvalidConfig(_) => ErrorCategory::Configuration,
            FluxError::SourceUnavailable { .. } | FluxError::CatalogRead { .. } => {
                ErrorCategory::SourceUnavailable
            }
            FluxError::NoMatch(_)
            | FluxError::NoVersion(_)
            | FluxError::CatalogPath(_)
            | FluxError::ProbesExhausted { .. } => ErrorCategory::ResolutionFailure,
            FluxError::Http(_) | FluxError::HttpStatus { .. } | FluxError::Transfer(_) => {
                ErrorCategory::TransportFailure
            }
            FluxError::Conversion(_) => ErrorCategory::MalformedInput,
            FluxError::Export { .. } | FluxError::Filesystem(_) => ErrorCategory::Filesystem,
        }
    }

    /// Aborts the whole run rather than a single site.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Configuration | ErrorCategory::SourceUnavailable
        )
    }
}
