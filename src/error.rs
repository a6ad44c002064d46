//! Error kinds surfaced by the control plane.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Result alias used throughout the core.
pub type Result<T, E = TopologyError> = std::result::Result<T, E>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// A referenced id does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Duplicate link, kind clash, double association, or an operation that
    /// is invalid in the current run state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Malformed record or shaping options.
    #[error("invalid: {0}")]
    Validation(String),
    /// The emulation engine failed.
    #[error("engine error: {0}")]
    Engine(String),
    /// A bounded engine call did not finish in time.
    #[error("timed out: {0}")]
    Timeout(String),
}

impl TopologyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TopologyError::NotFound(_) => ErrorKind::NotFound,
            TopologyError::Conflict(_) => ErrorKind::Conflict,
            TopologyError::Validation(_) => ErrorKind::Validation,
            TopologyError::Engine(_) => ErrorKind::Engine,
            TopologyError::Timeout(_) => ErrorKind::Timeout,
        }
    }

    /// Wrap an engine failure, keeping the whole context chain.
    pub fn engine(what: &str, err: anyhow::Error) -> Self {
        TopologyError::Engine(format!("{what}: {err:#}"))
    }

    pub(crate) fn not_found(what: &str, id: &str) -> Self {
        TopologyError::NotFound(format!("{what} '{id}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Validation,
    Engine,
    Timeout,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Validation => "validation",
            ErrorKind::Engine => "engine",
            ErrorKind::Timeout => "timeout",
        };
        f.write_str(s)
    }
}
