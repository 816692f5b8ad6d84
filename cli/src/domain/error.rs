//! Typed domain error enums.
//!
//! This module has zero imports from `crate::infra`, `crate::server`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or `std::net`.

use thiserror::Error;

/// Error classes exposed to callers of the workspace lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad user input; never retried.
    Validation,
    /// The workspace already exists.
    Conflict,
    /// The workspace or its creation log is absent.
    NotFound,
    /// The hypervisor call or its output parsing failed.
    Upstream,
    /// Local filesystem failure.
    Io,
}

/// Errors related to workspace lifecycle and identity.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("workspace name must not be empty")]
    EmptyName,

    #[error(
        "invalid workspace name '{0}': must start with a letter and contain only letters, digits and underscores"
    )]
    InvalidName(String),

    #[error("invalid workspace password: only letters, digits and underscores are allowed")]
    InvalidPassword,

    #[error("invalid {field} value '{value}': only letters, digits and dots are allowed")]
    InvalidResource { field: &'static str, value: String },

    #[error("workspace '{0}' already exists")]
    AlreadyExists(String),

    #[error("workspace '{0}' not found")]
    NotFound(String),

    #[error("creation log for workspace '{0}' not found")]
    LogNotFound(String),

    #[error("hypervisor error: {0}")]
    Upstream(String),

    #[error("filesystem error: {0}")]
    Io(String),
}

impl WorkspaceError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyName
            | Self::InvalidName(_)
            | Self::InvalidPassword
            | Self::InvalidResource { .. } => ErrorKind::Validation,
            Self::AlreadyExists(_) => ErrorKind::Conflict,
            Self::NotFound(_) | Self::LogNotFound(_) => ErrorKind::NotFound,
            Self::Upstream(_) => ErrorKind::Upstream,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Wrap a port failure as a hypervisor error, keeping the context chain.
    pub(crate) fn upstream(err: &anyhow::Error) -> Self {
        Self::Upstream(format!("{err:#}"))
    }

    /// Wrap a port failure as a filesystem error, keeping the context chain.
    pub(crate) fn io(err: &anyhow::Error) -> Self {
        Self::Io(format!("{err:#}"))
    }
}
