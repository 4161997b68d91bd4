//! Error types for gantry-control.

use gantry_command::{Environment, ParseError};

use crate::types::{ApprovalId, ApprovalState};

/// Result type alias using [`ControlError`].
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors that can occur in the orchestration engine.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// The chat line did not match the command grammar.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// An approval is already pending for this app/environment.
    #[error("an approval for {app}/{environment} is already pending ({pending})")]
    Conflict {
        /// Application name.
        app: String,
        /// Gated environment.
        environment: Environment,
        /// The request that holds the slot.
        pending: ApprovalId,
    },

    /// A callback or decision referenced something the engine never tracked.
    #[error("not found: {0}")]
    NotFound(String),

    /// The approval was already resolved, possibly by expiry.
    #[error("approval for {app}/{environment} is already {state}")]
    AlreadyResolved {
        /// Application name.
        app: String,
        /// Gated environment.
        environment: Environment,
        /// Terminal state the request reached first.
        state: ApprovalState,
    },

    /// An external build or release call failed.
    #[error("{system} error: {message}")]
    Client {
        /// External system that failed.
        system: &'static str,
        /// Error detail.
        message: String,
    },

    /// No earlier successful deployment exists to roll back to.
    #[error("no previous successful deployment of {app} to {environment} to roll back to")]
    NoRollbackTarget {
        /// Application name.
        app: String,
        /// Environment that was asked to roll back.
        environment: Environment,
    },

    /// The audit record could not be written. The action is not complete.
    #[error("audit log error: {0}")]
    Audit(String),

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Create a client error for the named external system.
    #[must_use]
    pub fn client(system: &'static str, message: impl Into<String>) -> Self {
        Self::Client {
            system,
            message: message.into(),
        }
    }

    /// Create a not-found error.
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create an audit error.
    #[must_use]
    pub fn audit(msg: impl Into<String>) -> Self {
        Self::Audit(msg.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Short machine-readable name of the error kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Parse(_) => "parse",
            Self::Conflict { .. } => "conflict",
            Self::NotFound(_) => "not_found",
            Self::AlreadyResolved { .. } => "already_resolved",
            Self::Client { .. } | Self::Http(_) => "client",
            Self::NoRollbackTarget { .. } => "no_rollback_target",
            Self::Audit(_) => "audit",
            Self::Database(_) => "database",
            Self::Config(_) => "config",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether the error must be escalated rather than reported to the actor.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Audit(_))
    }
}
