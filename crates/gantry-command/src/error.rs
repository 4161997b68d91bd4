//! Error types for command parsing.

use thiserror::Error;

use crate::command::Verb;

/// Reasons a chat line could not be turned into a [`Command`](crate::Command).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The first token is not a known verb.
    #[error("unknown command `{0}`, type `help` to see available commands")]
    UnknownVerb(String),

    /// A required positional argument was not supplied.
    #[error("missing argument <{name}>, usage: `{}`", verb.usage())]
    MissingArgument {
        /// Verb whose arguments were incomplete.
        verb: Verb,
        /// Name of the first missing argument.
        name: &'static str,
    },

    /// The environment token is not one of `qa`, `uat` or `prod`.
    #[error("invalid environment `{0}`, choose from: qa, uat, prod")]
    InvalidEnvironment(String),

    /// The build token is not a positive integer.
    #[error("invalid build number `{0}`")]
    InvalidBuildNumber(String),
}

impl ParseError {
    /// Short machine-readable name of the error kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UnknownVerb(_) => "unknown_verb",
            Self::MissingArgument { .. } => "missing_argument",
            Self::InvalidEnvironment(_) => "invalid_environment",
            Self::InvalidBuildNumber(_) => "invalid_build_number",
        }
    }
}
