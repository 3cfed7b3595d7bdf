//! # Error Taxonomy
//!
//! Errors are split by the stage that produces them:
//!
//! * [`EnumerationError`] - raised while turning user input into targets.
//!   Fatal to the single source that produced it, never to the whole run.
//! * [`ProbeError`] - attached to a [`ProbeResult`](crate::scan::ProbeResult).
//!   Always recovered into data.
//! * [`AuthError`] - attached to an [`AuthOutcome`](crate::scan::AuthOutcome).
//!   Always recovered into data.
//! * [`ConfigError`] - rejected scan configuration.

use std::io;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnumerationError {
    #[error("invalid CIDR block '{block}': {reason}")]
    InvalidCidr { block: String, reason: String },

    #[error("invalid IP address '{input}'")]
    InvalidAddress { input: String },

    #[error("unable to read target source '{origin}': {reason}")]
    SourceUnreadable { origin: String, reason: String },
}

impl EnumerationError {
    pub fn invalid_cidr(block: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidCidr {
            block: block.into(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_address(input: impl Into<String>) -> Self {
        Self::InvalidAddress {
            input: input.into(),
        }
    }

    pub fn unreadable(origin: impl Into<String>, reason: impl ToString) -> Self {
        Self::SourceUnreadable {
            origin: origin.into(),
            reason: reason.to_string(),
        }
    }
}

/// Why a probe reported the port as not open.
///
/// A refused connection and a filtered one both end up as
/// [`ProbeError::ConnectFailed`]; the `kind` is kept for diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("connect failed ({kind:?}): {message}")]
    ConnectFailed { kind: io::ErrorKind, message: String },

    #[error("probe did not finish within {}ms", after.as_millis())]
    ProbeTimedOut { after: Duration },

    #[error("probe task aborted: {0}")]
    Aborted(String),
}

impl From<io::Error> for ProbeError {
    fn from(err: io::Error) -> Self {
        Self::ConnectFailed {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("authentication rejected: {0}")]
    AuthRejected(String),
}

impl AuthError {
    pub fn connect_failed(reason: impl ToString) -> Self {
        Self::ConnectFailed(reason.to_string())
    }

    pub fn rejected(reason: impl ToString) -> Self {
        Self::AuthRejected(reason.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("at least one port must be scanned")]
    NoPorts,

    #[error("port 0 is not a valid scan target")]
    ZeroPort,

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("max concurrent probes must be at least 1")]
    ZeroConcurrency,
}
