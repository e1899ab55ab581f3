use std::fmt;

use thiserror::Error;
use validator::ValidationErrors;

/// Classification of a failed round trip to the bit store.
///
/// Decided by the store implementation at the point where it talks to the
/// client library, so callers never need to inspect error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// Connection refused, reset or not yet established.
    Connection,
    /// The round trip did not finish within its deadline.
    Timeout,
    /// The caller's cancellation signal fired first.
    Cancelled,
    /// The store answered, but with an error or an unexpected reply.
    Command,
}

impl StoreErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreErrorKind::Connection => "connection",
            StoreErrorKind::Timeout => "timeout",
            StoreErrorKind::Cancelled => "cancelled",
            StoreErrorKind::Command => "command",
        }
    }
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Connection, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Timeout, message)
    }

    pub fn cancelled() -> Self {
        Self::new(StoreErrorKind::Cancelled, "round trip cancelled by caller")
    }

    pub fn command(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Command, message)
    }
}

/// Which step of a membership check was talking to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorePhase {
    Read,
    Write,
    Expire,
    Close,
}

impl StorePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorePhase::Read => "read",
            StorePhase::Write => "write",
            StorePhase::Expire => "expire",
            StorePhase::Close => "close",
        }
    }
}

impl fmt::Display for StorePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum DedupError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Failed to load settings: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("Bit store unavailable during {phase} of {key}: {source}")]
    StoreUnavailable {
        key: String,
        phase: StorePhase,
        #[source]
        source: StoreError,
    },

    #[error("Circuit breaker open, bit store calls rejected")]
    BreakerOpen,

    #[error("Dedup filter already closed")]
    Closed,
}

impl DedupError {
    pub fn store(key: impl Into<String>, phase: StorePhase, source: StoreError) -> Self {
        DedupError::StoreUnavailable { key: key.into(), phase, source }
    }

    /// `true` for errors an upstream caller may retry later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DedupError::StoreUnavailable { .. } | DedupError::BreakerOpen)
    }
}
