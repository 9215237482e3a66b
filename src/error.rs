//! Unified error types for the Hydropod firmware core.
//!
//! Follows embedded practice: a small typed enum per concern that every
//! subsystem can convert into, keeping the orchestrator loop's error
//! handling uniform. Failures are always surfaced as values; nothing in
//! the core panics across the scheduler boundary.

use core::fmt;

// ---------------------------------------------------------------------------
// Component lifecycle errors
// ---------------------------------------------------------------------------

/// Failures raised while initializing or reconfiguring a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentError {
    /// The component returned an empty default schema (programming error).
    EmptySchema,
    /// A configuration blob could not be applied.
    Config(String),
    /// Hardware/resource acquisition failed.
    Hardware(&'static str),
    /// The persistent store rejected an operation.
    Storage(StorageError),
}

impl fmt::Display for ComponentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptySchema => write!(f, "default schema is empty"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Hardware(msg) => write!(f, "hardware: {msg}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
        }
    }
}

impl From<StorageError> for ComponentError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

// ---------------------------------------------------------------------------
// Persistent-store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested blob does not exist.
    NotFound,
    /// Blob exceeds the store's size bound.
    TooLarge,
    /// Stored blob failed JSON (de)serialization.
    Corrupted,
    /// Generic I/O error from the backing filesystem.
    Io,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::TooLarge => write!(f, "blob too large"),
            Self::Corrupted => write!(f, "blob corrupted"),
            Self::Io => write!(f, "I/O error"),
        }
    }
}

// ---------------------------------------------------------------------------
// Remote-fetch errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpError {
    /// Could not reach the host.
    Connect,
    /// Request exceeded its timeout.
    Timeout,
    /// Server answered with a non-2xx status.
    Status(u16),
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => write!(f, "connect failed"),
            Self::Timeout => write!(f, "request timed out"),
            Self::Status(code) => write!(f, "HTTP status {code}"),
        }
    }
}

/// Crate-wide `Result` alias for component-facing operations.
pub type Result<T> = core::result::Result<T, ComponentError>;
