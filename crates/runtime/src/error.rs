//! Error types for the drover runtime.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the drover runtime.
///
/// Failures are always delivered through the same single-resolution slot
/// as success values. A failure for one caller never leaks into another
/// caller's pending operation, with the sole exception of
/// [`Error::ConnectionClosed`], which is global by nature.
#[derive(Debug, Error)]
pub enum Error {
    /// Driver reported a command failure. Recoverable; surfaced only to
    /// the caller that issued the command.
    #[error("{name}: {message}")]
    Protocol {
        /// Error type name reported by the driver (e.g. "TimeoutError")
        name: String,
        /// Human-readable message
        message: String,
        /// Driver-side stack trace, if supplied
        stack: Option<String>,
    },

    /// Transport ended. Terminal for the connection: every outstanding
    /// and every future command fails with this.
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// Target object (or an ancestor) was disposed before the operation
    /// could complete. Distinguishable from a timeout so that callers can
    /// tell "the page closed" from "nothing happened in time".
    #[error("Object disposed: {guid}")]
    ObjectDisposed {
        /// Guid of the disposed object
        guid: String,
    },

    /// Deadline elapsed with no match and no disposal.
    #[error("Timeout {duration_ms}ms exceeded while {message}")]
    Timeout {
        message: String,
        duration_ms: u64,
    },

    /// Internal protocol violation (unparseable or inconsistent message).
    /// Logged and dropped unless it orphans an identifiable pending
    /// operation.
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Byte-level transport failure (pipe read/write).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Automation driver executable could not be located.
    #[error(
        "Automation driver not found. Set DROVER_DRIVER_PATH or install the driver package with npm."
    )]
    DriverNotFound,

    /// Driver subprocess failed to start.
    #[error("Failed to launch driver: {0}")]
    LaunchFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns true if this is a timeout, either local or driver-reported.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout { .. } => true,
            Error::Protocol { name, .. } => name == "TimeoutError",
            _ => false,
        }
    }

    /// Returns true if the target object was disposed.
    pub fn is_object_disposed(&self) -> bool {
        matches!(self, Error::ObjectDisposed { .. })
    }

    /// Returns true if the connection is gone for good.
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Error::ConnectionClosed(_))
    }

    /// Returns the driver-side error name, if this is a driver-reported failure.
    pub fn protocol_name(&self) -> Option<&str> {
        match self {
            Error::Protocol { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Returns the driver-side stack trace, if one was supplied.
    pub fn stack_trace(&self) -> Option<&str> {
        match self {
            Error::Protocol { stack, .. } => stack.as_deref(),
            _ => None,
        }
    }
}
