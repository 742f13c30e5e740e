//! Rendering errors

use std::time::Duration;

/// Rendering system errors
///
/// Every variant is fatal for the frame loop except where a caller chooses
/// otherwise. Contract violations never show up here; they panic.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// A device wait ran out of time
    ///
    /// Treated as a hung device; the loop terminates instead of retrying.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// The operation that was waiting
        operation: &'static str,
        /// The limit that expired
        timeout: Duration,
    },

    /// The device stopped responding
    #[error("Device lost")]
    DeviceLost,

    /// A per-frame buffer cannot hold the requested records
    #[error("{buffer} buffer overflow: {requested} records requested, capacity {capacity}")]
    CapacityExceeded {
        /// Which per-frame buffer overflowed
        buffer: &'static str,
        /// Records the frame needed
        requested: usize,
        /// Records the buffer holds
        capacity: usize,
    },

    /// Resource creation or management failed
    #[error("Resource creation failed: {0}")]
    ResourceCreationFailed(String),

    /// A call was made in a state that does not allow it
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// What was wrong
        reason: String,
    },

    /// Backend-specific error occurred
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result type for rendering operations
pub type RenderResult<T> = Result<T, RenderError>;

impl RenderError {
    /// Shorthand for [`RenderError::InvalidOperation`]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidOperation {
            reason: reason.into(),
        }
    }
}
