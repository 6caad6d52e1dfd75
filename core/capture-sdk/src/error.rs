//! Error types for capture-sdk operations.
//!
//! Only lifecycle misuse and setup failures are returned to callers. Faults
//! inside a running worker reach listeners through `on_error_state` instead.

use std::path::PathBuf;

/// All errors a controller or config call can return.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle Errors
    // ─────────────────────────────────────────────────────────────────────
    /// The operation needs an attached session and there is none.
    #[error("Not connected to a capture session: {operation} requires an attached session")]
    NotConnected { operation: &'static str },

    #[error("Capture worker setup failed: {reason}")]
    SetupFailure { reason: String },

    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl CaptureError {
    pub fn is_not_connected(&self) -> bool {
        matches!(self, CaptureError::NotConnected { .. })
    }
}

/// Convenience type alias for Results using CaptureError.
pub type Result<T> = std::result::Result<T, CaptureError>;
