//! # Error Types
//!
//! Custom error types for Yarbo Link using `thiserror`.

use std::time::Duration;

use thiserror::Error;

/// Main error type for Yarbo Link
#[derive(Debug, Error)]
pub enum YarboError {
    /// The telemetry source reported a connectivity failure
    #[error("Link error: {0}")]
    Link(String),

    /// The transport refused the controller acquisition
    #[error("Controller acquisition failed: {0}")]
    ControllerAcquisition(String),

    /// The controller acquisition did not complete in time
    #[error("Controller acquisition timed out after {0:?}")]
    ControllerTimeout(Duration),

    /// The transport rejected a command after the controller was acquired
    #[error("Command '{command}' failed: {reason}")]
    Command { command: String, reason: String },

    /// No `data_feedback` reply arrived for a request in time
    #[error("No feedback for '{command}' within {timeout:?}")]
    FeedbackTimeout { command: String, timeout: Duration },

    /// The log filter could not be swapped at runtime
    #[error("Logging error: {0}")]
    Logging(String),

    /// Generic transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// The gateway has been shut down and accepts no more commands
    #[error("Command gateway is closed")]
    GatewayClosed,

    /// The ingestion loop is already running for this coordinator
    #[error("Telemetry ingestion already running")]
    AlreadyRunning,

    /// The coordinator was shut down and cannot be started again
    #[error("Coordinator has been shut down")]
    ShutDown,

    /// A background task panicked or was aborted
    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for Yarbo Link
pub type Result<T> = std::result::Result<T, YarboError>;
