//! Error types for the psyche_core library.

use crate::AppointmentStatus;
use chrono::{DateTime, SecondsFormat, Utc};
use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for psyche_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input rejected before any mutation took place
    #[error("{0}")]
    Validation(String),

    /// The request clashes with the current state of the records
    #[error("{0}")]
    Conflict(String),

    /// Appointment state machine refused a transition
    #[error("appointment status cannot change from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    /// Missing or not owned by the caller. Both cases read the same.
    #[error("resource not found")]
    NotFound,

    /// A live cooldown blocks the operation
    #[error("blocked until {}", .until.to_rfc3339_opts(SecondsFormat::Secs, true))]
    RateLimited { until: DateTime<Utc> },

    /// Caller lacks the role the operation requires
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Record store failure
    #[error("Store error: {0}")]
    Store(String),
}
