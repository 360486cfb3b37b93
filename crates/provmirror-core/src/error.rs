// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for provmirror-core.
//!
//! Provides a unified error type for event processing. Recoverable conditions
//! (claim not found, optional field absent) are handled inline with a log line
//! and never surface here; everything below is fatal for the event being
//! processed and relies on redelivery for eventual consistency.

use std::fmt;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur while processing a lifecycle event.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CoreError {
    /// The event did not carry a provisioning identifier.
    MissingUuid {
        /// Resource name the event was delivered for, if known.
        resource: String,
    },

    /// A governor string did not have the expected dotted segments.
    ///
    /// The governor yields `account`, `environment`, and `class_name`, which
    /// group records downstream; deriving them from a malformed governor
    /// would corrupt those groupings, so this is fatal for the event.
    MalformedGovernor {
        /// The offending governor string.
        governor: String,
    },

    /// An outbound fetch (job-execution API, directory, CRM) failed.
    UpstreamFetch {
        /// Which upstream system failed.
        source: String,
        /// The reason for failure.
        reason: String,
    },

    /// Input validation failed.
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// Database operation failed.
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingUuid { .. } => "MISSING_UUID",
            Self::MalformedGovernor { .. } => "MALFORMED_GOVERNOR",
            Self::UpstreamFetch { .. } => "UPSTREAM_FETCH_FAILED",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingUuid { resource } => {
                write!(f, "Event for '{}' carries no provision UUID", resource)
            }
            Self::MalformedGovernor { governor } => {
                write!(
                    f,
                    "Governor '{}' does not have the expected dotted segments",
                    governor
                )
            }
            Self::UpstreamFetch { source, reason } => {
                write!(f, "Upstream fetch from {} failed: {}", source, reason)
            }
            Self::ValidationError { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::DatabaseError { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::DatabaseError {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}
