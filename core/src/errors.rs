//! Roster error types
//!
//! Every failure the store, service or transport can report is one
//! `RosterError` variant. Each variant maps to an `ErrorCategory` whose code
//! is used in structured logs and on the wire.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ReorderFailure;

/// Error category for structured logging and wire mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// Malformed input: bad role string, empty label, bad area code
    Validation,
    /// Referenced id does not exist
    NotFound,
    /// Uniqueness violation: duplicate contact on page, slug collision
    Conflict,
    /// Stored role value outside the canonical set (upstream corruption)
    UnmappableRole,
    /// Batch reorder where some pairs failed
    PartialFailure,
    /// Junction rows pointing at missing catalog entries
    Integrity,
    /// The authorization gate refused the actor
    Unauthorized,
    /// SQLite or filesystem failure
    Storage,
    /// Socket or codec failure between client and service
    Transport,
}

impl ErrorCategory {
    /// Machine-readable code for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::UnmappableRole => "UNMAPPABLE_ROLE",
            Self::PartialFailure => "PARTIAL_FAILURE",
            Self::Integrity => "INTEGRITY_FAULT",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Storage => "STORAGE_ERROR",
            Self::Transport => "TRANSPORT_ERROR",
        }
    }

    /// Whether the caller caused the failure (as opposed to the system).
    pub fn is_caller_fault(&self) -> bool {
        matches!(
            self,
            Self::Validation | Self::NotFound | Self::Conflict | Self::Unauthorized
        )
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("invalid role {value:?}: expected one of sales, operations, daily")]
    InvalidRole { value: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("conflict: {message}")]
    Conflict { message: String },

    #[error("stored role value {stored} has no external mapping")]
    UnmappableRole { stored: i64 },

    #[error("reorder partially failed for {} member(s)", failures.len())]
    PartialFailure { failures: Vec<ReorderFailure> },

    #[error("referential integrity fault: {message}")]
    Integrity { message: String },

    #[error("actor {actor:?} is not authorized to mutate contact pages")]
    Unauthorized { actor: String },

    #[error("storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("transport error: {message}")]
    Transport { message: String },
}

impl RosterError {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation { .. } | Self::InvalidRole { .. } => ErrorCategory::Validation,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Conflict { .. } => ErrorCategory::Conflict,
            Self::UnmappableRole { .. } => ErrorCategory::UnmappableRole,
            Self::PartialFailure { .. } => ErrorCategory::PartialFailure,
            Self::Integrity { .. } => ErrorCategory::Integrity,
            Self::Unauthorized { .. } => ErrorCategory::Unauthorized,
            Self::Storage { .. } => ErrorCategory::Storage,
            Self::Transport { .. } => ErrorCategory::Transport,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Create a storage error with source
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type for roster operations
pub type Result<T> = std::result::Result<T, RosterError>;
