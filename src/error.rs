//! Unified error handling for the siaran crate
//!
//! This module provides a unified error type that consolidates the
//! domain-specific errors of the engine into a single `Error` enum, while
//! keeping the domain errors ([`SendError`], [`DenyReason`]) usable on their own.
//!
//! # Architecture
//!
//! - [`BroadcastErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use siaran::error::{BroadcastErrorTrait, Error};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         println!("Will retry later: {err}");
//!     } else {
//!         eprintln!("Rejected: {err}");
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;
use uuid::Uuid;

use crate::campaign::LifecycleAction;
use crate::models::CampaignState;

// Re-export domain-specific errors for convenience
pub use crate::limiter::DenyReason;
pub use crate::transport::SendError;

/// Common trait for all siaran error types
pub trait BroadcastErrorTrait: std::error::Error {
    /// Check if this error is recoverable (the operation may succeed later)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed drafts and requests
    Validation,
    /// Plan or daily limits
    Limit,
    /// Outbound send failures
    Transport,
    /// Lifecycle violations and races
    Lifecycle,
    /// Storage and I/O errors
    Storage,
    /// Configuration errors
    Config,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Limit => "limit",
            Self::Transport => "transport",
            Self::Lifecycle => "lifecycle",
            Self::Storage => "storage",
            Self::Config => "config",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the siaran crate
#[derive(Error, Debug)]
pub enum Error {
    /// Draft or request failed validation; the campaign never reaches Running
    #[error("Validation error: {0}")]
    Validation(String),

    /// Plan limiter denial
    #[error("Limit exceeded: {0}")]
    LimitExceeded(#[from] DenyReason),

    /// Outbound send failure surfaced at campaign level
    #[error("Transport error: {0}")]
    Transport(#[from] SendError),

    /// Lifecycle action not allowed from the current state
    #[error("Cannot {action} a campaign in state {from}")]
    InvalidTransition {
        from: CampaignState,
        action: LifecycleAction,
    },

    /// Campaign does not exist
    #[error("Campaign not found: {0}")]
    NotFound(Uuid),

    /// State changed underneath a lifecycle request too many times
    #[error("Concurrent state change on campaign {0}")]
    ConcurrencyConflict(Uuid),

    /// Repository failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl BroadcastErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::LimitExceeded(reason) => reason.is_recoverable(),
            Self::Transport(e) => e.is_retryable(),
            Self::InvalidTransition { .. } => false,
            Self::NotFound(_) => false,
            Self::ConcurrencyConflict(_) => true,
            Self::Storage(_) => false,
            Self::Io(_) => true, // I/O errors are often transient
            Self::Json(_) => false,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Validation,
            Self::LimitExceeded(_) => ErrorCategory::Limit,
            Self::Transport(_) => ErrorCategory::Transport,
            Self::InvalidTransition { .. } | Self::NotFound(_) | Self::ConcurrencyConflict(_) => {
                ErrorCategory::Lifecycle
            }
            Self::Storage(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Json(_) => ErrorCategory::Validation,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

// Repositories report through anyhow with context chains
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Storage(format!("{err:#}"))
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
