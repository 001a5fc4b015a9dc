//! Error types for the deckstore core
//!
//! All errors use thiserror for structured error handling.
//! These errors can be serialized to the UI layer.

use crate::store::machine::{TaskEvent, TaskStatus};
use thiserror::Error;

/// Classification of a failed call to the generation API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    Network,
    Authentication,
    RateLimit,
    Validation,
    Server,
    Timeout,
    Unknown,
}

impl ApiErrorKind {
    /// Classify an HTTP status code returned by the AI service
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => ApiErrorKind::Authentication,
            429 => ApiErrorKind::RateLimit,
            400 => ApiErrorKind::Validation,
            500..=599 => ApiErrorKind::Server,
            _ => ApiErrorKind::Unknown,
        }
    }

    pub fn is_retryable(self) -> bool {
        !matches!(
            self,
            ApiErrorKind::Authentication | ApiErrorKind::Validation
        )
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Cannot apply {event} to task in status {status}")]
    InvalidTransition { status: TaskStatus, event: TaskEvent },

    #[error("Exceeded maximum retry count ({max_retries}) for task {task_id}")]
    RetryLimitExceeded { task_id: String, max_retries: u32 },

    #[error("Not enough credits to generate {0}")]
    InsufficientCredits(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("{message}")]
    Api {
        kind: ApiErrorKind,
        status: Option<u16>,
        message: String,
    },

    #[error("{0}")]
    Cancelled(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Version {0} not found")]
    VersionNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Migration error: {0}")]
    Migration(String),
}

impl AppError {
    /// Whether this error means the operation was aborted rather than failed.
    ///
    /// Errors coming back from the AI service are free-form strings, so the
    /// message is inspected as well as the variant.
    pub fn is_cancellation(&self) -> bool {
        if matches!(self, AppError::Cancelled(_)) {
            return true;
        }
        let message = self.to_string().to_lowercase();
        message.contains("aborted") || message.contains("cancelled")
    }

    /// Whether the AI client should retry the call that produced this error
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Api { kind, .. } => kind.is_retryable(),
            AppError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
