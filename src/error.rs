//! Error types for the offline download core
//!
//! Errors are categorized by domain (resolution, transport, file, persistence,
//! state) so callers can decide how to surface them. Transfer failures never
//! escape a download task: they end up as a `Failed` status on the record, and
//! the `Display` text of the error becomes the record's failure reason.
//!
//! ## Categories
//!
//! ### Resolution
//! - No stream URL could be determined → `ResolutionFailed`
//! - The resolved URL does not parse → `InvalidDownloadUrl`
//!
//! ### Transport
//! - Non-success HTTP status → `UnexpectedStatusCode`
//! - Connection drops, body read errors → `NetworkError`
//! - Body ended before the announced length → `DownloadTruncated`
//!
//! ### File
//! - `FileIoError` and raw `std::io::Error`
//!
//! ### Persistence
//! - `DatabaseError`, `MigrationFailed` and driver errors via `#[from]`
//!
//! ### State
//! - Unknown download id → `RecordNotFound`
//! - Operation not allowed in the current status → `InvalidState`
//! - Manager already torn down → `Shutdown`

use thiserror::Error;

/// Result type alias using our OfflineError type
pub type Result<T> = std::result::Result<T, OfflineError>;

/// Main error type for the offline download core
#[derive(Error, Debug)]
pub enum OfflineError {
    // ===== Resolution Errors =====

    /// No source URL could be determined for the item
    #[error("Could not resolve a download URL for item {item_id}")]
    ResolutionFailed { item_id: String },

    /// Source URL is not a valid absolute URL
    #[error("Invalid download URL: {0}")]
    InvalidDownloadUrl(String),

    // ===== Transport Errors =====

    /// Server returned a non-success status code
    #[error("Server responded with unexpected status code: {status_code}")]
    UnexpectedStatusCode {
        status_code: u16,
        url: String,
    },

    /// Network connectivity error
    #[error("Network error: {message}")]
    NetworkError {
        message: String,
        /// Whether this error might be transient
        is_transient: bool,
    },

    /// Stream ended before the announced content length was reached
    #[error("Download truncated: expected {expected} bytes, got {actual} bytes")]
    DownloadTruncated {
        expected: u64,
        actual: u64,
    },

    // ===== File Errors =====

    /// Generic file I/O error with context
    #[error("File I/O error: {0}")]
    FileIoError(String),

    // ===== Persistence Errors =====

    /// Generic database error
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Database schema migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Configuration file could not be read or parsed
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    // ===== State Errors =====

    /// No download record with this id
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    /// Operation is not valid for the record's current status
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The download manager has been shut down
    #[error("Download manager has been shut down")]
    Shutdown,

    // ===== External Library Errors =====

    /// HTTP client error from reqwest
    #[error("HTTP client error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    /// Database driver error from sqlx
    #[error("Database error: {0}")]
    SqlxError(#[from] sqlx::Error),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl OfflineError {
    /// Create a RecordNotFound error for a download id
    pub fn not_found<S: Into<String>>(id: S) -> Self {
        OfflineError::RecordNotFound(id.into())
    }

    /// Create an InvalidState error with a message
    pub fn invalid_state<S: Into<String>>(message: S) -> Self {
        OfflineError::InvalidState(message.into())
    }

    /// Create a NetworkError
    pub fn network_error<S: Into<String>>(message: S, is_transient: bool) -> Self {
        OfflineError::NetworkError {
            message: message.into(),
            is_transient,
        }
    }

    /// Check if a user-initiated retry has a reasonable chance of succeeding
    ///
    /// Transient network errors, truncated bodies and 5xx responses are
    /// retryable; client errors (4xx) and local state errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            OfflineError::NetworkError { is_transient, .. } => *is_transient,
            OfflineError::DownloadTruncated { .. } => true,
            OfflineError::UnexpectedStatusCode { status_code, .. } => {
                (500..=599).contains(status_code) || *status_code == 429
            }
            OfflineError::ReqwestError(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Check if error is related to file/disk operations
    pub fn is_file_error(&self) -> bool {
        matches!(
            self,
            OfflineError::FileIoError(_) | OfflineError::IoError(_)
        )
    }

    /// Get user-friendly error message suitable for display
    pub fn user_message(&self) -> String {
        match self {
            OfflineError::ResolutionFailed { .. } => {
                "This item cannot be downloaded: the server did not provide a stream.".to_string()
            }
            OfflineError::UnexpectedStatusCode { status_code: 401 | 403, .. } => {
                "The server refused the download. Please sign in again.".to_string()
            }
            OfflineError::UnexpectedStatusCode { status_code: 404, .. } => {
                "The item is no longer available on the server.".to_string()
            }
            OfflineError::DownloadTruncated { expected, actual } => {
                format!(
                    "Download was interrupted ({} of {} MB). Please try again.",
                    actual / 1_000_000,
                    expected / 1_000_000
                )
            }
            OfflineError::NetworkError { .. } | OfflineError::ReqwestError(_) => {
                "Network connection lost. Please check your connection and retry.".to_string()
            }
            _ => self.to_string(),
        }
    }
}
