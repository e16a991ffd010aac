use thiserror::Error;

/// Application-wide error types for Gleaner.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed (media fetch or resolution probe).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Vision classification service call failed.
    #[error("Classifier error (HTTP {status_code}): {message}")]
    ClassifierError { message: String, status_code: u16 },

    /// Detail view fields were missing or malformed.
    #[error("Extraction error: {0}")]
    ExtractionError(String),

    /// The page-automation driver failed to navigate or respond.
    #[error("Driver error: {0}")]
    DriverError(String),

    /// Media bytes could not be decoded as an image.
    #[error("Image decode error: {0}")]
    DecodeError(String),

    /// Writing the record log failed. Fatal to the run.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// Run configuration is invalid.
    #[error("Config error: {0}")]
    ConfigError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Local filesystem operation failed.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true for network-level failures that a later run might not hit.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) => true,
            AppError::ClassifierError { status_code, .. } => {
                *status_code == 429 || *status_code >= 500
            }
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            _ => false,
        }
    }

    /// Returns true if the run cannot continue after this error.
    ///
    /// Only record-log failures qualify: once an append fails the log can no
    /// longer be trusted to match the artifact tree.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::PersistenceError(_))
    }
}

impl From<csv::Error> for AppError {
    fn from(e: csv::Error) -> Self {
        AppError::PersistenceError(e.to_string())
    }
}
