use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("Playlist not found: {0}")]
    PlaylistNotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Search unavailable: {0}")]
    SearchUnavailable(String),

    #[error("Download unavailable: {0}")]
    DownloadUnavailable(String),

    #[error("No match: {0}")]
    NoMatch(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Transport-class failures that are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::SearchUnavailable(_)
            | AppError::DownloadUnavailable(_)
            | AppError::CatalogUnavailable(_) => true,
            AppError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }

    /// Errors that abort the whole run before any job is scheduled.
    pub fn is_run_scoped(&self) -> bool {
        matches!(
            self,
            AppError::CatalogUnavailable(_) | AppError::PlaylistNotFound(_) | AppError::Unauthorized(_)
        )
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::CatalogUnavailable(_) => ErrorKind::CatalogUnavailable,
            AppError::PlaylistNotFound(_) => ErrorKind::PlaylistNotFound,
            AppError::Unauthorized(_) => ErrorKind::Unauthorized,
            AppError::SearchUnavailable(_) => ErrorKind::SearchUnavailable,
            AppError::DownloadUnavailable(_) => ErrorKind::DownloadUnavailable,
            AppError::NoMatch(_) => ErrorKind::NoMatch,
            AppError::Export(_) | AppError::Io(_) => ErrorKind::Export,
            AppError::Cancelled => ErrorKind::Cancelled,
            AppError::Http(_) => ErrorKind::SearchUnavailable,
            AppError::Config(_) | AppError::Json(_) | AppError::Validation(_) | AppError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }
}

/// Error kind carried by a job report. Job failures are data, not `AppError` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    CatalogUnavailable,
    PlaylistNotFound,
    Unauthorized,
    SearchUnavailable,
    DownloadUnavailable,
    NoMatch,
    Export,
    Cancelled,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::CatalogUnavailable => "CatalogUnavailable",
            ErrorKind::PlaylistNotFound => "PlaylistNotFound",
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::SearchUnavailable => "SearchUnavailable",
            ErrorKind::DownloadUnavailable => "DownloadUnavailable",
            ErrorKind::NoMatch => "NoMatch",
            ErrorKind::Export => "ExportError",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Internal => "Internal",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&AppError> for JobError {
    fn from(error: &AppError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(AppError::SearchUnavailable("timeout".into()).is_transient());
        assert!(AppError::DownloadUnavailable("reset".into()).is_transient());
        assert!(!AppError::Export("bad codec".into()).is_transient());
        assert!(!AppError::Unauthorized("expired".into()).is_transient());
        assert!(!AppError::Cancelled.is_transient());
    }

    #[test]
    fn test_run_scoped_classification() {
        assert!(AppError::Unauthorized("expired".into()).is_run_scoped());
        assert!(AppError::PlaylistNotFound("x".into()).is_run_scoped());
        assert!(AppError::CatalogUnavailable("down".into()).is_run_scoped());
        assert!(!AppError::SearchUnavailable("down".into()).is_run_scoped());
    }

    #[test]
    fn test_job_error_from_app_error() {
        let err = JobError::from(&AppError::Cancelled);
        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert_eq!(err.to_string(), "Cancelled: Cancelled");
    }
}
