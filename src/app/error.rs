use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Network-level failures surfaced by the fetcher once its retries are spent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    #[error("Source unreachable: {0}")]
    Unreachable(String),

    #[error("Request timed out")]
    Timeout,

    #[error("HTTP error: status {0}")]
    HttpError(u16),

    #[error("Rate limited by remote")]
    RateLimited { retry_after: Option<std::time::Duration> },
}

impl TransportFailure {
    /// Whether the fetcher may try again with its normal backoff schedule.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unreachable(_) | Self::Timeout => true,
            Self::HttpError(status) => *status >= 500,
            Self::RateLimited { .. } => false,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionFailure {
    #[error("Document produced no valid records")]
    EmptyResult,

    #[error("Malformed candidate: {0}")]
    MalformedCandidate(String),

    #[error("Invalid selector `{0}`")]
    InvalidSelector(String),

    #[error("Feed parsing error: {0}")]
    FeedParse(String),
}

#[derive(Error, Debug)]
pub enum CacheFailure {
    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    #[error("Storage error: {0}")]
    StorageIo(rusqlite::Error),

    #[error("Migration error: {0}")]
    Migration(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulingFailure {
    #[error("A sync is already in progress for source {0}")]
    SyncAlreadyInProgress(i64),
}

#[derive(Error, Debug)]
pub enum FolioError {
    #[error(transparent)]
    Transport(#[from] TransportFailure),

    #[error(transparent)]
    Extraction(#[from] ExtractionFailure),

    #[error(transparent)]
    Cache(#[from] CacheFailure),

    #[error(transparent)]
    Scheduling(#[from] SchedulingFailure),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl From<rusqlite::Error> for FolioError {
    fn from(e: rusqlite::Error) -> Self {
        let failure = match e.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
                CacheFailure::TransactionConflict(e.to_string())
            }
            _ => CacheFailure::StorageIo(e),
        };
        FolioError::Cache(failure)
    }
}

impl From<serde_json::Error> for FolioError {
    fn from(e: serde_json::Error) -> Self {
        FolioError::Other(format!("Serialization error: {}", e))
    }
}

/// Copyable classification of a failure, recorded on a [`SyncRun`](crate::domain::SyncRun).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "status", rename_all = "snake_case")]
pub enum FailureKind {
    Unreachable,
    Timeout,
    HttpError(u16),
    RateLimited,
    EmptyResult,
    MalformedCandidate,
    /// The document as a whole could not be read: a bad selector or an unparsable feed.
    MalformedDocument,
    TransactionConflict,
    StorageIo,
    SyncAlreadyInProgress,
    SourceNotFound,
    Other,
}

impl FolioError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FolioError::Transport(t) => match t {
                TransportFailure::Unreachable(_) => FailureKind::Unreachable,
                TransportFailure::Timeout => FailureKind::Timeout,
                TransportFailure::HttpError(status) => FailureKind::HttpError(*status),
                TransportFailure::RateLimited { .. } => FailureKind::RateLimited,
            },
            FolioError::Http(_) => FailureKind::Unreachable,
            FolioError::Extraction(e) => match e {
                ExtractionFailure::EmptyResult => FailureKind::EmptyResult,
                ExtractionFailure::MalformedCandidate(_) => FailureKind::MalformedCandidate,
                ExtractionFailure::InvalidSelector(_) | ExtractionFailure::FeedParse(_) => {
                    FailureKind::MalformedDocument
                }
            },
            FolioError::Cache(CacheFailure::TransactionConflict(_)) => {
                FailureKind::TransactionConflict
            }
            FolioError::Cache(_) | FolioError::Io(_) => FailureKind::StorageIo,
            FolioError::Scheduling(_) => FailureKind::SyncAlreadyInProgress,
            FolioError::SourceNotFound(_) => FailureKind::SourceNotFound,
            _ => FailureKind::Other,
        }
    }
}

pub type Result<T> = std::result::Result<T, FolioError>;
