use std::time::Duration;
use thiserror::Error;

/// Everything that can end an ingestion run early.
///
/// Throttling is absent on purpose: a 429 is retried under the
/// [`RetryPolicy`](crate::config::RetryPolicy) and only surfaces here as
/// [`IngestError::RetriesExhausted`] once the policy gives up.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("{0} not found in the environment (or .env file)")]
    MissingCredential(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("page {page}: transport error: {message}")]
    Transport { page: u32, message: String },

    #[error("page {page}: unexpected HTTP status {status}")]
    Status { page: u32, status: u16 },

    #[error("page {page}: failed to parse response body: {source}")]
    Parse {
        page: u32,
        #[source]
        source: serde_json::Error,
    },

    #[error("page {page}: unusable next_url {next_url:?}: {message}")]
    BadContinuation {
        page: u32,
        next_url: String,
        message: String,
    },

    #[error("page {page}: still rate limited after {attempts} retries ({} s waited)", .waited.as_secs())]
    RetriesExhausted {
        page: u32,
        attempts: u32,
        waited: Duration,
    },

    #[error("page {page}: run cancelled")]
    Cancelled { page: u32 },

    #[error("no records to save")]
    EmptyDataset,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl IngestError {
    /// The page a fetch failure happened on, if it is a fetch failure.
    pub fn page(&self) -> Option<u32> {
        match self {
            Self::Transport { page, .. }
            | Self::Status { page, .. }
            | Self::Parse { page, .. }
            | Self::BadContinuation { page, .. }
            | Self::RetriesExhausted { page, .. }
            | Self::Cancelled { page } => Some(*page),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
