use thiserror::Error;

pub type Result<T> = std::result::Result<T, LeaderboardError>;

#[derive(Debug, Error)]
pub enum LeaderboardError {
    /// Network or decoding failure while talking to a session source.
    /// The whole host update should be retried later, not resumed.
    #[error("fetch error from {host}: {message}")]
    Fetch { host: String, message: String },

    /// Session has no laps at all. Benign: the session is skipped.
    #[error("no laps recorded in session {filename}")]
    NoLapsRecorded { filename: String },

    /// Stored watermark is newer than anything the host returned.
    #[error("watermark regression on {host}: stored {stored}, newest observed {observed}")]
    WatermarkRegression {
        host: String,
        stored: String,
        observed: String,
    },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid duration: {0} ms")]
    InvalidDuration(i64),

    #[error("publish failed (HTTP status {status:?}): {message}")]
    Publish { status: Option<u16>, message: String },

    #[error("leaderboard not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("deadline exceeded on {host} before page {page}")]
    DeadlineExceeded { host: String, page: usize },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl LeaderboardError {
    pub fn fetch(host: &str, message: impl std::fmt::Display) -> Self {
        LeaderboardError::Fetch {
            host: host.to_string(),
            message: message.to_string(),
        }
    }

    /// Errors that abort one host but let the cycle continue with the next.
    pub fn is_host_local(&self) -> bool {
        matches!(
            self,
            LeaderboardError::WatermarkRegression { .. }
                | LeaderboardError::Fetch { .. }
                | LeaderboardError::DeadlineExceeded { .. }
        )
    }
}
