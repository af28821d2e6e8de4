use thiserror::Error;

/// Coarse classification of a [`SyncError`], used by callers that only need
/// to branch on the failure class (notification level, retry eligibility).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Validation,
    NotFound,
    Conflict,
    Server,
    Decode,
}

// Errors carry rendered strings instead of source errors so a shared
// in-flight fetch can hand one failure to every waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already done: {0}")]
    Conflict(String),
    #[error("server error ({status}): {detail}")]
    Server { status: u16, detail: String },
    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Network(_) => ErrorKind::Network,
            SyncError::Validation(_) => ErrorKind::Validation,
            SyncError::NotFound(_) => ErrorKind::NotFound,
            SyncError::Conflict(_) => ErrorKind::Conflict,
            SyncError::Server { .. } => ErrorKind::Server,
            SyncError::Decode(_) => ErrorKind::Decode,
        }
    }

    /// Maps a non-success HTTP status and its `detail` text onto the taxonomy.
    pub fn from_status(status: u16, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match status {
            400 | 422 => SyncError::Validation(detail),
            404 => SyncError::NotFound(detail),
            409 => SyncError::Conflict(detail),
            _ => SyncError::Server { status, detail },
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SyncError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            SyncError::from_status(status.as_u16(), err.to_string())
        } else {
            SyncError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no configuration directory available on this platform")]
    NoConfigDir,
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid base url: {0}")]
    BaseUrl(#[from] url::ParseError),
    #[error("failed to build http client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
