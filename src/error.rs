use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SnapError {
    #[error("invalid username: {0}")]
    InvalidAccount(String),

    #[error("invalid reference timezone: {0}")]
    InvalidTimezone(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("http client setup failed: {0}")]
    HttpClient(String),

    #[error("no usernames given")]
    NoAccounts,

    #[error("logging setup failed: {0}")]
    Logging(String),
}

/// Failures while retrieving the account page and extracting its embedded payload.
#[derive(Debug, Error, Diagnostic)]
pub enum FetchError {
    #[error("timed out calling feed endpoint")]
    Timeout,

    #[error("feed request failed: {0}")]
    Http(String),

    #[error("feed endpoint returned status {0}")]
    HttpStatus(u16),

    #[error("no embedded payload found in page")]
    NoEmbeddedPayload,

    #[error("embedded payload is malformed: {0}")]
    MalformedPayload(String),
}

#[derive(Debug, Error, Diagnostic)]
pub enum ParseError {
    #[error("account not found")]
    AccountNotFound,

    #[error("unable to index feed payload: {0}")]
    Malformed(String),
}

#[derive(Debug, Error, Diagnostic)]
pub enum DownloadError {
    #[error("media request failed: {0}")]
    Http(String),

    #[error("timed out fetching media")]
    Timeout,

    #[error("media request returned status {0}")]
    HttpStatus(u16),

    #[error("writing {path}: {message}")]
    Io { path: PathBuf, message: String },
}

#[derive(Debug, Error, Diagnostic)]
pub enum MergeError {
    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("multipart input missing: {0}")]
    MissingInput(PathBuf),

    #[error("merge tool failed: {0}")]
    Tool(String),

    #[error("failed to write merge script {path}: {message}")]
    Script { path: PathBuf, message: String },
}

/// Anything that ends a single fetch-and-parse attempt.
#[derive(Debug, Error, Diagnostic)]
pub enum AttemptError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl AttemptError {
    /// `AccountNotFound` is terminal; everything else is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, AttemptError::Parse(ParseError::AccountNotFound))
    }
}
