use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SyncError {
    #[error("invalid MGRS tile: {0}")]
    InvalidTile(String),

    #[error("invalid date (expected YYYY-MM-DD): {0}")]
    InvalidDate(String),

    #[error("invalid date range: {start} is after {end}")]
    InvalidDateRange { start: String, end: String },

    #[error("invalid file type suffix: {0}")]
    InvalidFileType(String),

    #[error("missing config file ecosync.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("Earthdata credentials not found (set EARTHDATA_TOKEN, EARTHDATA_USERNAME/EARTHDATA_PASSWORD or a ~/.netrc entry)")]
    MissingCredentials,

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Earthdata request failed: {0}")]
    EarthdataHttp(String),

    #[error("Earthdata returned status {status}: {message}")]
    EarthdataStatus { status: u16, message: String },

    #[error("unexpected search response: {0}")]
    SearchResponse(String),

    #[error("download verification failed: {0}")]
    DownloadVerification(String),

    #[error("metadata table not found: {0}")]
    MetadataTableMissing(PathBuf),

    #[error("metadata table error: {0}")]
    MetadataTable(String),

    #[error("metadata table has no `{0}` column")]
    MissingJoinColumn(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("command `{program}` exited with status {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: i32,
        stderr: String,
    },

    #[error("command `{program}` timed out after {seconds}s")]
    CommandTimeout { program: String, seconds: u64 },
}

impl From<csv::Error> for SyncError {
    fn from(err: csv::Error) -> Self {
        SyncError::MetadataTable(err.to_string())
    }
}
