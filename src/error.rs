use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Application error type covering the whole pipeline.
///
/// Store-level "not found" is deliberately not here: queries for absent
/// records return `Ok(None)` / an empty list. `NotFound` is reserved for
/// facade operations where the caller named a concrete thing.
#[derive(Error, Debug, Diagnostic)]
pub enum AppError {
    #[error("IO error: {0}")]
    #[diagnostic(code(vault::io_error))]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    #[diagnostic(
        code(vault::config_error),
        help("Check your environment variables and .env file")
    )]
    Config(String),

    #[error("Validation error: {0}")]
    #[diagnostic(
        code(vault::validation_error),
        help("Check that your input meets the required format and constraints")
    )]
    Validation(String),

    #[error("Duplicate file hash: {0}")]
    #[diagnostic(
        code(vault::duplicate_hash),
        help("A record with this content hash already exists in the store")
    )]
    DuplicateHash(String),

    #[error("File size {0} exceeds the store's integer range")]
    #[diagnostic(code(vault::size_overflow))]
    SizeOverflow(u64),

    #[error("Database error: {0}")]
    #[diagnostic(
        code(vault::database_error),
        help("Check database connection and schema integrity")
    )]
    Database(String),

    #[error("Not found: {0}")]
    #[diagnostic(code(vault::not_found))]
    NotFound(String),

    #[error("Unsupported media type: {0}")]
    #[diagnostic(
        code(vault::unsupported_type),
        help("Supported extensions: gif, jpg, jpeg, png, mp4, avi, mov, mkv, webm")
    )]
    UnsupportedType(String),

    #[error("Could not determine media duration: {message}")]
    #[diagnostic(code(vault::duration_error))]
    Duration {
        message: String,
        path: Option<PathBuf>,
    },

    #[error("{tool} failed during {phase}: {stderr}")]
    #[diagnostic(
        code(vault::encode_error),
        help("Ensure ffmpeg/ffprobe/gifsicle are installed and on PATH")
    )]
    Encode {
        tool: String,
        phase: String,
        stderr: String,
    },

    #[error("API rate limit exceeded")]
    #[diagnostic(
        code(vault::rate_limited),
        help("The remote API returned 429/503; retry after backing off")
    )]
    RateLimited,

    #[error("API error {status}: {reason}")]
    #[diagnostic(code(vault::api_error))]
    Api { status: u16, reason: String },

    #[error("Network error: {0}")]
    #[diagnostic(code(vault::network_error))]
    Network(String),

    #[error("Malformed API response: {0}")]
    #[diagnostic(code(vault::schema_error))]
    Schema(String),

    #[error("Internal error: {0}")]
    #[diagnostic(code(vault::internal_error))]
    Internal(String),
}

impl AppError {
    pub fn config(message: impl Into<String>) -> Self {
        AppError::Config(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    pub fn database(message: impl Into<String>) -> Self {
        AppError::Database(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        AppError::NotFound(message.into())
    }

    pub fn schema(message: impl Into<String>) -> Self {
        AppError::Schema(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        AppError::Internal(message.into())
    }

    pub fn duration(message: impl Into<String>, path: Option<PathBuf>) -> Self {
        AppError::Duration {
            message: message.into(),
            path,
        }
    }

    pub fn encode(
        tool: impl Into<String>,
        phase: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        AppError::Encode {
            tool: tool.into(),
            phase: phase.into(),
            stderr: stderr.into(),
        }
    }

    /// Whether the caller may reasonably retry the operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::RateLimited)
    }
}

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, AppError>;
