use thiserror::Error;

#[derive(Error, Debug)]
pub enum PostdeckError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("Not permitted: {0}")]
    Unauthorized(String),

    #[error("Query requires a composite index: {0}")]
    IndexRequired(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Post not found: {0}")]
    PostNotFound(String),

    #[error("Cross-source edit rejected for post {0}")]
    CrossSourceEdit(String),

    #[error("Storage full: {0}")]
    StorageFull(String),

    #[error("Operation cancelled before any item completed")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl PostdeckError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn is_index_required(&self) -> bool {
        matches!(self, Self::IndexRequired(_))
    }
}

pub type Result<T> = std::result::Result<T, PostdeckError>;
