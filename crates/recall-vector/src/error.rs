use std::fmt;

/// Result type for recall-vector operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the vector layer
#[derive(Debug)]
pub enum Error {
    /// Embedded database operation failed
    Database(rusqlite::Error),

    /// IO operation failed
    Io(std::io::Error),

    /// Embedding provider failed
    Embedding(String),

    /// Collection service subprocess failed
    Service(String),

    /// Invalid configuration (bad dimensions, too many remotes, ...)
    Config(String),

    /// Malformed blob or foreign record
    Encoding(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Database(err) => write!(f, "Database error: {}", err),
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Embedding(msg) => write!(f, "Embedding error: {}", msg),
            Error::Service(msg) => write!(f, "Collection service error: {}", msg),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Encoding(msg) => write!(f, "Encoding error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Database(err) => Some(err),
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Embedding(err.to_string())
    }
}

impl From<recall_store::Error> for Error {
    fn from(err: recall_store::Error) -> Self {
        Error::Encoding(format!("store read failed: {}", err))
    }
}
