use std::fmt;

/// Result type for recall-engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while running a session agent
#[derive(Debug)]
pub enum Error {
    /// Store layer error
    Store(recall_store::Error),

    /// Vector layer error
    Vector(recall_vector::Error),

    /// Provider error that survived fallback (or had no fallback)
    Provider(recall_providers::Error),

    /// The session's cancellation token fired
    Cancelled,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Store(err) => write!(f, "Store error: {}", err),
            Error::Vector(err) => write!(f, "Vector error: {}", err),
            Error::Provider(err) => write!(f, "Provider error: {}", err),
            Error::Cancelled => write!(f, "Session cancelled"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Store(err) => Some(err),
            Error::Vector(err) => Some(err),
            Error::Provider(err) => Some(err),
            Error::Cancelled => None,
        }
    }
}

impl From<recall_store::Error> for Error {
    fn from(err: recall_store::Error) -> Self {
        Error::Store(err)
    }
}

impl From<recall_vector::Error> for Error {
    fn from(err: recall_vector::Error) -> Self {
        Error::Vector(err)
    }
}

impl From<recall_providers::Error> for Error {
    fn from(err: recall_providers::Error) -> Self {
        Error::Provider(err)
    }
}
