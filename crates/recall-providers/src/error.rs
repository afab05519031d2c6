use std::fmt;

/// Result type for recall-providers operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while driving a provider.
///
/// The taxonomy matters: `is_transient()` decides whether the agent hands the
/// session to the fallback provider or fails it outright.
#[derive(Debug)]
pub enum Error {
    /// Connection refused or reset before a response arrived
    Connect(String),

    /// DNS resolution failed
    Dns(String),

    /// Request or stream read timed out
    Timeout(String),

    /// The provider process could not be spawned
    Spawn(String),

    /// HTTP error status from the provider
    Status { code: u16, message: String },

    /// Response arrived but could not be interpreted
    InvalidResponse(String),

    /// IO failure on a provider subprocess stream
    Io(std::io::Error),
}

impl Error {
    /// Transient connectivity: refused connection, DNS failure, read timeout,
    /// or an unreachable provider binary. A 4xx/5xx status is never transient.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Connect(_) | Error::Dns(_) | Error::Timeout(_) | Error::Spawn(_)
        )
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        let text = err.to_string();
        if err.is_timeout() {
            Error::Timeout(text)
        } else if err.is_connect() {
            if text.contains("dns") || text.contains("resolve") {
                Error::Dns(text)
            } else {
                Error::Connect(text)
            }
        } else {
            Error::InvalidResponse(text)
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connect(msg) => write!(f, "Connection failed: {}", msg),
            Error::Dns(msg) => write!(f, "DNS resolution failed: {}", msg),
            Error::Timeout(msg) => write!(f, "Timed out: {}", msg),
            Error::Spawn(msg) => write!(f, "Provider spawn failed: {}", msg),
            Error::Status { code, message } => {
                write!(f, "Provider returned HTTP {}: {}", code, message)
            }
            Error::InvalidResponse(msg) => write!(f, "Invalid provider response: {}", msg),
            Error::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transience_taxonomy() {
        assert!(Error::Connect("refused".to_string()).is_transient());
        assert!(Error::Dns("nxdomain".to_string()).is_transient());
        assert!(Error::Timeout("read".to_string()).is_transient());
        assert!(Error::Spawn("enoent".to_string()).is_transient());

        assert!(
            !Error::Status {
                code: 400,
                message: "bad request".to_string()
            }
            .is_transient()
        );
        assert!(
            !Error::Status {
                code: 500,
                message: "oops".to_string()
            }
            .is_transient()
        );
        assert!(!Error::InvalidResponse("garbage".to_string()).is_transient());
    }
}
