use std::fmt;

/// Errors surfaced across the relay.
///
/// Protocol violations carry a static description of the rule that was
/// broken; they always result in session teardown, never in a reply.
#[derive(Debug)]
pub enum RelayError {
    Io(std::io::Error),
    Config(serde_json::Error),
    /// Malformed or missing WebSocket upgrade request.
    Handshake(&'static str),
    /// RFC 6455 framing violation.
    Protocol(&'static str),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Io(e) => write!(f, "I/O error: {}", e),
            RelayError::Config(e) => write!(f, "config error: {}", e),
            RelayError::Handshake(reason) => write!(f, "handshake error: {}", reason),
            RelayError::Protocol(reason) => write!(f, "protocol error: {}", reason),
        }
    }
}

impl std::error::Error for RelayError {}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::Io(err)
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Config(err)
    }
}
