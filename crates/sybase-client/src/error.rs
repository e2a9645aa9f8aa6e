//! Client error types.

use std::sync::Arc;

use thiserror::Error;

use tds5_protocol::ProtocolError;
use tds5_protocol::token::Eed;

/// Errors that can occur during client operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Connection failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Connection closed unexpectedly.
    #[error("connection closed")]
    ConnectionClosed,

    /// IO error (wrapped in Arc for Clone support).
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    /// TCP connection timeout occurred.
    #[error("connection timed out")]
    ConnectTimeout,

    /// Command execution timeout occurred.
    #[error("command timed out")]
    CommandTimeout,

    /// Protocol-level failure produced by this client.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Wire decoding failure.
    #[error("codec error: {0}")]
    Codec(#[from] ProtocolError),

    /// The server requested a security negotiation exchange, which this
    /// client does not implement.
    #[error("server requested auth negotiation, which is not implemented")]
    AuthNegotiate,

    /// Execute with arguments against a statement id this connection
    /// never prepared.
    #[error("statement {0:?} has not been prepared")]
    StatementNotPrepared(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The server reported an error for the request.
    #[error("server error {number}: {message}")]
    Server {
        /// Message number.
        number: i32,
        /// Severity class.
        class: u8,
        /// Message state.
        state: u8,
        /// Message text.
        message: String,
        /// Server name.
        server: String,
        /// Procedure name, empty outside procedures.
        procedure: String,
        /// Line number.
        line: u16,
    },
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The transport failed; the connection has been force-closed and
    /// the next request will trigger one reconnect attempt.
    Socket,
    /// A protocol-level failure produced by the client; the connection
    /// keeps its current state.
    Local,
    /// The server rejected the request; the connection stays usable.
    Remote,
}

impl Error {
    /// Classify this error as a transport, local, or server failure.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection(_)
            | Self::ConnectionClosed
            | Self::Io(_)
            | Self::ConnectTimeout
            | Self::CommandTimeout => ErrorKind::Socket,
            Self::Protocol(_)
            | Self::Codec(_)
            | Self::AuthNegotiate
            | Self::StatementNotPrepared(_)
            | Self::Config(_) => ErrorKind::Local,
            Self::Server { .. } => ErrorKind::Remote,
        }
    }

    /// Get the severity class if this is a server error.
    #[must_use]
    pub fn class(&self) -> Option<u8> {
        match self {
            Self::Server { class, .. } => Some(*class),
            _ => None,
        }
    }

    pub(crate) fn from_eed(eed: Eed) -> Self {
        Self::Server {
            number: eed.number,
            class: eed.class,
            state: eed.state,
            message: eed.message,
            server: eed.server,
            procedure: eed.procedure,
            line: eed.line,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_classified() {
        assert_eq!(Error::ConnectTimeout.kind(), ErrorKind::Socket);
        assert_eq!(Error::ConnectionClosed.kind(), ErrorKind::Socket);
        assert_eq!(Error::AuthNegotiate.kind(), ErrorKind::Local);
        assert_eq!(Error::Protocol("x".into()).kind(), ErrorKind::Local);
        assert_eq!(
            Error::Codec(ProtocolError::UnexpectedEof).kind(),
            ErrorKind::Local
        );
        let server = Error::Server {
            number: 207,
            class: 16,
            state: 1,
            message: "invalid column".into(),
            server: String::new(),
            procedure: String::new(),
            line: 1,
        };
        assert_eq!(server.kind(), ErrorKind::Remote);
        assert_eq!(server.class(), Some(16));
    }
}
