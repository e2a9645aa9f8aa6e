//! Session state for the connection.

/// Runtime state of a TDS 5.0 session.
///
/// ```text
/// Disconnected -> Connected       (login accepted)
/// Disconnected -> AuthNegotiate   (server wants a negotiation exchange;
///                                  surfaced as a local error)
/// any          -> Disconnected    (socket failure, timeout, or close)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No usable session; the next request will reconnect.
    #[default]
    Disconnected,
    /// Login completed, requests can be issued.
    Connected,
    /// The server asked for a security negotiation exchange. The state
    /// is recognized but never driven further.
    AuthNegotiate,
}

impl SessionState {
    /// Check if requests can be issued in this state.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}
