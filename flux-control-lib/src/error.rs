use std::time::Duration;

/// Errors that can occur while talking to a bulb.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// An operation was invoked while the session was not connected.
    #[error("not connected to the bulb")]
    NotConnected,

    /// The bulb did not reply within the configured response timeout.
    #[error("no response from the bulb within {waited:?}")]
    ResponseTimeout { waited: Duration },

    /// The connection was closed before the expected reply arrived.
    #[error("connection closed mid-reply")]
    ConnectionClosed,

    /// A reply did not have the shape the protocol promises.
    #[error("malformed reply: {0}")]
    BadReply(String),

    /// An I/O error occurred on the underlying socket.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
}
