//! Error types shared across the client.

use thiserror::Error;

use crate::status::Status;

/// Errors surfaced by sockets, transports, and the write path.
///
/// Cloneable so a single terminal error can be observed by every waiter
/// blocked on the connection gate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// An I/O failure on the underlying connection.
    #[error("i/o error: {0}")]
    Io(String),

    /// A write was attempted while the transport was closed or errored.
    #[error("Invalid Socket Status {0}")]
    InvalidStatus(Status),

    /// A custom outbound value reached the wire with no encoder having
    /// reduced it to a sendable form. Carries the value's type name.
    #[error("No Encoder for {0}")]
    NoEncoder(String),

    /// The transport could not be established.
    #[error("connect failed: {0}")]
    Connect(String),

    /// A response did not arrive within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The socket has not been opened, or has been torn down.
    #[error("socket closed")]
    Closed,
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
