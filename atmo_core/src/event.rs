//! Socket lifecycle and message events.

use core::fmt;

/// An event flowing through the decoder pipeline and function dispatch.
///
/// `Message` and `MessageBytes` carry application payloads, split by the
/// transport's framing; the remaining variants describe transport lifecycle
/// transitions and are dispatched with a textual payload (the transport
/// token, an error description, an HTTP status code, rendered headers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// The transport reached `OPEN` for the first time.
    Open,
    /// A polling transport completed a cycle and is about to re-arm.
    Reopened,
    /// The connection was torn down, by either side.
    Close,
    /// A fatal transport error was recorded.
    Error,
    /// A text application message arrived.
    Message,
    /// A binary application message arrived.
    MessageBytes,
    /// Response headers were observed, rendered as `name: value` lines.
    Headers,
    /// An HTTP status line was observed on a polling or streaming response.
    Status,
    /// A transport was negotiated for the socket.
    Transport,
}

impl Event {
    /// The lowercase dispatch key functions are registered against.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Event::Open => "open",
            Event::Reopened => "reopened",
            Event::Close => "close",
            Event::Error => "error",
            Event::Message => "message",
            Event::MessageBytes => "message_bytes",
            Event::Headers => "headers",
            Event::Status => "status",
            Event::Transport => "transport",
        }
    }

    /// Whether this is an application-message event, in either framing.
    /// The protocol decoders and the wildcard key match on this.
    #[must_use]
    pub const fn is_message(&self) -> bool {
        matches!(self, Event::Message | Event::MessageBytes)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
