//! Tagged payload types carried through the codec chains.
//!
//! Inbound payloads are either text or bytes, decided by the transport
//! framing. Outbound messages additionally admit blocking readers, which are
//! fully drained into a [`WireBody`] before transmission.

use std::any::Any;
use std::io::Read;

use bytes::Bytes;

use crate::error::Error;
use crate::event::Event;

/// An inbound payload as produced by a transport framer or a decoder stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// A UTF-8 text message.
    Text(String),
    /// A binary message.
    Binary(Bytes),
}

impl Payload {
    /// The tag of this payload, used for decoder and function matching.
    #[must_use]
    pub const fn kind(&self) -> PayloadKind {
        match self {
            Payload::Text(_) => PayloadKind::Text,
            Payload::Binary(_) => PayloadKind::Binary,
        }
    }

    /// Borrow the text content, if this is a text payload.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s),
            Payload::Binary(_) => None,
        }
    }

    /// Borrow the binary content, if this is a binary payload.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::Binary(b) => Some(b),
            Payload::Text(_) => None,
        }
    }

    /// The message event matching this payload's framing.
    #[must_use]
    pub const fn message_event(&self) -> Event {
        match self {
            Payload::Text(_) => Event::Message,
            Payload::Binary(_) => Event::MessageBytes,
        }
    }
}

/// The tag of a [`Payload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// Text payloads.
    Text,
    /// Binary payloads.
    Binary,
}

impl PayloadKind {
    /// The dispatch key matching payloads of this kind.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            PayloadKind::Text => "string",
            PayloadKind::Binary => "bytes",
        }
    }
}

/// An outbound application message, before the encoder chain runs.
///
/// The `Custom` variant carries an arbitrary application value; an encoder
/// in the request's chain must reduce it to one of the wire-ready variants,
/// or the write fails with [`Error::NoEncoder`].
pub enum Outbound {
    /// A UTF-8 text message.
    Text(String),
    /// A binary message.
    Binary(Bytes),
    /// A character stream, drained into a text message before sending.
    TextReader(Box<dyn Read + Send>),
    /// A byte stream, drained into a binary message before sending.
    ByteReader(Box<dyn Read + Send>),
    /// An application value awaiting an encoder.
    Custom {
        /// The value's type name, carried for the no-encoder error.
        type_name: &'static str,
        /// The value itself; encoders downcast it.
        value: Box<dyn Any + Send>,
    },
}

impl Outbound {
    /// Wrap an application value for the encoder chain.
    #[must_use]
    pub fn custom<T: Any + Send>(value: T) -> Self {
        Outbound::Custom {
            type_name: std::any::type_name::<T>(),
            value: Box::new(value),
        }
    }
}

impl std::fmt::Debug for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outbound::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Outbound::Binary(b) => f.debug_tuple("Binary").field(&b.len()).finish(),
            Outbound::TextReader(_) => f.write_str("TextReader(..)"),
            Outbound::ByteReader(_) => f.write_str("ByteReader(..)"),
            Outbound::Custom { type_name, .. } => {
                f.debug_tuple("Custom").field(type_name).finish()
            }
        }
    }
}

impl From<String> for Outbound {
    fn from(s: String) -> Self {
        Outbound::Text(s)
    }
}

impl From<&str> for Outbound {
    fn from(s: &str) -> Self {
        Outbound::Text(s.to_owned())
    }
}

impl From<Vec<u8>> for Outbound {
    fn from(b: Vec<u8>) -> Self {
        Outbound::Binary(Bytes::from(b))
    }
}

impl From<&[u8]> for Outbound {
    fn from(b: &[u8]) -> Self {
        Outbound::Binary(Bytes::copy_from_slice(b))
    }
}

impl From<Bytes> for Outbound {
    fn from(b: Bytes) -> Self {
        Outbound::Binary(b)
    }
}

/// A wire-ready message body: readers have been drained, only the text/binary
/// distinction remains for the transport to map onto its framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireBody {
    /// Sent as a text frame or UTF-8 request body.
    Text(String),
    /// Sent as a binary frame or opaque request body.
    Binary(Bytes),
}

/// Drain an [`Outbound`] message into a [`WireBody`].
///
/// Reader variants are read to completion; the contract permits full
/// buffering here.
///
/// # Errors
///
/// Returns [`Error::Io`] if a reader fails or a character stream is not
/// valid UTF-8, and [`Error::NoEncoder`] for a custom value the encoder
/// chain left unencoded.
pub fn drain(message: Outbound) -> Result<WireBody, Error> {
    match message {
        Outbound::Text(s) => Ok(WireBody::Text(s)),
        Outbound::Binary(b) => Ok(WireBody::Binary(b)),
        Outbound::TextReader(mut r) => {
            let mut buf = String::new();
            r.read_to_string(&mut buf)?;
            Ok(WireBody::Text(buf))
        }
        Outbound::ByteReader(mut r) => {
            let mut buf = Vec::new();
            r.read_to_end(&mut buf)?;
            Ok(WireBody::Binary(Bytes::from(buf)))
        }
        Outbound::Custom { type_name, .. } => Err(Error::NoEncoder(type_name.to_owned())),
    }
}
