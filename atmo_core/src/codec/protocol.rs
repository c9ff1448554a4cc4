//! In-band protocol handshake decoders.
//!
//! The first message on a protocol-enabled connection is not application
//! data: it carries the server-assigned tracking UUID and, optionally, the
//! heartbeat character. Two sibling decoders cover the two framings a
//! transport may deliver (text and binary); whichever sees the first
//! message wins a shared latch, records the UUID, installs the padding
//! decoder, removes both siblings from the live chain, and aborts delivery
//! so user code never observes the handshake.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::codec::padding::PaddingAndHeartbeatDecoder;
use crate::codec::{Decoded, Decoder, DecoderChain};
use crate::event::Event;
use crate::payload::Payload;
use crate::request::QueryParams;
use crate::{DEFAULT_HEARTBEAT, TRACKING_ID_PARAM};

/// Chain name of the text handshake decoder.
pub const PROTOCOL_TEXT_DECODER: &str = "atmosphere-protocol";

/// Chain name of the binary handshake decoder.
pub const PROTOCOL_BINARY_DECODER: &str = "atmosphere-protocol-bytes";

/// State shared by the two handshake decoders.
///
/// The latch guarantees at-most-once handshake processing even when the
/// first message is delivered concurrently on both framings.
#[derive(Debug)]
pub struct HandshakeState {
    received: AtomicBool,
    query: QueryParams,
    delimiter: char,
    padding_size: usize,
    track_message_length: bool,
}

impl HandshakeState {
    /// Shared state writing the negotiated UUID into `query`.
    #[must_use]
    pub fn new(
        query: QueryParams,
        delimiter: char,
        padding_size: usize,
        track_message_length: bool,
    ) -> Arc<Self> {
        Arc::new(HandshakeState {
            received: AtomicBool::new(false),
            query,
            delimiter,
            padding_size,
            track_message_length,
        })
    }

    /// Parse the handshake and rewire the chain. Fails on a missing or
    /// empty UUID field, leaving the message to pass through.
    fn apply(&self, handshake: &str, chain: &DecoderChain) -> Result<(), String> {
        let fields: Vec<&str> = handshake.trim().split(self.delimiter).collect();
        // With message-length tracking the handshake still carries its
        // length as the first field; skip it.
        let uuid_at = usize::from(self.track_message_length);

        let uuid = fields
            .get(uuid_at)
            .copied()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| format!("missing tracking id in {handshake:?}"))?;

        self.query.set(TRACKING_ID_PARAM, uuid);

        let heartbeat = fields
            .get(uuid_at + 1)
            .and_then(|f| f.chars().next())
            .unwrap_or(DEFAULT_HEARTBEAT);

        chain.insert(
            2,
            Arc::new(PaddingAndHeartbeatDecoder::new(self.padding_size, heartbeat)),
        );
        chain.remove(PROTOCOL_TEXT_DECODER);
        chain.remove(PROTOCOL_BINARY_DECODER);

        tracing::debug!(tracking_id = uuid, heartbeat = %heartbeat, "protocol handshake complete");
        Ok(())
    }

    fn handle(&self, event: Event, handshake: &str, chain: &DecoderChain) -> Option<Decoded> {
        if !event.is_message() {
            return None;
        }
        if self.received.swap(true, Ordering::SeqCst) {
            return None;
        }
        match self.apply(handshake, chain) {
            Ok(()) => Some(Decoded::Abort),
            Err(reason) => {
                // The latch stays set: the handshake is not retried.
                tracing::warn!(%reason, "unable to decode the protocol handshake");
                None
            }
        }
    }
}

/// Handshake decoder for text framing.
#[derive(Debug)]
pub struct ProtocolTextDecoder {
    state: Arc<HandshakeState>,
}

impl ProtocolTextDecoder {
    /// A text handshake decoder over the shared state.
    #[must_use]
    pub fn new(state: Arc<HandshakeState>) -> Self {
        ProtocolTextDecoder { state }
    }
}

impl Decoder for ProtocolTextDecoder {
    fn name(&self) -> &'static str {
        PROTOCOL_TEXT_DECODER
    }

    fn accepts(&self, payload: &Payload) -> bool {
        matches!(payload, Payload::Text(_))
    }

    fn decode(&self, event: Event, payload: Payload, chain: &DecoderChain) -> Decoded {
        let Payload::Text(text) = &payload else {
            return Decoded::Next(payload);
        };
        match self.state.handle(event, text, chain) {
            Some(decoded) => decoded,
            None => Decoded::Next(payload),
        }
    }
}

/// Handshake decoder for binary framing.
#[derive(Debug)]
pub struct ProtocolBinaryDecoder {
    state: Arc<HandshakeState>,
}

impl ProtocolBinaryDecoder {
    /// A binary handshake decoder over the shared state.
    #[must_use]
    pub fn new(state: Arc<HandshakeState>) -> Self {
        ProtocolBinaryDecoder { state }
    }
}

impl Decoder for ProtocolBinaryDecoder {
    fn name(&self) -> &'static str {
        PROTOCOL_BINARY_DECODER
    }

    fn accepts(&self, payload: &Payload) -> bool {
        matches!(payload, Payload::Binary(_))
    }

    fn decode(&self, event: Event, payload: Payload, chain: &DecoderChain) -> Decoded {
        let Payload::Binary(bytes) = &payload else {
            return Decoded::Next(payload);
        };
        let Ok(text) = std::str::from_utf8(bytes) else {
            tracing::warn!("binary handshake is not valid UTF-8");
            return Decoded::Next(payload);
        };
        match self.state.handle(event, text, chain) {
            Some(decoded) => decoded,
            None => Decoded::Next(payload),
        }
    }
}
