//! Stripping of server-sent padding and heartbeat runs.

use crate::codec::{Decoded, Decoder, DecoderChain};
use crate::event::Event;
use crate::payload::Payload;

/// Chain name of the padding decoder.
pub const PADDING_DECODER: &str = "padding-heartbeat";

/// Removes the padding the server emits to defeat intermediary buffering,
/// and swallows standalone heartbeat messages.
///
/// Installed by the protocol handshake once the heartbeat character is
/// negotiated. A leading run of exactly `padding_size` heartbeat characters
/// is stripped; whatever follows passes through. A message consisting only
/// of heartbeat characters is a keep-alive and is dropped entirely.
#[derive(Debug)]
pub struct PaddingAndHeartbeatDecoder {
    padding_size: usize,
    heartbeat: char,
}

impl PaddingAndHeartbeatDecoder {
    /// A decoder for the given padding length and heartbeat character.
    #[must_use]
    pub const fn new(padding_size: usize, heartbeat: char) -> Self {
        PaddingAndHeartbeatDecoder {
            padding_size,
            heartbeat,
        }
    }

    fn strip_text(&self, text: &str) -> Decoded {
        if text.chars().all(|c| c == self.heartbeat) {
            tracing::trace!("dropping heartbeat of {} chars", text.chars().count());
            return Decoded::Abort;
        }

        let mut run = 0usize;
        let mut cut = 0usize;
        for c in text.chars() {
            if c != self.heartbeat || run == self.padding_size {
                break;
            }
            run += 1;
            cut += c.len_utf8();
        }

        if run == self.padding_size {
            Decoded::Next(Payload::Text(text[cut..].to_owned()))
        } else {
            Decoded::Next(Payload::Text(text.to_owned()))
        }
    }

    fn strip_binary(&self, bytes: &[u8]) -> Decoded {
        let mut heart = [0u8; 4];
        let heart = self.heartbeat.encode_utf8(&mut heart).as_bytes();
        if heart.len() != 1 {
            // Multi-byte heartbeats never appear in binary framing.
            return Decoded::Next(Payload::Binary(bytes::Bytes::copy_from_slice(bytes)));
        }
        let heart = heart[0];

        if bytes.iter().all(|b| *b == heart) {
            tracing::trace!("dropping heartbeat of {} bytes", bytes.len());
            return Decoded::Abort;
        }

        let run = bytes.iter().take(self.padding_size).take_while(|b| **b == heart).count();
        if run == self.padding_size {
            Decoded::Next(Payload::Binary(bytes::Bytes::copy_from_slice(&bytes[run..])))
        } else {
            Decoded::Next(Payload::Binary(bytes::Bytes::copy_from_slice(bytes)))
        }
    }
}

impl Decoder for PaddingAndHeartbeatDecoder {
    fn name(&self) -> &'static str {
        PADDING_DECODER
    }

    fn decode(&self, event: Event, payload: Payload, _chain: &DecoderChain) -> Decoded {
        if !event.is_message() {
            return Decoded::Next(payload);
        }
        match &payload {
            Payload::Text(text) if text.is_empty() => Decoded::Abort,
            Payload::Text(text) => self.strip_text(text),
            Payload::Binary(bytes) if bytes.is_empty() => Decoded::Abort,
            Payload::Binary(bytes) => self.strip_binary(bytes),
        }
    }
}
