//! Length-prefixed message reassembly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::codec::{Decoded, Decoder, DecoderChain};
use crate::event::Event;
use crate::payload::Payload;

/// Chain name of the message-size decoder.
pub const TRACK_MESSAGE_SIZE_DECODER: &str = "track-message-size";

/// Reassembles `len<delim>payload` frames emitted by the server when
/// message-length tracking is enabled.
///
/// A transport chunk may carry several complete messages, or a fragment of
/// one; fragments are buffered until their byte count is satisfied. Lengths
/// count characters, matching the server's accounting.
///
/// When the in-band protocol is enabled the very first message is the
/// handshake, which carries its length as the first delimited field instead
/// of a standalone prefix; it is passed through untouched for the handshake
/// decoders to consume.
pub struct TrackMessageSizeDecoder {
    delimiter: char,
    handshake_pending: AtomicBool,
    buffer: Mutex<String>,
}

impl TrackMessageSizeDecoder {
    /// A decoder for the given delimiter. `protocol_enabled` must mirror the
    /// request's protocol flag so the handshake message is left alone.
    #[must_use]
    pub fn new(delimiter: char, protocol_enabled: bool) -> Self {
        TrackMessageSizeDecoder {
            delimiter,
            handshake_pending: AtomicBool::new(protocol_enabled),
            buffer: Mutex::new(String::new()),
        }
    }

    fn drain_complete(&self, chunk: &str) -> Vec<Payload> {
        let mut buffer = self
            .buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        buffer.push_str(chunk);

        let mut messages = Vec::new();
        loop {
            let Some(delim) = buffer.find(self.delimiter) else {
                break;
            };
            let Ok(len) = buffer[..delim].trim().parse::<usize>() else {
                tracing::warn!(prefix = &buffer[..delim], "malformed message length prefix");
                messages.push(Payload::Text(std::mem::take(&mut *buffer)));
                break;
            };

            let rest = &buffer[delim + self.delimiter.len_utf8()..];
            let mut end = 0usize;
            let mut count = 0usize;
            for (i, c) in rest.char_indices() {
                if count == len {
                    break;
                }
                end = i + c.len_utf8();
                count += 1;
            }
            if count < len {
                // Fragment; wait for more bytes.
                break;
            }

            let message = rest[..end].to_owned();
            let remainder = rest[end..].to_owned();
            *buffer = remainder;
            if !message.is_empty() {
                messages.push(Payload::Text(message));
            }
        }
        messages
    }
}

impl Decoder for TrackMessageSizeDecoder {
    fn name(&self) -> &'static str {
        TRACK_MESSAGE_SIZE_DECODER
    }

    fn accepts(&self, payload: &Payload) -> bool {
        matches!(payload, Payload::Text(_))
    }

    fn decode(&self, event: Event, payload: Payload, _chain: &DecoderChain) -> Decoded {
        if !event.is_message() {
            return Decoded::Next(payload);
        }
        let text = match payload {
            Payload::Text(text) => text,
            other => return Decoded::Next(other),
        };
        if self.handshake_pending.swap(false, Ordering::SeqCst) {
            return Decoded::Next(Payload::Text(text));
        }
        Decoded::Batch(self.drain_complete(&text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(decoded: Decoded) -> Vec<String> {
        match decoded {
            Decoded::Batch(payloads) => payloads
                .into_iter()
                .filter_map(|p| match p {
                    Payload::Text(s) => Some(s),
                    Payload::Binary(_) => None,
                })
                .collect(),
            Decoded::Next(Payload::Text(s)) => vec![s],
            _ => Vec::new(),
        }
    }

    fn feed(decoder: &TrackMessageSizeDecoder, chunk: &str) -> Vec<String> {
        texts(decoder.decode(
            Event::Message,
            Payload::Text(chunk.to_owned()),
            &DecoderChain::new(),
        ))
    }

    #[test]
    fn single_complete_message() {
        let decoder = TrackMessageSizeDecoder::new('|', false);
        assert_eq!(feed(&decoder, "5|hello"), ["hello"]);
    }

    #[test]
    fn several_messages_in_one_chunk() {
        let decoder = TrackMessageSizeDecoder::new('|', false);
        assert_eq!(feed(&decoder, "5|hello5|world"), ["hello", "world"]);
    }

    #[test]
    fn fragments_are_buffered_across_chunks() {
        let decoder = TrackMessageSizeDecoder::new('|', false);
        assert!(feed(&decoder, "10|hel").is_empty());
        assert!(feed(&decoder, "lo wo").is_empty());
        assert_eq!(feed(&decoder, "rld5|again"), ["hello worl", "again"]);
    }

    #[test]
    fn handshake_message_passes_through_when_protocol_enabled() {
        let decoder = TrackMessageSizeDecoder::new('|', true);
        assert_eq!(feed(&decoder, "11|5a3f-uuid|X"), ["11|5a3f-uuid|X"]);
        assert_eq!(feed(&decoder, "5|hello"), ["hello"]);
    }

    #[test]
    fn malformed_prefix_flushes_the_buffer() {
        let decoder = TrackMessageSizeDecoder::new('|', false);
        assert_eq!(feed(&decoder, "oops|payload"), ["oops|payload"]);
        // Buffer is clean again afterwards.
        assert_eq!(feed(&decoder, "2|ok"), ["ok"]);
    }
}
