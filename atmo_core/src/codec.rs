//! Decoder and encoder chains.
//!
//! Inbound payloads walk an ordered list of decoders; each stage may replace
//! the payload, fan it out into several messages, or abort delivery. The
//! chain is shared by reference between the socket and its transport, and
//! stages are allowed to mutate it while a message is in flight (the
//! handshake decoders remove themselves once consumed), so traversal always
//! works on a snapshot.

pub mod padding;
pub mod protocol;
pub mod track_message_size;

use std::sync::{Arc, PoisonError, RwLock};

use crate::event::Event;
use crate::payload::{Outbound, Payload};

/// The outcome of one decoder stage.
pub enum Decoded {
    /// Continue the chain with this payload.
    Next(Payload),
    /// Continue the chain independently for each payload. An empty batch
    /// means nothing is complete yet and suppresses dispatch.
    Batch(Vec<Payload>),
    /// Stop the chain and suppress dispatch for this message.
    Abort,
}

/// One stage of the inbound decoder chain.
pub trait Decoder: Send + Sync {
    /// Stable identity used to locate this stage in the live chain.
    fn name(&self) -> &'static str;

    /// Whether this stage consumes the given payload. Incompatible stages
    /// are skipped and the payload passes through unchanged.
    fn accepts(&self, _payload: &Payload) -> bool {
        true
    }

    /// Decode one payload. The live chain is passed in so a stage may
    /// restructure it (remove itself, install a successor).
    fn decode(&self, event: Event, payload: Payload, chain: &DecoderChain) -> Decoded;
}

/// One stage of the outbound encoder chain.
pub trait Encoder: Send + Sync {
    /// Whether this stage consumes the given message.
    fn accepts(&self, _message: &Outbound) -> bool {
        true
    }

    /// Encode one message.
    fn encode(&self, message: Outbound) -> Outbound;
}

/// The shared, ordered decoder chain.
///
/// Clones alias the same list; the socket and its transport observe each
/// other's mutations immediately.
#[derive(Clone, Default)]
pub struct DecoderChain {
    inner: Arc<RwLock<Vec<Arc<dyn Decoder>>>>,
}

impl DecoderChain {
    /// An empty chain.
    #[must_use]
    pub fn new() -> Self {
        DecoderChain::default()
    }

    /// Append a decoder at the end of the chain.
    pub fn push(&self, decoder: Arc<dyn Decoder>) {
        self.write().push(decoder);
    }

    /// Insert a decoder at `index`, clamped to the current length.
    pub fn insert(&self, index: usize, decoder: Arc<dyn Decoder>) {
        let mut chain = self.write();
        let index = index.min(chain.len());
        chain.insert(index, decoder);
    }

    /// Remove the first decoder with the given name; returns whether one
    /// was removed.
    pub fn remove(&self, name: &str) -> bool {
        let mut chain = self.write();
        match chain.iter().position(|d| d.name() == name) {
            Some(index) => {
                chain.remove(index);
                true
            }
            None => false,
        }
    }

    /// Whether a decoder with the given name is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.read().iter().any(|d| d.name() == name)
    }

    /// A point-in-time copy of the chain, safe to traverse while stages
    /// mutate the original.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<dyn Decoder>> {
        self.read().clone()
    }

    /// Number of stages currently in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<dyn Decoder>>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Arc<dyn Decoder>>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for DecoderChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.read().iter().map(|d| d.name()).collect();
        f.debug_tuple("DecoderChain").field(&names).finish()
    }
}

/// Run the encoder chain over an outbound message.
///
/// Stages whose input tag does not match are skipped.
#[must_use]
pub fn run_encoders(encoders: &[Arc<dyn Encoder>], message: Outbound) -> Outbound {
    let mut current = message;
    for encoder in encoders {
        if encoder.accepts(&current) {
            current = encoder.encode(current);
        }
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tag(&'static str);

    impl Decoder for Tag {
        fn name(&self) -> &'static str {
            self.0
        }

        fn decode(&self, _event: Event, payload: Payload, _chain: &DecoderChain) -> Decoded {
            Decoded::Next(payload)
        }
    }

    #[test]
    fn insert_is_clamped_and_remove_is_by_name() {
        let chain = DecoderChain::new();
        chain.push(Arc::new(Tag("a")));
        chain.insert(10, Arc::new(Tag("b")));
        chain.insert(0, Arc::new(Tag("c")));

        let names: Vec<&str> = chain.snapshot().iter().map(|d| d.name()).collect();
        assert_eq!(names, ["c", "a", "b"]);

        assert!(chain.remove("a"));
        assert!(!chain.remove("a"));
        assert!(chain.contains("c"));
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn snapshot_is_stable_under_mutation() {
        let chain = DecoderChain::new();
        chain.push(Arc::new(Tag("a")));
        let snapshot = chain.snapshot();
        chain.remove("a");
        assert_eq!(snapshot.len(), 1);
        assert!(chain.is_empty());
    }

    struct Upper;

    impl Encoder for Upper {
        fn accepts(&self, message: &Outbound) -> bool {
            matches!(message, Outbound::Text(_))
        }

        fn encode(&self, message: Outbound) -> Outbound {
            match message {
                Outbound::Text(s) => Outbound::Text(s.to_uppercase()),
                other => other,
            }
        }
    }

    #[test]
    fn encoders_are_type_filtered() {
        let encoders: Vec<Arc<dyn Encoder>> = vec![Arc::new(Upper)];
        match run_encoders(&encoders, Outbound::Text("hi".into())) {
            Outbound::Text(s) => assert_eq!(s, "HI"),
            other => panic!("unexpected {other:?}"),
        }
        match run_encoders(&encoders, Outbound::Binary(bytes::Bytes::from_static(b"hi"))) {
            Outbound::Binary(b) => assert_eq!(&b[..], b"hi"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
