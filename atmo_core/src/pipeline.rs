//! The inbound pipeline: decoder chain traversal plus function dispatch.

use std::sync::Arc;

use crate::codec::{Decoded, Decoder, DecoderChain};
use crate::dispatch::{self, FunctionRegistry, FunctionResolver};
use crate::event::Event;
use crate::payload::Payload;

/// Run one inbound payload through the decoder chain, then dispatch every
/// surviving message to the registered functions.
///
/// Traversal uses a snapshot of the chain, so stages may add or remove
/// members mid-flight without disturbing the walk. Returns whether at least
/// one callback fired.
pub fn run(
    event: Event,
    payload: Payload,
    chain: &DecoderChain,
    functions: &FunctionRegistry,
    resolver: &dyn FunctionResolver,
) -> bool {
    let snapshot = chain.snapshot();
    let mut survivors = Vec::new();
    decode_from(event, payload, &snapshot, 0, chain, &mut survivors);

    let mut invoked = false;
    for message in &survivors {
        invoked |= dispatch::dispatch(event, message, functions, resolver);
    }
    invoked
}

fn decode_from(
    event: Event,
    payload: Payload,
    snapshot: &[Arc<dyn Decoder>],
    index: usize,
    chain: &DecoderChain,
    survivors: &mut Vec<Payload>,
) {
    let Some(decoder) = snapshot.get(index) else {
        survivors.push(payload);
        return;
    };

    if !decoder.accepts(&payload) {
        return decode_from(event, payload, snapshot, index + 1, chain, survivors);
    }

    match decoder.decode(event, payload, chain) {
        Decoded::Next(next) => decode_from(event, next, snapshot, index + 1, chain, survivors),
        Decoded::Batch(batch) => {
            for message in batch {
                decode_from(event, message, snapshot, index + 1, chain, survivors);
            }
        }
        Decoded::Abort => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DefaultFunctionResolver;
    use std::sync::Mutex;

    struct Suffix(&'static str);

    impl Decoder for Suffix {
        fn name(&self) -> &'static str {
            "suffix"
        }

        fn accepts(&self, payload: &Payload) -> bool {
            matches!(payload, Payload::Text(_))
        }

        fn decode(&self, _event: Event, payload: Payload, _chain: &DecoderChain) -> Decoded {
            match payload {
                Payload::Text(s) => Decoded::Next(Payload::Text(format!("{s}{}", self.0))),
                other => Decoded::Next(other),
            }
        }
    }

    struct Split;

    impl Decoder for Split {
        fn name(&self) -> &'static str {
            "split"
        }

        fn decode(&self, _event: Event, payload: Payload, _chain: &DecoderChain) -> Decoded {
            match payload {
                Payload::Text(s) => Decoded::Batch(
                    s.split(',').map(|p| Payload::Text(p.to_owned())).collect(),
                ),
                other => Decoded::Next(other),
            }
        }
    }

    struct Blackhole;

    impl Decoder for Blackhole {
        fn name(&self) -> &'static str {
            "drop"
        }

        fn decode(&self, _event: Event, _payload: Payload, _chain: &DecoderChain) -> Decoded {
            Decoded::Abort
        }
    }

    fn collect() -> (FunctionRegistry, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let functions = FunctionRegistry::new();
        let sink = log.clone();
        functions.register("message", move |m: &Payload| {
            sink.lock()
                .expect("log lock")
                .push(m.as_text().unwrap_or("<bytes>").to_owned());
        });
        (functions, log)
    }

    #[test]
    fn stages_run_in_order_and_batches_fan_out() {
        let chain = DecoderChain::new();
        chain.push(Arc::new(Split));
        chain.push(Arc::new(Suffix("!")));
        let (functions, log) = collect();

        let fired = run(
            Event::Message,
            Payload::Text("a,b".into()),
            &chain,
            &functions,
            &DefaultFunctionResolver,
        );
        assert!(fired);
        assert_eq!(*log.lock().expect("log lock"), ["a!", "b!"]);
    }

    #[test]
    fn abort_suppresses_dispatch() {
        let chain = DecoderChain::new();
        chain.push(Arc::new(Blackhole));
        chain.push(Arc::new(Suffix("!")));
        let (functions, log) = collect();

        let fired = run(
            Event::Message,
            Payload::Text("a".into()),
            &chain,
            &functions,
            &DefaultFunctionResolver,
        );
        assert!(!fired);
        assert!(log.lock().expect("log lock").is_empty());
    }

    #[test]
    fn incompatible_stages_are_skipped_silently() {
        let chain = DecoderChain::new();
        chain.push(Arc::new(Suffix("!")));
        let (functions, log) = collect();

        run(
            Event::Message,
            Payload::Binary(bytes::Bytes::from_static(b"raw")),
            &chain,
            &functions,
            &DefaultFunctionResolver,
        );
        // The binary payload reached dispatch unchanged; the text recorder
        // saw its placeholder.
        assert_eq!(*log.lock().expect("log lock"), ["<bytes>"]);
    }

    #[test]
    fn empty_batch_means_nothing_to_deliver() {
        struct Hold;
        impl Decoder for Hold {
            fn name(&self) -> &'static str {
                "hold"
            }
            fn decode(&self, _e: Event, _p: Payload, _c: &DecoderChain) -> Decoded {
                Decoded::Batch(Vec::new())
            }
        }

        let chain = DecoderChain::new();
        chain.push(Arc::new(Hold));
        let (functions, log) = collect();

        let fired = run(
            Event::Message,
            Payload::Text("partial".into()),
            &chain,
            &functions,
            &DefaultFunctionResolver,
        );
        assert!(!fired);
        assert!(log.lock().expect("log lock").is_empty());
    }
}
