//! # Atmo HTTP
//!
//! The three HTTP transports: streaming (one long-lived chunked response),
//! server-sent events, and long-polling. All of them read over GET and
//! write through separate requests built from the request's live query
//! state, so the negotiated tracking UUID rides along automatically.

pub mod long_polling;
pub mod sse;
pub mod streaming;

mod common;

pub use long_polling::LongPollingTransport;
pub use sse::SseTransport;
pub use streaming::StreamingTransport;
