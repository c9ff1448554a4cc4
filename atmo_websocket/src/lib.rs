//! # Atmo WebSocket
//!
//! The WebSocket transport: full-duplex frames over one connection, writes
//! framed in-band rather than through separate HTTP requests.

pub mod transport;

pub use transport::WebSocketTransport;
