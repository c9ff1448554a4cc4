//! # Atmo core
//!
//! Transport-independent core of the atmo client: the request model and its
//! builders, the decoder/encoder chains, the in-band protocol handshake
//! decoders, function dispatch, the connection gate, and the socket runtime
//! that drives the write path.
//!
//! Concrete transports live in their own crates (`atmo_websocket`,
//! `atmo_http`) and plug into the [`transport::Transport`] trait defined here.

pub mod codec;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod gate;
pub mod payload;
pub mod pipeline;
pub mod request;
pub mod runtime;
pub mod status;
pub mod transport;

pub use error::Error;
pub use event::Event;
pub use gate::ConnectGate;
pub use payload::{Outbound, Payload, PayloadKind, WireBody};
pub use request::{AtmosphereRequestBuilder, Request, RequestBuilder};
pub use runtime::SocketRuntime;
pub use status::Status;
pub use transport::{Transport, TransportContext, TransportKind};

/// Protocol version advertised in the `X-Atmosphere-Framework` query parameter.
pub const PROTOCOL_VERSION: &str = "2.3.0";

/// Query parameter carrying the server-assigned tracking UUID.
pub const TRACKING_ID_PARAM: &str = "X-Atmosphere-tracking-id";

/// Query parameter advertising the framework version.
pub const FRAMEWORK_PARAM: &str = "X-Atmosphere-Framework";

/// Query parameter enabling the in-band protocol handshake.
pub const PROTOCOL_PARAM: &str = "X-atmo-protocol";

/// Query parameter enabling message-length tracking on the server.
pub const TRACK_MESSAGE_SIZE_PARAM: &str = "X-Atmosphere-TrackMessageSize";

/// Query parameter naming the negotiated transport.
pub const TRANSPORT_PARAM: &str = "X-Atmosphere-Transport";

/// Default padding run length sent by the server before real payloads.
pub const DEFAULT_PADDING_SIZE: usize = 4098;

/// Default heartbeat character.
pub const DEFAULT_HEARTBEAT: char = 'X';

/// Default delimiter between the length prefix and the message body.
pub const DEFAULT_TRACK_DELIMITER: char = '|';
