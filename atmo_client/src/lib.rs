//! # Atmo client
//!
//! Entry points for talking to an Atmosphere-style server: a [`Client`]
//! owns the process-wide HTTP runtime, creates [`Socket`]s, and each socket
//! negotiates one of the four transports from its request's preference
//! list.
//!
//! ```no_run
//! use atmo_client::{Client, TransportKind};
//! use atmo_core::request::AtmosphereRequestBuilder;
//!
//! # async fn example() -> Result<(), atmo_core::Error> {
//! let client = Client::new();
//! let socket = client.create();
//! socket.on("message", |message: &atmo_core::Payload| {
//!     println!("got {message:?}");
//! });
//!
//! let request = AtmosphereRequestBuilder::new()
//!     .uri("http://localhost:8080/chat".parse().expect("uri"))
//!     .transport(TransportKind::WebSocket)
//!     .transport(TransportKind::LongPolling)
//!     .build();
//!
//! socket.open(request).await?;
//! socket.fire("hello").await?;
//! socket.close();
//! # Ok(())
//! # }
//! ```

pub mod socket;

pub use atmo_core::{Error, Event, Payload, Request, Status, TransportKind};
pub use socket::{Socket, SocketFuture};

/// Factory for [`Client`]s sharing one HTTP runtime.
#[derive(Debug, Clone, Default)]
pub struct ClientFactory {
    http: reqwest::Client,
}

impl ClientFactory {
    /// A factory with a fresh HTTP runtime.
    #[must_use]
    pub fn new() -> Self {
        ClientFactory::default()
    }

    /// A client sharing this factory's runtime.
    #[must_use]
    pub fn new_client(&self) -> Client {
        Client {
            http: self.http.clone(),
        }
    }
}

/// Creates sockets.
///
/// The HTTP runtime is owned here and handed to every socket, rather than
/// living in a hidden global; supply your own via [`Client::with_http`] to
/// control its lifecycle and configuration.
#[derive(Debug, Clone, Default)]
pub struct Client {
    http: reqwest::Client,
}

impl Client {
    /// A client with a fresh HTTP runtime.
    #[must_use]
    pub fn new() -> Self {
        Client::default()
    }

    /// A client over an application-owned HTTP runtime.
    #[must_use]
    pub fn with_http(http: reqwest::Client) -> Self {
        Client { http }
    }

    /// A new, unopened socket.
    #[must_use]
    pub fn create(&self) -> Socket {
        Socket::new(self.http.clone())
    }
}
