//! The socket: transport selection, fallback, and the user-facing API.

use std::sync::{Arc, Mutex, PoisonError};

use atmo_core::dispatch::{self, Function, FunctionRegistry};
use atmo_core::gate::ConnectGate;
use atmo_core::payload::{Outbound, Payload};
use atmo_core::request::Request;
use atmo_core::runtime::SocketRuntime;
use atmo_core::status::Status;
use atmo_core::transport::{Transport, TransportContext, TransportKind};
use atmo_core::{Error, Event};
use atmo_http::{LongPollingTransport, SseTransport, StreamingTransport};
use atmo_websocket::WebSocketTransport;

/// The state of an opened socket.
struct Active {
    kind: TransportKind,
    transport: Arc<dyn Transport>,
    runtime: Arc<SocketRuntime>,
    root: ConnectGate,
    connected: ConnectGate,
}

struct Inner {
    http: reqwest::Client,
    functions: FunctionRegistry,
    active: Mutex<Option<Active>>,
}

/// A message-oriented socket over one negotiated transport.
///
/// Clones share the same connection; the socket is cheap to pass between
/// tasks.
#[derive(Clone)]
pub struct Socket {
    inner: Arc<Inner>,
}

impl Socket {
    pub(crate) fn new(http: reqwest::Client) -> Self {
        Socket {
            inner: Arc::new(Inner {
                http,
                functions: FunctionRegistry::new(),
                active: Mutex::new(None),
            }),
        }
    }

    /// Register a callback under a match key: an event name, a payload tag
    /// (`"string"`, `"bytes"`), or whatever the request's resolver accepts.
    pub fn on(&self, key: impl Into<String>, function: impl Function + 'static) -> &Self {
        self.inner.functions.register(key, function);
        self
    }

    /// Register a callback for a lifecycle event.
    pub fn on_event(&self, event: Event, function: impl Function + 'static) -> &Self {
        self.on(event.name(), function)
    }

    /// Register a callback for text application messages. Binary messages
    /// dispatch under [`Event::MessageBytes`] or the `"bytes"` payload tag.
    pub fn on_message(&self, function: impl Function + 'static) -> &Self {
        self.on(Event::Message.name(), function)
    }

    /// Register a callback under the wildcard key; what it matches is up to
    /// the request's resolver (by default, every message event).
    pub fn on_any(&self, function: impl Function + 'static) -> &Self {
        self.on("", function)
    }

    /// Open the socket, walking the request's transports in order until one
    /// connects.
    ///
    /// Blocks until a transport reaches `OPEN` or every candidate failed.
    ///
    /// # Errors
    ///
    /// Returns the last candidate's failure, or [`Error::Connect`] if the
    /// request enables no transport.
    pub async fn open(&self, request: Request) -> Result<Socket, Error> {
        let request = Arc::new(request);
        let mut last_error = Error::Connect("no transport enabled".into());

        for kind in request.transports().to_vec() {
            let root = ConnectGate::new();
            let connected = ConnectGate::new();
            let ctx = TransportContext::new(
                kind,
                request.clone(),
                self.inner.functions.clone(),
                root.clone(),
                connected.clone(),
            );

            let transport: Arc<dyn Transport> = match kind {
                TransportKind::WebSocket => WebSocketTransport::open(ctx),
                TransportKind::Streaming => {
                    StreamingTransport::open(self.inner.http.clone(), ctx)
                }
                TransportKind::Sse => SseTransport::open(self.inner.http.clone(), ctx),
                TransportKind::LongPolling => {
                    LongPollingTransport::open(self.inner.http.clone(), ctx)
                }
            };
            let runtime = Arc::new(SocketRuntime::new(
                transport.clone(),
                request.clone(),
                root.clone(),
                self.inner.functions.clone(),
            ));

            // Publish before waiting so concurrent `fire` calls can already
            // block on the connected gate.
            *self.lock_active() = Some(Active {
                kind,
                transport: transport.clone(),
                runtime,
                root: root.clone(),
                connected,
            });

            match tokio::time::timeout(request.connect_timeout(), root.wait()).await {
                Ok(Ok(())) => {
                    tracing::info!(transport = %kind, "socket open");
                    dispatch::dispatch(
                        Event::Transport,
                        &Payload::Text(kind.token().to_owned()),
                        &self.inner.functions,
                        request.resolver().as_ref(),
                    );
                    return Ok(self.clone());
                }
                Ok(Err(error)) => {
                    tracing::warn!(transport = %kind, %error, "transport failed, trying next");
                    transport.close();
                    last_error = error;
                }
                Err(_elapsed) => {
                    tracing::warn!(transport = %kind, "transport timed out, trying next");
                    transport.close();
                    last_error = Error::Timeout;
                }
            }
            *self.lock_active() = None;
        }

        Err(last_error)
    }

    /// Send a message, blocking until the socket is connected if an open is
    /// still in flight.
    ///
    /// # Errors
    ///
    /// Fails if the socket was never opened, if the connection died, or
    /// with the error recorded on the root gate by the write path.
    pub async fn fire(&self, message: impl Into<Outbound>) -> Result<SocketFuture, Error> {
        let (connected, runtime, root) = {
            let active = self.lock_active();
            let active = active.as_ref().ok_or(Error::Closed)?;
            (
                active.connected.clone(),
                active.runtime.clone(),
                active.root.clone(),
            )
        };

        connected.wait().await?;
        runtime.write(message.into()).await?;

        Ok(SocketFuture {
            socket: self.clone(),
            gate: root,
        })
    }

    /// Tear down the transport. Safe to call any number of times.
    pub fn close(&self) {
        let transport = {
            let active = self.lock_active();
            active.as_ref().map(|active| active.transport.clone())
        };
        if let Some(transport) = transport {
            transport.close();
        }
    }

    /// Current status; `INIT` before the first open.
    #[must_use]
    pub fn status(&self) -> Status {
        self.lock_active()
            .as_ref()
            .map_or(Status::Init, |active| active.transport.status())
    }

    /// The negotiated transport, once open.
    #[must_use]
    pub fn transport(&self) -> Option<TransportKind> {
        self.lock_active().as_ref().map(|active| active.kind)
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<Active>> {
        self.inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("status", &self.status())
            .field("transport", &self.transport())
            .finish()
    }
}

/// The handle returned by [`Socket::fire`]: the root gate paired with the
/// socket that owns it.
#[derive(Debug, Clone)]
pub struct SocketFuture {
    socket: Socket,
    gate: ConnectGate,
}

impl SocketFuture {
    /// Block until the gate settles, returning the socket.
    ///
    /// # Errors
    ///
    /// Returns the fatal error recorded on the gate, if any.
    pub async fn get(&self) -> Result<Socket, Error> {
        self.gate.wait().await?;
        Ok(self.socket.clone())
    }

    /// Raise any fatal error recorded so far.
    ///
    /// # Errors
    ///
    /// Returns the fatal error recorded on the gate, if any.
    pub fn finish(&self) -> Result<(), Error> {
        self.gate.finish()
    }

    /// Send another message through the owning socket.
    ///
    /// # Errors
    ///
    /// As [`Socket::fire`].
    pub async fn fire(&self, message: impl Into<Outbound>) -> Result<SocketFuture, Error> {
        self.socket.fire(message).await
    }

    /// Close the owning socket.
    pub fn close(&self) {
        self.socket.close();
    }
}
