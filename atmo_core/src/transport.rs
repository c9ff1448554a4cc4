//! The transport contract and the context shared by every implementation.
//!
//! Each wire mechanism (WebSocket, HTTP streaming, SSE, long-polling) has
//! its own framing and failure modes, but all of them present the same
//! observable state machine:
//!
//! ```text
//! INIT --first-bytes--> OPEN
//! INIT --network-error--> ERROR
//! OPEN --poll-complete--> REOPENED --re-issue--> OPEN
//! OPEN --server-close--> CLOSE
//! OPEN --error--> ERROR
//! any  --close()--> CLOSE   (idempotent)
//! ```
//!
//! [`TransportContext`] owns that shared machinery (status transitions,
//! event dispatch, gate signalling, cancellation) so the transport crates
//! only supply their framing and send mechanics.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::event::Event;
use crate::gate::ConnectGate;
use crate::dispatch::FunctionRegistry;
use crate::payload::{Payload, WireBody};
use crate::pipeline;
use crate::request::Request;
use crate::status::{Status, StatusCell};

/// The four wire mechanisms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Full-duplex WebSocket frames.
    WebSocket,
    /// One long-lived chunked HTTP response.
    Streaming,
    /// Server-sent events over a long-lived response.
    Sse,
    /// Repeated HTTP polls, one message per response.
    LongPolling,
}

impl TransportKind {
    /// The lowercase token advertised to the server.
    #[must_use]
    pub const fn token(&self) -> &'static str {
        match self {
            TransportKind::WebSocket => "websocket",
            TransportKind::Streaming => "streaming",
            TransportKind::Sse => "sse",
            TransportKind::LongPolling => "long-polling",
        }
    }

    /// Push transports deliver writes over the connection itself; the rest
    /// write through separate HTTP requests.
    #[must_use]
    pub const fn is_push(&self) -> bool {
        matches!(self, TransportKind::WebSocket)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// A connected (or connecting) wire mechanism.
pub trait Transport: Send + Sync {
    /// Which mechanism this is.
    fn kind(&self) -> TransportKind;

    /// Current state.
    fn status(&self) -> Status;

    /// Record a fatal error: transition to `ERROR`, dispatch the error
    /// event, and relay to the root gate unless a user function consumed it.
    fn error(&self, error: Error);

    /// Whether the last recorded error was consumed by a user function.
    fn error_handled(&self) -> bool;

    /// Send one wire-ready body. Push transports frame it on the
    /// connection and return `None`; polling transports POST it and return
    /// the non-empty response body for re-injection into the read pipeline.
    fn send(&self, body: WireBody) -> BoxFuture<'_, Result<Option<Payload>, Error>>;

    /// Idempotent teardown of the underlying network resources.
    fn close(&self);
}

/// State shared between a transport's read loop, its `Transport` impl, and
/// the socket that owns it.
///
/// The decoder chain and function registry are aliased with the socket, not
/// copied; mutations (such as the handshake decoders removing themselves)
/// are observable everywhere immediately.
pub struct TransportContext {
    kind: TransportKind,
    request: Arc<Request>,
    functions: FunctionRegistry,
    status: StatusCell,
    root: ConnectGate,
    connected: ConnectGate,
    error_handled: AtomicBool,
    cancel: CancellationToken,
}

impl TransportContext {
    /// Context wiring a transport to its request, shared callback list,
    /// and the two gates injected by the socket.
    #[must_use]
    pub fn new(
        kind: TransportKind,
        request: Arc<Request>,
        functions: FunctionRegistry,
        root: ConnectGate,
        connected: ConnectGate,
    ) -> Arc<Self> {
        Arc::new(TransportContext {
            kind,
            request,
            functions,
            status: StatusCell::new(),
            root,
            connected,
            error_handled: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        })
    }

    /// Which mechanism this context serves.
    #[must_use]
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// The request this transport was opened with.
    #[must_use]
    pub fn request(&self) -> &Arc<Request> {
        &self.request
    }

    /// Current state.
    #[must_use]
    pub fn status(&self) -> Status {
        self.status.load()
    }

    /// Whether the last recorded error was consumed by a user function.
    #[must_use]
    pub fn error_handled(&self) -> bool {
        self.error_handled.load(Ordering::SeqCst)
    }

    /// Resolves when [`close`](Self::close) or a fatal error tears the
    /// transport down; read loops select on this.
    pub fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Run an application message through the decoder chain and dispatch,
    /// as `Message` or `MessageBytes` according to its framing.
    pub fn deliver(&self, payload: Payload) -> bool {
        pipeline::run(
            payload.message_event(),
            payload,
            self.request.decoders(),
            &self.functions,
            self.request.resolver().as_ref(),
        )
    }

    /// Dispatch a lifecycle event directly to the registered functions,
    /// bypassing the decoder chain.
    pub fn dispatch(&self, event: Event, payload: Payload) -> bool {
        crate::dispatch::dispatch(
            event,
            &payload,
            &self.functions,
            self.request.resolver().as_ref(),
        )
    }

    /// Dispatch the headers event, rendering the map as `name: value`
    /// lines (the payload model carries no header map).
    pub fn dispatch_headers(&self, headers: &http::HeaderMap) -> bool {
        let rendered = headers
            .iter()
            .map(|(name, value)| format!("{name}: {}", value.to_str().unwrap_or("<opaque>")))
            .collect::<Vec<_>>()
            .join("\n");
        self.dispatch(Event::Headers, Payload::Text(rendered))
    }

    /// First bytes arrived: transition to `OPEN`, fire the open event, and
    /// release both gates. A no-op on every later call.
    pub fn mark_open(&self) {
        if self.status.transition(Status::Init, Status::Open) {
            tracing::info!(transport = %self.kind, "transport open");
            self.dispatch(Event::Open, Payload::Text(self.kind.token().to_owned()));
            self.connected.done();
            self.root.done();
        }
    }

    /// A poll is being re-issued; silently re-arm `REOPENED` back to `OPEN`.
    pub fn reissue(&self) {
        self.status.transition(Status::Reopened, Status::Open);
    }

    /// A polling cycle completed; fire the reopened event.
    pub fn mark_reopened(&self) {
        if self.status.transition(Status::Open, Status::Reopened) {
            tracing::debug!(transport = %self.kind, "poll cycle complete");
            self.dispatch(Event::Reopened, Payload::Text(self.kind.token().to_owned()));
        }
    }

    /// Tear down: transition to `CLOSE` exactly once, fire the close event,
    /// cancel pending work, and unblock any waiters.
    pub fn mark_close(&self) {
        let previous = loop {
            let current = self.status.load();
            if current == Status::Close {
                return;
            }
            if self.status.transition(current, Status::Close) {
                break current;
            }
        };
        tracing::info!(transport = %self.kind, from = %previous, "transport closed");
        self.dispatch(Event::Close, Payload::Text(self.kind.token().to_owned()));
        self.cancel.cancel();
        self.connected.done();
        self.root.done();
    }

    /// Record a fatal error: transition to `ERROR`, dispatch the error
    /// event, and relay to the gates unless a user function consumed it.
    pub fn fail(&self, error: Error) {
        self.status.store(Status::Error);
        tracing::error!(transport = %self.kind, %error, "transport error");
        let handled = self.dispatch(Event::Error, Payload::Text(error.to_string()));
        self.error_handled.store(handled, Ordering::SeqCst);
        self.cancel.cancel();
        if !handled {
            self.connected.io_error(error.clone());
            self.root.io_error(error);
        }
    }
}

impl fmt::Debug for TransportContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportContext")
            .field("kind", &self.kind)
            .field("status", &self.status.load())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestBuilder;
    use std::sync::Mutex;

    fn context(kind: TransportKind) -> (Arc<TransportContext>, ConnectGate, ConnectGate) {
        let request = Arc::new(RequestBuilder::new().build());
        let root = ConnectGate::new();
        let connected = ConnectGate::new();
        let ctx = TransportContext::new(
            kind,
            request,
            FunctionRegistry::new(),
            root.clone(),
            connected.clone(),
        );
        (ctx, root, connected)
    }

    #[test]
    fn open_releases_both_gates_once() {
        let (ctx, root, connected) = context(TransportKind::WebSocket);
        assert_eq!(ctx.status(), Status::Init);
        ctx.mark_open();
        assert_eq!(ctx.status(), Status::Open);
        assert!(root.is_done());
        assert!(connected.is_done());
    }

    #[test]
    fn reopen_cycle_does_not_refire_open() {
        let (ctx, _root, _connected) = context(TransportKind::LongPolling);
        let opens = Arc::new(Mutex::new(0usize));
        {
            let opens = opens.clone();
            ctx.functions.register("open", move |_: &Payload| {
                *opens.lock().expect("count lock") += 1;
            });
        }
        ctx.mark_open();
        ctx.mark_reopened();
        assert_eq!(ctx.status(), Status::Reopened);
        ctx.reissue();
        assert_eq!(ctx.status(), Status::Open);
        ctx.mark_open();
        assert_eq!(*opens.lock().expect("count lock"), 1);
    }

    #[test]
    fn close_is_idempotent_and_fires_once() {
        let (ctx, root, _connected) = context(TransportKind::WebSocket);
        let closes = Arc::new(Mutex::new(0usize));
        {
            let closes = closes.clone();
            ctx.functions.register("close", move |_: &Payload| {
                *closes.lock().expect("count lock") += 1;
            });
        }
        ctx.mark_open();
        ctx.mark_close();
        ctx.mark_close();
        ctx.mark_close();
        assert_eq!(ctx.status(), Status::Close);
        assert_eq!(*closes.lock().expect("count lock"), 1);
        assert!(root.is_done());
    }

    #[test]
    fn headers_are_rendered_as_lines() {
        let (ctx, _root, _connected) = context(TransportKind::Streaming);
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            ctx.functions.register("headers", move |m: &Payload| {
                seen.lock()
                    .expect("seen lock")
                    .push(m.as_text().unwrap_or_default().to_owned());
            });
        }

        let mut headers = http::HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("text/plain"),
        );
        assert!(ctx.dispatch_headers(&headers));
        assert_eq!(
            *seen.lock().expect("seen lock"),
            ["content-type: text/plain"]
        );
    }

    #[test]
    fn unhandled_errors_reach_the_gates() {
        let (ctx, root, connected) = context(TransportKind::Streaming);
        ctx.fail(Error::Connect("refused".into()));
        assert_eq!(ctx.status(), Status::Error);
        assert!(!ctx.error_handled());
        assert_eq!(root.error(), Some(Error::Connect("refused".into())));
        assert_eq!(connected.error(), Some(Error::Connect("refused".into())));
    }

    #[test]
    fn handled_errors_stay_off_the_gates() {
        let (ctx, root, _connected) = context(TransportKind::Streaming);
        ctx.functions.register("error", |_: &Payload| {});
        ctx.fail(Error::Connect("refused".into()));
        assert!(ctx.error_handled());
        assert_eq!(root.error(), None);
        assert!(!root.is_done());
    }
}
