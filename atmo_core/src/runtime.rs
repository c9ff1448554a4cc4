//! The socket runtime: the write path shared by every transport.

use std::sync::Arc;

use crate::codec;
use crate::error::Error;
use crate::gate::ConnectGate;
use crate::dispatch::FunctionRegistry;
use crate::payload;
use crate::pipeline;
use crate::request::Request;
use crate::status::Status;
use crate::transport::{Transport, TransportKind};

/// Drives writes onto a transport.
///
/// Push transports frame the encoded message directly; polling transports
/// POST it and feed a non-empty response body back through the read
/// pipeline as a synthetic message. Response timeouts are recorded on the
/// root gate without failing the write.
pub struct SocketRuntime {
    transport: Arc<dyn Transport>,
    request: Arc<Request>,
    root: ConnectGate,
    functions: FunctionRegistry,
}

impl SocketRuntime {
    /// A runtime bound to one transport and its root gate.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        request: Arc<Request>,
        root: ConnectGate,
        functions: FunctionRegistry,
    ) -> Self {
        SocketRuntime {
            transport,
            request,
            root,
            functions,
        }
    }

    /// The root gate carrying this socket's terminal errors.
    #[must_use]
    pub fn root(&self) -> &ConnectGate {
        &self.root
    }

    /// Encode and send one message.
    ///
    /// # Errors
    ///
    /// Fails fast on an undrainable message; otherwise settles through the
    /// root gate, surfacing any fatal error recorded on it (including the
    /// invalid-status error raised by writes on a dead WebSocket).
    pub async fn write(&self, message: payload::Outbound) -> Result<(), Error> {
        let encoded = codec::run_encoders(self.request.encoders(), message);

        let status = self.transport.status();
        if self.transport.kind() == TransportKind::WebSocket
            && matches!(status, Status::Close | Status::Error)
        {
            self.transport
                .error(Error::InvalidStatus(status));
            return self.root.finish();
        }

        let body = payload::drain(encoded)?;

        if self.transport.kind().is_push() {
            self.transport.send(body).await?;
        } else {
            match tokio::time::timeout(self.request.request_timeout(), self.transport.send(body))
                .await
            {
                Err(_elapsed) => {
                    tracing::trace!("write response timed out");
                    self.root.record_timeout();
                }
                Ok(Err(error)) => {
                    // Logged but not fatal to the write; the read loop owns
                    // connection-level failure handling.
                    tracing::error!(%error, "write failed");
                }
                Ok(Ok(Some(reply))) => {
                    let event = reply.message_event();
                    pipeline::run(
                        event,
                        reply,
                        self.request.decoders(),
                        &self.functions,
                        self.request.resolver().as_ref(),
                    );
                }
                Ok(Ok(None)) => {}
            }
        }

        self.root.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{Outbound, Payload, WireBody};
    use crate::request::RequestBuilder;
    use crate::status::StatusCell;
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FakeTransport {
        kind: TransportKind,
        status: StatusCell,
        sent: Mutex<Vec<WireBody>>,
        reply: Option<Payload>,
        delay: Option<Duration>,
        root: ConnectGate,
    }

    impl FakeTransport {
        fn new(kind: TransportKind, root: ConnectGate) -> Self {
            FakeTransport {
                kind,
                status: StatusCell::new(),
                sent: Mutex::new(Vec::new()),
                reply: None,
                delay: None,
                root,
            }
        }
    }

    impl Transport for FakeTransport {
        fn kind(&self) -> TransportKind {
            self.kind
        }

        fn status(&self) -> Status {
            self.status.load()
        }

        fn error(&self, error: Error) {
            self.status.store(Status::Error);
            self.root.io_error(error);
        }

        fn error_handled(&self) -> bool {
            false
        }

        fn send(&self, body: WireBody) -> BoxFuture<'_, Result<Option<Payload>, Error>> {
            async move {
                if let Some(delay) = self.delay {
                    tokio::time::sleep(delay).await;
                }
                self.sent.lock().expect("sent lock").push(body);
                Ok(self.reply.clone())
            }
            .boxed()
        }

        fn close(&self) {
            self.status.store(Status::Close);
        }
    }

    fn runtime(transport: Arc<FakeTransport>, root: ConnectGate) -> SocketRuntime {
        let request = Arc::new(RequestBuilder::new().request_timeout(Duration::from_millis(50)).build());
        SocketRuntime::new(transport, request, root, FunctionRegistry::new())
    }

    #[tokio::test]
    async fn websocket_write_frames_the_message() {
        let root = ConnectGate::new();
        let transport = Arc::new(FakeTransport::new(TransportKind::WebSocket, root.clone()));
        transport.status.store(Status::Open);

        let rt = runtime(transport.clone(), root);
        rt.write(Outbound::Text("hello".into())).await.expect("write");

        assert_eq!(
            *transport.sent.lock().expect("sent lock"),
            [WireBody::Text("hello".into())]
        );
    }

    #[tokio::test]
    async fn write_on_closed_websocket_sends_nothing() {
        let root = ConnectGate::new();
        let transport = Arc::new(FakeTransport::new(TransportKind::WebSocket, root.clone()));
        transport.status.store(Status::Close);

        let rt = runtime(transport.clone(), root.clone());
        let result = rt.write(Outbound::Text("hi".into())).await;

        assert_eq!(result, Err(Error::InvalidStatus(Status::Close)));
        assert!(transport.sent.lock().expect("sent lock").is_empty());
        assert_eq!(
            root.error().expect("gate error").to_string(),
            "Invalid Socket Status CLOSE"
        );
    }

    #[tokio::test]
    async fn polling_write_feeds_the_reply_through_dispatch() {
        let root = ConnectGate::new();
        let mut transport = FakeTransport::new(TransportKind::LongPolling, root.clone());
        transport.reply = Some(Payload::Text("pong".into()));
        transport.status.store(Status::Open);
        let transport = Arc::new(transport);

        let functions = FunctionRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            functions.register("message", move |m: &Payload| {
                seen.lock()
                    .expect("seen lock")
                    .push(m.as_text().unwrap_or_default().to_owned());
            });
        }

        let request = Arc::new(RequestBuilder::new().build());
        let rt = SocketRuntime::new(transport, request, root, functions);
        rt.write(Outbound::Text("ping".into())).await.expect("write");

        assert_eq!(*seen.lock().expect("seen lock"), ["pong"]);
    }

    #[tokio::test]
    async fn slow_polling_response_records_a_timeout() {
        let root = ConnectGate::new();
        let mut transport = FakeTransport::new(TransportKind::LongPolling, root.clone());
        transport.delay = Some(Duration::from_millis(200));
        transport.status.store(Status::Open);
        let transport = Arc::new(transport);

        let rt = runtime(transport, root.clone());
        rt.write(Outbound::Text("ping".into())).await.expect("write");

        assert!(root.timed_out());
        assert!(root.error().is_none());
    }

    #[tokio::test]
    async fn custom_value_without_an_encoder_is_rejected() {
        let root = ConnectGate::new();
        let transport = Arc::new(FakeTransport::new(TransportKind::WebSocket, root.clone()));
        transport.status.store(Status::Open);

        struct Ping;

        let rt = runtime(transport.clone(), root);
        let error = rt
            .write(Outbound::custom(Ping))
            .await
            .expect_err("no encoder registered");
        assert!(matches!(error, Error::NoEncoder(_)));
        assert!(error.to_string().contains("Ping"));
        assert!(transport.sent.lock().expect("sent lock").is_empty());
    }

    #[tokio::test]
    async fn encoders_reduce_custom_values_to_the_wire() {
        use crate::codec::Encoder;

        #[derive(Debug)]
        struct Ping {
            count: u32,
        }

        struct PingEncoder;

        impl Encoder for PingEncoder {
            fn accepts(&self, message: &Outbound) -> bool {
                matches!(message, Outbound::Custom { .. })
            }

            fn encode(&self, message: Outbound) -> Outbound {
                match message {
                    Outbound::Custom { value, type_name } => match value.downcast::<Ping>() {
                        Ok(ping) => Outbound::Text(format!("ping:{}", ping.count)),
                        Err(value) => Outbound::Custom { value, type_name },
                    },
                    other => other,
                }
            }
        }

        let root = ConnectGate::new();
        let transport = Arc::new(FakeTransport::new(TransportKind::WebSocket, root.clone()));
        transport.status.store(Status::Open);

        let request = Arc::new(
            RequestBuilder::new()
                .encoder(Arc::new(PingEncoder))
                .build(),
        );
        let rt = SocketRuntime::new(
            transport.clone(),
            request,
            root,
            FunctionRegistry::new(),
        );
        rt.write(Outbound::custom(Ping { count: 3 }))
            .await
            .expect("write");

        assert_eq!(
            *transport.sent.lock().expect("sent lock"),
            [WireBody::Text("ping:3".into())]
        );
    }

    #[tokio::test]
    async fn readers_are_drained_before_sending() {
        let root = ConnectGate::new();
        let transport = Arc::new(FakeTransport::new(TransportKind::WebSocket, root.clone()));
        transport.status.store(Status::Open);

        let rt = runtime(transport.clone(), root);
        rt.write(Outbound::ByteReader(Box::new(&b"abc"[..])))
            .await
            .expect("write");

        assert_eq!(
            *transport.sent.lock().expect("sent lock"),
            [WireBody::Binary(bytes::Bytes::from_static(b"abc"))]
        );
    }
}
