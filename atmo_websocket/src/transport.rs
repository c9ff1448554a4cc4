//! WebSocket transport implementation.

use std::sync::Arc;

use async_tungstenite::tokio::{connect_async, ConnectStream};
use async_tungstenite::WebSocketStream;
use futures::future::BoxFuture;
use futures::stream::{SplitSink, StreamExt};
use futures::{FutureExt, SinkExt};
use tungstenite::client::IntoClientRequest;
use tungstenite::Message;
use url::Url;

use atmo_core::payload::{Payload, WireBody};
use atmo_core::request::Request;
use atmo_core::status::Status;
use atmo_core::transport::{Transport, TransportContext, TransportKind};
use atmo_core::Error;

type WsSink = SplitSink<WebSocketStream<ConnectStream>, Message>;

/// The WebSocket transport.
///
/// Connecting, reading, and status transitions run on a spawned task; the
/// sender half sits behind an async mutex so writes may come from any task.
pub struct WebSocketTransport {
    ctx: Arc<TransportContext>,
    writer: Arc<tokio::sync::Mutex<Option<WsSink>>>,
}

impl WebSocketTransport {
    /// Start connecting and return immediately; the context's gates signal
    /// when the connection is usable or failed.
    pub fn open(ctx: Arc<TransportContext>) -> Arc<Self> {
        let transport = Arc::new(WebSocketTransport {
            ctx,
            writer: Arc::new(tokio::sync::Mutex::new(None)),
        });
        tokio::spawn(run(transport.clone()));
        transport
    }
}

impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    fn status(&self) -> Status {
        self.ctx.status()
    }

    fn error(&self, error: Error) {
        self.ctx.fail(error);
    }

    fn error_handled(&self) -> bool {
        self.ctx.error_handled()
    }

    fn send(&self, body: WireBody) -> BoxFuture<'_, Result<Option<Payload>, Error>> {
        async move {
            let mut writer = self.writer.lock().await;
            let Some(sink) = writer.as_mut() else {
                return Err(Error::Closed);
            };
            let frame = match body {
                WireBody::Text(text) => Message::text(text),
                WireBody::Binary(bytes) => Message::binary(bytes),
            };
            sink.send(frame).await.map_err(ws_error)?;
            Ok(None)
        }
        .boxed()
    }

    fn close(&self) {
        if self.ctx.status() == Status::Close {
            return;
        }
        self.ctx.mark_close();
        // Finish the closing handshake off-loop; the read task has already
        // been cancelled.
        let writer = self.writer.clone();
        tokio::spawn(async move {
            let mut writer = writer.lock().await;
            if let Some(sink) = writer.as_mut() {
                if let Err(error) = sink.send(Message::Close(None)).await {
                    tracing::debug!(%error, "close frame not delivered");
                }
                let _ = sink.close().await;
            }
            *writer = None;
        });
    }
}

async fn run(transport: Arc<WebSocketTransport>) {
    let ctx = transport.ctx.clone();

    let url = match ws_url(ctx.request()) {
        Ok(url) => url,
        Err(error) => {
            ctx.fail(error);
            return;
        }
    };

    let mut handshake = match url.as_str().into_client_request() {
        Ok(handshake) => handshake,
        Err(error) => {
            ctx.fail(ws_error(error));
            return;
        }
    };
    for (name, value) in ctx.request().headers() {
        handshake.headers_mut().append(name.clone(), value.clone());
    }

    tracing::info!(%url, "connecting websocket");
    let connected = tokio::select! {
        () = ctx.cancelled() => return,
        result = connect_async(handshake) => result,
    };

    let stream = match connected {
        Ok((stream, response)) => {
            ctx.dispatch_headers(response.headers());
            stream
        }
        Err(error) => {
            ctx.fail(ws_error(error));
            return;
        }
    };

    let (sink, mut source) = stream.split();
    *transport.writer.lock().await = Some(sink);
    ctx.mark_open();

    loop {
        let frame = tokio::select! {
            () = ctx.cancelled() => break,
            frame = source.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                ctx.deliver(Payload::Text(text.as_str().to_owned()));
            }
            Some(Ok(Message::Binary(bytes))) => {
                ctx.deliver(Payload::Binary(bytes.into()));
            }
            Some(Ok(Message::Ping(body))) => {
                let mut writer = transport.writer.lock().await;
                if let Some(sink) = writer.as_mut() {
                    if let Err(error) = sink.send(Message::Pong(body)).await {
                        tracing::debug!(%error, "pong not delivered");
                    }
                }
            }
            Some(Ok(Message::Pong(_))) => {}
            Some(Ok(Message::Frame(_))) => {
                // Raw frames never surface from a completed read.
            }
            Some(Ok(Message::Close(_))) | None => {
                ctx.mark_close();
                break;
            }
            Some(Err(error)) => {
                ctx.fail(ws_error(error));
                break;
            }
        }
    }
}

/// Build the connection URL: `ws`/`wss` scheme plus the live query
/// parameters appended after anything already on the URI.
fn ws_url(request: &Arc<Request>) -> Result<Url, Error> {
    let mut uri = request.uri().to_string();
    if let Some(rest) = uri.strip_prefix("http://") {
        uri = format!("ws://{rest}");
    } else if let Some(rest) = uri.strip_prefix("https://") {
        uri = format!("wss://{rest}");
    }

    let mut url =
        Url::parse(&uri).map_err(|e| Error::Connect(format!("invalid uri {uri:?}: {e}")))?;
    let params = request.query().snapshot();
    if !params.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in params {
            pairs.append_pair(&key, &value);
        }
    }
    Ok(url)
}

fn ws_error(error: tungstenite::Error) -> Error {
    Error::Io(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use atmo_core::request::RequestBuilder;

    #[test]
    fn http_schemes_are_rewritten_and_query_merged() {
        let request = RequestBuilder::new()
            .uri("http://example.com/chat".parse().expect("uri"))
            .query_param("X-Atmosphere-tracking-id", "0")
            .build();
        let url = ws_url(&Arc::new(request)).expect("url");
        assert_eq!(url.scheme(), "ws");
        assert_eq!(
            url.as_str(),
            "ws://example.com/chat?X-Atmosphere-tracking-id=0"
        );
    }

    #[test]
    fn ws_schemes_pass_through() {
        let request = RequestBuilder::new()
            .uri("ws://example.com/chat".parse().expect("uri"))
            .build();
        let url = ws_url(&Arc::new(request)).expect("url");
        assert_eq!(url.scheme(), "ws");
    }
}
