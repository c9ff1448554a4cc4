//! HTTP streaming transport: one long-lived chunked response.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};

use atmo_core::payload::{Payload, WireBody};
use atmo_core::status::Status;
use atmo_core::transport::{Transport, TransportContext, TransportKind};
use atmo_core::{Error, Event};

use crate::common;

/// The streaming transport.
///
/// A single GET whose body never ends; every chunk the server flushes is
/// one message. Writes go out as separate requests.
pub struct StreamingTransport {
    ctx: Arc<TransportContext>,
    http: reqwest::Client,
}

impl StreamingTransport {
    /// Start the stream and return immediately; the context's gates signal
    /// when the first bytes arrive or the connection fails.
    pub fn open(http: reqwest::Client, ctx: Arc<TransportContext>) -> Arc<Self> {
        let transport = Arc::new(StreamingTransport { ctx, http });
        tokio::spawn(run(transport.clone()));
        transport
    }
}

impl Transport for StreamingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Streaming
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
        async move { common::write(&self.http, self.ctx.request(), body).await }.boxed()
    }

    fn close(&self) {
        self.ctx.mark_close();
    }
}

async fn run(transport: Arc<StreamingTransport>) {
    let ctx = transport.ctx.clone();

    let url = match common::endpoint_url(ctx.request()) {
        Ok(url) => url,
        Err(error) => {
            ctx.fail(error);
            return;
        }
    };

    tracing::info!(%url, "opening http stream");
    let get = transport
        .http
        .get(url)
        .headers(ctx.request().headers().clone());
    let response = tokio::select! {
        () = ctx.cancelled() => return,
        response = common::send_with_read_timeout(get, ctx.request().read_timeout()) => response,
    };

    let response = match response {
        Ok(response) => response,
        Err(error) => {
            ctx.fail(error);
            return;
        }
    };

    let status = response.status();
    ctx.dispatch(Event::Status, Payload::Text(status.as_u16().to_string()));
    ctx.dispatch_headers(response.headers());
    if !status.is_success() {
        ctx.fail(Error::Connect(format!("unexpected status {status}")));
        return;
    }

    let mut chunks = response.bytes_stream();
    loop {
        let chunk = tokio::select! {
            () = ctx.cancelled() => break,
            chunk = chunks.next() => chunk,
        };
        match chunk {
            Some(Ok(chunk)) => {
                ctx.mark_open();
                ctx.deliver(common::body_payload(ctx.request(), chunk));
            }
            Some(Err(error)) => {
                ctx.fail(common::net_error(error));
                break;
            }
            None => {
                ctx.mark_close();
                break;
            }
        }
    }
}
