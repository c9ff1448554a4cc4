//! HTTP long-polling transport.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, info};

use atmo_core::payload::{Payload, WireBody};
use atmo_core::status::Status;
use atmo_core::transport::{Transport, TransportContext, TransportKind};
use atmo_core::{Error, Event};

use crate::common;

/// The long-polling transport.
///
/// Each poll is an independent GET whose response body is one message; on
/// completion the status dips to `REOPENED` and the poll is re-issued, up
/// to the request's maximum request count. Writes go out as separate
/// requests.
pub struct LongPollingTransport {
    ctx: Arc<TransportContext>,
    http: reqwest::Client,
}

impl LongPollingTransport {
    /// Start polling and return immediately; the context's gates signal
    /// once the first response arrives.
    pub fn open(http: reqwest::Client, ctx: Arc<TransportContext>) -> Arc<Self> {
        let transport = Arc::new(LongPollingTransport { ctx, http });
        tokio::spawn(run(transport.clone()));
        transport
    }
}

impl Transport for LongPollingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::LongPolling
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

async fn run(transport: Arc<LongPollingTransport>) {
    let ctx = transport.ctx.clone();
    let max_requests = ctx.request().max_polling_requests();
    let mut polls = 0usize;

    info!(max_requests = ?max_requests, "starting poll loop");
    loop {
        if let Some(max) = max_requests {
            if polls >= max {
                debug!(polls, "maximum request count reached");
                ctx.mark_close();
                break;
            }
        }
        polls += 1;
        ctx.reissue();

        // The URL is rebuilt every cycle so the tracking UUID negotiated by
        // the handshake rides on the second and later polls.
        let url = match common::endpoint_url(ctx.request()) {
            Ok(url) => url,
            Err(error) => {
                ctx.fail(error);
                break;
            }
        };

        let response = tokio::select! {
            () = ctx.cancelled() => break,
            response = transport
                .http
                .get(url)
                .headers(ctx.request().headers().clone())
                .send() => response,
        };

        let response = match response {
            Ok(response) => response,
            Err(error) => {
                ctx.fail(common::net_error(error));
                break;
            }
        };

        let status = response.status();
        ctx.dispatch(Event::Status, Payload::Text(status.as_u16().to_string()));
        ctx.dispatch_headers(response.headers());
        if !status.is_success() {
            ctx.fail(Error::Io(format!("poll rejected with status {status}")));
            break;
        }

        let body = tokio::select! {
            () = ctx.cancelled() => break,
            body = response.bytes() => body,
        };
        let body = match body {
            Ok(body) => body,
            Err(error) => {
                ctx.fail(common::net_error(error));
                break;
            }
        };

        ctx.mark_open();
        if body.is_empty() {
            debug!(polls, "empty poll, re-arming");
        } else {
            ctx.deliver(common::body_payload(ctx.request(), body));
        }
        ctx.mark_reopened();
    }
    info!(polls, "poll loop exited");
}
