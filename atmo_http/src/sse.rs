//! Server-sent events transport.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};

use atmo_core::payload::{Payload, WireBody};
use atmo_core::status::Status;
use atmo_core::transport::{Transport, TransportContext, TransportKind};
use atmo_core::{Error, Event};

use crate::common;

/// The SSE transport.
///
/// Like streaming, but the response body is a stream of `data:` records;
/// one record is one message, however the chunks were cut on the wire.
pub struct SseTransport {
    ctx: Arc<TransportContext>,
    http: reqwest::Client,
}

impl SseTransport {
    /// Start the event stream and return immediately.
    pub fn open(http: reqwest::Client, ctx: Arc<TransportContext>) -> Arc<Self> {
        let transport = Arc::new(SseTransport { ctx, http });
        tokio::spawn(run(transport.clone()));
        transport
    }
}

impl Transport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
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

async fn run(transport: Arc<SseTransport>) {
    let ctx = transport.ctx.clone();

    let url = match common::endpoint_url(ctx.request()) {
        Ok(url) => url,
        Err(error) => {
            ctx.fail(error);
            return;
        }
    };

    tracing::info!(%url, "opening event stream");
    let get = transport
        .http
        .get(url)
        .header(reqwest::header::ACCEPT, "text/event-stream")
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

    let mut parser = RecordParser::default();
    let mut chunks = response.bytes_stream();
    loop {
        let chunk = tokio::select! {
            () = ctx.cancelled() => break,
            chunk = chunks.next() => chunk,
        };
        match chunk {
            Some(Ok(chunk)) => {
                ctx.mark_open();
                for record in parser.feed(&String::from_utf8_lossy(&chunk)) {
                    ctx.deliver(Payload::Text(record));
                }
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

/// Incremental parser for the SSE wire format.
///
/// Accumulates `data:` lines until the blank line that terminates a record;
/// comments and non-data fields (`event:`, `id:`, `retry:`) are ignored.
#[derive(Debug, Default)]
struct RecordParser {
    line_buffer: String,
    data_lines: Vec<String>,
}

impl RecordParser {
    /// Feed one chunk of the body; returns every record it completed.
    fn feed(&mut self, chunk: &str) -> Vec<String> {
        let mut records = Vec::new();
        self.line_buffer.push_str(chunk);

        while let Some(newline) = self.line_buffer.find('\n') {
            let line: String = self.line_buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data_lines.is_empty() {
                    records.push(self.data_lines.join("\n"));
                    self.data_lines.clear();
                }
            } else if let Some(data) = line.strip_prefix("data:") {
                self.data_lines.push(data.strip_prefix(' ').unwrap_or(data).to_owned());
            } else if line.starts_with(':') {
                // Comment; keep-alives arrive this way.
            } else {
                tracing::trace!(line, "ignoring non-data field");
            }
        }
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_end_at_the_blank_line() {
        let mut parser = RecordParser::default();
        assert!(parser.feed("data: hel").is_empty());
        assert!(parser.feed("lo\n").is_empty());
        assert_eq!(parser.feed("\n"), ["hello"]);
    }

    #[test]
    fn multi_line_data_is_joined() {
        let mut parser = RecordParser::default();
        assert_eq!(parser.feed("data: a\ndata: b\n\n"), ["a\nb"]);
    }

    #[test]
    fn comments_and_other_fields_are_ignored() {
        let mut parser = RecordParser::default();
        assert_eq!(
            parser.feed(": keep-alive\nevent: update\nid: 7\ndata: payload\n\n"),
            ["payload"]
        );
    }

    #[test]
    fn crlf_line_endings_are_accepted() {
        let mut parser = RecordParser::default();
        assert_eq!(parser.feed("data: hi\r\n\r\n"), ["hi"]);
    }

    #[test]
    fn several_records_in_one_chunk() {
        let mut parser = RecordParser::default();
        assert_eq!(parser.feed("data: one\n\ndata: two\n\n"), ["one", "two"]);
    }
}
