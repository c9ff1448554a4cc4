//! Plumbing shared by the HTTP transports.

use std::sync::Arc;

use bytes::Bytes;
use url::Url;

use atmo_core::payload::{Payload, WireBody};
use atmo_core::request::Request;
use atmo_core::Error;

/// Build the endpoint URL from the request URI and a fresh snapshot of the
/// live query parameters. Taken per request, so the tracking UUID written
/// by the handshake shows up on every later poll and write.
pub(crate) fn endpoint_url(request: &Arc<Request>) -> Result<Url, Error> {
    let uri = request.uri().to_string();
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

/// Issue a request, bounding the wait for its headers when a read timeout
/// is configured.
pub(crate) async fn send_with_read_timeout(
    builder: reqwest::RequestBuilder,
    read_timeout: Option<std::time::Duration>,
) -> Result<reqwest::Response, Error> {
    match read_timeout {
        Some(limit) => match tokio::time::timeout(limit, builder.send()).await {
            Ok(result) => result.map_err(net_error),
            Err(_elapsed) => Err(Error::Timeout),
        },
        None => builder.send().await.map_err(net_error),
    }
}

pub(crate) fn net_error(error: reqwest::Error) -> Error {
    if error.is_timeout() {
        Error::Timeout
    } else if error.is_connect() {
        Error::Connect(error.to_string())
    } else {
        Error::Io(error.to_string())
    }
}

/// Decode a response body or chunk into a payload, honouring the request's
/// binary flag.
pub(crate) fn body_payload(request: &Request, bytes: Bytes) -> Payload {
    if request.is_binary() {
        return Payload::Binary(bytes);
    }
    match String::from_utf8(bytes.to_vec()) {
        Ok(text) => Payload::Text(text),
        Err(e) => Payload::Binary(e.into_bytes().into()),
    }
}

/// The shared write path: one request per message, response body handed
/// back for re-injection into the read pipeline.
pub(crate) async fn write(
    http: &reqwest::Client,
    request: &Arc<Request>,
    body: WireBody,
) -> Result<Option<Payload>, Error> {
    let url = endpoint_url(request)?;
    let builder = http
        .request(request.method().clone(), url)
        .headers(request.headers().clone());
    let builder = match body {
        WireBody::Text(text) => builder.body(text),
        WireBody::Binary(bytes) => builder.body(bytes),
    };

    let response = builder.send().await.map_err(net_error)?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::Io(format!("write rejected with status {status}")));
    }

    let bytes = response.bytes().await.map_err(net_error)?;
    if bytes.is_empty() {
        Ok(None)
    } else {
        Ok(Some(body_payload(request, bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atmo_core::request::RequestBuilder;

    #[test]
    fn endpoint_url_reflects_live_query_state() {
        let request = Arc::new(
            RequestBuilder::new()
                .uri("http://example.com/chat".parse().expect("uri"))
                .build(),
        );
        request.query().set("X-Atmosphere-tracking-id", "0");

        let url = endpoint_url(&request).expect("url");
        assert_eq!(
            url.as_str(),
            "http://example.com/chat?X-Atmosphere-tracking-id=0"
        );

        // A later write by the handshake decoder shows up on the next call.
        request.query().set("X-Atmosphere-tracking-id", "5a3f-uuid");
        let url = endpoint_url(&request).expect("url");
        assert_eq!(
            url.as_str(),
            "http://example.com/chat?X-Atmosphere-tracking-id=5a3f-uuid"
        );
    }

    #[test]
    fn binary_requests_keep_bodies_opaque() {
        let request = RequestBuilder::new().binary(true).build();
        let payload = body_payload(&request, Bytes::from_static(b"data"));
        assert!(matches!(payload, Payload::Binary(_)));

        let request = RequestBuilder::new().build();
        let payload = body_payload(&request, Bytes::from_static(b"data"));
        assert_eq!(payload, Payload::Text("data".into()));
    }
}
