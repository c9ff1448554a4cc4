//! The request model and its builders.
//!
//! A [`Request`] is the immutable description of a connection: target URI,
//! headers, query parameters, transport preferences, codec chains, and
//! timeouts. It is built once, handed to `Socket::open`, and shared
//! read-only for the life of the socket, with a single exception: the
//! tracking-id query parameter, written exactly once by the protocol
//! handshake. The query multimap therefore lives behind a shared handle.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};

use crate::codec::protocol::{HandshakeState, ProtocolBinaryDecoder, ProtocolTextDecoder};
use crate::codec::track_message_size::TrackMessageSizeDecoder;
use crate::codec::{Decoder, DecoderChain, Encoder};
use crate::dispatch::{DefaultFunctionResolver, FunctionResolver};
use crate::transport::TransportKind;
use crate::{
    DEFAULT_PADDING_SIZE, DEFAULT_TRACK_DELIMITER, FRAMEWORK_PARAM, PROTOCOL_PARAM,
    PROTOCOL_VERSION, TRACKING_ID_PARAM, TRACK_MESSAGE_SIZE_PARAM, TRANSPORT_PARAM,
};

/// Default time allowed for a transport to reach `OPEN`.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time allowed for a write's HTTP response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// The shared query-parameter multimap.
///
/// Order and duplicate keys are preserved. Clones alias the same map, which
/// is how the handshake decoder's tracking-id write becomes visible to every
/// later poll and POST.
#[derive(Clone, Default)]
pub struct QueryParams {
    inner: Arc<RwLock<Vec<(String, String)>>>,
}

impl QueryParams {
    /// An empty map.
    #[must_use]
    pub fn new() -> Self {
        QueryParams::default()
    }

    /// Replace every value under `key` with a single value.
    pub fn set(&self, key: &str, value: &str) {
        let mut params = self.write();
        params.retain(|(k, _)| k != key);
        params.push((key.to_owned(), value.to_owned()));
    }

    /// Add a value under `key`, keeping existing ones.
    pub fn append(&self, key: &str, value: &str) {
        self.write().push((key.to_owned(), value.to_owned()));
    }

    /// The first value under `key`, if any.
    #[must_use]
    pub fn first(&self, key: &str) -> Option<String> {
        self.read()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Whether any value exists under `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.read().iter().any(|(k, _)| k == key)
    }

    /// A point-in-time copy of every pair, in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, String)> {
        self.read().clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<(String, String)>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<(String, String)>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for QueryParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("QueryParams").field(&self.snapshot()).finish()
    }
}

/// Broadcaster-cache flavours understood by the server.
///
/// Must match the cache installed server-side; purely configuration from
/// the client's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheKind {
    /// Header-driven broadcast cache.
    HeaderBroadcastCache,
    /// UUID-keyed broadcaster cache.
    UuidBroadcasterCache,
    /// Session-scoped broadcast cache.
    SessionBroadcastCache,
    /// No server-side cache.
    #[default]
    NoBroadcastCache,
}

/// Protocol-level settings recorded on a request built with
/// [`AtmosphereRequestBuilder`].
#[derive(Debug, Clone, Copy)]
pub struct AtmosphereSettings {
    /// Server-side broadcaster cache flavour.
    pub cache: CacheKind,
    /// Whether messages arrive length-prefixed.
    pub track_message_length: bool,
    /// Delimiter between length prefix and body.
    pub delimiter: char,
    /// Padding run length the server emits.
    pub padding_size: usize,
    /// Whether the in-band handshake is expected.
    pub protocol: bool,
}

/// An immutable connection descriptor.
pub struct Request {
    uri: Uri,
    method: Method,
    headers: HeaderMap,
    query: QueryParams,
    transports: Vec<TransportKind>,
    encoders: Vec<Arc<dyn Encoder>>,
    decoders: DecoderChain,
    resolver: Arc<dyn FunctionResolver>,
    connect_timeout: Duration,
    read_timeout: Option<Duration>,
    request_timeout: Duration,
    max_polling_requests: Option<usize>,
    binary: bool,
    atmosphere: Option<AtmosphereSettings>,
}

impl Request {
    /// Target URI.
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// HTTP method used for writes.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request headers, sent on opens and writes alike.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The live query-parameter map.
    #[must_use]
    pub fn query(&self) -> &QueryParams {
        &self.query
    }

    /// Enabled transports, in preference order.
    #[must_use]
    pub fn transports(&self) -> &[TransportKind] {
        &self.transports
    }

    /// The outbound encoder chain.
    #[must_use]
    pub fn encoders(&self) -> &[Arc<dyn Encoder>] {
        &self.encoders
    }

    /// The live inbound decoder chain.
    #[must_use]
    pub fn decoders(&self) -> &DecoderChain {
        &self.decoders
    }

    /// The function resolver consulted during dispatch.
    #[must_use]
    pub fn resolver(&self) -> &Arc<dyn FunctionResolver> {
        &self.resolver
    }

    /// Time allowed for a transport to reach `OPEN`.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Time allowed for a streaming response to produce its headers,
    /// `None` for unbounded.
    #[must_use]
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    /// Time allowed for a write's HTTP response.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Cap on long-polling cycles, `None` for unlimited.
    #[must_use]
    pub fn max_polling_requests(&self) -> Option<usize> {
        self.max_polling_requests
    }

    /// Whether inbound bodies should stay binary instead of being decoded
    /// as UTF-8 text.
    #[must_use]
    pub fn is_binary(&self) -> bool {
        self.binary
    }

    /// Protocol settings, present when built by [`AtmosphereRequestBuilder`].
    #[must_use]
    pub fn atmosphere(&self) -> Option<&AtmosphereSettings> {
        self.atmosphere.as_ref()
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("uri", &self.uri)
            .field("method", &self.method)
            .field("transports", &self.transports)
            .field("query", &self.query)
            .field("decoders", &self.decoders)
            .finish_non_exhaustive()
    }
}

/// Builder for a plain [`Request`], without protocol handling.
pub struct RequestBuilder {
    uri: Uri,
    method: Method,
    headers: HeaderMap,
    query: QueryParams,
    transports: Vec<TransportKind>,
    encoders: Vec<Arc<dyn Encoder>>,
    decoders: DecoderChain,
    resolver: Arc<dyn FunctionResolver>,
    connect_timeout: Duration,
    read_timeout: Option<Duration>,
    request_timeout: Duration,
    max_polling_requests: Option<usize>,
    binary: bool,
}

impl RequestBuilder {
    /// A builder with the stock defaults: POST writes, thirty-second
    /// connect timeout, unlimited polling.
    #[must_use]
    pub fn new() -> Self {
        RequestBuilder {
            uri: Uri::from_static("http://localhost"),
            method: Method::POST,
            headers: HeaderMap::new(),
            query: QueryParams::new(),
            transports: Vec::new(),
            encoders: Vec::new(),
            decoders: DecoderChain::new(),
            resolver: Arc::new(DefaultFunctionResolver),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_polling_requests: None,
            binary: false,
        }
    }

    /// Set the target URI.
    #[must_use]
    pub fn uri(mut self, uri: Uri) -> Self {
        self.uri = uri;
        self
    }

    /// Set the HTTP method used for writes.
    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Append a header; repeated names accumulate.
    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Append a query parameter; repeated keys accumulate.
    #[must_use]
    pub fn query_param(self, key: &str, value: &str) -> Self {
        self.query.append(key, value);
        self
    }

    /// Enable a transport; order of calls is the fallback order.
    #[must_use]
    pub fn transport(mut self, kind: TransportKind) -> Self {
        self.transports.push(kind);
        self
    }

    /// Append an encoder stage.
    #[must_use]
    pub fn encoder(mut self, encoder: Arc<dyn Encoder>) -> Self {
        self.encoders.push(encoder);
        self
    }

    /// Append a decoder stage.
    #[must_use]
    pub fn decoder(self, decoder: Arc<dyn Decoder>) -> Self {
        self.decoders.push(decoder);
        self
    }

    /// Replace the function resolver.
    #[must_use]
    pub fn resolver(mut self, resolver: impl FunctionResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Bound the wait for a streaming response's headers.
    #[must_use]
    pub const fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Set the write-response timeout.
    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Cap the number of long-polling cycles.
    #[must_use]
    pub const fn max_requests(mut self, max: usize) -> Self {
        self.max_polling_requests = Some(max);
        self
    }

    /// Keep inbound bodies binary instead of decoding UTF-8 text.
    #[must_use]
    pub const fn binary(mut self, binary: bool) -> Self {
        self.binary = binary;
        self
    }

    /// Finish the request.
    #[must_use]
    pub fn build(self) -> Request {
        self.build_with(None)
    }

    fn build_with(self, atmosphere: Option<AtmosphereSettings>) -> Request {
        Request {
            uri: self.uri,
            method: self.method,
            headers: self.headers,
            query: self.query,
            transports: self.transports,
            encoders: self.encoders,
            decoders: self.decoders,
            resolver: self.resolver,
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            request_timeout: self.request_timeout,
            max_polling_requests: self.max_polling_requests,
            binary: self.binary,
            atmosphere,
        }
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        RequestBuilder::new()
    }
}

/// Builder for protocol-enabled requests.
///
/// On top of [`RequestBuilder`] this injects the handshake query parameters
/// and prepends the protocol decoders. `build` consumes the builder, so the
/// decoders cannot be injected twice.
pub struct AtmosphereRequestBuilder {
    inner: RequestBuilder,
    cache: CacheKind,
    track_message_length: bool,
    delimiter: char,
    padding_size: usize,
    enable_protocol: bool,
}

impl AtmosphereRequestBuilder {
    /// A builder with the protocol enabled and server defaults.
    #[must_use]
    pub fn new() -> Self {
        AtmosphereRequestBuilder {
            inner: RequestBuilder::new(),
            cache: CacheKind::default(),
            track_message_length: false,
            delimiter: DEFAULT_TRACK_DELIMITER,
            padding_size: DEFAULT_PADDING_SIZE,
            enable_protocol: true,
        }
    }

    /// Set the target URI.
    #[must_use]
    pub fn uri(mut self, uri: Uri) -> Self {
        self.inner = self.inner.uri(uri);
        self
    }

    /// Set the HTTP method used for writes.
    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.inner = self.inner.method(method);
        self
    }

    /// Append a header; repeated names accumulate.
    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.inner = self.inner.header(name, value);
        self
    }

    /// Append a query parameter; repeated keys accumulate.
    #[must_use]
    pub fn query_param(mut self, key: &str, value: &str) -> Self {
        self.inner = self.inner.query_param(key, value);
        self
    }

    /// Enable a transport and advertise the first one in the
    /// `X-Atmosphere-Transport` query parameter.
    #[must_use]
    pub fn transport(mut self, kind: TransportKind) -> Self {
        if !self.inner.query.contains(TRANSPORT_PARAM) {
            self.inner.query.append(TRANSPORT_PARAM, kind.token());
        }
        self.inner = self.inner.transport(kind);
        self
    }

    /// Append an encoder stage.
    #[must_use]
    pub fn encoder(mut self, encoder: Arc<dyn Encoder>) -> Self {
        self.inner = self.inner.encoder(encoder);
        self
    }

    /// Append a decoder stage.
    #[must_use]
    pub fn decoder(mut self, decoder: Arc<dyn Decoder>) -> Self {
        self.inner = self.inner.decoder(decoder);
        self
    }

    /// Replace the function resolver.
    #[must_use]
    pub fn resolver(mut self, resolver: impl FunctionResolver + 'static) -> Self {
        self.inner = self.inner.resolver(resolver);
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.inner = self.inner.connect_timeout(timeout);
        self
    }

    /// Bound the wait for a streaming response's headers.
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.inner = self.inner.read_timeout(timeout);
        self
    }

    /// Set the write-response timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.inner = self.inner.request_timeout(timeout);
        self
    }

    /// Cap the number of long-polling cycles.
    #[must_use]
    pub fn max_requests(mut self, max: usize) -> Self {
        self.inner = self.inner.max_requests(max);
        self
    }

    /// Keep inbound bodies binary instead of decoding UTF-8 text.
    #[must_use]
    pub fn binary(mut self, binary: bool) -> Self {
        self.inner = self.inner.binary(binary);
        self
    }

    /// Select the server-side broadcaster cache flavour.
    #[must_use]
    pub const fn cache(mut self, cache: CacheKind) -> Self {
        self.cache = cache;
        self
    }

    /// Expect length-prefixed messages.
    #[must_use]
    pub const fn track_message_length(mut self, track: bool) -> Self {
        self.track_message_length = track;
        self
    }

    /// Delimiter between length prefix and body.
    #[must_use]
    pub const fn track_message_length_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Padding run length emitted by the server.
    #[must_use]
    pub const fn padding_size(mut self, padding_size: usize) -> Self {
        self.padding_size = padding_size;
        self
    }

    /// Toggle the in-band handshake.
    #[must_use]
    pub const fn enable_protocol(mut self, enable: bool) -> Self {
        self.enable_protocol = enable;
        self
    }

    /// Finish the request, injecting handshake parameters and decoders.
    ///
    /// Consuming the builder is what makes the injection single-shot.
    #[must_use]
    pub fn build(self) -> Request {
        let query = self.inner.query.clone();
        let decoders = self.inner.decoders.clone();

        if self.enable_protocol {
            query.set(FRAMEWORK_PARAM, PROTOCOL_VERSION);
            query.set(TRACKING_ID_PARAM, "0");
            query.set(PROTOCOL_PARAM, "true");

            for value in self.inner.headers.get_all(CONTENT_TYPE) {
                if let Ok(value) = value.to_str() {
                    query.append("Content-Type", value);
                }
            }

            let state = HandshakeState::new(
                query.clone(),
                self.delimiter,
                self.padding_size,
                self.track_message_length,
            );
            decoders.insert(0, Arc::new(ProtocolTextDecoder::new(state.clone())));
            decoders.insert(0, Arc::new(ProtocolBinaryDecoder::new(state)));
        }

        if self.track_message_length {
            query.set(TRACK_MESSAGE_SIZE_PARAM, "true");
            decoders.insert(
                0,
                Arc::new(TrackMessageSizeDecoder::new(
                    self.delimiter,
                    self.enable_protocol,
                )),
            );
        }

        self.inner.build_with(Some(AtmosphereSettings {
            cache: self.cache,
            track_message_length: self.track_message_length,
            delimiter: self.delimiter,
            padding_size: self.padding_size,
            protocol: self.enable_protocol,
        }))
    }
}

impl Default for AtmosphereRequestBuilder {
    fn default() -> Self {
        AtmosphereRequestBuilder::new()
    }
}
