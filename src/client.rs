//! Typed API clients.
//!
//! [`ApiClient`] is the surface callers program against. [`ResilientClient`] runs every
//! call through a [`ResilientTransport`] and maps the final response onto
//! [`ClientError`]; [`crate::CachingClient`] decorates it with response caching.

use crate::codec::{Codec, JsonCodec};
use crate::error::{ClientError, TransientFailure};
use crate::headers::HeaderSet;
use crate::retry::{classify_status, Classification};
use crate::stack::ResilientTransport;
use crate::transport::{HttpRequest, HttpResponse, Transport};
use async_trait::async_trait;
use http::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Per-call knobs.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Layered over the client's default headers; same-named headers win.
    pub headers: HeaderSet,
    /// Overrides the TTL resolver for this call. Ignored by non-caching clients.
    pub cache_duration: Option<Duration>,
    /// Forwarded to the transport. Falls back to the client's default timeout.
    pub timeout: Option<Duration>,
    pub cancel: CancellationToken,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_headers(mut self, headers: HeaderSet) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_cache_duration(mut self, duration: Duration) -> Self {
        self.cache_duration = Some(duration);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Typed HTTP calls. A caller sees either the decoded value or one terminal error.
#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn get<R>(&self, uri: &str, options: CallOptions) -> Result<R, ClientError>
    where
        R: DeserializeOwned + Clone + Send + Sync + 'static;

    async fn post<R, B>(&self, uri: &str, body: &B, options: CallOptions) -> Result<R, ClientError>
    where
        R: DeserializeOwned + Send + 'static,
        B: Serialize + Sync + ?Sized;

    async fn put<R, B>(&self, uri: &str, body: &B, options: CallOptions) -> Result<R, ClientError>
    where
        R: DeserializeOwned + Send + 'static,
        B: Serialize + Sync + ?Sized;

    async fn patch<R, B>(&self, uri: &str, body: &B, options: CallOptions) -> Result<R, ClientError>
    where
        R: DeserializeOwned + Send + 'static,
        B: Serialize + Sync + ?Sized;

    async fn delete<R>(&self, uri: &str, options: CallOptions) -> Result<R, ClientError>
    where
        R: DeserializeOwned + Send + 'static;
}

/// Client without caching: resilience, status mapping and decoding.
#[derive(Debug, Clone)]
pub struct ResilientClient<T, C = JsonCodec> {
    transport: ResilientTransport<T>,
    codec: C,
    default_headers: HeaderSet,
    default_timeout: Option<Duration>,
}

impl<T: Transport> ResilientClient<T, JsonCodec> {
    pub fn new(transport: ResilientTransport<T>) -> Self {
        Self::with_codec(transport, JsonCodec)
    }
}

impl<T: Transport, C: Codec> ResilientClient<T, C> {
    pub fn with_codec(transport: ResilientTransport<T>, codec: C) -> Self {
        Self { transport, codec, default_headers: HeaderSet::new(), default_timeout: None }
    }

    /// Headers sent with every request.
    pub fn with_default_headers(mut self, headers: HeaderSet) -> Self {
        self.default_headers = headers;
        self
    }

    pub fn default_headers(&self) -> &HeaderSet {
        &self.default_headers
    }

    /// Timeout for requests whose [`CallOptions`] carry none.
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    pub fn transport(&self) -> &ResilientTransport<T> {
        &self.transport
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Build a request carrying the default headers overlaid with `headers`, and `timeout`
    /// or else the default timeout.
    pub fn request(
        &self,
        method: Method,
        uri: &str,
        headers: &HeaderSet,
        body: Option<Vec<u8>>,
        timeout: Option<Duration>,
    ) -> HttpRequest {
        let mut request = HttpRequest::new(method, uri)
            .with_headers(self.default_headers.merged_with(headers))
            .with_timeout(timeout.or(self.default_timeout));
        request.body = body;
        request
    }

    /// Send through the resilience stack and map the final status.
    ///
    /// # Errors
    /// Transient statuses that outlived the retries become
    /// [`ClientError::TransientTransportFailure`]; other 4xx become
    /// [`ClientError::PermanentClientError`].
    pub async fn send(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, ClientError> {
        let response = self.transport.execute(request, cancel).await?;
        match classify_status(response.status) {
            Classification::Transient => Err(ClientError::TransientTransportFailure(
                TransientFailure::Status(response.status),
            )),
            Classification::Permanent => {
                Err(ClientError::PermanentClientError { status: response.status })
            }
            Classification::Success | Classification::Cancelled => Ok(response),
        }
    }

    /// Decode a response body. An empty body decodes as JSON `null`, so `()` and
    /// `Option<_>` work for bodiless responses.
    pub fn decode<R: DeserializeOwned>(&self, response: &HttpResponse) -> Result<R, ClientError> {
        let body: &[u8] = if response.body.is_empty() { b"null" } else { &response.body };
        Ok(self.codec.decode(body)?)
    }

    pub fn encode<B: Serialize + ?Sized>(&self, body: &B) -> Result<Vec<u8>, ClientError> {
        Ok(self.codec.encode(body)?)
    }

    /// Full call: build, send, decode.
    pub async fn call<R: DeserializeOwned>(
        &self,
        method: Method,
        uri: &str,
        body: Option<Vec<u8>>,
        options: &CallOptions,
    ) -> Result<R, ClientError> {
        let request = self.request(method, uri, &options.headers, body, options.timeout);
        let response = self.send(request, &options.cancel).await?;
        self.decode(&response)
    }
}

#[async_trait]
impl<T, C> ApiClient for ResilientClient<T, C>
where
    T: Transport,
    C: Codec,
{
    async fn get<R>(&self, uri: &str, options: CallOptions) -> Result<R, ClientError>
    where
        R: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        self.call(Method::GET, uri, None, &options).await
    }

    async fn post<R, B>(&self, uri: &str, body: &B, options: CallOptions) -> Result<R, ClientError>
    where
        R: DeserializeOwned + Send + 'static,
        B: Serialize + Sync + ?Sized,
    {
        let body = self.encode(body)?;
        self.call(Method::POST, uri, Some(body), &options).await
    }

    async fn put<R, B>(&self, uri: &str, body: &B, options: CallOptions) -> Result<R, ClientError>
    where
        R: DeserializeOwned + Send + 'static,
        B: Serialize + Sync + ?Sized,
    {
        let body = self.encode(body)?;
        self.call(Method::PUT, uri, Some(body), &options).await
    }

    async fn patch<R, B>(&self, uri: &str, body: &B, options: CallOptions) -> Result<R, ClientError>
    where
        R: DeserializeOwned + Send + 'static,
        B: Serialize + Sync + ?Sized,
    {
        let body = self.encode(body)?;
        self.call(Method::PATCH, uri, Some(body), &options).await
    }

    async fn delete<R>(&self, uri: &str, options: CallOptions) -> Result<R, ClientError>
    where
        R: DeserializeOwned + Send + 'static,
    {
        self.call(Method::DELETE, uri, None, &options).await
    }
}
