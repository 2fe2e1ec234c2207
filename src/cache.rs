//! Response caching around a [`ResilientClient`].
//!
//! Reads (`get`) consult the store first and populate it on cacheable misses. Mutations
//! (`post`/`put`/`patch`/`delete`) always reach the transport, and only after the response
//! decodes successfully do they request invalidation of the parent resource scope.
//!
//! Invalidation is best effort: it is logged at `info` and handed to
//! [`CacheStore::remove_matching`]. Stores without pattern removal report
//! [`PatternRemoval::Unsupported`] and stale entries age out by TTL.
//!
//! Store failures never fail a request; they are logged at `warn` and the call proceeds as
//! a miss.

use crate::cache_key::CacheKeyGenerator;
use crate::client::{ApiClient, CallOptions, ResilientClient};
use crate::codec::{Codec, JsonCodec};
use crate::error::ClientError;
use crate::headers::HeaderSet;
use crate::store::{CacheStore, InMemoryStore, PatternRemoval};
use crate::transport::{HttpRequest, HttpResponse, Transport};
use crate::ttl::{CacheControlTtl, TtlResolver};
use async_trait::async_trait;
use http::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Default lifetime for cached responses without a `max-age`.
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(300);

type CachePredicate = dyn Fn(&HttpRequest, &HttpResponse) -> bool + Send + Sync;

/// Errors produced while validating cache options.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheOptionsError {
    #[error("default expiry must be greater than zero")]
    ZeroExpiry,
    #[error("max entries must be greater than zero")]
    ZeroMaxEntries,
    #[error("invalid cacheable status code {0}")]
    InvalidStatusCode(u16),
    #[error("invalid cacheable method {0:?}")]
    InvalidMethod(String),
}

/// What gets cached and for how long.
#[derive(Clone)]
pub struct CacheOptions {
    default_expiry: Duration,
    max_entries: Option<usize>,
    default_headers: HeaderSet,
    cacheable_statuses: HashSet<StatusCode>,
    cacheable_methods: HashSet<Method>,
    should_cache: Arc<CachePredicate>,
    ttl_resolver: Arc<dyn TtlResolver>,
}

impl fmt::Debug for CacheOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOptions")
            .field("default_expiry", &self.default_expiry)
            .field("max_entries", &self.max_entries)
            .field("default_headers", &self.default_headers)
            .field("cacheable_statuses", &self.cacheable_statuses)
            .field("cacheable_methods", &self.cacheable_methods)
            .finish_non_exhaustive()
    }
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self::with_expiry(DEFAULT_EXPIRY)
    }
}

impl CacheOptions {
    /// Options with statuses {200, 206, 304}, methods {GET, HEAD} and a
    /// [`CacheControlTtl`] resolver falling back to `default_expiry`.
    pub fn new(default_expiry: Duration) -> Result<Self, CacheOptionsError> {
        if default_expiry.is_zero() {
            return Err(CacheOptionsError::ZeroExpiry);
        }
        Ok(Self::with_expiry(default_expiry))
    }

    fn with_expiry(default_expiry: Duration) -> Self {
        Self {
            default_expiry,
            max_entries: None,
            default_headers: HeaderSet::new(),
            cacheable_statuses: [StatusCode::OK, StatusCode::PARTIAL_CONTENT, StatusCode::NOT_MODIFIED]
                .into_iter()
                .collect(),
            cacheable_methods: [Method::GET, Method::HEAD].into_iter().collect(),
            should_cache: Arc::new(|_: &HttpRequest, _: &HttpResponse| true),
            ttl_resolver: Arc::new(CacheControlTtl::new(default_expiry)),
        }
    }

    /// Bound the default in-memory store.
    pub fn with_max_entries(mut self, max_entries: usize) -> Result<Self, CacheOptionsError> {
        if max_entries == 0 {
            return Err(CacheOptionsError::ZeroMaxEntries);
        }
        self.max_entries = Some(max_entries);
        Ok(self)
    }

    pub fn with_default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    pub fn with_default_headers(mut self, headers: HeaderSet) -> Self {
        self.default_headers = headers;
        self
    }

    pub fn with_cacheable_statuses(mut self, statuses: impl IntoIterator<Item = StatusCode>) -> Self {
        self.cacheable_statuses = statuses.into_iter().collect();
        self
    }

    pub fn with_cacheable_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.cacheable_methods = methods.into_iter().collect();
        self
    }

    /// Extra predicate consulted after the status and method checks.
    pub fn with_should_cache<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&HttpRequest, &HttpResponse) -> bool + Send + Sync + 'static,
    {
        self.should_cache = Arc::new(predicate);
        self
    }

    /// Replace the whole TTL strategy.
    pub fn with_ttl_resolver<R: TtlResolver + 'static>(mut self, resolver: R) -> Self {
        self.ttl_resolver = Arc::new(resolver);
        self
    }

    pub fn default_expiry(&self) -> Duration {
        self.default_expiry
    }

    pub fn max_entries(&self) -> Option<usize> {
        self.max_entries
    }

    pub fn default_headers(&self) -> &HeaderSet {
        &self.default_headers
    }

    pub fn cacheable_statuses(&self) -> &HashSet<StatusCode> {
        &self.cacheable_statuses
    }

    pub fn cacheable_methods(&self) -> &HashSet<Method> {
        &self.cacheable_methods
    }

    pub fn ttl_resolver(&self) -> &dyn TtlResolver {
        self.ttl_resolver.as_ref()
    }

    /// Status, method and predicate all agree.
    pub fn is_cacheable(&self, request: &HttpRequest, response: &HttpResponse) -> bool {
        self.cacheable_statuses.contains(&response.status)
            && self.cacheable_methods.contains(&request.method)
            && (self.should_cache)(request, response)
    }
}

/// Parent collection of a resource URI: the path minus its final segment.
///
/// Query and fragment are ignored; a trailing slash does not count as a segment; the root
/// stays `/`.
///
/// ```rust
/// use ninelives_http::resource_scope;
///
/// assert_eq!(resource_scope("/leads/42"), "/leads");
/// assert_eq!(resource_scope("/leads/42?expand=owner"), "/leads");
/// assert_eq!(resource_scope("/orders"), "/");
/// ```
pub fn resource_scope(uri: &str) -> String {
    let end = uri.find(|c: char| c == '?' || c == '#').unwrap_or(uri.len());
    let path = uri[..end].trim_end_matches('/');
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

/// [`ApiClient`] decorator adding response caching to a [`ResilientClient`].
pub struct CachingClient<T, C = JsonCodec> {
    inner: ResilientClient<T, C>,
    store: Arc<dyn CacheStore>,
    options: CacheOptions,
    keys: CacheKeyGenerator,
}

impl<T, C> fmt::Debug for CachingClient<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingClient")
            .field("options", &self.options)
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

impl<T: Transport, C: Codec> CachingClient<T, C> {
    /// Cache into a fresh [`InMemoryStore`] bounded by `options.max_entries()`.
    pub fn new(inner: ResilientClient<T, C>, options: CacheOptions) -> Self {
        let store = Arc::new(InMemoryStore::new(options.max_entries()));
        Self::with_store(inner, options, store)
    }

    pub fn with_store(
        inner: ResilientClient<T, C>,
        options: CacheOptions,
        store: Arc<dyn CacheStore>,
    ) -> Self {
        let defaults = inner.default_headers().merged_with(options.default_headers());
        Self { inner, store, options, keys: CacheKeyGenerator::new(defaults) }
    }

    pub fn inner(&self) -> &ResilientClient<T, C> {
        &self.inner
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Cache key a read of `R` from `uri` with `headers` would use.
    pub fn cache_key<R: 'static>(&self, uri: &str, headers: &HeaderSet) -> String {
        self.keys.generate(std::any::type_name::<R>(), uri, headers)
    }

    async fn read<R>(&self, method: Method, uri: &str, options: CallOptions) -> Result<R, ClientError>
    where
        R: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let headers = self.keys.default_headers().merged_with(&options.headers);
        let key = CacheKeyGenerator::key_for(std::any::type_name::<R>(), uri, &headers);

        match self.store.get(&key).await {
            Ok(Some(cached)) => match cached.downcast::<R>() {
                Ok(value) => {
                    debug!(target: "ninelives_http::cache", %key, "cache hit");
                    return Ok(R::clone(&value));
                }
                Err(_) => warn!(target: "ninelives_http::cache", %key, "cached value has unexpected type; refetching"),
            },
            Ok(None) => trace!(target: "ninelives_http::cache", %key, "cache miss"),
            Err(error) => {
                warn!(target: "ninelives_http::cache", %key, %error, "cache store unavailable; calling through")
            }
        }

        let request = self.inner.request(method, uri, &headers, None, options.timeout);
        let response = self.inner.send(request.clone(), &options.cancel).await?;
        let value: R = self.inner.decode(&response)?;

        if !self.options.is_cacheable(&request, &response) {
            trace!(target: "ninelives_http::cache", %key, status = %response.status, "response not cacheable");
            return Ok(value);
        }
        let ttl = options
            .cache_duration
            .unwrap_or_else(|| self.options.ttl_resolver().resolve(&request, &response));
        if ttl.is_zero() {
            debug!(target: "ninelives_http::cache", %key, "zero ttl; not cached");
            return Ok(value);
        }
        match self.store.set(&key, Arc::new(value.clone()), ttl).await {
            Ok(()) => debug!(target: "ninelives_http::cache", %key, ttl_ms = ttl.as_millis() as u64, "cached response"),
            Err(error) => warn!(target: "ninelives_http::cache", %key, %error, "failed to cache response"),
        }
        Ok(value)
    }

    async fn mutate<R: DeserializeOwned>(
        &self,
        method: Method,
        uri: &str,
        body: Option<Vec<u8>>,
        options: CallOptions,
    ) -> Result<R, ClientError> {
        let headers = self.keys.default_headers().merged_with(&options.headers);
        let request = self.inner.request(method, uri, &headers, body, options.timeout);
        let response = self.inner.send(request, &options.cancel).await?;
        let value = self.inner.decode(&response)?;
        self.invalidate(uri).await;
        Ok(value)
    }

    async fn invalidate(&self, uri: &str) {
        let scope = resource_scope(uri);
        info!(target: "ninelives_http::cache", %uri, %scope, "cache invalidation requested");
        match self.store.remove_matching(&scope).await {
            Ok(PatternRemoval::Removed(removed)) => {
                debug!(target: "ninelives_http::cache", %scope, removed, "invalidated cache entries")
            }
            Ok(PatternRemoval::Unsupported) => debug!(
                target: "ninelives_http::cache",
                %scope,
                "store has no pattern removal; entries expire by ttl"
            ),
            Err(error) => warn!(target: "ninelives_http::cache", %scope, %error, "cache invalidation failed"),
        }
    }
}

#[async_trait]
impl<T, C> ApiClient for CachingClient<T, C>
where
    T: Transport,
    C: Codec,
{
    async fn get<R>(&self, uri: &str, options: CallOptions) -> Result<R, ClientError>
    where
        R: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        self.read(Method::GET, uri, options).await
    }

    async fn post<R, B>(&self, uri: &str, body: &B, options: CallOptions) -> Result<R, ClientError>
    where
        R: DeserializeOwned + Send + 'static,
        B: Serialize + Sync + ?Sized,
    {
        let body = self.inner.encode(body)?;
        self.mutate(Method::POST, uri, Some(body), options).await
    }

    async fn put<R, B>(&self, uri: &str, body: &B, options: CallOptions) -> Result<R, ClientError>
    where
        R: DeserializeOwned + Send + 'static,
        B: Serialize + Sync + ?Sized,
    {
        let body = self.inner.encode(body)?;
        self.mutate(Method::PUT, uri, Some(body), options).await
    }

    async fn patch<R, B>(&self, uri: &str, body: &B, options: CallOptions) -> Result<R, ClientError>
    where
        R: DeserializeOwned + Send + 'static,
        B: Serialize + Sync + ?Sized,
    {
        let body = self.inner.encode(body)?;
        self.mutate(Method::PATCH, uri, Some(body), options).await
    }

    async fn delete<R>(&self, uri: &str, options: CallOptions) -> Result<R, ClientError>
    where
        R: DeserializeOwned + Send + 'static,
    {
        self.mutate(Method::DELETE, uri, None, options).await
    }
}
