#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Nine Lives HTTP
//!
//! Resilient, caching HTTP clients for async Rust: retry with capped exponential backoff,
//! per-endpoint circuit breakers, and a response cache with header-aware keys, TTLs from
//! `Cache-Control`, and best-effort invalidation on mutations.
//!
//! ## Features
//!
//! - **Retry** with jittered exponential backoff and cancellation-aware sleeps
//! - **Circuit breakers** shared per endpoint through a registry, lock-free via atomics
//! - **Response caching** keyed by response type, URI and canonical request headers
//! - **Tower integration**: [`ResilienceLayer`] wraps any [`Transport`] into a `Service`
//!
//! The crate owns no networking: plug in a [`Transport`] (hyper, reqwest, a test double)
//! and a [`Codec`] ([`JsonCodec`] by default).
//!
//! ## Quick Start
//!
//! ```rust
//! use async_trait::async_trait;
//! use ninelives_http::{
//!     ApiClient, CacheOptions, CachingClient, CallOptions, CircuitBreakerRegistry, HttpRequest,
//!     HttpResponse, ResilientClient, ResilientTransport, Transport, TransportError,
//! };
//! use ninelives_http::config::ClientSettings;
//! use tokio_util::sync::CancellationToken;
//!
//! struct Fixed;
//!
//! #[async_trait]
//! impl Transport for Fixed {
//!     async fn send(
//!         &self,
//!         _request: HttpRequest,
//!         _cancel: &CancellationToken,
//!     ) -> Result<HttpResponse, TransportError> {
//!         Ok(HttpResponse::new(http::StatusCode::OK, r#"{"id":1}"#))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = CircuitBreakerRegistry::new();
//!     let settings = ClientSettings { endpoint: "users".into(), ..Default::default() };
//!     let stack = settings.build_stack(&registry).unwrap();
//!
//!     let client = CachingClient::new(
//!         ResilientClient::new(ResilientTransport::new(Fixed, stack)),
//!         CacheOptions::default(),
//!     );
//!     let user: serde_json::Value = client.get("/users/1", CallOptions::new()).await.unwrap();
//!     assert_eq!(user["id"], 1);
//! }
//! ```

pub mod backoff;
pub mod cache;
pub mod cache_key;
pub mod circuit_breaker;
pub mod circuit_breaker_registry;
pub mod client;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod headers;
pub mod jitter;
pub mod retry;
pub mod sleeper;
pub mod stack;
pub mod store;
pub mod transport;
pub mod ttl;

// Re-exports
pub use backoff::Backoff;
pub use cache::{resource_scope, CacheOptions, CacheOptionsError, CachingClient};
pub use cache_key::CacheKeyGenerator;
pub use circuit_breaker::{
    BreakerOutcome, CallDecision, CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitState,
};
pub use circuit_breaker_registry::{CircuitBreakerRegistry, CircuitBreakerRegistryError};
pub use client::{ApiClient, CallOptions, ResilientClient};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use codec::{Codec, DecodeError, EncodeError, JsonCodec};
pub use error::{ClientError, ResilienceError, TransientFailure};
pub use headers::HeaderSet;
pub use jitter::Jitter;
pub use retry::{
    classify_status, Classification, Classifier, HttpClassifier, Outcome, RetryConfig,
    RetryExecutor,
};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper, Wake};
pub use stack::{ResilienceLayer, ResilienceStack, ResilientTransport};
pub use store::{CacheStore, CachedValue, InMemoryStore, PatternRemoval, StoreError};
pub use transport::{HttpRequest, HttpResponse, Transport, TransportError};
pub use ttl::{CacheControlTtl, TtlResolver};
