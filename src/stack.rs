//! Resilience stack: retry around a circuit-breaker gate around the transport.
//!
//! Stack order: Retry → CircuitBreaker → Transport. Every attempt asks the breaker first; a
//! rejection ends the retry loop immediately because retrying into an open circuit only
//! adds load.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::circuit_breaker_registry::CircuitBreakerRegistry;
use crate::retry::{Classifier, HttpClassifier, RetryConfig, RetryExecutor};
use crate::transport::{HttpRequest, HttpResponse, Transport, TransportError};
use crate::ResilienceError;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_layer::Layer;
use tower_service::Service;

/// Retry executor plus the shared breaker for one endpoint.
#[derive(Debug, Clone)]
pub struct ResilienceStack {
    retry: RetryExecutor,
    breaker: Arc<CircuitBreaker>,
}

impl ResilienceStack {
    pub fn new(retry: RetryExecutor, breaker: Arc<CircuitBreaker>) -> Self {
        Self { retry, breaker }
    }

    /// Build a stack whose breaker comes from `registry`, shared with every other stack
    /// created for the same endpoint name.
    pub fn for_endpoint(
        registry: &CircuitBreakerRegistry,
        endpoint: &str,
        retry: RetryConfig,
        breaker: CircuitBreakerConfig,
    ) -> Self {
        Self::new(RetryExecutor::new(retry), registry.get_or_create(endpoint, breaker))
    }

    /// Replace the retry executor, keeping the breaker (e.g. to inject a test sleeper).
    pub fn with_retry(mut self, retry: RetryExecutor) -> Self {
        self.retry = retry;
        self
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn retry(&self) -> &RetryExecutor {
        &self.retry
    }

    pub async fn execute<T, E, C, Fut, Op>(
        &self,
        classifier: &C,
        cancel: &CancellationToken,
        mut operation: Op,
    ) -> Result<T, ResilienceError<E>>
    where
        C: Classifier<T, E> + ?Sized,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        Op: FnMut() -> Fut,
    {
        let breaker = &self.breaker;
        self.retry
            .execute(classifier, cancel, || {
                // Futures are lazy: a rejected attempt drops this without polling it.
                let attempt = operation();
                breaker.execute(classifier, move || attempt)
            })
            .await
    }
}

/// A transport wrapped in a [`ResilienceStack`].
///
/// Cloning is cheap; clones share the transport and the breaker.
pub struct ResilientTransport<T> {
    inner: Arc<T>,
    stack: ResilienceStack,
    classifier: Arc<dyn Classifier<HttpResponse, TransportError>>,
}

impl<T> Clone for ResilientTransport<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            stack: self.stack.clone(),
            classifier: self.classifier.clone(),
        }
    }
}

impl<T> std::fmt::Debug for ResilientTransport<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientTransport")
            .field("stack", &self.stack)
            .field("classifier", &"<classifier>")
            .finish()
    }
}

impl<T: Transport> ResilientTransport<T> {
    pub fn new(inner: T, stack: ResilienceStack) -> Self {
        Self { inner: Arc::new(inner), stack, classifier: Arc::new(HttpClassifier) }
    }

    /// Replace the default [`HttpClassifier`]. The same classifier drives both retry and
    /// breaker accounting.
    pub fn with_classifier<C>(mut self, classifier: C) -> Self
    where
        C: Classifier<HttpResponse, TransportError> + 'static,
    {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn stack(&self) -> &ResilienceStack {
        &self.stack
    }

    /// Send `request`, retrying transient outcomes and honoring the breaker.
    ///
    /// Transient responses that survive every retry come back as `Ok`; interpreting the
    /// status is the caller's job.
    pub async fn execute(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, ResilienceError<TransportError>> {
        let inner = &self.inner;
        let request = &request;
        self.stack
            .execute(self.classifier.as_ref(), cancel, || async move {
                inner.send(request.clone(), cancel).await.map_err(ResilienceError::Inner)
            })
            .await
    }
}

impl<T> Service<HttpRequest> for ResilientTransport<T>
where
    T: Transport + 'static,
{
    type Response = HttpResponse;
    type Error = ResilienceError<TransportError>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    /// Tower callers cancel by dropping the returned future.
    fn call(&mut self, request: HttpRequest) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { this.execute(request, &CancellationToken::new()).await })
    }
}

/// Tower layer producing [`ResilientTransport`]s that share one stack.
#[derive(Clone)]
pub struct ResilienceLayer {
    stack: ResilienceStack,
    classifier: Arc<dyn Classifier<HttpResponse, TransportError>>,
}

impl ResilienceLayer {
    pub fn new(stack: ResilienceStack) -> Self {
        Self { stack, classifier: Arc::new(HttpClassifier) }
    }

    pub fn with_classifier<C>(mut self, classifier: C) -> Self
    where
        C: Classifier<HttpResponse, TransportError> + 'static,
    {
        self.classifier = Arc::new(classifier);
        self
    }
}

impl<T: Transport> Layer<T> for ResilienceLayer {
    type Service = ResilientTransport<T>;

    fn layer(&self, inner: T) -> Self::Service {
        ResilientTransport {
            inner: Arc::new(inner),
            stack: self.stack.clone(),
            classifier: self.classifier.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitState;
    use crate::retry::{Classification, Outcome};
    use crate::InstantSleeper;
    use async_trait::async_trait;
    use http::StatusCode;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct Scripted {
        replies: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(replies: Vec<Result<HttpResponse, TransportError>>) -> Self {
            Self { replies: Mutex::new(replies.into()), calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn send(
            &self,
            _request: HttpRequest,
            _cancel: &CancellationToken,
        ) -> Result<HttpResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(HttpResponse::new(StatusCode::OK, "{}")))
        }
    }

    fn stack(max_retries: usize, threshold: usize) -> ResilienceStack {
        let retry =
            RetryConfig::new(max_retries, Duration::from_millis(1), Duration::from_millis(10), 0.0)
                .unwrap();
        let breaker = CircuitBreakerConfig::new(threshold, Duration::from_secs(60)).unwrap();
        ResilienceStack::new(
            RetryExecutor::new(retry).with_sleeper(InstantSleeper),
            Arc::new(CircuitBreaker::new("svc", breaker)),
        )
    }

    fn status(code: u16) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse::new(StatusCode::from_u16(code).unwrap(), ""))
    }

    #[tokio::test]
    async fn retries_server_errors_until_success() {
        let transport = ResilientTransport::new(
            Scripted::new(vec![status(503), Err(TransportError::Timeout), status(200)]),
            stack(3, 10),
        );
        let response =
            transport.execute(HttpRequest::get("/x"), &CancellationToken::new()).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(transport.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_errors_are_returned_without_retry() {
        let transport = ResilientTransport::new(Scripted::new(vec![status(404)]), stack(3, 10));
        let response =
            transport.execute(HttpRequest::get("/x"), &CancellationToken::new()).await.unwrap();
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(transport.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn open_circuit_stops_the_retry_loop() {
        let transport = ResilientTransport::new(
            Scripted::new(vec![status(500), status(500), status(500), status(500)]),
            stack(5, 2),
        );
        let err = transport
            .execute(HttpRequest::get("/x"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(transport.inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(transport.stack().breaker().state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn transport_cancellation_is_not_retried() {
        let transport = ResilientTransport::new(
            Scripted::new(vec![Err(TransportError::Cancelled)]),
            stack(3, 1),
        );
        let err = transport
            .execute(HttpRequest::get("/x"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.into_inner(), Some(TransportError::Cancelled));
        assert_eq!(transport.inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(transport.stack().breaker().state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn custom_classifier_drives_retries() {
        let never_retry = |_: Outcome<'_, HttpResponse, TransportError>| Classification::Permanent;
        let transport = ResilientTransport::new(Scripted::new(vec![status(503)]), stack(3, 1))
            .with_classifier(never_retry);
        let response =
            transport.execute(HttpRequest::get("/x"), &CancellationToken::new()).await.unwrap();
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(transport.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn layer_produces_a_tower_service() {
        let layer = ResilienceLayer::new(stack(1, 10));
        let mut service = layer.layer(Scripted::new(vec![status(502), status(200)]));
        let response = service.call(HttpRequest::get("/x")).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(service.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn endpoint_stacks_share_a_breaker() {
        let registry = CircuitBreakerRegistry::new();
        let a = ResilienceStack::for_endpoint(
            &registry,
            "crm",
            RetryConfig::default(),
            CircuitBreakerConfig::default(),
        );
        let b = ResilienceStack::for_endpoint(
            &registry,
            "crm",
            RetryConfig::default(),
            CircuitBreakerConfig::default(),
        );
        assert!(Arc::ptr_eq(a.breaker(), b.breaker()));
    }
}
