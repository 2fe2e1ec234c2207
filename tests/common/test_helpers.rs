use async_trait::async_trait;
use http::StatusCode;
use ninelives_http::{
    CacheStore, CachedValue, CircuitBreaker, CircuitBreakerConfig, HttpRequest, HttpResponse,
    InMemoryStore, InstantSleeper, PatternRemoval, ResilienceStack, ResilientClient,
    ResilientTransport, RetryConfig, RetryExecutor, StoreError, Transport, TransportError,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub type Reply = Result<HttpResponse, TransportError>;

/// Transport double: plays scripted replies in order, then repeats the fallback.
#[derive(Debug)]
pub struct MockTransport {
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    requests: Mutex<Vec<HttpRequest>>,
    calls: AtomicUsize,
}

impl MockTransport {
    pub fn always(reply: Reply) -> Arc<Self> {
        Self::scripted(Vec::new(), reply)
    }

    pub fn scripted(script: Vec<Reply>, fallback: Reply) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Queue more replies ahead of the fallback.
    pub fn push(&self, reply: Reply) {
        self.script.lock().unwrap().push_back(reply);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

pub fn json(status: u16, body: &str) -> Reply {
    Ok(HttpResponse::new(StatusCode::from_u16(status).unwrap(), body.to_string())
        .with_header("content-type", "application/json"))
}

pub fn status(code: u16) -> Reply {
    Ok(HttpResponse::new(StatusCode::from_u16(code).unwrap(), Vec::<u8>::new()))
}

/// Stack with instant sleeps and a private breaker.
pub fn fast_stack(endpoint: &str, max_retries: usize, failure_threshold: usize) -> ResilienceStack {
    let retry =
        RetryConfig::new(max_retries, Duration::from_millis(10), Duration::from_millis(100), 0.0)
            .unwrap();
    let breaker = CircuitBreakerConfig::new(failure_threshold, Duration::from_secs(30)).unwrap();
    ResilienceStack::new(
        RetryExecutor::new(retry).with_sleeper(InstantSleeper),
        Arc::new(CircuitBreaker::new(endpoint, breaker)),
    )
}

pub fn resilient_client(transport: Arc<MockTransport>) -> ResilientClient<Arc<MockTransport>> {
    ResilientClient::new(ResilientTransport::new(transport, fast_stack("test", 3, 5)))
}

/// Store wrapper recording every call, with a switch to simulate an outage.
#[derive(Debug, Default)]
pub struct RecordingStore {
    inner: InMemoryStore,
    unavailable: AtomicBool,
    sets: Mutex<Vec<(String, Duration)>>,
    scopes: Mutex<Vec<String>>,
}

impl RecordingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn sets(&self) -> Vec<(String, Duration)> {
        self.sets.lock().unwrap().clone()
    }

    pub fn invalidated_scopes(&self) -> Vec<String> {
        self.scopes.lock().unwrap().clone()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheStore for RecordingStore {
    async fn get(&self, key: &str) -> Result<Option<CachedValue>, StoreError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: CachedValue, ttl: Duration) -> Result<(), StoreError> {
        self.check()?;
        self.sets.lock().unwrap().push((key.to_string(), ttl));
        self.inner.set(key, value, ttl).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.remove(key).await
    }

    async fn remove_matching(&self, scope: &str) -> Result<PatternRemoval, StoreError> {
        self.scopes.lock().unwrap().push(scope.to_string());
        self.check()?;
        self.inner.remove_matching(scope).await
    }
}
