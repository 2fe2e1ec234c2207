//! Registry of per-endpoint circuit breakers.
//!
//! One breaker exists per logical endpoint name for as long as the registry lives. Create
//! the registry at application startup and hand clones to every client; clones share the
//! same map.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use tracing::warn;

/// Errors from breaker registries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CircuitBreakerRegistryError {
    /// The requested circuit breaker name was not found.
    #[error("circuit breaker '{name}' not found")]
    NotFound { name: String },
}

/// In-memory registry backed by an `RwLock`.
///
/// # Panics
/// Methods panic if the lock was poisoned by a panic while it was held for writing.
#[derive(Default, Clone, Debug)]
pub struct CircuitBreakerRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<CircuitBreaker>>>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the breaker for `name`, creating it from `config` on first use. Later calls
    /// return the existing breaker and ignore `config`.
    pub fn get_or_create(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.get(name) {
            return existing;
        }
        let mut map = self.inner.write().expect("circuit breaker registry poisoned");
        map.entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config)))
            .clone()
    }

    /// Register a prepared breaker under its own name, replacing any existing one.
    pub fn register(&self, breaker: CircuitBreaker) -> Arc<CircuitBreaker> {
        let breaker = Arc::new(breaker);
        let mut map = self.inner.write().expect("circuit breaker registry poisoned");
        if map.contains_key(breaker.name()) {
            warn!(target: "ninelives_http::circuit_breaker_registry", name = %breaker.name(), "circuit breaker replaced; last registration wins");
        }
        map.insert(breaker.name().to_string(), breaker.clone());
        breaker
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        let guard = self.inner.read().expect("circuit breaker registry poisoned");
        guard.get(name).cloned()
    }

    /// Reset a breaker by name, erroring if missing.
    pub fn reset(&self, name: &str) -> Result<(), CircuitBreakerRegistryError> {
        match self.get(name) {
            Some(breaker) => {
                breaker.reset();
                Ok(())
            }
            None => Err(CircuitBreakerRegistryError::NotFound { name: name.to_string() }),
        }
    }

    /// Snapshot breaker states sorted by name.
    pub fn snapshot(&self) -> Vec<(String, CircuitState)> {
        let map = self.inner.read().expect("circuit breaker registry poisoned");
        let mut entries: Vec<(String, CircuitState)> =
            map.iter().map(|(k, v)| (k.clone(), v.state())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::BreakerOutcome;
    use crate::circuit_breaker::CallDecision;
    use std::sync::Mutex;
    use std::time::Duration;
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone)]
    struct SharedWriter(Arc<Mutex<Vec<u8>>>);

    impl<'a> MakeWriter<'a> for SharedWriter {
        type Writer = SharedGuard;
        fn make_writer(&'a self) -> Self::Writer {
            SharedGuard(self.0.clone())
        }
    }

    struct SharedGuard(Arc<Mutex<Vec<u8>>>);
    impl std::io::Write for SharedGuard {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let mut guard = self.0.lock().unwrap();
            guard.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn config(threshold: usize) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new(threshold, Duration::from_secs(60)).unwrap()
    }

    #[test]
    fn same_name_yields_same_breaker() {
        let registry = CircuitBreakerRegistry::new();
        let a = registry.get_or_create("crm", config(1));
        let b = registry.clone().get_or_create("crm", config(99));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.config().failure_threshold(), 1, "first config wins");

        let other = registry.get_or_create("billing", config(1));
        assert!(!Arc::ptr_eq(&a, &other));
    }

    #[test]
    fn state_is_shared_across_handles() {
        let registry = CircuitBreakerRegistry::new();
        let first = registry.get_or_create("crm", config(1));
        if let CallDecision::Allow(permit) = first.before_call() {
            first.on_result(permit, BreakerOutcome::Failure);
        }

        let second = registry.get_or_create("crm", config(1));
        assert_eq!(second.state(), CircuitState::Open);
        assert_eq!(registry.snapshot(), vec![("crm".to_string(), CircuitState::Open)]);

        registry.reset("crm").unwrap();
        assert_eq!(second.state(), CircuitState::Closed);
    }

    #[test]
    fn reset_unknown_name_errors() {
        let registry = CircuitBreakerRegistry::new();
        let err = registry.reset("missing").unwrap_err();
        assert_eq!(err, CircuitBreakerRegistryError::NotFound { name: "missing".into() });
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn snapshot_is_sorted() {
        let registry = CircuitBreakerRegistry::new();
        registry.get_or_create("zeta", config(1));
        registry.get_or_create("alpha", config(1));
        let names: Vec<_> = registry.snapshot().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn register_warns_and_replaces_duplicates() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let writer = SharedWriter(buffer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_writer(BoxMakeWriter::new(writer))
            .with_target(true)
            .without_time()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let registry = CircuitBreakerRegistry::new();
        let h1 = registry.register(CircuitBreaker::new("svc", config(1)));
        let h2 = registry.register(CircuitBreaker::new("svc", config(2)));

        let resolved = registry.get("svc").expect("breaker present");
        assert!(Arc::ptr_eq(&resolved, &h2), "last registration should win");
        assert!(!Arc::ptr_eq(&resolved, &h1));

        let logs = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(
            logs.contains("circuit breaker replaced"),
            "warning should be emitted on duplicate registration"
        );
    }
}
