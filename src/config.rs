//! Serializable client settings.
//!
//! Everything defaults, so a partial document only overrides what it names:
//!
//! ```rust
//! use ninelives_http::config::ClientSettings;
//!
//! let settings = ClientSettings::from_json(r#"{
//!     "endpoint": "crm",
//!     "retry": { "max_retries": 5 },
//!     "cache": { "default_expiry_ms": 60000, "default_headers": { "Accept": "application/json" } }
//! }"#).unwrap();
//! assert_eq!(settings.retry_config().unwrap().max_retries(), 5);
//! assert_eq!(settings.cache_options().unwrap().default_expiry().as_secs(), 60);
//! ```

use crate::cache::{CacheOptions, CacheOptionsError};
use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerError};
use crate::circuit_breaker_registry::CircuitBreakerRegistry;
use crate::headers::HeaderSet;
use crate::retry::{RetryConfig, RetryConfigError, RetryExecutor};
use crate::client::ResilientClient;
use crate::stack::{ResilienceStack, ResilientTransport};
use crate::transport::Transport;
use http::{Method, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Errors produced while turning settings into runtime configuration.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("invalid settings document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid retry settings: {0}")]
    Retry(#[from] RetryConfigError),
    #[error("invalid circuit breaker settings: {0}")]
    CircuitBreaker(#[from] CircuitBreakerError),
    #[error("invalid cache settings: {0}")]
    Cache(#[from] CacheOptionsError),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self { max_retries: 3, base_delay_ms: 200, max_delay_ms: 30_000, jitter_factor: 0.1 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub enabled: bool,
    pub failure_threshold: usize,
    pub open_duration_ms: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self { enabled: true, failure_threshold: 5, open_duration_ms: 30_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub default_expiry_ms: u64,
    pub max_entries: Option<usize>,
    pub default_headers: BTreeMap<String, String>,
    pub cacheable_status_codes: Vec<u16>,
    /// Matched case-insensitively: `"get"` means `GET`.
    pub cacheable_methods: Vec<String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_expiry_ms: 300_000,
            max_entries: None,
            default_headers: BTreeMap::new(),
            cacheable_status_codes: vec![200, 206, 304],
            cacheable_methods: vec!["GET".into(), "HEAD".into()],
        }
    }
}

impl CacheSettings {
    fn statuses(&self) -> Result<Vec<StatusCode>, CacheOptionsError> {
        self.cacheable_status_codes
            .iter()
            .map(|&code| {
                StatusCode::from_u16(code).map_err(|_| CacheOptionsError::InvalidStatusCode(code))
            })
            .collect()
    }

    fn methods(&self) -> Result<Vec<Method>, CacheOptionsError> {
        self.cacheable_methods
            .iter()
            .map(|name| {
                Method::from_bytes(name.trim().to_ascii_uppercase().as_bytes())
                    .map_err(|_| CacheOptionsError::InvalidMethod(name.clone()))
            })
            .collect()
    }
}

/// Settings for one logical endpoint.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Breaker registry key. Clients sharing it share a breaker.
    pub endpoint: String,
    pub retry: RetrySettings,
    pub circuit_breaker: CircuitBreakerSettings,
    pub cache: CacheSettings,
    /// Default per-request timeout forwarded to the transport.
    pub timeout_ms: Option<u64>,
}

impl ClientSettings {
    pub fn from_json(document: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(document)?)
    }

    pub fn retry_config(&self) -> Result<RetryConfig, SettingsError> {
        Ok(RetryConfig::new(
            self.retry.max_retries,
            Duration::from_millis(self.retry.base_delay_ms),
            Duration::from_millis(self.retry.max_delay_ms),
            self.retry.jitter_factor,
        )?)
    }

    pub fn circuit_breaker_config(&self) -> Result<CircuitBreakerConfig, SettingsError> {
        if !self.circuit_breaker.enabled {
            return Ok(CircuitBreakerConfig::disabled());
        }
        Ok(CircuitBreakerConfig::new(
            self.circuit_breaker.failure_threshold,
            Duration::from_millis(self.circuit_breaker.open_duration_ms),
        )?)
    }

    pub fn cache_options(&self) -> Result<CacheOptions, SettingsError> {
        let headers: HeaderSet =
            self.cache.default_headers.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let mut options = CacheOptions::new(Duration::from_millis(self.cache.default_expiry_ms))?
            .with_default_headers(headers)
            .with_cacheable_statuses(self.cache.statuses()?)
            .with_cacheable_methods(self.cache.methods()?);
        if let Some(max_entries) = self.cache.max_entries {
            options = options.with_max_entries(max_entries)?;
        }
        Ok(options)
    }

    /// Default per-request timeout; [`build_client`](Self::build_client) installs it.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Stack for this endpoint, with the breaker drawn from `registry`.
    pub fn build_stack(
        &self,
        registry: &CircuitBreakerRegistry,
    ) -> Result<ResilienceStack, SettingsError> {
        let breaker = registry.get_or_create(&self.endpoint, self.circuit_breaker_config()?);
        Ok(ResilienceStack::new(RetryExecutor::new(self.retry_config()?), breaker))
    }

    /// [`ResilientClient`] over `transport` with this endpoint's stack and default timeout.
    pub fn build_client<T: Transport>(
        &self,
        transport: T,
        registry: &CircuitBreakerRegistry,
    ) -> Result<ResilientClient<T>, SettingsError> {
        let transport = ResilientTransport::new(transport, self.build_stack(registry)?);
        Ok(ResilientClient::new(transport).with_default_timeout(self.timeout()))
    }
}
