//! Cache lifetime resolution.
//!
//! Precedence for [`CacheControlTtl`]: an explicit `max-age` wins, then `no-cache` /
//! `no-store` (zero, do not cache), then the configured default.

use crate::transport::{HttpRequest, HttpResponse};
use http::header::CACHE_CONTROL;
use std::time::Duration;

/// Computes how long a response may be cached. Zero means "do not cache".
pub trait TtlResolver: Send + Sync {
    fn resolve(&self, request: &HttpRequest, response: &HttpResponse) -> Duration;
}

impl<F> TtlResolver for F
where
    F: Fn(&HttpRequest, &HttpResponse) -> Duration + Send + Sync,
{
    fn resolve(&self, request: &HttpRequest, response: &HttpResponse) -> Duration {
        self(request, response)
    }
}

/// Default resolver honoring `Cache-Control`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheControlTtl {
    default_expiry: Duration,
}

impl CacheControlTtl {
    pub fn new(default_expiry: Duration) -> Self {
        Self { default_expiry }
    }

    pub fn default_expiry(&self) -> Duration {
        self.default_expiry
    }
}

impl TtlResolver for CacheControlTtl {
    fn resolve(&self, _request: &HttpRequest, response: &HttpResponse) -> Duration {
        let directives = Directives::parse(response);
        if let Some(max_age) = directives.max_age {
            return max_age;
        }
        if directives.no_cache || directives.no_store {
            return Duration::ZERO;
        }
        self.default_expiry
    }
}

#[derive(Debug, Default)]
struct Directives {
    max_age: Option<Duration>,
    no_cache: bool,
    no_store: bool,
}

impl Directives {
    /// Folds every `Cache-Control` header. Unparseable values are skipped.
    fn parse(response: &HttpResponse) -> Self {
        let mut directives = Self::default();
        for value in response.headers.get_all(CACHE_CONTROL) {
            let Ok(value) = value.to_str() else {
                continue;
            };
            for directive in value.split(',') {
                let directive = directive.trim();
                let (name, arg) = match directive.split_once('=') {
                    Some((name, arg)) => (name.trim(), Some(arg.trim().trim_matches('"'))),
                    None => (directive, None),
                };
                if name.eq_ignore_ascii_case("max-age") {
                    let secs = arg.and_then(|a| a.parse::<u64>().ok());
                    if let (None, Some(secs)) = (directives.max_age, secs) {
                        directives.max_age = Some(Duration::from_secs(secs));
                    }
                } else if name.eq_ignore_ascii_case("no-cache") {
                    directives.no_cache = true;
                } else if name.eq_ignore_ascii_case("no-store") {
                    directives.no_store = true;
                }
            }
        }
        directives
    }
}
