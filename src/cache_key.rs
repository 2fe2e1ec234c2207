//! Cache key derivation.
//!
//! A key identifies `(type tag, uri, canonical headers)`. With no headers the key is
//! `"{tag}::{uri}"`; otherwise `"{tag}::{uri}#{canonical}"` where `canonical` is
//! [`HeaderSet::canonical`] of the merged set. Header insertion order never affects the key.

use crate::headers::HeaderSet;

/// Derives cache keys, merging configured default headers with per-call headers.
#[derive(Debug, Clone, Default)]
pub struct CacheKeyGenerator {
    default_headers: HeaderSet,
}

impl CacheKeyGenerator {
    pub fn new(default_headers: HeaderSet) -> Self {
        Self { default_headers }
    }

    pub fn default_headers(&self) -> &HeaderSet {
        &self.default_headers
    }

    /// Key for `uri` with `headers` layered over the defaults (per-call wins).
    pub fn generate(&self, type_tag: &str, uri: &str, headers: &HeaderSet) -> String {
        Self::key_for(type_tag, uri, &self.default_headers.merged_with(headers))
    }

    /// Key for an already merged header set.
    pub fn key_for(type_tag: &str, uri: &str, merged: &HeaderSet) -> String {
        if merged.is_empty() {
            compose(type_tag, uri)
        } else {
            compose(type_tag, &format!("{uri}#{}", merged.canonical()))
        }
    }
}

fn compose(type_tag: &str, subject: &str) -> String {
    format!("{type_tag}::{subject}")
}
