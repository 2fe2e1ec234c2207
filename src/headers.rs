//! Ordered request header set with explicit case-insensitive name semantics.
//!
//! Header names are compared ASCII case-insensitively everywhere in this module: inserting
//! `Accept` after `accept` replaces the earlier value in place. Values are compared exactly.
//! The canonical form used for cache keys lower-cases names, sorts them, and renders
//! `name=value` pairs joined by `;`.

use std::cmp::Ordering;

/// Ordered collection of request headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    entries: Vec<(String, String)>,
}

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a header, keeping the original position on replacement.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(idx) => self.entries[idx] = (name, value),
            None => self.entries.push((name, value)),
        }
    }

    /// Builder-style [`HeaderSet::insert`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|idx| self.entries[idx].1.as_str())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.position(name).map(|idx| self.entries.remove(idx).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Returns `self` overlaid with `overrides`; an override replaces a header of the same
    /// name regardless of case.
    pub fn merged_with(&self, overrides: &HeaderSet) -> HeaderSet {
        let mut merged = self.clone();
        for (name, value) in overrides.iter() {
            merged.insert(name, value);
        }
        merged
    }

    /// Canonical rendering: lower-cased names, sorted, `name=value` joined by `;`.
    ///
    /// Values are not escaped, so a value containing `;` or `=` can render the same as a
    /// different set: `{A: "1;b=2"}` and `{A: "1", B: "2"}` both give `a=1;b=2`. Keep such
    /// headers out of cache-key headers when the distinction matters.
    pub fn canonical(&self) -> String {
        let mut pairs: Vec<(String, &str)> =
            self.entries.iter().map(|(n, v)| (n.to_ascii_lowercase(), v.as_str())).collect();
        pairs.sort_by(|a, b| match a.0.cmp(&b.0) {
            Ordering::Equal => a.1.cmp(b.1),
            other => other,
        });
        pairs.iter().map(|(n, v)| format!("{n}={v}")).collect::<Vec<_>>().join(";")
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(n, _)| n.eq_ignore_ascii_case(name))
    }
}

impl<N, V> FromIterator<(N, V)> for HeaderSet
where
    N: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut set = HeaderSet::new();
        for (name, value) in iter {
            set.insert(name, value);
        }
        set
    }
}
