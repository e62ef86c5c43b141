//! Cache key derivation.
//!
//! A key is `<language>:<host><path>` or `<language>:<host><path>?<query>`. The host
//! keeps pages of different sites apart when the public URL comes from the request's
//! `Host` header. Gate control parameters (`__render-*`) never take part in the key.

use std::fmt;

use url::{Url, form_urlencoded};

use crate::domain::entities::DEFAULT_LANGUAGE;

/// Prefix shared by every query parameter the gate consumes itself.
pub const CONTROL_PARAM_PREFIX: &str = "__render-";

/// Storage key holding the aggregate task registry.
pub const TASKS_STORAGE_KEY: &str = "tasks";

const SNAPSHOT_STORAGE_PREFIX: &str = "cache:";

/// Stable identifier for one (host, path, query, language) tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Durable storage key of the snapshot for this cache key.
    pub fn storage_key(&self) -> String {
        format!("{SNAPSHOT_STORAGE_PREFIX}{}", self.0)
    }

    /// Rebuild a key read back from the persisted registry.
    pub(crate) fn from_stored(raw: String) -> Self {
        Self(raw)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the cache key for a host, request path, raw query string and language tag.
///
/// `host` is the authority as it appears in the public URL (`example.com`,
/// `example.com:8080`); it is compared case-insensitively.
pub fn derive_key(host: &str, path: &str, query: Option<&str>, language: &str) -> CacheKey {
    let host = host.trim().to_ascii_lowercase();
    let path = if path.is_empty() { "/" } else { path };
    let language = language.trim();
    let language = if language.is_empty() {
        DEFAULT_LANGUAGE
    } else {
        language
    };

    let query = query.map(strip_control_params).unwrap_or_default();
    if query.is_empty() {
        CacheKey(format!("{language}:{host}{path}"))
    } else {
        CacheKey(format!("{language}:{host}{path}?{query}"))
    }
}

/// Cache key of an absolute page URL. The scheme does not take part in the key.
pub fn key_for_public_url(url: &Url, language: &str) -> CacheKey {
    let host = url.host_str().unwrap_or_default();
    let authority = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    derive_key(&authority, url.path(), url.query(), language)
}

/// Remove `__render-*` parameters from a raw query string, keeping the order and
/// encoding of everything else.
pub fn strip_control_params(query: &str) -> String {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter(|pair| {
            let name = pair.split_once('=').map_or(*pair, |(name, _)| name);
            let decoded: String = form_urlencoded::parse(name.as_bytes())
                .next()
                .map(|(name, _)| name.into_owned())
                .unwrap_or_default();
            !decoded.starts_with(CONTROL_PARAM_PREFIX)
        })
        .collect::<Vec<_>>()
        .join("&")
}
