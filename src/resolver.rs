//! Request routing for the renderer: serve a local copy or let the request
//! through.
//!
//! The renderer asks a [`RouteResolver`] about every outgoing request of a
//! page. Resolvers are immutable once the batch starts, so one instance is
//! shared by every browsing context.

use asset_cache::DependencyCache;
use std::sync::Arc;

/// What to do with one outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Answer locally with these bytes (HTTP 200).
    Serve { body: Arc<[u8]>, mime: String },
    /// Forward the request unmodified.
    PassThrough,
}

/// Decides, per request URL, whether the renderer serves a local body.
pub trait RouteResolver: Send + Sync {
    fn resolve(&self, url: &str) -> Resolution;
}

impl RouteResolver for DependencyCache {
    fn resolve(&self, url: &str) -> Resolution {
        match self.lookup(url) {
            Some(asset) => Resolution::Serve {
                body: Arc::clone(&asset.bytes),
                mime: asset.mime.to_string(),
            },
            None => Resolution::PassThrough,
        }
    }
}

/// Fixed URL → body table; handy for tests and one-off overrides.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    routes: Vec<(String, Resolution)>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, url: impl Into<String>, body: impl Into<Vec<u8>>, mime: &str) -> Self {
        self.routes.push((
            url.into(),
            Resolution::Serve {
                body: Arc::from(body.into()),
                mime: mime.to_string(),
            },
        ));
        self
    }
}

impl RouteResolver for StaticResolver {
    fn resolve(&self, url: &str) -> Resolution {
        let url = asset_cache::canonical_url(url);
        self.routes
            .iter()
            .find(|(u, _)| u == url)
            .map(|(_, r)| r.clone())
            .unwrap_or(Resolution::PassThrough)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asset_cache::{AssetEntry, AssetManifest};

    #[test]
    fn static_resolver_matches_exact_url() {
        let r = StaticResolver::new().route("https://cdn/x.js", "x()", "application/javascript");
        assert!(matches!(r.resolve("https://cdn/x.js"), Resolution::Serve { .. }));
        assert!(matches!(r.resolve("https://cdn/x.js#a"), Resolution::Serve { .. }));
        assert_eq!(r.resolve("https://cdn/y.js"), Resolution::PassThrough);
    }

    #[test]
    fn dependency_cache_serves_cached_bytes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.css"), b"body{}").unwrap();
        let manifest = AssetManifest::empty()
            .with_entry(AssetEntry::new("https://cdn/lib.css", "lib.css").unwrap());
        let cache = DependencyCache::open(dir.path(), &manifest).unwrap();

        match cache.resolve("https://cdn/lib.css") {
            Resolution::Serve { body, mime } => {
                assert_eq!(&*body, b"body{}");
                assert_eq!(mime, "text/css");
            }
            other => panic!("expected Serve, got {other:?}"),
        }
        assert_eq!(cache.resolve("https://cdn/other.css"), Resolution::PassThrough);
    }
}
