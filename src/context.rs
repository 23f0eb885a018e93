//! Resolution of track URIs to seekable streams
//!
//! A [`SourceContext`] is passed explicitly to everything that opens a source. It
//! decides how a URI becomes a [`SeekableStream`]: plain paths and `file://` URIs
//! are memory-mapped, any other scheme is handed to the [`RemoteOpener`] registered
//! for it, and remote streams are wrapped in the persistent block cache.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use log::debug;

use crate::error::{ReadError, Result};
use crate::stream::{CacheConfig, MmapStream, SeekableStream};

/// Opens streams for one URI scheme (e.g. `http`)
pub trait RemoteOpener: Send + Sync {
    fn open(&self, uri: &str) -> Result<Box<dyn SeekableStream>>;
}

/// Explicit context for opening track sources
#[derive(Clone)]
pub struct SourceContext {
    cache: Option<CacheConfig>,
    cache_local: bool,
    openers: HashMap<String, Arc<dyn RemoteOpener>>,
}
impl Default for SourceContext {
    fn default() -> Self {
        SourceContextBuilder::default().build()
    }
}
impl fmt::Debug for SourceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceContext")
            .field("cache", &self.cache)
            .field("cache_local", &self.cache_local)
            .field("schemes", &self.openers.keys().collect::<Vec<_>>())
            .finish()
    }
}
impl SourceContext {
    #[must_use]
    pub fn builder() -> SourceContextBuilder {
        SourceContextBuilder::default()
    }

    #[must_use]
    pub fn cache(&self) -> Option<&CacheConfig> {
        self.cache.as_ref()
    }

    /// Returns the local path for plain paths and `file://` URIs
    #[must_use]
    pub fn local_path(uri: &str) -> Option<PathBuf> {
        match uri.split_once("://") {
            None => Some(PathBuf::from(uri)),
            Some(("file", path)) => Some(PathBuf::from(path)),
            Some(_) => None,
        }
    }

    /// Opens `uri` as a seekable stream
    pub fn open_stream(&self, uri: &str) -> Result<Box<dyn SeekableStream>> {
        if let Some(path) = Self::local_path(uri) {
            let stream = MmapStream::open(path)?;
            return match (&self.cache, self.cache_local) {
                (Some(cache), true) => Ok(Box::new(cache.wrap(stream)?)),
                _ => Ok(Box::new(stream)),
            };
        }

        let scheme = uri.split_once("://").map_or("", |(scheme, _)| scheme);
        let Some(opener) = self.openers.get(scheme) else {
            return Err(ReadError::UnsupportedScheme(uri.to_string()).into());
        };
        let stream = opener.open(uri)?;
        match &self.cache {
            Some(cache) => {
                debug!("caching remote source {uri}");
                Ok(Box::new(cache.wrap(stream)?))
            }
            None => Ok(stream),
        }
    }

    /// Deletes the cache entry of `uri`, if caching is enabled
    pub fn invalidate(&self, uri: &str) -> Result<()> {
        match &self.cache {
            Some(cache) => cache.invalidate(uri),
            None => Ok(()),
        }
    }
}

/// Builder for [`SourceContext`]
pub struct SourceContextBuilder {
    cache: Option<CacheConfig>,
    cache_local: bool,
    openers: HashMap<String, Arc<dyn RemoteOpener>>,
}
impl Default for SourceContextBuilder {
    fn default() -> Self {
        Self {
            cache: Some(CacheConfig::from_env()),
            cache_local: false,
            openers: HashMap::new(),
        }
    }
}
impl SourceContextBuilder {
    /// Set the cache configuration
    #[must_use]
    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Disable the persistent block cache entirely
    #[must_use]
    pub fn no_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    /// Set whether local files are cached as well
    #[must_use]
    pub fn cache_local(mut self, cache_local: bool) -> Self {
        self.cache_local = cache_local;
        self
    }

    /// Register an opener for a URI scheme
    #[must_use]
    pub fn opener(mut self, scheme: &str, opener: Arc<dyn RemoteOpener>) -> Self {
        self.openers.insert(scheme.to_string(), opener);
        self
    }

    #[must_use]
    pub fn build(self) -> SourceContext {
        SourceContext {
            cache: self.cache,
            cache_local: self.cache_local,
            openers: self.openers,
        }
    }
}
