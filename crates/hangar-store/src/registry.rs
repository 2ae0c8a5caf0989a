//! Registry client with on-disk cache fallback.
//!
//! A registry is one JSON document per capability kind:
//!
//! ```json
//! {
//!   "servers": { "<id>": { "repo_url": "...", "folder_path": "...", "entry": { ... } } },
//!   "default_agent": "<id>"
//! }
//! ```
//!
//! [`RegistryClient::fetch`] never fails. A network or schema failure falls
//! back to the last accepted document on disk, and when there is none the
//! result is an empty registry. The fallback is visible in
//! [`Registry::origin`] so nothing is reported only through the log.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use hangar_core::{CapabilityId, CapabilityKind};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::descriptor::CapabilityDescriptor;
use crate::fsutil::atomic_write;

/// Largest registry document accepted (8 MB).
const MAX_REGISTRY_BYTES: u64 = 8 * 1024 * 1024;

/// Top-level key naming the default agent.
const DEFAULT_AGENT_KEY: &str = "default_agent";

/// Where the current registry snapshot came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum RegistryOrigin {
    /// Fetched from the source URL.
    Remote,
    /// The fetch failed; loaded from the cache file.
    Cache {
        /// Why the remote fetch failed.
        reason: String,
    },
    /// The fetch failed and no usable cache exists.
    Empty {
        /// Why the remote fetch failed (and the cache, if present).
        reason: String,
    },
}

impl RegistryOrigin {
    /// Whether the remote fetch failed.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        !matches!(self, Self::Remote)
    }
}

/// An entry removed during validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedEntry {
    /// Map key the entry was found under.
    pub key: String,
    /// Why it was dropped.
    pub reason: String,
}

/// A validated registry snapshot. Replaced wholesale on every fetch.
#[derive(Debug, Clone, Serialize)]
pub struct Registry {
    /// Capability kind this registry lists.
    pub kind: CapabilityKind,
    /// URL the document was requested from.
    pub source_url: String,
    /// When the document was fetched (file time for cached documents).
    pub fetched_at: Option<DateTime<Utc>>,
    /// Valid entries by id.
    pub entries: BTreeMap<CapabilityId, CapabilityDescriptor>,
    /// Default capability named by the document, if any.
    pub default_id: Option<CapabilityId>,
    /// Remote, cache or empty.
    pub origin: RegistryOrigin,
    /// Entries dropped during validation.
    pub dropped: Vec<DroppedEntry>,
}

impl Registry {
    /// An empty registry, as held before the first fetch.
    #[must_use]
    pub fn empty(kind: CapabilityKind, source_url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind,
            source_url: source_url.into(),
            fetched_at: None,
            entries: BTreeMap::new(),
            default_id: None,
            origin: RegistryOrigin::Empty {
                reason: reason.into(),
            },
            dropped: Vec::new(),
        }
    }

    /// Look up a descriptor by id.
    #[must_use]
    pub fn get(&self, id: &CapabilityId) -> Option<&CapabilityDescriptor> {
        self.entries.get(id)
    }

    /// Number of valid entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validate a registry document.
    ///
    /// # Errors
    ///
    /// Fails only on document-level problems (not an object, missing or
    /// malformed capability map). Bad entries are dropped and recorded.
    pub fn from_document(
        kind: CapabilityKind,
        source_url: &str,
        doc: &serde_json::Value,
    ) -> Result<Self, String> {
        let key = kind.registry_key();
        let top = doc
            .as_object()
            .ok_or_else(|| "registry document is not a JSON object".to_owned())?;
        let map = top
            .get(key)
            .ok_or_else(|| format!("registry document has no '{key}' key"))?
            .as_object()
            .ok_or_else(|| format!("'{key}' is not a JSON object"))?;

        let mut entries = BTreeMap::new();
        let mut dropped = Vec::new();
        for (entry_key, raw) in map {
            match CapabilityDescriptor::from_registry_entry(kind, entry_key, raw) {
                Ok(descriptor) => {
                    entries.insert(descriptor.id.clone(), descriptor);
                },
                Err(reason) => {
                    warn!(kind = %kind, key = %entry_key, %reason, "Dropping registry entry");
                    dropped.push(DroppedEntry {
                        key: entry_key.clone(),
                        reason,
                    });
                },
            }
        }

        let default_id = top
            .get(DEFAULT_AGENT_KEY)
            .and_then(serde_json::Value::as_str)
            .and_then(|s| CapabilityId::new(s).ok());

        Ok(Self {
            kind,
            source_url: source_url.to_owned(),
            fetched_at: Some(Utc::now()),
            entries,
            default_id,
            origin: RegistryOrigin::Remote,
            dropped,
        })
    }
}

/// Fetches one kind's registry and keeps the last snapshot.
pub struct RegistryClient {
    kind: CapabilityKind,
    source_url: RwLock<String>,
    cache_path: PathBuf,
    timeout: Duration,
    http: reqwest::Client,
    snapshot: RwLock<Arc<Registry>>,
}

impl RegistryClient {
    /// Create a client. No request is made until [`fetch`](Self::fetch).
    #[must_use]
    pub fn new(
        kind: CapabilityKind,
        source_url: impl Into<String>,
        cache_path: impl Into<PathBuf>,
        timeout: Duration,
        http: reqwest::Client,
    ) -> Self {
        let source_url = source_url.into();
        let initial = Registry::empty(kind, source_url.clone(), "not fetched yet");
        Self {
            kind,
            source_url: RwLock::new(source_url),
            cache_path: cache_path.into(),
            timeout,
            http,
            snapshot: RwLock::new(Arc::new(initial)),
        }
    }

    /// Kind this client fetches.
    #[must_use]
    pub fn kind(&self) -> CapabilityKind {
        self.kind
    }

    /// The URL future fetches will use.
    #[must_use]
    pub fn source_url(&self) -> String {
        self.source_url
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Point future fetches at another registry.
    ///
    /// Already-installed capabilities are not revalidated.
    pub fn set_source_url(&self, url: impl Into<String>) {
        let url = url.into();
        info!(kind = %self.kind, %url, "Registry source changed");
        *self
            .source_url
            .write()
            .unwrap_or_else(PoisonError::into_inner) = url;
    }

    /// Path of the on-disk cache.
    #[must_use]
    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// The last registry produced by a fetch (empty before the first one).
    #[must_use]
    pub fn snapshot(&self) -> Arc<Registry> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Fetch from the current source URL.
    pub async fn fetch(&self) -> Arc<Registry> {
        let url = self.source_url();
        self.fetch_url(&url).await
    }

    /// Fetch `url`, falling back to the cache and then to an empty registry.
    pub async fn fetch_url(&self, url: &str) -> Arc<Registry> {
        let registry = match self.fetch_remote(url).await {
            Ok((doc, registry)) => {
                self.write_cache(&doc);
                info!(
                    kind = %self.kind,
                    %url,
                    entries = registry.len(),
                    dropped = registry.dropped.len(),
                    "Fetched registry"
                );
                registry
            },
            Err(reason) => {
                warn!(kind = %self.kind, %url, %reason, "Registry fetch failed, using cache");
                self.load_cache(url, reason)
            },
        };

        let registry = Arc::new(registry);
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&registry);
        registry
    }

    async fn fetch_remote(&self, url: &str) -> Result<(serde_json::Value, Registry), String> {
        let response = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        if !response.status().is_success() {
            return Err(format!("registry returned {}", response.status()));
        }
        let body = read_capped(response, MAX_REGISTRY_BYTES).await?;
        let doc: serde_json::Value =
            serde_json::from_slice(&body).map_err(|e| format!("invalid JSON: {e}"))?;
        let registry = Registry::from_document(self.kind, url, &doc)?;
        Ok((doc, registry))
    }

    fn write_cache(&self, doc: &serde_json::Value) {
        let result = serde_json::to_vec_pretty(doc)
            .map_err(std::io::Error::other)
            .and_then(|bytes| atomic_write(&self.cache_path, &bytes));
        if let Err(e) = result {
            // The fresh registry is still returned; only the fallback is stale.
            warn!(path = %self.cache_path.display(), error = %e, "Failed to write registry cache");
        }
    }

    fn load_cache(&self, url: &str, reason: String) -> Registry {
        let bytes = match std::fs::read(&self.cache_path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.cache_path.display(), "No registry cache");
                return Registry::empty(self.kind, url, reason);
            },
            Err(e) => {
                return Registry::empty(self.kind, url, format!("{reason}; cache unreadable: {e}"));
            },
        };

        let parsed = serde_json::from_slice::<serde_json::Value>(&bytes)
            .map_err(|e| format!("invalid JSON: {e}"))
            .and_then(|doc| Registry::from_document(self.kind, url, &doc));

        match parsed {
            Ok(mut registry) => {
                registry.fetched_at = std::fs::metadata(&self.cache_path)
                    .and_then(|m| m.modified())
                    .ok()
                    .map(DateTime::<Utc>::from);
                registry.origin = RegistryOrigin::Cache { reason };
                registry
            },
            Err(e) => {
                warn!(path = %self.cache_path.display(), error = %e, "Registry cache is unusable");
                Registry::empty(self.kind, url, format!("{reason}; cache unusable: {e}"))
            },
        }
    }
}

impl std::fmt::Debug for RegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryClient")
            .field("kind", &self.kind)
            .field("source_url", &self.source_url())
            .field("cache_path", &self.cache_path)
            .finish_non_exhaustive()
    }
}

/// Read a response body, failing as soon as it exceeds `limit` bytes.
async fn read_capped(response: reqwest::Response, limit: u64) -> Result<Vec<u8>, String> {
    if let Some(len) = response.content_length()
        && len > limit
    {
        return Err(format!("registry is {len} bytes (limit: {limit} bytes)"));
    }

    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| format!("reading body failed: {e}"))?;
        body.extend_from_slice(&chunk);
        if u64::try_from(body.len()).unwrap_or(u64::MAX) > limit {
            return Err(format!("registry exceeds {limit} bytes"));
        }
    }
    Ok(body)
}
