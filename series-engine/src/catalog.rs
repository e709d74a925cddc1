//! Per-file channel catalogs with process-wide caching
//!
//! The catalog is the engine's one source of truth for "which channels does
//! this file contain". Population is lazy: the first request for a path opens
//! the file through the format dispatch, deduplicates the reported names while
//! preserving order, and caches the result. Unreadable files yield an empty
//! catalog, never an error, so one bad file cannot abort a request.

use crate::formats;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Cached mapping from file path to its canonical channel name list
///
/// Once populated for a path the entry is never silently invalidated; only an
/// explicit `clear()` (driven by the upload/delete/purge collaborator) drops
/// cached catalogs.
#[derive(Default)]
pub struct ChannelCatalog {
    cache: Mutex<HashMap<String, Arc<Vec<String>>>>,
}

impl ChannelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical channel list for a file, order-preserving and de-duplicated.
    /// Returns an empty list when the file cannot be opened or enumerated.
    pub fn list_channels(&self, path: &Path) -> Arc<Vec<String>> {
        let key = path.to_string_lossy().into_owned();

        if let Ok(cache) = self.cache.lock() {
            if let Some(hit) = cache.get(&key) {
                return Arc::clone(hit);
            }
        }

        let names = match formats::open_source(path) {
            Some(source) => dedup_preserving_order(source.channels()),
            None => {
                log::warn!("No reader could enumerate channels of {:?}", path);
                Vec::new()
            }
        };
        log::debug!("Catalog for {:?}: {} channel(s)", path, names.len());

        let entry = Arc::new(names);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, Arc::clone(&entry));
        }
        entry
    }

    /// Drop every cached catalog. Must be called whenever the file set
    /// mutates, before new requests are served.
    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            let dropped = cache.len();
            cache.clear();
            log::info!("Channel catalog cleared ({} entr(ies) dropped)", dropped);
        }
    }

    #[cfg(test)]
    pub fn cached_paths(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }
}

fn dedup_preserving_order(names: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    names
        .iter()
        .filter(|n| !n.is_empty() && seen.insert(n.as_str().to_owned()))
        .cloned()
        .collect()
}
