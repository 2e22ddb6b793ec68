//! The live URL → record map.

use crate::quiescence::IdleSignal;
use crate::record::PageRecord;
use pagewright_types::RecordId;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Published records keyed by URL.
///
/// Only the orchestrator writes to the map; everything else reads
/// snapshots and must tolerate the map changing between calls.
#[derive(Debug, Clone, Default)]
pub struct PageMap {
    inner: Arc<RwLock<BTreeMap<String, PageRecord>>>,
    idle: IdleSignal,
}

impl PageMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a page by URL, tolerating differences in percent-encoding
    pub fn get(&self, url: &str) -> Option<PageRecord> {
        let pages = self.inner.read();
        pages
            .get(url)
            .or_else(|| pages.get(&normalize_url(url)))
            .cloned()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.get(url).is_some()
    }

    pub fn urls(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }

    /// Records in URL order
    pub fn snapshot(&self) -> Vec<PageRecord> {
        self.inner.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn idle(&self) -> &IdleSignal {
        &self.idle
    }

    pub fn is_idle(&self) -> bool {
        self.idle.is_idle()
    }

    /// Wait until no work has completed for a polling interval
    pub async fn wait_idle(&self) {
        self.idle.wait().await
    }

    /// Publish a record under its URL, replacing any previous entry
    pub(crate) fn publish(&self, record: PageRecord) -> Option<PageRecord> {
        let url = record.url()?.to_string();
        self.inner.write().insert(url, record)
    }

    /// Remove `url` if it still holds the record `id`
    pub(crate) fn evict(&self, url: &str, id: RecordId) -> Option<PageRecord> {
        let mut pages = self.inner.write();
        if pages.get(url).is_some_and(|r| r.id == id) {
            pages.remove(url)
        } else {
            None
        }
    }

    pub(crate) fn clear(&self) {
        self.inner.write().clear();
    }
}

/// Decode then re-encode every path segment so equivalent URLs compare equal
pub fn normalize_url(url: &str) -> String {
    url.split('/')
        .map(|segment| {
            let decoded = urlencoding::decode(segment)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| segment.to_string());
            urlencoding::encode(&decoded).into_owned()
        })
        .collect::<Vec<_>>()
        .join("/")
}
