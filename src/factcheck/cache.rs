//! Run-wide memo of link → verdict.
//!
//! The cache sits in front of every fact-check fetch so a link shared by many
//! images is fetched once per process. Storage is pluggable through
//! [`VerdictStore`]; [`MemoryStore`] is the default and can be seeded from,
//! and dumped to, a JSON file so a later run starts warm.

use crate::error::Result;
use crate::models::Verdict;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Backing storage for [`ClassificationCache`].
pub trait VerdictStore: Send + Sync {
    fn get(&self, link: &str) -> Option<Verdict>;
    fn insert(&self, link: &str, verdict: Verdict);
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Mutex-guarded in-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Verdict>>,
}

impl MemoryStore {
    pub fn from_entries(entries: BTreeMap<String, Verdict>) -> Self {
        Self {
            entries: Mutex::new(entries),
        }
    }

    /// Copy of everything stored so far.
    pub fn entries(&self) -> BTreeMap<String, Verdict> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl VerdictStore for MemoryStore {
    fn get(&self, link: &str) -> Option<Verdict> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(link)
            .copied()
    }

    fn insert(&self, link: &str, verdict: Verdict) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(link.to_string(), verdict);
    }

    fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

/// Memoizes verdicts by exact link.
///
/// Misses are computed while holding that link's async gate, so two images
/// racing on the same link still cause a single classification, while
/// different links are classified independently. Failed classifications are
/// not stored.
#[derive(Debug)]
pub struct ClassificationCache<S = MemoryStore> {
    store: S,
    gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl Default for ClassificationCache<MemoryStore> {
    fn default() -> Self {
        Self::new(MemoryStore::default())
    }
}

impl<S> ClassificationCache<S>
where
    S: VerdictStore,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            gates: Mutex::new(HashMap::new()),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    #[cfg(test)]
    pub fn get(&self, link: &str) -> Option<Verdict> {
        self.store.get(link)
    }

    /// Cached verdict for `link`, or the result of `classify`, which is then stored.
    pub async fn get_or_classify<F, Fut>(&self, link: &str, classify: F) -> Result<Verdict>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Verdict>>,
    {
        if let Some(verdict) = self.store.get(link) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(%link, ?verdict, "Classification cache hit");
            return Ok(verdict);
        }

        let gate = self.gate(link);
        let _held = gate.lock().await;
        // Another image may have filled it while we waited.
        if let Some(verdict) = self.store.get(link) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(verdict);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let verdict = classify().await?;
        self.store.insert(link, verdict);
        debug!(%link, ?verdict, "Classification cached");
        Ok(verdict)
    }

    /// The gate serializing classifications of `link`.
    fn gate(&self, link: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self
            .gates
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(gates.entry(link.to_string()).or_default())
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}
