//! Cache of externally assembled pipelines.
//!
//! Assembling a pipeline is expensive and belongs to the execution engine, so
//! results are memoized by content fingerprint. Entries expire on a monotonic
//! clock; an expired entry is a miss even before the sweeper removes it.

mod clock;
mod sweeper;

pub use clock::{Clock, ManualClock, TokioClock};
pub use sweeper::{spawn_sweeper, SweeperHandle};

use parking_lot::RwLock;
use routeplan_core::{AssemblyFingerprint, PipelineEntry};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Default capacity of an assembly cache.
pub const DEFAULT_MAX_ENTRIES: usize = 1_024;

/// Expiry horizon used when `now + ttl` is not representable (about 30 years).
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Cache key: a virtual model and the fingerprint of its routes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssemblyKey {
    pub virtual_model_id: String,
    pub fingerprint: AssemblyFingerprint,
}

impl AssemblyKey {
    pub fn new(virtual_model_id: impl Into<String>, entries: &[PipelineEntry]) -> Self {
        let virtual_model_id = virtual_model_id.into();
        let fingerprint = AssemblyFingerprint::compute(&virtual_model_id, entries);
        Self {
            virtual_model_id,
            fingerprint,
        }
    }
}

#[derive(Debug)]
struct CachedAssembly<P> {
    pipeline: P,
    expires_at: Instant,
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub sweeps: u64,
}

/// Fingerprint-keyed pipeline cache with TTL expiry.
#[derive(Debug)]
pub struct AssemblyCache<P> {
    entries: RwLock<HashMap<AssemblyKey, Arc<CachedAssembly<P>>>>,
    clock: Arc<dyn Clock>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    sweeps: AtomicU64,
}

impl<P: Clone> AssemblyCache<P> {
    /// Create a cache on tokio's clock.
    pub fn new(max_entries: usize) -> Self {
        Self::with_clock(max_entries, Arc::new(TokioClock))
    }

    pub fn with_clock(max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            sweeps: AtomicU64::new(0),
        }
    }

    /// Get a live entry.
    pub fn get(&self, key: &AssemblyKey) -> Option<P> {
        let cached = self.entries.read().get(key).cloned();
        match cached {
            Some(cached) if cached.expires_at > self.clock.now() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(cached.pipeline.clone())
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a pipeline for `ttl`.
    ///
    /// At capacity, expired entries are dropped first, then the entry
    /// closest to expiry.
    pub fn put(&self, key: AssemblyKey, pipeline: P, ttl: Duration) {
        let now = self.clock.now();
        let cached = Arc::new(CachedAssembly {
            pipeline,
            expires_at: now
                .checked_add(ttl)
                .unwrap_or_else(|| now + FAR_FUTURE),
        });

        let mut entries = self.entries.write();
        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            let before = entries.len();
            entries.retain(|_, e| e.expires_at > now);
            let mut evicted = (before - entries.len()) as u64;

            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.expires_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                    evicted += 1;
                }
            }
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
        }
        entries.insert(key, cached);
    }

    /// Remove expired entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        let removed = before - entries.len();
        drop(entries);

        self.sweeps.fetch_add(1, Ordering::Relaxed);
        if removed > 0 {
            tracing::debug!(removed, "Swept expired assemblies");
        }
        removed
    }

    pub fn invalidate(&self, key: &AssemblyKey) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// Keep only entries for which `keep` returns true. Returns how many were removed.
    pub fn retain_virtual_models<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&AssemblyKey) -> bool,
    {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, _| keep(key));
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
        }
    }
}

impl<P: Clone> Default for AssemblyCache<P> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}
