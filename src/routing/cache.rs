//! Copy-on-write cache of resolved routes

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant, SystemTime};

use serde::Serialize;
use tracing::trace;

use crate::routing::RouteEntry;

/// Identity of an executable file at caching time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    modified: Option<SystemTime>,
    len: u64,
}

impl Fingerprint {
    fn of(path: &Path) -> Option<Self> {
        let metadata = fs::metadata(path).ok()?;
        Some(Self {
            modified: metadata.modified().ok(),
            len: metadata.len(),
        })
    }
}

#[derive(Debug, Clone)]
struct CachedRoute {
    entry: Arc<RouteEntry>,
    fingerprint: Fingerprint,
    inserted_at: Instant,
}

type Snapshot = Arc<HashMap<String, CachedRoute>>;

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
}

/// Route cache keyed by normalized path.
///
/// Readers take an `Arc` of the current immutable map and release the lock
/// immediately; writers copy the map, modify the copy and swap it in.
#[derive(Debug)]
pub struct RouteCache {
    snapshot: RwLock<Snapshot>,
    ttl: Option<Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl RouteCache {
    /// Create a cache; entries older than `ttl` are re-resolved
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(HashMap::new())),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    fn current(&self) -> Snapshot {
        Arc::clone(&self.snapshot.read().unwrap_or_else(|e| e.into_inner()))
    }

    fn update(&self, change: impl FnOnce(&mut HashMap<String, CachedRoute>)) {
        let mut guard = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        let mut next = HashMap::clone(&guard);
        change(&mut next);
        *guard = Arc::new(next);
    }

    /// Return a still-valid entry.
    ///
    /// An entry whose executable changed, vanished or outlived the TTL is
    /// evicted and reported as a miss.
    pub fn get(&self, route_path: &str) -> Option<Arc<RouteEntry>> {
        let snapshot = self.current();
        let Some(cached) = snapshot.get(route_path) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let expired = self.ttl.is_some_and(|ttl| cached.inserted_at.elapsed() > ttl);
        let changed = Fingerprint::of(&cached.entry.executable) != Some(cached.fingerprint);

        if expired || changed {
            trace!(
                target: "exec_router::routing",
                route = %route_path,
                expired,
                changed,
                "Evicting stale route"
            );
            self.invalidate(route_path);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(Arc::clone(&cached.entry))
    }

    /// Cache a freshly resolved entry and return the shared handle
    pub fn insert(&self, entry: RouteEntry) -> Arc<RouteEntry> {
        let entry = Arc::new(entry);

        // An executable that cannot be stat'ed right now is not worth caching
        if let Some(fingerprint) = Fingerprint::of(&entry.executable) {
            let cached = CachedRoute {
                entry: Arc::clone(&entry),
                fingerprint,
                inserted_at: Instant::now(),
            };
            self.update(|map| {
                map.insert(entry.route_path.clone(), cached);
            });
        }

        entry
    }

    /// Drop one entry
    pub fn invalidate(&self, route_path: &str) {
        if self.current().contains_key(route_path) {
            self.update(|map| {
                map.remove(route_path);
            });
            self.invalidations.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Drop every entry
    pub fn invalidate_all(&self) {
        if !self.is_empty() {
            self.update(HashMap::clear);
            self.invalidations.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn len(&self) -> usize {
        self.current().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

impl Default for RouteCache {
    fn default() -> Self {
        Self::new(None)
    }
}
