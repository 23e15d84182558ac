// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the coldwatch project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! LRU cache for computed history bundles.
//!
//! Entries expire by TTL; any advance of the archive generation clears the
//! whole cache, so a query issued after an archive append never sees the
//! pre-append result.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;
use lru::LruCache;

use super::aggregate::SeriesBundle;

struct CacheEntry {
    bundle: Arc<SeriesBundle>,
    inserted: Instant,
}

pub struct HistoryCache {
    entries: LruCache<String, CacheEntry>,
    ttl: Duration,
    generation_seen: u64,
}

impl HistoryCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            ttl,
            generation_seen: 0,
        }
    }

    /// Cached bundle for a scope key, if still valid under `generation`.
    pub fn get(&mut self, key: &str, generation: u64) -> Option<Arc<SeriesBundle>> {
        if generation != self.generation_seen {
            debug!(
                "Archive generation advanced ({} -> {}), clearing history cache",
                self.generation_seen, generation
            );
            self.entries.clear();
            self.generation_seen = generation;
            return None;
        }

        let entry = self.entries.get(key)?;
        if entry.inserted.elapsed() > self.ttl {
            self.entries.pop(key);
            return None;
        }
        Some(entry.bundle.clone())
    }

    pub fn put(&mut self, key: String, generation: u64, bundle: Arc<SeriesBundle>) {
        if generation != self.generation_seen {
            self.entries.clear();
            self.generation_seen = generation;
        }
        self.entries.put(
            key,
            CacheEntry {
                bundle,
                inserted: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
