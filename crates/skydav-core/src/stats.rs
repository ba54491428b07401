//! Lock-free counters describing cache and dispatch behaviour.
//!
//! # Usage
//!
//! ```
//! use skydav_core::stats::EngineStats;
//!
//! let stats = EngineStats::new();
//! stats.record_hit();
//! stats.record_miss();
//! assert_eq!(stats.snapshot().hits, 1);
//! assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
//! ```

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the cache, the coalescer and the detector.
#[derive(Debug, Default)]
pub struct EngineStats {
    hits: AtomicU64,
    misses: AtomicU64,
    not_found: AtomicU64,
    unknown_content: AtomicU64,
    inserts: AtomicU64,
    expired: AtomicU64,
    evictions: AtomicU64,
    clears: AtomicU64,
    consistency_violations: AtomicU64,
    coalesced: AtomicU64,
    upstream_fetches: AtomicU64,
    external_changes: AtomicU64,
}

impl EngineStats {
    /// Create zeroed statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// A lookup answered with a fresh entry.
    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// A lookup answered `Unknown`.
    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// A lookup answered with confirmed absence.
    #[inline]
    pub fn record_not_found(&self) {
        self.not_found.fetch_add(1, Ordering::Relaxed);
    }

    /// A folder lookup found the folder but not its full listing.
    #[inline]
    pub fn record_unknown_content(&self) {
        self.unknown_content.fetch_add(1, Ordering::Relaxed);
    }

    /// `count` items were written.
    #[inline]
    pub fn record_inserts(&self, count: u64) {
        self.inserts.fetch_add(count, Ordering::Relaxed);
    }

    /// `count` items were dropped for being past their TTL.
    #[inline]
    pub fn record_expired(&self, count: u64) {
        self.expired.fetch_add(count, Ordering::Relaxed);
    }

    /// `count` items were explicitly evicted.
    #[inline]
    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    /// The whole cache was dropped.
    #[inline]
    pub fn record_clear(&self) {
        self.clears.fetch_add(1, Ordering::Relaxed);
    }

    /// Cache and upstream disagreed after a mutation.
    #[inline]
    pub fn record_consistency_violation(&self) {
        self.consistency_violations.fetch_add(1, Ordering::Relaxed);
    }

    /// A caller joined an in-flight fetch instead of issuing its own.
    #[inline]
    pub fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    /// A fetch went upstream.
    #[inline]
    pub fn record_upstream_fetch(&self) {
        self.upstream_fetches.fetch_add(1, Ordering::Relaxed);
    }

    /// The detector found a mutation made outside this process.
    #[inline]
    pub fn record_external_change(&self) {
        self.external_changes.fetch_add(1, Ordering::Relaxed);
    }

    /// Hits over hits plus misses; 0.0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Copy the current values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            unknown_content: self.unknown_content.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            clears: self.clears.load(Ordering::Relaxed),
            consistency_violations: self.consistency_violations.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            upstream_fetches: self.upstream_fetches.load(Ordering::Relaxed),
            external_changes: self.external_changes.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Lookups answered with a fresh entry.
    pub hits: u64,
    /// Lookups answered `Unknown`.
    pub misses: u64,
    /// Lookups answered with confirmed absence.
    pub not_found: u64,
    /// Folder lookups with an incomplete listing.
    pub unknown_content: u64,
    /// Items written.
    pub inserts: u64,
    /// Items dropped past their TTL.
    pub expired: u64,
    /// Items explicitly evicted.
    pub evictions: u64,
    /// Full cache clears.
    pub clears: u64,
    /// Cache/upstream disagreements after a mutation.
    pub consistency_violations: u64,
    /// Callers served by another caller's fetch.
    pub coalesced: u64,
    /// Fetches that went upstream.
    pub upstream_fetches: u64,
    /// External mutations detected.
    pub external_changes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let stats = EngineStats::new();
        assert!(stats.hit_rate().abs() < f64::EPSILON);

        stats.record_hit();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        assert!((stats.hit_rate() - 0.75).abs() < 0.001);
    }

    #[test]
    fn test_snapshot() {
        let stats = EngineStats::new();
        stats.record_inserts(3);
        stats.record_clear();
        stats.record_coalesced();

        let snap = stats.snapshot();
        assert_eq!(snap.inserts, 3);
        assert_eq!(snap.clears, 1);
        assert_eq!(snap.coalesced, 1);
        assert_eq!(snap.hits, 0);
    }
}
