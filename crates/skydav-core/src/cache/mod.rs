//! Tree-shaped entry cache with TTL expiry and partial-content tracking.
//!
//! The cache is a flat index from [`CloudPath`] to [`CacheItem`]. Folders are
//! never stored with their children attached: a listing is rebuilt by
//! scanning the index for direct children, and is only served when the
//! folder is flagged `all_descendants_in_cache` and none of those children
//! has expired. Anything the cache cannot vouch for comes back as
//! [`GetState::Unknown`].
//!
//! # Concurrency
//!
//! Reads are lock-free `DashMap` lookups. Every multi-step mutation (e.g.
//! "flip the parent's completeness flag, then drop the child") and every
//! listing reconstruction runs under one mutation lock, so a listing never
//! observes half of such a step. No lock is held across an await point.
//!
//! # Features
//!
//! - `cache-tracing`: per-operation spans and trace events for debugging

mod item;

pub use item::{CacheItem, GetState};

use crate::config::SkydavConfig;
use crate::detector::{ChangeDetector, ReconcileOutcome};
use crate::entry::{Entry, Folder};
use crate::path::CloudPath;
use crate::repo::ActivitySnapshot;
use crate::stats::EngineStats;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[cfg(feature = "cache-tracing")]
macro_rules! cache_span {
    ($name:expr, $($field:tt)*) => {
        tracing::debug_span!($name, $($field)*)
    };
}

#[cfg(not(feature = "cache-tracing"))]
macro_rules! cache_span {
    ($name:expr, $($field:tt)*) => {
        tracing::Span::none()
    };
}

#[cfg(feature = "cache-tracing")]
macro_rules! cache_event {
    ($level:ident, $($arg:tt)*) => {
        tracing::$level!($($arg)*)
    };
}

#[cfg(not(feature = "cache-tracing"))]
macro_rules! cache_event {
    ($level:ident, $($arg:tt)*) => {};
}

/// The session's mirror of the remote tree.
pub struct EntryCache {
    index: DashMap<CloudPath, CacheItem>,
    /// Guards multi-step mutations and listing reconstruction.
    mutation: Mutex<()>,
    /// Zero disables caching.
    ttl: Duration,
    detector: Arc<ChangeDetector>,
    stats: Arc<EngineStats>,
}

impl EntryCache {
    /// Create a cache configured from `config`.
    pub fn new(config: &SkydavConfig, stats: Arc<EngineStats>) -> Self {
        let detector = Arc::new(ChangeDetector::new(
            config.counter_lag_tolerance,
            Arc::clone(&stats),
        ));
        Self::with_detector(config.cache_ttl, detector, stats)
    }

    /// Create a cache with the given TTL and default detector settings.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self::new(&SkydavConfig::default().cache_ttl(ttl), Arc::new(EngineStats::new()))
    }

    /// Create a cache around an existing detector.
    pub fn with_detector(
        ttl: Duration,
        detector: Arc<ChangeDetector>,
        stats: Arc<EngineStats>,
    ) -> Self {
        Self {
            index: DashMap::new(),
            mutation: Mutex::new(()),
            ttl,
            detector,
            stats,
        }
    }

    /// Entry time-to-live.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// False when the TTL is zero; every lookup is then `Unknown`.
    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// The external-change detector attached to this cache.
    pub fn detector(&self) -> &Arc<ChangeDetector> {
        &self.detector
    }

    /// Shared statistics.
    pub fn stats(&self) -> &Arc<EngineStats> {
        &self.stats
    }

    /// Number of records, tombstones included.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// Answer from local state only. Never blocks on upstream.
    pub fn get(&self, path: &CloudPath) -> GetState {
        let _span = cache_span!("entry_cache.get", path = %path).entered();
        let state = self.lookup(path);
        match &state {
            GetState::Unknown => self.stats.record_miss(),
            GetState::NotExists => self.stats.record_not_found(),
            GetState::Entry(_) => self.stats.record_hit(),
            GetState::EntryWithUnknownContent(_) => self.stats.record_unknown_content(),
        }
        cache_event!(trace, path = %path, state = ?state, "Entry cache lookup");
        state
    }

    fn lookup(&self, path: &CloudPath) -> GetState {
        if !self.is_enabled() {
            return GetState::Unknown;
        }
        let now = Instant::now();
        let Some(item) = self.index.get(path).map(|r| r.value().clone()) else {
            return self.absence_via_parent(path, now);
        };
        if item.is_expired(now, self.ttl) {
            self.expire(path);
            return GetState::Unknown;
        }
        match item.entry {
            None => GetState::NotExists,
            Some(Entry::Folder(_)) if item.all_descendants_in_cache => self.listing(path),
            Some(entry @ Entry::Folder(_)) => GetState::EntryWithUnknownContent(entry),
            Some(entry @ (Entry::File(_) | Entry::Link(_))) => GetState::Entry(entry),
        }
    }

    /// A path missing from the index is absent if its parent is a fresh
    /// tombstone or a fresh folder with a complete listing.
    fn absence_via_parent(&self, path: &CloudPath, now: Instant) -> GetState {
        let Some(parent) = path.parent() else {
            return GetState::Unknown;
        };
        let confirmed = self.index.get(&parent).is_some_and(|r| {
            let item = r.value();
            !item.is_expired(now, self.ttl) && (item.is_tombstone() || item.is_complete_folder())
        });
        if confirmed {
            GetState::NotExists
        } else {
            GetState::Unknown
        }
    }

    /// Rebuild a complete folder listing from the index.
    fn listing(&self, path: &CloudPath) -> GetState {
        let _guard = self.mutation.lock();
        let now = Instant::now();

        // Re-read under the lock; a mutation may have landed since the
        // lock-free lookup.
        let Some(folder) = self.index.get(path).map(|r| r.value().clone()) else {
            return GetState::Unknown;
        };
        if folder.is_expired(now, self.ttl) {
            return GetState::Unknown;
        }
        let complete = folder.is_complete_folder();
        let info = match folder.entry {
            Some(Entry::Folder(Folder { info, .. })) => info,
            Some(entry) => return GetState::Entry(entry),
            None => return GetState::NotExists,
        };
        if !complete {
            return GetState::EntryWithUnknownContent(Entry::Folder(Folder::new(info)));
        }

        let mut children = Vec::new();
        let mut stale_child = false;
        for r in self.index.iter() {
            if !r.key().is_direct_child_of(path) {
                continue;
            }
            let item = r.value();
            if item.is_expired(now, self.ttl) {
                stale_child = true;
                break;
            }
            if let Some(child) = &item.entry {
                children.push(child.clone());
            }
        }

        if stale_child {
            cache_event!(debug, path = %path, "Listing has an expired child");
            self.set_complete_locked(path, false);
            return GetState::Unknown;
        }

        children.sort_by(|a, b| a.path().cmp(b.path()));
        GetState::Entry(Entry::Folder(Folder::with_children(info, children)))
    }

    // ========================================================================
    // Inserts
    // ========================================================================

    /// Insert or refresh `entry`.
    ///
    /// A folder carrying children is taken as its complete listing: cached
    /// children missing from it are dropped, each listed child is inserted,
    /// and the folder is marked complete. A folder without children keeps
    /// its completeness only if the record it replaces was fresh and complete.
    pub fn add(&self, entry: Entry) {
        if !self.is_enabled() {
            return;
        }
        let _span = cache_span!("entry_cache.add", path = %entry.path()).entered();
        let _guard = self.mutation.lock();
        let written = self.add_locked(entry, Instant::now());
        self.stats.record_inserts(written);
    }

    fn add_locked(&self, entry: Entry, now: Instant) -> u64 {
        let (node, children) = entry.into_parts();
        let path = node.path().clone();

        let Some(children) = children else {
            let complete = matches!(node, Entry::Folder(_))
                && self
                    .index
                    .get(&path)
                    .is_some_and(|r| !r.is_expired(now, self.ttl) && r.is_complete_folder());
            if !matches!(node, Entry::Folder(_)) {
                // A file or link has no descendants; drop any left from an
                // earlier folder at the same path.
                let dropped = self.evict_matching_locked(|k| k != &path && k.is_at_or_below(&path));
                self.stats.record_evictions(dropped as u64);
            }
            self.index.insert(path, CacheItem::new(node, complete, now));
            return 1;
        };

        // Readers must not see the old completeness while children change
        self.set_complete_locked(&path, false);

        let listed: HashSet<CloudPath> = children.iter().map(|c| c.path().clone()).collect();
        let stale: Vec<CloudPath> = self
            .index
            .iter()
            .filter(|r| r.key().is_direct_child_of(&path) && !listed.contains(r.key()))
            .map(|r| r.key().clone())
            .collect();
        for child in &stale {
            let dropped = self.evict_matching_locked(|k| k.is_at_or_below(child));
            self.stats.record_evictions(dropped as u64);
        }
        if !stale.is_empty() {
            debug!(path = %path, pruned = stale.len(), "Pruned children missing from listing");
        }

        let mut written = 0;
        for child in children {
            if !child.path().is_direct_child_of(&path) {
                warn!(parent = %path, child = %child.path(), "Ignoring listed entry outside its folder");
                continue;
            }
            written += self.add_locked(child, now);
        }

        self.index.insert(path, CacheItem::new(node, true, now));
        written + 1
    }

    /// Record that `path` is confirmed absent upstream.
    pub fn mark_not_exists(&self, path: &CloudPath) {
        if !self.is_enabled() {
            return;
        }
        let _guard = self.mutation.lock();
        let had_entry = self.index.get(path).is_some_and(|r| !r.is_tombstone());
        if had_entry {
            self.mark_parent_incomplete_locked(path);
        }
        let dropped = self.evict_matching_locked(|k| k.is_at_or_below(path));
        self.index.insert(path.clone(), CacheItem::tombstone(Instant::now()));
        self.stats.record_evictions(dropped as u64);
        cache_event!(trace, path = %path, "Cached confirmed absence");
    }

    // ========================================================================
    // Mutation notifications
    // ========================================================================

    /// Called after an operation that should have produced `path`.
    ///
    /// `fetched` is what upstream returned for `path` right after the
    /// operation. `None` means the cache and upstream disagree; the cache is
    /// then cleared.
    pub fn on_create(&self, path: &CloudPath, fetched: Option<Entry>) {
        let Some(entry) = fetched else {
            error!(path = %path, "Upstream has no entry at a just-created path, clearing cache");
            self.stats.record_consistency_violation();
            self.clear();
            return;
        };
        if !self.is_enabled() {
            return;
        }
        if entry.path() != path {
            warn!(expected = %path, actual = %entry.path(), "Created entry came back under another path");
        }

        let _guard = self.mutation.lock();
        let now = Instant::now();
        let target = entry.path().clone();
        let existed = self
            .index
            .get(&target)
            .is_some_and(|r| !r.is_expired(now, self.ttl) && !r.is_tombstone());
        let is_folder = entry.is_folder();

        let written = self.add_locked(entry, now);
        self.stats.record_inserts(written);

        if !existed
            && let Some(parent) = target.parent()
            && let Some(mut item) = self.index.get_mut(&parent)
            && !item.is_expired(now, self.ttl)
            && item.all_descendants_in_cache
            && let Some(Entry::Folder(folder)) = item.entry.as_mut()
        {
            folder.info.adjust_counts(is_folder, 1);
        }
        debug!(path = %target, existed, "Cached created entry");
    }

    /// Called after an operation that should have removed `path`.
    ///
    /// `Some` in `fetched` means upstream still has the entry; the cache is
    /// then cleared. Otherwise everything at or below `path` is dropped, a
    /// tombstone takes its place and the parent's listing becomes unknown.
    pub fn on_remove_tree(&self, path: &CloudPath, fetched: Option<Entry>) {
        if let Some(entry) = fetched {
            error!(
                path = %path,
                found = %entry.path(),
                "Upstream still has an entry at a just-removed path, clearing cache"
            );
            self.stats.record_consistency_violation();
            self.clear();
            return;
        }
        if !self.is_enabled() {
            return;
        }

        let _guard = self.mutation.lock();
        let now = Instant::now();
        let removed_kind = self
            .index
            .get(path)
            .and_then(|r| r.entry.as_ref().map(Entry::is_folder));

        if let Some(parent) = path.parent()
            && let Some(mut item) = self.index.get_mut(&parent)
        {
            if let (Some(Entry::Folder(folder)), Some(is_folder)) = (item.entry.as_mut(), removed_kind)
            {
                folder.info.adjust_counts(is_folder, -1);
            }
            item.all_descendants_in_cache = false;
        }

        let dropped = self.evict_matching_locked(|k| k.is_at_or_below(path));
        self.index.insert(path.clone(), CacheItem::tombstone(now));
        self.stats.record_evictions(dropped as u64);
        debug!(path = %path, dropped, "Cached removal");
    }

    /// Tell the detector a local mutation just happened.
    pub fn reset_check(&self) {
        self.detector.reset_check();
    }

    /// Compare an activity snapshot with local state and invalidate accordingly.
    pub fn reconcile(&self, snapshot: &ActivitySnapshot) -> ReconcileOutcome {
        self.detector.reconcile(self, snapshot)
    }

    // ========================================================================
    // Eviction
    // ========================================================================

    /// Drop the record at `path` only.
    pub fn remove_one(&self, path: &CloudPath) {
        let _guard = self.mutation.lock();
        self.mark_parent_incomplete_locked(path);
        if self.index.remove(path).is_some() {
            self.stats.record_evictions(1);
        }
    }

    /// Drop every record at or below `path`.
    pub fn remove_tree(&self, path: &CloudPath) -> usize {
        let _guard = self.mutation.lock();
        self.mark_parent_incomplete_locked(path);
        let dropped = self.evict_matching_locked(|k| k.is_at_or_below(path));
        self.stats.record_evictions(dropped as u64);
        dropped
    }

    /// Drop everything.
    pub fn clear(&self) {
        let _guard = self.mutation.lock();
        let entries = self.index.len();
        self.index.clear();
        self.stats.record_clear();
        info!(entries, "Cleared entry cache");
    }

    /// Remove every expired record. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let _guard = self.mutation.lock();
        let now = Instant::now();
        let expired: Vec<(CloudPath, bool)> = self
            .index
            .iter()
            .filter(|r| r.value().is_expired(now, self.ttl))
            .map(|r| (r.key().clone(), !r.value().is_tombstone()))
            .collect();
        for (path, had_entry) in &expired {
            if *had_entry {
                self.mark_parent_incomplete_locked(path);
            }
            self.index.remove(path);
        }
        self.stats.record_expired(expired.len() as u64);
        expired.len()
    }

    /// Lazily drop one record found expired by a lookup.
    fn expire(&self, path: &CloudPath) {
        let _guard = self.mutation.lock();
        let now = Instant::now();
        let Some(had_entry) = self
            .index
            .get(path)
            .filter(|r| r.is_expired(now, self.ttl))
            .map(|r| !r.is_tombstone())
        else {
            // Refreshed by someone else in the meantime
            return;
        };
        if had_entry {
            self.mark_parent_incomplete_locked(path);
        }
        self.index.remove(path);
        self.stats.record_expired(1);
    }

    // ========================================================================
    // Helpers; callers hold the mutation lock
    // ========================================================================

    fn set_complete_locked(&self, path: &CloudPath, complete: bool) {
        if let Some(mut item) = self.index.get_mut(path)
            && matches!(item.entry, Some(Entry::Folder(_)))
        {
            item.all_descendants_in_cache = complete;
        }
    }

    fn mark_parent_incomplete_locked(&self, path: &CloudPath) {
        if let Some(parent) = path.parent() {
            self.set_complete_locked(&parent, false);
        }
    }

    fn evict_matching_locked(&self, matches: impl Fn(&CloudPath) -> bool) -> usize {
        let keys: Vec<CloudPath> = self
            .index
            .iter()
            .filter(|r| matches(r.key()))
            .map(|r| r.key().clone())
            .collect();
        for key in &keys {
            self.index.remove(key);
        }
        keys.len()
    }

    // ========================================================================
    // Background sweep
    // ========================================================================

    /// Periodically remove expired records until `token` is cancelled or
    /// the cache is dropped.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(cache) = cache.upgrade() else { break };
                        let swept = cache.sweep_expired();
                        if swept > 0 {
                            debug!(swept, remaining = cache.len(), "Swept expired entries");
                        }
                    }
                }
            }
            debug!("Entry cache sweeper stopped");
        })
    }
}

impl std::fmt::Debug for EntryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryCache")
            .field("entries", &self.index.len())
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::FolderInfo;

    const TTL: Duration = Duration::from_secs(30);

    fn p(s: &str) -> CloudPath {
        CloudPath::new(s)
    }

    fn docs_listing() -> Entry {
        Entry::folder_with_children(
            "/docs",
            vec![Entry::file("/docs/a.txt", 1), Entry::file("/docs/b.txt", 2)],
        )
    }

    fn child_names(state: &GetState) -> Vec<String> {
        state
            .entry()
            .and_then(Entry::children)
            .map(|c| c.iter().map(|e| e.name().to_string()).collect())
            .unwrap_or_default()
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_when_empty() {
        let cache = EntryCache::with_ttl(TTL);
        assert_eq!(cache.get(&p("/x")), GetState::Unknown);
        assert_eq!(cache.stats().snapshot().misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_cache_stores_nothing() {
        let cache = EntryCache::with_ttl(Duration::ZERO);
        cache.add(Entry::file("/a", 1));
        cache.mark_not_exists(&p("/b"));
        assert!(cache.is_empty());
        assert_eq!(cache.get(&p("/a")), GetState::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_file_roundtrip_and_ttl() {
        let cache = EntryCache::with_ttl(TTL);
        cache.add(Entry::file("/a.txt", 5));

        tokio::time::advance(TTL - Duration::from_millis(1)).await;
        assert_eq!(cache.get(&p("/A.TXT")).entry().map(Entry::size), Some(5));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cache.get(&p("/a.txt")), GetState::Unknown);
        // Lazy expiry removed the record
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_folder_listing_is_rebuilt() {
        let cache = EntryCache::with_ttl(TTL);
        cache.add(docs_listing());

        let state = cache.get(&p("/docs"));
        assert!(matches!(state, GetState::Entry(_)));
        assert_eq!(child_names(&state), vec!["a.txt", "b.txt"]);

        // Children are individually addressable
        assert_eq!(cache.get(&p("/docs/b.txt")).entry().map(Entry::size), Some(2));
        // A missing child of a complete folder is confirmed absent
        assert_eq!(cache.get(&p("/docs/c.txt")), GetState::NotExists);
    }

    #[tokio::test(start_paused = true)]
    async fn test_folder_alone_has_unknown_content() {
        let cache = EntryCache::with_ttl(TTL);
        cache.add(Entry::folder("/music"));
        assert!(matches!(
            cache.get(&p("/music")),
            GetState::EntryWithUnknownContent(_)
        ));
        assert_eq!(cache.get(&p("/music/song.mp3")), GetState::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_folder_alone_keeps_prior_completeness() {
        let cache = EntryCache::with_ttl(TTL);
        cache.add(docs_listing());
        cache.add(Entry::Folder(Folder::new(
            FolderInfo::new("/docs").with_counts(2, 0),
        )));
        assert_eq!(child_names(&cache.get(&p("/docs"))).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_tree_scenario() {
        let cache = EntryCache::with_ttl(TTL);
        cache.add(docs_listing());

        cache.on_remove_tree(&p("/docs/b.txt"), None);

        assert_eq!(cache.get(&p("/docs/b.txt")), GetState::NotExists);
        assert!(matches!(
            cache.get(&p("/docs")),
            GetState::EntryWithUnknownContent(_)
        ));
        assert_eq!(cache.get(&p("/docs/a.txt")).entry().map(Entry::size), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_tree_drops_descendants_and_tombstone_covers_them() {
        let cache = EntryCache::with_ttl(TTL);
        cache.add(Entry::folder_with_children(
            "/a",
            vec![Entry::folder_with_children(
                "/a/b",
                vec![Entry::file("/a/b/c.txt", 3)],
            )],
        ));

        cache.on_remove_tree(&p("/a/b"), None);

        assert_eq!(cache.get(&p("/a/b")), GetState::NotExists);
        // Record is gone; the tombstoned parent confirms absence
        assert_eq!(cache.get(&p("/a/b/c.txt")), GetState::NotExists);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tombstone_lasts_until_ttl_or_create() {
        let cache = EntryCache::with_ttl(TTL);
        cache.on_remove_tree(&p("/x"), None);
        assert_eq!(cache.get(&p("/x")), GetState::NotExists);

        cache.on_create(&p("/x"), Some(Entry::file("/x", 9)));
        assert_eq!(cache.get(&p("/x")).entry().map(Entry::size), Some(9));

        cache.on_remove_tree(&p("/x"), None);
        tokio::time::advance(TTL).await;
        assert_eq!(cache.get(&p("/x")), GetState::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_one_flips_parent() {
        let cache = EntryCache::with_ttl(TTL);
        cache.add(docs_listing());
        cache.remove_one(&p("/docs/a.txt"));

        assert_eq!(cache.get(&p("/docs/a.txt")), GetState::Unknown);
        assert!(matches!(
            cache.get(&p("/docs")),
            GetState::EntryWithUnknownContent(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_child_makes_listing_unknown() {
        let cache = EntryCache::with_ttl(TTL);
        cache.add(docs_listing());

        // Refresh the folder alone; children keep their original timestamps
        tokio::time::advance(Duration::from_secs(20)).await;
        cache.add(Entry::folder("/docs"));
        tokio::time::advance(Duration::from_secs(10)).await;

        assert_eq!(cache.get(&p("/docs")), GetState::Unknown);
        // The folder is no longer claimed complete
        assert!(matches!(
            cache.get(&p("/docs")),
            GetState::EntryWithUnknownContent(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_flips_parent() {
        let cache = EntryCache::with_ttl(TTL);
        cache.add(docs_listing());
        tokio::time::advance(Duration::from_secs(20)).await;
        cache.add(Entry::folder("/docs"));
        tokio::time::advance(Duration::from_secs(10)).await;

        assert_eq!(cache.sweep_expired(), 2);
        assert!(matches!(
            cache.get(&p("/docs")),
            GetState::EntryWithUnknownContent(_)
        ));
        assert_eq!(cache.stats().snapshot().expired, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listing_prunes_stale_children() {
        let cache = EntryCache::with_ttl(TTL);
        cache.add(docs_listing());
        cache.add(Entry::folder_with_children(
            "/docs",
            vec![Entry::file("/docs/a.txt", 1), Entry::file("/docs/c.txt", 3)],
        ));

        assert_eq!(child_names(&cache.get(&p("/docs"))), vec!["a.txt", "c.txt"]);
        assert_eq!(cache.get(&p("/docs/b.txt")), GetState::NotExists);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_create_adjusts_parent_counts() {
        let cache = EntryCache::with_ttl(TTL);
        cache.add(Entry::Folder(Folder::with_children(
            FolderInfo::new("/docs").with_counts(1, 0),
            vec![Entry::file("/docs/a.txt", 1)],
        )));

        cache.on_create(&p("/docs/new"), Some(Entry::folder("/docs/new")));

        let state = cache.get(&p("/docs"));
        let Some(Entry::Folder(folder)) = state.entry() else {
            panic!("expected folder, got {state:?}");
        };
        assert_eq!(folder.info.files_count, Some(1));
        assert_eq!(folder.info.folders_count, Some(1));
        assert_eq!(child_names(&state), vec!["a.txt", "new"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_create_without_entry_clears() {
        let cache = EntryCache::with_ttl(TTL);
        cache.add(docs_listing());
        cache.on_create(&p("/docs/ghost"), None);

        assert!(cache.is_empty());
        let stats = cache.stats().snapshot();
        assert_eq!(stats.consistency_violations, 1);
        assert_eq!(stats.clears, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_remove_with_entry_clears() {
        let cache = EntryCache::with_ttl(TTL);
        cache.add(docs_listing());
        cache.on_remove_tree(&p("/docs/a.txt"), Some(Entry::file("/docs/a.txt", 1)));
        assert!(cache.is_empty());
        assert_eq!(cache.get(&p("/docs")), GetState::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_file_replacing_folder_drops_descendants() {
        let cache = EntryCache::with_ttl(TTL);
        cache.add(docs_listing());
        cache.add(Entry::file("/docs", 10));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_not_exists() {
        let cache = EntryCache::with_ttl(TTL);
        cache.add(docs_listing());
        cache.mark_not_exists(&p("/docs/a.txt"));

        assert_eq!(cache.get(&p("/docs/a.txt")), GetState::NotExists);
        assert!(matches!(
            cache.get(&p("/docs")),
            GetState::EntryWithUnknownContent(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_stops_on_cancel() {
        let cache = Arc::new(EntryCache::with_ttl(TTL));
        cache.add(Entry::file("/a", 1));
        let token = CancellationToken::new();
        let handle = cache.spawn_sweeper(Duration::from_secs(60), token.clone());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(cache.is_empty());

        token.cancel();
        handle.await.unwrap();
    }
}
