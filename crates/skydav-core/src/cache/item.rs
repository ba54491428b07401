//! Cache records and lookup answers.

use crate::entry::Entry;
use std::time::Duration;
use tokio::time::Instant;

/// One record in the path index.
///
/// `entry == None` is a tombstone: the path is confirmed absent upstream.
/// Folders are stored without their children; a listing is rebuilt from the
/// index when `all_descendants_in_cache` is set.
#[derive(Debug, Clone)]
pub struct CacheItem {
    /// The cached node, or `None` for a tombstone.
    pub entry: Option<Entry>,
    /// When this record was written.
    pub created: Instant,
    /// Every direct child of this folder is present in the index.
    pub all_descendants_in_cache: bool,
}

impl CacheItem {
    /// A record for `entry`. The entry must not carry children.
    pub fn new(entry: Entry, complete: bool, now: Instant) -> Self {
        Self {
            entry: Some(entry),
            created: now,
            all_descendants_in_cache: complete,
        }
    }

    /// A confirmed-absence record.
    pub fn tombstone(now: Instant) -> Self {
        Self {
            entry: None,
            created: now,
            all_descendants_in_cache: false,
        }
    }

    /// Whether this record confirms absence.
    #[inline]
    pub fn is_tombstone(&self) -> bool {
        self.entry.is_none()
    }

    /// Whether this record is a folder with its full listing cached.
    #[inline]
    pub fn is_complete_folder(&self) -> bool {
        self.all_descendants_in_cache && matches!(self.entry, Some(Entry::Folder(_)))
    }

    /// Returns true once `ttl` has passed since the record was written.
    #[inline]
    pub fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.created) >= ttl
    }
}

/// Answer of [`EntryCache::get`](super::EntryCache::get).
#[derive(Debug, Clone, PartialEq)]
pub enum GetState {
    /// The cache knows nothing reliable; ask upstream.
    Unknown,
    /// The path is confirmed absent.
    NotExists,
    /// A fresh entry. Folders carry their full listing.
    Entry(Entry),
    /// A fresh folder whose listing is not fully cached. No children attached.
    EntryWithUnknownContent(Entry),
}

impl GetState {
    /// The entry carried by this answer, if any.
    pub fn entry(&self) -> Option<&Entry> {
        match self {
            GetState::Entry(e) | GetState::EntryWithUnknownContent(e) => Some(e),
            GetState::Unknown | GetState::NotExists => None,
        }
    }

    /// Consume the answer, returning its entry.
    pub fn into_entry(self) -> Option<Entry> {
        match self {
            GetState::Entry(e) | GetState::EntryWithUnknownContent(e) => Some(e),
            GetState::Unknown | GetState::NotExists => None,
        }
    }

    /// Whether the answer can be returned to a caller without asking upstream.
    pub fn is_authoritative(&self) -> bool {
        matches!(self, GetState::Entry(_) | GetState::NotExists)
    }
}
