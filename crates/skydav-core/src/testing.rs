//! In-memory upstream for tests and demos.
//!
//! [`MemoryRepo`] keeps a flat map of entries and implements [`CloudRepo`]
//! over it, with knobs for latency, injected failures, journal counters and
//! active operations. It counts every call so tests can assert how much
//! upstream traffic a scenario produced.

use crate::entry::{Entry, Folder};
use crate::error::{CloudError, CloudResult};
use crate::journal::{JournalCounters, OperationKind};
use crate::path::CloudPath;
use crate::repo::{ActiveOperation, ActivitySnapshot, CloudRepo};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
struct Activity {
    supported: bool,
    counters: JournalCounters,
    active: Vec<ActiveOperation>,
}

/// A fake upstream account held in memory.
#[derive(Debug, Default)]
pub struct MemoryRepo {
    /// Entries without attached listings, keyed by path.
    tree: Mutex<BTreeMap<CloudPath, Entry>>,
    latency: Mutex<Duration>,
    failures: Mutex<VecDeque<CloudError>>,
    activity: Mutex<Activity>,
    fetch_calls: AtomicUsize,
    activity_calls: AtomicUsize,
    calls_by_path: Mutex<HashMap<CloudPath, usize>>,
}

impl MemoryRepo {
    /// An empty account. The root folder always exists.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `entry`, its attached listing and any missing ancestors.
    #[must_use]
    pub fn with(self, entry: Entry) -> Self {
        self.insert(entry);
        self
    }

    /// Report journal counters and active operations from `fetch_activity`.
    #[must_use]
    pub fn with_activity(self) -> Self {
        self.activity.lock().supported = true;
        self
    }

    /// Insert `entry`, its attached listing and any missing ancestors.
    pub fn insert(&self, entry: Entry) {
        let mut tree = self.tree.lock();
        Self::insert_locked(&mut tree, entry);
    }

    fn insert_locked(tree: &mut BTreeMap<CloudPath, Entry>, entry: Entry) {
        let (node, children) = entry.into_parts();
        let mut ancestor = node.path().parent();
        while let Some(path) = ancestor {
            if path.is_root() {
                break;
            }
            ancestor = path.parent();
            tree.entry(path.clone()).or_insert_with(|| Entry::folder(path));
        }
        tree.insert(node.path().clone(), node);
        for child in children.into_iter().flatten() {
            Self::insert_locked(tree, child);
        }
    }

    /// Remove `path` and everything below it.
    pub fn remove(&self, path: &CloudPath) {
        self.tree.lock().retain(|k, _| !k.is_at_or_below(path));
    }

    /// Move `from` and everything below it to `to`.
    pub fn rename(&self, from: &CloudPath, to: &CloudPath) {
        let mut tree = self.tree.lock();
        let moved: Vec<(CloudPath, Entry)> = tree
            .iter()
            .filter(|(k, _)| k.is_at_or_below(from))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (old, entry) in moved {
            tree.remove(&old);
            let new_path = old
                .components()
                .skip(from.depth())
                .fold(to.clone(), |path, name| path.join(name));
            tree.insert(new_path.clone(), relocate(entry, new_path));
        }
    }

    /// Whether `path` exists.
    pub fn contains(&self, path: &CloudPath) -> bool {
        path.is_root() || self.tree.lock().contains_key(path)
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Fail the next `fetch_entry` call with `error`. Calls queue up.
    pub fn fail_next(&self, error: CloudError) {
        self.failures.lock().push_back(error);
    }

    /// Replace the reported journal counters.
    pub fn set_counters(&self, counters: JournalCounters) {
        self.activity.lock().counters = counters;
    }

    /// Add one to the reported counter for `kind`.
    pub fn bump_counter(&self, kind: OperationKind) {
        self.activity.lock().counters.increment(kind, 1);
    }

    /// Replace the reported active operations.
    pub fn set_active_operations(&self, active: Vec<ActiveOperation>) {
        self.activity.lock().active = active;
    }

    /// Total `fetch_entry` calls.
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// `fetch_entry` calls for `path`.
    pub fn fetch_calls_for(&self, path: &CloudPath) -> usize {
        self.calls_by_path.lock().get(path).copied().unwrap_or(0)
    }

    /// Total `fetch_activity` calls.
    pub fn activity_calls(&self) -> usize {
        self.activity_calls.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn node(&self, path: &CloudPath) -> Option<Entry> {
        if path.is_root() {
            return Some(Entry::folder(CloudPath::root()));
        }
        self.tree.lock().get(path).cloned()
    }

    fn children(&self, path: &CloudPath, offset: usize, limit: usize) -> Vec<Entry> {
        self.tree
            .lock()
            .iter()
            .filter(|(k, _)| k.is_direct_child_of(path))
            .skip(offset)
            .take(limit)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

fn relocate(entry: Entry, path: CloudPath) -> Entry {
    match entry {
        Entry::File(mut f) => {
            f.path = path;
            Entry::File(f)
        }
        Entry::Folder(mut f) => {
            f.info.path = path;
            Entry::Folder(f)
        }
        Entry::Link(mut l) => {
            l.path = path;
            Entry::Link(l)
        }
    }
}

#[async_trait]
impl CloudRepo for MemoryRepo {
    async fn fetch_entry(
        &self,
        path: &CloudPath,
        depth: u32,
        offset: usize,
        limit: usize,
    ) -> CloudResult<Option<Entry>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        *self.calls_by_path.lock().entry(path.clone()).or_insert(0) += 1;
        self.delay().await;

        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }

        let Some(node) = self.node(path) else {
            return Ok(None);
        };
        if depth == 0 {
            return Ok(Some(node));
        }
        Ok(Some(match node {
            Entry::Folder(folder) => Entry::Folder(Folder::with_children(
                folder.info,
                self.children(path, offset, limit),
            )),
            other @ (Entry::File(_) | Entry::Link(_)) => other,
        }))
    }

    async fn fetch_activity(&self) -> CloudResult<ActivitySnapshot> {
        self.activity_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        let activity = self.activity.lock();
        if !activity.supported {
            return Err(CloudError::NotSupported);
        }
        Ok(ActivitySnapshot {
            counters: activity.counters.clone(),
            active_operations: activity.active.clone(),
        })
    }
}
