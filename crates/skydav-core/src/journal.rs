//! Per-operation-type journal counters.
//!
//! The upstream account keeps a monotonic counter for each kind of mutating
//! operation. Comparing them with a locally maintained shadow is how the
//! detector notices mutations made by other clients of the same account.

use std::collections::BTreeMap;
use std::fmt;

/// Kinds of mutating operation tracked by the server journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OperationKind {
    /// Permanent removal.
    Delete,
    /// Rename within the same folder.
    Rename,
    /// Move to another folder.
    Move,
    /// Server-side copy.
    Copy,
    /// File upload.
    Upload,
    /// Folder creation.
    CreateFolder,
    /// Move into the trash bin.
    TrashAppend,
    /// Restore from the trash bin.
    TrashRestore,
    /// Purge of a single trash item.
    TrashDropOne,
    /// Purge of the whole trash bin.
    TrashDropAll,
    /// Mounting a folder shared by another account.
    TakeSharedFolder,
}

impl OperationKind {
    /// Every tracked kind.
    pub const ALL: [OperationKind; 11] = [
        OperationKind::Delete,
        OperationKind::Rename,
        OperationKind::Move,
        OperationKind::Copy,
        OperationKind::Upload,
        OperationKind::CreateFolder,
        OperationKind::TrashAppend,
        OperationKind::TrashRestore,
        OperationKind::TrashDropOne,
        OperationKind::TrashDropAll,
        OperationKind::TakeSharedFolder,
    ];

    /// Stable lowercase name, used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Delete => "delete",
            OperationKind::Rename => "rename",
            OperationKind::Move => "move",
            OperationKind::Copy => "copy",
            OperationKind::Upload => "upload",
            OperationKind::CreateFolder => "mkdir",
            OperationKind::TrashAppend => "trash_append",
            OperationKind::TrashRestore => "trash_restore",
            OperationKind::TrashDropOne => "trash_drop_one",
            OperationKind::TrashDropAll => "trash_drop_all",
            OperationKind::TakeSharedFolder => "take_shared_folder",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of per-kind counter values.
///
/// Kinds missing from the map are simply not reported; they are never
/// treated as zero when comparing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JournalCounters {
    values: BTreeMap<OperationKind, i64>,
}

impl JournalCounters {
    /// An empty counter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    #[must_use]
    pub fn with(mut self, kind: OperationKind, value: i64) -> Self {
        self.set(kind, value);
        self
    }

    /// Value for `kind`, if reported.
    pub fn get(&self, kind: OperationKind) -> Option<i64> {
        self.values.get(&kind).copied()
    }

    /// Set the value for `kind`.
    pub fn set(&mut self, kind: OperationKind, value: i64) {
        self.values.insert(kind, value);
    }

    /// Add `delta` to `kind`, treating a missing value as zero.
    pub fn increment(&mut self, kind: OperationKind, delta: i64) {
        *self.values.entry(kind).or_insert(0) += delta;
    }

    /// Iterate over reported kinds and values.
    pub fn iter(&self) -> impl Iterator<Item = (OperationKind, i64)> + '_ {
        self.values.iter().map(|(k, v)| (*k, *v))
    }

    /// True if no kind is reported.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(OperationKind, i64)> for JournalCounters {
    fn from_iter<I: IntoIterator<Item = (OperationKind, i64)>>(iter: I) -> Self {
        JournalCounters {
            values: iter.into_iter().collect(),
        }
    }
}
