//! Boundary with the protocol-specific upstream clients.
//!
//! The engine treats every provider as an opaque supplier of entries and of
//! account activity. Wire formats, authentication and shard discovery stay
//! behind this trait.

use crate::entry::Entry;
use crate::error::{CloudError, CloudResult};
use crate::journal::{JournalCounters, OperationKind};
use crate::path::CloudPath;
use async_trait::async_trait;

/// Depth value requesting only the node itself.
pub const DEPTH_ENTRY: u32 = 0;

/// Depth value requesting the node and its direct children.
pub const DEPTH_LISTING: u32 = 1;

/// A long-running server-side mutation that has not finished yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveOperation {
    /// What the operation does.
    pub kind: OperationKind,
    /// The node being operated on.
    pub source: CloudPath,
    /// Destination, for operations that have one.
    pub target: Option<CloudPath>,
}

impl ActiveOperation {
    /// An operation without a destination.
    pub fn new(kind: OperationKind, source: impl Into<CloudPath>) -> Self {
        Self {
            kind,
            source: source.into(),
            target: None,
        }
    }

    /// An operation with a destination.
    pub fn with_target(
        kind: OperationKind,
        source: impl Into<CloudPath>,
        target: impl Into<CloudPath>,
    ) -> Self {
        Self {
            kind,
            source: source.into(),
            target: Some(target.into()),
        }
    }

    /// Paths whose cached state this operation may invalidate.
    ///
    /// A copy leaves its source untouched; every other kind may change both
    /// ends.
    pub fn affected_paths(&self) -> Vec<&CloudPath> {
        let mut paths = Vec::with_capacity(2);
        if self.kind != OperationKind::Copy {
            paths.push(&self.source);
        }
        if let Some(target) = &self.target {
            paths.push(target);
        }
        paths
    }
}

/// Account activity as reported by the upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivitySnapshot {
    /// Monotonic per-kind journal counters.
    pub counters: JournalCounters,
    /// Operations still running on the server.
    pub active_operations: Vec<ActiveOperation>,
}

/// An upstream provider.
///
/// Implementations perform the actual network calls and typically use
/// [`crate::dispatch::ShardDispatcher`] and [`crate::retry`] internally.
#[async_trait]
pub trait CloudRepo: Send + Sync + 'static {
    /// Fetch the node at `path`.
    ///
    /// With `depth >= 1` a folder comes back with at most `limit` children
    /// starting at `offset`. Returns `Ok(None)` if the path does not exist.
    async fn fetch_entry(
        &self,
        path: &CloudPath,
        depth: u32,
        offset: usize,
        limit: usize,
    ) -> CloudResult<Option<Entry>>;

    /// Fetch journal counters and running operations.
    ///
    /// Backends that cannot report activity keep the default, which leaves
    /// the change detector passive.
    async fn fetch_activity(&self) -> CloudResult<ActivitySnapshot> {
        Err(CloudError::NotSupported)
    }
}
