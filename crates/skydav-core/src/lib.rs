//! Consistency cache and upstream dispatch engine for a WebDAV gateway over
//! rate-limited cloud storage.
//!
//! The gateway answers WebDAV requests against a remote account whose API is
//! slow, throttled and shared with other clients. This crate keeps a local
//! mirror of the remote tree that is fast to query and never serves stale
//! data silently.
//!
//! # Components
//!
//! ## Cache
//!
//! - [`EntryCache`] - Tree-shaped cache with TTL expiry, tombstones and
//!   per-folder completeness tracking
//! - [`GetState`] - What the cache can say about a path
//! - [`ChangeDetector`] - Clears or evicts when other clients mutate the account
//!
//! ## Upstream
//!
//! - [`CloudRepo`] - Trait for the remote storage API
//! - [`RequestCoalescer`] - Single-flight deduplication of concurrent lookups
//! - [`ShardDispatcher`] - Spreads calls over a bounded pool of endpoints
//!   and benches misbehaving ones
//! - [`RetryPolicy`] and [`poll_until`] - Retrying and polling helpers
//!
//! ## Facade
//!
//! - [`CloudFs`] - Cache-first lookups plus mutation notifications, with the
//!   background sweeper and activity poller tied to one cancellation token
//!
//! ## Utilities
//!
//! - [`TimedValue`] and [`BannedSet`] - Self-expiring values
//! - [`Pending`] - Lazily grown round-robin pool with per-item use caps
//!
//! # Example
//!
//! ```
//! use skydav_core::testing::MemoryRepo;
//! use skydav_core::{CloudFs, CloudPath, Entry, SkydavConfig};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let repo = Arc::new(MemoryRepo::new().with(Entry::file("/docs/report.pdf", 1024)));
//! let fs = CloudFs::new(repo, SkydavConfig::default())?;
//!
//! let entry = fs.lookup(&CloudPath::new("/docs/report.pdf")).await?;
//! assert_eq!(entry.map(|e| e.size()), Some(1024));
//!
//! fs.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - `cache-tracing`: per-operation spans and trace events inside the cache

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod coalescer;
pub mod config;
pub mod detector;
pub mod dispatch;
pub mod entry;
pub mod error;
pub mod fs;
pub mod journal;
pub mod path;
pub mod pending;
pub mod repo;
pub mod retry;
pub mod stats;
pub mod timed_value;

/// In-memory upstream for tests and demos.
///
/// [`testing::MemoryRepo`] implements [`CloudRepo`] over a map, with
/// injectable latency, failures, journal counters and active operations.
pub mod testing;

pub use cache::{CacheItem, EntryCache, GetState};
pub use coalescer::{CoalescerStats, RequestCoalescer};
pub use config::{RetryConfig, SkydavConfig};
pub use detector::{ChangeDetector, OperationGuard, ReconcileOutcome};
pub use dispatch::{Endpoint, ShardDispatcher};
pub use entry::{ContentHash, Entry, FileInfo, Folder, FolderInfo, LinkInfo, PublicLink};
pub use error::{CloudError, CloudResult, ConfigError};
pub use fs::CloudFs;
pub use journal::{JournalCounters, OperationKind};
pub use path::CloudPath;
pub use pending::{Pending, PendingLease};
pub use repo::{ActiveOperation, ActivitySnapshot, CloudRepo, DEPTH_ENTRY, DEPTH_LISTING};
pub use retry::{RetryPolicy, poll_until};
pub use stats::{EngineStats, StatsSnapshot};
pub use timed_value::{BannedSet, Expiration, TimedValue};
