//! Filesystem-facing facade over the cache, coalescer and upstream.
//!
//! [`CloudFs`] is what the WebDAV layer talks to. Lookups are cache-first
//! and coalesced; misses fall through to [`CloudRepo::fetch_entry`], paging
//! folder listings until a short page. Mutations are performed by the caller
//! against the upstream and then reported here with the `notify_*` methods,
//! which verify the new state upstream and update the cache.
//!
//! # Lifecycle
//!
//! Construction spawns the expiry sweeper and, when enabled, the activity
//! poller, each on a child of the session's cancellation token. Both stop on
//! [`CloudFs::shutdown`] or when the last handle is dropped.

use crate::cache::{EntryCache, GetState};
use crate::coalescer::{FlightResult, RequestCoalescer};
use crate::config::SkydavConfig;
use crate::detector::{OperationGuard, spawn_activity_poller};
use crate::entry::{Entry, Folder};
use crate::error::{CloudError, CloudResult, ConfigError};
use crate::journal::OperationKind;
use crate::path::CloudPath;
use crate::repo::{CloudRepo, DEPTH_ENTRY, DEPTH_LISTING};
use crate::retry::RetryPolicy;
use crate::stats::{EngineStats, StatsSnapshot};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

struct Inner {
    repo: Arc<dyn CloudRepo>,
    cache: Arc<EntryCache>,
    coalescer: RequestCoalescer,
    config: SkydavConfig,
    retry: RetryPolicy,
    stats: Arc<EngineStats>,
    token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// A gateway session over one upstream account.
///
/// Cheap to clone; all clones share the same cache and background tasks.
#[derive(Clone)]
pub struct CloudFs {
    inner: Arc<Inner>,
}

impl CloudFs {
    /// Start a session with its own cancellation token.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(repo: Arc<dyn CloudRepo>, config: SkydavConfig) -> Result<Self, ConfigError> {
        Self::with_parent_token(repo, config, &CancellationToken::new())
    }

    /// Start a session whose token is a child of `parent`.
    ///
    /// Cancelling `parent` aborts in-flight upstream calls and stops the
    /// background tasks of this session.
    pub fn with_parent_token(
        repo: Arc<dyn CloudRepo>,
        config: SkydavConfig,
        parent: &CancellationToken,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let stats = Arc::new(EngineStats::new());
        let cache = Arc::new(EntryCache::new(&config, Arc::clone(&stats)));
        let token = parent.child_token();

        let mut tasks = Vec::new();
        if config.cache_enabled() {
            tasks.push(cache.spawn_sweeper(config.sweep_interval, token.child_token()));
        }
        if config.detector_enabled() {
            tasks.push(spawn_activity_poller(
                &cache,
                Arc::clone(&repo),
                config.activity_poll_interval,
                token.child_token(),
            ));
        }
        info!(
            cache_ttl = ?config.cache_ttl,
            detector = config.detector_enabled(),
            "Started cloud session"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                repo,
                coalescer: RequestCoalescer::with_engine_stats(Arc::clone(&stats)),
                cache,
                retry: RetryPolicy::from(&config.retry),
                config,
                stats,
                token,
                tasks: Mutex::new(tasks),
            }),
        })
    }

    /// Session configuration.
    pub fn config(&self) -> &SkydavConfig {
        &self.inner.config
    }

    /// The session's entry cache.
    pub fn cache(&self) -> &Arc<EntryCache> {
        &self.inner.cache
    }

    /// Current statistics.
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// The node at `path`, with its listing if it is a folder.
    ///
    /// `Ok(None)` means upstream confirmed the path does not exist.
    #[instrument(level = "debug", skip_all, fields(path = %path))]
    pub async fn lookup(&self, path: &CloudPath) -> CloudResult<Option<Entry>> {
        self.lookup_inner(path, true).await
    }

    async fn lookup_inner(&self, path: &CloudPath, prefetch: bool) -> CloudResult<Option<Entry>> {
        if let Some(answer) = self.cached(path) {
            return Ok(answer);
        }
        self.inner
            .coalescer
            .get_or_fetch(path, || self.fetch_and_cache(path, prefetch))
            .await
    }

    /// A cached answer that needs no upstream call.
    fn cached(&self, path: &CloudPath) -> Option<Option<Entry>> {
        match self.inner.cache.get(path) {
            GetState::Entry(entry) => {
                trace!(path = %path, "entry cache hit");
                Some(Some(entry))
            }
            GetState::NotExists => {
                trace!(path = %path, "entry cache confirmed absence");
                Some(None)
            }
            GetState::Unknown | GetState::EntryWithUnknownContent(_) => None,
        }
    }

    async fn fetch_and_cache(&self, path: &CloudPath, prefetch: bool) -> FlightResult {
        // A flight that finished between our miss and our election may
        // already have filled the cache.
        if let Some(answer) = self.cached(path) {
            return Ok(answer);
        }

        let fetched = self.fetch_listing(path).await?;
        match &fetched {
            Some(entry) => self.inner.cache.add(entry.clone()),
            None => self.inner.cache.mark_not_exists(path),
        }
        debug!(path = %path, found = fetched.is_some(), "Fetched from upstream");

        if prefetch {
            self.prefetch_parent(path);
        }
        Ok(fetched)
    }

    /// Fetch `path` with its complete listing, page by page.
    async fn fetch_listing(&self, path: &CloudPath) -> CloudResult<Option<Entry>> {
        let limit = self.inner.config.listing_page_size;
        let Some(first) = self.fetch(path, DEPTH_LISTING, 0, limit).await? else {
            return Ok(None);
        };
        let (node, children) = first.into_parts();
        let Some(mut children) = children else {
            return Ok(Some(node));
        };

        let mut page_len = children.len();
        let mut offset = 0;
        while page_len >= limit {
            offset += limit;
            let Some(page) = self.fetch(path, DEPTH_LISTING, offset, limit).await? else {
                debug!(path = %path, offset, "Folder vanished while paging its listing");
                return Ok(None);
            };
            let more = page.into_parts().1.unwrap_or_default();
            page_len = more.len();
            children.extend(more);
        }
        if offset > 0 {
            trace!(path = %path, pages = offset / limit + 1, children = children.len(), "Assembled paged listing");
        }

        Ok(Some(match node {
            Entry::Folder(folder) => Entry::Folder(Folder::with_children(folder.info, children)),
            other @ (Entry::File(_) | Entry::Link(_)) => other,
        }))
    }

    /// One upstream fetch under the retry policy, abandoned on cancellation.
    async fn fetch(
        &self,
        path: &CloudPath,
        depth: u32,
        offset: usize,
        limit: usize,
    ) -> CloudResult<Option<Entry>> {
        let inner = &self.inner;
        let call = inner.retry.run(|_| {
            inner.stats.record_upstream_fetch();
            inner.repo.fetch_entry(path, depth, offset, limit)
        });
        self.cancellable(call).await
    }

    async fn cancellable<T>(&self, call: impl Future<Output = CloudResult<T>>) -> CloudResult<T> {
        tokio::select! {
            biased;
            () = self.inner.token.cancelled() => Err(CloudError::Cancelled),
            result = call => result,
        }
    }

    /// Warm the parent's listing after a miss, without making anyone wait.
    fn prefetch_parent(&self, path: &CloudPath) {
        if !self.inner.config.prefetch_parent || !self.inner.cache.is_enabled() {
            return;
        }
        let Some(parent) = path.parent() else {
            return;
        };
        if self.inner.cache.get(&parent) != GetState::Unknown {
            return;
        }

        let fs = self.clone();
        // Detached: nobody awaits this task, so its failure is only logged
        tokio::spawn(async move {
            if let Err(e) = fs.lookup_inner(&parent, false).await {
                warn!(path = %parent, error = %e, "Parent prefetch failed");
            }
        });
    }

    // ========================================================================
    // Mutation notifications
    // ========================================================================

    /// Register an operation this process is about to perform upstream.
    ///
    /// Keep the guard alive until the matching `notify_*` call has returned.
    pub fn begin_operation(
        &self,
        kind: OperationKind,
        paths: impl IntoIterator<Item = CloudPath>,
    ) -> OperationGuard {
        self.inner.cache.detector().register_operation(kind, paths)
    }

    /// Report that an operation of `kind` created `path` upstream.
    #[instrument(level = "debug", skip_all, fields(path = %path, %kind))]
    pub async fn notify_created(&self, path: &CloudPath, kind: OperationKind) {
        self.record_local_mutation(kind);
        match self.fetch(path, DEPTH_ENTRY, 0, 0).await {
            Ok(fetched) => self.inner.cache.on_create(path, fetched),
            Err(e) => self.forget_unverified(path, &e),
        }
    }

    /// Report that an operation of `kind` removed `path` upstream.
    #[instrument(level = "debug", skip_all, fields(path = %path, %kind))]
    pub async fn notify_removed(&self, path: &CloudPath, kind: OperationKind) {
        self.record_local_mutation(kind);
        match self.fetch(path, DEPTH_ENTRY, 0, 0).await {
            Ok(fetched) => self.inner.cache.on_remove_tree(path, fetched),
            Err(e) => self.forget_unverified(path, &e),
        }
    }

    /// Report that an operation of `kind` moved `from` to `to` upstream.
    #[instrument(level = "debug", skip_all, fields(from = %from, to = %to, %kind))]
    pub async fn notify_moved(&self, from: &CloudPath, to: &CloudPath, kind: OperationKind) {
        self.record_local_mutation(kind);
        let (old, new) = futures::join!(
            self.fetch(from, DEPTH_ENTRY, 0, 0),
            self.fetch(to, DEPTH_ENTRY, 0, 0)
        );
        match old {
            Ok(fetched) => self.inner.cache.on_remove_tree(from, fetched),
            Err(e) => self.forget_unverified(from, &e),
        }
        match new {
            Ok(fetched) => self.inner.cache.on_create(to, fetched),
            Err(e) => self.forget_unverified(to, &e),
        }
    }

    fn record_local_mutation(&self, kind: OperationKind) {
        self.inner.cache.detector().record_own(kind);
        self.inner.cache.reset_check();
    }

    /// The new state could not be confirmed; stop trusting what we have.
    fn forget_unverified(&self, path: &CloudPath, error: &CloudError) {
        warn!(path = %path, error = %error, "Could not verify mutation upstream, evicting subtree");
        self.inner.cache.remove_tree(path);
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Cancel in-flight upstream calls and wait for the background tasks.
    pub async fn shutdown(&self) {
        self.inner.token.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await
                && !e.is_cancelled()
            {
                warn!(error = %e, "Background task failed");
            }
        }
        info!("Cloud session shut down");
    }

    /// Whether [`shutdown`](Self::shutdown) was called or the parent token cancelled.
    pub fn is_shut_down(&self) -> bool {
        self.inner.token.is_cancelled()
    }
}

impl std::fmt::Debug for CloudFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudFs")
            .field("cache", &self.inner.cache)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}
