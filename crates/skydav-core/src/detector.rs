//! Detection of mutations made by other clients of the same account.
//!
//! Two signals are combined:
//!
//! - **Journal counters.** The server keeps a monotonic counter per
//!   [`OperationKind`]. This process keeps a shadow copy and bumps it for
//!   each of its own operations. A server value that runs ahead of the
//!   shadow, by more than the operations this process still has in flight,
//!   means someone else mutated the tree: the whole cache is cleared.
//! - **Active operations.** Long-running server operations (a large folder
//!   move, say) may not touch a counter until they finish. Every active
//!   operation that is not one of ours gets its subtree evicted right away.
//!
//! Server counters are eventually consistent and may trail the shadow for a
//! while after a local mutation. That lag is tolerated for
//! `counter_lag_tolerance`, measured from the later of the first lagging
//! observation and the latest [`ChangeDetector::reset_check`]. Past that, the
//! lag is logged as an error and a new window starts. The shadow is never
//! lowered to a lagging server value, so a slow server that later catches up
//! with our own operations is not mistaken for a foreign writer.

use crate::cache::EntryCache;
use crate::error::CloudError;
use crate::journal::{JournalCounters, OperationKind};
use crate::path::CloudPath;
use crate::repo::{ActivitySnapshot, CloudRepo};
use crate::stats::EngineStats;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
struct ShadowState {
    /// `None` until the first poll provides a baseline.
    counters: Option<JournalCounters>,
    behind_since: Option<Instant>,
    last_local_mutation: Option<Instant>,
}

#[derive(Debug, Default)]
struct OwnOperations {
    paths: HashMap<CloudPath, usize>,
    kinds: HashMap<OperationKind, usize>,
}

/// What one reconciliation pass found and did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// This pass only recorded the first server values.
    pub baseline: bool,
    /// Kinds whose server counter ran ahead of what this process explains.
    pub external: Vec<OperationKind>,
    /// The whole cache was cleared.
    pub cleared: bool,
    /// Kinds whose server counter trails the shadow.
    pub lagging: Vec<OperationKind>,
    /// Kinds that stayed behind past the tolerance and were reported.
    pub overdue: Vec<OperationKind>,
    /// Subtrees evicted because of foreign active operations.
    pub evicted: Vec<CloudPath>,
}

impl ReconcileOutcome {
    /// Whether anything made outside this process was detected.
    pub fn changed_externally(&self) -> bool {
        !self.external.is_empty() || !self.evicted.is_empty()
    }
}

/// Shadow journal counters and the registry of this process's own
/// in-flight operations.
#[derive(Debug)]
pub struct ChangeDetector {
    shadow: Mutex<ShadowState>,
    own: Mutex<OwnOperations>,
    lag_tolerance: Duration,
    stats: Arc<EngineStats>,
}

impl ChangeDetector {
    /// Create a detector without a baseline.
    pub fn new(lag_tolerance: Duration, stats: Arc<EngineStats>) -> Self {
        Self {
            shadow: Mutex::new(ShadowState::default()),
            own: Mutex::new(OwnOperations::default()),
            lag_tolerance,
            stats,
        }
    }

    // ========================================================================
    // Own operations
    // ========================================================================

    /// Register an in-flight operation of this process on `paths`.
    ///
    /// Until the returned guard is dropped, active-operation reports on these
    /// paths (or below them) are attributed to this process, and one unit of
    /// counter excess for `kind` is tolerated.
    pub fn register_operation(
        self: &Arc<Self>,
        kind: OperationKind,
        paths: impl IntoIterator<Item = CloudPath>,
    ) -> OperationGuard {
        let paths: Vec<CloudPath> = paths.into_iter().collect();
        {
            let mut own = self.own.lock();
            for path in &paths {
                *own.paths.entry(path.clone()).or_insert(0) += 1;
            }
            *own.kinds.entry(kind).or_insert(0) += 1;
        }
        debug!(%kind, paths = ?paths, "Registered own operation");
        OperationGuard {
            detector: Arc::clone(self),
            kind,
            paths,
        }
    }

    fn unregister(&self, kind: OperationKind, paths: &[CloudPath]) {
        let mut own = self.own.lock();
        for path in paths {
            if let Some(count) = own.paths.get_mut(path) {
                *count -= 1;
                if *count == 0 {
                    own.paths.remove(path);
                }
            }
        }
        if let Some(count) = own.kinds.get_mut(&kind) {
            *count -= 1;
            if *count == 0 {
                own.kinds.remove(&kind);
            }
        }
    }

    /// Whether `path`, or one of its ancestors, is registered as ours.
    pub fn is_registered(&self, path: &CloudPath) -> bool {
        self.own
            .lock()
            .paths
            .keys()
            .any(|registered| path.is_at_or_below(registered))
    }

    /// Number of registered operations of `kind`.
    pub fn in_flight(&self, kind: OperationKind) -> usize {
        self.own.lock().kinds.get(&kind).copied().unwrap_or(0)
    }

    // ========================================================================
    // Shadow counters
    // ========================================================================

    /// Account for one completed operation of this process.
    pub fn record_own(&self, kind: OperationKind) {
        let mut shadow = self.shadow.lock();
        // Before the baseline the first poll will include this operation
        if let Some(counters) = shadow.counters.as_mut() {
            counters.increment(kind, 1);
        }
    }

    /// Note that a local mutation just happened.
    pub fn reset_check(&self) {
        self.shadow.lock().last_local_mutation = Some(Instant::now());
    }

    /// Current shadow values, if a baseline exists.
    pub fn shadow(&self) -> Option<JournalCounters> {
        self.shadow.lock().counters.clone()
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Compare `snapshot` with local state and invalidate `cache` accordingly.
    pub fn reconcile(&self, cache: &EntryCache, snapshot: &ActivitySnapshot) -> ReconcileOutcome {
        let mut outcome = self.reconcile_counters(&snapshot.counters);

        if !outcome.external.is_empty() {
            self.stats.record_external_change();
            if cache.is_empty() {
                error!(
                    kinds = ?outcome.external,
                    "Server journal ran ahead of the shadow while the cache is empty"
                );
            } else {
                warn!(
                    kinds = ?outcome.external,
                    "Operations made outside this process detected, clearing cache"
                );
                cache.clear();
                outcome.cleared = true;
            }
        }

        for op in &snapshot.active_operations {
            for path in op.affected_paths() {
                if self.is_registered(path) {
                    debug!(path = %path, kind = %op.kind, "Active operation is our own");
                    continue;
                }
                if outcome.evicted.contains(path) {
                    continue;
                }
                let dropped = cache.remove_tree(path);
                warn!(path = %path, kind = %op.kind, dropped, "Foreign active operation, evicting subtree");
                outcome.evicted.push(path.clone());
            }
        }
        if !outcome.evicted.is_empty() {
            self.stats.record_external_change();
        }

        outcome
    }

    fn reconcile_counters(&self, server: &JournalCounters) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();
        let allowance: HashMap<OperationKind, usize> = self.own.lock().kinds.clone();
        let now = Instant::now();

        let mut guard = self.shadow.lock();
        let state = &mut *guard;
        if state.counters.is_none() {
            state.counters = Some(server.clone());
            outcome.baseline = true;
            debug!(counters = ?server, "Recorded journal baseline");
            return outcome;
        }
        let Some(local) = state.counters.as_mut() else {
            return outcome;
        };

        let mut behind = Vec::new();
        for (kind, server_value) in server.iter() {
            let Some(shadow_value) = local.get(kind) else {
                // Newly reported kind: nothing to compare against yet
                local.set(kind, server_value);
                continue;
            };
            if server_value > shadow_value {
                let explained = allowance.get(&kind).copied().unwrap_or(0) as i64;
                if server_value - shadow_value > explained {
                    outcome.external.push(kind);
                    local.set(kind, server_value);
                }
            } else if server_value < shadow_value {
                behind.push(kind);
            }
        }

        if behind.is_empty() {
            state.behind_since = None;
            return outcome;
        }

        outcome.lagging = behind;
        let since = *state.behind_since.get_or_insert(now);
        let window_start = match state.last_local_mutation {
            Some(last) if last > since => last,
            _ => since,
        };
        let lag = now.saturating_duration_since(window_start);
        if lag >= self.lag_tolerance {
            error!(
                kinds = ?outcome.lagging,
                ?lag,
                "Server journal stayed behind local operations past the tolerance"
            );
            outcome.overdue = outcome.lagging.clone();
            state.behind_since = None;
        } else {
            debug!(kinds = ?outcome.lagging, ?lag, "Server journal trails local operations");
        }
        outcome
    }
}

/// Keeps an operation registered with the detector until dropped.
#[must_use = "the operation is unregistered as soon as the guard is dropped"]
#[derive(Debug)]
pub struct OperationGuard {
    detector: Arc<ChangeDetector>,
    kind: OperationKind,
    paths: Vec<CloudPath>,
}

impl OperationGuard {
    /// The registered operation kind.
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// The registered paths.
    pub fn paths(&self) -> &[CloudPath] {
        &self.paths
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.detector.unregister(self.kind, &self.paths);
    }
}

/// Poll `repo` for account activity and reconcile `cache` every `interval`.
///
/// The first poll runs immediately and records the baseline. The task ends
/// when `token` is cancelled, the cache is dropped, or the backend reports
/// that it cannot provide activity.
pub fn spawn_activity_poller(
    cache: &Arc<EntryCache>,
    repo: Arc<dyn CloudRepo>,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    let cache: Weak<EntryCache> = Arc::downgrade(cache);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let result = tokio::select! {
                () = token.cancelled() => break,
                result = repo.fetch_activity() => result,
            };
            let Some(cache) = cache.upgrade() else { break };
            match result {
                Ok(snapshot) => {
                    cache.reconcile(&snapshot);
                }
                Err(CloudError::NotSupported) => {
                    info!("Backend does not report account activity, relying on TTL expiry only");
                    break;
                }
                Err(e) => warn!(error = %e, "Activity poll failed"),
            }
        }
        debug!("Activity poller stopped");
    })
}
