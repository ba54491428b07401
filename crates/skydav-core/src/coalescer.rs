//! Single-flight deduplication of concurrent lookups.
//!
//! When several callers ask for the same path before the first upstream
//! fetch completes, only one of them ("leader") runs the fetch and the others
//! ("waiters") receive a copy of its result, error included.
//!
//! The coalescer has no caching policy of its own. The in-flight entry is
//! removed as soon as the leader finishes, successfully or not.

use crate::entry::Entry;
use crate::error::{CloudError, CloudResult};
use crate::path::CloudPath;
use crate::stats::EngineStats;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::trace;

/// What a completed flight delivers.
pub type FlightResult = CloudResult<Option<Entry>>;

/// Result of trying to attach to an in-flight fetch.
enum AttachResult {
    /// This caller should perform the fetch.
    Leader,
    /// Another caller is fetching; wait for its result.
    Waiter(broadcast::Receiver<FlightResult>),
}

/// Entry for an in-flight fetch.
struct InFlight {
    sender: broadcast::Sender<FlightResult>,
    waiter_count: AtomicU64,
}

/// Statistics for lookup deduplication.
#[derive(Debug, Default)]
pub struct CoalescerStats {
    /// Number of callers that performed a fetch.
    pub leaders: AtomicU64,
    /// Number of callers that joined another caller's fetch.
    pub waiters: AtomicU64,
    /// Number of leaders that went away without completing.
    pub abandoned: AtomicU64,
}

impl CoalescerStats {
    /// Fraction of callers that were served by someone else's fetch.
    pub fn dedup_ratio(&self) -> f64 {
        let leaders = self.leaders.load(Ordering::Relaxed);
        let waiters = self.waiters.load(Ordering::Relaxed);
        let total = leaders + waiters;
        if total == 0 {
            0.0
        } else {
            waiters as f64 / total as f64
        }
    }
}

/// Removes the in-flight entry if the leader is dropped mid-fetch.
///
/// Waiters then see the channel close and retry, one of them becoming the
/// new leader.
struct LeaderGuard<'a> {
    coalescer: &'a RequestCoalescer,
    path: &'a CloudPath,
    armed: bool,
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.coalescer.in_flight.remove(self.path);
            self.coalescer.stats.abandoned.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Deduplicates concurrent fetches keyed by path.
pub struct RequestCoalescer {
    in_flight: DashMap<CloudPath, InFlight>,
    stats: CoalescerStats,
    engine_stats: Option<Arc<EngineStats>>,
}

impl RequestCoalescer {
    /// Create an empty coalescer.
    pub fn new() -> Self {
        Self {
            in_flight: DashMap::new(),
            stats: CoalescerStats::default(),
            engine_stats: None,
        }
    }

    /// Create an empty coalescer that also reports waiters to `stats`.
    pub fn with_engine_stats(stats: Arc<EngineStats>) -> Self {
        Self {
            engine_stats: Some(stats),
            ..Self::new()
        }
    }

    /// Run `fetch` for `path`, or wait for the fetch already running for it.
    ///
    /// Every caller attached to one flight observes the same result.
    pub async fn get_or_fetch<F, Fut>(&self, path: &CloudPath, fetch: F) -> FlightResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FlightResult>,
    {
        let mut fetch = Some(fetch);
        loop {
            match self.try_attach(path) {
                AttachResult::Leader => {
                    let mut guard = LeaderGuard {
                        coalescer: self,
                        path,
                        armed: true,
                    };
                    // A call leads at most once, so the fetch is still ours
                    let Some(fetch) = fetch.take() else {
                        return Err(CloudError::Cancelled);
                    };
                    let result = fetch().await;
                    guard.armed = false;
                    self.complete(path, result.clone());
                    return result;
                }
                AttachResult::Waiter(mut rx) => match rx.recv().await {
                    Ok(result) => return result,
                    Err(broadcast::error::RecvError::Closed) => {
                        trace!(path = %path, "In-flight leader went away, retrying");
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        // Capacity 1 and a single send: cannot lag
                        trace!(path = %path, "Lagged on in-flight result, retrying");
                    }
                },
            }
        }
    }

    fn try_attach(&self, path: &CloudPath) -> AttachResult {
        match self.in_flight.entry(path.clone()) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => {
                let entry = occupied.get();
                entry.waiter_count.fetch_add(1, Ordering::Relaxed);
                self.stats.waiters.fetch_add(1, Ordering::Relaxed);
                if let Some(engine) = &self.engine_stats {
                    engine.record_coalesced();
                }
                AttachResult::Waiter(entry.sender.subscribe())
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let (sender, _) = broadcast::channel(1);
                vacant.insert(InFlight {
                    sender,
                    waiter_count: AtomicU64::new(0),
                });
                self.stats.leaders.fetch_add(1, Ordering::Relaxed);
                AttachResult::Leader
            }
        }
    }

    /// Remove the flight and hand its result to all waiters.
    fn complete(&self, path: &CloudPath, result: FlightResult) -> u64 {
        if let Some((_, entry)) = self.in_flight.remove(path) {
            let waiters = entry.waiter_count.load(Ordering::Relaxed);
            // Waiters may have been dropped already
            let _ = entry.sender.send(result);
            if waiters > 0 {
                trace!(path = %path, waiters, "Delivered coalesced result");
            }
            waiters
        } else {
            0
        }
    }

    /// Number of paths currently being fetched.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Get statistics.
    pub fn stats(&self) -> &CoalescerStats {
        &self.stats
    }
}

impl Default for RequestCoalescer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_single_caller_fetches() {
        let coalescer = RequestCoalescer::new();
        let path = CloudPath::new("/a");

        let result = coalescer
            .get_or_fetch(&path, || async { Ok(Some(Entry::file("/a", 1))) })
            .await
            .unwrap();

        assert_eq!(result.unwrap().size(), 1);
        assert_eq!(coalescer.in_flight_count(), 0);
        assert_eq!(coalescer.stats().leaders.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let coalescer = Arc::new(RequestCoalescer::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let path = CloudPath::new("/videos");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coalescer = Arc::clone(&coalescer);
            let calls = Arc::clone(&calls);
            let path = path.clone();
            handles.push(tokio::spawn(async move {
                coalescer
                    .get_or_fetch(&path, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(Some(Entry::folder("/videos")))
                    })
                    .await
            }));
        }

        for handle in handles {
            let entry = handle.await.unwrap().unwrap().unwrap();
            assert_eq!(entry.path(), &path);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coalescer.stats().waiters.load(Ordering::Relaxed), 7);
    }

    #[tokio::test]
    async fn test_errors_are_shared_and_not_retained() {
        let coalescer = RequestCoalescer::new();
        let path = CloudPath::new("/broken");

        let err = coalescer
            .get_or_fetch(&path, || async { Err(CloudError::status(500, "boom")) })
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(coalescer.in_flight_count(), 0);

        // A failed flight leaves nothing behind; the next call fetches again
        let ok = coalescer
            .get_or_fetch(&path, || async { Ok(None) })
            .await
            .unwrap();
        assert!(ok.is_none());
    }

    #[tokio::test]
    async fn test_abandoned_leader_hands_over() {
        let coalescer = Arc::new(RequestCoalescer::new());
        let path = CloudPath::new("/slow");

        let leader = {
            let coalescer = Arc::clone(&coalescer);
            let path = path.clone();
            tokio::spawn(async move {
                coalescer
                    .get_or_fetch(&path, || async {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Ok(None)
                    })
                    .await
            })
        };
        while coalescer.in_flight_count() == 0 {
            tokio::task::yield_now().await;
        }

        let waiter = {
            let coalescer = Arc::clone(&coalescer);
            let path = path.clone();
            tokio::spawn(async move {
                coalescer
                    .get_or_fetch(&path, || async { Ok(Some(Entry::file("/slow", 7))) })
                    .await
            })
        };
        while coalescer.stats().waiters.load(Ordering::Relaxed) == 0 {
            tokio::task::yield_now().await;
        }

        leader.abort();
        let entry = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(entry.size(), 7);
        assert_eq!(coalescer.stats().abandoned.load(Ordering::Relaxed), 1);
    }
}
