//! Spreading upstream calls over a pool of shard endpoints.
//!
//! [`ShardDispatcher`] combines the [`Pending`] pool, a [`BannedSet`] of
//! endpoints that recently failed and a [`RetryPolicy`]. Each attempt leases
//! a non-banned endpoint; a transient failure bans it for the cooldown and
//! the next attempt moves on to another one.

use crate::config::SkydavConfig;
use crate::error::{CloudError, CloudResult};
use crate::pending::{Pending, PendingLease};
use crate::retry::RetryPolicy;
use crate::timed_value::BannedSet;
use parking_lot::Mutex;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// An upstream endpoint that can be banned.
pub trait Endpoint: Send + Sync + 'static {
    /// Identity used by the banned set.
    type Id: Eq + Hash + Clone + Debug + Send + Sync;

    /// This endpoint's identity.
    fn id(&self) -> Self::Id;
}

/// Pool-backed dispatcher for one kind of upstream call.
pub struct ShardDispatcher<E: Endpoint> {
    pool: Pending<E>,
    banned: BannedSet<E::Id>,
    policy: RetryPolicy,
}

impl<E: Endpoint> ShardDispatcher<E> {
    /// Create a dispatcher over `pool`.
    pub fn new(pool: Pending<E>, ban_cooldown: Duration, policy: RetryPolicy) -> Self {
        Self {
            pool,
            banned: BannedSet::new(ban_cooldown),
            policy,
        }
    }

    /// Create a dispatcher sized from the session configuration.
    pub fn from_config(
        config: &SkydavConfig,
        factory: impl Fn(usize) -> E + Send + Sync + 'static,
    ) -> Self {
        Self::new(
            Pending::new(config.shard_pool_size, config.shard_max_users, factory),
            config.ban_cooldown,
            RetryPolicy::from(&config.retry),
        )
    }

    /// Run `op` against leased endpoints until it succeeds or retries run out.
    ///
    /// The per-attempt timeout is applied while the lease is held, so an
    /// endpoint that hangs is banned like one that fails.
    pub async fn call<T, F, Fut>(&self, mut op: F) -> CloudResult<T>
    where
        F: FnMut(Arc<E>) -> Fut,
        Fut: Future<Output = CloudResult<T>>,
    {
        let call_timeout = self.policy.call_timeout;
        let retries = RetryPolicy {
            call_timeout: Duration::ZERO,
            ..self.policy
        };
        let last: Mutex<Option<Arc<E>>> = Mutex::new(None);
        retries
            .run(|attempt| {
                let lease = self.lease_after(last.lock().as_ref());
                let endpoint = Arc::clone(lease.item());
                *last.lock() = Some(Arc::clone(&endpoint));
                let call = op(Arc::clone(&endpoint));
                async move {
                    let _lease = lease;
                    let result = if call_timeout.is_zero() {
                        call.await
                    } else {
                        tokio::time::timeout(call_timeout, call)
                            .await
                            .unwrap_or(Err(CloudError::Timeout(call_timeout)))
                    };
                    if let Err(e) = &result
                        && e.is_transient()
                    {
                        let id = endpoint.id();
                        debug!(?id, attempt, error = %e, "Banning endpoint after transient failure");
                        self.banned.ban(id);
                    }
                    result
                }
            })
            .await
    }

    fn lease_after(&self, current: Option<&Arc<E>>) -> PendingLease<'_, E> {
        if let Some(lease) = self
            .pool
            .lease_where(current, |e| !self.banned.is_banned(&e.id()))
        {
            return lease;
        }
        warn!(
            endpoints = self.pool.len(),
            "Every endpoint is banned, using one anyway"
        );
        self.pool.lease(current)
    }

    /// Whether `id` is currently excluded from selection.
    pub fn is_banned(&self, id: &E::Id) -> bool {
        self.banned.is_banned(id)
    }

    /// Lift every ban.
    pub fn clear_bans(&self) {
        self.banned.clear();
    }

    /// The underlying pool.
    pub fn pool(&self) -> &Pending<E> {
        &self.pool
    }
}
