//! Bounded pool of interchangeable endpoints with per-endpoint lock counts.
//!
//! Upstream front-end servers ("shards") are numerous and equivalent. This
//! pool creates them lazily, caps how many callers use each one at a time,
//! and hands them out round-robin so load spreads without pinning.
//!
//! # Selection
//!
//! [`Pending::next`] walks the pool starting after `current` (or from the
//! head) and returns the first endpoint under the per-endpoint cap. If none
//! qualifies and the pool can still grow, a new endpoint is created. If the
//! pool is full, the least-loaded endpoint is shared.
//!
//! # Example
//!
//! ```
//! use skydav_core::pending::Pending;
//!
//! let pool = Pending::new(2, 1, |n| format!("shard-{n}"));
//! let a = pool.next(None);
//! let b = pool.next(None);
//! assert_eq!(*a, "shard-0");
//! assert_eq!(*b, "shard-1");
//! pool.free(&a);
//! pool.free(&b);
//! ```

use parking_lot::Mutex;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Creates the endpoint with the given pool index.
pub type Factory<T> = Box<dyn Fn(usize) -> T + Send + Sync>;

struct Slot<T> {
    item: Arc<T>,
    locks: usize,
}

/// A lazily grown pool of equivalent endpoints.
pub struct Pending<T> {
    slots: Mutex<Vec<Slot<T>>>,
    factory: Factory<T>,
    max_items: usize,
    max_locks: usize,
}

impl<T> Pending<T> {
    /// Create an empty pool.
    ///
    /// At most `max_items` endpoints are created; each is considered busy
    /// once `max_locks` callers hold it. Both limits are clamped to at
    /// least one.
    pub fn new(
        max_items: usize,
        max_locks: usize,
        factory: impl Fn(usize) -> T + Send + Sync + 'static,
    ) -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            factory: Box::new(factory),
            max_items: max_items.max(1),
            max_locks: max_locks.max(1),
        }
    }

    /// Take a lock on the next endpoint after `current`.
    ///
    /// Never fails: a full pool shares its least-loaded endpoint.
    pub fn next(&self, current: Option<&Arc<T>>) -> Arc<T> {
        let mut slots = self.slots.lock();
        let index = match self.select(&mut slots, current, &|_| true) {
            Some(index) => index,
            // Only reachable with an empty pool, which select always grows
            None => self.grow(&mut slots),
        };
        slots[index].locks += 1;
        Arc::clone(&slots[index].item)
    }

    /// Like [`next`](Self::next), skipping endpoints rejected by `filter`.
    ///
    /// Returns `None` when the pool is full and every endpoint is rejected.
    pub fn next_where(
        &self,
        current: Option<&Arc<T>>,
        filter: impl Fn(&T) -> bool,
    ) -> Option<Arc<T>> {
        let mut slots = self.slots.lock();
        let index = self.select(&mut slots, current, &filter)?;
        slots[index].locks += 1;
        Some(Arc::clone(&slots[index].item))
    }

    /// Take a lock that is released when the returned lease drops.
    pub fn lease(&self, current: Option<&Arc<T>>) -> PendingLease<'_, T> {
        let item = self.next(current);
        PendingLease { pool: self, item }
    }

    /// Like [`lease`](Self::lease), skipping endpoints rejected by `filter`.
    pub fn lease_where(
        &self,
        current: Option<&Arc<T>>,
        filter: impl Fn(&T) -> bool,
    ) -> Option<PendingLease<'_, T>> {
        let item = self.next_where(current, filter)?;
        Some(PendingLease { pool: self, item })
    }

    /// Release a lock taken by [`next`](Self::next).
    ///
    /// # Panics
    ///
    /// Panics if `item` does not belong to this pool or holds no lock.
    /// Both mean a caller freed twice or freed something it never took.
    pub fn free(&self, item: &Arc<T>) {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.iter_mut().find(|s| Arc::ptr_eq(&s.item, item)) else {
            panic!("Pending::free called with an endpoint that is not part of this pool");
        };
        if slot.locks == 0 {
            panic!("Pending::free would drive an endpoint lock count below zero");
        }
        slot.locks -= 1;
    }

    fn select(
        &self,
        slots: &mut Vec<Slot<T>>,
        current: Option<&Arc<T>>,
        filter: &dyn Fn(&T) -> bool,
    ) -> Option<usize> {
        let len = slots.len();
        let start = current
            .and_then(|c| slots.iter().position(|s| Arc::ptr_eq(&s.item, c)))
            .map_or(0, |i| i + 1);
        let order = || (0..len).map(move |offset| (start + offset) % len);

        if let Some(index) =
            order().find(|&i| slots[i].locks < self.max_locks && filter(&slots[i].item))
        {
            return Some(index);
        }
        if len < self.max_items {
            return Some(self.grow(slots));
        }
        order()
            .filter(|&i| filter(&slots[i].item))
            .min_by_key(|&i| slots[i].locks)
    }

    fn grow(&self, slots: &mut Vec<Slot<T>>) -> usize {
        let index = slots.len();
        slots.push(Slot {
            item: Arc::new((self.factory)(index)),
            locks: 0,
        });
        tracing::debug!(index, max_items = self.max_items, "Created pool endpoint");
        index
    }

    /// Number of endpoints created so far.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// True before the first endpoint is created.
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Total locks currently held across all endpoints.
    pub fn locks_in_use(&self) -> usize {
        self.slots.lock().iter().map(|s| s.locks).sum()
    }

    /// Maximum number of endpoints.
    pub fn max_items(&self) -> usize {
        self.max_items
    }

    /// Check if the pool is healthy (no endpoint at its cap).
    pub fn is_healthy(&self) -> bool {
        self.slots.lock().iter().all(|s| s.locks < self.max_locks)
    }

    /// Check if the pool is degraded (some endpoints at cap, capacity left).
    pub fn is_degraded(&self) -> bool {
        !self.is_healthy() && !self.is_exhausted()
    }

    /// Check if the pool is exhausted (full and every endpoint at cap).
    pub fn is_exhausted(&self) -> bool {
        let slots = self.slots.lock();
        slots.len() >= self.max_items && slots.iter().all(|s| s.locks >= self.max_locks)
    }
}

impl<T> fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots.lock();
        f.debug_struct("Pending")
            .field("len", &slots.len())
            .field("locks", &slots.iter().map(|s| s.locks).collect::<Vec<_>>())
            .field("max_items", &self.max_items)
            .field("max_locks", &self.max_locks)
            .finish()
    }
}

/// A lock on a pool endpoint, freed on drop.
pub struct PendingLease<'a, T> {
    pool: &'a Pending<T>,
    item: Arc<T>,
}

impl<T> PendingLease<'_, T> {
    /// The leased endpoint.
    pub fn item(&self) -> &Arc<T> {
        &self.item
    }
}

impl<T> Deref for PendingLease<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.item
    }
}

impl<T> Drop for PendingLease<'_, T> {
    fn drop(&mut self) {
        self.pool.free(&self.item);
    }
}
