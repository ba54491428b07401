//! Single values with an expiration policy.
//!
//! [`TimedValue`] holds one value together with the instant it was stored
//! and answers `None` once the value is stale. [`BannedSet`] builds the
//! temporarily-banned endpoint list on top of it.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Custom staleness check receiving the value and its age.
pub type ExpirationFn<T> = Box<dyn Fn(&T, Duration) -> bool + Send + Sync>;

/// When a stored value stops being served.
pub enum Expiration<T> {
    /// Stale once older than the duration.
    After(Duration),
    /// Stale when the function returns true.
    Custom(ExpirationFn<T>),
}

impl<T> Expiration<T> {
    fn is_expired(&self, value: &T, age: Duration) -> bool {
        match self {
            Expiration::After(ttl) => age >= *ttl,
            Expiration::Custom(f) => f(value, age),
        }
    }
}

impl<T> fmt::Debug for Expiration<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expiration::After(ttl) => f.debug_tuple("After").field(ttl).finish(),
            Expiration::Custom(_) => f.write_str("Custom"),
        }
    }
}

struct Stored<T> {
    value: T,
    stored_at: Instant,
}

/// A value that expires.
pub struct TimedValue<T> {
    slot: Mutex<Option<Stored<T>>>,
    expiration: Expiration<T>,
    // Serializes async refreshes so concurrent callers share one refresh
    refresh: tokio::sync::Mutex<()>,
}

impl<T: Clone> TimedValue<T> {
    /// An empty value that expires `ttl` after each store.
    pub fn new(ttl: Duration) -> Self {
        Self::with_expiration(Expiration::After(ttl))
    }

    /// An empty value with a custom expiration policy.
    pub fn with_expiration(expiration: Expiration<T>) -> Self {
        Self {
            slot: Mutex::new(None),
            expiration,
            refresh: tokio::sync::Mutex::new(()),
        }
    }

    /// The value, if present and fresh.
    pub fn get(&self) -> Option<T> {
        self.with(|value| value.cloned())
    }

    /// Run `f` on the fresh value without cloning it.
    ///
    /// `f` sees `None` when the value is absent or stale.
    pub fn with<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        let mut slot = self.slot.lock();
        let now = Instant::now();
        let expired = slot.as_ref().is_some_and(|stored| {
            self.expiration
                .is_expired(&stored.value, now.saturating_duration_since(stored.stored_at))
        });
        if expired {
            *slot = None;
        }
        f(slot.as_ref().map(|stored| &stored.value))
    }

    /// Store `value`, restarting its lifetime.
    pub fn set(&self, value: T) {
        *self.slot.lock() = Some(Stored {
            value,
            stored_at: Instant::now(),
        });
    }

    /// Drop the value.
    pub fn invalidate(&self) {
        *self.slot.lock() = None;
    }

    /// The fresh value, or the result of `init` stored in its place.
    pub fn get_or_insert_with(&self, init: impl FnOnce() -> T) -> T {
        let mut slot = self.slot.lock();
        let now = Instant::now();
        if let Some(stored) = slot.as_ref()
            && !self
                .expiration
                .is_expired(&stored.value, now.saturating_duration_since(stored.stored_at))
        {
            return stored.value.clone();
        }
        let value = init();
        *slot = Some(Stored {
            value: value.clone(),
            stored_at: now,
        });
        value
    }

    /// Mutate the fresh value (or a new one from `init`) and restart its lifetime.
    pub fn update(&self, init: impl FnOnce() -> T, f: impl FnOnce(&mut T)) {
        let mut slot = self.slot.lock();
        let now = Instant::now();
        let mut value = match slot.take() {
            Some(stored)
                if !self
                    .expiration
                    .is_expired(&stored.value, now.saturating_duration_since(stored.stored_at)) =>
            {
                stored.value
            }
            _ => init(),
        };
        f(&mut value);
        *slot = Some(Stored {
            value,
            stored_at: now,
        });
    }

    /// The fresh value, refreshing it with `refresh` when stale.
    ///
    /// Concurrent callers finding the value stale run a single refresh; the
    /// others wait and then read what it stored. A failed refresh stores
    /// nothing.
    pub async fn get_or_try_refresh<F, Fut, E>(&self, refresh: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get() {
            return Ok(value);
        }
        let _gate = self.refresh.lock().await;
        if let Some(value) = self.get() {
            return Ok(value);
        }
        let value = refresh().await?;
        self.set(value.clone());
        Ok(value)
    }
}

impl<T> fmt::Debug for TimedValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimedValue")
            .field("present", &self.slot.lock().is_some())
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Keys excluded from selection for a cooldown window.
///
/// The whole set lifts together once `cooldown` passes without a new ban.
#[derive(Debug)]
pub struct BannedSet<K> {
    inner: TimedValue<HashSet<K>>,
}

impl<K: Eq + Hash + Clone> BannedSet<K> {
    /// An empty set with the given cooldown.
    pub fn new(cooldown: Duration) -> Self {
        Self {
            inner: TimedValue::new(cooldown),
        }
    }

    /// Exclude `key` and restart the cooldown.
    pub fn ban(&self, key: K) {
        self.inner.update(HashSet::new, |set| {
            set.insert(key);
        });
    }

    /// Whether `key` is currently excluded.
    pub fn is_banned(&self, key: &K) -> bool {
        self.inner.with(|set| set.is_some_and(|set| set.contains(key)))
    }

    /// Currently excluded keys.
    pub fn banned(&self) -> HashSet<K> {
        self.inner.get().unwrap_or_default()
    }

    /// Lift every ban.
    pub fn clear(&self) {
        self.inner.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_value_expires_after_ttl() {
        let value = TimedValue::new(Duration::from_secs(10));
        assert_eq!(value.get(), None);

        value.set(42);
        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(value.get(), Some(42));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(value.get(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_expiration() {
        // Even values never expire, odd values expire immediately
        let value: TimedValue<u32> =
            TimedValue::with_expiration(Expiration::Custom(Box::new(|v, _| v % 2 == 1)));
        value.set(2);
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(value.get(), Some(2));

        value.set(3);
        assert_eq!(value.get(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_or_insert_with() {
        let value = TimedValue::new(Duration::from_secs(5));
        assert_eq!(value.get_or_insert_with(|| "a"), "a");
        assert_eq!(value.get_or_insert_with(|| "b"), "a");

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(value.get_or_insert_with(|| "c"), "c");
    }

    #[tokio::test]
    async fn test_concurrent_refresh_runs_once() {
        let value = Arc::new(TimedValue::new(Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let value = Arc::clone(&value);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                value
                    .get_or_try_refresh(|| async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, ()>(7u32)
                    })
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(7));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_stores_nothing() {
        let value: TimedValue<u32> = TimedValue::new(Duration::from_secs(60));
        let err = value.get_or_try_refresh(|| async { Err("down") }).await;
        assert_eq!(err, Err("down"));
        assert_eq!(value.get(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_banned_set_cooldown() {
        let banned = BannedSet::new(Duration::from_secs(120));
        banned.ban("shard-1");
        assert!(banned.is_banned(&"shard-1"));
        assert!(!banned.is_banned(&"shard-2"));

        tokio::time::advance(Duration::from_secs(60)).await;
        banned.ban("shard-2");
        assert_eq!(banned.banned().len(), 2);

        // Second ban restarted the window for the whole set
        tokio::time::advance(Duration::from_secs(90)).await;
        assert!(banned.is_banned(&"shard-1"));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!banned.is_banned(&"shard-1"));
        assert!(banned.banned().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_borrows_fresh_value() {
        let value: TimedValue<Vec<u8>> = TimedValue::new(Duration::from_secs(10));
        assert_eq!(value.with(|v| v.map(Vec::len)), None);

        value.set(vec![1, 2, 3]);
        assert_eq!(value.with(|v| v.map(Vec::len)), Some(3));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(value.with(|v| v.map(Vec::len)), None);
        assert_eq!(value.get(), None);
    }
}
