//! Single-slot time-to-live cache cells.
//!
//! One `TtlCell` exists per upstream (or per merged snapshot). Entries are
//! swapped in whole behind an `Arc`, so a reader holding an entry keeps
//! seeing the value and timestamp that were written together.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// A cached value together with the moment it was fetched.
#[derive(Debug)]
pub struct CacheEntry<T> {
    pub value: T,
    pub fetched_at: Instant,
    pub fetched_at_utc: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            fetched_at: Instant::now(),
            fetched_at_utc: Utc::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    /// True iff `age <= max_age`.
    pub fn is_fresh(&self, max_age: Duration) -> bool {
        self.age() <= max_age
    }
}

/// Single-key cache with a staleness threshold.
///
/// There is no eviction: a stale entry stays readable until the next `set`
/// replaces it.
#[derive(Debug)]
pub struct TtlCell<T> {
    ttl: Duration,
    slot: RwLock<Option<Arc<CacheEntry<T>>>>,
}

impl<T> TtlCell<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Latest entry regardless of age.
    pub fn get(&self) -> Option<Arc<CacheEntry<T>>> {
        self.slot.read().clone()
    }

    /// Latest entry only if it is still within the TTL.
    pub fn fresh(&self) -> Option<Arc<CacheEntry<T>>> {
        self.get().filter(|entry| entry.is_fresh(self.ttl))
    }

    /// Replace the slot with `value` stamped at the current time.
    pub fn set(&self, value: T) -> Arc<CacheEntry<T>> {
        let entry = Arc::new(CacheEntry::new(value));
        *self.slot.write() = Some(Arc::clone(&entry));
        entry
    }

    pub fn is_empty(&self) -> bool {
        self.slot.read().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entry_fresh_until_ttl_elapses() {
        let cell = TtlCell::new(Duration::from_secs(30));
        assert!(cell.get().is_none());
        assert!(cell.fresh().is_none());

        cell.set(42u32);
        tokio::time::advance(Duration::from_secs(30)).await;
        let entry = cell.fresh().expect("entry at exactly ttl is fresh");
        assert_eq!(entry.value, 42);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cell.fresh().is_none());
        // Stale entries stay readable
        assert_eq!(cell.get().map(|e| e.value), Some(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_resets_age() {
        let cell = TtlCell::new(Duration::from_secs(10));
        cell.set("old".to_string());
        tokio::time::advance(Duration::from_secs(25)).await;
        assert_eq!(cell.get().map(|e| e.age().as_secs()), Some(25));

        cell.set("new".to_string());
        let entry = cell.fresh().expect("fresh after set");
        assert_eq!(entry.value, "new");
        assert_eq!(entry.age(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reader_keeps_its_entry_across_overwrite() {
        let cell = TtlCell::new(Duration::from_secs(10));
        cell.set(vec![1, 2, 3]);
        let held = cell.get().expect("entry");

        tokio::time::advance(Duration::from_secs(3)).await;
        cell.set(vec![4]);

        assert_eq!(held.value, vec![1, 2, 3]);
        assert_eq!(held.age(), Duration::from_secs(3));
        assert_eq!(cell.get().map(|e| e.value.clone()), Some(vec![4]));
    }
}
