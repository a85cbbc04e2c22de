use crate::allocator::{BucketAllocator, BumpAllocator, Slot};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

struct Entry {
    slot: Slot,
    stored_at: Instant,
}

struct BucketInner {
    entries: HashMap<String, Entry>,
    allocator: Box<dyn BucketAllocator>,
}

/// Snapshot of one cache entry returned to callers that need the bytes and
/// age outside the bucket lock (e.g. the write-through overlay's staging
/// copy). Owns its bytes, unlike [`Bucket::get`], which hands a view in
/// under the lock.
#[derive(Debug, Clone)]
pub struct EntrySnapshot {
    pub data: Vec<u8>,
    pub stored_at: Instant,
}

/// One row of the local blob table: a lock-protected key→entry map backed
/// by a private [`BucketAllocator`]. Every mutation and read holds the
/// bucket's mutex for its duration; no operation spans two buckets.
pub struct Bucket {
    inner: Mutex<BucketInner>,
    bucket_size: usize,
    /// Recompact once released bytes cross this fraction of the arena.
    compact_threshold: f64,
}

const DEFAULT_COMPACT_THRESHOLD: f64 = 0.5;

impl Bucket {
    #[must_use]
    pub fn new(bucket_size: usize, zero_all: bool) -> Self {
        Self {
            inner: Mutex::new(BucketInner {
                entries: HashMap::new(),
                allocator: Box::new(BumpAllocator::new(zero_all)),
            }),
            bucket_size,
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
        }
    }

    /// Insert or overwrite `key` with `data`. If `new_key` is given and
    /// differs from `key`, the entry is renamed atomically as part of the
    /// same locked section: the bucket never observes a state where both
    /// or neither of `key`/`new_key` hold the value.
    ///
    /// When the bucket is at capacity and `key` (or `new_key`) names a
    /// previously-unseen entry, the oldest entry by `stored_at` is evicted
    /// to make room.
    pub fn add_or_update(&self, key: &str, new_key: Option<&str>, data: &[u8], now: Instant) {
        let target_key = new_key.filter(|nk| *nk != key).unwrap_or(key);
        let mut guard = self.inner.lock().expect("bucket mutex poisoned");
        let guard = &mut *guard;

        if new_key.is_some_and(|nk| nk != key) {
            if let Some(old) = guard.entries.remove(key) {
                guard.allocator.release(old.slot);
            }
        }

        if !guard.entries.contains_key(target_key) && guard.entries.len() >= self.bucket_size {
            if let Some(oldest_key) = guard
                .entries
                .iter()
                .min_by_key(|(_, e)| e.stored_at)
                .map(|(k, _)| k.clone())
            {
                if let Some(evicted) = guard.entries.remove(&oldest_key) {
                    guard.allocator.release(evicted.slot);
                    tracing::debug!(evicted_key = %oldest_key, "bucket at capacity, evicted oldest entry");
                }
            }
        }

        if let Some(existing) = guard.entries.remove(target_key) {
            guard.allocator.release(existing.slot);
        }
        let slot = guard.allocator.store(data);
        guard
            .entries
            .insert(target_key.to_owned(), Entry { slot, stored_at: now });

        maybe_compact(guard, self.compact_threshold);
    }

    /// Deliver `key`'s bytes to `f` while the bucket lock is held: a view
    /// into bucket-owned memory that must be processed under the lock,
    /// without exposing a reference tied to a dropped guard.
    pub fn get<R>(&self, key: &str, f: impl FnOnce(&[u8], Instant) -> R) -> Option<R> {
        let guard = self.inner.lock().expect("bucket mutex poisoned");
        let entry = guard.entries.get(key)?;
        Some(f(guard.allocator.read(entry.slot), entry.stored_at))
    }

    /// Same as [`Bucket::get`] but copies the bytes out, for callers that
    /// need an owned value past the lock (the write-through overlay's
    /// staging buffer).
    #[must_use]
    pub fn get_owned(&self, key: &str) -> Option<EntrySnapshot> {
        self.get(key, |data, stored_at| EntrySnapshot {
            data: data.to_vec(),
            stored_at,
        })
    }

    pub fn delete(&self, key: &str) -> bool {
        let mut guard = self.inner.lock().expect("bucket mutex poisoned");
        match guard.entries.remove(key) {
            Some(entry) => {
                guard.allocator.release(entry.slot);
                true
            }
            None => false,
        }
    }

    /// Remove every entry whose age (`now - stored_at`) exceeds `max_age`.
    /// Returns the number of entries pruned.
    pub fn prune(&self, now: Instant, max_age: std::time::Duration) -> usize {
        let mut guard = self.inner.lock().expect("bucket mutex poisoned");
        let stale: Vec<String> = guard
            .entries
            .iter()
            .filter(|(_, e)| now.saturating_duration_since(e.stored_at) > max_age)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            if let Some(entry) = guard.entries.remove(key) {
                guard.allocator.release(entry.slot);
            }
        }
        let pruned = stale.len();
        maybe_compact(&mut guard, self.compact_threshold);
        pruned
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("bucket mutex poisoned").entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn maybe_compact(guard: &mut BucketInner, threshold: f64) {
    if guard.allocator.dead_fraction() < threshold {
        return;
    }
    let ordered_keys: Vec<String> = guard.entries.keys().cloned().collect();
    let slots: Vec<Slot> = ordered_keys.iter().map(|k| guard.entries[k].slot).collect();
    let new_slots = guard.allocator.compact(&slots);
    for (key, slot) in ordered_keys.into_iter().zip(new_slots) {
        if let Some(entry) = guard.entries.get_mut(&key) {
            entry.slot = slot;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn add_then_get_round_trips() {
        let bucket = Bucket::new(8, false);
        let now = Instant::now();
        bucket.add_or_update("k1", None, b"v1", now);
        let got = bucket.get("k1", |data, _| data.to_vec());
        assert_eq!(got, Some(b"v1".to_vec()));
    }

    #[test]
    fn rename_moves_value_to_new_key_only() {
        let bucket = Bucket::new(8, false);
        let now = Instant::now();
        bucket.add_or_update("a", Some("b"), &[1, 2], now);
        assert_eq!(bucket.get("b", |d, _| d.to_vec()), Some(vec![1, 2]));
        assert_eq!(bucket.get("a", |d, _| d.to_vec()), None);
    }

    #[test]
    fn delete_is_idempotent() {
        let bucket = Bucket::new(8, false);
        bucket.add_or_update("k", None, b"v", Instant::now());
        assert!(bucket.delete("k"));
        assert!(!bucket.delete("k"));
    }

    #[test]
    fn capacity_eviction_drops_oldest_entry() {
        let bucket = Bucket::new(2, false);
        let t0 = Instant::now();
        bucket.add_or_update("a", None, b"1", t0);
        bucket.add_or_update("b", None, b"2", t0 + Duration::from_millis(1));
        bucket.add_or_update("c", None, b"3", t0 + Duration::from_millis(2));
        assert_eq!(bucket.len(), 2);
        assert_eq!(bucket.get("a", |d, _| d.to_vec()), None);
        assert!(bucket.get("b", |d, _| d.to_vec()).is_some());
        assert!(bucket.get("c", |d, _| d.to_vec()).is_some());
    }

    #[test]
    fn prune_removes_only_entries_older_than_max_age() {
        let bucket = Bucket::new(8, false);
        let t0 = Instant::now();
        bucket.add_or_update("old", None, b"1", t0);
        bucket.add_or_update("fresh", None, b"2", t0 + Duration::from_secs(10));
        let pruned = bucket.prune(t0 + Duration::from_secs(20), Duration::from_secs(15));
        assert_eq!(pruned, 1);
        assert_eq!(bucket.get("old", |d, _| d.to_vec()), None);
        assert!(bucket.get("fresh", |d, _| d.to_vec()).is_some());
    }

    #[test]
    fn overwrite_replaces_value_in_place() {
        let bucket = Bucket::new(8, false);
        let now = Instant::now();
        bucket.add_or_update("k", None, b"first", now);
        bucket.add_or_update("k", None, b"second", now);
        assert_eq!(bucket.get("k", |d, _| d.to_vec()), Some(b"second".to_vec()));
        assert_eq!(bucket.len(), 1);
    }
}
