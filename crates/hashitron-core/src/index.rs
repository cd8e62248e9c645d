//! In-memory hash index: a fixed array of singly linked bucket chains.
//!
//! Each key lives in exactly one chain (the one its hash selects) and at most
//! once within it. The table never grows; chains simply get longer.

use crate::config::BucketHasher;

/// One node of a bucket chain.
struct BucketEntry {
    key: Vec<u8>,
    value: Vec<u8>,
    next: Option<Box<BucketEntry>>,
}

/// Hash a key with the configured function.
pub fn hash_key(hasher: BucketHasher, key: &[u8]) -> u32 {
    match hasher {
        BucketHasher::Djb2 => key
            .iter()
            .fold(5381u32, |h, &b| h.wrapping_mul(33).wrapping_add(u32::from(b))),
        BucketHasher::Crc32c => crc32c::crc32c(key),
    }
}

/// Chained hash index owned by the engine.
pub struct HashIndex {
    buckets: Vec<Option<Box<BucketEntry>>>,
    hasher: BucketHasher,
    len: usize,
}

impl HashIndex {
    /// Create an empty index. `bucket_count` must be non-zero (checked by `Config::validate`).
    pub fn new(bucket_count: usize, hasher: BucketHasher) -> Self {
        let mut buckets = Vec::with_capacity(bucket_count);
        buckets.resize_with(bucket_count, || None);
        Self { buckets, hasher, len: 0 }
    }

    /// Bucket a key maps to, in `[0, bucket_count)`.
    pub fn bucket_of(&self, key: &[u8]) -> usize {
        hash_key(self.hasher, key) as usize % self.buckets.len()
    }

    /// Replace the value of an existing key in place, or prepend a new entry.
    /// Returns the previous value if the key was present.
    pub fn insert_or_update(&mut self, key: Vec<u8>, value: Vec<u8>) -> Option<Vec<u8>> {
        let idx = self.bucket_of(&key);

        let mut cursor = self.buckets[idx].as_deref_mut();
        while let Some(entry) = cursor {
            if entry.key == key {
                return Some(std::mem::replace(&mut entry.value, value));
            }
            cursor = entry.next.as_deref_mut();
        }

        let head = self.buckets[idx].take();
        self.buckets[idx] = Some(Box::new(BucketEntry { key, value, next: head }));
        self.len += 1;
        None
    }

    /// Current value for `key`, if any.
    pub fn lookup(&self, key: &[u8]) -> Option<&[u8]> {
        let mut cursor = self.buckets[self.bucket_of(key)].as_deref();
        while let Some(entry) = cursor {
            if entry.key == key {
                return Some(&entry.value);
            }
            cursor = entry.next.as_deref();
        }
        None
    }

    /// Unlink `key` from its chain. Returns the removed value, `None` if absent.
    pub fn remove(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        let idx = self.bucket_of(key);
        let mut link = &mut self.buckets[idx];
        loop {
            match link.take() {
                None => return None,
                Some(mut entry) if entry.key == key => {
                    *link = entry.next.take();
                    self.len -= 1;
                    return Some(entry.value);
                }
                Some(entry) => {
                    *link = Some(entry);
                    link = &mut link.as_mut()?.next;
                }
            }
        }
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.lookup(key).is_some()
    }

    /// Number of keys in the index.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Number of entries chained in `bucket`.
    pub fn chain_len(&self, bucket: usize) -> usize {
        let mut count = 0;
        let mut cursor = self.buckets.get(bucket).and_then(|b| b.as_deref());
        while let Some(entry) = cursor {
            count += 1;
            cursor = entry.next.as_deref();
        }
        count
    }

    /// Length of the longest chain.
    pub fn max_chain_len(&self) -> usize {
        (0..self.buckets.len()).map(|b| self.chain_len(b)).max().unwrap_or(0)
    }

    /// Drop every entry, keeping the bucket array.
    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            // Unlink iteratively; recursive Box drops can overflow on long chains.
            let mut cursor = bucket.take();
            while let Some(mut entry) = cursor {
                cursor = entry.next.take();
            }
        }
        self.len = 0;
    }
}

impl Drop for HashIndex {
    fn drop(&mut self) {
        self.clear();
    }
}
