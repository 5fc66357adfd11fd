use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

/// A bucket holds at most `capacity` entries and records the number of hash
/// bits (`depth`) that all of its keys agree on.
struct Bucket<K, V> {
    depth: usize,
    capacity: usize,
    items: Vec<(K, V)>,
}

impl<K: Eq, V> Bucket<K, V> {
    fn new(capacity: usize, depth: usize) -> Self {
        Self {
            depth,
            capacity,
            items: Vec::with_capacity(capacity),
        }
    }

    fn find(&self, key: &K) -> Option<&V> {
        self.items.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn remove(&mut self, key: &K) -> bool {
        match self.items.iter().position(|(k, _)| k == key) {
            Some(pos) => {
                self.items.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Upserts the entry. Returns false if the bucket is full and the key
    /// is not already present.
    fn insert(&mut self, key: K, value: V) -> bool {
        if let Some(slot) = self.items.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
            return true;
        }
        if self.items.len() >= self.capacity {
            return false;
        }
        self.items.push((key, value));
        true
    }
}

type BucketHandle<K, V> = Arc<Mutex<Bucket<K, V>>>;

struct Directory<K, V> {
    global_depth: usize,
    num_buckets: usize,
    slots: Vec<BucketHandle<K, V>>,
}

/// Extendible hash table keyed by the low `global_depth` bits of a hash.
///
/// The directory is an array of `2^global_depth` shared bucket handles;
/// several slots may point at the same bucket while its local depth lags
/// the global depth. A full bucket splits into a sibling at the same depth,
/// the affected directory slots are reassigned by the newly discriminating
/// bit, and the insert retries (splits may cascade).
///
/// A single reader-writer latch protects the directory; mutation holds it
/// exclusively, so a split becomes visible atomically.
pub struct ExtendibleHashTable<K, V> {
    bucket_size: usize,
    dir: RwLock<Directory<K, V>>,
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(bucket_size: usize) -> Self {
        assert!(bucket_size > 0, "bucket_size must be positive");
        Self {
            bucket_size,
            dir: RwLock::new(Directory {
                global_depth: 0,
                num_buckets: 1,
                slots: vec![Arc::new(Mutex::new(Bucket::new(bucket_size, 0)))],
            }),
        }
    }

    fn index_of(key: &K, global_depth: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & ((1 << global_depth) - 1)
    }

    pub fn find(&self, key: &K) -> Option<V> {
        let dir = self.dir.read();
        let index = Self::index_of(key, dir.global_depth);
        let result = dir.slots[index].lock().find(key).cloned();
        result
    }

    pub fn remove(&self, key: &K) -> bool {
        let dir = self.dir.write();
        let index = Self::index_of(key, dir.global_depth);
        let result = dir.slots[index].lock().remove(key);
        result
    }

    pub fn insert(&self, key: K, value: V) {
        let mut dir = self.dir.write();
        loop {
            let index = Self::index_of(&key, dir.global_depth);
            if dir.slots[index].lock().insert(key.clone(), value.clone()) {
                return;
            }
            self.split_bucket(&mut dir, index);
        }
    }

    /// Splits the full bucket at directory slot `index`, growing the
    /// directory first if its local depth has caught up with the global.
    fn split_bucket(&self, dir: &mut Directory<K, V>, index: usize) {
        let local_depth = dir.slots[index].lock().depth;

        if local_depth == dir.global_depth {
            // Double the directory: the upper half mirrors the lower
            for i in 0..dir.slots.len() {
                let handle = Arc::clone(&dir.slots[i]);
                dir.slots.push(handle);
            }
            dir.global_depth += 1;
        }

        let old_bucket = Arc::clone(&dir.slots[index]);
        let new_bucket = Arc::new(Mutex::new(Bucket::new(self.bucket_size, local_depth)));

        // Slots whose low `local_depth` bits match `index` alternate between
        // the old and new bucket, so slots differing in the newly
        // discriminating bit split cleanly.
        let stride = 1usize << local_depth;
        let mut turn = false;
        let mut i = index;
        while i < dir.slots.len() {
            dir.slots[i] = if turn {
                Arc::clone(&new_bucket)
            } else {
                Arc::clone(&old_bucket)
            };
            turn = !turn;
            i += stride;
        }
        turn = false;
        let mut i = index as isize;
        while i >= 0 {
            dir.slots[i as usize] = if turn {
                Arc::clone(&new_bucket)
            } else {
                Arc::clone(&old_bucket)
            };
            turn = !turn;
            i -= stride as isize;
        }

        let items = std::mem::take(&mut old_bucket.lock().items);
        old_bucket.lock().depth += 1;
        new_bucket.lock().depth += 1;

        // Redistribute by the post-split index. Every entry came from one
        // bucket, so neither target can overflow here.
        for (k, v) in items {
            let target = Arc::clone(&dir.slots[Self::index_of(&k, dir.global_depth)]);
            target.lock().items.push((k, v));
        }

        dir.num_buckets += 1;
    }

    pub fn global_depth(&self) -> usize {
        self.dir.read().global_depth
    }

    pub fn local_depth(&self, dir_index: usize) -> usize {
        self.dir.read().slots[dir_index].lock().depth
    }

    pub fn num_buckets(&self) -> usize {
        self.dir.read().num_buckets
    }
}
