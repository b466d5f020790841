//! Chained string-keyed map with a fixed bucket table.
//!
//! The compiler keys local slot numbers by variable name with one of these.
//! Lookup distinguishes "absent" from any stored value, which is what lets
//! slot zero work.

fn djb2(key: &str) -> u64 {
    let mut hash: u64 = 5381;
    for &b in key.as_bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(b as u64);
    }
    hash
}

pub struct StrMap<V> {
    buckets: Vec<Vec<(String, V)>>,
    count: usize,
}

impl<V> StrMap<V> {
    pub fn new() -> Self {
        Self::with_buckets(16)
    }

    pub fn with_buckets(n: usize) -> Self {
        let n = n.max(1);
        Self {
            buckets: (0..n).map(|_| Vec::new()).collect(),
            count: 0,
        }
    }

    fn bucket_of(&self, key: &str) -> usize {
        (djb2(key) % self.buckets.len() as u64) as usize
    }

    /// Inserts or overwrites, returning the previous value if any.
    pub fn insert(&mut self, key: &str, value: V) -> Option<V> {
        let b = self.bucket_of(key);
        for entry in &mut self.buckets[b] {
            if entry.0 == key {
                return Some(std::mem::replace(&mut entry.1, value));
            }
        }
        self.buckets[b].push((key.to_owned(), value));
        self.count += 1;
        None
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.buckets[self.bucket_of(key)]
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        let b = self.bucket_of(key);
        let i = self.buckets[b].iter().position(|(k, _)| k == key)?;
        self.count -= 1;
        Some(self.buckets[b].swap_remove(i).1)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn for_each(&self, mut f: impl FnMut(&str, &V)) {
        for bucket in &self.buckets {
            for (k, v) in bucket {
                f(k, v);
            }
        }
    }
}

impl<V> Default for StrMap<V> {
    fn default() -> Self {
        Self::new()
    }
}
