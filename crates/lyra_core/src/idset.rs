//! Chained identity set over arena slot indices.
//!
//! The collector uses one of these as its pool of every live allocation.
//! Membership is by handle identity, insertion is idempotent, and `to_vec`
//! hands back a snapshot so callers can delete members while walking.

pub struct IdSet {
    buckets: Vec<Vec<usize>>,
    count: usize,
}

impl IdSet {
    pub fn new() -> Self {
        Self::with_buckets(8)
    }

    pub fn with_buckets(n: usize) -> Self {
        let n = n.max(1);
        Self {
            buckets: (0..n).map(|_| Vec::new()).collect(),
            count: 0,
        }
    }

    fn bucket_of(&self, key: usize) -> usize {
        key % self.buckets.len()
    }

    /// Inserts a handle. Re-inserting an existing member is a no-op.
    pub fn insert(&mut self, key: usize) -> bool {
        let b = self.bucket_of(key);
        if self.buckets[b].contains(&key) {
            return false;
        }
        self.buckets[b].push(key);
        self.count += 1;
        // Chains stay short: triple the table once occupancy passes 2/3.
        if self.count * 3 > self.buckets.len() * 2 {
            self.grow();
        }
        true
    }

    pub fn remove(&mut self, key: usize) -> bool {
        let b = self.bucket_of(key);
        match self.buckets[b].iter().position(|&k| k == key) {
            Some(i) => {
                self.buckets[b].swap_remove(i);
                self.count -= 1;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: usize) -> bool {
        self.buckets[self.bucket_of(key)].contains(&key)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Snapshot of every member, in no particular order.
    pub fn to_vec(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.count);
        for bucket in &self.buckets {
            out.extend_from_slice(bucket);
        }
        out
    }

    fn grow(&mut self) {
        let next = self.buckets.len() * 3;
        let old = std::mem::replace(
            &mut self.buckets,
            (0..next).map(|_| Vec::new()).collect(),
        );
        for bucket in old {
            for key in bucket {
                let b = key % next;
                self.buckets[b].push(key);
            }
        }
    }
}

impl Default for IdSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_idempotent() {
        let mut set = IdSet::new();
        assert!(set.insert(42));
        assert!(!set.insert(42));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut set = IdSet::with_buckets(4);
        for i in 0..1000 {
            set.insert(i * 7);
        }
        assert_eq!(set.len(), 1000);
        for i in 0..1000 {
            assert!(set.contains(i * 7));
        }
        assert!(!set.contains(3));
    }

    #[test]
    fn remove_during_snapshot_walk() {
        let mut set = IdSet::new();
        for i in 0..64 {
            set.insert(i);
        }
        for key in set.to_vec() {
            if key % 2 == 0 {
                assert!(set.remove(key));
            }
        }
        assert_eq!(set.len(), 32);
        assert!(set.contains(1));
        assert!(!set.contains(2));
    }

    #[test]
    fn remove_missing_is_false() {
        let mut set = IdSet::new();
        set.insert(5);
        assert!(!set.remove(6));
        assert_eq!(set.len(), 1);
    }
}
