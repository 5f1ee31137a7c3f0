//! Bounded ring cache mapping peer address to hostname, populated by ERQ
//! reverse-lookup replies.
//!
//! Lookup walks backward from the insertion cursor, so the most recently
//! inserted entries are checked first (LRU-biased rather than strictly
//! ordered: a hit doesn't move its entry).

#[derive(Debug, Clone)]
struct Entry {
    address: String,
    hostname: String,
}

#[derive(Debug)]
pub struct AddressCache {
    entries: Vec<Option<Entry>>,
    capacity: usize,
    cursor: usize,
}

impl AddressCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        AddressCache {
            entries: vec![None; 0].into_iter().collect::<Vec<_>>(),
            capacity,
            cursor: 0,
        }
        .with_capacity_filled()
    }

    fn with_capacity_filled(mut self) -> Self {
        self.entries = (0..self.capacity).map(|_| None).collect();
        self
    }

    /// Record a resolved hostname for `address`, overwriting the oldest
    /// slot.
    pub fn insert(&mut self, address: &str, hostname: &str) {
        self.entries[self.cursor] = Some(Entry {
            address: address.to_string(),
            hostname: hostname.to_string(),
        });
        self.cursor = (self.cursor + 1) % self.capacity;
    }

    /// Look up a hostname for `address`, scanning backward from the most
    /// recently inserted slot.
    pub fn lookup(&self, address: &str) -> Option<&str> {
        for offset in 0..self.capacity {
            let idx = (self.cursor + self.capacity - 1 - offset) % self.capacity;
            if let Some(entry) = &self.entries[idx] {
                if entry.address == address {
                    return Some(entry.hostname.as_str());
                }
            }
        }
        None
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_lookup_round_trips() {
        let mut cache = AddressCache::new(4);
        cache.insert("10.0.0.1", "host-a");
        assert_eq!(cache.lookup("10.0.0.1"), Some("host-a"));
        assert_eq!(cache.lookup("10.0.0.2"), None);
    }

    #[test]
    fn overwrites_oldest_slot_when_full() {
        let mut cache = AddressCache::new(2);
        cache.insert("1.1.1.1", "one");
        cache.insert("2.2.2.2", "two");
        cache.insert("3.3.3.3", "three");
        // "1.1.1.1" was the oldest and should have been evicted.
        assert_eq!(cache.lookup("1.1.1.1"), None);
        assert_eq!(cache.lookup("2.2.2.2"), Some("two"));
        assert_eq!(cache.lookup("3.3.3.3"), Some("three"));
    }

    #[test]
    fn most_recent_duplicate_wins_lookup() {
        let mut cache = AddressCache::new(4);
        cache.insert("1.1.1.1", "stale");
        cache.insert("1.1.1.1", "fresh");
        assert_eq!(cache.lookup("1.1.1.1"), Some("fresh"));
    }

    #[test]
    fn capacity_is_never_zero() {
        let cache = AddressCache::new(0);
        assert_eq!(cache.capacity(), 1);
    }
}
