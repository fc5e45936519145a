//! Open-addressed hash map from `u64` keys to `u64` values.
//!
//! The ingest path keys almost everything by an X window id (or a packed `(window, atom)` pair)
//! and stores either a client handle or an arena slot, all of which fit in a `u64`. Pinning the
//! map to `u64`/`u64` keeps every entry inline in one flat allocation, so one map type serves the
//! client lookup tables and all keyed event buckets without per-entry boxing.

/// Entry codes stored in the cached-hash field. Real hashes are forced to be >= 2.
const EMPTY: u32 = 0;
const TOMBSTONE: u32 = 1;

#[derive(Debug, Clone, Copy, Default)]
struct Entry {
    hash: u32,
    key: u64,
    value: u64,
}

impl Entry {
    fn is_occupied(&self) -> bool {
        self.hash > TOMBSTONE
    }
}

fn hash_key(key: u64) -> u32 {
    // splitmix64 finalizer, truncated to the cached width.
    let mut h = key.wrapping_add(0x9e37_79b9_7f4a_7c15);
    h = (h ^ (h >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    h = (h ^ (h >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    h ^= h >> 31;
    let h = (h >> 32) as u32;
    if h <= TOMBSTONE {
        h | 2
    } else {
        h
    }
}

/// A linear-probing hash map specialized to `u64` keys and values.
///
/// Capacity is always a power of two and the load factor (live entries plus tombstones) is kept
/// at or below 3/4; crossing that threshold doubles the table and drops accumulated tombstones.
/// An empty map holds no allocation until the first insert.
#[derive(Debug, Default, Clone)]
pub struct U64Map {
    entries: Box<[Entry]>,
    len: usize,
    // live entries + tombstones; what the load factor is measured against
    used: usize,
}

impl U64Map {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts or updates `key`, returning the previous value if one was present.
    pub fn insert(&mut self, key: u64, value: u64) -> Option<u64> {
        if self.entries.is_empty() || (self.used + 1) * 4 > self.entries.len() * 3 {
            self.grow();
        }

        let hash = hash_key(key);
        let mask = self.entries.len() - 1;
        let mut idx = hash as usize & mask;
        let mut first_tombstone = None;
        loop {
            let entry = self.entries[idx];
            if entry.hash == EMPTY {
                // Re-use the earliest tombstone on the probe path if we crossed one.
                let slot = first_tombstone.unwrap_or(idx);
                if self.entries[slot].hash == EMPTY {
                    self.used += 1;
                }
                self.entries[slot] = Entry { hash, key, value };
                self.len += 1;
                return None;
            }
            if entry.hash == TOMBSTONE {
                if first_tombstone.is_none() {
                    first_tombstone = Some(idx);
                }
            } else if entry.hash == hash && entry.key == key {
                let old = entry.value;
                self.entries[idx].value = value;
                return Some(old);
            }
            idx = (idx + 1) & mask;
        }
    }

    /// Looks up `key`.
    pub fn get(&self, key: u64) -> Option<u64> {
        if self.len == 0 {
            return None;
        }

        let hash = hash_key(key);
        let mask = self.entries.len() - 1;
        let mut idx = hash as usize & mask;
        loop {
            let entry = self.entries[idx];
            if entry.hash == EMPTY {
                return None;
            }
            if entry.hash == hash && entry.key == key {
                return Some(entry.value);
            }
            idx = (idx + 1) & mask;
        }
    }

    /// Returns `true` if `key` is present.
    pub fn contains(&self, key: u64) -> bool {
        self.get(key).is_some()
    }

    /// Removes `key`, returning its value if it was present.
    ///
    /// The slot is left as a tombstone so probe chains through it stay intact; the next rehash
    /// reclaims it.
    pub fn remove(&mut self, key: u64) -> Option<u64> {
        if self.len == 0 {
            return None;
        }

        let hash = hash_key(key);
        let mask = self.entries.len() - 1;
        let mut idx = hash as usize & mask;
        loop {
            let entry = self.entries[idx];
            if entry.hash == EMPTY {
                return None;
            }
            if entry.hash == hash && entry.key == key {
                self.entries[idx] = Entry {
                    hash: TOMBSTONE,
                    key: 0,
                    value: 0,
                };
                self.len -= 1;
                return Some(entry.value);
            }
            idx = (idx + 1) & mask;
        }
    }

    /// Removes every entry, keeping the allocation.
    pub fn clear(&mut self) {
        self.entries.fill(Entry::default());
        self.len = 0;
        self.used = 0;
    }

    /// Iterates over `(key, value)` pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.entries
            .iter()
            .filter(|entry| entry.is_occupied())
            .map(|entry| (entry.key, entry.value))
    }

    fn grow(&mut self) {
        let new_cap = if self.entries.is_empty() {
            16
        } else {
            self.entries.len() * 2
        };
        let old = std::mem::replace(&mut self.entries, vec![Entry::default(); new_cap].into());
        self.len = 0;
        self.used = 0;
        for entry in old.iter().filter(|entry| entry.is_occupied()) {
            self.insert(entry.key, entry.value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_update() {
        let mut map = U64Map::new();
        assert!(map.is_empty());
        assert_eq!(map.insert(0xdead, 1), None);
        assert_eq!(map.insert(0xbeef, 2), None);
        assert_eq!(map.get(0xdead), Some(1));
        assert_eq!(map.get(0xbeef), Some(2));
        assert_eq!(map.get(0xcafe), None);
        assert_eq!(map.insert(0xdead, 3), Some(1));
        assert_eq!(map.get(0xdead), Some(3));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn remove_leaves_probe_chains_intact() {
        let mut map = U64Map::new();
        for key in 0..64u64 {
            map.insert(key, key * 10);
        }
        for key in (0..64u64).step_by(2) {
            assert_eq!(map.remove(key), Some(key * 10));
        }
        assert_eq!(map.len(), 32);
        for key in 0..64u64 {
            let expected = if key % 2 == 0 { None } else { Some(key * 10) };
            assert_eq!(map.get(key), expected, "key {}", key);
        }
        assert_eq!(map.remove(1000), None);
    }

    #[test]
    fn tombstones_are_reused() {
        let mut map = U64Map::new();
        map.insert(7, 70);
        map.remove(7);
        map.insert(7, 71);
        assert_eq!(map.get(7), Some(71));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn survives_growth() {
        let mut map = U64Map::new();
        for key in 0..10_000u64 {
            map.insert(key.wrapping_mul(0x1234_5678_9abc_def1), key);
        }
        assert_eq!(map.len(), 10_000);
        for key in 0..10_000u64 {
            assert_eq!(map.get(key.wrapping_mul(0x1234_5678_9abc_def1)), Some(key));
        }
    }

    #[test]
    fn clear_keeps_working() {
        let mut map = U64Map::new();
        for key in 0..100u64 {
            map.insert(key, key);
        }
        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.get(42), None);
        map.insert(42, 1);
        assert_eq!(map.get(42), Some(1));
    }

    #[test]
    fn iter_yields_all_live_entries() {
        let mut map = U64Map::new();
        for key in 0..32u64 {
            map.insert(key, key + 100);
        }
        map.remove(5);
        let mut pairs: Vec<_> = map.iter().collect();
        pairs.sort_unstable();
        assert_eq!(pairs.len(), 31);
        assert!(!pairs.iter().any(|&(k, _)| k == 5));
        assert!(pairs.iter().all(|&(k, v)| v == k + 100));
    }
}
