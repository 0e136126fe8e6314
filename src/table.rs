use crate::DefaultHashBuilder;
use hashbrown::hash_table::{Entry, HashTable};
use parking_lot::Mutex;
use std::fmt::{self, Debug, Formatter};
use std::hash::{BuildHasher, Hash, Hasher};

#[inline]
fn make_hash<Q: ?Sized + Hash, S: BuildHasher>(build_hasher: &S, key: &Q) -> u64 {
    let mut h = build_hasher.build_hasher();
    key.hash(&mut h);
    h.finish()
}

/// A hash table guarded by a single mutex.
///
/// Every operation that touches the entries takes the one lock for its whole duration, so as the
/// number of threads grows the critical section becomes the only point of serialization. That is
/// the point: this type exists to be contended, and to compare how long the lock is held when the
/// key's hash is computed inside the critical section ([`get_or_insert`]) versus before it
/// ([`get_or_insert_with_hint`]).
///
/// The lock is always taken through a scoped guard, and is therefore released on every exit path,
/// including the early return when a lookup hits.
///
/// [`get_or_insert`]: ContendedHashTable::get_or_insert
/// [`get_or_insert_with_hint`]: ContendedHashTable::get_or_insert_with_hint
pub struct ContendedHashTable<K, V, S = DefaultHashBuilder> {
    map: Mutex<HashTable<(K, V)>>,
    build_hasher: S,
}

impl<K, V, S> Default for ContendedHashTable<K, V, S>
where
    S: Default,
{
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V> ContendedHashTable<K, V, DefaultHashBuilder> {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty table with room for at least `capacity` entries before it reallocates.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, DefaultHashBuilder::default())
    }
}

impl<K, V, S> ContendedHashTable<K, V, S> {
    /// Creates an empty table which will use `build_hasher` to hash keys.
    pub fn with_hasher(build_hasher: S) -> Self {
        Self {
            map: Mutex::new(HashTable::new()),
            build_hasher,
        }
    }

    /// Creates an empty table with the given capacity, using `build_hasher` to hash keys.
    pub fn with_capacity_and_hasher(capacity: usize, build_hasher: S) -> Self {
        Self {
            map: Mutex::new(HashTable::with_capacity(capacity)),
            build_hasher,
        }
    }

    /// Returns the number of entries in the table.
    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    /// Returns `true` if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a reference to the table's [`BuildHasher`].
    pub fn hasher(&self) -> &S {
        &self.build_hasher
    }
}

impl<K, V, S> ContendedHashTable<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    /// Hashes `key` the same way the table does internally.
    ///
    /// This is the value [`get_or_insert_with_hint`](Self::get_or_insert_with_hint) computes
    /// before taking the lock.
    #[inline]
    pub fn hash(&self, key: &K) -> u64 {
        make_hash(&self.build_hasher, key)
    }

    /// Replaces the contents of the table with `entries`.
    ///
    /// If a key appears more than once in `entries`, the first occurrence wins.
    ///
    /// This takes `&mut self`, so it cannot overlap with any other operation on the table. Callers
    /// that share the table between threads must establish that the reset happens-before those
    /// threads start using it.
    ///
    /// ```
    /// use contended::ContendedHashTable;
    ///
    /// let mut table = ContendedHashTable::new();
    /// table.insert("stale", 0);
    /// table.reset(vec![("a", 1), ("b", 2), ("a", 3)]);
    /// assert_eq!(table.len(), 2);
    /// assert_eq!(table.get(&"a"), Some(1));
    /// assert_eq!(table.get(&"stale"), None);
    /// ```
    pub fn reset<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let map = self.map.get_mut();
        let build_hasher = &self.build_hasher;
        let hasher = |(k, _): &(K, V)| make_hash(build_hasher, k);

        map.clear();
        let entries = entries.into_iter();
        map.reserve(entries.size_hint().0, hasher);
        for (key, value) in entries {
            let hash = make_hash(build_hasher, &key);
            if let Entry::Vacant(e) = map.entry(hash, |(k, _)| *k == key, hasher) {
                e.insert((key, value));
            }
        }
    }

    /// Inserts `key` with `value` unless the key is already present.
    ///
    /// An existing entry is left untouched. Returns `true` if the pair was inserted.
    ///
    /// ```
    /// use contended::ContendedHashTable;
    ///
    /// let table = ContendedHashTable::new();
    /// assert!(table.insert(37, "a"));
    /// assert!(!table.insert(37, "b"));
    /// assert_eq!(table.get(&37), Some("a"));
    /// ```
    pub fn insert(&self, key: K, value: V) -> bool {
        let mut map = self.map.lock();
        let hash = self.hash(&key);
        match map.entry(
            hash,
            |(k, _)| *k == key,
            |(k, _)| make_hash(&self.build_hasher, k),
        ) {
            Entry::Occupied(_) => false,
            Entry::Vacant(e) => {
                e.insert((key, value));
                true
            }
        }
    }

    /// Returns the value stored for `key`, or inserts `value` for it if the key is absent and
    /// returns that.
    ///
    /// The lookup and the insert happen under the same lock acquisition, so two callers can never
    /// both observe the key as missing: whichever gets the lock first decides the value every
    /// caller sees. The key is hashed while the lock is held.
    ///
    /// ```
    /// use contended::ContendedHashTable;
    ///
    /// let table = ContendedHashTable::new();
    /// assert_eq!(table.get_or_insert(&"k", 1), 1);
    /// assert_eq!(table.get_or_insert(&"k", 2), 1);
    /// assert_eq!(table.len(), 1);
    /// ```
    pub fn get_or_insert(&self, key: &K, value: V) -> V
    where
        K: Clone,
        V: Clone,
    {
        let mut map = self.map.lock();
        let hash = self.hash(key);
        self.find_or_insert(&mut map, hash, key, value)
    }

    /// Same as [`get_or_insert`](Self::get_or_insert), but hashes `key` before taking the lock.
    ///
    /// The outcome is identical; only the hashing cost moves out of the critical section.
    ///
    /// ```
    /// use contended::ContendedHashTable;
    ///
    /// let table = ContendedHashTable::new();
    /// assert_eq!(table.get_or_insert_with_hint(&"k", 1), 1);
    /// assert_eq!(table.get_or_insert(&"k", 2), 1);
    /// ```
    pub fn get_or_insert_with_hint(&self, key: &K, value: V) -> V
    where
        K: Clone,
        V: Clone,
    {
        let hash = self.hash(key);
        let mut map = self.map.lock();
        self.find_or_insert(&mut map, hash, key, value)
    }

    #[inline]
    fn find_or_insert(&self, map: &mut HashTable<(K, V)>, hash: u64, key: &K, value: V) -> V
    where
        K: Clone,
        V: Clone,
    {
        match map.entry(
            hash,
            |(k, _)| k == key,
            |(k, _)| make_hash(&self.build_hasher, k),
        ) {
            Entry::Occupied(e) => e.get().1.clone(),
            Entry::Vacant(e) => e.insert((key.clone(), value)).get().1.clone(),
        }
    }

    /// Returns a copy of the value stored for `key`, if any.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let map = self.map.lock();
        let hash = self.hash(key);
        map.find(hash, |(k, _)| k == key).map(|(_, v)| v.clone())
    }

    /// Returns `true` if the table holds an entry for `key`.
    pub fn contains_key(&self, key: &K) -> bool {
        let map = self.map.lock();
        let hash = self.hash(key);
        map.find(hash, |(k, _)| k == key).is_some()
    }
}

impl<K, V, S> Debug for ContendedHashTable<K, V, S>
where
    K: Debug,
    V: Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let map = self.map.lock();
        f.debug_map().entries(map.iter().map(|(k, v)| (k, v))).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::hash::BuildHasherDefault;

    #[derive(Default)]
    struct ZeroHasher;

    impl Hasher for ZeroHasher {
        fn finish(&self) -> u64 {
            0
        }
        fn write(&mut self, _: &[u8]) {}
    }

    #[test]
    fn get_or_insert_is_idempotent() {
        let table = ContendedHashTable::<u64, u64>::new();
        table.insert(1, 10);
        let first = table.get_or_insert(&2, 20);
        let second = table.get_or_insert(&2, 30);
        assert_eq!(first, 20);
        assert_eq!(second, 20);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn hit_does_not_grow() {
        let table = ContendedHashTable::<u64, u64>::new();
        table.insert(1, 10);
        assert_eq!(table.get_or_insert(&1, 99), 10);
        assert_eq!(table.get_or_insert_with_hint(&1, 99), 10);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn hint_matches_internal_hash() {
        let table = ContendedHashTable::<&str, u64>::new();
        let mut h = table.hasher().build_hasher();
        "key".hash(&mut h);
        assert_eq!(table.hash(&"key"), h.finish());
    }

    #[test]
    fn reset_is_first_write_wins() {
        let mut table = ContendedHashTable::<u64, u64>::new();
        table.reset(vec![(1, 1), (2, 2), (1, 3)]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(&1), Some(1));
    }

    #[test]
    fn reset_discards_previous_contents() {
        let mut table = ContendedHashTable::<u64, u64>::new();
        for i in 0..100 {
            table.insert(i, i);
        }
        table.reset((1000..1010).map(|i| (i, i * 2)));
        assert_eq!(table.len(), 10);
        assert!(!table.contains_key(&0));
        assert_eq!(table.get(&1005), Some(2010));
    }

    #[test]
    fn colliding_hashes() {
        let table = ContendedHashTable::<u64, u64, BuildHasherDefault<ZeroHasher>>::default();
        for i in 0..64 {
            assert_eq!(table.get_or_insert_with_hint(&i, i + 1), i + 1);
        }
        for i in 0..64 {
            assert_eq!(table.get_or_insert(&i, 0), i + 1);
        }
        assert_eq!(table.len(), 64);
    }

    #[test]
    fn debug_lists_entries() {
        let table = ContendedHashTable::<u64, u64>::new();
        table.insert(7, 8);
        assert_eq!(format!("{:?}", table), "{7: 8}");
    }
}
