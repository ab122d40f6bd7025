//! Keyed containers backing cache snapshots.
//!
//! The default container is a hash map (insertion-unordered); an ordered
//! map is available for policies whose high-water mark is derived from the
//! largest key. Custom containers only need upsert, size and deep copy.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use crate::policy::CachePolicy;

/// Contract a snapshot container must satisfy.
///
/// `Default` yields the empty container, `Clone` is the deep copy taken at
/// the start of every incremental update.
pub trait CacheContainer<K, V>: Default + Clone + Send + Sync + 'static {
    /// Insert the value, replacing any previous value under the same key.
    fn upsert(&mut self, key: K, value: V);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> CacheContainer<K, V> for HashMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn upsert(&mut self, key: K, value: V) {
        self.insert(key, value);
    }

    fn len(&self) -> usize {
        HashMap::len(self)
    }
}

impl<K, V> CacheContainer<K, V> for BTreeMap<K, V>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn upsert(&mut self, key: K, value: V) {
        self.insert(key, value);
    }

    fn len(&self) -> usize {
        BTreeMap::len(self)
    }
}

/// Default container for a policy: hash-keyed, insertion-unordered.
pub type CacheMap<P> = HashMap<<P as CachePolicy>::Key, <P as CachePolicy>::Value>;

/// Key-ordered container, for policies that read their high-water mark off
/// the largest key.
pub type OrderedCacheMap<P> = BTreeMap<<P as CachePolicy>::Key, <P as CachePolicy>::Value>;
