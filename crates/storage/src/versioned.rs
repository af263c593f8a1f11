use std::collections::HashMap;

use shardkv_core::{Key, Timestamp, Value};

/// Each key maps to its versions in descending-timestamp order; the
/// front of the list is always the newest entry.
#[derive(Debug, Default)]
pub struct VersionedKVStore {
    store: HashMap<Key, Vec<(Timestamp, Value)>>,
}

impl VersionedKVStore {
    /// A fresh, empty store.
    pub fn new() -> Self {
        VersionedKVStore { store: HashMap::new() }
    }

    /// The most recent `(timestamp, value)` for `key`, or `None` if
    /// the key has never been written (or has had its only version
    /// removed).
    pub fn get(&self, key: &[u8]) -> Option<(Timestamp, &Value)> {
        self.store.get(key).and_then(|versions| versions.first().map(|(ts, v)| (*ts, v)))
    }

    /// The value valid as of `timestamp`: the first entry whose
    /// timestamp is `<= timestamp`. `None` if the key did not exist
    /// at that timestamp.
    pub fn get_as_of(&self, key: &[u8], timestamp: Timestamp) -> Option<&Value> {
        let versions = self.store.get(key)?;
        versions.iter().find(|(ts, _)| *ts <= timestamp).map(|(_, v)| v)
    }

    /// Insert `value` at `timestamp`, keeping the per-key list sorted
    /// by descending timestamp. Callers (the transactional backends)
    /// guarantee timestamps are fresh; inserting an existing
    /// timestamp is not supported and is a caller error, not handled
    /// here.
    pub fn put(&mut self, key: Key, value: Value, timestamp: Timestamp) {
        let versions = self.store.entry(key).or_default();
        if versions.first().is_some_and(|(ts, _)| *ts == timestamp) {
            tracing::warn!(?timestamp, "put at a timestamp already recorded for this key");
        }
        let pos = versions.iter().position(|(ts, _)| timestamp > *ts).unwrap_or(versions.len());
        versions.insert(pos, (timestamp, value));
    }

    /// Pop the head (newest) version of `key`, returning it. If the
    /// list becomes empty, the key is removed from the map entirely
    /// so that `contains_key` reflects "never written".
    pub fn remove(&mut self, key: &[u8]) -> Option<(Timestamp, Value)> {
        let versions = self.store.get_mut(key)?;
        let head = versions.remove(0);
        if versions.is_empty() {
            self.store.remove(key);
        }
        Some(head)
    }

    /// Whether `key` currently has any version recorded.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.store.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(n: u64) -> Timestamp {
        Timestamp(n)
    }

    #[test]
    fn get_on_empty_store_is_none() {
        let store = VersionedKVStore::new();
        assert!(store.get(b"k").is_none());
    }

    #[test]
    fn put_then_get_returns_head() {
        let mut store = VersionedKVStore::new();
        store.put(b"k".to_vec(), b"v1".to_vec(), ts(1));
        store.put(b"k".to_vec(), b"v2".to_vec(), ts(2));
        let (head_ts, head_val) = store.get(b"k").unwrap();
        assert_eq!(head_ts, ts(2));
        assert_eq!(head_val, b"v2");
    }

    #[test]
    fn put_out_of_order_still_sorts_descending() {
        let mut store = VersionedKVStore::new();
        store.put(b"k".to_vec(), b"v3".to_vec(), ts(3));
        store.put(b"k".to_vec(), b"v1".to_vec(), ts(1));
        store.put(b"k".to_vec(), b"v2".to_vec(), ts(2));

        assert_eq!(store.get_as_of(b"k", ts(3)), Some(&b"v3".to_vec()));
        assert_eq!(store.get_as_of(b"k", ts(2)), Some(&b"v2".to_vec()));
        assert_eq!(store.get_as_of(b"k", ts(1)), Some(&b"v1".to_vec()));
        assert_eq!(store.get_as_of(b"k", ts(0)), None);
    }

    #[test]
    fn remove_pops_head_only() {
        let mut store = VersionedKVStore::new();
        store.put(b"k".to_vec(), b"v1".to_vec(), ts(1));
        store.put(b"k".to_vec(), b"v2".to_vec(), ts(2));

        let (removed_ts, removed_val) = store.remove(b"k").unwrap();
        assert_eq!(removed_ts, ts(2));
        assert_eq!(removed_val, b"v2");

        let (head_ts, head_val) = store.get(b"k").unwrap();
        assert_eq!(head_ts, ts(1));
        assert_eq!(head_val, b"v1");
    }

    #[test]
    fn remove_last_version_erases_key() {
        let mut store = VersionedKVStore::new();
        store.put(b"k".to_vec(), b"v1".to_vec(), ts(1));
        store.remove(b"k").unwrap();

        assert!(!store.contains_key(b"k"));
        assert!(store.get(b"k").is_none());
        assert!(store.remove(b"k").is_none());
    }

    #[test]
    fn as_of_future_timestamp_returns_head() {
        let mut store = VersionedKVStore::new();
        store.put(b"k".to_vec(), b"v1".to_vec(), ts(5));
        assert_eq!(store.get_as_of(b"k", ts(100)), Some(&b"v1".to_vec()));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// For any sequence of puts on one key, however the
            /// timestamps are ordered, the per-key version list ends up
            /// sorted strictly descending and `get` reports the
            /// maximum-timestamp entry.
            #[test]
            fn puts_in_any_order_leave_versions_sorted_descending(
                timestamps in prop::collection::hash_set(1u64..200, 1..12),
            ) {
                let mut store = VersionedKVStore::new();
                let mut timestamps: Vec<u64> = timestamps.into_iter().collect();
                for &t in &timestamps {
                    let value = format!("v{t}").into_bytes();
                    store.put(b"k".to_vec(), value, ts(t));
                }

                timestamps.sort_unstable();
                let max_ts = *timestamps.last().unwrap();
                let (head_ts, head_val) = store.get(b"k").unwrap();
                prop_assert_eq!(head_ts, ts(max_ts));
                prop_assert_eq!(head_val, &format!("v{max_ts}").into_bytes());

                for &t in &timestamps {
                    let expected = format!("v{t}").into_bytes();
                    prop_assert_eq!(store.get_as_of(b"k", ts(t)), Some(&expected));
                }
                prop_assert_eq!(store.get_as_of(b"k", ts(0)), None);
            }
        }
    }
}
