/// Route `key` to one of `n_shards` shards.
///
/// `h` starts at zero and folds in each byte as `(h << 1) ^ byte`; the
/// shard is `h % n_shards`. This is not a strong hash, it is the exact
/// routing function every client must agree on, byte for byte, or two
/// clients will disagree about which shard owns a key.
pub fn route(key: &[u8], n_shards: usize) -> usize {
    assert!(n_shards > 0, "route: n_shards must be positive");
    let mut h: u64 = 0;
    for &b in key {
        h = (h << 1) ^ (b as u64);
    }
    (h % n_shards as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_into_range() {
        for key in [b"a".as_slice(), b"hello world", b"", b"shard-routing-key"] {
            let shard = route(key, 4);
            assert!(shard < 4);
        }
    }

    #[test]
    fn is_deterministic() {
        assert_eq!(route(b"k1", 8), route(b"k1", 8));
    }

    #[test]
    fn empty_key_routes_to_shard_zero() {
        assert_eq!(route(b"", 16), 0);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// `route` always lands inside `0..n_shards` and is a pure
            /// function of its inputs — both coordinators and shards
            /// depend on every caller agreeing on this without
            /// exchanging any state.
            #[test]
            fn route_is_in_range_and_deterministic(
                key in prop::collection::vec(any::<u8>(), 0..32),
                n_shards in 1usize..64,
            ) {
                let first = route(&key, n_shards);
                let second = route(&key, n_shards);
                prop_assert!(first < n_shards);
                prop_assert_eq!(first, second);
            }
        }
    }
}
