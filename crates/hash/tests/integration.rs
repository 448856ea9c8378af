//! Integration tests for hash crate

#[cfg(test)]
mod tests {
    use bulwark_hash::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_many_names_map_to_distinct_keys() {
        let keys: HashSet<_> = (0..2000)
            .map(|i| derive_key(KeySpace::Resource, &format!("worker_pool_{i}")).unwrap())
            .collect();
        assert_eq!(keys.len(), 2000);
    }

    #[test]
    fn test_digest_hex_length() {
        let digest = NameDigest::of(KeySpace::Window, "payments");
        assert_eq!(digest.to_hex().len(), 64);
        assert_eq!(digest.ipc_key(), derive_key(KeySpace::Window, "payments").unwrap());
    }

    proptest! {
        #[test]
        fn prop_key_is_stable_and_nonzero(name in "[a-z0-9_]{1,64}") {
            let first = derive_key(KeySpace::Window, &name).unwrap();
            let second = derive_key(KeySpace::Window, &name).unwrap();
            prop_assert_eq!(first, second);
            prop_assert_ne!(first.as_raw(), 0);
        }
    }
}
