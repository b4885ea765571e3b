//! Tests for the privacy engine

#[cfg(test)]
mod tests {
    use super::super::constants::*;
    use super::super::crypto::*;
    use super::super::engine::*;
    use crate::address::{
        AddressType, BdAddr, RandomAddressKind, RANDOM_ADDR_KIND_MASK, RESOLVABLE_ADDR_BITS,
        STATIC_RANDOM_ADDR_BITS,
    };
    use crate::error::{ErrorKind, LlError};

    fn irk(seed: u8) -> [u8; 16] {
        let mut key = [0u8; 16];
        for (i, b) in key.iter_mut().enumerate() {
            *b = seed.wrapping_add(i as u8);
        }
        key
    }

    fn irk_from_hex(s: &str) -> [u8; 16] {
        let mut key = [0u8; 16];
        key.copy_from_slice(&hex::decode(s).unwrap());
        key
    }

    fn identity(seed: u8) -> BdAddr {
        BdAddr::new([seed, 0x22, 0x33, 0x44, 0x55, 0x06])
    }

    #[test]
    fn address_hash_is_deterministic() {
        let key = irk(0x10);
        let prand = [0x11, 0x22, 0xC3];
        assert_eq!(ah(&key, prand), ah(&key, prand));
        assert_ne!(ah(&key, prand), ah(&irk(0x20), prand));
        assert_ne!(ah(&key, prand), ah(&key, [0x12, 0x22, 0xC3]));
    }

    #[test]
    fn rpa_round_trip_resolves() {
        let key = irk_from_hex("ec0234a357c8ad05341010a60a397d9b");
        let rpa = generate_rpa(&key);
        assert!(verify_rpa(&key, &rpa));
        assert!(!verify_rpa(&irk(0x43), &rpa));
    }

    #[test]
    fn generated_addresses_carry_their_kind_bits() {
        let rpa = generate_rpa(&irk(1));
        assert_eq!(rpa.bytes[5] & RANDOM_ADDR_KIND_MASK, RESOLVABLE_ADDR_BITS);
        assert_eq!(rpa.random_kind(), RandomAddressKind::ResolvablePrivate);

        let nrpa = generate_nrpa();
        assert_eq!(nrpa.bytes[5] & RANDOM_ADDR_KIND_MASK, 0x00);
        assert_eq!(nrpa.random_kind(), RandomAddressKind::NonResolvablePrivate);

        let fixed = generate_static_random();
        assert_eq!(fixed.bytes[5] & RANDOM_ADDR_KIND_MASK, STATIC_RANDOM_ADDR_BITS);
        assert!(fixed.is_valid_static_random());
    }

    #[test]
    fn classification_never_confuses_identities_with_private_kinds() {
        let public = BdAddr::new([1, 2, 3, 4, 5, 6]);
        assert!(!is_rpa(AddressType::Public, &public));
        assert!(!is_nrpa(AddressType::Public, &public));
        assert!(is_identity_address(AddressType::Public, &public));

        let fixed = generate_static_random();
        assert!(!is_rpa(AddressType::Random, &fixed));
        assert!(!is_nrpa(AddressType::Random, &fixed));
        assert!(is_identity_address(AddressType::Random, &fixed));

        let rpa = generate_rpa(&irk(9));
        assert!(is_rpa(AddressType::Random, &rpa));
        assert!(!is_identity_address(AddressType::Random, &rpa));

        let nrpa = generate_nrpa();
        assert!(is_nrpa(AddressType::Random, &nrpa));
        assert!(!is_identity_address(AddressType::Random, &nrpa));
    }

    #[test]
    fn zero_irk_is_the_no_privacy_sentinel() {
        assert!(is_zero_irk(&[0u8; 16]));
        assert!(!is_zero_irk(&irk(1)));
    }

    #[test]
    fn add_find_remove_peers() {
        let mut engine = PrivacyEngine::new();
        let index = engine
            .add_peer(AddressType::Public, identity(1), irk(1))
            .unwrap();
        assert!(index > LOCAL_RL_INDEX);
        assert_eq!(engine.find_peer(AddressType::Public, identity(1)), Some(index));
        assert_eq!(engine.find_peer(AddressType::Random, identity(1)), None);

        let (removed_index, removed) =
            engine.remove_peer(AddressType::Public, identity(1)).unwrap();
        assert_eq!(removed_index, index);
        assert_eq!(removed.id_addr, identity(1));
        assert_eq!(engine.find_peer(AddressType::Public, identity(1)), None);
        assert_eq!(
            engine.remove_peer(AddressType::Public, identity(1)),
            Err(LlError::NotFound)
        );
    }

    #[test]
    fn duplicate_add_updates_in_place() {
        let mut engine = PrivacyEngine::new();
        let first = engine
            .add_peer(AddressType::Public, identity(1), irk(1))
            .unwrap();
        let used = engine.used();
        let second = engine
            .add_peer(AddressType::Public, identity(1), irk(2))
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(engine.used(), used);
        assert_eq!(engine.entry(first).unwrap().irk, irk(2));
    }

    #[test]
    fn capacity_reserves_the_local_slot() {
        let mut engine = PrivacyEngine::new();
        for seed in 0..(RESOLVING_LIST_SIZE - 1) as u8 {
            engine
                .add_peer(AddressType::Public, identity(seed), irk(seed))
                .unwrap();
        }
        assert_eq!(engine.used(), RESOLVING_LIST_SIZE);
        let err = engine
            .add_peer(AddressType::Public, identity(0xEE), irk(3))
            .unwrap_err();
        assert_eq!(err, LlError::ResolvingListFull);
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    }

    #[test]
    fn clear_keeps_the_local_identity() {
        let mut engine = PrivacyEngine::new();
        engine.set_local_identity(AddressType::Public, identity(0x77), irk(0x77));
        engine
            .add_peer(AddressType::Public, identity(1), irk(1))
            .unwrap();
        engine.clear_peers();
        assert_eq!(engine.used(), 1);
        assert_eq!(engine.local().id_addr, identity(0x77));
    }

    #[test]
    fn resolution_requires_enable() {
        let mut engine = PrivacyEngine::new();
        engine
            .add_peer(AddressType::Public, identity(1), irk(1))
            .unwrap();
        let rpa = generate_rpa(&irk(1));
        assert_eq!(engine.resolve(&rpa), None);

        engine.set_resolution_enabled(true);
        assert!(engine.resolve(&rpa).is_some());
    }

    #[test]
    fn rotation_reports_previous_and_current() {
        let mut engine = PrivacyEngine::new();
        engine.set_local_identity(AddressType::Public, identity(0x70), irk(0x70));
        engine.set_resolution_enabled(true);
        let with_key = engine
            .add_peer(AddressType::Public, identity(1), irk(1))
            .unwrap();
        let keyless = engine
            .add_peer(AddressType::Public, identity(2), [0u8; 16])
            .unwrap();

        let first = engine.read_peer_rpa(AddressType::Public, identity(1)).unwrap();
        let rotations = engine.rotate();

        // Local slot and the keyed peer rotate; the zero-IRK peer does not.
        assert!(rotations.iter().any(|r| r.index == LOCAL_RL_INDEX));
        let peer_rotation = rotations
            .iter()
            .find(|r| r.index == with_key)
            .expect("keyed peer rotates");
        assert_eq!(peer_rotation.previous, first);
        assert_ne!(peer_rotation.current, first);
        assert!(rotations.iter().all(|r| r.index != keyless));
        assert_eq!(
            engine.read_peer_rpa(AddressType::Public, identity(2)),
            Err(LlError::NotFound)
        );
    }

    #[test]
    fn rotation_is_suspended_while_disabled() {
        let mut engine = PrivacyEngine::new();
        engine
            .add_peer(AddressType::Public, identity(1), irk(1))
            .unwrap();
        assert!(engine.rotate().is_empty());
    }

    #[test]
    fn local_slot_without_irk_takes_a_non_resolvable_address() {
        let mut engine = PrivacyEngine::new();
        engine.set_local_identity(AddressType::Public, identity(0x70), [0u8; 16]);
        engine.set_resolution_enabled(true);
        engine.rotate();
        let own = engine.read_local_rpa().unwrap();
        assert_eq!(own.random_kind(), RandomAddressKind::NonResolvablePrivate);
    }

    #[test]
    fn rpa_timeout_bounds() {
        let mut engine = PrivacyEngine::new();
        assert_eq!(engine.rpa_timeout(), RPA_TIMEOUT_DEFAULT_S);
        assert!(engine.set_rpa_timeout(RPA_TIMEOUT_MIN_S).is_ok());
        assert!(engine.set_rpa_timeout(RPA_TIMEOUT_MAX_S).is_ok());
        let err = engine.set_rpa_timeout(0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParameterRange);
        let err = engine.set_rpa_timeout(RPA_TIMEOUT_MAX_S + 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParameterRange);
    }

    #[test]
    fn peer_rpa_is_generated_on_add_while_enabled() {
        let mut engine = PrivacyEngine::new();
        engine.set_resolution_enabled(true);
        engine
            .add_peer(AddressType::Public, identity(1), irk(1))
            .unwrap();
        let rpa = engine.read_peer_rpa(AddressType::Public, identity(1)).unwrap();
        assert!(verify_rpa(&irk(1), &rpa));
    }
}
