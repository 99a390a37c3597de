//! Property tests for spec hashing.

use proptest::prelude::*;
use vouch_core::{full_spec_digest, hash_spec, Contract};

fn contract_strategy() -> impl Strategy<Value = Contract> {
    (
        "[a-z_]{1,16}",
        "[0-9]{1,2}\\.[0-9]{1,2}\\.[0-9]{1,2}",
        ".{0,40}",
        prop::collection::vec(".{0,30}", 0..5),
        prop::collection::vec("[A-Z_]{1,12}", 0..5),
    )
        .prop_map(|(name, version, intent, invariants, error_codes)| Contract {
            name,
            version,
            intent,
            input_schema: None,
            output_schema: None,
            invariants,
            error_codes,
            spec_hash: None,
        })
}

proptest! {
    #[test]
    fn hash_is_deterministic(contract in contract_strategy()) {
        let first = hash_spec(&contract);
        prop_assert_eq!(first.len(), 16);
        prop_assert_eq!(hash_spec(&contract.clone()), first.clone());
        prop_assert!(full_spec_digest(&contract).starts_with(&first));
    }

    #[test]
    fn hash_ignores_unhashed_fields(contract in contract_strategy(), intent in ".{0,40}", locator in "[a-z]{1,10}\\.json") {
        let mut other = contract.clone();
        other.intent = intent;
        other.output_schema = Some(locator.clone());
        other.input_schema = Some(locator);
        other.spec_hash = Some("ffffffffffffffff".into());
        prop_assert_eq!(hash_spec(&other), hash_spec(&contract));
    }

    #[test]
    fn hash_changes_with_version(contract in contract_strategy(), suffix in "[a-z]{1,4}") {
        let mut other = contract.clone();
        other.version = format!("{}-{}", contract.version, suffix);
        prop_assert_ne!(hash_spec(&other), hash_spec(&contract));
    }
}
