//! Spec hashing: deterministic fingerprint of a contract's identity
//!
//! The fingerprint covers exactly `(name, version, invariants, error_codes)`.
//! Every field is length-prefixed before hashing so that no two distinct
//! tuples share a serialization (`["ab", "c"]` vs `["a", "bc"]`). Both lists
//! are hashed in declaration order.

use sha2::{Digest, Sha256};

use crate::Contract;

/// Number of hex characters in a short spec hash
pub const SPEC_HASH_LEN: usize = 16;

const DOMAIN_TAG: &str = "vouch-spec/1";

/// Short fingerprint: the first 16 lowercase hex chars of the SHA-256 digest
pub fn hash_spec(contract: &Contract) -> String {
    let mut digest = full_spec_digest(contract);
    digest.truncate(SPEC_HASH_LEN);
    digest
}

/// Full 64-char SHA-256 hex digest of the canonical form
pub fn full_spec_digest(contract: &Contract) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_bytes(contract));
    format!("{:x}", hasher.finalize())
}

/// Whether the contract carries a precomputed hash that no longer matches
pub fn is_stale(contract: &Contract) -> bool {
    contract
        .spec_hash
        .as_deref()
        .is_some_and(|stored| stored != hash_spec(contract))
}

fn canonical_bytes(contract: &Contract) -> Vec<u8> {
    let mut out = Vec::new();
    write_str(&mut out, DOMAIN_TAG);
    write_str(&mut out, &contract.name);
    write_str(&mut out, &contract.version);
    write_list(&mut out, &contract.invariants);
    write_list(&mut out, &contract.error_codes);
    out
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u64).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn write_list(out: &mut Vec<u8>, items: &[String]) {
    out.extend_from_slice(&(items.len() as u64).to_be_bytes());
    for item in items {
        write_str(out, item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract() -> Contract {
        Contract {
            name: "slugify".into(),
            version: "1.0.0".into(),
            intent: "Make slugs".into(),
            input_schema: Some("input.json".into()),
            output_schema: Some("slug.json".into()),
            invariants: vec!["len(output) <= 80".into(), "not output.ends_with('-')".into()],
            error_codes: vec!["EMPTY".into(), "TOO_LONG".into()],
            spec_hash: None,
        }
    }

    #[test]
    fn test_hash_format() {
        let hash = hash_spec(&contract());
        assert_eq!(hash.len(), SPEC_HASH_LEN);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(full_spec_digest(&contract()).len(), 64);
        assert!(full_spec_digest(&contract()).starts_with(&hash));
    }

    #[test]
    fn test_determinism_100_iterations() {
        let first = hash_spec(&contract());
        for i in 0..100 {
            assert_eq!(hash_spec(&contract()), first, "Non-determinism at iteration {}", i);
        }
    }

    #[test]
    fn test_excluded_fields_do_not_affect_hash() {
        let base = hash_spec(&contract());
        let mut c = contract();
        c.intent = "Something else entirely".into();
        c.input_schema = None;
        c.output_schema = Some("other.json".into());
        c.spec_hash = Some("0000000000000000".into());
        assert_eq!(hash_spec(&c), base);
    }

    #[test]
    fn test_each_hashed_field_matters() {
        let base = hash_spec(&contract());
        let mut c = contract();
        c.name = "slugify2".into();
        assert_ne!(hash_spec(&c), base);
        let mut c = contract();
        c.version = "1.0.1".into();
        assert_ne!(hash_spec(&c), base);
        let mut c = contract();
        c.invariants.pop();
        assert_ne!(hash_spec(&c), base);
        let mut c = contract();
        c.error_codes.push("NEW".into());
        assert_ne!(hash_spec(&c), base);
    }

    #[test]
    fn test_order_sensitive() {
        let base = hash_spec(&contract());
        let mut c = contract();
        c.error_codes.reverse();
        assert_ne!(hash_spec(&c), base);
        let mut c = contract();
        c.invariants.reverse();
        assert_ne!(hash_spec(&c), base);
    }

    #[test]
    fn test_length_prefix_prevents_collisions() {
        let mut a = contract();
        a.error_codes = vec!["ab".into(), "c".into()];
        let mut b = contract();
        b.error_codes = vec!["a".into(), "bc".into()];
        assert_ne!(hash_spec(&a), hash_spec(&b));

        let mut a = contract();
        a.invariants = vec!["x".into()];
        a.error_codes = vec![];
        let mut b = contract();
        b.invariants = vec![];
        b.error_codes = vec!["x".into()];
        assert_ne!(hash_spec(&a), hash_spec(&b));
    }

    #[test]
    fn test_staleness() {
        let mut c = contract();
        assert!(!is_stale(&c));
        c.spec_hash = Some(hash_spec(&c));
        assert!(!is_stale(&c));
        c.version = "2.0.0".into();
        assert!(is_stale(&c));
    }
}
