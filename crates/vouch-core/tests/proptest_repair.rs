//! Property tests for the repair catalog: idempotence and totality.

use proptest::prelude::*;
use serde_json::{json, Value};
use vouch_core::{CompiledSchema, Repairer, Violation};

fn violations(schema: &CompiledSchema, candidate: &Value) -> Vec<Violation> {
    schema
        .check(candidate)
        .errors
        .iter()
        .map(|e| e.to_violation())
        .collect()
}

fn slug_schema() -> CompiledSchema {
    CompiledSchema::compile(&json!({
        "type": "string",
        "pattern": "^[a-z0-9]+(-[a-z0-9]+)*$",
        "maxLength": 24
    }))
    .unwrap()
}

fn record_schema() -> CompiledSchema {
    CompiledSchema::compile(&json!({
        "type": "object",
        "properties": {
            "title": {"type": "string", "maxLength": 10},
            "score": {"type": "integer", "minimum": 0, "maximum": 100},
            "tags": {"type": "array", "maxItems": 3, "items": {"type": "string"}}
        },
        "additionalProperties": false
    }))
    .unwrap()
}

proptest! {
    #[test]
    fn string_repair_is_idempotent(raw in "[ -~]{0,48}") {
        let schema = slug_schema();
        let repairer = Repairer::default();
        let candidate = json!(raw);
        let v = violations(&schema, &candidate);
        let once = repairer.repair(&candidate, &v, &schema);
        let twice = repairer.repair(&once, &v, &schema);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn object_repair_is_idempotent(
        title in "[a-zA-Z ]{0,20}",
        score in -500i64..500,
        tags in prop::collection::vec("[a-z]{1,5}", 0..7),
        extra in prop::option::of("[a-z]{1,6}"),
    ) {
        let schema = record_schema();
        let repairer = Repairer::default();
        let mut candidate = json!({"title": title, "score": score, "tags": tags});
        if let Some(key) = extra {
            candidate[format!("x_{}", key)] = json!(true);
        }
        let v = violations(&schema, &candidate);
        let once = repairer.repair(&candidate, &v, &schema);
        let twice = repairer.repair(&once, &v, &schema);
        prop_assert_eq!(&once, &twice);
        prop_assert!(schema.check(&once).pass, "repaired record still fails: {}", once);
    }

    #[test]
    fn repair_without_violations_is_identity(raw in ".{0,32}") {
        let schema = slug_schema();
        let candidate = json!(raw);
        prop_assert_eq!(Repairer::default().repair(&candidate, &[], &schema), candidate);
    }
}
