//! # Property-Based Tests
//!
//! Verification tests using proptest.
//!
//! These tests ensure the determinism and immutability invariants of the
//! fact store and transaction processor.

use proptest::collection::vec;
use proptest::prelude::*;
use varve_core::schema::Cardinality;
use varve_core::transact::{AttributeDef, EntityMap, EntityRef, TxOp, TxValue};
use varve_core::{Database, Query, Term, Value, ValueType};

/// Fixed instant so fact logs are byte-comparable across runs.
fn instant() -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp")
}

/// Database with a small person schema installed.
fn fresh_db() -> Database {
    let mut db = Database::in_memory();
    db.transact_at(
        vec![
            AttributeDef::new("person/name", ValueType::String, Cardinality::One).build(),
            AttributeDef::new("person/code", ValueType::Int, Cardinality::One)
                .unique_identity()
                .build(),
            AttributeDef::new("person/tags", ValueType::String, Cardinality::Many).build(),
        ],
        instant(),
    )
    .expect("schema install");
    db
}

proptest! {
    /// Identical operation sequences produce identical fact logs.
    #[test]
    fn determinism_identical_input_produces_identical_log(
        names in vec("[a-z]{1,8}", 1..20)
    ) {
        let build = || {
            let mut db = fresh_db();
            for (i, name) in names.iter().enumerate() {
                db.transact_at(
                    vec![TxOp::assert(
                        EntityRef::tempid(format!("p{}", i)),
                        "person/name",
                        Value::string(name.clone()),
                    )],
                    instant(),
                )
                .expect("transact");
            }
            db.export_log()
        };

        prop_assert_eq!(build(), build());
    }

    /// For a cardinality-one attribute, at most one live value exists in
    /// any snapshot, no matter how many times it was reasserted.
    #[test]
    fn cardinality_one_exclusivity(names in vec("[a-z]{1,8}", 1..15)) {
        let mut db = fresh_db();
        let report = db
            .transact_at(
                vec![TxOp::assert(
                    EntityRef::tempid("p"),
                    "person/name",
                    Value::string("seed"),
                )],
                instant(),
            )
            .expect("seed");
        let id = report.tempids["p"];

        for name in &names {
            db.transact_at(
                vec![TxOp::assert(
                    EntityRef::id(id),
                    "person/name",
                    Value::string(name.clone()),
                )],
                instant(),
            )
            .expect("reassert");
        }

        let snap = db.current_snapshot();
        let attr = snap
            .attribute(&varve_core::Ident::new("person/name"))
            .expect("schema")
            .id;
        prop_assert!(snap.live_values(id, attr).len() <= 1);
    }

    /// Submitting the identical entity map twice produces zero new facts
    /// on the second submission and resolves to the same entity.
    #[test]
    fn upsert_idempotence(code in 0i64..10_000, name in "[a-z]{1,8}") {
        let mut db = fresh_db();
        let map = EntityMap::named("x")
            .set("person/name", TxValue::Value(Value::string(name)))
            .set("person/code", TxValue::Value(Value::Int(code)));

        let first = db
            .transact_at(vec![TxOp::Entity(map.clone())], instant())
            .expect("first");
        let second = db
            .transact_at(vec![TxOp::Entity(map)], instant())
            .expect("second");

        prop_assert!(second.facts.is_empty());
        prop_assert_eq!(second.tx, None);
        prop_assert_eq!(first.tempids["x"], second.tempids["x"]);
    }

    /// A snapshot's solution set never changes, regardless of
    /// transactions committed after it was obtained.
    #[test]
    fn snapshot_immutability(
        before in vec("[a-z]{1,8}", 1..10),
        after in vec("[a-z]{1,8}", 1..10)
    ) {
        let mut db = fresh_db();
        for (i, name) in before.iter().enumerate() {
            db.transact_at(
                vec![TxOp::assert(
                    EntityRef::tempid(format!("b{}", i)),
                    "person/name",
                    Value::string(name.clone()),
                )],
                instant(),
            )
            .expect("before");
        }

        let frozen = db.current_snapshot();
        let query = Query::find_rel(&["e", "name"]).pattern(
            Term::var("e"),
            Term::ident("person/name"),
            Term::var("name"),
        );
        let observed = varve_core::execute(&frozen, &query, &[]).expect("first evaluation");

        for (i, name) in after.iter().enumerate() {
            db.transact_at(
                vec![TxOp::assert(
                    EntityRef::tempid(format!("a{}", i)),
                    "person/name",
                    Value::string(name.clone()),
                )],
                instant(),
            )
            .expect("after");
        }

        let reobserved = varve_core::execute(&frozen, &query, &[]).expect("second evaluation");
        prop_assert_eq!(observed, reobserved);
    }

    /// A tempid used many times within one transaction resolves to
    /// exactly one entity, and every produced fact references it.
    #[test]
    fn tempid_resolution_is_consistent(tags in vec("[a-z]{1,6}", 1..10)) {
        let mut db = fresh_db();
        let distinct: std::collections::BTreeSet<String> = tags.iter().cloned().collect();

        let mut ops = vec![TxOp::assert(
            EntityRef::tempid("p"),
            "person/name",
            Value::string("x"),
        )];
        for tag in &tags {
            ops.push(TxOp::assert(
                EntityRef::tempid("p"),
                "person/tags",
                Value::string(tag.clone()),
            ));
        }

        let report = db.transact_at(ops, instant()).expect("transact");
        let id = report.tempids["p"];
        let data = report.data_facts();
        prop_assert!(data.iter().all(|f| f.entity == id));
        // One name plus one fact per distinct tag (duplicates elide).
        prop_assert_eq!(data.len(), 1 + distinct.len());
    }

    /// The unique-identity upsert never creates a second entity for the
    /// same key, no matter how the names vary.
    #[test]
    fn upsert_never_duplicates_entities(
        names in vec("[a-z]{1,8}", 2..8),
        code in 0i64..100
    ) {
        let mut db = fresh_db();
        let mut resolved = std::collections::BTreeSet::new();

        for (i, name) in names.iter().enumerate() {
            let report = db
                .transact_at(
                    vec![TxOp::Entity(
                        EntityMap::named(format!("t{}", i))
                            .set("person/name", TxValue::Value(Value::string(name.clone())))
                            .set("person/code", TxValue::Value(Value::Int(code))),
                    )],
                    instant(),
                )
                .expect("upsert");
            resolved.insert(report.tempids[&format!("t{}", i)]);
        }

        prop_assert_eq!(resolved.len(), 1);
    }
}
