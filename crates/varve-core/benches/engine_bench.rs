//! # Engine Benchmarks
//!
//! Performance benchmarks for varve-core transactions and queries.
//!
//! Run with: `cargo bench -p varve-core`

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use varve_core::schema::Cardinality;
use varve_core::transact::{AttributeDef, EntityMap, EntityRef, TxOp, TxValue};
use varve_core::{Database, Query, Term, Value, ValueType};

/// Database with a person schema and `size` entities.
fn create_people_db(size: usize) -> Database {
    let mut db = Database::in_memory();
    db.transact(vec![
        AttributeDef::new("person/name", ValueType::String, Cardinality::One).build(),
        AttributeDef::new("person/code", ValueType::Int, Cardinality::One)
            .unique_identity()
            .build(),
        AttributeDef::new("person/group", ValueType::Int, Cardinality::One).build(),
    ])
    .expect("schema");

    for i in 0..size {
        db.transact(vec![TxOp::Entity(
            EntityMap::new()
                .set(
                    "person/name",
                    TxValue::Value(Value::string(format!("person-{}", i))),
                )
                .set("person/code", TxValue::Value(Value::Int(i as i64)))
                .set(
                    "person/group",
                    TxValue::Value(Value::Int((i % 10) as i64)),
                ),
        )])
        .expect("seed");
    }
    db
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_transact(c: &mut Criterion) {
    let mut group = c.benchmark_group("transact");

    for size in [100usize, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| black_box(create_people_db(size)));
        });
    }

    group.finish();
}

fn bench_upsert(c: &mut Criterion) {
    let mut db = create_people_db(1000);

    c.bench_function("upsert_existing", |b| {
        b.iter(|| {
            let report = db
                .transact(vec![TxOp::Entity(
                    EntityMap::new()
                        .set("person/name", TxValue::Value(Value::string("renamed")))
                        .set("person/code", TxValue::Value(Value::Int(500))),
                )])
                .expect("upsert");
            black_box(report)
        });
    });
}

fn bench_query_by_value(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_by_value");

    for size in [100usize, 1000, 10000].iter() {
        let db = create_people_db(*size);
        let q = Query::find_scalar("e").pattern(
            Term::var("e"),
            Term::ident("person/code"),
            Term::lit(Value::Int((size / 2) as i64)),
        );
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(db.query(&q, &[]).expect("query")));
        });
    }

    group.finish();
}

fn bench_query_join(c: &mut Criterion) {
    let db = create_people_db(1000);
    let q = Query::find_rel(&["name"])
        .pattern(
            Term::var("e"),
            Term::ident("person/group"),
            Term::lit(Value::Int(3)),
        )
        .pattern(
            Term::var("e"),
            Term::ident("person/name"),
            Term::var("name"),
        );

    c.bench_function("query_join_group", |b| {
        b.iter(|| black_box(db.query(&q, &[]).expect("query")));
    });
}

fn bench_snapshot_clone(c: &mut Criterion) {
    let db = create_people_db(1000);

    c.bench_function("snapshot_acquire", |b| {
        b.iter(|| black_box(db.current_snapshot()));
    });
}

criterion_group!(
    benches,
    bench_transact,
    bench_upsert,
    bench_query_by_value,
    bench_query_join,
    bench_snapshot_clone
);
criterion_main!(benches);
