//! Converter cache and conversion throughput benchmarks
//!
//! Run with: cargo bench -p ferry

use criterion::{Criterion, criterion_group, criterion_main};
use ferry::{MarshalConfig, Marshaller};
use ferry_reflect::{HostValue, StructValue, TypeBuilder, TypeSig, TypeUniverse};
use ferry_script::{Realm, Value};
use std::hint::black_box;
use std::sync::Arc;

fn universe() -> Arc<TypeUniverse> {
    let universe = TypeUniverse::new();
    universe.register(
        TypeBuilder::struct_type("Bench.Point")
            .field("X", TypeSig::double())
            .field("Y", TypeSig::double())
            .field("Label", TypeSig::string())
            .build(),
    );
    Arc::new(universe)
}

/// Cached lookups against a warm cache
fn bench_converter_cache_hit(c: &mut Criterion) {
    let m = Marshaller::new(universe(), MarshalConfig::default());
    let sig = TypeSig::parse("List<Bench.Point>").unwrap();
    m.get_converter(&sig).unwrap();

    c.bench_function("converter_cache_hit", |b| {
        b.iter(|| black_box(m.get_converter(black_box(&sig)).unwrap()));
    });
}

/// First request for a signature on a fresh marshaller
fn bench_converter_first_build(c: &mut Criterion) {
    let universe = universe();
    let sig = TypeSig::parse("List<Bench.Point>").unwrap();

    c.bench_function("converter_first_build", |b| {
        b.iter(|| {
            let m = Marshaller::new(universe.clone(), MarshalConfig::default());
            black_box(m.get_converter(black_box(&sig)).unwrap())
        });
    });
}

fn bench_struct_round_trip(c: &mut Criterion) {
    let realm = Realm::new();
    let m = Marshaller::new(universe(), MarshalConfig::default());
    let sig = TypeSig::named("Bench.Point");
    let point = HostValue::Struct(
        StructValue::new("Bench.Point")
            .with("X", HostValue::F64(1.0))
            .with("Y", HostValue::F64(2.0))
            .with("Label", HostValue::string("origin")),
    );

    c.bench_function("struct_round_trip", |b| {
        b.iter(|| {
            let script = m.to_script(&realm, &sig, black_box(&point)).unwrap();
            black_box(m.to_host(&realm, &sig, &script).unwrap())
        });
    });
}

fn bench_int_array_to_host(c: &mut Criterion) {
    let realm = Realm::new();
    let m = Marshaller::new(universe(), MarshalConfig::default());
    let sig = TypeSig::parse("int[]").unwrap();
    let array = Value::Object(realm.create_array((0..256i32).map(Value::from).collect()));

    c.bench_function("int_array_256_to_host", |b| {
        b.iter(|| black_box(m.to_host(&realm, &sig, black_box(&array)).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_converter_cache_hit,
    bench_converter_first_build,
    bench_struct_round_trip,
    bench_int_array_to_host
);
criterion_main!(benches);
