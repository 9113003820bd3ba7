use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use mrfc::*;

// KPI-aligned benchmark scenarios.
// All scenarios compile to the map-reduce and distribute-aggregate forms.

const SUM_ROUND: &str = r#"
(p: <int32@SERVER,{int32}@CLIENTS> ->
  let
    c = federated_broadcast(p[0]),
    v = federated_map(<(x: <int32,int32> -> x[0]), federated_zip_at_clients(<p[1], c>)>),
    total = federated_aggregate(<v, 0, add<int32>, add<int32>, (a: int32 -> a)>),
    new_state = federated_apply(<add<int32>, federated_zip_at_server(<p[0], total>)>)
  in <new_state, federated_value_at_server(<>)>)
"#;

const SECURE_ROUND: &str = r#"
(p: <int32@SERVER,{int32}@CLIENTS> ->
  let
    c = federated_broadcast(p[0]),
    v = federated_map(<(x: <int32,int32> -> x[0]), federated_zip_at_clients(<p[1], c>)>),
    total = federated_aggregate(<v, 0, add<int32>, add<int32>, (a: int32 -> a)>),
    masked = federated_secure_sum_bitwidth(<v, 8>),
    new_state = federated_apply(<add<int32>, federated_zip_at_server(<p[0], total>)>)
  in <new_state, masked>)
"#;

fn scenarios() -> [(&'static str, &'static str); 2] {
    [("sum", SUM_ROUND), ("secure", SECURE_ROUND)]
}

/// Scaling generator: a chain of `n` participant-side maps feeding one
/// aggregation.
fn generate_scaling_round(n_maps: usize) -> String {
    let mut src = String::from(
        "(p: <int32@SERVER,{int32}@CLIENTS> ->\n  let\n    c = federated_broadcast(p[0]),\n    v0 = federated_map(<(x: <int32,int32> -> x[0]), federated_zip_at_clients(<p[1], c>)>),\n",
    );
    for i in 1..=n_maps {
        src.push_str(&format!(
            "    v{i} = federated_map(<add<int32>, federated_zip_at_clients(<v{}, c>)>),\n",
            i - 1
        ));
    }
    src.push_str(&format!(
        "    total = federated_aggregate(<v{n_maps}, 0, add<int32>, add<int32>, (a: int32 -> a)>)\n  in <total, federated_value_at_server(<>)>)\n"
    ));
    src
}

fn round(source: &str) -> ir::Expr {
    elaborate::parse_expr(source).expect("benchmark scenario must elaborate")
}

// KPI: parse + elaborate latency.
fn bench_kpi_elaborate_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/elaborate_latency");

    for (name, source) in scenarios() {
        group.bench_with_input(BenchmarkId::from_parameter(name), source, |b, source| {
            b.iter(|| black_box(elaborate::parse_expr(black_box(source)).is_ok()));
        });
    }

    group.finish();
}

// KPI: compile latency per template.
fn bench_kpi_compile_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/compile_latency");

    for (name, source) in scenarios() {
        let r = round(source);
        for template in [Template::MapReduce, Template::DistributeAggregate] {
            group.bench_with_input(
                BenchmarkId::new(template.name(), name),
                &r,
                |b, r| {
                    b.iter(|| black_box(compile(black_box(r), template).is_ok()));
                },
            );
        }
    }

    group.finish();
}

// KPI: synthesis latency (setup: compile).
fn bench_kpi_synthesize_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/synthesize_latency");

    for (name, source) in scenarios() {
        let r = round(source);
        group.bench_function(name, |b| {
            b.iter_batched(
                || compile(&r, Template::MapReduce).expect("benchmark scenario must compile"),
                |form| black_box(synthesize(black_box(&form)).is_ok()),
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

// KPI: compile scaling vs number of participant-side maps.
fn bench_kpi_compile_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/compile_scaling");

    for n_maps in [1_usize, 5, 10, 20, 40] {
        let r = round(&generate_scaling_round(n_maps));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}maps", n_maps)),
            &r,
            |b, r| {
                b.iter(|| black_box(compile(black_box(r), Template::MapReduce).is_ok()));
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_kpi_elaborate_latency,
    bench_kpi_compile_latency,
    bench_kpi_synthesize_latency,
    bench_kpi_compile_scaling,
);
criterion_main!(benches);
