// Snapshot tests: lock slot rendering to detect unintended structural changes.
//
// Uses the library API (parse_expr → compile) and snapshots the Display
// output of individual slots and signatures with inline `insta` snapshots.
//
// Run `cargo insta review` after intentional output changes to update baselines.

use mrfc::elaborate::parse_expr;
use mrfc::{compile, Form, Template};
use std::path::{Path, PathBuf};

fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .to_path_buf()
}

fn compile_demo(name: &str, template: Template) -> Form {
    let path = project_root().join("demos").join(name);
    let source = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("failed to read {}: {}", path.display(), e));
    let round = parse_expr(&source).unwrap();
    compile(&round, template).unwrap()
}

#[test]
fn map_reduce_slots() {
    let form = compile_demo("sum.rir", Template::MapReduce);
    insta::assert_snapshot!(
        form.type_signature(),
        @"(<int32@SERVER,{int32}@CLIENTS> -> <int32@SERVER,<>@SERVER>)"
    );
    let mr = form.as_map_reduce().unwrap();
    insta::assert_snapshot!(mr.prepare(), @"(state: int32 -> state)");
    insta::assert_snapshot!(mr.zero(), @"( -> 0)");
    insta::assert_snapshot!(mr.accumulate(), @"add<int32>");
    insta::assert_snapshot!(mr.report(), @"(a: int32 -> a)");
    insta::assert_snapshot!(mr.secure_parameter(2).unwrap(), @"( -> <>)");
    insta::assert_snapshot!(mr.work().signature(), @"(<int32,int32> -> <int32,<<>,<>,<>>>)");
}

#[test]
fn distribute_aggregate_slots() {
    let form = compile_demo("sum.rir", Template::DistributeAggregate);
    let da = form.as_distribute_aggregate().unwrap();
    insta::assert_snapshot!(
        da.server_prepare(),
        @"(server_state: int32@SERVER -> let value_at_server = federated_value_at_server(<>) in <<server_state>,<server_state,value_at_server>>)"
    );
    insta::assert_snapshot!(
        da.server_to_client_broadcast(),
        @"(broadcast_input: <int32@SERVER> -> let c = federated_broadcast(broadcast_input[0]) in <c>)"
    );
}

#[test]
fn broadcast_slots() {
    let form = compile_demo("broadcast.rir", Template::Broadcast);
    insta::assert_snapshot!(
        form.type_signature(),
        @"(<int32@SERVER,{int32}@CLIENTS> -> {int32}@CLIENTS)"
    );
    let bf = form.as_broadcast().unwrap();
    insta::assert_snapshot!(bf.compute_server_context(), @"(state: int32 -> state)");
    insta::assert_snapshot!(bf.client_processing().signature(), @"(<int32,int32> -> int32)");
}

#[test]
fn secure_only_update() {
    let round = parse_expr(
        "(p: <int32@SERVER,{int32}@CLIENTS> ->
           let total = federated_secure_sum_bitwidth(<p[1], 8>)
           in <p[0], total>)",
    )
    .unwrap();
    let form = compile(&round, Template::MapReduce).unwrap();
    let mr = form.as_map_reduce().unwrap();
    insta::assert_snapshot!(
        mr.update(),
        @"(update: <int32,<<>,<int32,<>,<>>>> -> <update[0],update[1][1][0]>)"
    );
    insta::assert_snapshot!(mr.secure_parameter(0).unwrap(), @"( -> 8)");
}
