// Round-trip tests: round → form → round.
//
// Compiles the demo rounds, rebuilds a round from each form and checks that
// the rebuilt round computes what the source round computes. Evaluation is
// the oracle; structural equality of rebuilt rounds is not expected.

use mrfc::elaborate::parse_expr;
use mrfc::eval::{evaluate_form, evaluate_round, EvalOptions, Value};
use mrfc::ir::Expr;
use mrfc::{compile, synthesize, Form, Template};
use std::path::{Path, PathBuf};

// ── Test helpers ────────────────────────────────────────────────────────────

fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .to_path_buf()
}

fn load_demo(name: &str) -> Expr {
    let path = project_root().join("demos").join(name);
    let source = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("failed to read {}: {}", path.display(), e));
    parse_expr(&source).unwrap_or_else(|d| panic!("{}: {:?}", path.display(), d))
}

fn ints(vs: &[i64]) -> Vec<Value> {
    vs.iter().copied().map(Value::Int).collect()
}

fn run(round: &Expr, state: i64, data: &[i64]) -> Value {
    evaluate_round(round, Value::Int(state), ints(data), &EvalOptions::default()).unwrap()
}

fn run_form(form: &Form, state: i64, data: &[i64]) -> Value {
    evaluate_form(form, Value::Int(state), ints(data), &EvalOptions::default()).unwrap()
}

// ── Scenarios ───────────────────────────────────────────────────────────────

#[test]
fn sum_round_end_to_end() {
    let round = load_demo("sum.rir");
    let form = compile(&round, Template::MapReduce).unwrap();
    let expected = "<11@SERVER,<>@SERVER>";
    assert_eq!(run(&round, 5, &[1, 2, 3]).to_string(), expected);
    assert_eq!(run_form(&form, 5, &[1, 2, 3]).to_string(), expected);

    let rebuilt = synthesize(&form).unwrap();
    assert_eq!(rebuilt.ty, round.ty);
    assert_eq!(run(&rebuilt, 5, &[1, 2, 3]).to_string(), expected);
}

#[test]
fn sum_round_releasing_the_new_state() {
    let round = parse_expr(
        "(p: <int32@SERVER,{int32}@CLIENTS> ->
           let
             c = federated_broadcast(p[0]),
             v = federated_map(<(x: <int32,int32> -> x[0]), federated_zip_at_clients(<p[1], c>)>),
             total = federated_aggregate(<v, 0, add<int32>, add<int32>, (a: int32 -> a)>),
             new_state = federated_apply(<add<int32>, federated_zip_at_server(<p[0], total>)>)
           in <new_state, new_state>)",
    )
    .unwrap();
    let form = compile(&round, Template::MapReduce).unwrap();
    let mr = form.as_map_reduce().unwrap();

    // prepare is the identity on the state; update adds the report to it
    // and returns the sum twice.
    assert_eq!(mr.prepare().to_string(), "(state: int32 -> state)");
    let update = mr.update().to_string();
    assert!(update.contains("add<int32>(zip_at_server)"), "{update}");
    assert!(update.ends_with("in <new_state,new_state>)"), "{update}");

    let expected = "<11@SERVER,11@SERVER>";
    assert_eq!(run(&round, 5, &[1, 2, 3]).to_string(), expected);
    assert_eq!(run_form(&form, 5, &[1, 2, 3]).to_string(), expected);
    let rebuilt = synthesize(&form).unwrap();
    assert_eq!(run(&rebuilt, 5, &[1, 2, 3]).to_string(), expected);
}

#[test]
fn every_aggregating_template_round_trips() {
    let round = load_demo("sum.rir");
    for template in [Template::MapReduce, Template::DistributeAggregate] {
        let form = compile(&round, template).unwrap();
        assert_eq!(form.template(), template);
        let rebuilt = synthesize(&form).unwrap();
        for data in [&[][..], &[7], &[1, 2, 3, 4, 5]] {
            assert_eq!(
                run(&rebuilt, -4, data),
                run(&round, -4, data),
                "{template} disagrees on {data:?}"
            );
        }
    }
}

#[test]
fn rebuilt_round_compiles_again() {
    let round = load_demo("sum.rir");
    let form = compile(&round, Template::MapReduce).unwrap();
    let rebuilt = synthesize(&form).unwrap();
    let again = compile(&rebuilt, Template::MapReduce).unwrap();
    assert_eq!(again.type_signature(), form.type_signature());
    assert_eq!(run_form(&again, 2, &[3, 4]), run_form(&form, 2, &[3, 4]));
}

#[test]
fn secure_round_round_trips() {
    let round = load_demo("secure.rir");
    let form = compile(&round, Template::MapReduce).unwrap();
    let mr = form.as_map_reduce().unwrap();
    assert_eq!(mr.secure_parameter(0).unwrap().to_string(), "( -> 8)");
    assert_eq!(mr.secure_parameter(1).unwrap().to_string(), "( -> <>)");

    // 250 + 10 wraps at 8 bits; the plain aggregate does not.
    let data = [250, 10];
    assert_eq!(run(&round, 1, &data).to_string(), "<261@SERVER,4@SERVER>");
    assert_eq!(run_form(&form, 1, &data), run(&round, 1, &data));
    let rebuilt = synthesize(&form).unwrap();
    assert_eq!(run(&rebuilt, 1, &data), run(&round, 1, &data));
}

#[test]
fn broadcast_round_round_trips() {
    let round = load_demo("broadcast.rir");
    let form = compile(&round, Template::Broadcast).unwrap();
    assert_eq!(run(&round, 10, &[1, 2]).to_string(), "{11,12}@CLIENTS");
    assert_eq!(run_form(&form, 10, &[1, 2]), run(&round, 10, &[1, 2]));
    let rebuilt = synthesize(&form).unwrap();
    assert_eq!(run(&rebuilt, 10, &[1, 2]), run(&round, 10, &[1, 2]));
}

#[test]
fn compiled_forms_pass_validation() {
    let round = load_demo("sum.rir");
    for template in [Template::MapReduce, Template::DistributeAggregate] {
        let form = compile(&round, template).unwrap();
        assert!(mrfc::validate::validate(&form).is_ok());
        assert!(mrfc::validate::validate(&form).is_ok());
    }
}

#[test]
fn empty_state_round() {
    let round = parse_expr(
        "(p: <<>@SERVER,{int32}@CLIENTS> ->
           let total = federated_aggregate(<p[1], 0, add<int32>, add<int32>, (a: int32 -> a)>)
           in <p[0], total>)",
    )
    .unwrap();
    let form = compile(&round, Template::MapReduce).unwrap();
    let state = Value::empty();
    let data = ints(&[4, 5]);
    let opts = EvalOptions::default();
    let expected = evaluate_round(&round, state.clone(), data.clone(), &opts).unwrap();
    assert_eq!(expected.to_string(), "<<>@SERVER,9@SERVER>");
    assert_eq!(evaluate_form(&form, state.clone(), data.clone(), &opts).unwrap(), expected);
    let rebuilt = synthesize(&form).unwrap();
    assert_eq!(evaluate_round(&rebuilt, state, data, &opts).unwrap(), expected);
}

#[test]
fn forms_are_deterministic() {
    let round = load_demo("sum.rir");
    let a = compile(&round, Template::MapReduce).unwrap();
    let b = compile(&round, Template::MapReduce).unwrap();
    assert_eq!(a.canonical_json().unwrap(), b.canonical_json().unwrap());
    assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
}

#[test]
fn canonical_json_reloads_to_the_same_form() {
    let round = load_demo("secure.rir");
    let form = compile(&round, Template::MapReduce).unwrap();
    let json = form.canonical_json().unwrap();
    let reloaded: Form = serde_json::from_str(&json).unwrap();
    assert_eq!(reloaded.canonical_json().unwrap(), json);
    assert_eq!(reloaded.fingerprint().unwrap(), form.fingerprint().unwrap());
    assert_eq!(run_form(&reloaded, 1, &[250, 10]), run_form(&form, 1, &[250, 10]));

    let provenance = mrfc::pipeline::compute_provenance("src", Some(&form)).unwrap();
    assert_eq!(provenance.form_fingerprint, Some(form.fingerprint().unwrap()));
}
