// Property-based tests for compiler invariants.
//
// Two categories:
// 1. Form agreement: a compiled form computes what its source round computes
// 2. Synthesis: the round rebuilt from a form computes the same thing
//
// Rounds are generated from a small grammar of worker and merge operators.
// Uses proptest with explicit configuration to prevent CI flakiness.

use mrfc::elaborate::parse_expr;
use mrfc::eval::{evaluate_form, evaluate_round, EvalOptions, Value};
use mrfc::{compile, synthesize, Template};
use proptest::prelude::*;

// ── Round generator ─────────────────────────────────────────────────────────

/// Generate a sum-like round: every participant combines its value with the
/// broadcast state, the results are reduced, and the state is updated.
/// Grammar: work ∈ {add, sub, max, min, first}, reduce ∈ {add, max, min}.
fn arb_round() -> impl Strategy<Value = String> {
    let work = prop_oneof![
        Just("add<int32>"),
        Just("sub<int32>"),
        Just("max<int32>"),
        Just("min<int32>"),
        Just("(x: <int32,int32> -> x[0])"),
    ];
    let reduce = prop_oneof![Just("add<int32>"), Just("max<int32>"), Just("min<int32>")];
    let release = prop_oneof![
        Just("federated_value_at_server(<>)"),
        Just("total"),
    ];
    (work, reduce, release).prop_map(|(work, reduce, release)| {
        format!(
            "(p: <int32@SERVER,{{int32}}@CLIENTS> ->
               let
                 c = federated_broadcast(p[0]),
                 v = federated_map(<{work}, federated_zip_at_clients(<p[1], c>)>),
                 total = federated_aggregate(<v, 0, {reduce}, {reduce}, (a: int32 -> a)>),
                 new_state = federated_apply(<add<int32>, federated_zip_at_server(<p[0], total>)>)
               in <new_state, {release}>)"
        )
    })
}

fn arb_data() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(-1000i64..1000, 0..8)
}

fn ints(vs: &[i64]) -> Vec<Value> {
    vs.iter().copied().map(Value::Int).collect()
}

// ── Properties ──────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        max_shrink_iters: 200,
        ..ProptestConfig::default()
    })]

    #[test]
    fn forms_agree_with_rounds(
        source in arb_round(),
        state in -1000i64..1000,
        data in arb_data(),
        group in 1usize..4,
    ) {
        let round = parse_expr(&source).unwrap();
        let opts = EvalOptions { aggregation_group_size: group };
        let expected =
            evaluate_round(&round, Value::Int(state), ints(&data), &opts).unwrap();
        for template in [Template::MapReduce, Template::DistributeAggregate] {
            let form = compile(&round, template).unwrap();
            let actual = evaluate_form(&form, Value::Int(state), ints(&data), &opts).unwrap();
            prop_assert_eq!(&actual, &expected, "{} form", template);
        }
    }

    #[test]
    fn synthesized_rounds_agree_with_sources(
        source in arb_round(),
        state in -1000i64..1000,
        data in arb_data(),
    ) {
        let round = parse_expr(&source).unwrap();
        let opts = EvalOptions::default();
        let expected =
            evaluate_round(&round, Value::Int(state), ints(&data), &opts).unwrap();
        for template in [Template::MapReduce, Template::DistributeAggregate] {
            let form = compile(&round, template).unwrap();
            let rebuilt = synthesize(&form).unwrap();
            prop_assert_eq!(&rebuilt.ty, &round.ty);
            let actual =
                evaluate_round(&rebuilt, Value::Int(state), ints(&data), &opts).unwrap();
            prop_assert_eq!(&actual, &expected, "{} round", template);
        }
    }

    #[test]
    fn bitwidth_sum_stays_in_range(
        data in prop::collection::vec(0i64..1000, 0..8),
        bits in 1i64..16,
    ) {
        let source = format!(
            "(p: <int32@SERVER,{{int32}}@CLIENTS> ->
               let total = federated_secure_sum_bitwidth(<p[1], {bits}>)
               in <p[0], total>)"
        );
        let round = parse_expr(&source).unwrap();
        let form = compile(&round, Template::MapReduce).unwrap();
        let out = evaluate_form(&form, Value::Int(0), ints(&data), &EvalOptions::default())
            .unwrap();
        let Value::Tuple(parts) = out else { panic!("expected a pair") };
        let Value::AtServer(sum) = &parts[1] else { panic!("expected a server value") };
        let Value::Int(sum) = **sum else { panic!("expected an integer") };
        prop_assert!(sum >= 0 && sum < (1i64 << bits));
        prop_assert_eq!(sum, data.iter().sum::<i64>() % (1i64 << bits));
    }
}
