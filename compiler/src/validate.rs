// validate.rs — Form validator
//
// Checks that a form's slots compose, in a fixed order:
//   1. connecting types between adjacent slots, and every slot is a local
//      block of its slot's tier;
//   2. seven-function form: accumulate and merge stay assignable to the
//      accumulator, so merging is closed under repetition;
//   3. five-lambda form: the restricted lambdas call only intrinsics of
//      their permitted kind, each depending only on the lambda parameter.
//
// Preconditions: none; deserialized IR is re-typechecked here.
// Postconditions: `Ok` forms satisfy all three checks.
// Failure modes: the first violated constraint as `IncompatibleFormError`.
//   The validator never repairs a form.
// Side effects: `debug!` per validated form.

use log::debug;

use crate::context::TypeContext;
use crate::error::IncompatibleFormError;
use crate::forms::{
    slots, BroadcastForm, BroadcastParts, DistributeAggregateForm, DistributeAggregateParts,
    Form, MapReduceForm, MapReduceParts, Template,
};
use crate::intrinsics::{self, IntrinsicDef, IntrinsicKind};
use crate::ir::{Expr, ExprKind};
use crate::local_block::{self, LocalBlock};
use crate::placement::Tier;
use crate::types::{Placement, Type};

/// Re-validate an existing form.
pub fn validate(form: &Form) -> Result<(), IncompatibleFormError> {
    match form {
        Form::MapReduce(f) => map_reduce(&f.to_parts()).map(|_| ()),
        Form::DistributeAggregate(f) => distribute_aggregate(&f.to_parts()).map(|_| ()),
        Form::Broadcast(f) => broadcast(&f.to_parts()).map(|_| ()),
    }
}

// ── Seven-function form ─────────────────────────────────────────────────────

pub fn map_reduce(parts: &MapReduceParts) -> Result<MapReduceForm, IncompatibleFormError> {
    let mut cx = TypeContext::new(Template::MapReduce);

    // 1. connecting types
    let prepare = block(&parts.prepare, Tier::Unplaced, slots::PREPARE)?;
    let (s, c) = unary(&prepare, slots::PREPARE)?;
    let s = cx.bind("S", s.clone());
    let c = cx.bind("C", c.clone());

    let work = block(&parts.work, Tier::Unplaced, slots::WORK)?;
    let (work_in, work_out) = unary(&work, slots::WORK)?;
    let (d, c_in) = pair(work_in, slots::WORK, "parameter must be <D, C>")?;
    expect(slots::WORK, "work consumes the context produced by prepare", &c, c_in)?;
    cx.bind("D", d.clone());
    let (u, v) = pair(work_out, slots::WORK, "result must be <U, V>")?;
    let u = cx.bind("U", u.clone());
    let v = cx.bind("V", v.clone());
    let channels = v
        .as_struct()
        .filter(|e| e.len() == slots::SECURE_PARAMETERS.len())
        .ok_or_else(|| {
            incompatible(
                slots::WORK,
                "secure channels must form a triple <V1, V2, V3>",
                None,
                Some(v.clone()),
            )
        })?;
    for (k, channel) in channels.iter().enumerate() {
        if !channel.is_integer() {
            return Err(incompatible(
                slots::WORK,
                format!("secure channel {} must carry integers", k + 1),
                None,
                Some(channel.clone()),
            ));
        }
    }

    let zero = block(&parts.zero, Tier::Unplaced, slots::ZERO)?;
    let a = cx.bind("A", nullary(&zero, slots::ZERO)?.clone());

    let accumulate = block(&parts.accumulate, Tier::Unplaced, slots::ACCUMULATE)?;
    let (acc_in, acc_out) = unary(&accumulate, slots::ACCUMULATE)?;
    expect(
        slots::ACCUMULATE,
        "accumulate takes the accumulator and one client update",
        &Type::tuple(vec![a.clone(), u]),
        acc_in,
    )?;

    let merge = block(&parts.merge, Tier::Unplaced, slots::MERGE)?;
    let (merge_in, merge_out) = unary(&merge, slots::MERGE)?;

    let report = block(&parts.report, Tier::Unplaced, slots::REPORT)?;
    let (report_in, r) = unary(&report, slots::REPORT)?;
    expect(slots::REPORT, "report consumes the accumulator", &a, report_in)?;
    let r = cx.bind("R", r.clone());

    let sources = [
        &parts.secure_sum_bitwidth,
        &parts.secure_sum_max_input,
        &parts.secure_modular_sum_modulus,
    ];
    let mut parameters = Vec::with_capacity(sources.len());
    for (slot, expr) in slots::SECURE_PARAMETERS.into_iter().zip(sources) {
        let parameter = block(expr, Tier::Unplaced, slot)?;
        let p = nullary(&parameter, slot)?;
        if !p.is_integer() {
            return Err(incompatible(
                slot,
                "secure-sum parameter must be an integer",
                None,
                Some(p.clone()),
            ));
        }
        parameters.push(parameter);
    }

    let update = block(&parts.update, Tier::Unplaced, slots::UPDATE)?;
    let (update_in, update_out) = unary(&update, slots::UPDATE)?;
    expect(
        slots::UPDATE,
        "update takes the state and the global update <R, V>",
        &Type::tuple(vec![s.clone(), Type::tuple(vec![r, v])]),
        update_in,
    )?;
    let (new_state, x) = pair(update_out, slots::UPDATE, "result must be <S, X>")?;
    expect(slots::UPDATE, "update returns the state type first", &s, new_state)?;
    cx.bind("X", x.clone());

    // 2. accumulate / merge
    if !a.is_assignable_from(acc_out) {
        return Err(incompatible(
            slots::ACCUMULATE,
            "accumulate result must be assignable to the accumulator",
            Some(a),
            Some(acc_out.clone()),
        ));
    }
    expect(
        slots::MERGE,
        "merge takes two accumulators",
        &Type::tuple(vec![a.clone(), a.clone()]),
        merge_in,
    )?;
    if !a.is_assignable_from(merge_out) {
        return Err(incompatible(
            slots::MERGE,
            "merge must be closed under repeated merging",
            Some(a),
            Some(merge_out.clone()),
        ));
    }

    debug!("validated map-reduce form {cx}");
    let [secure_sum_bitwidth, secure_sum_max_input, secure_modular_sum_modulus] =
        <[LocalBlock; 3]>::try_from(parameters).map_err(|_| {
            incompatible(
                slots::SECURE_SUM_BITWIDTH,
                "expected three secure-sum parameter blocks",
                None,
                None,
            )
        })?;
    Ok(MapReduceForm {
        prepare,
        work,
        zero,
        accumulate,
        merge,
        report,
        secure_sum_bitwidth,
        secure_sum_max_input,
        secure_modular_sum_modulus,
        update,
    })
}

// ── Five-lambda form ────────────────────────────────────────────────────────

pub fn distribute_aggregate(
    parts: &DistributeAggregateParts,
) -> Result<DistributeAggregateForm, IncompatibleFormError> {
    let mut cx = TypeContext::new(Template::DistributeAggregate);

    // 1. connecting types
    let server_prepare = block(&parts.server_prepare, Tier::Coordinator, slots::SERVER_PREPARE)?;
    let (state, prepared) = unary(&server_prepare, slots::SERVER_PREPARE)?;
    let s = match (state.placement(), state.federated_member()) {
        (Some(Placement::Coordinator), Some(member)) => cx.bind("S", member.clone()),
        _ => {
            return Err(incompatible(
                slots::SERVER_PREPARE,
                "parameter must be the coordinator state S@SERVER",
                None,
                Some(state.clone()),
            ))
        }
    };
    let (b_i, t) = pair(prepared, slots::SERVER_PREPARE, "result must be <B_I, T>")?;
    placed_tuple(b_i, Placement::Coordinator, slots::SERVER_PREPARE, "B_I")?;
    placed_tuple(t, Placement::Coordinator, slots::SERVER_PREPARE, "T")?;
    let b_i = cx.bind("B_I", b_i.clone());
    let t = cx.bind("T", t.clone());

    let broadcast = block(
        &parts.server_to_client_broadcast,
        Tier::CrossTier,
        slots::SERVER_TO_CLIENT_BROADCAST,
    )?;
    let (b_in, b_o) = unary(&broadcast, slots::SERVER_TO_CLIENT_BROADCAST)?;
    expect(
        slots::SERVER_TO_CLIENT_BROADCAST,
        "broadcast consumes B_I from server_prepare",
        &b_i,
        b_in,
    )?;
    placed_tuple(b_o, Placement::Participants, slots::SERVER_TO_CLIENT_BROADCAST, "B_O")?;
    let b_o = cx.bind("B_O", b_o.clone());

    let client_work = block(&parts.client_work, Tier::Participants, slots::CLIENT_WORK)?;
    let (w_in, a_i) = unary(&client_work, slots::CLIENT_WORK)?;
    let (data, b_o_in) = pair(w_in, slots::CLIENT_WORK, "parameter must be <{D}@CLIENTS, B_O>")?;
    if data.placement() != Some(Placement::Participants) || data.is_all_equal() {
        return Err(incompatible(
            slots::CLIENT_WORK,
            "first parameter element must be participant data {D}@CLIENTS",
            None,
            Some(data.clone()),
        ));
    }
    expect(
        slots::CLIENT_WORK,
        "client_work consumes B_O from server_to_client_broadcast",
        &b_o,
        b_o_in,
    )?;
    placed_tuple(a_i, Placement::Participants, slots::CLIENT_WORK, "A_I")?;
    let a_i = cx.bind("A_I", a_i.clone());

    let aggregation = block(
        &parts.client_to_server_aggregation,
        Tier::CrossTier,
        slots::CLIENT_TO_SERVER_AGGREGATION,
    )?;
    let (g_in, a_o) = unary(&aggregation, slots::CLIENT_TO_SERVER_AGGREGATION)?;
    expect(
        slots::CLIENT_TO_SERVER_AGGREGATION,
        "aggregation takes the temporary state and the client values <T, A_I>",
        &Type::tuple(vec![t.clone(), a_i]),
        g_in,
    )?;
    placed_tuple(a_o, Placement::Coordinator, slots::CLIENT_TO_SERVER_AGGREGATION, "A_O")?;
    let a_o = cx.bind("A_O", a_o.clone());

    let server_result = block(&parts.server_result, Tier::Coordinator, slots::SERVER_RESULT)?;
    let (r_in, out) = unary(&server_result, slots::SERVER_RESULT)?;
    expect(
        slots::SERVER_RESULT,
        "server_result takes the temporary state and the aggregates <T, A_O>",
        &Type::tuple(vec![t, a_o]),
        r_in,
    )?;
    let (new_state, x) = pair(out, slots::SERVER_RESULT, "result must be <S@SERVER, X@SERVER>")?;
    expect(
        slots::SERVER_RESULT,
        "server_result returns the state first",
        &Type::at_coordinator(s),
        new_state,
    )?;
    if x.placement() != Some(Placement::Coordinator) {
        return Err(incompatible(
            slots::SERVER_RESULT,
            "round output must be placed at the coordinator",
            None,
            Some(x.clone()),
        ));
    }

    // 3. restricted lambdas
    restricted(
        &broadcast,
        slots::SERVER_TO_CLIENT_BROADCAST,
        IntrinsicKind::is_broadcast,
        "broadcast",
    )?;
    restricted(
        &aggregation,
        slots::CLIENT_TO_SERVER_AGGREGATION,
        IntrinsicKind::is_aggregation,
        "aggregation",
    )?;

    debug!("validated distribute-aggregate form {cx}");
    Ok(DistributeAggregateForm {
        server_prepare,
        server_to_client_broadcast: broadcast,
        client_work,
        client_to_server_aggregation: aggregation,
        server_result,
    })
}

// ── Broadcast form ──────────────────────────────────────────────────────────

pub fn broadcast(parts: &BroadcastParts) -> Result<BroadcastForm, IncompatibleFormError> {
    let mut cx = TypeContext::new(Template::Broadcast);

    let context = block(
        &parts.compute_server_context,
        Tier::Unplaced,
        slots::COMPUTE_SERVER_CONTEXT,
    )?;
    let (s, c) = unary(&context, slots::COMPUTE_SERVER_CONTEXT)?;
    cx.bind("S", s.clone());
    let c = cx.bind("C", c.clone());

    let processing = block(&parts.client_processing, Tier::Unplaced, slots::CLIENT_PROCESSING)?;
    let (input, o) = unary(&processing, slots::CLIENT_PROCESSING)?;
    let (c_in, d) = pair(input, slots::CLIENT_PROCESSING, "parameter must be <C, D>")?;
    expect(
        slots::CLIENT_PROCESSING,
        "client_processing consumes the context produced by compute_server_context",
        &c,
        c_in,
    )?;
    cx.bind("D", d.clone());
    cx.bind("O", o.clone());

    debug!("validated broadcast form {cx}");
    Ok(BroadcastForm {
        compute_server_context: context,
        client_processing: processing,
    })
}

// ── Checks ──────────────────────────────────────────────────────────────────

fn incompatible(
    slot: &str,
    constraint: impl Into<String>,
    expected: Option<Type>,
    actual: Option<Type>,
) -> IncompatibleFormError {
    IncompatibleFormError {
        slot: slot.to_string(),
        constraint: constraint.into(),
        expected,
        actual,
    }
}

/// Typecheck `expr` and extract it as a block of `tier` under its own type.
fn block(expr: &Expr, tier: Tier, slot: &str) -> Result<LocalBlock, IncompatibleFormError> {
    expr.typecheck()
        .map_err(|e| incompatible(slot, format!("ill-typed slot: {}", e.message), None, None))?;
    local_block::extract(expr, &expr.ty, tier, slot).map_err(|e| {
        incompatible(
            slot,
            format!("not a {tier} local block: {e}"),
            None,
            Some(expr.ty.clone()),
        )
    })
}

fn unary<'a>(block: &'a LocalBlock, slot: &str) -> Result<(&'a Type, &'a Type), IncompatibleFormError> {
    match block.signature().as_function() {
        Some((Some(parameter), result)) => Ok((parameter, result)),
        _ => Err(incompatible(
            slot,
            "must be a one-parameter function",
            None,
            Some(block.signature().clone()),
        )),
    }
}

fn nullary<'a>(block: &'a LocalBlock, slot: &str) -> Result<&'a Type, IncompatibleFormError> {
    match block.signature().as_function() {
        Some((None, result)) => Ok(result),
        _ => Err(incompatible(
            slot,
            "must be a no-parameter function",
            None,
            Some(block.signature().clone()),
        )),
    }
}

fn pair<'a>(ty: &'a Type, slot: &str, constraint: &str) -> Result<(&'a Type, &'a Type), IncompatibleFormError> {
    match ty.as_struct() {
        Some([first, second]) => Ok((first, second)),
        _ => Err(incompatible(slot, constraint, None, Some(ty.clone()))),
    }
}

fn expect(slot: &str, constraint: &str, expected: &Type, actual: &Type) -> Result<(), IncompatibleFormError> {
    if expected == actual {
        return Ok(());
    }
    Err(incompatible(
        slot,
        constraint,
        Some(expected.clone()),
        Some(actual.clone()),
    ))
}

/// `ty` is a tuple whose every element is placed at `placement`.
fn placed_tuple(ty: &Type, placement: Placement, slot: &str, name: &str) -> Result<(), IncompatibleFormError> {
    let ok = ty
        .as_struct()
        .is_some_and(|e| e.iter().all(|t| t.placement() == Some(placement)));
    if ok {
        return Ok(());
    }
    Err(incompatible(
        slot,
        format!("{name} must be a tuple of values placed at {placement}"),
        None,
        Some(ty.clone()),
    ))
}

/// Every intrinsic in `block` is a cross-tier primitive accepted by
/// `permitted`, and every such call reads only the lambda parameter.
fn restricted(
    block: &LocalBlock,
    slot: &str,
    permitted: fn(IntrinsicKind) -> bool,
    kind_name: &str,
) -> Result<(), IncompatibleFormError> {
    let payload = block.payload();
    let Some((parameter, _)) = payload.lambda_parameter() else {
        return Err(incompatible(
            slot,
            "must be a one-parameter lambda",
            None,
            Some(payload.ty.clone()),
        ));
    };
    let mut violation: Option<String> = None;
    payload.visit(&mut |e| {
        if violation.is_some() {
            return;
        }
        if let ExprKind::Intrinsic { uri } = &e.kind {
            match IntrinsicDef::from_uri(uri) {
                Some(IntrinsicDef::CrossTier(kind)) if permitted(kind) => {}
                _ => {
                    violation = Some(format!("intrinsic `{uri}` is not a {kind_name} primitive"));
                    return;
                }
            }
        }
        if let Ok(Some(call)) = intrinsics::recognize(e) {
            let foreign = call
                .args
                .iter()
                .flat_map(|a| a.free_references())
                .find(|name| name != parameter);
            if let Some(name) = foreign {
                violation = Some(format!(
                    "`{}` depends on `{name}` rather than only on `{parameter}`",
                    call.kind
                ));
            }
        }
    });
    match violation {
        Some(constraint) => Err(incompatible(slot, constraint, None, None)),
        None => Ok(()),
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elaborate::parse_expr;
    use crate::forms::FormParts;
    use crate::matcher::match_round;

    fn e(src: &str) -> Expr {
        parse_expr(src).unwrap()
    }

    fn sum_parts() -> MapReduceParts {
        MapReduceParts {
            prepare: e("(s: int32 -> s)"),
            work: e("(a: <int32,int32> -> <add<int32>(a), <<>,<>,<>>>)"),
            zero: e("( -> 0)"),
            accumulate: e("add<int32>"),
            merge: e("add<int32>"),
            report: e("(x: int32 -> x)"),
            secure_sum_bitwidth: e("( -> <>)"),
            secure_sum_max_input: e("( -> <>)"),
            secure_modular_sum_modulus: e("( -> <>)"),
            update: e("(u: <int32,<int32,<<>,<>,<>>>> -> <add<int32>(<u[0], u[1][0]>), <>>)"),
        }
    }

    #[test]
    fn accepts_consistent_form() {
        let form = map_reduce(&sum_parts()).unwrap();
        assert_eq!(
            form.type_signature().to_string(),
            "(<int32@SERVER,{int32}@CLIENTS> -> <int32@SERVER,<>@SERVER>)"
        );
        assert_eq!(form.accumulator_type(), &Type::int32());
    }

    #[test]
    fn work_must_consume_prepare_context() {
        let mut parts = sum_parts();
        parts.prepare = e("(s: int32 -> <s, s>)");
        let err = map_reduce(&parts).unwrap_err();
        assert_eq!(err.slot, "work");
        assert_eq!(err.expected.unwrap().to_string(), "<int32,int32>");
        assert_eq!(err.actual.unwrap().to_string(), "int32");
    }

    #[test]
    fn merge_must_close_over_accumulator() {
        let mut parts = sum_parts();
        parts.merge = e("(m: <int32,int32> -> <>)");
        let err = map_reduce(&parts).unwrap_err();
        assert_eq!(err.slot, "merge");
        assert!(err.constraint.contains("repeated merging"));
    }

    #[test]
    fn connecting_types_are_checked_before_merge() {
        let mut parts = sum_parts();
        parts.merge = e("(m: <int32,int32> -> <>)");
        parts.report = e("(x: float32 -> x)");
        assert_eq!(map_reduce(&parts).unwrap_err().slot, "report");
    }

    #[test]
    fn secure_parameter_must_be_integer() {
        let mut parts = sum_parts();
        parts.secure_sum_max_input = e("( -> 1.5)");
        let err = map_reduce(&parts).unwrap_err();
        assert_eq!(err.slot, "secure_sum_max_input");
    }

    #[test]
    fn placed_slot_is_not_local() {
        let mut parts = sum_parts();
        parts.prepare = e("(s: int32@SERVER -> s)");
        let err = map_reduce(&parts).unwrap_err();
        assert_eq!(err.slot, "prepare");
        assert!(err.constraint.contains("UNPLACED"));
    }

    fn five_lambda_parts() -> DistributeAggregateParts {
        let round = e("(p: <int32@SERVER,{int32}@CLIENTS> ->
            let
              c = federated_broadcast(p[0]),
              total = federated_aggregate(<federated_map(<add<int32>, federated_zip_at_clients(<p[1], c>)>), 0, add<int32>, add<int32>, (a: int32 -> a)>)
            in <p[0], total>)");
        match match_round(&round, Template::DistributeAggregate).unwrap() {
            FormParts::DistributeAggregate(p) => p,
            _ => unreachable!(),
        }
    }

    #[test]
    fn accepts_matched_five_lambda_form() {
        let form = distribute_aggregate(&five_lambda_parts()).unwrap();
        assert_eq!(form.temporary_state_type().to_string(), "<int32@SERVER>");
    }

    #[test]
    fn broadcast_lambda_may_only_broadcast() {
        let mut parts = five_lambda_parts();
        parts.server_to_client_broadcast = e(
            "(b: <int32@SERVER> -> <federated_broadcast(federated_apply(<(x: int32 -> x), b[0]>))>)",
        );
        let err = distribute_aggregate(&parts).unwrap_err();
        assert_eq!(err.slot, "server_to_client_broadcast");
        assert!(err.constraint.contains("federated_apply"));
    }

    #[test]
    fn revalidation_is_idempotent() {
        let form = Form::MapReduce(map_reduce(&sum_parts()).unwrap());
        assert!(validate(&form).is_ok());
        let again = Form::from_parts(FormParts::MapReduce(form.as_map_reduce().unwrap().to_parts()))
            .unwrap();
        assert_eq!(again, form);
    }

    #[test]
    fn broadcast_form_connects_context() {
        let parts = BroadcastParts {
            compute_server_context: e("(s: int32 -> s)"),
            client_processing: e("(a: <float32,int32> -> a[1])"),
        };
        let err = broadcast(&parts).unwrap_err();
        assert_eq!(err.slot, "client_processing");
    }
}
