// matcher.rs — Template shape matcher
//
// Walks a normalized round against one template in the fixed order
// signature → broadcast → work → aggregation → result, binding every slot as
// it goes. No backtracking: the first slot that cannot be bound is reported.
//
// Preconditions: the round classifies without error.
// Postconditions: returned parts have every slot extracted with the
//   signature its template implies; validation is left to `Form::from_parts`.
// Failure modes: `ShapeMismatchError` naming the first unbound slot;
//   extraction errors from the slot being bound.
// Side effects: `debug!` per step and bound slot.

use std::collections::BTreeSet;

use log::debug;

use crate::context::TypeContext;
use crate::error::{CompileError, RoundStep, ShapeMismatchError};
use crate::forms::{
    slots, BroadcastParts, DistributeAggregateParts, FormParts, MapReduceParts, Template,
};
use crate::intrinsics::{self, IntrinsicDef, IntrinsicKind};
use crate::ir::{Expr, ExprKind};
use crate::local_block;
use crate::placement::Tier;
use crate::region::{Mode, RoundView, Slice, Step};
use crate::types::{Placement, Type};

/// Match `round` against `template`.
pub fn match_round(round: &Expr, template: Template) -> Result<FormParts, CompileError> {
    let view = RoundView::new(round, template)?;
    debug!(
        "{template}: normalized round has {} step(s), {} broadcast(s), {} aggregation(s)",
        view.steps.len(),
        view.broadcasts().len(),
        view.aggregations().len()
    );
    match template {
        Template::MapReduce => map_reduce(view).map(FormParts::MapReduce),
        Template::DistributeAggregate => {
            distribute_aggregate(view).map(FormParts::DistributeAggregate)
        }
        Template::Broadcast => broadcast(view).map(FormParts::Broadcast),
    }
}

// ── Seven-function template ─────────────────────────────────────────────────

const SECURE_TYPES: [&str; 3] = ["P1", "P2", "P3"];
const SECURE_KINDS: [IntrinsicKind; 3] = [
    IntrinsicKind::SecureSumBitwidth,
    IntrinsicKind::SecureSum,
    IntrinsicKind::SecureModularSum,
];

fn map_reduce(mut view: RoundView) -> Result<MapReduceParts, CompileError> {
    let template = Template::MapReduce;
    let mut cx = TypeContext::new(template);
    let state_name = view.names.fresh("state");
    let arg_name = view.names.fresh("arg");
    let accumulator_name = view.names.fresh("a");
    let update_name = view.names.fresh("update");

    // signature
    let s = cx.bind("S", view.state.clone());
    let d = cx.bind("D", view.data.clone());
    let Some(x) = server_output(&view) else {
        return Err(mismatch(
            template,
            RoundStep::Signature,
            slots::UPDATE,
            format!(
                "round must return <S@SERVER,X@SERVER>, found {}",
                view.result.ty
            ),
        ));
    };
    let x = cx.bind("X", x);

    // broadcast
    let broadcasts = view.broadcasts();
    reject_late_broadcasts(&view, &broadcasts, slots::PREPARE)?;
    let prepare = server_context(&view, &mut cx, &broadcasts, slots::PREPARE, &state_name)?;
    let c = cx.ty("C");

    // work
    debug!("{template}: work step");
    let aggregations = view.aggregations();
    let find = |kind: IntrinsicKind| aggregations.iter().copied().find(|s| s.kind() == Some(kind));
    let aggregate = find(IntrinsicKind::Aggregate);
    let secure: [Option<&Step>; 3] = SECURE_KINDS.map(find);

    let arg_ty = Type::tuple(vec![d.clone(), c.clone()]);
    let arg = Expr::reference(&arg_name, arg_ty.clone());
    let slice = Slice::new(&view, Mode::Lowered, RoundStep::Work, slots::WORK)
        .with_data(field(&arg, 0));
    let mut slice = with_broadcasts(slice, &broadcasts, &field(&arg, 1), false);
    let client_update = match aggregate {
        Some(step) => channel_value(&mut slice, step)?,
        None => Expr::empty(),
    };
    let mut channels = Vec::with_capacity(SECURE_KINDS.len());
    for step in secure {
        channels.push(match step {
            Some(step) => channel_value(&mut slice, step)?,
            None => Expr::empty(),
        });
    }
    let u = cx.bind("U", client_update.ty.clone());
    let v = cx.bind(
        "V",
        Type::tuple(channels.iter().map(|e| e.ty.clone()).collect()),
    );
    let candidate = slice.finish(
        (arg_name, arg_ty.clone()),
        Expr::tuple(vec![client_update, Expr::tuple(channels)]),
    );
    let work = bind_slot(
        &candidate,
        Type::function(Some(arg_ty), Type::tuple(vec![u.clone(), v.clone()])),
        Tier::Unplaced,
        slots::WORK,
    )?;

    // aggregation
    debug!("{template}: aggregation step");
    if aggregations.is_empty() {
        return Err(mismatch(
            template,
            RoundStep::Aggregation,
            slots::ZERO,
            "no aggregation intrinsic found; the round never moves participant values to the coordinator",
        ));
    }
    for kind in IntrinsicKind::ALL.into_iter().filter(|k| k.is_aggregation()) {
        let count = aggregations.iter().filter(|s| s.kind() == Some(kind)).count();
        if count > 1 {
            let slot = kind
                .secure_channel()
                .map_or(slots::ZERO, |ch| slots::SECURE_PARAMETERS[ch]);
            return Err(mismatch(
                template,
                RoundStep::Aggregation,
                slot,
                format!("{count} calls of `{kind}`; at most one call per aggregation kind"),
            ));
        }
    }

    let (zero, accumulate, merge, report, r) = match aggregate {
        Some(step) => {
            let zero = static_slot(&view, step, 1, slots::ZERO, true)?;
            let a = cx.bind("A", result_of(&zero));
            let zero = bind_slot(&zero, Type::function(None, a.clone()), Tier::Unplaced, slots::ZERO)?;
            let accumulate = bind_slot(
                &static_slot(&view, step, 2, slots::ACCUMULATE, false)?,
                Type::function(Some(Type::tuple(vec![a.clone(), u.clone()])), a.clone()),
                Tier::Unplaced,
                slots::ACCUMULATE,
            )?;
            let merge = bind_slot(
                &static_slot(&view, step, 3, slots::MERGE, false)?,
                Type::function(Some(Type::tuple(vec![a.clone(), a.clone()])), a.clone()),
                Tier::Unplaced,
                slots::MERGE,
            )?;
            let report = static_slot(&view, step, 4, slots::REPORT, false)?;
            let r = cx.bind("R", result_of(&report));
            let report = bind_slot(
                &report,
                Type::function(Some(a), r.clone()),
                Tier::Unplaced,
                slots::REPORT,
            )?;
            (zero, accumulate, merge, report, r)
        }
        None => {
            debug!("{template}: no plain aggregate, binding empty placeholders");
            cx.bind("A", Type::empty());
            let r = cx.bind("R", Type::empty());
            let pair = Type::tuple(vec![Type::empty(), Type::empty()]);
            let first = Expr::lambda(
                Some((accumulator_name.clone(), pair.clone())),
                field(&Expr::reference(&accumulator_name, pair), 0),
            );
            let report = Expr::lambda(
                Some((accumulator_name.clone(), Type::empty())),
                Expr::reference(&accumulator_name, Type::empty()),
            );
            (Expr::lambda(None, Expr::empty()), first.clone(), first, report, r)
        }
    };

    let mut parameters = Vec::with_capacity(SECURE_KINDS.len());
    for (channel, step) in secure.iter().enumerate() {
        let slot = slots::SECURE_PARAMETERS[channel];
        let candidate = match step {
            Some(step) => static_slot(&view, step, 1, slot, true).map_err(|e| {
                mismatch(
                    template,
                    RoundStep::Aggregation,
                    slot,
                    format!("secure-sum parameter must be static: {e}"),
                )
            })?,
            None => Expr::lambda(None, Expr::empty()),
        };
        let p = cx.bind(SECURE_TYPES[channel], result_of(&candidate));
        parameters.push(bind_slot(&candidate, Type::function(None, p), Tier::Unplaced, slot)?);
    }
    let [secure_sum_bitwidth, secure_sum_max_input, secure_modular_sum_modulus] =
        <[Expr; 3]>::try_from(parameters).map_err(|_| {
            mismatch(template, RoundStep::Aggregation, slots::SECURE_SUM_BITWIDTH, "secure channels out of order")
        })?;

    // result
    debug!("{template}: result step");
    let update_ty = Type::tuple(vec![s.clone(), Type::tuple(vec![r, v])]);
    let update_param = Expr::reference(&update_name, update_ty.clone());
    let global = field(&update_param, 1);
    let mut slice = Slice::new(&view, Mode::Lowered, RoundStep::Result, slots::UPDATE)
        .with_state(field(&update_param, 0));
    if let Some(step) = aggregate {
        slice = slice.with_input(&step.name, field(&global, 0));
    }
    for (channel, step) in secure.iter().enumerate() {
        if let Some(step) = step {
            slice = slice.with_input(&step.name, field(&field(&global, 1), channel));
        }
    }
    let result = slice.value(&view.result)?;
    let candidate = slice.finish((update_name, update_ty.clone()), result);
    let update = bind_slot(
        &candidate,
        Type::function(Some(update_ty), Type::tuple(vec![s, x])),
        Tier::Unplaced,
        slots::UPDATE,
    )?;
    debug!("{template}: bound types {cx}");

    Ok(MapReduceParts {
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

// ── Five-lambda template ────────────────────────────────────────────────────

/// A coordinator value computed before aggregation and carried across it in
/// the temporary state `T`.
enum Temporary<'v> {
    State,
    Step(&'v Step),
    /// A placed, non-value argument of an aggregation call.
    Argument(&'v Expr),
}

fn temporaries<'v>(view: &'v RoundView, aggregations: &[&'v Step]) -> Vec<Temporary<'v>> {
    let mut post: Vec<&Expr> = vec![&view.result];
    post.extend(
        view.steps
            .iter()
            .filter(|s| view.is_after_aggregation(&s.name) && !s.is_aggregation())
            .map(|s| &s.value),
    );

    let mut temps = Vec::new();
    if post.iter().any(|e| view.reads_state(e)) {
        temps.push(Temporary::State);
    }
    let referenced: BTreeSet<String> = post.iter().flat_map(|e| e.free_references()).collect();
    for step in &view.steps {
        if referenced.contains(&step.name)
            && !view.is_after_aggregation(&step.name)
            && step.boundary.is_none()
            && step.placement() == Some(Placement::Coordinator)
        {
            temps.push(Temporary::Step(step));
        }
    }
    for step in aggregations {
        if let Some(call) = &step.boundary {
            for extra in call.args.iter().skip(1) {
                if extra.ty.placement() == Some(Placement::Coordinator) {
                    temps.push(Temporary::Argument(extra));
                }
            }
        }
    }
    temps
}

fn with_temporaries<'v>(mut slice: Slice<'v>, temps: &[Temporary<'_>], source: &Expr) -> Slice<'v> {
    for (i, temp) in temps.iter().enumerate() {
        slice = match temp {
            Temporary::State => slice.with_state(field(source, i)),
            Temporary::Step(step) => slice.with_input(&step.name, field(source, i)),
            Temporary::Argument(_) => slice,
        };
    }
    slice
}

fn distribute_aggregate(mut view: RoundView) -> Result<DistributeAggregateParts, CompileError> {
    let template = Template::DistributeAggregate;
    let mut cx = TypeContext::new(template);
    let server_state = view.names.fresh("server_state");
    let broadcast_input = view.names.fresh("broadcast_input");
    let client_input = view.names.fresh("client_input");
    let aggregation_input = view.names.fresh("aggregation_input");
    let result_input = view.names.fresh("result_input");

    // signature
    let s = cx.bind("S", view.state.clone());
    let d = cx.bind("D", view.data.clone());
    let Some(x) = server_output(&view) else {
        return Err(mismatch(
            template,
            RoundStep::Signature,
            slots::SERVER_RESULT,
            format!(
                "round must return <S@SERVER,X@SERVER>, found {}",
                view.result.ty
            ),
        ));
    };
    let x = cx.bind("X", x);

    // broadcast
    debug!("{template}: broadcast step");
    let broadcasts = view.broadcasts();
    reject_late_broadcasts(&view, &broadcasts, slots::SERVER_TO_CLIENT_BROADCAST)?;
    let aggregations = view.aggregations();
    let temps = temporaries(&view, &aggregations);

    let state_ty = Type::at_coordinator(s.clone());
    let state_ref = Expr::reference(&server_state, state_ty.clone());
    let mut slice = Slice::new(&view, Mode::Placed, RoundStep::Broadcast, slots::SERVER_PREPARE)
        .with_state(state_ref.clone());
    let mut broadcast_values = Vec::with_capacity(broadcasts.len());
    for step in &broadcasts {
        broadcast_values.push(channel_value(&mut slice, step)?);
    }
    let mut temp_values = Vec::with_capacity(temps.len());
    for temp in &temps {
        temp_values.push(match temp {
            Temporary::State => state_ref.clone(),
            Temporary::Step(step) => {
                slice.value(&Expr::reference(&step.name, step.value.ty.clone()))?
            }
            Temporary::Argument(expr) => slice.value(expr)?,
        });
    }
    let b_i = cx.bind("B_I", tuple_type(&broadcast_values));
    let t = cx.bind("T", tuple_type(&temp_values));
    let candidate = slice.finish(
        (server_state, state_ty.clone()),
        Expr::tuple(vec![Expr::tuple(broadcast_values), Expr::tuple(temp_values)]),
    );
    let server_prepare = bind_slot(
        &candidate,
        Type::function(Some(state_ty), Type::tuple(vec![b_i.clone(), t.clone()])),
        Tier::Coordinator,
        slots::SERVER_PREPARE,
    )?;

    let b_param = Expr::reference(&broadcast_input, b_i.clone());
    let mut locals = Vec::with_capacity(broadcasts.len());
    let mut outputs = Vec::with_capacity(broadcasts.len());
    for (i, step) in broadcasts.iter().enumerate() {
        let call = intrinsics::broadcast(field(&b_param, i)).map_err(|e| {
            mismatch(template, RoundStep::Broadcast, slots::SERVER_TO_CLIENT_BROADCAST, e.message)
        })?;
        outputs.push(Expr::reference(&step.name, call.ty.clone()));
        locals.push((step.name.clone(), call));
    }
    let b_o = cx.bind("B_O", tuple_type(&outputs));
    let candidate = Expr::lambda(
        Some((broadcast_input, b_i.clone())),
        Expr::block(locals, Expr::tuple(outputs)),
    );
    let server_to_client_broadcast = bind_slot(
        &candidate,
        Type::function(Some(b_i), b_o.clone()),
        Tier::CrossTier,
        slots::SERVER_TO_CLIENT_BROADCAST,
    )?;

    // work
    debug!("{template}: work step");
    let w_ty = Type::tuple(vec![Type::at_participants(d), b_o]);
    let w = Expr::reference(&client_input, w_ty.clone());
    let slice = Slice::new(&view, Mode::Placed, RoundStep::Work, slots::CLIENT_WORK)
        .with_data(field(&w, 0));
    let mut slice = with_broadcasts(slice, &broadcasts, &field(&w, 1), true);
    let mut client_values = Vec::with_capacity(aggregations.len());
    for step in &aggregations {
        client_values.push(channel_value(&mut slice, step)?);
    }
    let a_i = cx.bind("A_I", tuple_type(&client_values));
    let candidate = slice.finish((client_input, w_ty.clone()), Expr::tuple(client_values));
    let client_work = bind_slot(
        &candidate,
        Type::function(Some(w_ty), a_i.clone()),
        Tier::Participants,
        slots::CLIENT_WORK,
    )?;

    // aggregation
    debug!("{template}: aggregation step");
    if aggregations.is_empty() {
        return Err(mismatch(
            template,
            RoundStep::Aggregation,
            slots::CLIENT_TO_SERVER_AGGREGATION,
            "no aggregation intrinsic found; the round never moves participant values to the coordinator",
        ));
    }
    let g_ty = Type::tuple(vec![t.clone(), a_i]);
    let g = Expr::reference(&aggregation_input, g_ty.clone());
    let carried = field(&g, 0);
    let slice = Slice::new(
        &view,
        Mode::Placed,
        RoundStep::Aggregation,
        slots::CLIENT_TO_SERVER_AGGREGATION,
    );
    let mut slice = with_temporaries(slice, &temps, &carried);
    let mut results = Vec::with_capacity(aggregations.len());
    for (j, step) in aggregations.iter().enumerate() {
        let Some(call) = &step.boundary else {
            continue;
        };
        let mut args = vec![field(&field(&g, 1), j)];
        for extra in call.args.iter().skip(1) {
            let position = temps
                .iter()
                .position(|t| matches!(t, Temporary::Argument(e) if std::ptr::eq(*e, extra)));
            args.push(match position {
                Some(i) => field(&carried, i),
                None => slice.value(extra)?,
            });
        }
        let argument = if args.len() == 1 {
            args.remove(0)
        } else {
            Expr::tuple(args)
        };
        let rebuilt = intrinsics::call(IntrinsicDef::CrossTier(call.kind), argument)
            .map_err(|e| slice.mismatch(e.message))?;
        results.push(slice.push_binding(step.name.clone(), rebuilt));
    }
    let a_o = cx.bind("A_O", tuple_type(&results));
    let candidate = slice.finish((aggregation_input, g_ty.clone()), Expr::tuple(results));
    let client_to_server_aggregation = bind_slot(
        &candidate,
        Type::function(Some(g_ty), a_o.clone()),
        Tier::CrossTier,
        slots::CLIENT_TO_SERVER_AGGREGATION,
    )?;

    // result
    debug!("{template}: result step");
    let r_ty = Type::tuple(vec![t, a_o]);
    let r = Expr::reference(&result_input, r_ty.clone());
    let slice = Slice::new(&view, Mode::Placed, RoundStep::Result, slots::SERVER_RESULT);
    let mut slice = with_temporaries(slice, &temps, &field(&r, 0));
    for (j, step) in aggregations.iter().enumerate() {
        slice = slice.with_input(&step.name, field(&field(&r, 1), j));
    }
    let result = slice.value(&view.result)?;
    let candidate = slice.finish((result_input, r_ty.clone()), result);
    let server_result = bind_slot(
        &candidate,
        Type::function(
            Some(r_ty),
            Type::tuple(vec![Type::at_coordinator(s), Type::at_coordinator(x)]),
        ),
        Tier::Coordinator,
        slots::SERVER_RESULT,
    )?;
    debug!("{template}: bound types {cx}");

    Ok(DistributeAggregateParts {
        server_prepare,
        server_to_client_broadcast,
        client_work,
        client_to_server_aggregation,
        server_result,
    })
}

// ── Broadcast template ──────────────────────────────────────────────────────

fn broadcast(mut view: RoundView) -> Result<BroadcastParts, CompileError> {
    let template = Template::Broadcast;
    let mut cx = TypeContext::new(template);
    let state_name = view.names.fresh("state");
    let arg_name = view.names.fresh("arg");

    // signature
    cx.bind("S", view.state.clone());
    let d = cx.bind("D", view.data.clone());
    let output = match (view.result.ty.placement(), view.result.ty.federated_member()) {
        (Some(Placement::Participants), Some(member)) => member.clone(),
        _ => {
            return Err(mismatch(
                template,
                RoundStep::Signature,
                slots::CLIENT_PROCESSING,
                format!("round must return {{O}}@CLIENTS, found {}", view.result.ty),
            ))
        }
    };
    let o = cx.bind("O", output);

    // broadcast
    let broadcasts = view.broadcasts();
    reject_late_broadcasts(&view, &broadcasts, slots::COMPUTE_SERVER_CONTEXT)?;
    let compute_server_context = server_context(
        &view,
        &mut cx,
        &broadcasts,
        slots::COMPUTE_SERVER_CONTEXT,
        &state_name,
    )?;
    let c = cx.ty("C");

    // work
    debug!("{template}: work step");
    if let Some(step) = view.aggregations().first() {
        let kind = step.kind().map(|k| k.to_string()).unwrap_or_default();
        return Err(mismatch(
            template,
            RoundStep::Work,
            slots::CLIENT_PROCESSING,
            format!("aggregation `{}` ({kind}) has no place in a broadcast-only round", step.name),
        ));
    }
    let arg_ty = Type::tuple(vec![c, d]);
    let arg = Expr::reference(&arg_name, arg_ty.clone());
    let slice = Slice::new(&view, Mode::Lowered, RoundStep::Work, slots::CLIENT_PROCESSING)
        .with_data(field(&arg, 1));
    let mut slice = with_broadcasts(slice, &broadcasts, &field(&arg, 0), false);

    // result
    let output = slice.value(&view.result)?;
    let candidate = slice.finish((arg_name, arg_ty.clone()), output);
    let client_processing = bind_slot(
        &candidate,
        Type::function(Some(arg_ty), o),
        Tier::Unplaced,
        slots::CLIENT_PROCESSING,
    )?;
    debug!("{template}: bound types {cx}");

    Ok(BroadcastParts {
        compute_server_context,
        client_processing,
    })
}

// ── Shared steps ────────────────────────────────────────────────────────────

fn mismatch(
    template: Template,
    step: RoundStep,
    slot: &str,
    detail: impl Into<String>,
) -> CompileError {
    ShapeMismatchError {
        template,
        step,
        slot: slot.to_string(),
        detail: detail.into(),
    }
    .into()
}

/// Extract `candidate` for `slot` and hand back its payload.
fn bind_slot(candidate: &Expr, expected: Type, tier: Tier, slot: &str) -> Result<Expr, CompileError> {
    let block = local_block::extract(candidate, &expected, tier, slot)?;
    debug!("bound `{slot}` : {expected}");
    Ok(block.payload().clone())
}

/// `X` when the round returns `<S@SERVER, X@SERVER>`.
fn server_output(view: &RoundView) -> Option<Type> {
    match view.result.ty.as_struct() {
        Some([s, x])
            if *s == Type::at_coordinator(view.state.clone())
                && x.placement() == Some(Placement::Coordinator) =>
        {
            x.federated_member().cloned()
        }
        _ => None,
    }
}

fn reject_late_broadcasts(
    view: &RoundView,
    broadcasts: &[&Step],
    slot: &str,
) -> Result<(), CompileError> {
    debug!("{}: broadcast step", view.template);
    match broadcasts.iter().find(|b| view.is_after_aggregation(&b.name)) {
        Some(late) => Err(mismatch(
            view.template,
            RoundStep::Broadcast,
            slot,
            format!(
                "broadcast `{}` depends on an aggregation result; every broadcast must precede aggregation",
                late.name
            ),
        )),
        None => Ok(()),
    }
}

/// Lower the broadcast arguments into an unplaced `S -> C` slot.
fn server_context(
    view: &RoundView,
    cx: &mut TypeContext,
    broadcasts: &[&Step],
    slot: &'static str,
    state_name: &str,
) -> Result<Expr, CompileError> {
    let state_ty = view.state.clone();
    let mut slice = Slice::new(view, Mode::Lowered, RoundStep::Broadcast, slot)
        .with_state(Expr::reference(state_name, state_ty.clone()));
    let mut values = Vec::with_capacity(broadcasts.len());
    for step in broadcasts {
        values.push(channel_value(&mut slice, step)?);
    }
    let context = if values.len() == 1 {
        values.remove(0)
    } else {
        Expr::tuple(values)
    };
    let c = cx.bind("C", context.ty.clone());
    let candidate = slice.finish((state_name.to_string(), state_ty.clone()), context);
    bind_slot(&candidate, Type::function(Some(state_ty), c), Tier::Unplaced, slot)
}

/// Make each broadcast result available through `source`: the value itself
/// for a single broadcast (unless `always_index`), its elements otherwise.
fn with_broadcasts<'v>(
    mut slice: Slice<'v>,
    broadcasts: &[&Step],
    source: &Expr,
    always_index: bool,
) -> Slice<'v> {
    if broadcasts.len() == 1 && !always_index {
        return slice.with_input(&broadcasts[0].name, source.clone());
    }
    for (i, step) in broadcasts.iter().enumerate() {
        slice = slice.with_input(&step.name, field(source, i));
    }
    slice
}

/// The first (value) argument of a boundary call, rewritten into the slice.
fn channel_value(slice: &mut Slice<'_>, step: &Step) -> Result<Expr, CompileError> {
    let Some(value) = step.boundary.as_ref().and_then(|b| b.args.first()) else {
        return Err(slice.mismatch(format!("`{}` has no value argument", step.name)));
    };
    slice.value(value)
}

/// Argument `index` of an aggregation call as a static slot.
fn static_slot(
    view: &RoundView,
    step: &Step,
    index: usize,
    slot: &'static str,
    nullary: bool,
) -> Result<Expr, CompileError> {
    let mut slice = Slice::new(view, Mode::Lowered, RoundStep::Aggregation, slot);
    let Some(expr) = step.boundary.as_ref().and_then(|b| b.args.get(index)) else {
        return Err(slice.mismatch(format!("`{}` is missing argument {index}", step.name)));
    };
    let value = slice.value(expr)?;
    Ok(if nullary {
        slice.finish_nullary(value)
    } else {
        slice.finish_value(value)
    })
}

fn result_of(function: &Expr) -> Type {
    function
        .ty
        .as_function()
        .map(|(_, r)| r.clone())
        .unwrap_or_else(|| function.ty.clone())
}

fn tuple_type(values: &[Expr]) -> Type {
    Type::tuple(values.iter().map(|e| e.ty.clone()).collect())
}

/// `source[index]`, typed from `source`.
pub(crate) fn field(source: &Expr, index: usize) -> Expr {
    let ty = source
        .ty
        .as_struct()
        .and_then(|e| e.get(index))
        .cloned()
        .unwrap_or_else(Type::empty);
    Expr::new(
        ExprKind::Selection {
            source: Box::new(source.clone()),
            index,
        },
        ty,
    )
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elaborate::parse_expr;

    const SUM_ROUND: &str = "(p: <int32@SERVER,{int32}@CLIENTS> ->
        let
          c = federated_broadcast(p[0]),
          v = federated_map(<(x: <int32,int32> -> x[0]), federated_zip_at_clients(<p[1], c>)>),
          total = federated_aggregate(<v, 0, add<int32>, add<int32>, (a: int32 -> a)>),
          new_state = federated_apply(<add<int32>, federated_zip_at_server(<p[0], total>)>)
        in <new_state, federated_value_at_server(<>)>)";

    fn parts(src: &str, template: Template) -> FormParts {
        match_round(&parse_expr(src).unwrap(), template).unwrap()
    }

    fn shape_error(src: &str, template: Template) -> ShapeMismatchError {
        match match_round(&parse_expr(src).unwrap(), template) {
            Err(CompileError::ShapeMismatch(e)) => e,
            other => panic!("expected a shape mismatch, got {other:?}"),
        }
    }

    #[test]
    fn seven_function_slots() {
        let FormParts::MapReduce(p) = parts(SUM_ROUND, Template::MapReduce) else {
            panic!("wrong template");
        };
        assert_eq!(p.prepare.to_string(), "(state: int32 -> state)");
        assert_eq!(p.zero.to_string(), "( -> 0)");
        assert_eq!(p.accumulate.to_string(), "add<int32>");
        assert_eq!(p.report.to_string(), "(a: int32 -> a)");
        assert_eq!(p.secure_sum_bitwidth.to_string(), "( -> <>)");
        assert_eq!(
            p.work.ty.to_string(),
            "(<int32,int32> -> <int32,<<>,<>,<>>>)"
        );
        let update = p.update.to_string();
        assert!(update.contains("zip_at_server = <update[0],update[1][0]>"));
        assert!(update.contains("new_state = add<int32>(zip_at_server)"));
    }

    #[test]
    fn missing_aggregation_names_zero() {
        let src = "(p: <int32@SERVER,{int32}@CLIENTS> -> <p[0], federated_value_at_server(1)>)";
        let e = shape_error(src, Template::MapReduce);
        assert_eq!(e.slot, "zero");
        assert_eq!(e.step, RoundStep::Aggregation);
    }

    #[test]
    fn missing_aggregation_names_aggregation_lambda() {
        let src = "(p: <int32@SERVER,{int32}@CLIENTS> -> <p[0], federated_value_at_server(1)>)";
        let e = shape_error(src, Template::DistributeAggregate);
        assert_eq!(e.slot, "client_to_server_aggregation");
    }

    #[test]
    fn duplicate_aggregate_is_rejected() {
        let src = "(p: <int32@SERVER,{int32}@CLIENTS> ->
            let
              a = federated_aggregate(<p[1], 0, add<int32>, add<int32>, (x: int32 -> x)>),
              b = federated_aggregate(<p[1], 0, add<int32>, add<int32>, (x: int32 -> x)>)
            in <a, b>)";
        let e = shape_error(src, Template::MapReduce);
        assert_eq!(e.slot, "zero");
        assert!(e.detail.contains("2 calls"));
    }

    #[test]
    fn secure_sum_only_round_gets_placeholders() {
        let src = "(p: <int32@SERVER,{int32}@CLIENTS> ->
            let total = federated_secure_sum_bitwidth(<p[1], 8>)
            in <p[0], total>)";
        let FormParts::MapReduce(p) = parts(src, Template::MapReduce) else {
            panic!("wrong template");
        };
        assert_eq!(p.zero.to_string(), "( -> <>)");
        assert_eq!(p.accumulate.to_string(), "(a: <<>,<>> -> a[0])");
        assert_eq!(p.secure_sum_bitwidth.to_string(), "( -> 8)");
        assert_eq!(p.work.ty.to_string(), "(<int32,<>> -> <<>,<int32,<>,<>>>)");
        assert_eq!(
            p.update.to_string(),
            "(update: <int32,<<>,<int32,<>,<>>>> -> <update[0],update[1][1][0]>)"
        );
    }

    #[test]
    fn secure_parameter_must_be_static() {
        let src = "(p: <int32@SERVER,{int32}@CLIENTS> ->
            let total = federated_secure_sum_bitwidth(<p[1], p[0]>)
            in <p[0], total>)";
        let e = shape_error(src, Template::MapReduce);
        assert_eq!(e.slot, "secure_sum_bitwidth");
        assert!(e.detail.contains("must be static"));
    }

    #[test]
    fn broadcast_after_aggregation_is_rejected() {
        let src = "(p: <int32@SERVER,{int32}@CLIENTS> ->
            let
              total = federated_aggregate(<p[1], 0, add<int32>, add<int32>, (x: int32 -> x)>),
              again = federated_broadcast(total)
            in <total, total>)";
        let e = shape_error(src, Template::MapReduce);
        assert_eq!(e.slot, "prepare");
        assert_eq!(e.step, RoundStep::Broadcast);
    }

    #[test]
    fn five_lambda_slices_keep_placements() {
        let FormParts::DistributeAggregate(p) = parts(SUM_ROUND, Template::DistributeAggregate)
        else {
            panic!("wrong template");
        };
        assert_eq!(
            p.server_prepare.to_string(),
            "(server_state: int32@SERVER -> let value_at_server = federated_value_at_server(<>) in <<server_state>,<server_state,value_at_server>>)"
        );
        assert_eq!(
            p.server_to_client_broadcast.to_string(),
            "(broadcast_input: <int32@SERVER> -> let c = federated_broadcast(broadcast_input[0]) in <c>)"
        );
        assert!(p
            .client_work
            .to_string()
            .contains("federated_zip_at_clients(<client_input[0],client_input[1][0]>)"));
        assert!(p
            .client_to_server_aggregation
            .to_string()
            .contains("federated_aggregate(<aggregation_input[1][0],0,add<int32>,add<int32>,(a: int32 -> a)>)"));
        assert!(p
            .server_result
            .to_string()
            .contains("federated_zip_at_server(<result_input[0][0],result_input[1][0]>)"));
    }

    #[test]
    fn server_side_secure_parameter_travels_in_temporary_state() {
        let src = "(p: <int32@SERVER,{int32}@CLIENTS> ->
            let total = federated_secure_sum_bitwidth(<p[1], federated_value_at_server(8)>)
            in <p[0], total>)";
        let FormParts::DistributeAggregate(p) = parts(src, Template::DistributeAggregate) else {
            panic!("wrong template");
        };
        assert!(p
            .server_prepare
            .to_string()
            .contains("federated_value_at_server(8)"));
        assert!(p
            .client_to_server_aggregation
            .to_string()
            .contains("federated_secure_sum_bitwidth(<aggregation_input[1][0],aggregation_input[0][1]>)"));
    }

    #[test]
    fn broadcast_template() {
        let src = "(p: <int32@SERVER,{int32}@CLIENTS> ->
            let c = federated_broadcast(p[0])
            in federated_map(<add<int32>, federated_zip_at_clients(<p[1], c>)>))";
        let FormParts::Broadcast(p) = parts(src, Template::Broadcast) else {
            panic!("wrong template");
        };
        assert_eq!(p.compute_server_context.to_string(), "(state: int32 -> state)");
        assert_eq!(
            p.client_processing.ty.to_string(),
            "(<int32,int32> -> int32)"
        );
    }

    #[test]
    fn broadcast_template_requires_participant_output() {
        let e = shape_error(SUM_ROUND, Template::Broadcast);
        assert_eq!(e.slot, "client_processing");
        assert_eq!(e.step, RoundStep::Signature);
    }

    #[test]
    fn broadcast_template_rejects_aggregation() {
        let src = "(p: <int32@SERVER,{int32}@CLIENTS> ->
            let
              c = federated_broadcast(p[0]),
              t = federated_aggregate(<p[1], 0, add<int32>, add<int32>, (x: int32 -> x)>)
            in federated_map(<add<int32>, federated_zip_at_clients(<p[1], c>)>))";
        let e = shape_error(src, Template::Broadcast);
        assert_eq!(e.slot, "client_processing");
        assert_eq!(e.step, RoundStep::Work);
    }

    #[test]
    fn nested_broadcast_is_lifted_into_its_own_step() {
        let src = "(p: <int32@SERVER,{int32}@CLIENTS> ->
            let total = federated_aggregate(<federated_broadcast(p[0]), 0, add<int32>, add<int32>, (x: int32 -> x)>)
            in <p[0], total>)";
        let FormParts::MapReduce(p) = parts(src, Template::MapReduce) else {
            panic!("wrong template");
        };
        assert_eq!(p.work.to_string(), "(arg: <int32,int32> -> <arg[1],<<>,<>,<>>>)");
    }
}
