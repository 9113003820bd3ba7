// synthesize.rs — Form synthesizer
//
// Rebuilds a round computation from a validated form by wiring its slots
// through the intrinsics in template order. The output is a flat block in
// the canonical shape the matcher accepts, so synthesis and compilation
// compose.
//
// Preconditions: the form is validated (forms cannot be built otherwise).
// Postconditions: the round type-checks as the form's `type_signature()`.
// Failure modes: `SynthesisError` naming the slot whose wiring failed.
// Side effects: `debug!` once per synthesized round.

use std::collections::HashMap;

use log::debug;

use crate::error::{SynthesisError, TypeError};
use crate::forms::{slots, BroadcastForm, DistributeAggregateForm, Form, MapReduceForm};
use crate::intrinsics::{self, IntrinsicDef, IntrinsicKind};
use crate::ir::{Expr, ExprKind};
use crate::local_block::LocalBlock;
use crate::names::NameAllocator;
use crate::types::Type;

/// Rebuild the round computation a form factors.
pub fn synthesize(form: &Form) -> Result<Expr, SynthesisError> {
    let round = match form {
        Form::MapReduce(f) => map_reduce(f)?,
        Form::DistributeAggregate(f) => distribute_aggregate(f)?,
        Form::Broadcast(f) => broadcast(f)?,
    };
    let expected = form.type_signature();
    if round.ty != expected {
        return Err(SynthesisError::new(
            "round",
            format!("synthesized {} but the form describes {expected}", round.ty),
        ));
    }
    round
        .typecheck()
        .map_err(|e| SynthesisError::new("round", e.message))?;
    debug!("synthesized {} round : {}", form.template(), round.ty);
    Ok(round)
}

// ── Block builder ───────────────────────────────────────────────────────────

/// Accumulates the locals of the synthesized round.
struct Builder {
    names: NameAllocator,
    locals: Vec<(String, Expr)>,
    slot: &'static str,
}

impl Builder {
    fn new<'a>(slots: impl IntoIterator<Item = &'a LocalBlock>) -> Self {
        let mut names = NameAllocator::new();
        for block in slots {
            names.reserve_all(block.payload());
        }
        Self {
            names,
            locals: Vec::new(),
            slot: "round",
        }
    }

    /// Attribute subsequent failures to `slot`.
    fn at(&mut self, slot: &'static str) -> &mut Self {
        self.slot = slot;
        self
    }

    fn fail(&self, e: TypeError) -> SynthesisError {
        SynthesisError::new(self.slot, e.message)
    }

    /// Bind `value` to a fresh local named after `base`.
    fn bind(&mut self, base: &str, value: Result<Expr, TypeError>) -> Result<Expr, SynthesisError> {
        let value = value.map_err(|e| self.fail(e))?;
        let name = self.names.fresh(base);
        let reference = Expr::reference(&name, value.ty.clone());
        self.locals.push((name, value));
        Ok(reference)
    }

    /// Splice `function` applied to `argument` into the block: its locals are
    /// renamed fresh and its parameter replaced by `argument`. Returns the
    /// rewritten result expression.
    fn inline(&mut self, function: &Expr, argument: Expr) -> Result<Expr, SynthesisError> {
        let ExprKind::Lambda { parameter, body } = &function.kind else {
            let call = Expr::call(function.clone(), Some(argument));
            return self.bind(self.slot, call);
        };
        let mut map = HashMap::new();
        if let Some(name) = parameter {
            map.insert(name.clone(), argument);
        }
        let (locals, result) = match &body.kind {
            ExprKind::Block { locals, result } => (locals.as_slice(), result.as_ref()),
            _ => (&[][..], body.as_ref()),
        };
        for (name, value) in locals {
            let value = value.substitute(&map);
            let fresh = self.names.fresh(name);
            map.insert(name.clone(), Expr::reference(&fresh, value.ty.clone()));
            self.locals.push((fresh, value));
        }
        Ok(result.substitute(&map))
    }

    fn finish(self, parameter: (String, Type), result: Expr) -> Expr {
        Expr::lambda(Some(parameter), Expr::block(self.locals, result))
    }
}

/// `element[index]`, folding selections from tuple literals.
fn project(source: &Expr, index: usize) -> Result<Expr, TypeError> {
    if let ExprKind::Struct(elements) = &source.kind {
        if let Some(element) = elements.get(index) {
            return Ok(element.clone());
        }
    }
    Expr::select(source.clone(), index)
}

/// `(o: ty -> o[path...])`.
fn selector(ty: &Type, path: &[usize]) -> Result<Expr, TypeError> {
    let mut body = Expr::reference("o", ty.clone());
    for index in path {
        body = Expr::select(body, *index)?;
    }
    Ok(Expr::lambda(Some(("o".to_string(), ty.clone())), body))
}

/// The value a no-parameter block produces, inlined when possible.
fn nullary_value(block: &LocalBlock) -> Result<Expr, TypeError> {
    match &block.payload().kind {
        ExprKind::Lambda {
            parameter: None,
            body,
        } => Ok(body.as_ref().clone()),
        _ => Expr::call(block.payload().clone(), None),
    }
}

fn round_parameter(signature: &Type) -> Result<Type, SynthesisError> {
    signature
        .as_function()
        .and_then(|(p, _)| p.cloned())
        .ok_or_else(|| SynthesisError::new("round", format!("form signature {signature} has no parameter")))
}

// ── Seven-function form ─────────────────────────────────────────────────────

fn map_reduce(form: &MapReduceForm) -> Result<Expr, SynthesisError> {
    let mut b = Builder::new(form.slots().into_iter().map(|(_, block)| block));
    let param_ty = round_parameter(&form.type_signature())?;
    let p_name = b.names.fresh("p");
    let p = Expr::reference(&p_name, param_ty.clone());
    let state = project(&p, 0).map_err(|e| b.fail(e))?;
    let data = project(&p, 1).map_err(|e| b.fail(e))?;

    // broadcast + work
    let work = form.work().payload().clone();
    let client_output = if form.broadcast_type().is_empty_struct() {
        b.at(slots::WORK);
        let d = form.client_data_type().clone();
        let d_ref = Expr::reference("d", d.clone());
        let body = Expr::call(work, Some(Expr::tuple(vec![d_ref, Expr::empty()])))
            .map_err(|e| b.fail(e))?;
        let per_client = Expr::lambda(Some(("d".to_string(), d)), body);
        b.bind("client_output", intrinsics::map(per_client, data))?
    } else {
        b.at(slots::PREPARE);
        let prepared = b.bind(
            "prepared",
            intrinsics::apply(form.prepare().payload().clone(), state.clone()),
        )?;
        let context = b.bind("context", intrinsics::broadcast(prepared))?;
        b.at(slots::WORK);
        let client_input = b.bind(
            "client_input",
            intrinsics::zip_at_clients(vec![data, context]),
        )?;
        b.bind("client_output", intrinsics::map(work, client_input))?
    };
    let work_out = form.work().result_type().clone();

    // aggregation
    let mut empty_at_server: Option<Expr> = None;
    let mut empty = |b: &mut Builder| -> Result<Expr, SynthesisError> {
        if let Some(e) = &empty_at_server {
            return Ok(e.clone());
        }
        let e = b.bind("empty", intrinsics::value_at_server(Expr::empty()))?;
        empty_at_server = Some(e.clone());
        Ok(e)
    };

    b.at(slots::ZERO);
    let skip_aggregate =
        form.report_type().is_empty_struct() && form.accumulator_type().is_empty_struct();
    let aggregate = if skip_aggregate {
        empty(&mut b)?
    } else {
        let client_update = b.bind(
            "client_update",
            selector(&work_out, &[0]).and_then(|f| intrinsics::map(f, client_output.clone())),
        )?;
        let zero = nullary_value(form.zero()).map_err(|e| b.fail(e))?;
        b.at(slots::ACCUMULATE);
        b.bind(
            "aggregate",
            intrinsics::call(
                IntrinsicDef::CrossTier(IntrinsicKind::Aggregate),
                Expr::tuple(vec![
                    client_update,
                    zero,
                    form.accumulate().payload().clone(),
                    form.merge().payload().clone(),
                    form.report().payload().clone(),
                ]),
            ),
        )?
    };

    let channels: Vec<Type> = form.secure_type().as_struct().map(<[Type]>::to_vec).unwrap_or_default();
    let kinds = [
        IntrinsicKind::SecureSumBitwidth,
        IntrinsicKind::SecureSum,
        IntrinsicKind::SecureModularSum,
    ];
    let mut sums = Vec::with_capacity(kinds.len());
    for (channel, kind) in kinds.into_iter().enumerate() {
        let slot = slots::SECURE_PARAMETERS[channel];
        b.at(slot);
        let channel_ty = channels.get(channel).cloned().unwrap_or_else(Type::empty);
        if channel_ty.is_empty_struct() {
            sums.push(empty(&mut b)?);
            continue;
        }
        let Some(parameter) = form.secure_parameter(channel) else {
            return Err(SynthesisError::new(slot, "missing secure-sum parameter block"));
        };
        let values = b.bind(
            "secure_values",
            selector(&work_out, &[1, channel]).and_then(|f| intrinsics::map(f, client_output.clone())),
        )?;
        let parameter = nullary_value(parameter).map_err(|e| b.fail(e))?;
        let base = kind.uri().trim_start_matches("federated_");
        let sum = b.bind(
            base,
            intrinsics::call(
                IntrinsicDef::CrossTier(kind),
                Expr::tuple(vec![values, parameter]),
            ),
        )?;
        sums.push(sum);
    }

    // update
    b.at(slots::UPDATE);
    let secure = b.bind("secure", intrinsics::zip_at_server(sums))?;
    let global = b.bind("global_update", intrinsics::zip_at_server(vec![aggregate, secure]))?;
    let update_input = b.bind("update_input", intrinsics::zip_at_server(vec![state, global]))?;
    let updated = b.bind(
        "updated",
        intrinsics::apply(form.update().payload().clone(), update_input),
    )?;
    let update_out = form.update().result_type().clone();
    let new_state = b.bind(
        "new_state",
        selector(&update_out, &[0]).and_then(|f| intrinsics::apply(f, updated.clone())),
    )?;
    let output = b.bind(
        "output",
        selector(&update_out, &[1]).and_then(|f| intrinsics::apply(f, updated)),
    )?;
    Ok(b.finish((p_name, param_ty), Expr::tuple(vec![new_state, output])))
}

// ── Five-lambda form ────────────────────────────────────────────────────────

fn distribute_aggregate(form: &DistributeAggregateForm) -> Result<Expr, SynthesisError> {
    let mut b = Builder::new(form.slots().into_iter().map(|(_, block)| block));
    let param_ty = round_parameter(&form.type_signature())?;
    let p_name = b.names.fresh("p");
    let p = Expr::reference(&p_name, param_ty.clone());
    let state = project(&p, 0).map_err(|e| b.fail(e))?;
    let data = project(&p, 1).map_err(|e| b.fail(e))?;

    b.at(slots::SERVER_PREPARE);
    let prepared = b.inline(form.server_prepare().payload(), state)?;
    let broadcast_input = project(&prepared, 0).map_err(|e| b.fail(e))?;
    let carried = project(&prepared, 1).map_err(|e| b.fail(e))?;

    b.at(slots::SERVER_TO_CLIENT_BROADCAST);
    let broadcast_output = b.inline(form.server_to_client_broadcast().payload(), broadcast_input)?;

    b.at(slots::CLIENT_WORK);
    let client_values = b.inline(
        form.client_work().payload(),
        Expr::tuple(vec![data, broadcast_output]),
    )?;

    b.at(slots::CLIENT_TO_SERVER_AGGREGATION);
    let aggregates = b.inline(
        form.client_to_server_aggregation().payload(),
        Expr::tuple(vec![carried.clone(), client_values]),
    )?;

    b.at(slots::SERVER_RESULT);
    let result = b.inline(
        form.server_result().payload(),
        Expr::tuple(vec![carried, aggregates]),
    )?;
    Ok(b.finish((p_name, param_ty), result))
}

// ── Broadcast form ──────────────────────────────────────────────────────────

fn broadcast(form: &BroadcastForm) -> Result<Expr, SynthesisError> {
    let mut b = Builder::new(form.slots().into_iter().map(|(_, block)| block));
    let param_ty = round_parameter(&form.type_signature())?;
    let p_name = b.names.fresh("p");
    let p = Expr::reference(&p_name, param_ty.clone());
    let state = project(&p, 0).map_err(|e| b.fail(e))?;
    let data = project(&p, 1).map_err(|e| b.fail(e))?;

    let processing = form.client_processing().payload().clone();
    let context_ty = form.compute_server_context().result_type().clone();
    let output = if context_ty.is_empty_struct() {
        b.at(slots::CLIENT_PROCESSING);
        let d = form
            .client_processing()
            .parameter_type()
            .and_then(Type::as_struct)
            .and_then(|e| e.get(1))
            .cloned()
            .unwrap_or_else(Type::empty);
        let d_ref = Expr::reference("d", d.clone());
        let body = Expr::call(processing, Some(Expr::tuple(vec![Expr::empty(), d_ref])))
            .map_err(|e| b.fail(e))?;
        let per_client = Expr::lambda(Some(("d".to_string(), d)), body);
        b.bind("output", intrinsics::map(per_client, data))?
    } else {
        b.at(slots::COMPUTE_SERVER_CONTEXT);
        let prepared = b.bind(
            "prepared",
            intrinsics::apply(form.compute_server_context().payload().clone(), state),
        )?;
        let context = b.bind("context", intrinsics::broadcast(prepared))?;
        b.at(slots::CLIENT_PROCESSING);
        let client_input = b.bind(
            "client_input",
            intrinsics::zip_at_clients(vec![context, data]),
        )?;
        b.bind("output", intrinsics::map(processing, client_input))?
    };
    Ok(b.finish((p_name, param_ty), output))
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elaborate::parse_expr;
    use crate::forms::{MapReduceParts, Template};
    use crate::matcher::match_round;

    fn e(src: &str) -> Expr {
        parse_expr(src).unwrap()
    }

    fn sum_form() -> Form {
        Form::MapReduce(
            MapReduceForm::new(MapReduceParts {
                prepare: e("(s: int32 -> s)"),
                work: e("(a: <int32,int32> -> <add<int32>(a), <<>,<>,<>>>)"),
                zero: e("( -> 0)"),
                accumulate: e("add<int32>"),
                merge: e("add<int32>"),
                report: e("(x: int32 -> x)"),
                secure_sum_bitwidth: e("( -> <>)"),
                secure_sum_max_input: e("( -> <>)"),
                secure_modular_sum_modulus: e("( -> <>)"),
                update: e("(u: <int32,<int32,<<>,<>,<>>>> -> <u[1][0], <>>)"),
            })
            .unwrap(),
        )
    }

    #[test]
    fn seven_function_round_has_form_signature() {
        let form = sum_form();
        let round = synthesize(&form).unwrap();
        assert_eq!(round.ty, form.type_signature());
        let text = round.to_string();
        assert!(text.contains("federated_broadcast(prepared)"));
        assert!(text.contains("federated_aggregate(<client_update,0,add<int32>,add<int32>,(x: int32 -> x)>)"));
        assert!(!text.contains("federated_secure_sum"));
    }

    #[test]
    fn synthesized_round_matches_again() {
        let form = sum_form();
        let round = synthesize(&form).unwrap();
        assert!(match_round(&round, Template::MapReduce).is_ok());
        assert!(match_round(&round, Template::DistributeAggregate).is_ok());
    }

    #[test]
    fn five_lambda_round_is_flat() {
        let round = e("(p: <int32@SERVER,{int32}@CLIENTS> ->
            let
              c = federated_broadcast(p[0]),
              total = federated_aggregate(<federated_map(<add<int32>, federated_zip_at_clients(<p[1], c>)>), 0, add<int32>, add<int32>, (a: int32 -> a)>)
            in <p[0], total>)");
        let form = crate::compile::compile(&round, Template::DistributeAggregate).unwrap();
        let rebuilt = synthesize(&form).unwrap();
        assert_eq!(rebuilt.ty, round.ty);
        let ExprKind::Lambda { body, .. } = &rebuilt.kind else {
            panic!("not a lambda");
        };
        let ExprKind::Block { locals, .. } = &body.kind else {
            panic!("not a flat block");
        };
        assert!(locals.iter().all(|(_, v)| !matches!(v.kind, ExprKind::Block { .. })));
    }

    #[test]
    fn broadcast_without_context_maps_directly() {
        let form = Form::Broadcast(
            BroadcastForm::new(crate::forms::BroadcastParts {
                compute_server_context: e("(s: int32 -> <>)"),
                client_processing: e("(a: <<>,int32> -> a[1])"),
            })
            .unwrap(),
        );
        let round = synthesize(&form).unwrap();
        assert!(!round.to_string().contains("federated_broadcast"));
        assert_eq!(round.ty.to_string(), "(<int32@SERVER,{int32}@CLIENTS> -> {int32}@CLIENTS)");
    }
}
