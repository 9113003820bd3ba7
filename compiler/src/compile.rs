// compile.rs — Forward entry points
//
// round → placement classifier → intrinsic recognizer → shape matcher →
// form validator → form. Each stage either succeeds completely or reports
// the first failure; nothing is partially committed.
//
// Preconditions: the round is normalized (see `region::RoundView`).
// Postconditions: a returned form is validated and its type signature equals
//   the round's type.
// Failure modes: any `CompileError` variant.
// Side effects: `debug!` per stage, `info!` on success.

use log::{debug, info};

use crate::error::{CompileError, ShapeMismatchError, RoundStep};
use crate::forms::{Form, Template};
use crate::intrinsics::{self, IntrinsicDef, LocalIntrinsic};
use crate::ir::{Expr, ExprKind};
use crate::local_block::{self, LocalBlock};
use crate::matcher;
use crate::placement::{self, Tier};
use crate::types::{Placement, Type};

/// Compile `round` into the form described by `template`.
pub fn compile(round: &Expr, template: Template) -> Result<Form, CompileError> {
    round.typecheck()?;
    let tiers = placement::classify(round)?;
    debug!("{template}: round classified as {}", tiers.tier);
    let boundaries = intrinsics::collect(round)?;
    debug!("{template}: {} cross-tier call(s)", boundaries.len());

    let parts = matcher::match_round(round, template)?;
    let form = Form::from_parts(parts)?;
    if form.type_signature() != round.ty {
        return Err(ShapeMismatchError {
            template,
            step: RoundStep::Result,
            slot: "round".to_string(),
            detail: format!(
                "form describes {} but the round has type {}",
                form.type_signature(),
                round.ty
            ),
        }
        .into());
    }
    info!("compiled {template} form : {}", form.type_signature());
    Ok(form)
}

/// Whether `round` compiles to `template`, without keeping the form.
pub fn check_compatible(round: &Expr, template: Template) -> Result<(), CompileError> {
    compile(round, template).map(|_| ())
}

/// Turn a state initializer `( -> S@SERVER)` into the unplaced `( -> S)`
/// block backends run to produce the first state.
///
/// The initializer body must reduce to `federated_value_at_server(e)`,
/// optionally behind unplaced locals.
pub fn extract_state_initialization(init: &Expr) -> Result<LocalBlock, CompileError> {
    init.typecheck()?;
    let state = match init.ty.as_function() {
        Some((None, result)) if result.placement() == Some(Placement::Coordinator) => result
            .federated_member()
            .cloned()
            .unwrap_or_else(Type::empty),
        _ => {
            return Err(crate::error::TypeSignatureMismatchError {
                slot: "initialize".to_string(),
                expected: Type::function(None, Type::at_coordinator(Type::empty())),
                actual: init.ty.clone(),
            }
            .into())
        }
    };
    let candidate = match &init.kind {
        ExprKind::Lambda {
            parameter: None,
            body,
        } => unplace(body).map(|value| Expr::lambda(None, value)),
        _ => None,
    };
    let candidate = candidate.unwrap_or_else(|| init.clone());
    let block = local_block::extract(
        &candidate,
        &Type::function(None, state),
        Tier::Unplaced,
        "initialize",
    )?;
    Ok(block)
}

/// `federated_value_at_server(e)` → `e`, looking through a block result.
fn unplace(body: &Expr) -> Option<Expr> {
    match &body.kind {
        ExprKind::Block { locals, result } => {
            let inner = unplace(result)?;
            Some(Expr::block(locals.clone(), inner))
        }
        ExprKind::Call {
            function,
            argument: Some(argument),
        } => match &function.kind {
            ExprKind::Intrinsic { uri }
                if IntrinsicDef::from_uri(uri)
                    == Some(IntrinsicDef::Local(LocalIntrinsic::ValueAtServer)) =>
            {
                Some(argument.as_ref().clone())
            }
            _ => None,
        },
        _ => None,
    }
}
