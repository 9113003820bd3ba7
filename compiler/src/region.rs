// region.rs — Canonical round view and per-slot region slicing
//
// `RoundView` normalizes a round into a flat list of placed steps (one per
// intrinsic call) plus a result expression. `Slice` cuts the region a slot
// needs out of that view, either keeping placements (five-lambda form) or
// lowering them away (seven-function and broadcast forms).
//
// Preconditions: the round is well-typed and classified without error.
// Postconditions: every step value is a call with a placed result; step
//   names are unique; unplaced plumbing locals have been inlined.
// Failure modes: `ShapeMismatchError` for non-canonical rounds or regions
//   that depend on values unavailable to a slot; `CrossTierLeakageError` for
//   closures over placed values; `UnsupportedIntrinsicError`.
// Side effects: none.

use std::collections::{BTreeSet, HashMap, HashSet};

use log::trace;

use crate::error::{
    CompileError, CrossTierLeakageError, Leakage, RoundStep, ShapeMismatchError, TypeError,
};
use crate::forms::Template;
use crate::intrinsics::{self, IntrinsicCall, IntrinsicDef, IntrinsicKind, LocalIntrinsic};
use crate::ir::{Expr, ExprKind};
use crate::names::NameAllocator;
use crate::placement::{tier_of, Tier};
use crate::types::{Placement, Type};

// ── Round view ──────────────────────────────────────────────────────────────

/// One placed local of a normalized round.
#[derive(Debug, Clone)]
pub(crate) struct Step {
    pub name: String,
    pub value: Expr,
    /// Set for the five cross-tier primitives.
    pub boundary: Option<IntrinsicCall>,
}

impl Step {
    pub fn kind(&self) -> Option<IntrinsicKind> {
        self.boundary.as_ref().map(|b| b.kind)
    }

    pub fn is_aggregation(&self) -> bool {
        self.kind().is_some_and(IntrinsicKind::is_aggregation)
    }

    pub fn is_broadcast(&self) -> bool {
        self.kind().is_some_and(IntrinsicKind::is_broadcast)
    }

    /// Placement of the step's result.
    pub fn placement(&self) -> Option<Placement> {
        self.value.ty.placement()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RoundView {
    pub template: Template,
    /// Name of the round's single `<S@SERVER, {D}@CLIENTS>` parameter.
    pub param: String,
    pub state: Type,
    pub data: Type,
    pub steps: Vec<Step>,
    pub result: Expr,
    pub names: NameAllocator,
    after_aggregation: HashSet<String>,
}

impl RoundView {
    pub fn new(round: &Expr, template: Template) -> Result<RoundView, CompileError> {
        let mismatch = |detail: String| -> CompileError {
            ShapeMismatchError {
                template,
                step: RoundStep::Signature,
                slot: "round".to_string(),
                detail,
            }
            .into()
        };

        let (param, param_ty, body) = match (&round.kind, round.ty.as_function()) {
            (
                ExprKind::Lambda {
                    parameter: Some(p),
                    body,
                },
                Some((Some(ty), _)),
            ) => (p.clone(), ty.clone(), body.as_ref()),
            _ => {
                return Err(mismatch(format!(
                    "round must be a one-parameter lambda, found {}",
                    round.ty
                )))
            }
        };

        let members = match param_ty.as_struct() {
            Some([s, d])
                if s.placement() == Some(Placement::Coordinator)
                    && d.placement() == Some(Placement::Participants)
                    && !d.is_all_equal() =>
            {
                s.federated_member().zip(d.federated_member())
            }
            _ => None,
        };
        let Some((state, data)) = members.map(|(s, d)| (s.clone(), d.clone())) else {
            return Err(mismatch(format!(
                "parameter must be <S@SERVER,{{D}}@CLIENTS>, found {param_ty}"
            )));
        };

        let (locals, result) = match &body.kind {
            ExprKind::Block { locals, result } => (locals.as_slice(), result.as_ref()),
            _ => (&[][..], body),
        };

        let mut seen = HashSet::new();
        seen.insert(param.as_str());
        for (name, _) in locals {
            if !seen.insert(name.as_str()) {
                return Err(mismatch(format!("local `{name}` is bound more than once")));
            }
        }

        let mut view = RoundView {
            template,
            param,
            state,
            data,
            steps: Vec::new(),
            result: Expr::empty(),
            names: NameAllocator::avoiding(round),
            after_aggregation: HashSet::new(),
        };

        let mut inline: HashMap<String, Expr> = HashMap::new();
        for (name, value) in locals {
            let value = value.substitute(&inline);
            let value = view.lift(&value, true)?;
            if is_step(&value) {
                view.push_step(name.clone(), value)?;
            } else {
                trace!("inlining plumbing local `{name}`");
                inline.insert(name.clone(), value);
            }
        }
        let result = result.substitute(&inline);
        view.result = view.lift(&result, true)?;
        Ok(view)
    }

    /// Hoist intrinsic calls nested inside `expr` into steps of their own.
    fn lift(&mut self, expr: &Expr, top: bool) -> Result<Expr, CompileError> {
        let rebuilt = match &expr.kind {
            ExprKind::Struct(elements) => Expr::new(
                ExprKind::Struct(
                    elements
                        .iter()
                        .map(|e| self.lift(e, false))
                        .collect::<Result<_, _>>()?,
                ),
                expr.ty.clone(),
            ),
            ExprKind::Selection { source, index } => Expr::new(
                ExprKind::Selection {
                    source: Box::new(self.lift(source, false)?),
                    index: *index,
                },
                expr.ty.clone(),
            ),
            ExprKind::Call { function, argument } => {
                let argument = match argument {
                    Some(a) => Some(Box::new(self.lift(a, false)?)),
                    None => None,
                };
                Expr::new(
                    ExprKind::Call {
                        function: function.clone(),
                        argument,
                    },
                    expr.ty.clone(),
                )
            }
            _ => return Ok(expr.clone()),
        };
        if !top && is_step(&rebuilt) && matches!(callee(&rebuilt), Some(ExprKind::Intrinsic { .. })) {
            let base = match callee(&rebuilt) {
                Some(ExprKind::Intrinsic { uri }) => uri.trim_start_matches("federated_").to_string(),
                _ => "step".to_string(),
            };
            let name = self.names.fresh(&base);
            let ty = rebuilt.ty.clone();
            trace!("lifting nested intrinsic call into `{name}`");
            self.push_step(name.clone(), rebuilt)?;
            return Ok(Expr::reference(name, ty));
        }
        Ok(rebuilt)
    }

    fn push_step(&mut self, name: String, value: Expr) -> Result<(), CompileError> {
        let boundary = intrinsics::recognize(&value)?;
        let known: HashSet<&str> = self.steps.iter().map(|s| s.name.as_str()).collect();
        let deps: BTreeSet<String> = value
            .free_references()
            .into_iter()
            .filter(|n| known.contains(n.as_str()))
            .collect();
        let after = boundary.as_ref().is_some_and(|b| b.kind.is_aggregation())
            || deps.iter().any(|d| self.after_aggregation.contains(d));
        if after {
            self.after_aggregation.insert(name.clone());
        }
        self.steps.push(Step {
            name,
            value,
            boundary,
        });
        Ok(())
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Whether the step transitively depends on an aggregation result (or is
    /// one).
    pub fn is_after_aggregation(&self, name: &str) -> bool {
        self.after_aggregation.contains(name)
    }

    pub fn broadcasts(&self) -> Vec<&Step> {
        self.steps.iter().filter(|s| s.is_broadcast()).collect()
    }

    pub fn aggregations(&self) -> Vec<&Step> {
        self.steps.iter().filter(|s| s.is_aggregation()).collect()
    }

    /// Whether `expr` reads the state component of the round parameter.
    pub fn reads_state(&self, expr: &Expr) -> bool {
        let mut found = false;
        expr.visit(&mut |e| {
            if let ExprKind::Selection { source, index: 0 } = &e.kind {
                if matches!(&source.kind, ExprKind::Reference(n) if *n == self.param) {
                    found = true;
                }
            }
        });
        found
    }
}

fn callee(expr: &Expr) -> Option<&ExprKind> {
    match &expr.kind {
        ExprKind::Call { function, .. } => Some(&function.kind),
        _ => None,
    }
}

/// A local that stays a step: a call producing a placed value.
fn is_step(expr: &Expr) -> bool {
    matches!(expr.kind, ExprKind::Call { .. }) && expr.ty.contains_federated()
}

// ── Slices ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// Keep placed IR (five-lambda form).
    Placed,
    /// Lower placed IR to unplaced IR (seven-function and broadcast forms).
    Lowered,
}

/// The part of a round that one slot needs, rewritten over the slot's own
/// parameter.
pub(crate) struct Slice<'v> {
    view: &'v RoundView,
    step: RoundStep,
    slot: &'static str,
    mode: Mode,
    state: Option<Expr>,
    data: Option<Expr>,
    inputs: HashMap<String, Expr>,
    bindings: Vec<(String, Expr)>,
    emitted: HashMap<String, Type>,
}

impl<'v> Slice<'v> {
    pub fn new(view: &'v RoundView, mode: Mode, step: RoundStep, slot: &'static str) -> Self {
        Self {
            view,
            step,
            slot,
            mode,
            state: None,
            data: None,
            inputs: HashMap::new(),
            bindings: Vec::new(),
            emitted: HashMap::new(),
        }
    }

    pub fn with_state(mut self, state: Expr) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_data(mut self, data: Expr) -> Self {
        self.data = Some(data);
        self
    }

    /// Make step `name` available as `value` inside the slot.
    pub fn with_input(mut self, name: &str, value: Expr) -> Self {
        self.inputs.insert(name.to_string(), value);
        self
    }

    pub fn mismatch(&self, detail: impl Into<String>) -> CompileError {
        ShapeMismatchError {
            template: self.view.template,
            step: self.step,
            slot: self.slot.to_string(),
            detail: detail.into(),
        }
        .into()
    }

    fn leak(&self, expr: &Expr, reason: Leakage) -> CompileError {
        CrossTierLeakageError {
            slot: self.slot.to_string(),
            expr: expr.to_string(),
            reason,
        }
        .into()
    }

    fn typed(&self, r: Result<Expr, TypeError>) -> Result<Expr, CompileError> {
        r.map_err(|e| self.mismatch(e.message))
    }

    /// Rewrite `expr` into the slot.
    pub fn value(&mut self, expr: &Expr) -> Result<Expr, CompileError> {
        if expr.is_closed() && tier_of(expr)? == Tier::Unplaced {
            return Ok(expr.clone());
        }
        match &expr.kind {
            ExprKind::Selection { source, index } if self.is_param(source) => {
                let (input, what) = match index {
                    0 => (self.state.clone(), "the round state"),
                    _ => (self.data.clone(), "the participant data"),
                };
                input.ok_or_else(|| self.mismatch(format!("depends on {what}, which this slot cannot see")))
            }
            ExprKind::Reference(name) => self.reference(expr, name),
            ExprKind::Literal(_) | ExprKind::Builtin(_) => Ok(expr.clone()),
            ExprKind::Lambda { .. } | ExprKind::Block { .. } | ExprKind::Intrinsic { .. } => {
                match expr.free_references().into_iter().next() {
                    Some(name) => Err(self.leak(expr, Leakage::FreeReference { name })),
                    None if self.mode == Mode::Lowered && expr.ty.contains_federated() => Err(self
                        .leak(
                            expr,
                            Leakage::Unlowerable {
                                detail: format!("placed function of type {}", expr.ty),
                            },
                        )),
                    None => Ok(expr.clone()),
                }
            }
            ExprKind::Struct(elements) => {
                let elements = elements
                    .iter()
                    .map(|e| self.value(e))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Expr::tuple(elements))
            }
            ExprKind::Selection { source, index } => {
                let source = self.value(source)?;
                self.typed(Expr::select(source, *index))
            }
            ExprKind::Call { function, argument } => match &function.kind {
                ExprKind::Intrinsic { uri } => self.intrinsic_call(expr, uri, argument.as_deref()),
                _ => {
                    let function = self.value(function)?;
                    let argument = match argument {
                        Some(a) => Some(self.value(a)?),
                        None => None,
                    };
                    self.typed(Expr::call(function, argument))
                }
            },
        }
    }

    fn is_param(&self, expr: &Expr) -> bool {
        matches!(&expr.kind, ExprKind::Reference(n) if *n == self.view.param)
    }

    fn reference(&mut self, expr: &Expr, name: &str) -> Result<Expr, CompileError> {
        let view = self.view;
        if let Some(input) = self.inputs.get(name) {
            return Ok(input.clone());
        }
        if let Some(ty) = self.emitted.get(name) {
            return Ok(Expr::reference(name, ty.clone()));
        }
        if name == view.param {
            return Err(self.mismatch("uses the round parameter as a whole; select its state or data component"));
        }
        let Some(step) = view.step(name) else {
            return Err(self.leak(
                expr,
                Leakage::FreeReference {
                    name: name.to_string(),
                },
            ));
        };
        if let Some(b) = &step.boundary {
            return Err(self.mismatch(format!(
                "depends on `{name}` ({}), which is not available to this slot",
                b.kind
            )));
        }
        let lowered = self.value(&step.value)?;
        let ty = lowered.ty.clone();
        trace!("slot `{}`: emitting `{name}` : {ty}", self.slot);
        self.bindings.push((name.to_string(), lowered));
        self.emitted.insert(name.to_string(), ty.clone());
        Ok(Expr::reference(name, ty))
    }

    fn intrinsic_call(
        &mut self,
        expr: &Expr,
        uri: &str,
        argument: Option<&Expr>,
    ) -> Result<Expr, CompileError> {
        let def = IntrinsicDef::from_uri(uri);
        if let Some(IntrinsicDef::CrossTier(_)) = def {
            return Err(self.leak(
                expr,
                Leakage::CrossTierIntrinsic {
                    uri: uri.to_string(),
                },
            ));
        }
        let Some(argument) = argument else {
            return Err(self.mismatch(format!("`{uri}` called without an argument")));
        };
        match (self.mode, def) {
            (Mode::Placed, Some(IntrinsicDef::Local(local))) => {
                let argument = self.value(argument)?;
                self.typed(intrinsics::call(IntrinsicDef::Local(local), argument))
            }
            (Mode::Lowered, Some(IntrinsicDef::Local(local))) => {
                let parts = intrinsics::unpack(argument);
                match local {
                    LocalIntrinsic::Map | LocalIntrinsic::Apply => {
                        let [function, value] = parts.as_slice() else {
                            return Err(self.mismatch(format!("malformed `{uri}` argument")));
                        };
                        let function = self.value(function)?;
                        let value = self.value(value)?;
                        self.typed(Expr::call(function, Some(value)))
                    }
                    LocalIntrinsic::ZipAtClients | LocalIntrinsic::ZipAtServer => {
                        let elements = parts
                            .iter()
                            .map(|p| self.value(p))
                            .collect::<Result<Vec<_>, _>>()?;
                        Ok(Expr::tuple(elements))
                    }
                    LocalIntrinsic::ValueAtServer => self.value(argument),
                }
            }
            (_, _) => Err(self.mismatch(format!(
                "cannot express a call of unknown intrinsic `{uri}` inside a slot"
            ))),
        }
    }

    /// Append a binding computed outside the region walk; returns a
    /// reference to it.
    pub fn push_binding(&mut self, name: String, value: Expr) -> Expr {
        let ty = value.ty.clone();
        self.emitted.insert(name.clone(), ty.clone());
        let reference = Expr::reference(&name, ty);
        self.bindings.push((name, value));
        reference
    }

    /// Close the slot into a bare value, keeping any emitted bindings.
    pub fn finish_value(self, result: Expr) -> Expr {
        Expr::block(self.bindings, result)
    }

    /// Close the slot into a one-parameter lambda.
    pub fn finish(self, parameter: (String, Type), result: Expr) -> Expr {
        Expr::lambda(Some(parameter), Expr::block(self.bindings, result))
    }

    /// Close the slot into a no-parameter lambda.
    pub fn finish_nullary(self, result: Expr) -> Expr {
        Expr::lambda(None, Expr::block(self.bindings, result))
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
