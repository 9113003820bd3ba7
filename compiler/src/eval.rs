// eval.rs — Reference evaluator
//
// Runs round computations and forms over concrete values so the two
// directions of the compiler can be checked against each other. It is a
// semantic oracle, not a backend: participants are a plain vector and
// aggregation is simulated in fixed-size groups.
//
// Preconditions: expressions type-check.
// Postconditions: `evaluate_form(compile(r))` and `evaluate_round(r)` agree
//   whenever compilation succeeds.
// Failure modes: `EvalError` for unbound names, arithmetic overflow,
//   secure-sum inputs outside their declared range and ill-shaped values.
// Side effects: `trace!` per intrinsic call.

use std::fmt;
use std::sync::Arc;

use log::trace;
use thiserror::Error;

use crate::forms::{BroadcastForm, DistributeAggregateForm, Form, MapReduceForm};
use crate::intrinsics::{IntrinsicDef, IntrinsicKind, LocalIntrinsic};
use crate::ir::{format_float, Builtin, Expr, ExprKind, Literal};
use crate::local_block::LocalBlock;
use crate::types::{ScalarType, Type};

// ── Values ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Tuple(Vec<Value>),
    Sequence(Vec<Value>),
    Function(Function),
    /// A coordinator-placed value.
    AtServer(Box<Value>),
    /// One member value per participant.
    AtClients(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Function {
    Closure {
        parameter: Option<String>,
        body: Arc<Expr>,
        env: Vec<(String, Value)>,
    },
    Builtin(Builtin, Type),
    /// An intrinsic together with its function type.
    Intrinsic(IntrinsicDef, Type),
}

impl Value {
    pub fn empty() -> Value {
        Value::Tuple(Vec::new())
    }

    pub fn at_server(v: Value) -> Value {
        Value::AtServer(Box::new(v))
    }

    /// Additive identity of a numeric type.
    pub fn zero(ty: &Type) -> Result<Value, EvalError> {
        match ty {
            Type::Scalar(ScalarType::Int32) => Ok(Value::Int(0)),
            Type::Scalar(ScalarType::Float32) => Ok(Value::Float(0.0)),
            Type::Struct(elements) => elements
                .iter()
                .map(Value::zero)
                .collect::<Result<_, _>>()
                .map(Value::Tuple),
            other => Err(EvalError::Shape(format!("no zero value of type {other}"))),
        }
    }

    fn element(&self, index: usize) -> Result<&Value, EvalError> {
        match self {
            Value::Tuple(elements) => elements
                .get(index)
                .ok_or_else(|| EvalError::Shape(format!("{self} has no element {index}"))),
            other => Err(EvalError::Shape(format!("cannot select [{index}] from {other}"))),
        }
    }

    fn elements(&self) -> Result<&[Value], EvalError> {
        match self {
            Value::Tuple(elements) => Ok(elements),
            other => Err(EvalError::Shape(format!("expected a tuple, found {other}"))),
        }
    }

    fn into_server(self) -> Result<Value, EvalError> {
        match self {
            Value::AtServer(v) => Ok(*v),
            other => Err(EvalError::Shape(format!("expected a coordinator value, found {other}"))),
        }
    }

    fn into_clients(self) -> Result<Vec<Value>, EvalError> {
        match self {
            Value::AtClients(vs) => Ok(vs),
            other => Err(EvalError::Shape(format!("expected participant values, found {other}"))),
        }
    }

    fn as_int(&self) -> Result<i64, EvalError> {
        match self {
            Value::Int(v) => Ok(*v),
            other => Err(EvalError::Shape(format!("expected an integer, found {other}"))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = |f: &mut fmt::Formatter<'_>, vs: &[Value]| -> fmt::Result {
            for (i, v) in vs.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{v}")?;
            }
            Ok(())
        };
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{}", format_float(*v)),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Tuple(vs) => {
                write!(f, "<")?;
                list(f, vs)?;
                write!(f, ">")
            }
            Value::Sequence(vs) => {
                write!(f, "[")?;
                list(f, vs)?;
                write!(f, "]")
            }
            Value::Function(_) => write!(f, "<function>"),
            Value::AtServer(v) => write!(f, "{v}@SERVER"),
            Value::AtClients(vs) => {
                write!(f, "{{")?;
                list(f, vs)?;
                write!(f, "}}@CLIENTS")
            }
        }
    }
}

// ── Errors and options ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("unbound name `{0}`")]
    Unbound(String),
    #[error("unknown intrinsic `{0}`")]
    UnknownIntrinsic(String),
    #[error("integer overflow in `{0}`")]
    Overflow(&'static str),
    #[error("`{uri}`: value {value} is outside [0, {bound}]")]
    OutOfRange { uri: &'static str, value: i64, bound: i64 },
    #[error("`{uri}`: parameter {value} is out of range")]
    BadParameter { uri: &'static str, value: i64 },
    #[error("ill-shaped value: {0}")]
    Shape(String),
}

/// Evaluator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalOptions {
    /// Participants accumulated together before partial results are merged.
    /// Exercises `merge` whenever there are more participants than this.
    pub aggregation_group_size: usize,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            aggregation_group_size: 2,
        }
    }
}

// ── Entry points ────────────────────────────────────────────────────────────

/// Run a round on `state` (unplaced) and one data value per participant.
pub fn evaluate_round(
    round: &Expr,
    state: Value,
    data: Vec<Value>,
    options: &EvalOptions,
) -> Result<Value, EvalError> {
    let ev = Evaluator::new(options, data.len());
    let function = ev.eval(round, &mut Vec::new())?;
    ev.apply(
        &function,
        Some(Value::Tuple(vec![Value::at_server(state), Value::AtClients(data)])),
    )
}

/// Run a form through its protocol on the same inputs a round takes.
pub fn evaluate_form(
    form: &Form,
    state: Value,
    data: Vec<Value>,
    options: &EvalOptions,
) -> Result<Value, EvalError> {
    let ev = Evaluator::new(options, data.len());
    match form {
        Form::MapReduce(f) => ev.map_reduce(f, state, data),
        Form::DistributeAggregate(f) => ev.distribute_aggregate(f, state, data),
        Form::Broadcast(f) => ev.broadcast(f, state, data),
    }
}

/// Evaluate a closed, unplaced expression such as a CLI literal.
pub fn evaluate_closed(expr: &Expr) -> Result<Value, EvalError> {
    Evaluator::new(&EvalOptions::default(), 0).eval(expr, &mut Vec::new())
}

// ── Evaluator ───────────────────────────────────────────────────────────────

struct Evaluator<'o> {
    options: &'o EvalOptions,
    participants: usize,
}

impl<'o> Evaluator<'o> {
    fn new(options: &'o EvalOptions, participants: usize) -> Self {
        Self {
            options,
            participants,
        }
    }

    fn eval(&self, expr: &Expr, env: &mut Vec<(String, Value)>) -> Result<Value, EvalError> {
        match &expr.kind {
            ExprKind::Reference(name) => env
                .iter()
                .rev()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| EvalError::Unbound(name.clone())),
            ExprKind::Literal(Literal::Int(v)) => Ok(Value::Int(*v)),
            ExprKind::Literal(Literal::Float(v)) => Ok(Value::Float(*v)),
            ExprKind::Literal(Literal::Bool(v)) => Ok(Value::Bool(*v)),
            ExprKind::Struct(elements) => elements
                .iter()
                .map(|e| self.eval(e, env))
                .collect::<Result<_, _>>()
                .map(Value::Tuple),
            ExprKind::Selection { source, index } => {
                let source = self.eval(source, env)?;
                source.element(*index).cloned()
            }
            ExprKind::Call { function, argument } => {
                let function = self.eval(function, env)?;
                let argument = match argument {
                    Some(a) => Some(self.eval(a, env)?),
                    None => None,
                };
                self.apply(&function, argument)
            }
            ExprKind::Lambda { parameter, body } => Ok(Value::Function(Function::Closure {
                parameter: parameter.clone(),
                body: Arc::new(body.as_ref().clone()),
                env: env.clone(),
            })),
            ExprKind::Block { locals, result } => {
                let depth = env.len();
                for (name, value) in locals {
                    let v = self.eval(value, env)?;
                    env.push((name.clone(), v));
                }
                let out = self.eval(result, env);
                env.truncate(depth);
                out
            }
            ExprKind::Intrinsic { uri } => IntrinsicDef::from_uri(uri)
                .map(|d| Value::Function(Function::Intrinsic(d, expr.ty.clone())))
                .ok_or_else(|| EvalError::UnknownIntrinsic(uri.clone())),
            ExprKind::Builtin(b) => {
                let operand = expr
                    .ty
                    .as_function()
                    .map(|(_, r)| r.clone())
                    .unwrap_or_else(Type::empty);
                Ok(Value::Function(Function::Builtin(*b, operand)))
            }
        }
    }

    fn apply(&self, function: &Value, argument: Option<Value>) -> Result<Value, EvalError> {
        let Value::Function(function) = function else {
            return Err(EvalError::Shape(format!("cannot call {function}")));
        };
        match function {
            Function::Closure {
                parameter,
                body,
                env,
            } => {
                let mut env = env.clone();
                if let (Some(name), Some(value)) = (parameter, argument) {
                    env.push((name.clone(), value));
                }
                self.eval(body, &mut env)
            }
            Function::Builtin(b, operand) => {
                let argument = argument.unwrap_or_else(Value::empty);
                builtin(*b, operand, argument)
            }
            Function::Intrinsic(def, ty) => {
                let argument = argument.unwrap_or_else(Value::empty);
                trace!("eval {}", def.uri());
                self.intrinsic(*def, ty, argument)
            }
        }
    }

    fn call_block(&self, block: &LocalBlock, argument: Option<Value>) -> Result<Value, EvalError> {
        let function = self.eval(block.payload(), &mut Vec::new())?;
        self.apply(&function, argument)
    }

    fn intrinsic(&self, def: IntrinsicDef, ty: &Type, argument: Value) -> Result<Value, EvalError> {
        match def {
            IntrinsicDef::CrossTier(IntrinsicKind::Broadcast) => {
                let v = argument.into_server()?;
                Ok(Value::AtClients(vec![v; self.participants]))
            }
            IntrinsicDef::CrossTier(IntrinsicKind::Aggregate) => {
                let [values, zero, accumulate, merge, report] = take::<5>(argument)?;
                let values = values.into_clients()?;
                let total = self.aggregate(values, zero, &accumulate, &merge)?;
                Ok(Value::at_server(self.apply(&report, Some(total))?))
            }
            IntrinsicDef::CrossTier(kind) => {
                let [values, parameter] = take::<2>(argument)?;
                let values = values.into_clients()?;
                let parameter = match parameter {
                    Value::AtServer(p) => *p,
                    p => p,
                };
                let member = ty
                    .as_function()
                    .and_then(|(_, result)| result.federated_member())
                    .ok_or_else(|| EvalError::Shape(format!("`{}` of type {ty}", kind.uri())))?;
                secure_sum(kind, member, values, &parameter).map(Value::at_server)
            }
            IntrinsicDef::Local(LocalIntrinsic::Map) => {
                let [function, values] = take::<2>(argument)?;
                match values {
                    Value::AtClients(vs) => vs
                        .into_iter()
                        .map(|v| self.apply(&function, Some(v)))
                        .collect::<Result<_, _>>()
                        .map(Value::AtClients),
                    Value::AtServer(v) => self.apply(&function, Some(*v)).map(Value::at_server),
                    other => Err(EvalError::Shape(format!("cannot map over {other}"))),
                }
            }
            IntrinsicDef::Local(LocalIntrinsic::Apply) => {
                let [function, value] = take::<2>(argument)?;
                let value = value.into_server()?;
                self.apply(&function, Some(value)).map(Value::at_server)
            }
            IntrinsicDef::Local(LocalIntrinsic::ZipAtClients) => {
                let columns = match argument {
                    Value::Tuple(vs) => vs
                        .into_iter()
                        .map(Value::into_clients)
                        .collect::<Result<Vec<_>, _>>()?,
                    other => return Err(EvalError::Shape(format!("cannot zip {other}"))),
                };
                let rows = (0..self.participants)
                    .map(|i| {
                        columns
                            .iter()
                            .map(|c| {
                                c.get(i).cloned().ok_or_else(|| {
                                    EvalError::Shape(format!("participant {i} is missing a value"))
                                })
                            })
                            .collect::<Result<_, _>>()
                            .map(Value::Tuple)
                    })
                    .collect::<Result<_, _>>()?;
                Ok(Value::AtClients(rows))
            }
            IntrinsicDef::Local(LocalIntrinsic::ZipAtServer) => match argument {
                Value::Tuple(vs) => vs
                    .into_iter()
                    .map(Value::into_server)
                    .collect::<Result<_, _>>()
                    .map(|vs| Value::at_server(Value::Tuple(vs))),
                other => Err(EvalError::Shape(format!("cannot zip {other}"))),
            },
            IntrinsicDef::Local(LocalIntrinsic::ValueAtServer) => Ok(Value::at_server(argument)),
        }
    }

    /// Accumulate participants in groups, then merge the partial results.
    fn aggregate(
        &self,
        values: Vec<Value>,
        zero: Value,
        accumulate: &Value,
        merge: &Value,
    ) -> Result<Value, EvalError> {
        let group = self.options.aggregation_group_size.max(1);
        let mut partials = Vec::new();
        for chunk in values.chunks(group) {
            let mut acc = zero.clone();
            for v in chunk {
                acc = self.apply(accumulate, Some(Value::Tuple(vec![acc, v.clone()])))?;
            }
            partials.push(acc);
        }
        let mut partials = partials.into_iter();
        let Some(mut total) = partials.next() else {
            return Ok(zero);
        };
        for p in partials {
            total = self.apply(merge, Some(Value::Tuple(vec![total, p])))?;
        }
        Ok(total)
    }

    // ── Form protocols ──────────────────────────────────────────────────────

    fn map_reduce(&self, form: &MapReduceForm, state: Value, data: Vec<Value>) -> Result<Value, EvalError> {
        let context = self.call_block(form.prepare(), Some(state.clone()))?;
        let outputs = data
            .into_iter()
            .map(|d| self.call_block(form.work(), Some(Value::Tuple(vec![d, context.clone()]))))
            .collect::<Result<Vec<_>, _>>()?;

        let mut updates = Vec::with_capacity(outputs.len());
        let mut secure: [Vec<Value>; 3] = Default::default();
        for out in outputs {
            let [u, v] = take::<2>(out)?;
            let [v1, v2, v3] = take::<3>(v)?;
            updates.push(u);
            secure[0].push(v1);
            secure[1].push(v2);
            secure[2].push(v3);
        }

        let zero = self.call_block(form.zero(), None)?;
        let accumulate = self.eval(form.accumulate().payload(), &mut Vec::new())?;
        let merge = self.eval(form.merge().payload(), &mut Vec::new())?;
        let total = self.aggregate(updates, zero, &accumulate, &merge)?;
        let report = self.call_block(form.report(), Some(total))?;

        let kinds = [
            IntrinsicKind::SecureSumBitwidth,
            IntrinsicKind::SecureSum,
            IntrinsicKind::SecureModularSum,
        ];
        let mut sums = Vec::with_capacity(kinds.len());
        let members = form
            .secure_type()
            .as_struct()
            .ok_or_else(|| EvalError::Shape(format!("secure channels of type {}", form.secure_type())))?;
        for ((channel, values), kind) in secure.into_iter().enumerate().zip(kinds) {
            let member = members
                .get(channel)
                .ok_or_else(|| EvalError::Shape(format!("no secure channel {channel}")))?;
            let parameter = match form.secure_parameter(channel) {
                Some(block) => self.call_block(block, None)?,
                None => Value::empty(),
            };
            sums.push(secure_sum(kind, member, values, &parameter)?);
        }

        let input = Value::Tuple(vec![state, Value::Tuple(vec![report, Value::Tuple(sums)])]);
        let [new_state, output] = take::<2>(self.call_block(form.update(), Some(input))?)?;
        Ok(Value::Tuple(vec![Value::at_server(new_state), Value::at_server(output)]))
    }

    fn distribute_aggregate(
        &self,
        form: &DistributeAggregateForm,
        state: Value,
        data: Vec<Value>,
    ) -> Result<Value, EvalError> {
        let prepared = self.call_block(form.server_prepare(), Some(Value::at_server(state)))?;
        let [broadcast_input, temporary] = take::<2>(prepared)?;
        let broadcast_output = self.call_block(form.server_to_client_broadcast(), Some(broadcast_input))?;
        let client_values = self.call_block(
            form.client_work(),
            Some(Value::Tuple(vec![Value::AtClients(data), broadcast_output])),
        )?;
        let aggregates = self.call_block(
            form.client_to_server_aggregation(),
            Some(Value::Tuple(vec![temporary.clone(), client_values])),
        )?;
        self.call_block(form.server_result(), Some(Value::Tuple(vec![temporary, aggregates])))
    }

    fn broadcast(&self, form: &BroadcastForm, state: Value, data: Vec<Value>) -> Result<Value, EvalError> {
        let context = self.call_block(form.compute_server_context(), Some(state))?;
        data.into_iter()
            .map(|d| self.call_block(form.client_processing(), Some(Value::Tuple(vec![context.clone(), d]))))
            .collect::<Result<_, _>>()
            .map(Value::AtClients)
    }
}

fn take<const N: usize>(value: Value) -> Result<[Value; N], EvalError> {
    match value {
        Value::Tuple(vs) => <[Value; N]>::try_from(vs)
            .map_err(|vs| EvalError::Shape(format!("expected a {N}-tuple, found {} element(s)", vs.len()))),
        other => Err(EvalError::Shape(format!("expected a {N}-tuple, found {other}"))),
    }
}

// ── Arithmetic ──────────────────────────────────────────────────────────────

fn builtin(b: Builtin, operand: &Type, argument: Value) -> Result<Value, EvalError> {
    if b == Builtin::SequenceSum {
        let Value::Sequence(items) = argument else {
            return Err(EvalError::Shape(format!("sequence_sum of {argument}")));
        };
        return items
            .into_iter()
            .try_fold(Value::zero(operand)?, |acc, v| binary(Builtin::Add, acc, v));
    }
    let [a, b_] = take::<2>(argument)?;
    binary(b, a, b_)
}

fn binary(op: Builtin, a: Value, b: Value) -> Result<Value, EvalError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => {
            let r = match op {
                Builtin::Add => x.checked_add(y),
                Builtin::Sub => x.checked_sub(y),
                Builtin::Mul => x.checked_mul(y),
                Builtin::Max => Some(x.max(y)),
                Builtin::Min => Some(x.min(y)),
                Builtin::SequenceSum => None,
            };
            r.map(Value::Int).ok_or(EvalError::Overflow(op.name()))
        }
        (Value::Float(x), Value::Float(y)) => Ok(Value::Float(match op {
            Builtin::Add | Builtin::SequenceSum => x + y,
            Builtin::Sub => x - y,
            Builtin::Mul => x * y,
            Builtin::Max => x.max(y),
            Builtin::Min => x.min(y),
        })),
        (Value::Tuple(xs), Value::Tuple(ys)) if xs.len() == ys.len() => xs
            .into_iter()
            .zip(ys)
            .map(|(x, y)| binary(op, x, y))
            .collect::<Result<_, _>>()
            .map(Value::Tuple),
        (a, b) => Err(EvalError::Shape(format!("`{}` of {a} and {b}", op.name()))),
    }
}

/// Apply a scalar operation leafwise, pairing `value` with a parameter of the
/// same structure or a single scalar used for every leaf.
fn leafwise(
    value: &Value,
    parameter: &Value,
    op: &mut impl FnMut(i64, i64) -> Result<i64, EvalError>,
) -> Result<Value, EvalError> {
    match (value, parameter) {
        (Value::Int(v), p) => Ok(Value::Int(op(*v, p.as_int()?)?)),
        (Value::Tuple(vs), Value::Tuple(ps)) if vs.len() == ps.len() => vs
            .iter()
            .zip(ps)
            .map(|(v, p)| leafwise(v, p, op))
            .collect::<Result<_, _>>()
            .map(Value::Tuple),
        (Value::Tuple(vs), p @ Value::Int(_)) => vs
            .iter()
            .map(|v| leafwise(v, p, op))
            .collect::<Result<_, _>>()
            .map(Value::Tuple),
        (v, p) => Err(EvalError::Shape(format!("secure-sum value {v} with parameter {p}"))),
    }
}

/// The three secure sums over integer values of type `member`:
/// bitwidth sums modulo `2^b`, max-input rejects values outside
/// `[0, max]` and sums exactly, modular sums modulo the parameter.
/// With no participants the sum is the zero of `member`.
fn secure_sum(
    kind: IntrinsicKind,
    member: &Type,
    values: Vec<Value>,
    parameter: &Value,
) -> Result<Value, EvalError> {
    let uri = kind.uri();
    let mut values = values.into_iter();
    let Some(first) = values.next() else {
        return Value::zero(member);
    };
    if first.elements().is_ok_and(<[Value]>::is_empty) {
        return Ok(Value::empty());
    }
    let check = |v: Value| -> Result<Value, EvalError> {
        match kind {
            IntrinsicKind::SecureSum => leafwise(&v, parameter, &mut |x, max| {
                if (0..=max).contains(&x) {
                    Ok(x)
                } else {
                    Err(EvalError::OutOfRange { uri, value: x, bound: max })
                }
            }),
            _ => Ok(v),
        }
    };
    let mut total = check(first)?;
    for v in values {
        total = binary(Builtin::Add, total, check(v)?)?;
    }
    match kind {
        IntrinsicKind::SecureSumBitwidth => leafwise(&total, parameter, &mut |x, bits| {
            if !(1..=62).contains(&bits) {
                return Err(EvalError::BadParameter { uri, value: bits });
            }
            Ok(x.rem_euclid(1_i64 << bits))
        }),
        IntrinsicKind::SecureModularSum => leafwise(&total, parameter, &mut |x, modulus| {
            if modulus <= 0 {
                return Err(EvalError::BadParameter { uri, value: modulus });
            }
            Ok(x.rem_euclid(modulus))
        }),
        _ => Ok(total),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compile;
    use crate::elaborate::parse_expr;
    use crate::forms::Template;

    const SUM_ROUND: &str = "(p: <int32@SERVER,{int32}@CLIENTS> ->
        let
          c = federated_broadcast(p[0]),
          total = federated_aggregate(<federated_map(<add<int32>, federated_zip_at_clients(<p[1], c>)>), 0, add<int32>, add<int32>, (a: int32 -> a)>)
        in <federated_apply(<add<int32>, federated_zip_at_server(<p[0], total>)>), federated_value_at_server(<>)>)";

    fn ints(vs: &[i64]) -> Vec<Value> {
        vs.iter().copied().map(Value::Int).collect()
    }

    #[test]
    fn sum_round_adds_state_to_each_participant() {
        let round = parse_expr(SUM_ROUND).unwrap();
        let out = evaluate_round(&round, Value::Int(5), ints(&[1, 2, 3]), &EvalOptions::default()).unwrap();
        // (1+5) + (2+5) + (3+5) = 21, plus the state
        assert_eq!(out.to_string(), "<26@SERVER,<>@SERVER>");
    }

    #[test]
    fn compiled_forms_agree_with_the_round() {
        let round = parse_expr(SUM_ROUND).unwrap();
        let options = EvalOptions::default();
        let expected = evaluate_round(&round, Value::Int(5), ints(&[1, 2, 3]), &options).unwrap();
        for template in [Template::MapReduce, Template::DistributeAggregate] {
            let form = compile(&round, template).unwrap();
            let got = evaluate_form(&form, Value::Int(5), ints(&[1, 2, 3]), &options).unwrap();
            assert_eq!(got, expected, "{template}");
        }
    }

    #[test]
    fn no_participants_reports_zero() {
        let round = parse_expr(SUM_ROUND).unwrap();
        let out = evaluate_round(&round, Value::Int(5), Vec::new(), &EvalOptions::default()).unwrap();
        assert_eq!(out.to_string(), "<5@SERVER,<>@SERVER>");
    }

    #[test]
    fn secure_sums() {
        let vs = ints(&[3, 6, 7]);
        assert_eq!(
            secure_sum(IntrinsicKind::SecureSumBitwidth, &Type::int32(), vs.clone(), &Value::Int(3)).unwrap(),
            Value::Int(0)
        );
        assert_eq!(
            secure_sum(IntrinsicKind::SecureModularSum, &Type::int32(), vs.clone(), &Value::Int(5)).unwrap(),
            Value::Int(1)
        );
        assert_eq!(
            secure_sum(IntrinsicKind::SecureSum, &Type::int32(), vs.clone(), &Value::Int(7)).unwrap(),
            Value::Int(16)
        );
        assert!(matches!(
            secure_sum(IntrinsicKind::SecureSum, &Type::int32(), vs, &Value::Int(6)),
            Err(EvalError::OutOfRange { value: 7, .. })
        ));
    }

    #[test]
    fn empty_secure_sum_has_the_member_shape() {
        let round = parse_expr(
            "(p: <int32@SERVER,{<int32,int32>}@CLIENTS> ->
               let total = federated_secure_sum_bitwidth(<p[1], 8>)
               in <p[0], total>)",
        )
        .unwrap();
        let options = EvalOptions::default();
        let out = evaluate_round(&round, Value::Int(1), Vec::new(), &options).unwrap();
        assert_eq!(out.to_string(), "<1@SERVER,<0,0>@SERVER>");

        let form = compile(&round, Template::MapReduce).unwrap();
        assert_eq!(evaluate_form(&form, Value::Int(1), Vec::new(), &options).unwrap(), out);

        let pair = Value::Tuple(ints(&[1, 2]));
        let out = evaluate_round(&round, Value::Int(1), vec![pair], &options).unwrap();
        assert_eq!(out.to_string(), "<1@SERVER,<1,2>@SERVER>");
    }

    #[test]
    fn sequence_sum_starts_from_zero() {
        let v = builtin(
            Builtin::SequenceSum,
            &Type::float32(),
            Value::Sequence(vec![Value::Float(1.5), Value::Float(2.0)]),
        )
        .unwrap();
        assert_eq!(v, Value::Float(3.5));
    }

    #[test]
    fn overflow_is_an_error() {
        let err = binary(Builtin::Mul, Value::Int(i64::MAX), Value::Int(2)).unwrap_err();
        assert_eq!(err, EvalError::Overflow("mul"));
    }
}
