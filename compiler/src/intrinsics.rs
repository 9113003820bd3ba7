// intrinsics.rs — Intrinsic catalogue and cross-tier call recognizer
//
// The five cross-tier primitives form a closed set (`IntrinsicKind`); the
// placement-local helpers (`federated_map`, zips, ...) are known but are not
// tier boundaries. Signatures are inferred from the packed argument type.
//
// Preconditions: expressions are well-typed.
// Postconditions: `recognize` returns `Some` exactly for calls of the five
//   cross-tier primitives.
// Failure modes: `UnsupportedIntrinsicError` for an unknown intrinsic whose
//   type spans both tiers; `TypeError` for ill-typed intrinsic arguments.
// Side effects: none.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{TypeError, UnsupportedIntrinsicError};
use crate::ir::{Expr, ExprKind};
use crate::types::{Placement, Type};

// ── Catalogue ───────────────────────────────────────────────────────────────

/// The closed set of tier-crossing primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IntrinsicKind {
    Broadcast,
    Aggregate,
    SecureSumBitwidth,
    SecureSum,
    SecureModularSum,
}

impl IntrinsicKind {
    pub const ALL: [IntrinsicKind; 5] = [
        IntrinsicKind::Broadcast,
        IntrinsicKind::Aggregate,
        IntrinsicKind::SecureSumBitwidth,
        IntrinsicKind::SecureSum,
        IntrinsicKind::SecureModularSum,
    ];

    pub fn uri(self) -> &'static str {
        match self {
            IntrinsicKind::Broadcast => "federated_broadcast",
            IntrinsicKind::Aggregate => "federated_aggregate",
            IntrinsicKind::SecureSumBitwidth => "federated_secure_sum_bitwidth",
            IntrinsicKind::SecureSum => "federated_secure_sum",
            IntrinsicKind::SecureModularSum => "federated_secure_modular_sum",
        }
    }

    pub fn is_broadcast(self) -> bool {
        self == IntrinsicKind::Broadcast
    }

    /// Participants-to-coordinator primitives.
    pub fn is_aggregation(self) -> bool {
        !self.is_broadcast()
    }

    /// Secure channel index (bitwidth, max-input, modulus order).
    pub fn secure_channel(self) -> Option<usize> {
        match self {
            IntrinsicKind::SecureSumBitwidth => Some(0),
            IntrinsicKind::SecureSum => Some(1),
            IntrinsicKind::SecureModularSum => Some(2),
            _ => None,
        }
    }
}

impl fmt::Display for IntrinsicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri())
    }
}

/// Placement-local helpers. These never cross tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocalIntrinsic {
    Map,
    Apply,
    ZipAtClients,
    ZipAtServer,
    ValueAtServer,
}

impl LocalIntrinsic {
    pub fn uri(self) -> &'static str {
        match self {
            LocalIntrinsic::Map => "federated_map",
            LocalIntrinsic::Apply => "federated_apply",
            LocalIntrinsic::ZipAtClients => "federated_zip_at_clients",
            LocalIntrinsic::ZipAtServer => "federated_zip_at_server",
            LocalIntrinsic::ValueAtServer => "federated_value_at_server",
        }
    }
}

/// Any intrinsic the compiler knows by URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntrinsicDef {
    CrossTier(IntrinsicKind),
    Local(LocalIntrinsic),
}

const LOCALS: [LocalIntrinsic; 5] = [
    LocalIntrinsic::Map,
    LocalIntrinsic::Apply,
    LocalIntrinsic::ZipAtClients,
    LocalIntrinsic::ZipAtServer,
    LocalIntrinsic::ValueAtServer,
];

impl IntrinsicDef {
    pub fn from_uri(uri: &str) -> Option<IntrinsicDef> {
        IntrinsicKind::ALL
            .iter()
            .find(|k| k.uri() == uri)
            .map(|k| IntrinsicDef::CrossTier(*k))
            .or_else(|| {
                LOCALS
                    .iter()
                    .find(|l| l.uri() == uri)
                    .map(|l| IntrinsicDef::Local(*l))
            })
    }

    pub fn uri(self) -> &'static str {
        match self {
            IntrinsicDef::CrossTier(k) => k.uri(),
            IntrinsicDef::Local(l) => l.uri(),
        }
    }

    /// Function type of this intrinsic when applied to an argument of type
    /// `argument`.
    pub fn signature(self, argument: &Type) -> Result<Type, TypeError> {
        let result = self.result_type(argument)?;
        Ok(Type::function(Some(argument.clone()), result))
    }

    fn result_type(self, argument: &Type) -> Result<Type, TypeError> {
        let uri = self.uri();
        let fail = |what: &str| {
            Err(TypeError::new(format!(
                "`{uri}` expects {what}, found {argument}"
            )))
        };
        match self {
            IntrinsicDef::CrossTier(IntrinsicKind::Broadcast) => {
                match (argument.federated_member(), argument.placement()) {
                    (Some(member), Some(Placement::Coordinator)) => Ok(Type::federated(
                        member.clone(),
                        Placement::Participants,
                        true,
                    )),
                    _ => fail("a coordinator value T@SERVER"),
                }
            }
            IntrinsicDef::CrossTier(IntrinsicKind::Aggregate) => {
                let Some([value, zero, accumulate, merge, report]) =
                    argument.as_struct().and_then(|e| <&[Type; 5]>::try_from(e).ok())
                else {
                    return fail("<{V}@CLIENTS, A, (<A,V> -> A), (<A,A> -> A), (A -> R)>");
                };
                let Some(member) = participant_member(value) else {
                    return fail("participant values {V}@CLIENTS as first element");
                };
                if zero.contains_federated() {
                    return fail("an unplaced zero");
                }
                let acc = Type::function(
                    Some(Type::tuple(vec![zero.clone(), member.clone()])),
                    zero.clone(),
                );
                let mrg = Type::function(
                    Some(Type::tuple(vec![zero.clone(), zero.clone()])),
                    zero.clone(),
                );
                if *accumulate != acc {
                    return fail(&format!("accumulate of type {acc}"));
                }
                if *merge != mrg {
                    return fail(&format!("merge of type {mrg}"));
                }
                match report.as_function() {
                    Some((Some(p), r)) if p == zero && !r.contains_federated() => {
                        Ok(Type::at_coordinator(r.clone()))
                    }
                    _ => fail(&format!("report of type ({zero} -> R)")),
                }
            }
            IntrinsicDef::CrossTier(kind) => {
                // The three secure sums: <{V}@CLIENTS, P> or <{V}@CLIENTS, P@SERVER>.
                let Some([value, param]) =
                    argument.as_struct().and_then(|e| <&[Type; 2]>::try_from(e).ok())
                else {
                    return fail("<{V}@CLIENTS, P>");
                };
                let Some(member) = participant_member(value) else {
                    return fail("participant values {V}@CLIENTS as first element");
                };
                if !member.is_integer() {
                    return fail("integer participant values");
                }
                let param_member = match param.placement() {
                    None => param,
                    Some(Placement::Coordinator) => param.federated_member().unwrap_or(param),
                    Some(Placement::Participants) => {
                        return fail("a static or coordinator-placed parameter")
                    }
                };
                if param_member.contains_federated() || !param_member.is_integer() {
                    return fail(&format!("an integer parameter for `{kind}`"));
                }
                Ok(Type::at_coordinator(member.clone()))
            }
            IntrinsicDef::Local(LocalIntrinsic::Map) | IntrinsicDef::Local(LocalIntrinsic::Apply) => {
                let Some([function, value]) =
                    argument.as_struct().and_then(|e| <&[Type; 2]>::try_from(e).ok())
                else {
                    return fail("<(T -> U), T@P>");
                };
                let (Some((Some(param), result)), Some(member), Some(placement)) = (
                    function.as_function(),
                    value.federated_member(),
                    value.placement(),
                ) else {
                    return fail("<(T -> U), T@P>");
                };
                if self == IntrinsicDef::Local(LocalIntrinsic::Apply)
                    && placement != Placement::Coordinator
                {
                    return fail("a coordinator value");
                }
                if function.contains_federated() {
                    return fail("an unplaced function");
                }
                if !param.is_assignable_from(member) {
                    return fail(&format!("a value assignable to {param}"));
                }
                Ok(Type::federated(result.clone(), placement, false))
            }
            IntrinsicDef::Local(LocalIntrinsic::ZipAtClients) => {
                let Some(elements) = argument.as_struct() else {
                    return fail("a tuple of participant values");
                };
                let members: Option<Vec<Type>> = elements
                    .iter()
                    .map(|t| participant_member(t).cloned())
                    .collect();
                match members {
                    Some(m) => Ok(Type::at_participants(Type::tuple(m))),
                    None => fail("a tuple of participant values"),
                }
            }
            IntrinsicDef::Local(LocalIntrinsic::ZipAtServer) => {
                let Some(elements) = argument.as_struct() else {
                    return fail("a tuple of coordinator values");
                };
                let members: Option<Vec<Type>> = elements
                    .iter()
                    .map(|t| match t.placement() {
                        Some(Placement::Coordinator) => t.federated_member().cloned(),
                        _ => None,
                    })
                    .collect();
                match members {
                    Some(m) => Ok(Type::at_coordinator(Type::tuple(m))),
                    None => fail("a tuple of coordinator values"),
                }
            }
            IntrinsicDef::Local(LocalIntrinsic::ValueAtServer) => {
                if argument.contains_federated() {
                    return fail("an unplaced value");
                }
                Ok(Type::at_coordinator(argument.clone()))
            }
        }
    }
}

fn participant_member(t: &Type) -> Option<&Type> {
    match t.placement() {
        Some(Placement::Participants) => t.federated_member(),
        _ => None,
    }
}

/// Build a typed call of `def` on `argument`.
pub fn call(def: IntrinsicDef, argument: Expr) -> Result<Expr, TypeError> {
    let ty = def.signature(&argument.ty)?;
    Expr::call(Expr::intrinsic(def.uri(), ty), Some(argument))
}

pub fn broadcast(value: Expr) -> Result<Expr, TypeError> {
    call(IntrinsicDef::CrossTier(IntrinsicKind::Broadcast), value)
}

pub fn map(function: Expr, value: Expr) -> Result<Expr, TypeError> {
    call(
        IntrinsicDef::Local(LocalIntrinsic::Map),
        Expr::tuple(vec![function, value]),
    )
}

pub fn apply(function: Expr, value: Expr) -> Result<Expr, TypeError> {
    call(
        IntrinsicDef::Local(LocalIntrinsic::Apply),
        Expr::tuple(vec![function, value]),
    )
}

pub fn zip_at_clients(values: Vec<Expr>) -> Result<Expr, TypeError> {
    call(
        IntrinsicDef::Local(LocalIntrinsic::ZipAtClients),
        Expr::tuple(values),
    )
}

pub fn zip_at_server(values: Vec<Expr>) -> Result<Expr, TypeError> {
    call(
        IntrinsicDef::Local(LocalIntrinsic::ZipAtServer),
        Expr::tuple(values),
    )
}

pub fn value_at_server(value: Expr) -> Result<Expr, TypeError> {
    call(IntrinsicDef::Local(LocalIntrinsic::ValueAtServer), value)
}

// ── Recognizer ──────────────────────────────────────────────────────────────

/// A recognized cross-tier call with its argument slots.
#[derive(Debug, Clone, PartialEq)]
pub struct IntrinsicCall {
    pub kind: IntrinsicKind,
    /// Positional argument slots. Packed tuple arguments are unpacked.
    pub args: Vec<Expr>,
    pub result_type: Type,
}

impl fmt::Display for IntrinsicCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.kind)?;
        for (i, a) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", a.ty)?;
        }
        write!(f, ") -> {}", self.result_type)
    }
}

/// Recognize a cross-tier intrinsic call.
///
/// Returns `Ok(None)` for anything that is not a call of an intrinsic, and
/// for calls of placement-local intrinsics.
pub fn recognize(expr: &Expr) -> Result<Option<IntrinsicCall>, UnsupportedIntrinsicError> {
    let ExprKind::Call { function, argument } = &expr.kind else {
        return Ok(None);
    };
    let ExprKind::Intrinsic { uri } = &function.kind else {
        return Ok(None);
    };
    match IntrinsicDef::from_uri(uri) {
        Some(IntrinsicDef::CrossTier(kind)) => {
            let args = match argument {
                Some(a) => unpack(a),
                None => Vec::new(),
            };
            Ok(Some(IntrinsicCall {
                kind,
                args,
                result_type: expr.ty.clone(),
            }))
        }
        Some(IntrinsicDef::Local(_)) => Ok(None),
        None if function.ty.placements().is_cross_tier() => Err(UnsupportedIntrinsicError {
            uri: uri.clone(),
            ty: function.ty.clone(),
        }),
        None => Ok(None),
    }
}

/// Every cross-tier call in `expr`, in pre-order.
pub fn collect(expr: &Expr) -> Result<Vec<IntrinsicCall>, UnsupportedIntrinsicError> {
    let mut calls = Vec::new();
    let mut error = None;
    expr.visit(&mut |e| {
        if error.is_some() {
            return;
        }
        match recognize(e) {
            Ok(Some(call)) => calls.push(call),
            Ok(None) => {}
            Err(err) => error = Some(err),
        }
    });
    match error {
        Some(err) => Err(err),
        None => Ok(calls),
    }
}

/// Split a packed tuple argument into its element expressions.
pub(crate) fn unpack(argument: &Expr) -> Vec<Expr> {
    match (&argument.kind, argument.ty.as_struct()) {
        (ExprKind::Struct(elements), _) => elements.clone(),
        (_, Some(types)) => (0..types.len())
            .filter_map(|i| Expr::select(argument.clone(), i).ok())
            .collect(),
        _ => vec![argument.clone()],
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Builtin;

    fn clients_int() -> Expr {
        Expr::reference("v", Type::at_participants(Type::int32()))
    }

    #[test]
    fn broadcast_signature() {
        let s = Expr::reference("s", Type::at_coordinator(Type::int32()));
        let call = broadcast(s).unwrap();
        assert_eq!(call.ty.to_string(), "int32@CLIENTS");
        let rec = recognize(&call).unwrap().unwrap();
        assert_eq!(rec.kind, IntrinsicKind::Broadcast);
        assert_eq!(rec.args.len(), 1);
    }

    #[test]
    fn aggregate_signature_requires_consistent_functions() {
        let add = Expr::builtin(Builtin::Add, &Type::int32()).unwrap();
        let report = Expr::lambda(
            Some(("a".into(), Type::int32())),
            Expr::reference("a", Type::int32()),
        );
        let arg = Expr::tuple(vec![clients_int(), Expr::int(0), add.clone(), add, report]);
        let call = call(IntrinsicDef::CrossTier(IntrinsicKind::Aggregate), arg).unwrap();
        assert_eq!(call.ty, Type::at_coordinator(Type::int32()));
        let rec = recognize(&call).unwrap().unwrap();
        assert_eq!(rec.args.len(), 5);

        let bad = Expr::tuple(vec![clients_int(), Expr::float(0.0)]);
        assert!(super::call(IntrinsicDef::CrossTier(IntrinsicKind::Aggregate), bad).is_err());
    }

    #[test]
    fn secure_sum_accepts_static_or_server_parameter() {
        let def = IntrinsicDef::CrossTier(IntrinsicKind::SecureSumBitwidth);
        let static_arg = Expr::tuple(vec![clients_int(), Expr::int(8)]);
        assert!(call(def, static_arg).is_ok());
        let server_param = Expr::reference("b", Type::at_coordinator(Type::int32()));
        assert!(call(def, Expr::tuple(vec![clients_int(), server_param])).is_ok());
        let float_values = Expr::reference("f", Type::at_participants(Type::float32()));
        assert!(call(def, Expr::tuple(vec![float_values, Expr::int(8)])).is_err());
    }

    #[test]
    fn local_intrinsics_are_not_boundaries() {
        let zipped = zip_at_server(vec![Expr::reference(
            "s",
            Type::at_coordinator(Type::int32()),
        )])
        .unwrap();
        assert_eq!(recognize(&zipped).unwrap(), None);
        assert_eq!(zipped.ty.to_string(), "<int32>@SERVER");
    }

    #[test]
    fn unknown_cross_tier_intrinsic_is_unsupported() {
        let ty = Type::function(
            Some(Type::at_participants(Type::int32())),
            Type::at_coordinator(Type::int32()),
        );
        let call = Expr::call(Expr::intrinsic("federated_sum", ty), Some(clients_int())).unwrap();
        let err = recognize(&call).unwrap_err();
        assert_eq!(err.uri, "federated_sum");
    }

    #[test]
    fn unknown_local_intrinsic_is_ignored() {
        let ty = Type::function(Some(Type::int32()), Type::int32());
        let call = Expr::call(Expr::intrinsic("custom_op", ty), Some(Expr::int(1))).unwrap();
        assert_eq!(recognize(&call).unwrap(), None);
    }

    #[test]
    fn map_over_broadcast_value() {
        let bc = Expr::reference("c", Type::federated(Type::int32(), Placement::Participants, true));
        let inc = Expr::lambda(
            Some(("x".into(), Type::int32())),
            Expr::reference("x", Type::int32()),
        );
        let mapped = map(inc, bc).unwrap();
        assert_eq!(mapped.ty.to_string(), "{int32}@CLIENTS");
    }
}
