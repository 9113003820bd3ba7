// local_block.rs — Local-block extractor
//
// Turns a candidate function expression into an opaque local block after
// checking that it stays on one tier and has exactly the required signature.
//
// Preconditions: `candidate` is well-typed.
// Postconditions: a returned block is closed, holds no cross-tier primitive
//   (unless the required tier is `CrossTier`), and its signature equals the
//   required one.
// Failure modes: `CrossTierLeakageError` (checked first), then
//   `TypeSignatureMismatchError`.
// Side effects: none.

use std::fmt;
use std::sync::Arc;

use log::trace;
use serde::{Deserialize, Serialize};

use crate::error::{CrossTierLeakageError, ExtractionError, Leakage, TypeSignatureMismatchError};
use crate::intrinsics::IntrinsicDef;
use crate::ir::{Expr, ExprKind};
use crate::placement::{classify, Tier};
use crate::types::Type;

/// A pure function unit with a checked signature. The payload is opaque to
/// the compiler: nothing inspects it after extraction except the evaluator
/// and the synthesizer, which splice it back in unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalBlock {
    signature: Type,
    payload: Arc<Expr>,
    tier: Tier,
}

impl LocalBlock {
    pub fn signature(&self) -> &Type {
        &self.signature
    }

    pub fn payload(&self) -> &Expr {
        &self.payload
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Parameter type, `None` for a no-argument block.
    pub fn parameter_type(&self) -> Option<&Type> {
        self.signature.as_function().and_then(|(p, _)| p)
    }

    pub fn result_type(&self) -> &Type {
        self.signature
            .as_function()
            .map(|(_, r)| r)
            .unwrap_or(&self.signature)
    }
}

impl fmt::Display for LocalBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.payload)
    }
}

/// Extract `candidate` as a block for `slot`, placed at `tier`, with
/// signature `expected`.
pub fn extract(
    candidate: &Expr,
    expected: &Type,
    tier: Tier,
    slot: &str,
) -> Result<LocalBlock, ExtractionError> {
    check_locality(candidate, tier, slot)?;
    if candidate.ty != *expected {
        return Err(TypeSignatureMismatchError {
            slot: slot.to_string(),
            expected: expected.clone(),
            actual: candidate.ty.clone(),
        }
        .into());
    }
    trace!("extracted `{slot}` : {expected} @ {tier}");
    Ok(LocalBlock {
        signature: expected.clone(),
        payload: Arc::new(candidate.clone()),
        tier,
    })
}

fn leak(slot: &str, expr: &Expr, reason: Leakage) -> ExtractionError {
    CrossTierLeakageError {
        slot: slot.to_string(),
        expr: expr.to_string(),
        reason,
    }
    .into()
}

fn check_locality(candidate: &Expr, required: Tier, slot: &str) -> Result<(), ExtractionError> {
    let tree = classify(candidate).map_err(|e| {
        leak(
            slot,
            candidate,
            Leakage::Unlowerable {
                detail: e.to_string(),
            },
        )
    })?;

    if required != Tier::CrossTier {
        let mut primitive = None;
        candidate.visit(&mut |e| {
            if primitive.is_some() {
                return;
            }
            if let ExprKind::Intrinsic { uri } = &e.kind {
                let crossing = match IntrinsicDef::from_uri(uri) {
                    Some(IntrinsicDef::CrossTier(_)) => true,
                    Some(IntrinsicDef::Local(_)) => false,
                    None => e.ty.placements().is_cross_tier(),
                };
                if crossing {
                    primitive = Some(e.clone());
                }
            }
        });
        if let Some(e) = primitive {
            let uri = match &e.kind {
                ExprKind::Intrinsic { uri } => uri.clone(),
                _ => String::new(),
            };
            return Err(leak(slot, &e, Leakage::CrossTierIntrinsic { uri }));
        }
    }

    if let Some(name) = candidate.free_references().into_iter().next() {
        return Err(leak(
            slot,
            candidate,
            Leakage::FreeReference { name },
        ));
    }

    let mut foreign: Option<(&Expr, Tier)> = None;
    tree.walk(candidate, &mut |e, t| {
        if foreign.is_none() && !t.fits(required) {
            foreign = Some((e, t));
        }
    });
    if let Some((e, found)) = foreign {
        return Err(leak(slot, e, Leakage::ForeignTier { found, required }));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intrinsics;
    use crate::ir::Builtin;

    fn add_one() -> Expr {
        let add = Expr::builtin(Builtin::Add, &Type::int32()).unwrap();
        let x = Expr::reference("x", Type::int32());
        let body = Expr::call(add, Some(Expr::tuple(vec![x, Expr::int(1)]))).unwrap();
        Expr::lambda(Some(("x".into(), Type::int32())), body)
    }

    fn int_to_int() -> Type {
        Type::function(Some(Type::int32()), Type::int32())
    }

    #[test]
    fn extracts_pure_lambda() {
        let block = extract(&add_one(), &int_to_int(), Tier::Unplaced, "prepare").unwrap();
        assert_eq!(block.signature(), &int_to_int());
        assert_eq!(block.result_type(), &Type::int32());
        assert_eq!(block.tier(), Tier::Unplaced);
    }

    #[test]
    fn signature_mismatch_names_slot() {
        let expected = Type::function(Some(Type::float32()), Type::int32());
        let err = extract(&add_one(), &expected, Tier::Unplaced, "report").unwrap_err();
        match err {
            ExtractionError::Signature(e) => {
                assert_eq!(e.slot, "report");
                assert_eq!(e.actual, int_to_int());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn free_reference_leaks() {
        let lam = Expr::lambda(
            Some(("x".into(), Type::int32())),
            Expr::reference("outer", Type::int32()),
        );
        let err = extract(&lam, &int_to_int(), Tier::Unplaced, "work").unwrap_err();
        match err {
            ExtractionError::Leakage(e) => assert_eq!(
                e.reason,
                Leakage::FreeReference {
                    name: "outer".into()
                }
            ),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cross_tier_primitive_leaks_before_signature_check() {
        let s_ty = Type::at_coordinator(Type::int32());
        let body = intrinsics::broadcast(Expr::reference("s", s_ty.clone())).unwrap();
        let lam = Expr::lambda(Some(("s".into(), s_ty)), body);
        let err = extract(&lam, &int_to_int(), Tier::Coordinator, "server_prepare").unwrap_err();
        match err {
            ExtractionError::Leakage(e) => {
                assert_eq!(
                    e.reason,
                    Leakage::CrossTierIntrinsic {
                        uri: "federated_broadcast".into()
                    }
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn placed_value_in_unplaced_block_leaks() {
        let s_ty = Type::at_coordinator(Type::int32());
        let lam = Expr::lambda(Some(("s".into(), s_ty.clone())), Expr::reference("s", s_ty.clone()));
        let expected = Type::function(Some(s_ty.clone()), s_ty);
        let err = extract(&lam, &expected, Tier::Unplaced, "prepare").unwrap_err();
        assert!(matches!(
            err,
            ExtractionError::Leakage(CrossTierLeakageError {
                reason: Leakage::ForeignTier {
                    found: Tier::Coordinator,
                    required: Tier::Unplaced
                },
                ..
            })
        ));
        // The same lambda is fine as a coordinator block.
        assert!(extract(&lam, &lam.ty, Tier::Coordinator, "server_prepare").is_ok());
    }
}
