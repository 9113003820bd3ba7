// error.rs — Error taxonomy for compilation, validation and synthesis
//
// One error type per component. `CompileError` is the union returned by the
// forward direction; `SynthesisError` by the reverse direction.
//
// Preconditions: none (types only).
// Postconditions: every error carries the slot / expected / actual context
//   needed to render a diagnostic without re-running the failing pass.
// Failure modes: none.
// Side effects: none.

use std::fmt;

use thiserror::Error;

use crate::forms::Template;
use crate::placement::Tier;
use crate::types::Type;

// ── IR construction ─────────────────────────────────────────────────────────

/// A typed IR node was constructed from ill-typed parts.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("type error: {message}")]
pub struct TypeError {
    pub message: String,
}

impl TypeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// ── Placement / intrinsics ─────────────────────────────────────────────────

/// A call that is not an intrinsic mixes coordinator and participant values.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("malformed IR: call `{call}` mixes coordinator and participant values")]
pub struct MalformedIrError {
    pub call: String,
}

/// A tier-crossing intrinsic outside the supported closed set.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("unsupported cross-tier intrinsic `{uri}` of type {ty}")]
pub struct UnsupportedIntrinsicError {
    pub uri: String,
    pub ty: Type,
}

// ── Local-block extraction ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
#[error("slot `{slot}`: expected signature {expected}, found {actual}")]
pub struct TypeSignatureMismatchError {
    pub slot: String,
    pub expected: Type,
    pub actual: Type,
}

/// Why a candidate block is not local to its slot's tier.
#[derive(Debug, Clone, PartialEq)]
pub enum Leakage {
    /// A node lives at a tier the slot does not run on.
    ForeignTier { found: Tier, required: Tier },
    /// A broadcast / aggregation primitive inside a pure block.
    CrossTierIntrinsic { uri: String },
    /// The block captures a name bound outside it.
    FreeReference { name: String },
    /// A sub-expression cannot be expressed inside the slot at all.
    Unlowerable { detail: String },
}

impl fmt::Display for Leakage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Leakage::ForeignTier { found, required } => {
                write!(f, "value placed at {found} inside a {required} block")
            }
            Leakage::CrossTierIntrinsic { uri } => {
                write!(f, "cross-tier intrinsic `{uri}` inside a local block")
            }
            Leakage::FreeReference { name } => write!(f, "free reference to `{name}`"),
            Leakage::Unlowerable { detail } => write!(f, "{detail}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("slot `{slot}`: cross-tier leakage in `{expr}`: {reason}")]
pub struct CrossTierLeakageError {
    pub slot: String,
    pub expr: String,
    pub reason: Leakage,
}

/// Failure of the local-block extractor.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractionError {
    #[error(transparent)]
    Signature(#[from] TypeSignatureMismatchError),
    #[error(transparent)]
    Leakage(#[from] CrossTierLeakageError),
}

// ── Shape matching ─────────────────────────────────────────────────────────

/// Matcher steps, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RoundStep {
    Signature,
    Broadcast,
    Work,
    Aggregation,
    Result,
}

impl fmt::Display for RoundStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoundStep::Signature => "signature",
            RoundStep::Broadcast => "broadcast",
            RoundStep::Work => "work",
            RoundStep::Aggregation => "aggregation",
            RoundStep::Result => "result",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{template} template, {step} step: cannot bind slot `{slot}`: {detail}")]
pub struct ShapeMismatchError {
    pub template: Template,
    pub step: RoundStep,
    pub slot: String,
    pub detail: String,
}

// ── Validation ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
pub struct IncompatibleFormError {
    pub slot: String,
    pub constraint: String,
    pub expected: Option<Type>,
    pub actual: Option<Type>,
}

impl fmt::Display for IncompatibleFormError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "incompatible form at `{}`: {}", self.slot, self.constraint)?;
        match (&self.expected, &self.actual) {
            (Some(e), Some(a)) => write!(f, " (expected {e}, found {a})"),
            (Some(e), None) => write!(f, " (expected {e})"),
            (None, Some(a)) => write!(f, " (found {a})"),
            (None, None) => Ok(()),
        }
    }
}

// ── Union ──────────────────────────────────────────────────────────────────

/// Any failure of `compile`. Nothing is partially committed on error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error(transparent)]
    MalformedIr(#[from] MalformedIrError),
    #[error(transparent)]
    UnsupportedIntrinsic(#[from] UnsupportedIntrinsicError),
    #[error(transparent)]
    TypeSignatureMismatch(#[from] TypeSignatureMismatchError),
    #[error(transparent)]
    CrossTierLeakage(#[from] CrossTierLeakageError),
    #[error(transparent)]
    ShapeMismatch(#[from] ShapeMismatchError),
    #[error(transparent)]
    IncompatibleForm(#[from] IncompatibleFormError),
}

impl From<ExtractionError> for CompileError {
    fn from(e: ExtractionError) -> Self {
        match e {
            ExtractionError::Signature(e) => CompileError::TypeSignatureMismatch(e),
            ExtractionError::Leakage(e) => CompileError::CrossTierLeakage(e),
        }
    }
}

impl CompileError {
    /// Slot named by the error, when it names one.
    pub fn slot(&self) -> Option<&str> {
        match self {
            CompileError::TypeSignatureMismatch(e) => Some(&e.slot),
            CompileError::CrossTierLeakage(e) => Some(&e.slot),
            CompileError::ShapeMismatch(e) => Some(&e.slot),
            CompileError::IncompatibleForm(e) => Some(&e.slot),
            CompileError::Type(_)
            | CompileError::MalformedIr(_)
            | CompileError::UnsupportedIntrinsic(_) => None,
        }
    }
}

// ── Synthesis ──────────────────────────────────────────────────────────────

/// The synthesizer could not wire a form's slots into a round.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("synthesis failed at `{slot}`: {message}")]
pub struct SynthesisError {
    pub slot: String,
    pub message: String,
}

impl SynthesisError {
    pub fn new(slot: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            slot: slot.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_error_exposes_slot() {
        let err: CompileError = ShapeMismatchError {
            template: Template::MapReduce,
            step: RoundStep::Aggregation,
            slot: "zero".into(),
            detail: "no aggregation".into(),
        }
        .into();
        assert_eq!(err.slot(), Some("zero"));
        assert_eq!(
            err.to_string(),
            "map-reduce template, aggregation step: cannot bind slot `zero`: no aggregation"
        );
    }

    #[test]
    fn extraction_error_flattens_into_compile_error() {
        let inner = TypeSignatureMismatchError {
            slot: "merge".into(),
            expected: Type::int32(),
            actual: Type::float32(),
        };
        let err: CompileError = ExtractionError::from(inner.clone()).into();
        assert_eq!(err, CompileError::TypeSignatureMismatch(inner));
    }

    #[test]
    fn incompatible_form_display_includes_types() {
        let err = IncompatibleFormError {
            slot: "accumulate".into(),
            constraint: "accumulator type must match zero".into(),
            expected: Some(Type::int32()),
            actual: Some(Type::float32()),
        };
        assert_eq!(
            err.to_string(),
            "incompatible form at `accumulate`: accumulator type must match zero (expected int32, found float32)"
        );
    }

    #[test]
    fn round_steps_are_ordered() {
        assert!(RoundStep::Signature < RoundStep::Broadcast);
        assert!(RoundStep::Aggregation < RoundStep::Result);
    }
}
