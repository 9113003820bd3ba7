// diag.rs — Unified diagnostics model
//
// Shared diagnostic type for every phase: front-end errors carry a source
// span, compiler errors carry the slot context of the error they wrap.
// Codes are stable once assigned.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use chumsky::span::Span as _;

use crate::ast::Span;
use crate::error::{CompileError, SynthesisError};
use crate::eval::EvalError;
use crate::release::ReleaseError;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0100`, `E0500`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Assigned codes, grouped by phase.
pub mod codes {
    use super::DiagCode;

    // E01xx: parse and elaboration
    pub const E0100: DiagCode = DiagCode("E0100"); // syntax error
    pub const E0101: DiagCode = DiagCode("E0101"); // unbound name
    pub const E0102: DiagCode = DiagCode("E0102"); // unknown type name
    pub const E0103: DiagCode = DiagCode("E0103"); // unknown placement
    pub const E0104: DiagCode = DiagCode("E0104"); // ill-typed expression
    pub const E0105: DiagCode = DiagCode("E0105"); // unknown builtin
    pub const E0106: DiagCode = DiagCode("E0106"); // intrinsic outside call position

    // E03xx: placement and intrinsics
    pub const E0300: DiagCode = DiagCode("E0300"); // malformed IR
    pub const E0301: DiagCode = DiagCode("E0301"); // unsupported intrinsic

    // E04xx: local-block extraction
    pub const E0400: DiagCode = DiagCode("E0400"); // signature mismatch
    pub const E0401: DiagCode = DiagCode("E0401"); // cross-tier leakage

    // E05xx: matching
    pub const E0500: DiagCode = DiagCode("E0500"); // shape mismatch

    // E06xx: validation
    pub const E0600: DiagCode = DiagCode("E0600"); // incompatible form

    // E07xx: synthesis
    pub const E0700: DiagCode = DiagCode("E0700"); // synthesis failed

    // E08xx: evaluation
    pub const E0800: DiagCode = DiagCode("E0800"); // evaluation failed
    pub const E0801: DiagCode = DiagCode("E0801"); // release rejected
    pub const E0802: DiagCode = DiagCode("E0802"); // form disagrees with round
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A compiler diagnostic emitted by any phase.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub span: Option<Span>,
    pub message: String,
    pub hint: Option<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, span or hint.
    pub fn new(level: DiagLevel, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            span: None,
            message: message.into(),
            hint: None,
        }
    }

    pub fn error(code: DiagCode, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, message).with_code(code)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a source location.
    pub fn at(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Render with a `line:column` prefix resolved against `source`.
    pub fn render(&self, file: &str, source: &str) -> String {
        match self.span {
            Some(span) => {
                let before = &source[..span.start().min(source.len())];
                let line = before.matches('\n').count() + 1;
                let column = before.len() - before.rfind('\n').map_or(0, |i| i + 1) + 1;
                format!("{file}:{line}:{column}: {self}")
            }
            None => format!("{file}: {self}"),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

// ── Conversions ──────────────────────────────────────────────────────────

impl From<&CompileError> for Diagnostic {
    fn from(e: &CompileError) -> Self {
        let code = match e {
            CompileError::Type(_) => codes::E0104,
            CompileError::MalformedIr(_) => codes::E0300,
            CompileError::UnsupportedIntrinsic(_) => codes::E0301,
            CompileError::TypeSignatureMismatch(_) => codes::E0400,
            CompileError::CrossTierLeakage(_) => codes::E0401,
            CompileError::ShapeMismatch(_) => codes::E0500,
            CompileError::IncompatibleForm(_) => codes::E0600,
        };
        let d = Diagnostic::error(code, e.to_string());
        match e {
            CompileError::ShapeMismatch(m) => d.with_hint(format!(
                "the round is not in {} shape; try another --template",
                m.template
            )),
            CompileError::UnsupportedIntrinsic(_) => d.with_hint(
                "supported cross-tier intrinsics: federated_broadcast, federated_aggregate \
                 and the three federated_secure_* sums",
            ),
            _ => d,
        }
    }
}

impl From<&SynthesisError> for Diagnostic {
    fn from(e: &SynthesisError) -> Self {
        Diagnostic::error(codes::E0700, e.to_string())
    }
}

impl From<&EvalError> for Diagnostic {
    fn from(e: &EvalError) -> Self {
        Diagnostic::error(codes::E0800, e.to_string())
    }
}

impl From<&ReleaseError> for Diagnostic {
    fn from(e: &ReleaseError) -> Self {
        Diagnostic::error(codes::E0801, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RoundStep, ShapeMismatchError};
    use crate::forms::Template;

    #[test]
    fn display_without_code() {
        let d = Diagnostic::new(DiagLevel::Error, "something failed");
        assert_eq!(format!("{d}"), "error: something failed");
    }

    #[test]
    fn display_with_code_and_hint() {
        let d = Diagnostic::new(DiagLevel::Warning, "unused binding")
            .with_code(DiagCode("W0001"))
            .with_hint("remove it");
        assert_eq!(format!("{d}"), "warning[W0001]: unused binding\n  hint: remove it");
    }

    #[test]
    fn render_resolves_line_and_column() {
        let source = "let\n  a = ;";
        let span: Span = (10..11).into();
        let d = Diagnostic::error(codes::E0100, "unexpected `;`").at(span);
        assert_eq!(
            d.render("r.rir", source),
            "r.rir:2:7: error[E0100]: unexpected `;`"
        );
    }

    #[test]
    fn compile_errors_get_stable_codes() {
        let e: CompileError = ShapeMismatchError {
            template: Template::MapReduce,
            step: RoundStep::Aggregation,
            slot: "zero".into(),
            detail: "no aggregation call".into(),
        }
        .into();
        let d = Diagnostic::from(&e);
        assert_eq!(d.code, Some(codes::E0500));
        assert!(d.hint.as_deref().is_some_and(|h| h.contains("map-reduce")));
        assert!(d.span.is_none());
    }
}
