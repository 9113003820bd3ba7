// pipeline.rs — Compilation state and pass orchestration
//
// Holds all pass artifacts and runs the minimal set of passes for a given
// terminal PassId.
//
// Preconditions: the parsed program is set before calling run_pipeline.
// Postconditions: all artifacts for required passes are populated, or has_error is set.
// Failure modes: any pass emitting error-level diagnostics.
// Side effects: calls on_pass_complete after each pass for immediate display;
//   prints per-pass timings when verbose.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::ast;
use crate::diag::{codes, DiagLevel, Diagnostic};
use crate::error::CompileError;
use crate::eval::{self, EvalOptions, Value};
use crate::forms::{Form, FormParts, Template};
use crate::intrinsics::{self, IntrinsicCall};
use crate::ir::Expr;
use crate::pass::{descriptor, required_passes, PassId};
use crate::placement::{self, TierTree};

// ── Options and artifacts ──────────────────────────────────────────────────

/// Inputs that select what the pipeline computes.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub template: Template,
    /// Initial state literal, for evaluation.
    pub state: Option<String>,
    /// One data literal per participant, for evaluation.
    pub data: Vec<String>,
    pub eval: EvalOptions,
}

impl PipelineOptions {
    pub fn new(template: Template) -> Self {
        Self {
            template,
            state: None,
            data: Vec::new(),
            eval: EvalOptions::default(),
        }
    }
}

/// Result of the evaluate pass: the round and its form agree on `result`.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub state: Value,
    pub data: Vec<Value>,
    pub result: Value,
}

/// Provenance metadata for reproducible builds and cache-key use.
///
/// `source_hash`: SHA-256 of the raw source text.
/// `form_fingerprint`: SHA-256 of the form's canonical JSON, when one was built.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub form_fingerprint: Option<[u8; 32]>,
    pub compiler_version: &'static str,
}

#[derive(Serialize)]
struct ProvenanceJson<'a> {
    source_hash: String,
    form_fingerprint: Option<String>,
    template: Option<&'a str>,
    compiler_version: &'a str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }

    pub fn form_fingerprint_hex(&self) -> Option<String> {
        self.form_fingerprint.as_ref().map(bytes_to_hex)
    }

    /// Serialize provenance as pretty JSON for `--emit provenance`.
    pub fn to_json(&self, template: Option<Template>) -> serde_json::Result<String> {
        let json = ProvenanceJson {
            source_hash: self.source_hash_hex(),
            form_fingerprint: self.form_fingerprint_hex(),
            template: template.map(Template::name),
            compiler_version: self.compiler_version,
        };
        serde_json::to_string_pretty(&json)
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

/// Compute provenance from source text and the compiled form, if any.
pub fn compute_provenance(source: &str, form: Option<&Form>) -> serde_json::Result<Provenance> {
    use sha2::{Digest, Sha256};

    let source_hash = {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        hash
    };

    Ok(Provenance {
        source_hash,
        form_fingerprint: form.map(Form::fingerprint).transpose()?,
        compiler_version: env!("CARGO_PKG_VERSION"),
    })
}

/// Holds all compilation artifacts and accumulated diagnostics.
pub struct CompilationState {
    pub program: ast::Expr,
    pub round: Option<Expr>,
    pub tiers: Option<TierTree>,
    pub boundaries: Option<Vec<IntrinsicCall>>,
    pub parts: Option<FormParts>,
    pub form: Option<Form>,
    pub synthesized: Option<Expr>,
    pub evaluation: Option<Evaluation>,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub provenance: Option<Provenance>,
}

impl CompilationState {
    pub fn new(program: ast::Expr) -> Self {
        Self {
            program,
            round: None,
            tiers: None,
            boundaries: None,
            parts: None,
            form: None,
            synthesized: None,
            evaluation: None,
            diagnostics: Vec::new(),
            has_error: false,
            provenance: None,
        }
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Pipeline execution failed due to error-level diagnostics in a pass.
/// The specific diagnostics are available in `CompilationState.diagnostics`.
#[derive(Debug)]
pub struct PipelineError {
    /// The pass that produced the error.
    pub failing_pass: PassId,
}

fn has_error_diags(diags: &[Diagnostic]) -> bool {
    diags.iter().any(|d| d.level == DiagLevel::Error)
}

/// Per-pass post-processing: callback, accumulate, verbose, error check.
fn finish_pass(
    state: &mut CompilationState,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: Duration,
    verbose: bool,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    on_pass_complete(pass_id, &diags);
    let is_err = has_error_diags(&diags);
    state.diagnostics.extend(diags);
    if verbose {
        eprintln!(
            "mrfc: {} complete, {:.1}ms",
            descriptor(pass_id).name,
            elapsed.as_secs_f64() * 1000.0
        );
    }
    if is_err {
        state.has_error = true;
        return Err(PipelineError {
            failing_pass: pass_id,
        });
    }
    Ok(())
}

/// Split a pass result into its artifact and diagnostics.
fn split<T>(result: Result<T, Diagnostic>) -> (Option<T>, Vec<Diagnostic>) {
    match result {
        Ok(v) => (Some(v), Vec::new()),
        Err(d) => (None, vec![d]),
    }
}

/// An artifact a pass depends on is absent: its producer did not run.
fn missing(pass_id: PassId, artifact: &str) -> Diagnostic {
    Diagnostic::error(
        codes::E0800,
        format!("internal: {} ran without {artifact}", descriptor(pass_id).name),
    )
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → verbose → error check.
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    options: &PipelineOptions,
    verbose: bool,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    for pass_id in required_passes(terminal) {
        let t = Instant::now();
        let diags = run_pass(state, pass_id, options);
        let elapsed = t.elapsed();
        finish_pass(state, pass_id, diags, elapsed, verbose, &mut on_pass_complete)?;
    }
    Ok(())
}

fn run_pass(state: &mut CompilationState, pass_id: PassId, options: &PipelineOptions) -> Vec<Diagnostic> {
    let template = options.template;
    match pass_id {
        PassId::Elaborate => {
            let (round, diags) = split(crate::elaborate::elaborate(&state.program));
            state.round = round;
            diags
        }
        PassId::Classify => {
            let Some(round) = state.round.as_ref() else {
                return vec![missing(pass_id, "a round")];
            };
            let (tiers, diags) = split(
                placement::classify(round).map_err(|e| Diagnostic::from(&CompileError::from(e))),
            );
            state.tiers = tiers;
            diags
        }
        PassId::Recognize => {
            let Some(round) = state.round.as_ref() else {
                return vec![missing(pass_id, "a round")];
            };
            let (calls, diags) = split(
                intrinsics::collect(round).map_err(|e| Diagnostic::from(&CompileError::from(e))),
            );
            state.boundaries = calls;
            diags
        }
        PassId::Match => {
            let Some(round) = state.round.as_ref() else {
                return vec![missing(pass_id, "a round")];
            };
            let (parts, diags) = split(
                crate::matcher::match_round(round, template).map_err(|e| Diagnostic::from(&e)),
            );
            state.parts = parts;
            diags
        }
        PassId::Validate => {
            let Some(parts) = state.parts.clone() else {
                return vec![missing(pass_id, "form parts")];
            };
            let (form, diags) =
                split(Form::from_parts(parts).map_err(|e| Diagnostic::from(&CompileError::from(e))));
            state.form = form;
            diags
        }
        PassId::Synthesize => {
            let Some(form) = state.form.as_ref() else {
                return vec![missing(pass_id, "a form")];
            };
            let (round, diags) =
                split(crate::synthesize::synthesize(form).map_err(|e| Diagnostic::from(&e)));
            state.synthesized = round;
            diags
        }
        PassId::Evaluate => {
            let (Some(round), Some(form)) = (state.round.as_ref(), state.form.as_ref()) else {
                return vec![missing(pass_id, "a round and its form")];
            };
            let (evaluation, diags) = split(evaluate(round, form, options));
            state.evaluation = evaluation;
            diags
        }
    }
}

/// Parse a value literal such as `5` or `<1, 2.5>`.
pub fn parse_value(literal: &str) -> Result<Value, Diagnostic> {
    let expr = crate::elaborate::parse_expr(literal).map_err(|mut ds| {
        if ds.is_empty() {
            Diagnostic::error(codes::E0100, format!("invalid value `{literal}`"))
        } else {
            ds.remove(0)
        }
    })?;
    if !expr.is_closed() || expr.ty.contains_federated() {
        return Err(Diagnostic::error(
            codes::E0104,
            format!("`{literal}` is not a closed unplaced value"),
        ));
    }
    eval::evaluate_closed(&expr).map_err(|e| Diagnostic::from(&e))
}

fn evaluate(round: &Expr, form: &Form, options: &PipelineOptions) -> Result<Evaluation, Diagnostic> {
    let Some(state) = options.state.as_deref() else {
        return Err(Diagnostic::error(codes::E0800, "evaluation needs an initial state")
            .with_hint("pass --state <value>"));
    };
    let state = parse_value(state)?;
    let data = options
        .data
        .iter()
        .map(|d| parse_value(d))
        .collect::<Result<Vec<_>, _>>()?;

    let expected = eval::evaluate_round(round, state.clone(), data.clone(), &options.eval)
        .map_err(|e| Diagnostic::from(&e))?;
    let actual = eval::evaluate_form(form, state.clone(), data.clone(), &options.eval)
        .map_err(|e| Diagnostic::from(&e))?;
    if actual != expected {
        return Err(Diagnostic::error(
            codes::E0802,
            format!("{} form produced {actual} but the round produced {expected}", form.template()),
        ));
    }
    Ok(Evaluation {
        state,
        data,
        result: expected,
    })
}
