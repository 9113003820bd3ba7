// ir.rs — Typed round-computation IR
//
// Expression tree with a type on every node. Constructors that combine nodes
// (`call`, `select`, `builtin`) check types and fail with `TypeError`, so an
// `Expr` built through this API is well-typed by construction.
//
// Preconditions: none.
// Postconditions: `Display` prints the textual syntax accepted by `parser`;
//   elaborating the printed text yields an equal tree.
// Failure modes: `TypeError` from the checked constructors.
// Side effects: none.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::intrinsics::IntrinsicDef;
use crate::names::NameAllocator;
use crate::types::Type;

// ── Nodes ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Reference(String),
    Literal(Literal),
    Struct(Vec<Expr>),
    Selection {
        source: Box<Expr>,
        index: usize,
    },
    Call {
        function: Box<Expr>,
        argument: Option<Box<Expr>>,
    },
    /// Parameter type lives in the node's function type.
    Lambda {
        parameter: Option<String>,
        body: Box<Expr>,
    },
    /// Sequential `let`: each local sees the ones before it.
    Block {
        locals: Vec<(String, Expr)>,
        result: Box<Expr>,
    },
    Intrinsic {
        uri: String,
    },
    Builtin(Builtin),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
}

/// Pure arithmetic available inside local blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Builtin {
    Add,
    Sub,
    Mul,
    Max,
    Min,
    SequenceSum,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Builtin> {
        match name {
            "add" => Some(Builtin::Add),
            "sub" => Some(Builtin::Sub),
            "mul" => Some(Builtin::Mul),
            "max" => Some(Builtin::Max),
            "min" => Some(Builtin::Min),
            "sequence_sum" => Some(Builtin::SequenceSum),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Add => "add",
            Builtin::Sub => "sub",
            Builtin::Mul => "mul",
            Builtin::Max => "max",
            Builtin::Min => "min",
            Builtin::SequenceSum => "sequence_sum",
        }
    }

    /// Function type of the builtin instantiated at `operand`.
    ///
    /// Binary operators are `(<T,T> -> T)`; `sequence_sum` is `(T* -> T)`.
    pub fn signature(self, operand: &Type) -> Result<Type, TypeError> {
        if !operand.is_numeric() {
            return Err(TypeError::new(format!(
                "`{}` requires a numeric operand type, found {operand}",
                self.name()
            )));
        }
        let parameter = match self {
            Builtin::SequenceSum => Type::sequence(operand.clone()),
            _ => Type::tuple(vec![operand.clone(), operand.clone()]),
        };
        Ok(Type::function(Some(parameter), operand.clone()))
    }
}

// ── Constructors ────────────────────────────────────────────────────────────

impl Expr {
    pub fn new(kind: ExprKind, ty: Type) -> Expr {
        Expr { kind, ty }
    }

    pub fn reference(name: impl Into<String>, ty: Type) -> Expr {
        Expr::new(ExprKind::Reference(name.into()), ty)
    }

    pub fn int(value: i64) -> Expr {
        Expr::new(ExprKind::Literal(Literal::Int(value)), Type::int32())
    }

    pub fn float(value: f64) -> Expr {
        Expr::new(ExprKind::Literal(Literal::Float(value)), Type::float32())
    }

    pub fn boolean(value: bool) -> Expr {
        Expr::new(ExprKind::Literal(Literal::Bool(value)), Type::boolean())
    }

    pub fn tuple(elements: Vec<Expr>) -> Expr {
        let ty = Type::tuple(elements.iter().map(|e| e.ty.clone()).collect());
        Expr::new(ExprKind::Struct(elements), ty)
    }

    /// The empty tuple `<>`.
    pub fn empty() -> Expr {
        Expr::tuple(Vec::new())
    }

    pub fn select(source: Expr, index: usize) -> Result<Expr, TypeError> {
        let ty = match source.ty.as_struct() {
            Some(elements) => elements.get(index).cloned().ok_or_else(|| {
                TypeError::new(format!(
                    "index {index} out of range for {} (`{source}`)",
                    source.ty
                ))
            })?,
            None => {
                return Err(TypeError::new(format!(
                    "cannot select [{index}] from non-tuple {} (`{source}`)",
                    source.ty
                )))
            }
        };
        Ok(Expr::new(
            ExprKind::Selection {
                source: Box::new(source),
                index,
            },
            ty,
        ))
    }

    pub fn call(function: Expr, argument: Option<Expr>) -> Result<Expr, TypeError> {
        let (parameter, result) = function.ty.as_function().ok_or_else(|| {
            TypeError::new(format!(
                "cannot call non-function `{function}` of type {}",
                function.ty
            ))
        })?;
        match (parameter, &argument) {
            (None, None) => {}
            (Some(p), Some(a)) if p.is_assignable_from(&a.ty) => {}
            (Some(p), Some(a)) => {
                return Err(TypeError::new(format!(
                    "argument `{a}` of type {} does not match parameter {p} of `{function}`",
                    a.ty
                )))
            }
            (Some(p), None) => {
                return Err(TypeError::new(format!(
                    "`{function}` expects an argument of type {p}"
                )))
            }
            (None, Some(a)) => {
                return Err(TypeError::new(format!(
                    "`{function}` takes no argument, given `{a}`"
                )))
            }
        }
        let ty = result.clone();
        Ok(Expr::new(
            ExprKind::Call {
                function: Box::new(function),
                argument: argument.map(Box::new),
            },
            ty,
        ))
    }

    pub fn lambda(parameter: Option<(String, Type)>, body: Expr) -> Expr {
        let (name, param_ty) = match parameter {
            Some((name, ty)) => (Some(name), Some(ty)),
            None => (None, None),
        };
        let ty = Type::function(param_ty, body.ty.clone());
        Expr::new(
            ExprKind::Lambda {
                parameter: name,
                body: Box::new(body),
            },
            ty,
        )
    }

    /// A block; with no locals this is just `result`.
    pub fn block(locals: Vec<(String, Expr)>, result: Expr) -> Expr {
        if locals.is_empty() {
            return result;
        }
        let ty = result.ty.clone();
        Expr::new(
            ExprKind::Block {
                locals,
                result: Box::new(result),
            },
            ty,
        )
    }

    pub fn intrinsic(uri: impl Into<String>, ty: Type) -> Expr {
        Expr::new(ExprKind::Intrinsic { uri: uri.into() }, ty)
    }

    pub fn builtin(builtin: Builtin, operand: &Type) -> Result<Expr, TypeError> {
        let ty = builtin.signature(operand)?;
        Ok(Expr::new(ExprKind::Builtin(builtin), ty))
    }
}

// ── Queries ─────────────────────────────────────────────────────────────────

impl Expr {
    /// Direct sub-expressions in evaluation order.
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Reference(_)
            | ExprKind::Literal(_)
            | ExprKind::Intrinsic { .. }
            | ExprKind::Builtin(_) => Vec::new(),
            ExprKind::Struct(elements) => elements.iter().collect(),
            ExprKind::Selection { source, .. } => vec![source],
            ExprKind::Call { function, argument } => {
                let mut out = vec![function.as_ref()];
                if let Some(a) = argument {
                    out.push(a);
                }
                out
            }
            ExprKind::Lambda { body, .. } => vec![body],
            ExprKind::Block { locals, result } => {
                let mut out: Vec<&Expr> = locals.iter().map(|(_, v)| v).collect();
                out.push(result);
                out
            }
        }
    }

    /// Pre-order walk.
    pub fn visit(&self, f: &mut impl FnMut(&Expr)) {
        f(self);
        for child in self.children() {
            child.visit(f);
        }
    }

    /// Names this node binds or references.
    pub fn binder_names(&self) -> Vec<&str> {
        match &self.kind {
            ExprKind::Reference(name) => vec![name.as_str()],
            ExprKind::Lambda {
                parameter: Some(p), ..
            } => vec![p.as_str()],
            ExprKind::Block { locals, .. } => locals.iter().map(|(n, _)| n.as_str()).collect(),
            _ => Vec::new(),
        }
    }

    /// `(name, type)` of a lambda's parameter.
    pub fn lambda_parameter(&self) -> Option<(&str, &Type)> {
        match (&self.kind, self.ty.as_function()) {
            (
                ExprKind::Lambda {
                    parameter: Some(name),
                    ..
                },
                Some((Some(ty), _)),
            ) => Some((name, ty)),
            _ => None,
        }
    }

    pub fn is_lambda(&self) -> bool {
        matches!(self.kind, ExprKind::Lambda { .. })
    }

    /// Names referenced but not bound within this expression.
    pub fn free_references(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let mut bound = Vec::new();
        self.collect_free(&mut bound, &mut out);
        out
    }

    pub fn is_closed(&self) -> bool {
        self.free_references().is_empty()
    }

    fn collect_free(&self, bound: &mut Vec<String>, out: &mut BTreeSet<String>) {
        match &self.kind {
            ExprKind::Reference(name) => {
                if !bound.iter().any(|b| b == name) {
                    out.insert(name.clone());
                }
            }
            ExprKind::Lambda { parameter, body } => {
                if let Some(p) = parameter {
                    bound.push(p.clone());
                    body.collect_free(bound, out);
                    bound.pop();
                } else {
                    body.collect_free(bound, out);
                }
            }
            ExprKind::Block { locals, result } => {
                let depth = bound.len();
                for (name, value) in locals {
                    value.collect_free(bound, out);
                    bound.push(name.clone());
                }
                result.collect_free(bound, out);
                bound.truncate(depth);
            }
            _ => {
                for child in self.children() {
                    child.collect_free(bound, out);
                }
            }
        }
    }

    /// Number of nodes in the tree.
    pub fn size(&self) -> usize {
        let mut n = 0;
        self.visit(&mut |_| n += 1);
        n
    }
}

// ── Substitution ────────────────────────────────────────────────────────────

impl Expr {
    /// Replace free references by the mapped expressions.
    ///
    /// Binders that would capture a free name of a replacement are renamed.
    /// A selection from a tuple literal produced by the substitution is
    /// folded to the selected element.
    pub fn substitute(&self, map: &HashMap<String, Expr>) -> Expr {
        if map.is_empty() {
            return self.clone();
        }
        let avoid: HashSet<String> = map
            .values()
            .flat_map(|e| e.free_references())
            .collect();
        self.subst(map, &avoid)
    }

    fn subst(&self, map: &HashMap<String, Expr>, avoid: &HashSet<String>) -> Expr {
        match &self.kind {
            ExprKind::Reference(name) => match map.get(name) {
                Some(replacement) => replacement.clone(),
                None => self.clone(),
            },
            ExprKind::Literal(_) | ExprKind::Intrinsic { .. } | ExprKind::Builtin(_) => {
                self.clone()
            }
            ExprKind::Struct(elements) => Expr::new(
                ExprKind::Struct(elements.iter().map(|e| e.subst(map, avoid)).collect()),
                self.ty.clone(),
            ),
            ExprKind::Selection { source, index } => {
                let source = source.subst(map, avoid);
                if let ExprKind::Struct(elements) = &source.kind {
                    if let Some(element) = elements.get(*index) {
                        return element.clone();
                    }
                }
                Expr::new(
                    ExprKind::Selection {
                        source: Box::new(source),
                        index: *index,
                    },
                    self.ty.clone(),
                )
            }
            ExprKind::Call { function, argument } => Expr::new(
                ExprKind::Call {
                    function: Box::new(function.subst(map, avoid)),
                    argument: argument.as_ref().map(|a| Box::new(a.subst(map, avoid))),
                },
                self.ty.clone(),
            ),
            ExprKind::Lambda { parameter, body } => {
                let Some(param) = parameter else {
                    return Expr::new(
                        ExprKind::Lambda {
                            parameter: None,
                            body: Box::new(body.subst(map, avoid)),
                        },
                        self.ty.clone(),
                    );
                };
                let mut inner = map.clone();
                inner.remove(param);
                let mut inner_avoid = avoid.clone();
                let mut new_param = param.clone();
                if avoid.contains(param) && !inner.is_empty() {
                    new_param = fresh_binder(param, body, avoid);
                    let param_ty = self
                        .ty
                        .as_function()
                        .and_then(|(p, _)| p.cloned())
                        .unwrap_or_else(Type::empty);
                    inner.insert(param.clone(), Expr::reference(&new_param, param_ty));
                    inner_avoid.insert(new_param.clone());
                }
                let body = if inner.is_empty() {
                    body.as_ref().clone()
                } else {
                    body.subst(&inner, &inner_avoid)
                };
                Expr::new(
                    ExprKind::Lambda {
                        parameter: Some(new_param),
                        body: Box::new(body),
                    },
                    self.ty.clone(),
                )
            }
            ExprKind::Block { locals, result } => {
                let mut inner = map.clone();
                let mut inner_avoid = avoid.clone();
                let mut new_locals = Vec::with_capacity(locals.len());
                for (name, value) in locals {
                    let value = value.subst(&inner, &inner_avoid);
                    inner.remove(name);
                    let mut new_name = name.clone();
                    if inner_avoid.contains(name) && !inner.is_empty() {
                        new_name = fresh_binder(name, self, &inner_avoid);
                        inner.insert(name.clone(), Expr::reference(&new_name, value.ty.clone()));
                        inner_avoid.insert(new_name.clone());
                    }
                    new_locals.push((new_name, value));
                }
                let result = result.subst(&inner, &inner_avoid);
                Expr::block(new_locals, result)
            }
        }
    }
}

fn fresh_binder(base: &str, scope: &Expr, avoid: &HashSet<String>) -> String {
    let mut alloc = NameAllocator::avoiding(scope);
    for name in avoid {
        alloc.reserve(name.clone());
    }
    alloc.fresh(base)
}

// ── Type checking ───────────────────────────────────────────────────────────

impl Expr {
    /// Re-derive every node's type from its children and compare with the
    /// recorded one. Free references are taken at their recorded type.
    pub fn typecheck(&self) -> Result<(), TypeError> {
        let mut scope = Vec::new();
        self.check_in(&mut scope)
    }

    fn check_in(&self, scope: &mut Vec<(String, Type)>) -> Result<(), TypeError> {
        let mismatch = |expected: &Type| {
            TypeError::new(format!(
                "`{self}` is recorded as {} but has type {expected}",
                self.ty
            ))
        };
        match &self.kind {
            ExprKind::Reference(name) => {
                if let Some((_, ty)) = scope.iter().rev().find(|(n, _)| n == name) {
                    if *ty != self.ty {
                        return Err(mismatch(ty));
                    }
                }
                Ok(())
            }
            ExprKind::Literal(lit) => {
                let expected = match lit {
                    Literal::Int(_) => Type::int32(),
                    Literal::Float(_) => Type::float32(),
                    Literal::Bool(_) => Type::boolean(),
                };
                if expected != self.ty {
                    return Err(mismatch(&expected));
                }
                Ok(())
            }
            ExprKind::Struct(elements) => {
                for e in elements {
                    e.check_in(scope)?;
                }
                let expected = Type::tuple(elements.iter().map(|e| e.ty.clone()).collect());
                if expected != self.ty {
                    return Err(mismatch(&expected));
                }
                Ok(())
            }
            ExprKind::Selection { source, index } => {
                source.check_in(scope)?;
                let rebuilt = Expr::select(source.as_ref().clone(), *index)?;
                if rebuilt.ty != self.ty {
                    return Err(mismatch(&rebuilt.ty));
                }
                Ok(())
            }
            ExprKind::Call { function, argument } => {
                function.check_in(scope)?;
                if let Some(a) = argument {
                    a.check_in(scope)?;
                }
                if let (ExprKind::Intrinsic { uri }, Some(a)) = (&function.kind, argument) {
                    if let Some(def) = IntrinsicDef::from_uri(uri) {
                        let expected = def.signature(&a.ty)?;
                        if expected != function.ty {
                            return Err(TypeError::new(format!(
                                "intrinsic `{uri}` recorded as {} but its argument implies {expected}",
                                function.ty
                            )));
                        }
                    }
                }
                let rebuilt = Expr::call(
                    function.as_ref().clone(),
                    argument.as_ref().map(|a| a.as_ref().clone()),
                )?;
                if rebuilt.ty != self.ty {
                    return Err(mismatch(&rebuilt.ty));
                }
                Ok(())
            }
            ExprKind::Lambda { parameter, body } => {
                let (param_ty, result_ty) = self
                    .ty
                    .as_function()
                    .ok_or_else(|| TypeError::new(format!("lambda `{self}` has non-function type")))?;
                match (parameter, param_ty) {
                    (Some(name), Some(ty)) => {
                        scope.push((name.clone(), ty.clone()));
                        let r = body.check_in(scope);
                        scope.pop();
                        r?;
                    }
                    (None, None) => body.check_in(scope)?,
                    _ => {
                        return Err(TypeError::new(format!(
                            "lambda `{self}` parameter does not agree with its type"
                        )))
                    }
                }
                if body.ty != *result_ty {
                    return Err(mismatch(&Type::function(param_ty.cloned(), body.ty.clone())));
                }
                Ok(())
            }
            ExprKind::Block { locals, result } => {
                let depth = scope.len();
                let mut outcome = Ok(());
                for (name, value) in locals {
                    if let Err(e) = value.check_in(scope) {
                        outcome = Err(e);
                        break;
                    }
                    scope.push((name.clone(), value.ty.clone()));
                }
                if outcome.is_ok() {
                    outcome = result.check_in(scope);
                }
                scope.truncate(depth);
                outcome?;
                if result.ty != self.ty {
                    return Err(mismatch(&result.ty));
                }
                Ok(())
            }
            ExprKind::Intrinsic { .. } => Ok(()),
            ExprKind::Builtin(b) => {
                let operand = self
                    .ty
                    .as_function()
                    .map(|(_, r)| r.clone())
                    .ok_or_else(|| TypeError::new(format!("builtin `{}` has non-function type", b.name())))?;
                let expected = b.signature(&operand)?;
                if expected != self.ty {
                    return Err(mismatch(&expected));
                }
                Ok(())
            }
        }
    }
}

// ── Printing ────────────────────────────────────────────────────────────────

pub(crate) fn format_float(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e16 {
        format!("{v:.1}")
    } else {
        format!("{v:?}")
    }
}

impl Expr {
    fn fmt_in(&self, f: &mut fmt::Formatter<'_>, nested: bool) -> fmt::Result {
        match &self.kind {
            ExprKind::Reference(name) => write!(f, "{name}"),
            ExprKind::Literal(Literal::Int(v)) => write!(f, "{v}"),
            ExprKind::Literal(Literal::Float(v)) => write!(f, "{}", format_float(*v)),
            ExprKind::Literal(Literal::Bool(v)) => write!(f, "{v}"),
            ExprKind::Struct(elements) => {
                write!(f, "<")?;
                for (i, e) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    e.fmt_in(f, true)?;
                }
                write!(f, ">")
            }
            ExprKind::Selection { source, index } => {
                source.fmt_in(f, true)?;
                write!(f, "[{index}]")
            }
            ExprKind::Call { function, argument } => {
                match (&function.kind, argument) {
                    (ExprKind::Intrinsic { uri }, Some(a))
                        if IntrinsicDef::from_uri(uri)
                            .and_then(|d| d.signature(&a.ty).ok())
                            .is_some_and(|sig| sig == function.ty) =>
                    {
                        write!(f, "{uri}")?
                    }
                    _ => function.fmt_in(f, true)?,
                }
                write!(f, "(")?;
                if let Some(a) = argument {
                    a.fmt_in(f, true)?;
                }
                write!(f, ")")
            }
            ExprKind::Lambda { parameter, body } => {
                match (parameter, self.ty.as_function()) {
                    (Some(name), Some((Some(ty), _))) => write!(f, "({name}: {ty} -> ")?,
                    _ => write!(f, "( -> ")?,
                }
                body.fmt_in(f, false)?;
                write!(f, ")")
            }
            ExprKind::Block { locals, result } => {
                if nested {
                    write!(f, "(")?;
                }
                write!(f, "let ")?;
                for (i, (name, value)) in locals.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name} = ")?;
                    value.fmt_in(f, true)?;
                }
                write!(f, " in ")?;
                result.fmt_in(f, true)?;
                if nested {
                    write!(f, ")")?;
                }
                Ok(())
            }
            ExprKind::Intrinsic { uri } => write!(f, "(intrinsic {uri:?} : {})", self.ty),
            ExprKind::Builtin(b) => {
                let operand = self.ty.as_function().map(|(_, r)| r.clone());
                match operand {
                    Some(t) => write!(f, "{}<{t}>", b.name()),
                    None => write!(f, "{}", b.name()),
                }
            }
        }
    }

    /// Multi-line rendering: a lambda whose body is a block puts one local
    /// per line. Everything below that level is printed compactly.
    pub fn pretty(&self) -> String {
        match (&self.kind, self.ty.as_function()) {
            (ExprKind::Lambda { parameter, body }, Some((param_ty, _))) => {
                let head = match (parameter, param_ty) {
                    (Some(name), Some(ty)) => format!("({name}: {ty} ->"),
                    _ => "( ->".to_string(),
                };
                match &body.kind {
                    ExprKind::Block { locals, result } => {
                        let mut out = format!("{head}\n  let\n");
                        for (i, (name, value)) in locals.iter().enumerate() {
                            let sep = if i + 1 < locals.len() { "," } else { "" };
                            out.push_str(&format!("    {name} = {value}{sep}\n"));
                        }
                        out.push_str(&format!("  in {result})"));
                        out
                    }
                    _ => format!("{head} {body})"),
                }
            }
            _ => self.to_string(),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_in(f, false)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(v) => write!(f, "{v}"),
            Literal::Float(v) => write!(f, "{}", format_float(*v)),
            Literal::Bool(v) => write!(f, "{v}"),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn add_int() -> Expr {
        Expr::builtin(Builtin::Add, &Type::int32()).unwrap()
    }

    fn x() -> Expr {
        Expr::reference("x", Type::int32())
    }

    #[test]
    fn call_checks_argument_type() {
        let ok = Expr::call(add_int(), Some(Expr::tuple(vec![x(), Expr::int(1)])));
        assert_eq!(ok.unwrap().ty, Type::int32());

        let bad = Expr::call(add_int(), Some(Expr::float(1.0)));
        assert!(bad.is_err());
    }

    #[test]
    fn select_out_of_range_is_error() {
        let pair = Expr::tuple(vec![Expr::int(1), Expr::int(2)]);
        assert!(Expr::select(pair.clone(), 1).is_ok());
        assert!(Expr::select(pair, 2).is_err());
    }

    #[test]
    fn free_references_respect_binders() {
        let body = Expr::call(add_int(), Some(Expr::tuple(vec![x(), Expr::reference("y", Type::int32())])))
            .unwrap();
        let lam = Expr::lambda(Some(("x".into(), Type::int32())), body);
        let free: Vec<_> = lam.free_references().into_iter().collect();
        assert_eq!(free, vec!["y".to_string()]);
    }

    #[test]
    fn block_locals_bind_sequentially() {
        let block = Expr::block(
            vec![("a".into(), Expr::int(1)), ("b".into(), Expr::reference("a", Type::int32()))],
            Expr::reference("b", Type::int32()),
        );
        assert!(block.is_closed());
        assert!(block.typecheck().is_ok());
    }

    #[test]
    fn substitute_folds_selection_of_tuple() {
        let pair_ty = Type::tuple(vec![Type::int32(), Type::boolean()]);
        let sel = Expr::select(Expr::reference("p", pair_ty), 1).unwrap();
        let mut map = HashMap::new();
        map.insert("p".to_string(), Expr::tuple(vec![Expr::int(3), Expr::boolean(true)]));
        assert_eq!(sel.substitute(&map), Expr::boolean(true));
    }

    #[test]
    fn substitute_avoids_capture() {
        // (x -> add(<x, y>))[y := x] must not capture the replacement.
        let body = Expr::call(add_int(), Some(Expr::tuple(vec![x(), Expr::reference("y", Type::int32())])))
            .unwrap();
        let lam = Expr::lambda(Some(("x".into(), Type::int32())), body);
        let mut map = HashMap::new();
        map.insert("y".to_string(), x());
        let out = lam.substitute(&map);
        assert_eq!(out.to_string(), "(x_1: int32 -> add<int32>(<x_1,x>))");
        let free: Vec<_> = out.free_references().into_iter().collect();
        assert_eq!(free, vec!["x".to_string()]);
    }

    #[test]
    fn substitute_respects_shadowing() {
        let lam = Expr::lambda(Some(("x".into(), Type::int32())), x());
        let mut map = HashMap::new();
        map.insert("x".to_string(), Expr::int(9));
        assert_eq!(lam.substitute(&map), lam);
    }

    #[test]
    fn display_lambda_block_and_builtin() {
        let body = Expr::block(
            vec![(
                "s".into(),
                Expr::call(add_int(), Some(Expr::tuple(vec![x(), Expr::int(2)]))).unwrap(),
            )],
            Expr::reference("s", Type::int32()),
        );
        let lam = Expr::lambda(Some(("x".into(), Type::int32())), body);
        assert_eq!(
            lam.to_string(),
            "(x: int32 -> let s = add<int32>(<x,2>) in s)"
        );
    }

    #[test]
    fn display_floats_keep_decimal_point() {
        assert_eq!(Expr::float(2.0).to_string(), "2.0");
        assert_eq!(Expr::float(0.25).to_string(), "0.25");
    }

    #[test]
    fn typecheck_detects_corrupted_type() {
        let mut e = Expr::tuple(vec![Expr::int(1)]);
        e.ty = Type::tuple(vec![Type::float32()]);
        assert!(e.typecheck().is_err());
    }

    #[test]
    fn builtin_rejects_non_numeric_operand() {
        assert!(Expr::builtin(Builtin::Max, &Type::boolean()).is_err());
        let seq = Expr::builtin(Builtin::SequenceSum, &Type::float32()).unwrap();
        assert_eq!(seq.ty.to_string(), "(float32* -> float32)");
    }
}
