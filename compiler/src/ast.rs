// ast.rs — AST node types for textual round IR
//
// Untyped syntax tree produced by the parser. Names are not resolved and
// types are not checked until `elaborate`.
//
// Preconditions: produced by the parser from a valid or partially-valid token stream.
// Postconditions: each node's span covers the source range of the construct.
// Failure modes: none (data-only module).
// Side effects: none.

use chumsky::span::SimpleSpan;

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

// ── Types ──

#[derive(Debug, Clone, PartialEq)]
pub struct TypeExpr {
    pub kind: TypeKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    /// `int32`, `float32` or `bool`.
    Named(Ident),
    /// `<T, ...>`
    Tuple(Vec<TypeExpr>),
    /// `T*`
    Sequence(Box<TypeExpr>),
    /// `(T -> R)` or `( -> R)`
    Function {
        parameter: Option<Box<TypeExpr>>,
        result: Box<TypeExpr>,
    },
    /// `T@PL` (all-equal) or `{T}@PL` (one value per member).
    Placed {
        member: Box<TypeExpr>,
        placement: Ident,
        all_equal: bool,
    },
}

// ── Expressions ──

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Int(i64),
    Float(f64),
    Bool(bool),
    Name(Ident),
    /// `add<int32>`
    Builtin { name: Ident, operand: TypeExpr },
    /// `<e, ...>`
    Tuple(Vec<Expr>),
    /// `f(a, b)`; several arguments are packed into one tuple.
    Call { function: Box<Expr>, args: Vec<Expr> },
    /// `e[i]`
    Select { source: Box<Expr>, index: usize },
    /// `(x: T -> body)` or `( -> body)`
    Lambda {
        parameter: Option<(Ident, TypeExpr)>,
        body: Box<Expr>,
    },
    /// `let a = e, ... in r`
    Let {
        bindings: Vec<(Ident, Expr)>,
        body: Box<Expr>,
    },
    /// `intrinsic "uri" : T`
    Intrinsic { uri: String, ty: TypeExpr },
}
