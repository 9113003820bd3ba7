// elaborate.rs — AST → typed IR
//
// Resolves names against lexical scope, resolves intrinsic names in call
// position, instantiates builtins and computes every node's type through the
// checked IR constructors.
//
// Preconditions: the AST came from `parser::parse` without errors.
// Postconditions: the returned expression type-checks.
// Failure modes: E01xx diagnostics; elaboration stops at the first error.
// Side effects: none.

use crate::ast::{self, Span, TypeExpr, TypeKind};
use crate::diag::{codes, Diagnostic};
use crate::error::TypeError;
use crate::intrinsics::{self, IntrinsicDef};
use crate::ir::{Builtin, Expr};
use crate::types::{Placement, Type};

/// Parse and elaborate `source` in one step.
pub fn parse_expr(source: &str) -> Result<Expr, Vec<Diagnostic>> {
    let result = crate::parser::parse(source);
    if !result.errors.is_empty() {
        return Err(result
            .errors
            .iter()
            .map(|e| Diagnostic::error(codes::E0100, e.to_string()).at(*e.span()))
            .collect());
    }
    let Some(expr) = result.expr else {
        return Err(vec![Diagnostic::error(codes::E0100, "empty source")]);
    };
    elaborate(&expr).map_err(|d| vec![d])
}

/// Elaborate a parsed expression.
pub fn elaborate(expr: &ast::Expr) -> Result<Expr, Diagnostic> {
    Elaborator { scope: Vec::new() }.expr(expr)
}

/// Elaborate a type annotation.
pub fn elaborate_type(ty: &TypeExpr) -> Result<Type, Diagnostic> {
    match &ty.kind {
        TypeKind::Named(id) => match id.name.as_str() {
            "int32" => Ok(Type::int32()),
            "float32" => Ok(Type::float32()),
            "bool" => Ok(Type::boolean()),
            other => Err(Diagnostic::error(codes::E0102, format!("unknown type `{other}`"))
                .at(id.span)
                .with_hint("types are int32, float32, bool, <...>, T*, (T -> R) and placed types")),
        },
        TypeKind::Tuple(elements) => elements
            .iter()
            .map(elaborate_type)
            .collect::<Result<_, _>>()
            .map(Type::tuple),
        TypeKind::Sequence(element) => elaborate_type(element).map(Type::sequence),
        TypeKind::Function { parameter, result } => {
            let parameter = parameter.as_deref().map(elaborate_type).transpose()?;
            Ok(Type::function(parameter, elaborate_type(result)?))
        }
        TypeKind::Placed {
            member,
            placement,
            all_equal,
        } => {
            let Some(p) = Placement::from_name(&placement.name) else {
                return Err(Diagnostic::error(
                    codes::E0103,
                    format!("unknown placement `{}`", placement.name),
                )
                .at(placement.span)
                .with_hint("placements are SERVER (COORDINATOR) and CLIENTS (PARTICIPANTS)"));
            };
            Ok(Type::federated(elaborate_type(member)?, p, *all_equal))
        }
    }
}

struct Elaborator {
    scope: Vec<(String, Type)>,
}

impl Elaborator {
    fn lookup(&self, name: &str) -> Option<&Type> {
        self.scope.iter().rev().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    fn expr(&mut self, e: &ast::Expr) -> Result<Expr, Diagnostic> {
        let typed = |r: Result<Expr, TypeError>, span: Span| {
            r.map_err(|err| Diagnostic::error(codes::E0104, err.message).at(span))
        };
        match &e.kind {
            ast::ExprKind::Int(v) => Ok(Expr::int(*v)),
            ast::ExprKind::Float(v) => Ok(Expr::float(*v)),
            ast::ExprKind::Bool(v) => Ok(Expr::boolean(*v)),
            ast::ExprKind::Name(id) => match self.lookup(&id.name) {
                Some(ty) => Ok(Expr::reference(&id.name, ty.clone())),
                None if IntrinsicDef::from_uri(&id.name).is_some() => Err(Diagnostic::error(
                    codes::E0106,
                    format!("intrinsic `{}` must be called", id.name),
                )
                .at(id.span)
                .with_hint("write `intrinsic \"uri\" : T` to refer to an intrinsic as a value")),
                None if Builtin::from_name(&id.name).is_some() => Err(Diagnostic::error(
                    codes::E0105,
                    format!("builtin `{}` needs an operand type", id.name),
                )
                .at(id.span)
                .with_hint(format!("write `{}<int32>`", id.name))),
                None => Err(
                    Diagnostic::error(codes::E0101, format!("unbound name `{}`", id.name))
                        .at(id.span),
                ),
            },
            ast::ExprKind::Builtin { name, operand } => {
                let Some(b) = Builtin::from_name(&name.name) else {
                    return Err(Diagnostic::error(
                        codes::E0105,
                        format!("unknown builtin `{}`", name.name),
                    )
                    .at(name.span)
                    .with_hint("builtins are add, sub, mul, max, min and sequence_sum"));
                };
                let operand = elaborate_type(operand)?;
                typed(Expr::builtin(b, &operand), e.span)
            }
            ast::ExprKind::Tuple(elements) => elements
                .iter()
                .map(|x| self.expr(x))
                .collect::<Result<_, _>>()
                .map(Expr::tuple),
            ast::ExprKind::Call { function, args } => {
                let argument = match args.as_slice() {
                    [] => None,
                    [single] => Some(self.expr(single)?),
                    many => Some(Expr::tuple(
                        many.iter().map(|x| self.expr(x)).collect::<Result<_, _>>()?,
                    )),
                };
                if let ast::ExprKind::Name(id) = &function.kind {
                    if self.lookup(&id.name).is_none() {
                        if let Some(def) = IntrinsicDef::from_uri(&id.name) {
                            let argument = argument.unwrap_or_else(Expr::empty);
                            return typed(intrinsics::call(def, argument), e.span);
                        }
                    }
                }
                let function = self.expr(function)?;
                typed(Expr::call(function, argument), e.span)
            }
            ast::ExprKind::Select { source, index } => {
                let source = self.expr(source)?;
                typed(Expr::select(source, *index), e.span)
            }
            ast::ExprKind::Lambda { parameter, body } => match parameter {
                Some((id, ty)) => {
                    let ty = elaborate_type(ty)?;
                    self.scope.push((id.name.clone(), ty.clone()));
                    let body = self.expr(body);
                    self.scope.pop();
                    Ok(Expr::lambda(Some((id.name.clone(), ty)), body?))
                }
                None => Ok(Expr::lambda(None, self.expr(body)?)),
            },
            ast::ExprKind::Let { bindings, body } => {
                let depth = self.scope.len();
                let result = self.let_block(bindings, body);
                self.scope.truncate(depth);
                result
            }
            ast::ExprKind::Intrinsic { uri, ty } => {
                Ok(Expr::intrinsic(uri.clone(), elaborate_type(ty)?))
            }
        }
    }

    fn let_block(
        &mut self,
        bindings: &[(ast::Ident, ast::Expr)],
        body: &ast::Expr,
    ) -> Result<Expr, Diagnostic> {
        let mut locals = Vec::with_capacity(bindings.len());
        for (id, value) in bindings {
            let value = self.expr(value)?;
            self.scope.push((id.name.clone(), value.ty.clone()));
            locals.push((id.name.clone(), value));
        }
        let result = self.expr(body)?;
        Ok(Expr::block(locals, result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chumsky::span::Span as _;

    fn err(source: &str) -> Diagnostic {
        parse_expr(source).unwrap_err().remove(0)
    }

    #[test]
    fn round_elaborates_with_intrinsics() {
        let e = parse_expr(
            "(p: <int32@SERVER,{int32}@CLIENTS> ->
               let c = federated_broadcast(p[0]) in
               federated_map(add<int32>, federated_zip_at_clients(p[1], c)))",
        )
        .unwrap();
        assert_eq!(
            e.ty.to_string(),
            "(<int32@SERVER,{int32}@CLIENTS> -> {int32}@CLIENTS)"
        );
        assert!(e.typecheck().is_ok());
        assert!(e.to_string().contains("federated_broadcast(p[0])"));
    }

    #[test]
    fn alternate_placement_spellings() {
        let a = parse_expr("(x: <int32@COORDINATOR,{int32}@PARTICIPANTS> -> x)").unwrap();
        let b = parse_expr("(x: <int32@SERVER,{int32}@CLIENTS> -> x)").unwrap();
        assert_eq!(a.ty, b.ty);
    }

    #[test]
    fn local_names_shadow_intrinsics() {
        let e = parse_expr("(federated_map: (int32 -> int32) -> federated_map(1))").unwrap();
        assert_eq!(e.ty.to_string(), "((int32 -> int32) -> int32)");
    }

    #[test]
    fn let_scoping_is_sequential() {
        let e = parse_expr("let a = 1, b = <a, a> in b[1]").unwrap();
        assert_eq!(e.ty, Type::int32());
        assert_eq!(err("let a = b, b = 1 in a").code, Some(codes::E0101));
    }

    #[test]
    fn error_codes() {
        assert_eq!(err("(x: int -> x)").code, Some(codes::E0102));
        assert_eq!(err("(x: int32@MOON -> x)").code, Some(codes::E0103));
        assert_eq!(err("<1, 2>[2]").code, Some(codes::E0104));
        assert_eq!(err("pow<int32>").code, Some(codes::E0105));
        assert_eq!(err("add").code, Some(codes::E0105));
        assert_eq!(err("federated_map").code, Some(codes::E0106));
        assert_eq!(err("(x: int32 -> ").code, Some(codes::E0100));
    }

    #[test]
    fn error_carries_span() {
        let d = err("(x: int32 -> y)");
        let span = d.span.unwrap();
        assert_eq!((span.start(), span.end()), (13, 14));
    }
}
