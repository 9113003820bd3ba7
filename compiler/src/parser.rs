// parser.rs — Parser for textual round IR
//
// Parses a token stream (from the lexer) into an untyped AST. One source
// holds one expression, usually a round lambda. Uses chumsky combinators.
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::lexer::Token;

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub expr: Option<Expr>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse an IR source string. Lexes then parses.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = expr_parser(source);
    let (expr, parse_errors) = parser.parse(stream).into_output_errors();

    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        expr,
        errors: all_errors,
    }
}

/// Postfix operators folded onto an atom.
enum Postfix {
    Call(Vec<Expr>),
    Index(usize),
}

// ── Parser builder ──
//
// Types and expressions are built in one function so that the `source`
// reference is captured once and shared by all combinators.

fn expr_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Expr, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    // ── Identifier ──

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start()..span.end()].to_string(),
            span,
        }
    });

    // ── Types ──

    let ty = recursive(|ty| {
        let named = ident.clone().map(TypeKind::Named);

        let tuple = ty
            .clone()
            .separated_by(just(Token::Comma))
            .collect::<Vec<_>>()
            .delimited_by(just(Token::Lt), just(Token::Gt))
            .map(TypeKind::Tuple);

        let function = ty
            .clone()
            .or_not()
            .then_ignore(just(Token::Arrow))
            .then(ty.clone())
            .delimited_by(just(Token::LParen), just(Token::RParen))
            .map(|(parameter, result): (Option<TypeExpr>, TypeExpr)| TypeKind::Function {
                parameter: parameter.map(Box::new),
                result: Box::new(result),
            });

        let base = choice((named, tuple, function)).map_with(|kind, e| TypeExpr {
            kind,
            span: e.span(),
        });

        let sequence = base.foldl(
            just(Token::Star).map_with(|_, e| e.span()).repeated(),
            |element: TypeExpr, star: SimpleSpan| TypeExpr {
                span: (element.span.start()..star.end()).into(),
                kind: TypeKind::Sequence(Box::new(element)),
            },
        );

        let per_member = ty
            .clone()
            .delimited_by(just(Token::LBrace), just(Token::RBrace))
            .then_ignore(just(Token::At))
            .then(ident.clone())
            .map_with(|(member, placement), e| TypeExpr {
                kind: TypeKind::Placed {
                    member: Box::new(member),
                    placement,
                    all_equal: false,
                },
                span: e.span(),
            });

        let all_equal = sequence
            .then(just(Token::At).ignore_then(ident.clone()).or_not())
            .map_with(|(member, placement), e| match placement {
                Some(placement) => TypeExpr {
                    kind: TypeKind::Placed {
                        member: Box::new(member),
                        placement,
                        all_equal: true,
                    },
                    span: e.span(),
                },
                None => member,
            });

        per_member.or(all_equal)
    });

    // ── Expressions ──

    recursive(move |expr| {
        let literal = select! {
            Token::Int(n) => ExprKind::Int(n),
            Token::Float(v) => ExprKind::Float(v),
            Token::True => ExprKind::Bool(true),
            Token::False => ExprKind::Bool(false),
        };

        // `add<int32>` or a bare name
        let name = ident
            .clone()
            .then(
                ty.clone()
                    .delimited_by(just(Token::Lt), just(Token::Gt))
                    .or_not(),
            )
            .map(|(name, operand)| match operand {
                Some(operand) => ExprKind::Builtin { name, operand },
                None => ExprKind::Name(name),
            });

        let tuple = expr
            .clone()
            .separated_by(just(Token::Comma))
            .collect::<Vec<_>>()
            .delimited_by(just(Token::Lt), just(Token::Gt))
            .map(ExprKind::Tuple);

        let lambda = ident
            .clone()
            .then_ignore(just(Token::Colon))
            .then(ty.clone())
            .or_not()
            .then_ignore(just(Token::Arrow))
            .then(expr.clone())
            .delimited_by(just(Token::LParen), just(Token::RParen))
            .map(|(parameter, body): (Option<(Ident, TypeExpr)>, Expr)| ExprKind::Lambda {
                parameter,
                body: Box::new(body),
            });

        let paren = expr
            .clone()
            .delimited_by(just(Token::LParen), just(Token::RParen))
            .map(|e: Expr| e.kind);

        let binding = ident.clone().then_ignore(just(Token::Equals)).then(expr.clone());
        let let_in = just(Token::Let)
            .ignore_then(
                binding
                    .separated_by(just(Token::Comma))
                    .at_least(1)
                    .collect::<Vec<_>>(),
            )
            .then_ignore(just(Token::In))
            .then(expr.clone())
            .map(|(bindings, body)| ExprKind::Let {
                bindings,
                body: Box::new(body),
            });

        let intrinsic = just(Token::Intrinsic)
            .ignore_then(select! { Token::StringLit(s) => s })
            .then_ignore(just(Token::Colon))
            .then(ty.clone())
            .map(|(uri, ty)| ExprKind::Intrinsic { uri, ty });

        let atom = choice((literal, let_in, intrinsic, lambda, paren, tuple, name)).map_with(
            |kind, e| Expr {
                kind,
                span: e.span(),
            },
        );

        let postfix = choice((
            expr.clone()
                .separated_by(just(Token::Comma))
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LParen), just(Token::RParen))
                .map(Postfix::Call),
            select! { Token::Int(n) if n >= 0 => Postfix::Index(n as usize) }
                .delimited_by(just(Token::LBracket), just(Token::RBracket)),
        ))
        .map_with(|op, e| (op, e.span()));

        atom.foldl(postfix.repeated(), |source: Expr, (op, end): (Postfix, SimpleSpan)| {
            let span: SimpleSpan = (source.span.start()..end.end()).into();
            let kind = match op {
                Postfix::Call(args) => ExprKind::Call {
                    function: Box::new(source),
                    args,
                },
                Postfix::Index(index) => ExprKind::Select {
                    source: Box::new(source),
                    index,
                },
            };
            Expr { kind, span }
        })
    })
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Expr {
        let result = parse(source);
        assert!(
            result.errors.is_empty(),
            "unexpected errors: {:#?}",
            result.errors
        );
        result.expr.expect("expected expression")
    }

    fn lambda_parameter_type(e: &Expr) -> &TypeExpr {
        let ExprKind::Lambda {
            parameter: Some((_, ty)),
            ..
        } = &e.kind
        else {
            panic!("expected a lambda with a parameter, got {:?}", e.kind)
        };
        ty
    }

    #[test]
    fn literals() {
        assert_eq!(parse_ok("42").kind, ExprKind::Int(42));
        assert_eq!(parse_ok("-1.5").kind, ExprKind::Float(-1.5));
        assert_eq!(parse_ok("true").kind, ExprKind::Bool(true));
    }

    #[test]
    fn placed_types() {
        let e = parse_ok("(p: <int32@SERVER,{float32*}@CLIENTS> -> p)");
        let TypeKind::Tuple(elements) = &lambda_parameter_type(&e).kind else {
            panic!("expected a tuple type")
        };
        assert!(matches!(
            &elements[0].kind,
            TypeKind::Placed { all_equal: true, placement, .. } if placement.name == "SERVER"
        ));
        let TypeKind::Placed {
            member, all_equal, ..
        } = &elements[1].kind
        else {
            panic!("expected a placed type")
        };
        assert!(!all_equal);
        assert!(matches!(member.kind, TypeKind::Sequence(_)));
    }

    #[test]
    fn nested_empty_tuples() {
        let e = parse_ok("(a: <<>,<>,<>> -> <<>,<>,<>>)");
        let TypeKind::Tuple(elements) = &lambda_parameter_type(&e).kind else {
            panic!("expected a tuple type")
        };
        assert_eq!(elements.len(), 3);
    }

    #[test]
    fn function_types() {
        let e = parse_ok("(f: ( -> int32) -> f())");
        assert!(matches!(
            lambda_parameter_type(&e).kind,
            TypeKind::Function {
                parameter: None,
                ..
            }
        ));
    }

    #[test]
    fn builtin_instantiation() {
        let e = parse_ok("add<int32>(a)");
        let ExprKind::Call { function, args } = &e.kind else {
            panic!("expected a call")
        };
        assert!(matches!(&function.kind, ExprKind::Builtin { name, .. } if name.name == "add"));
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn postfix_chain() {
        let e = parse_ok("u[1][0]");
        let ExprKind::Select { source, index: 0 } = &e.kind else {
            panic!("expected a selection")
        };
        assert!(matches!(source.kind, ExprKind::Select { index: 1, .. }));
        assert_eq!((e.span.start(), e.span.end()), (0, 7));
    }

    #[test]
    fn multi_argument_call() {
        let e = parse_ok("federated_zip_at_clients(a, b)");
        assert!(matches!(&e.kind, ExprKind::Call { args, .. } if args.len() == 2));
    }

    #[test]
    fn let_block_over_lines() {
        let e = parse_ok("let\n  a = 1,\n  b = <a, 2>\nin b[1]");
        let ExprKind::Let { bindings, body } = &e.kind else {
            panic!("expected let")
        };
        assert_eq!(bindings.len(), 2);
        assert!(matches!(body.kind, ExprKind::Select { index: 1, .. }));
    }

    #[test]
    fn nullary_lambda_and_parenthesized_expression() {
        assert!(matches!(
            parse_ok("( -> <>)").kind,
            ExprKind::Lambda {
                parameter: None,
                ..
            }
        ));
        assert!(matches!(parse_ok("(x)").kind, ExprKind::Name(_)));
    }

    #[test]
    fn explicit_intrinsic() {
        let e = parse_ok(r#"intrinsic "federated_sum" : ({int32}@CLIENTS -> int32@SERVER)"#);
        assert!(matches!(&e.kind, ExprKind::Intrinsic { uri, .. } if uri == "federated_sum"));
    }

    #[test]
    fn syntax_error_is_reported() {
        let result = parse("(x: int32 -> )");
        assert!(!result.errors.is_empty());
    }

    #[test]
    fn lex_error_is_reported() {
        let result = parse("x ; y");
        assert!(!result.errors.is_empty());
    }
}
