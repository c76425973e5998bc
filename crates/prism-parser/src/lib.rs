pub mod ast;
mod parser;

pub use ast::*;

use thiserror::Error;

/// A syntax error, located by line and the offending token's text.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("syntax error on line {line} near '{token}': {message}")]
pub struct ParseError {
    pub line: usize,
    pub token: String,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, token: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            line,
            token: token.into(),
            message: message.into(),
        }
    }
}

impl From<prism_lexer::LexError> for ParseError {
    fn from(err: prism_lexer::LexError) -> Self {
        ParseError::new(err.line, err.text, "unrecognised input")
    }
}

/// Parse a Prism script into its node and function tables.
pub fn parse(input: &str) -> Result<Script, ParseError> {
    let tokens = prism_lexer::tokenize(input)?;
    parser::Parser::new(input, tokens).parse_script()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_body(source: &str, node: &str) -> Block {
        let script = parse(source).unwrap();
        script.nodes.get(node).cloned().expect("node missing")
    }

    #[test]
    fn test_parse_empty() {
        let result = parse("");
        assert!(result.is_ok(), "Failed to parse empty input: {:?}", result);
        let script = result.unwrap();
        assert!(script.nodes.is_empty());
        assert!(script.functions.is_empty());
    }

    #[test]
    fn test_parse_nodes_and_functions() {
        let script = parse(
            r#"
            main { goto b; }
            b { exit 'done'; }
            add(x, y) { return x + y; }
            add(x) { return x; }
            "#,
        )
        .unwrap();

        assert_eq!(script.nodes.len(), 2);
        assert_eq!(script.functions.len(), 2);
        assert!(script.functions.contains_key(&FunctionKey::new("add", ["y", "x"])));
        assert!(script.functions.contains_key(&FunctionKey::new("add", ["x"])));
        assert_eq!(script.nodes["main"], vec![Statement::Goto("b".to_string())]);
    }

    #[test]
    fn test_duplicate_node_is_an_error() {
        let err = parse("a {}\na {}").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_duplicate_function_signature_is_an_error() {
        assert!(parse("f(a, b) {} f(b, a) {}").is_err());
        assert!(parse("f(a, b) {} f(a) {}").is_ok());
    }

    #[test]
    fn test_duplicate_parameter_or_argument() {
        assert!(parse("f(a, a) {}").is_err());
        let err = parse("n { f(a=1, a=2); }").unwrap_err();
        assert_eq!(err.token, "a");
    }

    #[test]
    fn test_assignment_forms() {
        let body = node_body(
            "n { x = 1; global y = 2; local z += 3; [a, None, b] = s; }",
            "n",
        );
        assert_eq!(
            body[0],
            Statement::Assign {
                target: Target::auto("x"),
                value: Expr::Int(1)
            }
        );
        assert!(matches!(
            &body[1],
            Statement::Assign { target: Target { qualifier: Qualifier::Global, name }, .. } if name == "y"
        ));
        assert!(matches!(
            &body[2],
            Statement::AugAssign { target: Target { qualifier: Qualifier::Local, .. }, op: BinOp::Add, .. }
        ));
        if let Statement::Destructure { targets, .. } = &body[3] {
            assert_eq!(targets.len(), 3);
            assert!(targets[1].is_none());
        } else {
            panic!("Expected Destructure, got {:?}", body[3]);
        }
    }

    #[test]
    fn test_invalid_assignment_target() {
        let err = parse("n { 1 = 2; }").unwrap_err();
        assert!(err.message.contains("assignment target"), "{}", err);
    }

    #[test]
    fn test_precedence() {
        let body = node_body("n { x = 1 + 2 * 3 == 7 || False; }", "n");
        let Statement::Assign { value, .. } = &body[0] else {
            panic!("Expected Assign");
        };
        let Expr::Logical { op: LogicalOp::Or, left, .. } = value else {
            panic!("Expected ||, got {:?}", value);
        };
        let Expr::Binary { op: BinOp::Eq, left, .. } = left.as_ref() else {
            panic!("Expected ==, got {:?}", left);
        };
        assert!(matches!(left.as_ref(), Expr::Binary { op: BinOp::Add, .. }));
    }

    #[test]
    fn test_power_binds_tighter_than_negation() {
        let body = node_body("n { -2 ^ 2; }", "n");
        assert!(matches!(
            &body[0],
            Statement::Expr(Expr::Unary { op: UnOp::Neg, operand }) if matches!(operand.as_ref(), Expr::Binary { op: BinOp::Pow, .. })
        ));
    }

    #[test]
    fn test_control_flow_statements() {
        let body = node_body(
            r#"n {
                if (a) { b = 1; } elif (c) { b = 2; } else { b = 3; }
                while (True) { break; }
                for ([k, v] in pairs) { continue; }
                return;
                exit 5;
            }"#,
            "n",
        );
        assert!(matches!(&body[0], Statement::If { branches, otherwise: Some(_) } if branches.len() == 2));
        assert!(matches!(&body[1], Statement::While { .. }));
        assert!(matches!(&body[2], Statement::For { binding: Binding::Pattern(p), .. } if p.len() == 2));
        assert_eq!(body[3], Statement::Return(None));
        assert_eq!(body[4], Statement::Exit(Some(Expr::Int(5))));
    }

    #[test]
    fn test_calls_and_suffixes() {
        let body = node_body("n { io.write(text='x'); f(a=1).items.length; s.append(item=2); }", "n");
        assert!(matches!(
            &body[0],
            Statement::Expr(Expr::Call { target: CallTarget::Scoped(name), args }) if name == "io.write" && args.len() == 1
        ));
        if let Statement::Expr(Expr::Suffix { base, path }) = &body[1] {
            assert!(matches!(base.as_ref(), Expr::Call { target: CallTarget::Local(_), .. }));
            assert_eq!(path, &vec!["items".to_string(), "length".to_string()]);
        } else {
            panic!("Expected Suffix, got {:?}", body[1]);
        }
        assert!(matches!(&body[2], Statement::Expr(Expr::Call { target: CallTarget::Scoped(_), .. })));
    }

    #[test]
    fn test_missing_semicolon_reports_line() {
        let err = parse("n {\n  x = 1\n}").unwrap_err();
        assert_eq!(err.line, 3);
        assert_eq!(err.token, "}");
    }

    #[test]
    fn test_unterminated_block() {
        let err = parse("n { x = 1;").unwrap_err();
        assert_eq!(err.token, "<eof>");
    }

    #[test]
    fn test_lexer_errors_surface_as_parse_errors() {
        let err = parse("n { x = $; }").unwrap_err();
        assert_eq!(err.token, "$");
        assert_eq!(err.line, 1);
    }

    #[test]
    fn test_moderate_nesting_parses() {
        let source = format!("n {{ x = {}1{}; }}", "(".repeat(100), ")".repeat(100));
        let body = node_body(&source, "n");
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn test_deep_parentheses_are_a_syntax_error() {
        let source = format!("n {{ exit {}1{}; }}", "(".repeat(200_000), ")".repeat(200_000));
        let err = parse(&source).unwrap_err();
        assert!(err.message.contains("nesting exceeds"), "{}", err);
        assert_eq!(err.line, 1);
    }

    #[test]
    fn test_deep_blocks_and_prefixes_are_syntax_errors() {
        let blocks = format!("n {{ {}{} }}", "if (True) { ".repeat(5_000), "} ".repeat(5_000));
        assert!(parse(&blocks).unwrap_err().message.contains("nesting exceeds"));

        let negations = format!("n {{ x = {}True; }}", "! ".repeat(50_000));
        assert!(parse(&negations).unwrap_err().message.contains("nesting exceeds"));

        let powers = format!("n {{ x = 2{}; }}", " ^ 2".repeat(50_000));
        assert!(parse(&powers).unwrap_err().message.contains("nesting exceeds"));
    }
}
