//! The "Simple" target renderer (spec §4.7 `SimpleSdsRenderer`): for source that already lives
//! entirely inside the restricted dialect and needs no lowering, only the surface-level
//! translation `BaseSdsRenderer` adds (quoting rewrites, structured-construct rejection).

use crate::ast::Ast;
use crate::error::TargetError;
use crate::pragma::Pragmas;
use crate::source::SourceCode;

/// Renders `ast` directly (no lowering pass), enforcing the restricted dialect's rules.
pub fn render(ast: &Ast, pragmas: &Pragmas, src: &SourceCode) -> Result<String, Box<TargetError>> {
	super::Renderer::new(ast, pragmas, src, true, "simple").render_program()
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::ast::parser::StatementParser;
	use crate::error::TargetError;

	fn parse(text: &str) -> (Ast, SourceCode) {
		let source = SourceCode::new("t.c", text);
		let mut ast = StatementParser::new(&source).parse_program(&source.text).unwrap();
		crate::ast::addbraces::run(&mut ast);
		(ast, source)
	}

	#[test]
	fn rejects_while_loops() {
		let (ast, src) = parse("f() { while (1) { } }");
		let err = render(&ast, &Pragmas::default(), &src).unwrap_err();
		assert!(matches!(*err, TargetError::StructuredControlFlow { construct: "while", .. }));
	}

	#[test]
	fn rejects_non_zero_return() {
		let (ast, src) = parse("f() { return 1; }");
		let err = render(&ast, &Pragmas::default(), &src).unwrap_err();
		assert!(matches!(*err, TargetError::NonVoidReturn { .. }));
	}

	#[test]
	fn accepts_void_return() {
		let (ast, src) = parse("f() { return; }");
		let out = render(&ast, &Pragmas::default(), &src).unwrap();
		assert!(out.contains("return;"));
	}

	#[test]
	fn rejects_function_arguments() {
		let (ast, src) = parse("f(a) { return; }");
		let err = render(&ast, &Pragmas::default(), &src).unwrap_err();
		assert!(matches!(*err, TargetError::FunctionArguments { .. }));
	}

	#[test]
	fn rejects_user_call_inside_expression() {
		let (ast, src) = parse("g() { return; } f() { var x = g() + 1; }");
		let err = render(&ast, &Pragmas::default(), &src).unwrap_err();
		assert!(matches!(*err, TargetError::CallInExpression { .. }));
	}

	#[test]
	fn rewrites_string_literal_to_single_quotes() {
		let (ast, src) = parse("f() { echo(\"hi\"); }");
		let out = render(&ast, &Pragmas::default(), &src).unwrap();
		assert!(out.contains("'hi'"));
	}

	#[test]
	fn rejects_complex_array_index() {
		let (ast, src) = parse("f() { x[1 + 2] = 0; }");
		let err = render(&ast, &Pragmas::default(), &src).unwrap_err();
		assert!(matches!(*err, TargetError::ExpressionArrayIndex { .. }));
	}
}
