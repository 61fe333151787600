//! The unrestricted debug renderer: a full C-like dump of the AST with every construct allowed,
//! used for `--show-generated` (spec §4.7 `SimpleSdsRenderer`'s unrestricted sibling in
//! `original_source/renderers.py`, here just the shared [`super::Renderer`] with `restricted:
//! false`).

use crate::ast::Ast;
use crate::error::TargetError;
use crate::pragma::Pragmas;
use crate::source::SourceCode;

/// Renders `ast` with no dialect restrictions.
pub fn render(ast: &Ast, pragmas: &Pragmas, src: &SourceCode) -> Result<String, Box<TargetError>> {
	super::Renderer::new(ast, pragmas, src, false, "debug").render_program()
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::ast::parser::StatementParser;

	#[test]
	fn renders_structured_control_flow_unchanged() {
		let source = SourceCode::new("t.c", "f() { while (1) { break; } }");
		let mut ast = StatementParser::new(&source).parse_program(&source.text).unwrap();
		crate::ast::addbraces::run(&mut ast);
		let out = render(&ast, &Pragmas::default(), &source).unwrap();
		assert!(out.contains("while (1)"));
		assert!(out.contains("break;"));
	}
}
