//! Normalizes every structured-control-flow body to a brace-delimited block, so later passes
//! never special-case a bare single-statement body (spec §4.4 "AddBraces").
//!
//! The one exception is the degenerate `if (cond) goto L;` with no `else`, which the lowering
//! engine treats specially as a direct conditional branch and which must stay un-blocked for
//! that pattern match to see through it.

use super::{Ast, StmtId, StmtKind};

pub fn run(ast: &mut Ast) {
	let roots = ast.top_level.clone();
	for root in roots {
		add_braces(ast, root);
	}
}

fn add_braces(ast: &mut Ast, id: StmtId) {
	match ast.stmt(id).kind.clone() {
		StmtKind::Block(stmts) => {
			for s in stmts {
				add_braces(ast, s);
			}
		},
		StmtKind::FunctionDecl { body, .. } => add_braces(ast, body),
		StmtKind::If { then_branch, else_branch, .. } => {
			if is_bare_goto(ast, then_branch) && matches!(ast.stmt(else_branch).kind, StmtKind::Empty) {
				return;
			}
			let then_branch = wrap_in_block(ast, then_branch);
			let else_branch = wrap_in_block(ast, else_branch);
			if let StmtKind::If { then_branch: t, else_branch: e, .. } = &mut ast.stmt_mut(id).kind {
				*t = then_branch;
				*e = else_branch;
			}
			add_braces(ast, then_branch);
			add_braces(ast, else_branch);
		},
		StmtKind::While { body, .. } | StmtKind::DoWhile { body, .. } | StmtKind::Switch { body, .. } => {
			let wrapped = wrap_in_block(ast, body);
			set_body(ast, id, wrapped);
			add_braces(ast, wrapped);
		},
		StmtKind::For { body, .. } => {
			let wrapped = wrap_in_block(ast, body);
			if let StmtKind::For { body: b, .. } = &mut ast.stmt_mut(id).kind {
				*b = wrapped;
			}
			add_braces(ast, wrapped);
		},
		_ => {},
	}
}

/// `if (cond) goto L;` with no braces and no `else` is left bare — the lowering engine matches
/// this shape directly as a conditional branch instead of a generic `If`.
fn is_bare_goto(ast: &Ast, id: StmtId) -> bool {
	matches!(ast.stmt(id).kind, StmtKind::Goto { .. })
}

fn wrap_in_block(ast: &mut Ast, id: StmtId) -> StmtId {
	if matches!(ast.stmt(id).kind, StmtKind::Block(_)) {
		return id;
	}
	if matches!(ast.stmt(id).kind, StmtKind::Empty) {
		return ast.push_stmt(StmtKind::Block(vec![]));
	}
	ast.push_stmt(StmtKind::Block(vec![id]))
}

fn set_body(ast: &mut Ast, id: StmtId, body: StmtId) {
	match &mut ast.stmt_mut(id).kind {
		StmtKind::While { body: b, .. } | StmtKind::DoWhile { body: b, .. } | StmtKind::Switch { body: b, .. } => *b = body,
		_ => unreachable!(),
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::source::SourceCode;
	use crate::ast::parser::StatementParser;

	#[test]
	fn wraps_bare_if_body() {
		let source = SourceCode::new("t.c", "f() { if (x) echo(x); }");
		let mut ast = StatementParser::new(&source).parse_program(&source.text).unwrap();
		run(&mut ast);
		let StmtKind::FunctionDecl { body, .. } = ast.stmt(ast.top_level[0]).kind.clone() else { panic!() };
		let StmtKind::Block(stmts) = ast.stmt(body).kind.clone() else { panic!() };
		let StmtKind::If { then_branch, .. } = ast.stmt(stmts[0]).kind.clone() else { panic!() };
		assert!(matches!(ast.stmt(then_branch).kind, StmtKind::Block(_)));
	}

	#[test]
	fn leaves_bare_goto_unblocked() {
		let source = SourceCode::new("t.c", "f() { if (x) goto done; label done: }");
		let mut ast = StatementParser::new(&source).parse_program(&source.text).unwrap();
		run(&mut ast);
		let StmtKind::FunctionDecl { body, .. } = ast.stmt(ast.top_level[0]).kind.clone() else { panic!() };
		let StmtKind::Block(stmts) = ast.stmt(body).kind.clone() else { panic!() };
		let StmtKind::If { then_branch, .. } = ast.stmt(stmts[0]).kind.clone() else { panic!() };
		assert!(matches!(ast.stmt(then_branch).kind, StmtKind::Goto { .. }));
	}
}
