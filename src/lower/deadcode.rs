//! Dead-code removal: the fixpoint pass run after lowering (spec §4.6), ported from
//! `original_source/mutators.py`'s `M_RemoveDeadCode`.
//!
//! Two sub-passes interleave until neither changes anything:
//!
//! 1. Statements between an unconditional `goto L` and the next reachable label are
//!    unreachable and dropped; if that next label *is* `L` itself the goto was a no-op and is
//!    dropped too. A banner [`StmtKind::Comment`] whose text contains `"FUNC"` survives the cull
//!    (spec §4.6's "preserves banner comments").
//! 2. The used/defined label sets are recomputed; unused labels are dropped, and a `goto`
//!    targeting a label that is never defined is a hard error.

use smartstring::alias::String as SmolStr;
use std::collections::HashSet;

use crate::ast::{Ast, StmtKind};
use crate::error::LoweringError;
use crate::source::SourceCode;

/// Runs the fixpoint over `main`'s body in place. A no-op if the lowered program has no `main`
/// (which should not happen once [`crate::lower::engine::Lowerer::lower_program`] has run, but
/// this module is also exercised directly against hand-built fixtures in tests).
pub fn run(ast: &mut Ast, src: &SourceCode) -> Result<(), Box<LoweringError>> {
	let Some(main_id) = find_main(ast) else { return Ok(()) };
	let StmtKind::FunctionDecl { body, .. } = ast.stmt(main_id).kind.clone() else { unreachable!() };
	let StmtKind::Block(mut stmts) = ast.stmt(body).kind.clone() else { unreachable!() };

	loop {
		let before = stmts.clone();
		stmts = cull_after_goto(ast, stmts);

		let defined = defined_labels(ast, &stmts);
		let used = used_labels(ast, &stmts);
		if let Some(label) = used.iter().find(|l| !defined.contains(l.as_str())) {
			return Err(Box::new(LoweringError::UndefinedLabel {
				label: label.to_string(),
				src: src.named_source(),
				location: src.span(0, 0),
			}));
		}
		stmts.retain(|&id| !matches!(&ast.stmt(id).kind, StmtKind::Label { name } if !used.contains(name.as_str())));

		if stmts == before {
			break;
		}
	}

	if let StmtKind::Block(b) = &mut ast.stmt_mut(body).kind {
		*b = stmts;
	}
	let roots = ast.top_level.clone();
	ast.rebind_parents(&roots);
	Ok(())
}

fn find_main(ast: &Ast) -> Option<crate::ast::StmtId> {
	ast.top_level.iter().copied().find(|&id| matches!(&ast.stmt(id).kind, StmtKind::FunctionDecl { name, .. } if name == "main"))
}

/// Drops statements made unreachable by a preceding unconditional `goto`, stopping the drop at
/// the next label (or EOF). The banner comments the lowering engine writes ahead of error labels
/// and `__fn<n>` blocks carry `"FUNC"` in their text and are never considered dead.
fn cull_after_goto(ast: &Ast, stmts: Vec<crate::ast::StmtId>) -> Vec<crate::ast::StmtId> {
	let mut out = Vec::with_capacity(stmts.len());
	let mut i = 0;
	while i < stmts.len() {
		let id = stmts[i];
		out.push(id);
		let StmtKind::Goto { label: goto_label } = ast.stmt(id).kind.clone() else {
			i += 1;
			continue;
		};

		let mut j = i + 1;
		while j < stmts.len() {
			match &ast.stmt(stmts[j]).kind {
				StmtKind::Label { .. } => break,
				StmtKind::Comment(text) if text.contains("FUNC") => {
					out.push(stmts[j]);
					j += 1;
				},
				_ => j += 1,
			}
		}

		if j < stmts.len() {
			if let StmtKind::Label { name } = &ast.stmt(stmts[j]).kind {
				if *name == goto_label {
					out.pop();
				}
			}
		}
		i = j;
	}
	out
}

fn defined_labels(ast: &Ast, stmts: &[crate::ast::StmtId]) -> HashSet<SmolStr> {
	stmts
		.iter()
		.filter_map(|&id| match &ast.stmt(id).kind {
			StmtKind::Label { name } => Some(name.clone()),
			_ => None,
		})
		.collect()
}

fn used_labels(ast: &Ast, stmts: &[crate::ast::StmtId]) -> HashSet<SmolStr> {
	let mut used = HashSet::new();
	for &id in stmts {
		collect_goto_targets(ast, id, &mut used);
	}
	used
}

fn collect_goto_targets(ast: &Ast, id: crate::ast::StmtId, out: &mut HashSet<SmolStr>) {
	match &ast.stmt(id).kind {
		StmtKind::Goto { label } => {
			out.insert(label.clone());
		},
		StmtKind::If { then_branch, else_branch, .. } => {
			collect_goto_targets(ast, *then_branch, out);
			collect_goto_targets(ast, *else_branch, out);
		},
		_ => {},
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::ast::{ExprKind, LiteralKind, StmtKind};

	fn source() -> SourceCode {
		SourceCode::new("t.c", "")
	}

	fn main_with(ast: &mut Ast, body: Vec<crate::ast::StmtId>) {
		let block = ast.push_stmt(StmtKind::Block(body));
		let main_fn = ast.push_stmt(StmtKind::FunctionDecl { name: "main".into(), params: vec![], body: block, inline: false });
		ast.top_level = vec![main_fn];
		let roots = ast.top_level.clone();
		ast.rebind_parents(&roots);
	}

	fn body_of(ast: &Ast) -> Vec<crate::ast::StmtId> {
		let StmtKind::FunctionDecl { body, .. } = ast.stmt(ast.top_level[0]).kind.clone() else { panic!() };
		let StmtKind::Block(stmts) = ast.stmt(body).kind.clone() else { panic!() };
		stmts
	}

	#[test]
	fn drops_statements_after_unconditional_goto() {
		let mut ast = Ast::default();
		let lit = ast.push_expr(ExprKind::Literal(LiteralKind::Number(1)));
		let goto = ast.push_stmt(StmtKind::Goto { label: "end".into() });
		let dead = ast.push_stmt(StmtKind::Assign { name: "u1".into(), index: None, op: "=".into(), value: Some(lit) });
		let label = ast.push_stmt(StmtKind::Label { name: "end".into() });
		main_with(&mut ast, vec![goto, dead, label]);

		run(&mut ast, &source()).unwrap();
		let stmts = body_of(&ast);
		assert!(!stmts.contains(&dead));
		assert!(stmts.contains(&goto));
		assert!(stmts.contains(&label));
	}

	#[test]
	fn drops_noop_goto_to_immediately_next_label() {
		let mut ast = Ast::default();
		let goto = ast.push_stmt(StmtKind::Goto { label: "l".into() });
		let label = ast.push_stmt(StmtKind::Label { name: "l".into() });
		main_with(&mut ast, vec![goto, label]);

		run(&mut ast, &source()).unwrap();
		let stmts = body_of(&ast);
		assert!(!stmts.contains(&goto));
	}

	#[test]
	fn drops_unused_labels() {
		let mut ast = Ast::default();
		let label = ast.push_stmt(StmtKind::Label { name: "unused".into() });
		main_with(&mut ast, vec![label]);

		run(&mut ast, &source()).unwrap();
		assert!(body_of(&ast).is_empty());
	}

	#[test]
	fn keeps_banner_comment_after_goto() {
		let mut ast = Ast::default();
		let goto = ast.push_stmt(StmtKind::Goto { label: "end".into() });
		let banner = ast.push_stmt(StmtKind::Comment("=== FUNC foo ===".into()));
		let label = ast.push_stmt(StmtKind::Label { name: "end".into() });
		main_with(&mut ast, vec![goto, banner, label]);

		run(&mut ast, &source()).unwrap();
		assert!(body_of(&ast).contains(&banner));
	}

	#[test]
	fn errors_on_goto_to_undefined_label() {
		let mut ast = Ast::default();
		let goto = ast.push_stmt(StmtKind::Goto { label: "nowhere".into() });
		main_with(&mut ast, vec![goto]);

		let err = run(&mut ast, &source()).unwrap_err();
		assert!(matches!(*err, LoweringError::UndefinedLabel { .. }));
	}

	#[test]
	fn idempotent_under_a_second_application() {
		let mut ast = Ast::default();
		let lit = ast.push_expr(ExprKind::Literal(LiteralKind::Number(1)));
		let goto = ast.push_stmt(StmtKind::Goto { label: "end".into() });
		let dead = ast.push_stmt(StmtKind::Assign { name: "u1".into(), index: None, op: "=".into(), value: Some(lit) });
		let unused = ast.push_stmt(StmtKind::Label { name: "unused".into() });
		let label = ast.push_stmt(StmtKind::Label { name: "end".into() });
		main_with(&mut ast, vec![goto, dead, unused, label]);

		run(&mut ast, &source()).unwrap();
		let once = body_of(&ast);
		run(&mut ast, &source()).unwrap();
		assert_eq!(body_of(&ast), once);
	}
}
