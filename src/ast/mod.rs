//! The statement/expression AST: an arena of nodes addressed by small integer ids, with parent
//! back-references rebound by every rewriting pass (spec §3, §9 "arena + integer index").

pub mod addbraces;
pub mod parser;

use smartstring::alias::String as SmolStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StmtId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExprId(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub enum LiteralKind {
	Number(i64),
	Char(char),
	Str(SmolStr),
}

#[derive(Debug, Clone)]
pub enum ExprKind {
	/// An ordered list of children at one precedence-less level; re-grouped by the lowering
	/// engine's fixed precedence sweep (spec §4.5.6).
	Group(Vec<ExprId>),
	Literal(LiteralKind),
	Operator(SmolStr),
	Variable { name: SmolStr, index: Option<ExprId> },
	Call { name: SmolStr, args: Vec<ExprId> },
}

#[derive(Debug, Clone)]
pub struct ExprNode {
	pub kind: ExprKind,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
	Empty,
	Block(Vec<StmtId>),
	If { cond: ExprId, then_branch: StmtId, else_branch: StmtId },
	While { cond: ExprId, body: StmtId },
	DoWhile { body: StmtId, cond: ExprId },
	For { init: Vec<StmtId>, cond: ExprId, iter: Vec<StmtId>, body: StmtId },
	Switch { value: ExprId, body: StmtId },
	Case { value: ExprId },
	Default,
	Break,
	Continue,
	Goto { label: SmolStr },
	Label { name: SmolStr },
	Return { value: Option<ExprId> },
	Call { name: SmolStr, args: Vec<ExprId> },
	VarDecl { name: SmolStr, init: Option<ExprId> },
	Assign { name: SmolStr, index: Option<ExprId>, op: SmolStr, value: Option<ExprId> },
	FunctionDecl { name: SmolStr, params: Vec<SmolStr>, body: StmtId, inline: bool },
	Comment(SmolStr),
}

#[derive(Debug, Clone)]
pub struct StmtNode {
	pub kind: StmtKind,
	pub parent: Option<StmtId>,
}

/// The whole program: a flat arena of statements and expressions, plus the ids of the top-level
/// items (global `VarDecl`s and `FunctionDecl`s) in source order (spec §3 invariants:
/// `FunctionDecl.name` unique, `main` mandatory, `init` optional).
#[derive(Debug, Clone, Default)]
pub struct Ast {
	pub stmts: Vec<StmtNode>,
	pub exprs: Vec<ExprNode>,
	pub top_level: Vec<StmtId>,
}

impl Ast {
	pub fn push_stmt(&mut self, kind: StmtKind) -> StmtId {
		let id = StmtId(self.stmts.len() as u32);
		self.stmts.push(StmtNode { kind, parent: None });
		id
	}

	pub fn push_expr(&mut self, kind: ExprKind) -> ExprId {
		let id = ExprId(self.exprs.len() as u32);
		self.exprs.push(ExprNode { kind });
		id
	}

	#[must_use]
	pub fn stmt(&self, id: StmtId) -> &StmtNode {
		&self.stmts[id.0 as usize]
	}

	pub fn stmt_mut(&mut self, id: StmtId) -> &mut StmtNode {
		&mut self.stmts[id.0 as usize]
	}

	#[must_use]
	pub fn expr(&self, id: ExprId) -> &ExprNode {
		&self.exprs[id.0 as usize]
	}

	pub fn expr_mut(&mut self, id: ExprId) -> &mut ExprNode {
		&mut self.exprs[id.0 as usize]
	}

	/// Rebinds every statement's `parent` field by walking the tree from `roots` down. Called
	/// after any pass rewrites statement bodies, so `break`/`continue` resolution (which walks
	/// parents bottom-up) always sees an up-to-date chain (spec §3 invariant, §5).
	pub fn rebind_parents(&mut self, roots: &[StmtId]) {
		for &root in roots {
			self.rebind_from(root, None);
		}
	}

	fn rebind_from(&mut self, id: StmtId, parent: Option<StmtId>) {
		self.stmt_mut(id).parent = parent;
		let children = self.children_of(id);
		for child in children {
			self.rebind_from(child, Some(id));
		}
	}

	#[must_use]
	pub fn children_of(&self, id: StmtId) -> Vec<StmtId> {
		match &self.stmt(id).kind {
			StmtKind::Block(stmts) => stmts.clone(),
			StmtKind::If { then_branch, else_branch, .. } => vec![*then_branch, *else_branch],
			StmtKind::While { body, .. } | StmtKind::DoWhile { body, .. } | StmtKind::Switch { body, .. } => vec![*body],
			StmtKind::For { init, iter, body, .. } => {
				let mut v = init.clone();
				v.push(*body);
				v.extend(iter.iter().copied());
				v
			},
			StmtKind::FunctionDecl { body, .. } => vec![*body],
			_ => vec![],
		}
	}

	/// Walks `start`'s parent chain bottom-up looking for the nearest enclosing loop (and,
	/// for `break`, switch too) — spec §3 invariant, §5 ordering constraint.
	#[must_use]
	pub fn find_enclosing_loop_or_switch(&self, start: StmtId, allow_switch: bool) -> Option<StmtId> {
		let mut current = self.stmt(start).parent;
		while let Some(id) = current {
			match self.stmt(id).kind {
				StmtKind::While { .. } | StmtKind::DoWhile { .. } | StmtKind::For { .. } => return Some(id),
				StmtKind::Switch { .. } if allow_switch => return Some(id),
				_ => {},
			}
			current = self.stmt(id).parent;
		}
		None
	}
}
