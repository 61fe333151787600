//! The C-syntax rendering backbone shared by all three target renderers (spec §4.7), ported
//! from `original_source/renderers.py`'s `Renderer`/`CSyntaxRenderer`/`BaseSdsRenderer` class
//! hierarchy. Rust has no class inheritance, so the hierarchy becomes one [`Renderer`] struct
//! whose `restricted` flag switches on the `BaseSdsRenderer` overrides inline, plus free
//! functions (`banner`) shared by every caller.

pub mod asm;
pub mod debug;
pub mod simple;

use std::collections::HashSet;

use smartstring::alias::String as SmolStr;

use crate::ast::{Ast, ExprId, ExprKind, LiteralKind, StmtId, StmtKind};
use crate::error::TargetError;
use crate::pragma::Pragmas;
use crate::source::SourceCode;

/// Renders one program to target text, optionally enforcing the restricted dialect's rules
/// (spec §4.7's `BaseSdsRenderer`: no structured loops, no function arguments, value-less
/// `return`, no user calls inside expressions, only trivial array indices).
pub struct Renderer<'a> {
	ast: &'a Ast,
	pragmas: &'a Pragmas,
	src: &'a SourceCode,
	restricted: bool,
	name: &'static str,
	user_functions: HashSet<SmolStr>,
}

impl<'a> Renderer<'a> {
	#[must_use]
	pub fn new(ast: &'a Ast, pragmas: &'a Pragmas, src: &'a SourceCode, restricted: bool, name: &'static str) -> Self {
		let user_functions = ast
			.top_level
			.iter()
			.filter_map(|&id| match &ast.stmt(id).kind {
				StmtKind::FunctionDecl { name, .. } => Some(name.clone()),
				_ => None,
			})
			.collect();
		Self { ast, pragmas, src, restricted, name, user_functions }
	}

	fn fail(&self, make: impl FnOnce(miette::NamedSource<std::sync::Arc<str>>, miette::SourceSpan) -> TargetError) -> Box<TargetError> {
		Box::new(make(self.src.named_source(), self.src.span(0, 0)))
	}

	fn indent(&self, level: usize) -> SmolStr {
		self.pragmas.indent.as_str().repeat(level).into()
	}

	/// Renders the whole program: an optional banner comment followed by every top-level
	/// declaration in source order (spec §4.7's `Renderer.render()`).
	pub fn render_program(&self) -> Result<String, Box<TargetError>> {
		let mut out = String::new();
		if self.pragmas.comments {
			out.push_str(&banner(self.pragmas, self.name));
		}
		for &id in &self.ast.top_level {
			out.push_str(&self.render_top_level_stmt(id)?);
		}
		Ok(out)
	}

	fn render_top_level_stmt(&self, id: StmtId) -> Result<String, Box<TargetError>> {
		match &self.ast.stmt(id).kind {
			StmtKind::VarDecl { name, init } => {
				let init = match init {
					Some(e) => format!(" = {}", self.render_expr(*e)?),
					None => std::string::String::new(),
				};
				Ok(format!("var {name}{init};\n"))
			},
			StmtKind::FunctionDecl { name, params, body, .. } => {
				if self.restricted && !params.is_empty() {
					return Err(self.fail(|src, location| TargetError::FunctionArguments { src, location }));
				}
				let joined = params.join(", ");
				let body_str = self.render_stmt(*body, 0)?;
				Ok(format!("\n{name}({joined})\n{body_str}"))
			},
			StmtKind::Comment(text) => Ok(self.render_comment(text)),
			StmtKind::Empty => Ok(std::string::String::new()),
			_ => Ok(std::string::String::new()),
		}
	}

	fn render_comment(&self, text: &str) -> String {
		if text.contains('\n') {
			format!("/* {text} */\n")
		} else {
			format!("// {text}\n")
		}
	}

	/// Renders one statement at `level` indentation, ending in its own trailing newline(s).
	#[allow(clippy::too_many_lines)]
	fn render_stmt(&self, id: StmtId, level: usize) -> Result<String, Box<TargetError>> {
		let pad = self.indent(level);
		match &self.ast.stmt(id).kind {
			StmtKind::Empty => Ok(format!("{pad};\n")),
			StmtKind::Comment(text) => Ok(format!("{pad}{}", self.render_comment(text))),
			StmtKind::Block(stmts) => {
				let mut body = std::string::String::new();
				for &s in stmts {
					body.push_str(&self.render_stmt(s, level + 1)?);
				}
				Ok(format!("{pad}{{\n{body}{pad}}}\n"))
			},
			StmtKind::If { cond, then_branch, else_branch } => self.render_if(*cond, *then_branch, *else_branch, level),
			StmtKind::While { cond, body } => {
				if self.restricted {
					return Err(self.fail(|src, location| TargetError::StructuredControlFlow { renderer: self.name, construct: "while", src, location }));
				}
				Ok(format!("{pad}while ({}) {}", self.render_expr(*cond)?, self.render_block_tail(*body, level)?))
			},
			StmtKind::DoWhile { body, cond } => {
				if self.restricted {
					return Err(self.fail(|src, location| TargetError::StructuredControlFlow { renderer: self.name, construct: "do", src, location }));
				}
				Ok(format!("{pad}do {}{pad}while ({});\n", self.render_block_tail(*body, level)?, self.render_expr(*cond)?))
			},
			StmtKind::For { init, cond, iter, body } => {
				if self.restricted {
					return Err(self.fail(|src, location| TargetError::StructuredControlFlow { renderer: self.name, construct: "for", src, location }));
				}
				let init_str = self.render_comma_stmts(init)?;
				let iter_str = self.render_comma_stmts(iter)?;
				Ok(format!(
					"{pad}for ({init_str}; {}; {iter_str}) {}",
					self.render_expr(*cond)?,
					self.render_block_tail(*body, level)?
				))
			},
			StmtKind::Switch { value, body } => {
				if self.restricted {
					return Err(self.fail(|src, location| TargetError::StructuredControlFlow { renderer: self.name, construct: "switch", src, location }));
				}
				self.render_switch(*value, *body, level)
			},
			StmtKind::Case { value } => Ok(format!("{pad}case {}:\n", self.render_expr(*value)?)),
			StmtKind::Default => Ok(format!("{pad}default:\n")),
			StmtKind::Break => {
				if self.restricted {
					return Err(self.fail(|src, location| TargetError::StructuredControlFlow { renderer: self.name, construct: "break", src, location }));
				}
				Ok(format!("{pad}break;\n"))
			},
			StmtKind::Continue => {
				if self.restricted {
					return Err(self.fail(|src, location| TargetError::StructuredControlFlow { renderer: self.name, construct: "continue", src, location }));
				}
				Ok(format!("{pad}continue;\n"))
			},
			StmtKind::Goto { label } => Ok(format!("{pad}goto {label};\n")),
			StmtKind::Label { name } => Ok(format!("label {name}:\n")),
			StmtKind::Return { value } => self.render_return(*value, &pad),
			StmtKind::Call { name, args } => self.render_call_stmt(name, args, &pad),
			StmtKind::VarDecl { name, init } => {
				let init = match init {
					Some(e) => format!(" = {}", self.render_expr(*e)?),
					None => std::string::String::new(),
				};
				Ok(format!("{pad}var {name}{init};\n"))
			},
			StmtKind::Assign { name, index, op, value } => self.render_assign(name, *index, op, *value, &pad),
			StmtKind::FunctionDecl { .. } => self.render_top_level_stmt(id),
		}
	}

	/// `do`/`while`/`for`/`if` bodies are always `Block`s after `AddBraces`; this renders the
	/// block with its opening brace placed right after the introducing keyword rather than on
	/// its own indented line, by stripping the indent [`Self::render_stmt`] would otherwise add.
	fn render_block_tail(&self, body: StmtId, level: usize) -> Result<String, Box<TargetError>> {
		let rendered = self.render_stmt(body, level)?;
		let pad = self.indent(level);
		Ok(rendered.strip_prefix(pad.as_str()).unwrap_or(&rendered).to_string())
	}

	fn render_comma_stmts(&self, stmts: &[StmtId]) -> Result<String, Box<TargetError>> {
		let mut parts = Vec::new();
		for &s in stmts {
			parts.push(self.render_bare_stmt(s)?);
		}
		Ok(parts.join(", "))
	}

	/// Renders a `for`-header clause statement (no trailing semicolon/newline/indent).
	fn render_bare_stmt(&self, id: StmtId) -> Result<String, Box<TargetError>> {
		match &self.ast.stmt(id).kind {
			StmtKind::VarDecl { name, init } => {
				let init = match init {
					Some(e) => format!(" = {}", self.render_expr(*e)?),
					None => std::string::String::new(),
				};
				Ok(format!("var {name}{init}"))
			},
			StmtKind::Assign { name, index, op, value } => {
				let index_str = match index {
					Some(i) => format!("[{}]", self.render_expr(*i)?),
					None => std::string::String::new(),
				};
				let value_str = match value {
					Some(v) => format!(" {op} {}", self.render_expr(*v)?),
					None => op.to_string(),
				};
				Ok(format!("{name}{index_str}{value_str}"))
			},
			StmtKind::Empty => Ok(std::string::String::new()),
			_ => self.render_stmt(id, 0).map(|s| s.trim_end_matches(|c| c == '\n' || c == ';').trim_start().to_string()),
		}
	}

	fn render_return(&self, value: Option<ExprId>, pad: &str) -> Result<String, Box<TargetError>> {
		if self.restricted {
			let is_zero = match value {
				None => true,
				Some(v) => matches!(&self.ast.expr(v).kind, ExprKind::Literal(LiteralKind::Number(0))),
			};
			if !is_zero {
				return Err(self.fail(|src, location| TargetError::NonVoidReturn { src, location }));
			}
			return Ok(format!("{pad}return;\n"));
		}
		match value {
			Some(v) => Ok(format!("{pad}return {};\n", self.render_expr(v)?)),
			None => Ok(format!("{pad}return;\n")),
		}
	}

	fn render_call_stmt(&self, name: &str, args: &[ExprId], pad: &str) -> Result<String, Box<TargetError>> {
		if self.restricted && !args.is_empty() && self.user_functions.contains(name) {
			return Err(self.fail(|src, location| TargetError::FunctionArguments { src, location }));
		}
		let mut parts = Vec::new();
		for &a in args {
			parts.push(self.render_expr(a)?);
		}
		Ok(format!("{pad}{name}({});\n", parts.join(", ")))
	}

	fn render_assign(&self, name: &str, index: Option<ExprId>, op: &str, value: Option<ExprId>, pad: &str) -> Result<String, Box<TargetError>> {
		let index_str = match index {
			Some(i) => {
				if self.restricted && !self.is_trivial_index(i) {
					return Err(self.fail(|src, location| TargetError::ExpressionArrayIndex { src, location }));
				}
				format!("[{}]", self.render_expr(i)?)
			},
			None => std::string::String::new(),
		};
		match value {
			Some(v) => Ok(format!("{pad}{name}{index_str} {op} {};\n", self.render_expr(v)?)),
			None => Ok(format!("{pad}{name}{index_str}{op};\n")),
		}
	}

	/// A "trivial" index under the restricted dialect: a bare literal or variable, not a
	/// multi-token expression (spec §4.7/§7.4 `ExpressionArrayIndex`).
	fn is_trivial_index(&self, id: ExprId) -> bool {
		match &self.ast.expr(id).kind {
			ExprKind::Literal(_) | ExprKind::Variable { index: None, .. } => true,
			ExprKind::Group(children) => children.len() == 1 && self.is_trivial_index(children[0]),
			_ => false,
		}
	}

	fn render_if(&self, cond: ExprId, then_branch: StmtId, else_branch: StmtId, level: usize) -> Result<String, Box<TargetError>> {
		let pad = self.indent(level);
		if let Some(value) = try_eval_condition(self.ast, cond) {
			let comment = format!("{pad}// constant condition folded to {value}\n");
			return if value != 0 {
				Ok(format!("{comment}{}", self.render_stmt(then_branch, level)?))
			} else if matches!(self.ast.stmt(else_branch).kind, StmtKind::Empty) {
				Ok(comment)
			} else {
				Ok(format!("{comment}{}", self.render_stmt(else_branch, level)?))
			};
		}

		if let (Some(then_goto), Some(else_goto)) = (single_goto(self.ast, then_branch), single_goto(self.ast, else_branch)) {
			let StmtKind::Goto { label: l1 } = &self.ast.stmt(then_goto).kind else { unreachable!() };
			let StmtKind::Goto { label: l2 } = &self.ast.stmt(else_goto).kind else { unreachable!() };
			return Ok(format!("{pad}if ({}) goto {l1} else goto {l2};\n", self.render_expr(cond)?));
		}

		if let Some(then_goto) = single_goto(self.ast, then_branch) {
			if matches!(self.ast.stmt(else_branch).kind, StmtKind::Empty) {
				let StmtKind::Goto { label } = &self.ast.stmt(then_goto).kind else { unreachable!() };
				return Ok(format!("{pad}if ({}) goto {label};\n", self.render_expr(cond)?));
			}
		}

		let then_str = self.render_block_tail(then_branch, level)?;
		if matches!(self.ast.stmt(else_branch).kind, StmtKind::Empty) {
			return Ok(format!("{pad}if ({}) {then_str}", self.render_expr(cond)?));
		}
		let else_str = self.render_block_tail(else_branch, level)?;
		Ok(format!("{pad}if ({}) {then_str}{pad}else {else_str}", self.render_expr(cond)?))
	}

	fn render_switch(&self, value: ExprId, body: StmtId, level: usize) -> Result<String, Box<TargetError>> {
		let pad = self.indent(level);
		let StmtKind::Block(stmts) = &self.ast.stmt(body).kind else {
			return Ok(format!("{pad}switch ({}) {}", self.render_expr(value)?, self.render_stmt(body, level)?));
		};
		let mut body_str = std::string::String::new();
		for &s in stmts {
			let extra = matches!(self.ast.stmt(s).kind, StmtKind::Case { .. } | StmtKind::Default);
			body_str.push_str(&self.render_stmt(s, if extra { level + 1 } else { level + 2 })?);
		}
		Ok(format!("{pad}switch ({}) {{\n{body_str}{pad}}}\n", self.render_expr(value)?))
	}

	/// Top-level expression render: no enclosing parentheses.
	pub fn render_expr(&self, id: ExprId) -> Result<String, Box<TargetError>> {
		match &self.ast.expr(id).kind {
			ExprKind::Group(children) => {
				let mut parts = Vec::new();
				for &c in children {
					parts.push(self.render_subexpr(c)?);
				}
				Ok(parts.join(" "))
			},
			_ => self.render_subexpr(id),
		}
	}

	/// Nested expression render: a `Group` of more than one child is parenthesised.
	fn render_subexpr(&self, id: ExprId) -> Result<String, Box<TargetError>> {
		match &self.ast.expr(id).kind {
			ExprKind::Group(children) if children.len() == 1 => self.render_subexpr(children[0]),
			ExprKind::Group(children) => {
				let mut parts = Vec::new();
				for &c in children {
					parts.push(self.render_subexpr(c)?);
				}
				Ok(format!("({})", parts.join(" ")))
			},
			ExprKind::Literal(lit) => Ok(self.render_literal(lit)),
			ExprKind::Operator(op) => Ok(un_retag(op).to_string()),
			ExprKind::Variable { name, index } => match index {
				Some(i) => {
					if self.restricted && !self.is_trivial_index(*i) {
						return Err(self.fail(|src, location| TargetError::ExpressionArrayIndex { src, location }));
					}
					Ok(format!("{name}[{}]", self.render_expr(*i)?))
				},
				None => Ok(name.to_string()),
			},
			ExprKind::Call { name, args } => {
				if self.restricted && self.user_functions.contains(name) {
					return Err(self.fail(|src, location| TargetError::CallInExpression { src, location }));
				}
				let mut parts = Vec::new();
				for &a in args {
					parts.push(self.render_expr(a)?);
				}
				Ok(format!("{name}({})", parts.join(", ")))
			},
		}
	}

	fn render_literal(&self, lit: &LiteralKind) -> String {
		match lit {
			LiteralKind::Number(n) => render_number(*n, self.restricted),
			LiteralKind::Char(c) if self.restricted => (*c as u32).to_string(),
			LiteralKind::Char(c) => format!("'{c}'"),
			LiteralKind::Str(s) if self.restricted => format!("'{}'", s.replace('\'', "\\'")),
			LiteralKind::Str(s) => format!("\"{s}\""),
		}
	}
}

/// `@+`/`@-` are the lowering engine's internal unary tags (spec §4.5.6); rendered back to the
/// plain operator the target dialect expects.
fn un_retag(op: &str) -> &str {
	match op {
		"@+" => "+",
		"@-" => "-",
		other => other,
	}
}

/// Values outside `i32`'s signed range are rendered as hex literals (spec §4.5.6 constant
/// folding note); irrelevant for the unrestricted debug dialect, which always prints decimal.
fn render_number(n: i64, restricted: bool) -> String {
	if restricted && !(i64::from(i32::MIN) ..= i64::from(i32::MAX)).contains(&n) {
		format!("{n:#x}")
	} else {
		n.to_string()
	}
}

/// Mirrors [`crate::lower::engine::Lowerer::fold_const`] but over a not-yet-lowered tree, so
/// `Debug`/`Simple` rendering still collapses a constant-condition `if` exactly as the source's
/// `CSyntaxRenderer._render_if` does, independent of whether the program was ever lowered.
fn try_eval_condition(ast: &Ast, id: ExprId) -> Option<i64> {
	let text = stringify_for_eval(ast, id)?;
	crate::directive::eval::eval_expr(&text)
}

fn stringify_for_eval(ast: &Ast, id: ExprId) -> Option<std::string::String> {
	match &ast.expr(id).kind {
		ExprKind::Literal(LiteralKind::Number(n)) => Some(n.to_string()),
		ExprKind::Operator(op) => Some(un_retag(op).to_string()),
		ExprKind::Group(children) => {
			let mut parts = Vec::new();
			for &c in children {
				parts.push(stringify_for_eval(ast, c)?);
			}
			Some(format!("({})", parts.join(" ")))
		},
		_ => None,
	}
}

/// A then/else branch that reduces to exactly one `goto`, whether bare (the `AddBraces`
/// exception) or wrapped in a single-statement `Block`.
fn single_goto(ast: &Ast, id: StmtId) -> Option<StmtId> {
	match &ast.stmt(id).kind {
		StmtKind::Goto { .. } => Some(id),
		StmtKind::Block(stmts) if stmts.len() == 1 => single_goto(ast, stmts[0]),
		_ => None,
	}
}

/// The build timestamp baked in by `shadow-rs` (spec §4.7's banner "timestamp" field), only
/// available when the `binaries` feature's `build.rs` step ran; empty otherwise (e.g. when this
/// crate is consumed as a library dependency without that feature).
#[cfg(feature = "binaries")]
fn build_timestamp() -> &'static str {
	crate::buildinfo::BUILD_TIME
}

#[cfg(not(feature = "binaries"))]
fn build_timestamp() -> &'static str {
	""
}

/// Builds the `===`-bordered banner comment (name/author/version/timestamp/renderer), gated on
/// the `comments` pragma (spec §4.7), matching `original_source/renderers.py`'s `Renderer`
/// base-class header assembly.
#[must_use]
pub fn banner(pragmas: &Pragmas, renderer_name: &str) -> String {
	let bar = "=".repeat(60);
	let mut out = format!("// {bar}\n");
	out.push_str(&format!("// {}\n", pragmas.name));
	if !pragmas.author.is_empty() {
		out.push_str(&format!("// by {}\n", pragmas.author));
	}
	out.push_str(&format!("// version {}\n", pragmas.version));
	let ts = build_timestamp();
	if !ts.is_empty() {
		out.push_str(&format!("// built: {ts}\n"));
	}
	out.push_str(&format!("// rendered by: {renderer_name}\n"));
	out.push_str(&format!("// {bar}\n\n"));
	out
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::ast::parser::StatementParser;

	fn parse(text: &str) -> (Ast, SourceCode) {
		let source = SourceCode::new("t.c", text);
		let ast = StatementParser::new(&source).parse_program(&source.text).unwrap();
		(ast, source)
	}

	#[test]
	fn banner_includes_name_and_version() {
		let mut pragmas = Pragmas::default();
		pragmas.name = "demo".into();
		pragmas.version = "1.2.3".into();
		let text = banner(&pragmas, "debug");
		assert!(text.contains("demo"));
		assert!(text.contains("1.2.3"));
	}

	#[test]
	fn renders_plain_goto_and_label() {
		let (ast, src) = parse("f() { goto l; label l: }");
		let pragmas = Pragmas::default();
		let renderer = Renderer::new(&ast, &pragmas, &src, false, "debug");
		let out = renderer.render_program().unwrap();
		assert!(out.contains("goto l;"));
		assert!(out.contains("label l:"));
	}
}
