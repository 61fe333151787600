//! Builds the statement/expression AST from a token stream (spec §4.3).

use smartstring::alias::String as SmolStr;

use super::{Ast, ExprId, ExprKind, LiteralKind, StmtId, StmtKind};
use crate::error::SyntaxError;
use crate::source::SourceCode;
use crate::token::{Composite, Keyword, ParenRole, Token, TokenWalker, Tokenizer};

pub struct StatementParser<'a> {
	ast: Ast,
	source: &'a SourceCode,
}

impl<'a> StatementParser<'a> {
	#[must_use]
	pub fn new(source: &'a SourceCode) -> Self {
		Self { ast: Ast::default(), source }
	}

	/// Parses the whole program from preprocessed source text (spec §4.3).
	pub fn parse_program(mut self, text: &str) -> Result<Ast, Box<SyntaxError>> {
		let tokens = Tokenizer::tokenize_statements(text);
		let mut walker = TokenWalker::new(&tokens);
		let top = self.parse_statement_sequence(&mut walker)?;
		for &id in &top {
			match self.ast.stmt(id).kind {
				StmtKind::VarDecl { .. } | StmtKind::FunctionDecl { .. } | StmtKind::Comment(_) | StmtKind::Empty => {},
				_ => return Err(self.err_unexpected("a top-level variable or function declaration", "a statement")),
			}
		}
		self.ast.top_level = top;
		let roots = self.ast.top_level.clone();
		self.ast.rebind_parents(&roots);
		Ok(self.ast)
	}

	fn err_unexpected(&self, expected: &str, found: &str) -> Box<SyntaxError> {
		Box::new(SyntaxError::UnexpectedToken {
			expected: expected.to_string(),
			found: found.to_string(),
			src: self.source.named_source(),
			location: self.source.span(0, 0),
		})
	}

	fn parse_statement_sequence(&mut self, w: &mut TokenWalker<'_>) -> Result<Vec<StmtId>, Box<SyntaxError>> {
		let mut out = Vec::new();
		while w.has_next() {
			out.push(self.parse_statement(w)?);
		}
		Ok(out)
	}

	/// Parses the statements inside a lazily-tokenized code block.
	fn parse_block_contents(&mut self, block: &Composite) -> Result<Vec<StmtId>, Box<SyntaxError>> {
		let children = block.children_or_compute(Tokenizer::tokenize_statements);
		let mut walker = TokenWalker::new(&children);
		self.parse_statement_sequence(&mut walker)
	}

	#[allow(clippy::too_many_lines)]
	fn parse_statement(&mut self, w: &mut TokenWalker<'_>) -> Result<StmtId, Box<SyntaxError>> {
		match w.peek() {
			Some(Token::Punct(';')) => {
				w.next();
				Ok(self.ast.push_stmt(StmtKind::Empty))
			},
			Some(Token::Comment(text)) => {
				let text = text.clone();
				w.next();
				Ok(self.ast.push_stmt(StmtKind::Comment(text)))
			},
			Some(Token::CodeBlock(block)) => {
				let block = block.clone();
				w.next();
				let stmts = self.parse_block_contents(&block)?;
				Ok(self.ast.push_stmt(StmtKind::Block(stmts)))
			},
			Some(Token::Keyword(Keyword::If)) => self.parse_if(w),
			Some(Token::Keyword(Keyword::While)) => self.parse_while(w),
			Some(Token::Keyword(Keyword::Do)) => self.parse_do_while(w),
			Some(Token::Keyword(Keyword::For)) => self.parse_for(w),
			Some(Token::Keyword(Keyword::Switch)) => self.parse_switch(w),
			Some(Token::Keyword(Keyword::Case)) => {
				w.next();
				let Some(Token::Paren(paren)) = w.next() else {
					return Err(self.err_unexpected("case expression", "?"));
				};
				w.consume_punct(':');
				let value = self.build_expr_from_paren(paren);
				Ok(self.ast.push_stmt(StmtKind::Case { value }))
			},
			Some(Token::Keyword(Keyword::Default)) => {
				w.next();
				w.consume_punct(':');
				Ok(self.ast.push_stmt(StmtKind::Default))
			},
			Some(Token::Keyword(Keyword::Break)) => {
				w.next();
				w.consume_punct(';');
				Ok(self.ast.push_stmt(StmtKind::Break))
			},
			Some(Token::Keyword(Keyword::Continue)) => {
				w.next();
				w.consume_punct(';');
				Ok(self.ast.push_stmt(StmtKind::Continue))
			},
			Some(Token::Keyword(Keyword::Goto)) => {
				w.next();
				let Some(label) = w.consume_identifier() else {
					return Err(self.err_unexpected("label name", "?"));
				};
				let label: SmolStr = label.into();
				w.consume_punct(';');
				Ok(self.ast.push_stmt(StmtKind::Goto { label }))
			},
			Some(Token::Keyword(Keyword::Return)) => {
				w.next();
				let value = if let Some(Token::Paren(paren)) = w.peek() {
					let paren = paren.clone();
					w.next();
					Some(self.build_expr_from_paren(&paren))
				} else {
					None
				};
				w.consume_punct(';');
				Ok(self.ast.push_stmt(StmtKind::Return { value }))
			},
			Some(Token::Keyword(Keyword::Label)) => {
				w.next();
				let Some(name) = w.consume_identifier() else {
					return Err(self.err_unexpected("label name", "?"));
				};
				let name: SmolStr = name.into();
				w.consume_punct(':');
				Ok(self.ast.push_stmt(StmtKind::Label { name }))
			},
			Some(Token::Keyword(Keyword::Var)) => {
				w.next();
				let Some(name) = w.consume_identifier() else {
					return Err(self.err_unexpected("variable name", "?"));
				};
				let name: SmolStr = name.into();
				let init = if matches!(w.peek(), Some(Token::Operator(op)) if op.as_str() == "=") {
					w.next();
					let Some(Token::Paren(paren)) = w.next() else {
						return Err(self.err_unexpected("initializer expression", "?"));
					};
					Some(self.build_expr_from_paren(paren))
				} else {
					None
				};
				w.consume_punct(';');
				Ok(self.ast.push_stmt(StmtKind::VarDecl { name, init }))
			},
			Some(Token::Keyword(Keyword::Set)) => {
				w.next();
				let Some(name) = w.consume_identifier() else {
					return Err(self.err_unexpected("variable name", "?"));
				};
				let name: SmolStr = name.into();
				let index = if let Some(Token::Bracket(b)) = w.peek() {
					let b = b.clone();
					w.next();
					Some(self.build_expr_from_bracket(&b))
				} else {
					None
				};
				let Some(Token::Operator(op)) = w.next() else {
					return Err(self.err_unexpected("assignment operator", "?"));
				};
				let op = op.clone();
				let value = if op.as_str() != "++" && op.as_str() != "--" {
					let Some(Token::Paren(paren)) = w.next() else {
						return Err(self.err_unexpected("rvalue expression", "?"));
					};
					Some(self.build_expr_from_paren(paren))
				} else {
					None
				};
				w.consume_punct(';');
				Ok(self.ast.push_stmt(StmtKind::Assign { name, index, op, value }))
			},
			Some(Token::Keyword(Keyword::Call)) => {
				w.next();
				let Some(name) = w.consume_identifier() else {
					return Err(self.err_unexpected("function name", "?"));
				};
				let name: SmolStr = name.into();
				let Some(Token::Paren(paren)) = w.next() else {
					return Err(self.err_unexpected("call arguments", "?"));
				};
				let args = self.build_arg_vals(paren);
				w.consume_punct(';');
				Ok(self.ast.push_stmt(StmtKind::Call { name, args }))
			},
			Some(Token::Keyword(Keyword::Function)) => self.parse_function(w),
			other => Err(self.err_unexpected("statement", &format!("{other:?}"))),
		}
	}

	fn parse_if(&mut self, w: &mut TokenWalker<'_>) -> Result<StmtId, Box<SyntaxError>> {
		w.next();
		let Some(Token::Paren(paren)) = w.next() else {
			return Err(self.err_unexpected("if condition", "?"));
		};
		let cond = self.build_expr_from_paren(paren);
		let then_branch = self.parse_statement(w)?;
		let else_branch = if w.consume_keyword(Keyword::Else) { self.parse_statement(w)? } else { self.ast.push_stmt(StmtKind::Empty) };
		Ok(self.ast.push_stmt(StmtKind::If { cond, then_branch, else_branch }))
	}

	fn parse_while(&mut self, w: &mut TokenWalker<'_>) -> Result<StmtId, Box<SyntaxError>> {
		w.next();
		let Some(Token::Paren(paren)) = w.next() else {
			return Err(self.err_unexpected("while condition", "?"));
		};
		let cond = self.build_expr_from_paren(paren);
		let body = self.parse_statement(w)?;
		Ok(self.ast.push_stmt(StmtKind::While { cond, body }))
	}

	fn parse_do_while(&mut self, w: &mut TokenWalker<'_>) -> Result<StmtId, Box<SyntaxError>> {
		w.next();
		let body = self.parse_statement(w)?;
		if !w.consume_keyword(Keyword::While) {
			return Err(self.err_unexpected("while", "?"));
		}
		let Some(Token::Paren(paren)) = w.next() else {
			return Err(self.err_unexpected("do-while condition", "?"));
		};
		let cond = self.build_expr_from_paren(paren);
		w.consume_punct(';');
		Ok(self.ast.push_stmt(StmtKind::DoWhile { body, cond }))
	}

	fn parse_for(&mut self, w: &mut TokenWalker<'_>) -> Result<StmtId, Box<SyntaxError>> {
		w.next();
		let Some(Token::Paren(paren)) = w.next() else {
			return Err(self.err_unexpected("for(...)", "?"));
		};
		let raw = paren.inner().to_string();
		let sections: Vec<&str> = split_for_sections(&raw);
		let init_text = sections.first().copied().unwrap_or("").trim();
		let cond_text = sections.get(1).copied().unwrap_or("").trim();
		let iter_text = sections.get(2).copied().unwrap_or("").trim();

		let init = if init_text.is_empty() {
			vec![]
		} else {
			let tokens = Tokenizer::tokenize_statements(&format!("{init_text};"));
			let mut iw = TokenWalker::new(&tokens);
			self.parse_statement_sequence(&mut iw)?
		};
		let cond = if cond_text.is_empty() {
			self.ast.push_expr(ExprKind::Literal(LiteralKind::Number(1)))
		} else {
			let tokens = Tokenizer::tokenize_expr(cond_text);
			self.build_group(&tokens)
		};
		let iter = if iter_text.is_empty() {
			vec![]
		} else {
			let tokens = Tokenizer::tokenize_statements(&format!("{iter_text};"));
			let mut iw = TokenWalker::new(&tokens);
			self.parse_statement_sequence(&mut iw)?
		};

		let body = self.parse_statement(w)?;
		Ok(self.ast.push_stmt(StmtKind::For { init, cond, iter, body }))
	}

	fn parse_switch(&mut self, w: &mut TokenWalker<'_>) -> Result<StmtId, Box<SyntaxError>> {
		w.next();
		let Some(Token::Paren(paren)) = w.next() else {
			return Err(self.err_unexpected("switch value", "?"));
		};
		let value = self.build_expr_from_paren(paren);
		let Some(Token::CodeBlock(block)) = w.next() else {
			return Err(self.err_unexpected("switch body", "?"));
		};
		let block = block.clone();
		let stmts = self.parse_block_contents(&block)?;
		let body = self.ast.push_stmt(StmtKind::Block(stmts));
		Ok(self.ast.push_stmt(StmtKind::Switch { value, body }))
	}

	fn parse_function(&mut self, w: &mut TokenWalker<'_>) -> Result<StmtId, Box<SyntaxError>> {
		w.next();
		let Some(name) = w.consume_identifier() else {
			return Err(self.err_unexpected("function name", "?"));
		};
		let name: SmolStr = name.into();
		let Some(Token::Paren(paren)) = w.next() else {
			return Err(self.err_unexpected("parameter list", "?"));
		};
		let params: Vec<SmolStr> =
			split_top_level_commas(paren.inner()).into_iter().map(str::trim).filter(|s| !s.is_empty()).map(SmolStr::from).collect();
		let Some(Token::CodeBlock(block)) = w.next() else {
			return Err(self.err_unexpected("function body", "?"));
		};
		let block = block.clone();
		let stmts = self.parse_block_contents(&block)?;
		let body = self.ast.push_stmt(StmtKind::Block(stmts));
		Ok(self.ast.push_stmt(StmtKind::FunctionDecl { name, params, body, inline: false }))
	}

	fn build_expr_from_paren(&mut self, paren: &Composite) -> ExprId {
		let tokens = paren.children_or_compute(Tokenizer::tokenize_expr);
		self.build_group(&tokens)
	}

	fn build_expr_from_bracket(&mut self, bracket: &Composite) -> ExprId {
		let tokens = bracket.children_or_compute(Tokenizer::tokenize_expr);
		self.build_group(&tokens)
	}

	fn build_arg_vals(&mut self, paren: &Composite) -> Vec<ExprId> {
		let tokens = paren.children_or_compute(Tokenizer::tokenize_expr);
		split_tokens_on_comma(&tokens).into_iter().map(|slice| self.build_group(slice)).collect()
	}

	/// Builds a flat [`ExprKind::Group`] from a token slice; no precedence structure is imposed
	/// here — that happens later, during lowering (spec §4.5.6).
	fn build_group(&mut self, tokens: &[Token]) -> ExprId {
		let mut children = Vec::new();
		let mut i = 0;
		while i < tokens.len() {
			match &tokens[i] {
				Token::Identifier(name) => {
					if let Some(Token::Paren(paren)) = tokens.get(i + 1) {
						let args = self.build_arg_vals(paren);
						children.push(self.ast.push_expr(ExprKind::Call { name: name.clone(), args }));
						i += 2;
					} else if let Some(Token::Bracket(bracket)) = tokens.get(i + 1) {
						let index = self.build_expr_from_bracket(bracket);
						children.push(self.ast.push_expr(ExprKind::Variable { name: name.clone(), index: Some(index) }));
						i += 2;
					} else {
						children.push(self.ast.push_expr(ExprKind::Variable { name: name.clone(), index: None }));
						i += 1;
					}
				},
				Token::Number(n) => {
					children.push(self.ast.push_expr(ExprKind::Literal(LiteralKind::Number(*n))));
					i += 1;
				},
				Token::Char(c) => {
					children.push(self.ast.push_expr(ExprKind::Literal(LiteralKind::Char(*c))));
					i += 1;
				},
				Token::String(s) => {
					children.push(self.ast.push_expr(ExprKind::Literal(LiteralKind::Str(s.clone()))));
					i += 1;
				},
				Token::Operator(op) => {
					children.push(self.ast.push_expr(ExprKind::Operator(op.clone())));
					i += 1;
				},
				Token::Paren(paren) => {
					let inner = self.build_expr_from_paren(paren);
					children.push(inner);
					i += 1;
				},
				_ => {
					i += 1;
				},
			}
		}
		self.ast.push_expr(ExprKind::Group(children))
	}
}

fn split_tokens_on_comma(tokens: &[Token]) -> Vec<&[Token]> {
	if tokens.is_empty() {
		return vec![];
	}
	let mut out = Vec::new();
	let mut start = 0;
	for (i, t) in tokens.iter().enumerate() {
		if matches!(t, Token::Punct(',')) {
			out.push(&tokens[start .. i]);
			start = i + 1;
		}
	}
	out.push(&tokens[start ..]);
	out
}

fn split_top_level_commas(text: &str) -> Vec<&str> {
	let mut out = Vec::new();
	let mut depth = 0i32;
	let mut start = 0usize;
	for (i, c) in text.char_indices() {
		match c {
			'(' | '[' | '{' => depth += 1,
			')' | ']' | '}' => depth -= 1,
			',' if depth == 0 => {
				out.push(&text[start .. i]);
				start = i + 1;
			},
			_ => {},
		}
	}
	out.push(&text[start ..]);
	out
}

/// Splits a `for(...)`'s inner text on top-level `;` into (init, cond, iter).
fn split_for_sections(text: &str) -> Vec<&str> {
	let mut out = Vec::new();
	let mut depth = 0i32;
	let mut start = 0usize;
	let mut in_str: Option<char> = None;
	for (i, c) in text.char_indices() {
		if let Some(q) = in_str {
			if c == q {
				in_str = None;
			}
			continue;
		}
		match c {
			'"' | '\'' => in_str = Some(c),
			'(' | '[' => depth += 1,
			')' | ']' => depth -= 1,
			';' if depth == 0 => {
				out.push(&text[start .. i]);
				start = i + 1;
			},
			_ => {},
		}
	}
	out.push(&text[start ..]);
	out
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn parses_echo_call() {
		let source = SourceCode::new("t.c", "main() { echo(\"hi\"); }");
		let ast = StatementParser::new(&source).parse_program(&source.text).unwrap();
		assert_eq!(ast.top_level.len(), 1);
		assert!(matches!(ast.stmt(ast.top_level[0]).kind, StmtKind::FunctionDecl { .. }));
	}

	#[test]
	fn parses_for_loop() {
		let source = SourceCode::new("t.c", "main() { for (var i = 0; i < 3; i = i + 1) echo(i); }");
		let ast = StatementParser::new(&source).parse_program(&source.text).unwrap();
		assert_eq!(ast.top_level.len(), 1);
	}

	#[test]
	fn parses_switch() {
		let source =
			SourceCode::new("t.c", "main() { switch (x) { case 1: echo(\"a\"); break; default: echo(\"c\"); } }");
		let ast = StatementParser::new(&source).parse_program(&source.text).unwrap();
		assert_eq!(ast.top_level.len(), 1);
	}
}
