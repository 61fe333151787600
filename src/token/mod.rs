//! The token tree: atomic tokens plus role-tagged composite tokens with lazily computed
//! children (spec §3 "Token tree", §4.2).

pub mod tokenizer;
pub mod walker;

use std::cell::RefCell;

use smartstring::alias::String as SmolStr;

pub use tokenizer::Tokenizer;
pub use walker::TokenWalker;

/// The role a parenthesis composite plays in its parent context; assigned before the
/// composite's children are ever tokenized (spec §3, §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParenRole {
	/// A single expression, e.g. the condition of an `if`.
	Expr,
	/// Zero or more comma-separated argument expressions, e.g. a call's actuals.
	ArgVals,
	/// Zero or more comma-separated identifiers, e.g. a function declaration's formals.
	ArgNames,
	/// The three semicolon-separated sections of a `for (init; cond; iter)`.
	For,
}

/// A statement-level keyword, including the synthetic keywords the tokenizer synthesises for
/// bare calls, function declarations, assignments, and labels (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
	If,
	Else,
	While,
	Do,
	For,
	Switch,
	Case,
	Default,
	Break,
	Continue,
	Goto,
	Return,
	Var,
	Label,
	/// Synthetic: `name(...);`.
	Call,
	/// Synthetic: `name(...) { ... }`.
	Function,
	/// Synthetic: `name = rvalue;` and its compound-assignment/increment variants.
	Set,
}

/// One token, atomic or composite. Composite variants carry their raw source text and an
/// interior-mutable, lazily-populated child list — the children are only tokenized the first
/// time they are asked for, matching the source's role-driven, on-demand re-tokenization of
/// parenthesis contents (spec §9 "Composite tokens with lazy children").
#[derive(Debug, Clone)]
pub enum Token {
	Keyword(Keyword),
	Identifier(SmolStr),
	Number(i64),
	Char(char),
	String(SmolStr),
	/// Includes the unary-retagged `@+`/`@-` forms (spec §4.2).
	Operator(SmolStr),
	Punct(char),
	Paren(Composite),
	Bracket(Composite),
	CodeBlock(Composite),
	/// A source comment immediately preceding the next statement; preserved through dead-code
	/// removal when it carries `FUNC` (a banner) per spec §4.6.
	Comment(SmolStr),
}

/// Shared representation for every composite (bracketed) token kind.
#[derive(Debug, Clone)]
pub struct Composite {
	pub raw: SmolStr,
	pub role: Option<ParenRole>,
	children: RefCell<Option<std::rc::Rc<Vec<Token>>>>,
}

impl Composite {
	#[must_use]
	pub fn new(raw: impl Into<SmolStr>, role: Option<ParenRole>) -> Self {
		Self { raw: raw.into(), role, children: RefCell::new(None) }
	}

	/// Returns the inner source text with the outer delimiter pair stripped.
	#[must_use]
	pub fn inner(&self) -> &str {
		let s: &str = &self.raw;
		let mut chars = s.char_indices();
		let Some((_, _first)) = chars.next() else { return s };
		let end = s.len() - s.chars().next_back().map_or(0, char::len_utf8);
		if end <= 1 { "" } else { &s[1 .. end] }
	}

	/// Returns the cached child token list, tokenizing it on first access using `f`.
	pub fn children_or_compute(&self, f: impl FnOnce(&str) -> Vec<Token>) -> std::rc::Rc<Vec<Token>> {
		if self.children.borrow().is_none() {
			let computed = f(self.inner());
			*self.children.borrow_mut() = Some(std::rc::Rc::new(computed));
		}
		std::rc::Rc::clone(self.children.borrow().as_ref().unwrap())
	}
}

impl Token {
	#[must_use]
	pub fn is_composite(&self) -> bool {
		matches!(self, Token::Paren(_) | Token::Bracket(_) | Token::CodeBlock(_))
	}

	#[must_use]
	pub fn as_identifier(&self) -> Option<&str> {
		match self {
			Token::Identifier(s) => Some(s),
			_ => None,
		}
	}
}
