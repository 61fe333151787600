//! Converts preprocessed source text into a flat statement-level token stream, with composite
//! tokens (parens, brackets, code blocks) carrying raw source for later, role-driven
//! re-tokenization of their contents (spec §4.2).

use smartstring::alias::String as SmolStr;

use super::{Composite, Keyword, ParenRole, Token};
use crate::directive::reader::Reader;

const KEYWORDS: &[(&str, Keyword)] = &[
	("if", Keyword::If),
	("else", Keyword::Else),
	("while", Keyword::While),
	("do", Keyword::Do),
	("for", Keyword::For),
	("switch", Keyword::Switch),
	("case", Keyword::Case),
	("default", Keyword::Default),
	("break", Keyword::Break),
	("continue", Keyword::Continue),
	("goto", Keyword::Goto),
	("return", Keyword::Return),
	("var", Keyword::Var),
	("label", Keyword::Label),
];

/// Recognised multi-character operator and compound-assignment spellings, longest first so the
/// scanner prefers them over their single-character prefixes.
const MULTI_OPS: &[&str] =
	&["<<=", ">>=", "==", "!=", "<=", ">=", "&&", "||", "<<", ">>", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "++", "--"];

/// Stateless entry points for producing token streams; mirrors the source `Tokenizer` class,
/// which is likewise a thin collection of free-standing scanning routines over a cursor.
pub struct Tokenizer;

impl Tokenizer {
	/// Tokenizes a sequence of statements (a whole program, or the inside of a code block).
	#[must_use]
	pub fn tokenize_statements(text: &str) -> Vec<Token> {
		let mut reader = Reader::new(text);
		let mut out = Vec::new();
		loop {
			if let Some(comment) = sweep_keeping_comments(&mut reader) {
				out.push(Token::Comment(comment.into()));
			}
			if reader.is_eof() {
				break;
			}
			tokenize_one_statement(&mut reader, &mut out);
		}
		out
	}

	/// Tokenizes a single expression (the contents of an `Expr`-role paren, a bracket, or an
	/// rvalue) into a flat operator/operand stream; top-level commas (for `ArgVals`) are left as
	/// `Punct(',')` separators for the AST builder to split on.
	#[must_use]
	pub fn tokenize_expr(text: &str) -> Vec<Token> {
		let mut reader = Reader::new(text);
		let mut out = Vec::new();
		let mut prev_was_operand_or_close = false;
		loop {
			reader.sweep();
			if reader.is_eof() {
				break;
			}
			let c = reader.peek().unwrap();

			if c == ',' {
				reader.advance();
				out.push(Token::Punct(','));
				prev_was_operand_or_close = false;
				continue;
			}
			if c == '(' {
				let block = reader.consume_block('(', ')').unwrap();
				out.push(Token::Paren(Composite::new(block, Some(ParenRole::Expr))));
				prev_was_operand_or_close = true;
				continue;
			}
			if c.is_ascii_digit() {
				let num = scan_number(&mut reader);
				out.push(Token::Number(num));
				prev_was_operand_or_close = true;
				continue;
			}
			if c == '"' {
				out.push(Token::String(scan_quoted(&mut reader, '"')));
				prev_was_operand_or_close = true;
				continue;
			}
			if c == '\'' {
				let s = scan_quoted(&mut reader, '\'');
				out.push(Token::Char(s.chars().next().unwrap_or('\0')));
				prev_was_operand_or_close = true;
				continue;
			}
			if c.is_alphabetic() || c == '_' {
				let name: SmolStr = reader.advance_while(|c| c.is_alphanumeric() || c == '_').into();
				let save = reader.pos;
				reader.sweep();
				if reader.peek() == Some('(') {
					let block = reader.consume_block('(', ')').unwrap();
					out.push(Token::Identifier(name));
					out.push(Token::Paren(Composite::new(block, Some(ParenRole::ArgVals))));
				} else {
					reader.pos = save;
					out.push(Token::Identifier(name));
				}
				prev_was_operand_or_close = true;
				continue;
			}
			if c == '[' {
				let block = reader.consume_block('[', ']').unwrap();
				out.push(Token::Bracket(Composite::new(block, None)));
				prev_was_operand_or_close = true;
				continue;
			}

			// Operator scanning, with unary +/- retagging (spec §4.2).
			let op = scan_operator(&mut reader);
			let retagged = match (op.as_str(), prev_was_operand_or_close) {
				("+", false) => "@+".into(),
				("-", false) => "@-".into(),
				_ => op,
			};
			prev_was_operand_or_close = false;
			out.push(Token::Operator(retagged));
		}
		out
	}
}

/// Skips whitespace and comments like [`Reader::sweep`], but returns the text of the last
/// comment encountered so the statement tokenizer can preserve it as a [`Token::Comment`].
fn sweep_keeping_comments(reader: &mut Reader<'_>) -> Option<std::string::String> {
	let mut last = None;
	loop {
		let before = reader.pos;
		reader.advance_while(char::is_whitespace);
		if reader.starts_with("//") {
			let text = reader.advance_while(|c| c != '\n');
			last = Some(text.trim_start_matches('/').trim().to_string());
			continue;
		}
		if reader.starts_with("/*") {
			reader.pos += 2;
			let start = reader.pos;
			while !reader.is_eof() && !reader.starts_with("*/") {
				reader.advance();
			}
			last = Some(reader.text()[start .. reader.pos].trim().to_string());
			reader.pos = (reader.pos + 2).min(reader.text().len());
			continue;
		}
		if reader.pos == before {
			break;
		}
	}
	last
}

fn tokenize_one_statement(reader: &mut Reader<'_>, out: &mut Vec<Token>) {
	let c = reader.peek().unwrap();

	if c == ';' {
		reader.advance();
		out.push(Token::Punct(';'));
		return;
	}
	if c == '{' {
		let block = reader.consume_block('{', '}').unwrap();
		out.push(Token::CodeBlock(Composite::new(block, None)));
		return;
	}

	if c.is_alphabetic() || c == '_' {
		let start = reader.pos;
		let ident = reader.advance_while(|c| c.is_alphanumeric() || c == '_').to_string();

		if let Some((_, kw)) = KEYWORDS.iter().find(|(s, _)| *s == ident) {
			tokenize_keyword_statement(reader, out, *kw);
			return;
		}

		reader.sweep();
		match reader.peek() {
			Some('(') => {
				let paren = reader.consume_block('(', ')').unwrap().to_string();
				reader.sweep();
				if reader.peek() == Some('{') {
					let block = reader.consume_block('{', '}').unwrap();
					out.push(Token::Keyword(Keyword::Function));
					out.push(Token::Identifier(ident.into()));
					out.push(Token::Paren(Composite::new(paren, Some(ParenRole::ArgNames))));
					out.push(Token::CodeBlock(Composite::new(block, None)));
				} else {
					reader.sweep();
					reader.consume_literal(";");
					out.push(Token::Keyword(Keyword::Call));
					out.push(Token::Identifier(ident.into()));
					out.push(Token::Paren(Composite::new(paren, Some(ParenRole::ArgVals))));
					out.push(Token::Punct(';'));
				}
			},
			Some(':') => {
				reader.advance();
				out.push(Token::Keyword(Keyword::Label));
				out.push(Token::Identifier(ident.into()));
				out.push(Token::Punct(':'));
			},
			_ => {
				reader.pos = start + ident.len();
				tokenize_set_chain(reader, out, &ident);
			},
		}
		return;
	}

	// Anything unrecognised at statement level (shouldn't normally happen in valid input):
	// consume one character so the loop always makes progress.
	reader.advance();
}

fn tokenize_keyword_statement(reader: &mut Reader<'_>, out: &mut Vec<Token>, kw: Keyword) {
	match kw {
		Keyword::If | Keyword::While | Keyword::Switch => {
			reader.sweep();
			let paren = reader.consume_block('(', ')').unwrap();
			out.push(Token::Keyword(kw));
			out.push(Token::Paren(Composite::new(paren, Some(ParenRole::Expr))));
		},
		Keyword::For => {
			reader.sweep();
			let paren = reader.consume_block('(', ')').unwrap();
			out.push(Token::Keyword(kw));
			out.push(Token::Paren(Composite::new(paren, Some(ParenRole::For))));
		},
		Keyword::Else | Keyword::Do => out.push(Token::Keyword(kw)),
		Keyword::Break | Keyword::Continue => {
			reader.sweep();
			reader.consume_literal(";");
			out.push(Token::Keyword(kw));
			out.push(Token::Punct(';'));
		},
		Keyword::Goto => {
			reader.sweep();
			let name = reader.advance_while(|c| c.is_alphanumeric() || c == '_').to_string();
			reader.sweep();
			reader.consume_literal(";");
			out.push(Token::Keyword(kw));
			out.push(Token::Identifier(name.into()));
			out.push(Token::Punct(';'));
		},
		Keyword::Return => {
			reader.sweep();
			out.push(Token::Keyword(kw));
			if reader.peek() != Some(';') {
				let expr = reader.advance_while(|c| c != ';').to_string();
				out.push(Token::Paren(Composite::new(format!("({expr})"), Some(ParenRole::Expr))));
			}
			reader.consume_literal(";");
			out.push(Token::Punct(';'));
		},
		Keyword::Case => {
			reader.sweep();
			let expr = reader.advance_while(|c| c != ':').to_string();
			reader.consume_literal(":");
			out.push(Token::Keyword(kw));
			out.push(Token::Paren(Composite::new(format!("({expr})"), Some(ParenRole::Expr))));
			out.push(Token::Punct(':'));
		},
		Keyword::Default => {
			reader.sweep();
			reader.consume_literal(":");
			out.push(Token::Keyword(kw));
			out.push(Token::Punct(':'));
		},
		Keyword::Var => tokenize_var_chain(reader, out),
		Keyword::Label => {
			reader.sweep();
			let name = reader.advance_while(|c| c.is_alphanumeric() || c == '_').to_string();
			reader.sweep();
			reader.consume_literal(";");
			out.push(Token::Keyword(kw));
			out.push(Token::Identifier(name.into()));
			out.push(Token::Punct(':'));
		},
		Keyword::Call | Keyword::Function | Keyword::Set => unreachable!("synthesised only, never scanned directly"),
	}
}

/// `var a [= expr] (, b [= expr])* ;` — each comma-separated declarator becomes its own
/// `Var`/`Identifier`/optional-`=`-rvalue sequence, joined by synthetic semicolons (spec §4.2).
fn tokenize_var_chain(reader: &mut Reader<'_>, out: &mut Vec<Token>) {
	loop {
		reader.sweep();
		let name = reader.advance_while(|c| c.is_alphanumeric() || c == '_').to_string();
		out.push(Token::Keyword(Keyword::Var));
		out.push(Token::Identifier(name.into()));
		reader.sweep();
		if reader.consume_literal("=") {
			let rvalue = reader.advance_while(|c| c != ',' && c != ';').to_string();
			out.push(Token::Operator("=".into()));
			out.push(Token::Paren(Composite::new(format!("({rvalue})"), Some(ParenRole::Expr))));
		}
		out.push(Token::Punct(';'));
		reader.sweep();
		if reader.consume_literal(",") {
			continue;
		}
		reader.consume_literal(";");
		break;
	}
}

/// `name [bracket]? (=|+=|-=|...|++|--) [rvalue]? (, ...)* ;` (spec §4.2).
fn tokenize_set_chain(reader: &mut Reader<'_>, out: &mut Vec<Token>, first_name: &str) {
	let mut name = first_name.to_string();
	loop {
		out.push(Token::Keyword(Keyword::Set));
		out.push(Token::Identifier(name.clone().into()));
		reader.sweep();
		if reader.peek() == Some('[') {
			let bracket = reader.consume_block('[', ']').unwrap();
			out.push(Token::Bracket(Composite::new(bracket, None)));
			reader.sweep();
		}

		let op = scan_assignment_operator(reader);
		out.push(Token::Operator(op.clone().into()));
		if op != "++" && op != "--" {
			let rvalue = reader.advance_while(|c| c != ',' && c != ';').to_string();
			out.push(Token::Paren(Composite::new(format!("({rvalue})"), Some(ParenRole::Expr))));
		}
		out.push(Token::Punct(';'));

		reader.sweep();
		if reader.consume_literal(",") {
			reader.sweep();
			name = reader.advance_while(|c| c.is_alphanumeric() || c == '_').to_string();
			continue;
		}
		reader.consume_literal(";");
		break;
	}
}

fn scan_assignment_operator(reader: &mut Reader<'_>) -> std::string::String {
	for op in ["+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "<<=", ">>=", "++", "--", "="] {
		if reader.consume_literal(op) {
			return op.to_string();
		}
	}
	std::string::String::new()
}

fn scan_operator(reader: &mut Reader<'_>) -> SmolStr {
	for op in MULTI_OPS {
		if reader.consume_literal(op) {
			return (*op).into();
		}
	}
	let c = reader.advance().unwrap();
	c.to_string().into()
}

fn scan_number(reader: &mut Reader<'_>) -> i64 {
	if reader.starts_with("0x") || reader.starts_with("0X") {
		reader.pos += 2;
		let digits = reader.advance_while(char::is_ascii_hexdigit);
		return i64::from_str_radix(digits, 16).unwrap_or(0);
	}
	if reader.starts_with("0b") || reader.starts_with("0B") {
		reader.pos += 2;
		let digits = reader.advance_while(|c| c == '0' || c == '1');
		return i64::from_str_radix(digits, 2).unwrap_or(0);
	}
	let digits = reader.advance_while(|c| c.is_ascii_digit());
	digits.parse().unwrap_or(0)
}

fn scan_quoted(reader: &mut Reader<'_>, quote: char) -> SmolStr {
	reader.advance(); // opening quote
	let mut out = std::string::String::new();
	loop {
		match reader.peek() {
			None => break,
			Some(c) if c == quote => {
				reader.advance();
				break;
			},
			Some('\\') => {
				reader.advance();
				if let Some(escaped) = reader.advance() {
					out.push(match escaped {
						'n' => '\n',
						't' => '\t',
						'0' => '\0',
						other => other,
					});
				}
			},
			Some(c) => {
				reader.advance();
				out.push(c);
			},
		}
	}
	out.into()
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn tokenizes_call_statement() {
		let tokens = Tokenizer::tokenize_statements("echo(\"hi\");");
		assert!(matches!(tokens[0], Token::Keyword(Keyword::Call)));
		assert!(matches!(&tokens[1], Token::Identifier(n) if n == "echo"));
		assert!(matches!(tokens[2], Token::Paren(_)));
	}

	#[test]
	fn tokenizes_function_declaration() {
		let tokens = Tokenizer::tokenize_statements("f(x) { return x; }");
		assert!(matches!(tokens[0], Token::Keyword(Keyword::Function)));
	}

	#[test]
	fn retags_unary_minus() {
		let tokens = Tokenizer::tokenize_expr("-1 + 2");
		assert!(matches!(&tokens[0], Token::Operator(o) if o == "@-"));
	}

	#[test]
	fn hex_and_binary_literals() {
		let tokens = Tokenizer::tokenize_expr("0xff + 0b101");
		assert!(matches!(tokens[0], Token::Number(255)));
		assert!(matches!(tokens[2], Token::Number(5)));
	}
}
