//! A cursor over an already-tokenized statement stream, consumed by the statement parser
//! (spec §4.3). Supports speculative lookahead via cheap `fork`/`commit`.

use super::{Keyword, Token};

pub struct TokenWalker<'a> {
	tokens: &'a [Token],
	pub pos: usize,
}

impl<'a> TokenWalker<'a> {
	#[must_use]
	pub fn new(tokens: &'a [Token]) -> Self {
		Self { tokens, pos: 0 }
	}

	#[must_use]
	pub fn has_next(&self) -> bool {
		self.pos < self.tokens.len()
	}

	#[must_use]
	pub fn peek(&self) -> Option<&'a Token> {
		self.tokens.get(self.pos)
	}

	#[must_use]
	pub fn peek_at(&self, offset: usize) -> Option<&'a Token> {
		self.tokens.get(self.pos + offset)
	}

	pub fn next(&mut self) -> Option<&'a Token> {
		let t = self.tokens.get(self.pos)?;
		self.pos += 1;
		Some(t)
	}

	#[must_use]
	pub fn peek_keyword(&self) -> Option<Keyword> {
		match self.peek() {
			Some(Token::Keyword(k)) => Some(*k),
			_ => None,
		}
	}

	pub fn consume_keyword(&mut self, kw: Keyword) -> bool {
		if self.peek_keyword() == Some(kw) {
			self.pos += 1;
			true
		} else {
			false
		}
	}

	pub fn consume_punct(&mut self, p: char) -> bool {
		if matches!(self.peek(), Some(Token::Punct(c)) if *c == p) {
			self.pos += 1;
			true
		} else {
			false
		}
	}

	pub fn consume_identifier(&mut self) -> Option<&'a str> {
		match self.peek() {
			Some(Token::Identifier(s)) => {
				self.pos += 1;
				Some(s)
			},
			_ => None,
		}
	}

	/// Cheap speculative checkpoint; clone the returned position and restore with [`Self::reset`].
	#[must_use]
	pub fn fork(&self) -> usize {
		self.pos
	}

	pub fn reset(&mut self, checkpoint: usize) {
		self.pos = checkpoint;
	}
}
