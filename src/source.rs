//! Shared source-text handle used for diagnostics across every pipeline stage.

use std::fmt;
use std::sync::Arc;

use miette::SourceSpan;

/// The text of one input file, named for diagnostic rendering.
///
/// Cloning is cheap: both fields are reference-counted.
#[derive(Clone)]
pub struct SourceCode {
	pub name: Arc<str>,
	pub text: Arc<str>,
}

impl SourceCode {
	#[must_use]
	pub fn new(name: impl Into<Arc<str>>, text: impl Into<Arc<str>>) -> Self {
		Self { name: name.into(), text: text.into() }
	}

	/// Builds a [`miette::NamedSource`] snapshot suitable for attaching to a diagnostic.
	#[must_use]
	pub fn named_source(&self) -> miette::NamedSource<Arc<str>> {
		miette::NamedSource::new(&*self.name, Arc::clone(&self.text))
	}

	/// Computes the 1-based line and column for a byte offset, used when a diagnostic wants to
	/// print a human-readable position rather than only a span.
	#[must_use]
	pub fn line_col(&self, offset: usize) -> (usize, usize) {
		let mut line = 1;
		let mut col = 1;
		for ch in self.text[.. offset.min(self.text.len())].chars() {
			if ch == '\n' {
				line += 1;
				col = 1;
			} else {
				col += 1;
			}
		}
		(line, col)
	}

	/// Returns a context window of at most `width` characters centered on `offset`, used for the
	/// plain-text error channel described in the external interface section of the spec.
	#[must_use]
	pub fn context_window(&self, offset: usize, width: usize) -> String {
		let half = width / 2;
		let start = offset.saturating_sub(half);
		let end = (offset + half).min(self.text.len());
		let start = floor_char_boundary(&self.text, start);
		let end = ceil_char_boundary(&self.text, end);
		self.text[start .. end].to_string()
	}

	#[must_use]
	pub fn span(&self, offset: usize, len: usize) -> SourceSpan {
		SourceSpan::new(offset.into(), len)
	}
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
	while index > 0 && !s.is_char_boundary(index) {
		index -= 1;
	}
	index
}

fn ceil_char_boundary(s: &str, mut index: usize) -> usize {
	while index < s.len() && !s.is_char_boundary(index) {
		index += 1;
	}
	index
}

impl fmt::Debug for SourceCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SourceCode").field("name", &self.name).field("len", &self.text.len()).finish()
	}
}
