//! The directive layer's main driver: `#`-directive recognition, conditional inclusion,
//! `#include` resolution, and iterative macro expansion (spec §4.1).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use smartstring::alias::String as SmolStr;

use super::eval::eval_expr;
use super::macros::{BodyFragment, Macro, MacroKind, MacroTable};
use super::reader::Reader;
use crate::error::DirectiveError;
use crate::source::SourceCode;

/// One `#pragma NAME VALUE` captured during processing, forwarded to the lowering engine's
/// pragma bundle (spec §3: pragmas are "also exposed as constant macros").
#[derive(Debug, Clone)]
pub struct CapturedPragma {
	pub name: SmolStr,
	pub value: SmolStr,
}

/// Frame of the conditional-inclusion stack; tracks enough state to evaluate `#else` without
/// a second evaluation of the `#if` condition (spec §4.1 "Branch skipping").
struct CondFrame {
	parent_active: bool,
	active: bool,
	/// Whether the `#if`/`#ifdef`/`#ifndef` branch (not yet its `#else`) was ever taken, so a
	/// later `#else` knows whether to flip.
	branch_taken: bool,
	saw_else: bool,
}

/// Drives `#`-directive processing over a source tree, honouring include-once and recursion
/// limits, and exposes the iterative macro-expansion pass (spec §4.1).
pub struct DirectiveProcessor {
	pub macros: Arc<RwLock<MacroTable>>,
	pragmas_seen: Vec<CapturedPragma>,
	include_once: HashSet<PathBuf>,
	include_stack: Vec<PathBuf>,
	pub warnings: Vec<String>,
	working_dir: PathBuf,
}

const MAX_INCLUDE_DEPTH: usize = 15;
const MAX_MACRO_EXPANSION_DEPTH: usize = 10;

impl DirectiveProcessor {
	#[must_use]
	pub fn new(working_dir: PathBuf) -> Self {
		Self {
			macros: Arc::new(RwLock::new(MacroTable::new())),
			pragmas_seen: Vec::new(),
			include_once: HashSet::new(),
			include_stack: Vec::new(),
			warnings: Vec::new(),
			working_dir,
		}
	}

	#[must_use]
	pub fn pragmas(&self) -> &[CapturedPragma] {
		&self.pragmas_seen
	}

	/// Processes `source` (and everything it transitively `#include`s) into one macro-directive-
	/// free text (spec §4.1 `process()`).
	pub fn process(&mut self, source: &SourceCode) -> Result<std::string::String, Box<DirectiveError>> {
		let path = PathBuf::from(&*source.name);
		self.process_file(&path, source)
	}

	fn process_file(&mut self, path: &Path, source: &SourceCode) -> Result<std::string::String, Box<DirectiveError>> {
		if self.include_stack.len() >= MAX_INCLUDE_DEPTH {
			return Err(Box::new(DirectiveError::IncludeDepthExceeded {
				src: source.named_source(),
				location: source.span(0, 0),
			}));
		}
		self.include_stack.push(path.to_path_buf());
		let result = self.process_text(source);
		self.include_stack.pop();
		result
	}

	#[allow(clippy::too_many_lines)]
	fn process_text(&mut self, source: &SourceCode) -> Result<std::string::String, Box<DirectiveError>> {
		let mut reader = Reader::new(&source.text);
		let mut out = std::string::String::new();
		let mut cond_stack: Vec<CondFrame> = Vec::new();

		loop {
			if reader.is_eof() {
				break;
			}

			// Copy verbatim text up to the next directive line or EOF.
			let before = reader.pos;
			loop {
				if reader.is_eof() {
					break;
				}
				if self.at_line_start(&reader, before) && reader.line_starts_with_directive() {
					break;
				}
				reader.advance();
			}
			let verbatim = &source.text[before .. reader.pos];
			if cond_stack.last().is_none_or(|f| f.active) {
				out.push_str(verbatim);
			}
			if reader.is_eof() {
				break;
			}

			let active = cond_stack.last().is_none_or(|f| f.active);
			let directive_start = reader.pos;
			let line = self.consume_directive_line(&mut reader);
			let keyword = directive_keyword(&line);

			match keyword {
				"if" | "ifdef" | "ifndef" => {
					let parent_active = active;
					let taken = if parent_active { self.eval_conditional(keyword, &line, source, directive_start)? } else { false };
					cond_stack.push(CondFrame { parent_active, active: taken, branch_taken: taken, saw_else: false });
				},
				"else" => {
					let Some(frame) = cond_stack.last_mut() else {
						return Err(Box::new(DirectiveError::UnmatchedConditional {
							src: source.named_source(),
							location: source.span(directive_start, line.len()),
						}));
					};
					if frame.saw_else {
						return Err(Box::new(DirectiveError::UnmatchedConditional {
							src: source.named_source(),
							location: source.span(directive_start, line.len()),
						}));
					}
					frame.saw_else = true;
					frame.active = frame.parent_active && !frame.branch_taken;
				},
				"endif" => {
					if cond_stack.pop().is_none() {
						return Err(Box::new(DirectiveError::UnmatchedConditional {
							src: source.named_source(),
							location: source.span(directive_start, line.len()),
						}));
					}
				},
				_ if !active => {
					// Inactive branch: skip everything except conditional-nesting bookkeeping,
					// which is already handled above for if/else/endif.
				},
				"define" => self.handle_define(&line),
				"include" => {
					let included = self.handle_include(&line, source, directive_start)?;
					out.push_str(&included);
				},
				"pragma" => self.handle_pragma(&line, source, directive_start)?,
				"warning" => {
					let msg = line.trim_start_matches("#warning").trim();
					self.warnings.push(msg.into());
				},
				"error" => {
					let msg = line.trim_start_matches("#error").trim().to_string();
					return Err(Box::new(DirectiveError::ExplicitError {
						message: msg,
						src: source.named_source(),
						location: source.span(directive_start, line.len()),
					}));
				},
				_ => {
					return Err(Box::new(DirectiveError::MalformedDirective {
						directive: keyword.to_string(),
						reason: "unrecognised directive".to_string(),
						src: source.named_source(),
						location: source.span(directive_start, line.len()),
					}));
				},
			}
		}

		if !cond_stack.is_empty() {
			return Err(Box::new(DirectiveError::UnterminatedIf {
				src: source.named_source(),
				location: source.span(source.text.len(), 0),
			}));
		}

		Ok(out)
	}

	fn at_line_start(&self, reader: &Reader<'_>, scan_start: usize) -> bool {
		reader.pos == scan_start || reader.text()[.. reader.pos].ends_with('\n')
	}

	/// Consumes one logical directive line, honouring backslash-newline continuation.
	fn consume_directive_line(&self, reader: &mut Reader<'_>) -> std::string::String {
		let mut line = std::string::String::new();
		loop {
			let text = reader.advance_while(|c| c != '\n');
			line.push_str(text);
			if line.ends_with('\\') {
				line.pop();
				reader.advance(); // the newline
				line.push('\n');
			} else {
				reader.advance(); // the newline, if any
				break;
			}
		}
		line
	}

	fn eval_conditional(
		&mut self,
		keyword: &str,
		line: &str,
		source: &SourceCode,
		offset: usize,
	) -> Result<bool, Box<DirectiveError>> {
		let rest = line.splitn(2, char::is_whitespace).nth(1).unwrap_or("").trim();
		let table = self.macros.read();
		match keyword {
			"ifdef" => {
				if table.is_non_constant_macro(rest) {
					drop(table);
					self.warnings.push(format!("'{rest}' is not a constant macro; #ifdef treated as false").into());
					return Ok(false);
				}
				match table.is_truthy_constant(rest) {
					Some(truthy) => {
						if !truthy {
							drop(table);
							self.warnings.push(format!("'{rest}' is defined with body \"0\"").into());
						}
						Ok(true)
					},
					None => Ok(false),
				}
			},
			"ifndef" => {
				if table.is_non_constant_macro(rest) {
					drop(table);
					self.warnings.push(format!("'{rest}' is not a constant macro; #ifndef treated as true").into());
					return Ok(true);
				}
				Ok(table.is_truthy_constant(rest).is_none())
			},
			_ => {
				let substituted = self.substitute_defined(rest, &table);
				drop(table);
				let expanded = self.apply_macros(&substituted)?;
				match eval_expr(expanded.trim()) {
					Some(v) => Ok(v != 0),
					None => Err(Box::new(DirectiveError::MalformedDirective {
						directive: "if".to_string(),
						reason: format!("could not evaluate constant expression '{expanded}'"),
						src: source.named_source(),
						location: source.span(offset, line.len()),
					})),
				}
			},
		}
	}

	/// Replaces every `defined(X)` with `1`/`0` before full macro expansion/evaluation (spec §4.1).
	fn substitute_defined(&self, text: &str, table: &MacroTable) -> std::string::String {
		let mut out = std::string::String::new();
		let mut reader = Reader::new(text);
		loop {
			if reader.is_eof() {
				break;
			}
			if reader.consume_literal("defined") {
				reader.sweep();
				let has_paren = reader.consume_literal("(");
				reader.sweep();
				let name = reader.advance_while(|c| c.is_alphanumeric() || c == '_');
				reader.sweep();
				if has_paren {
					reader.consume_literal(")");
				}
				out.push(if table.is_defined(name) { '1' } else { '0' });
			} else {
				let c = reader.advance().unwrap();
				out.push(c);
			}
		}
		out
	}

	fn handle_define(&mut self, line: &str) {
		let rest = line.trim_start_matches("#define").trim_start();
		if let Some(m) = parse_macro_definition(rest) {
			self.macros.write().define(m);
		}
	}

	fn handle_include(
		&mut self,
		line: &str,
		source: &SourceCode,
		offset: usize,
	) -> Result<std::string::String, Box<DirectiveError>> {
		let rest = line.trim_start_matches("#include").trim();
		let filename = rest.trim_matches(|c| c == '"' || c == '<' || c == '>').to_string();

		let including_dir =
			PathBuf::from(&*source.name).parent().map(Path::to_path_buf).unwrap_or_else(|| self.working_dir.clone());
		let candidates = [including_dir.join(&filename), self.working_dir.join(&filename)];
		let resolved = candidates.iter().find(|p| p.exists()).cloned();

		let Some(resolved) = resolved else {
			return Err(Box::new(DirectiveError::IncludeNotFound {
				file: filename,
				src: source.named_source(),
				location: source.span(offset, line.len()),
			}));
		};
		let canonical = resolved.canonicalize().unwrap_or(resolved.clone());

		if self.include_stack.contains(&canonical) {
			return Err(Box::new(DirectiveError::IncludeCycle {
				file: filename,
				src: source.named_source(),
				location: source.span(offset, line.len()),
			}));
		}
		if self.include_once.contains(&canonical) {
			return Ok(std::string::String::new());
		}

		let text = std::fs::read_to_string(&resolved).map_err(|e| {
			Box::new(DirectiveError::IncludeNotFound {
				file: format!("{filename} ({e})"),
				src: source.named_source(),
				location: source.span(offset, line.len()),
			})
		})?;
		let included_source = SourceCode::new(resolved.to_string_lossy().to_string(), text);
		let was_once = self.process_once_flag_after(&canonical);
		let result = self.process_file(&canonical, &included_source);
		if was_once {
			self.include_once.insert(canonical);
		}
		result
	}

	/// `#pragma once` is detected lazily: the included file's own body is scanned for the
	/// directive as part of `process_file`, so here we just pre-register interest; the real
	/// bookkeeping happens because `handle_pragma` inserts into `include_once` directly when the
	/// current file-under-processing issues `#pragma once`. This helper exists only so
	/// `process_file` callers can tell whether to persist the once-marker after a successful
	/// parse (always true in practice, kept for symmetry with the teacher's two-step include flow).
	fn process_once_flag_after(&self, _canonical: &Path) -> bool {
		true
	}

	fn handle_pragma(
		&mut self,
		line: &str,
		source: &SourceCode,
		offset: usize,
	) -> Result<(), Box<DirectiveError>> {
		let rest = line.trim_start_matches("#pragma").trim();
		if rest == "once" {
			if let Some(current) = self.include_stack.last() {
				let canonical = current.canonicalize().unwrap_or_else(|_| current.clone());
				self.include_once.insert(canonical);
			}
			return Ok(());
		}
		let mut parts = rest.splitn(2, char::is_whitespace);
		let name = parts.next().unwrap_or("").to_string();
		let value = parts.next().unwrap_or("").trim().to_string();
		if name.is_empty() {
			return Ok(());
		}

		if let Some(existing) = self.pragmas_seen.iter_mut().find(|p| p.name == name) {
			if existing.value != value {
				self.warnings.push(
					format!("pragma '{name}' redefined with a conflicting value ('{0}' -> '{value}')", existing.value)
						.into(),
				);
			}
			existing.value = value.clone().into();
		} else {
			self.pragmas_seen.push(CapturedPragma { name: name.clone().into(), value: value.clone().into() });
		}

		self.macros.write().define(Macro {
			name: format!("__{}__", name.to_uppercase()).into(),
			kind: MacroKind::Constant,
			params: vec![],
			variadic: false,
			body: vec![BodyFragment::Literal(value.into())],
		});
		let _ = source;
		let _ = offset;
		Ok(())
	}

	/// Iteratively expands identifiers against the macro table until a pass performs zero
	/// substitutions or the recursion depth limit is hit (spec §4.1 `apply_macros()`).
	pub fn apply_macros(&self, text: &str) -> Result<std::string::String, Box<DirectiveError>> {
		let table = self.macros.read();
		let mut current = text.to_string();
		for _ in 0 .. MAX_MACRO_EXPANSION_DEPTH {
			let (next, count) = expand_one_pass(&current, &table);
			current = next;
			if count == 0 {
				return Ok(current);
			}
		}
		Err(Box::new(DirectiveError::MacroExpansionDidNotConverge {
			src: SourceCode::new("<macro-expansion>", current.clone()).named_source(),
			location: miette::SourceSpan::new(0.into(), 0),
		}))
	}
}

fn directive_keyword(line: &str) -> &str {
	let trimmed = line.trim_start().trim_start_matches('#');
	trimmed.split(|c: char| c.is_whitespace() || c == '(' || c == '[').next().unwrap_or("")
}

/// Parses one `#define` body (the part after `#define `) into a [`Macro`].
fn parse_macro_definition(rest: &str) -> Option<Macro> {
	let mut reader = Reader::new(rest);
	let name: std::string::String = reader.advance_while(|c| c.is_alphanumeric() || c == '_').to_string();
	if name.is_empty() {
		return None;
	}

	let (kind, params, variadic) = if reader.peek() == Some('(') {
		let block = reader.consume_block('(', ')')?;
		let inner = &block[1 .. block.len() - 1];
		let mut params: Vec<SmolStr> = Vec::new();
		let mut variadic = false;
		for raw in split_top_level(inner, ',') {
			let p = raw.trim();
			if p.is_empty() {
				continue;
			}
			if p == "..." || p.ends_with("...") {
				variadic = true;
				params.push(p.trim_end_matches("...").trim().into());
			} else {
				params.push(p.into());
			}
		}
		(MacroKind::FunctionLike, params, variadic)
	} else if reader.peek() == Some('[') {
		let block = reader.consume_block('[', ']')?;
		let inner = block[1 .. block.len() - 1].trim();
		(MacroKind::ArrayLike, if inner.is_empty() { vec![] } else { vec![inner.into()] }, false)
	} else {
		(MacroKind::Constant, vec![], false)
	};

	reader.sweep();
	let body_text = reader.rest().trim();
	let body = parse_macro_body(body_text, &params);

	Some(Macro { name: name.into(), kind, params, variadic, body })
}

/// Splits `text` on `sep` at bracket/paren/brace/string nesting depth zero.
fn split_top_level(text: &str, sep: char) -> Vec<std::string::String> {
	let mut parts = Vec::new();
	let mut depth = 0i32;
	let mut current = std::string::String::new();
	let mut chars = text.chars().peekable();
	while let Some(c) = chars.next() {
		match c {
			'(' | '[' | '{' => {
				depth += 1;
				current.push(c);
			},
			')' | ']' | '}' => {
				depth -= 1;
				current.push(c);
			},
			c if c == sep && depth == 0 => {
				parts.push(std::mem::take(&mut current));
			},
			_ => current.push(c),
		}
	}
	if !current.is_empty() || !parts.is_empty() {
		parts.push(current);
	}
	parts
}

/// Breaks a macro body into literal/parameter/variadic-paste fragments (spec §4.1, §3).
fn parse_macro_body(body: &str, params: &[SmolStr]) -> Vec<BodyFragment> {
	let mut fragments = Vec::new();
	let mut literal = std::string::String::new();
	let mut reader = Reader::new(body);

	loop {
		if reader.is_eof() {
			break;
		}
		if reader.starts_with(", ##") {
			reader.pos += 4;
			reader.sweep();
			reader.advance_while(|c| c.is_alphanumeric() || c == '_');
			if !literal.is_empty() {
				fragments.push(BodyFragment::Literal(std::mem::take(&mut literal).into()));
			}
			fragments.push(BodyFragment::VariadicPaste);
			continue;
		}
		let c = reader.peek().unwrap();
		if c.is_alphabetic() || c == '_' {
			let ident = reader.advance_while(|c| c.is_alphanumeric() || c == '_');
			if let Some(index) = params.iter().position(|p| p == ident) {
				if !literal.is_empty() {
					fragments.push(BodyFragment::Literal(std::mem::take(&mut literal).into()));
				}
				fragments.push(BodyFragment::Param(index));
			} else {
				literal.push_str(ident);
			}
		} else {
			literal.push(reader.advance().unwrap());
		}
	}
	if !literal.is_empty() {
		fragments.push(BodyFragment::Literal(literal.into()));
	}
	fragments
}

/// Runs one left-to-right substitution pass over `text`, expanding constant, function-like, and
/// array-like macro invocations. Returns the new text and how many substitutions were made.
fn expand_one_pass(text: &str, table: &MacroTable) -> (std::string::String, usize) {
	let mut out = std::string::String::new();
	let mut reader = Reader::new(text);
	let mut count = 0usize;

	loop {
		if reader.is_eof() {
			break;
		}
		let c = reader.peek().unwrap();
		if c.is_alphabetic() || c == '_' {
			let start = reader.pos;
			let ident = reader.advance_while(|c| c.is_alphanumeric() || c == '_');
			let ident = ident.to_string();
			let save = reader.pos;
			reader.sweep();

			if reader.peek() == Some('(') {
				if let Some(block) = reader.consume_block('(', ')') {
					let inner = &block[1 .. block.len() - 1];
					let args: Vec<SmolStr> = split_top_level(inner, ',').into_iter().map(|s| s.trim().into()).collect();
					let arg_count = if inner.trim().is_empty() { 0 } else { args.len() };
					if let Some(m) = table.resolve(&ident, MacroKind::FunctionLike, arg_count) {
						out.push_str(&m.expand(&args));
						count += 1;
						continue;
					}
				}
				reader.pos = save;
			} else if reader.peek() == Some('[') {
				if let Some(block) = reader.consume_block('[', ']') {
					let inner = block[1 .. block.len() - 1].trim().to_string();
					if let Some(m) = table.resolve(&ident, MacroKind::ArrayLike, 1) {
						out.push_str(&m.expand(std::slice::from_ref(&SmolStr::from(inner))));
						count += 1;
						continue;
					}
				}
				reader.pos = save;
			}

			if let Some(m) = table.resolve(&ident, MacroKind::Constant, 0) {
				out.push_str(&m.expand(&[]));
				count += 1;
			} else {
				out.push_str(&text[start .. save]);
				reader.pos = save;
			}
			continue;
		}
		out.push(reader.advance().unwrap());
	}
	(out, count)
}

#[cfg(test)]
mod test {
	use super::*;

	fn process(src: &str) -> std::string::String {
		let source = SourceCode::new("test.c", src);
		let mut proc = DirectiveProcessor::new(PathBuf::from("."));
		let resolved = proc.process(&source).unwrap();
		proc.apply_macros(&resolved).unwrap()
	}

	#[test]
	fn directive_free_source_is_unchanged() {
		let src = "main() { echo(\"hi\"); }";
		assert_eq!(process(src), src);
	}

	#[test]
	fn macro_hygiene_expands_exactly_once() {
		let src = "#define M(x) x + x\nmain() { y = M(2+3); }";
		let out = process(src);
		assert!(out.contains("2+3 + 2+3"));
	}

	#[test]
	fn variadic_pasting() {
		let src = "#define L(fmt, ...) log(fmt, ## __VA_ARGS__)\nmain() { L(\"hi\"); L(\"%d\", n); }";
		let out = process(src);
		assert!(out.contains("log(\"hi\")"));
		assert!(out.contains("log(\"%d\", n)"));
	}

	#[test]
	fn conditional_inclusion() {
		let src = "#define FOO 1\n#if FOO\nA();\n#else\nB();\n#endif\n";
		let out = process(src);
		assert!(out.contains("A();"));
		assert!(!out.contains("B();"));
	}

	#[test]
	fn ifdef_false_branch_skipped() {
		let src = "#ifdef NOPE\nA();\n#else\nB();\n#endif\n";
		let out = process(src);
		assert!(out.contains("B();"));
		assert!(!out.contains("A();"));
	}

	#[test]
	fn constant_folding_example_sq() {
		let src = "#define SQ(x) ((x)*(x))\nmain() { echo(SQ(2+3)); }";
		let out = process(src);
		assert!(out.contains("((2+3)*(2+3))"));
	}
}
