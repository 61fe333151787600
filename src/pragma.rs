//! The pragma bundle that parameterizes preprocessing and lowering (spec §6).

use smartstring::alias::String;

/// One pragma value: a pragma is either a bare integer, a string, or a boolean flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PragmaValue {
	Int(i64),
	Str(String),
	Bool(bool),
}

impl std::fmt::Display for PragmaValue {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Int(i) => write!(f, "{i}"),
			Self::Str(s) => write!(f, "{s}"),
			Self::Bool(b) => write!(f, "{b}"),
		}
	}
}

/// Indentation style for the renderers (`indent` pragma).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Indent {
	Tabs,
	Spaces,
	Literal(String),
}

impl Indent {
	#[must_use]
	pub fn as_str(&self) -> &str {
		match self {
			Self::Tabs => "\t",
			Self::Spaces => "    ",
			Self::Literal(s) => s,
		}
	}
}

/// Which renderer to drive at the end of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererKind {
	Debug,
	Simple,
	Asm,
}

/// The full, defaulted configuration bundle the lowering engine and renderers read.
///
/// Defaults are transcribed verbatim from spec §6.
#[derive(Debug, Clone)]
pub struct Pragmas {
	pub safe_stack: bool,
	pub stack_start: i64,
	pub stack_end: i64,
	pub keep_names: bool,
	pub fullspeed: bool,
	pub show_trace: bool,
	pub builtin_logging: bool,
	pub builtin_error_logging: bool,
	pub inline_one_use_functions: bool,
	pub remove_dead_code: bool,
	pub simplify_ifs: bool,
	pub simplify_expressions: bool,
	pub push_pop_trampolines: bool,
	pub push_pop_trampoline_limit: i64,
	pub comments: bool,
	pub indent: Indent,
	pub name: String,
	pub author: String,
	pub version: String,
	pub renderer: RendererKind,
	/// Extra pragmas set by `#pragma` or `-p` that have no dedicated field above; each is also
	/// exposed as a constant macro `__NAME__` (spec §3, §4.1).
	pub extra: Vec<(String, PragmaValue)>,
}

impl Default for Pragmas {
	fn default() -> Self {
		let safe_stack = true;
		Self {
			safe_stack,
			stack_start: 300,
			stack_end: 511,
			keep_names: false,
			fullspeed: true,
			show_trace: false,
			builtin_logging: true,
			builtin_error_logging: true,
			inline_one_use_functions: true,
			remove_dead_code: true,
			simplify_ifs: true,
			simplify_expressions: true,
			push_pop_trampolines: false,
			push_pop_trampoline_limit: if safe_stack { 2 } else { 3 },
			comments: true,
			indent: Indent::Tabs,
			name: "program".into(),
			author: String::new(),
			version: "0.0.0".into(),
			renderer: RendererKind::Asm,
			extra: Vec::new(),
		}
	}
}

impl Pragmas {
	/// Stores a `#pragma NAME VALUE` or `-p NAME VALUE` override, routing well-known names to
	/// their dedicated field and reporting whether this redefines an existing value differently
	/// (the caller turns that into a [`crate::error::DirectiveError::PragmaConflict`] warning).
	pub fn set(&mut self, name: &str, value: &str) -> Option<(String, String)> {
		let parsed_bool = || match value {
			"true" | "1" => Some(true),
			"false" | "0" => Some(false),
			_ => None,
		};
		let parsed_int = || value.parse::<i64>().ok();

		macro_rules! conflict {
			($old:expr) => {{
				let old = $old.to_string();
				if old != value {
					Some((old.into(), value.into()))
				} else {
					None
				}
			}};
		}

		match name {
			"safe_stack" => {
				let old = self.safe_stack;
				if let Some(b) = parsed_bool() {
					self.safe_stack = b;
				}
				conflict!(old)
			},
			"stack_start" => {
				let old = self.stack_start;
				if let Some(i) = parsed_int() {
					self.stack_start = i;
				}
				conflict!(old)
			},
			"stack_end" => {
				let old = self.stack_end;
				if let Some(i) = parsed_int() {
					self.stack_end = i;
				}
				conflict!(old)
			},
			"keep_names" => {
				let old = self.keep_names;
				if let Some(b) = parsed_bool() {
					self.keep_names = b;
				}
				conflict!(old)
			},
			"fullspeed" => {
				let old = self.fullspeed;
				if let Some(b) = parsed_bool() {
					self.fullspeed = b;
				}
				conflict!(old)
			},
			"show_trace" => {
				let old = self.show_trace;
				if let Some(b) = parsed_bool() {
					self.show_trace = b;
				}
				conflict!(old)
			},
			"builtin_logging" => {
				let old = self.builtin_logging;
				if let Some(b) = parsed_bool() {
					self.builtin_logging = b;
				}
				conflict!(old)
			},
			"builtin_error_logging" => {
				let old = self.builtin_error_logging;
				if let Some(b) = parsed_bool() {
					self.builtin_error_logging = b;
				}
				conflict!(old)
			},
			"inline_one_use_functions" => {
				let old = self.inline_one_use_functions;
				if let Some(b) = parsed_bool() {
					self.inline_one_use_functions = b;
				}
				conflict!(old)
			},
			"remove_dead_code" => {
				let old = self.remove_dead_code;
				if let Some(b) = parsed_bool() {
					self.remove_dead_code = b;
				}
				conflict!(old)
			},
			"simplify_ifs" => {
				let old = self.simplify_ifs;
				if let Some(b) = parsed_bool() {
					self.simplify_ifs = b;
				}
				conflict!(old)
			},
			"simplify_expressions" => {
				let old = self.simplify_expressions;
				if let Some(b) = parsed_bool() {
					self.simplify_expressions = b;
				}
				conflict!(old)
			},
			"push_pop_trampolines" => {
				let old = self.push_pop_trampolines;
				if let Some(b) = parsed_bool() {
					self.push_pop_trampolines = b;
				}
				conflict!(old)
			},
			"push_pop_trampoline_limit" => {
				let old = self.push_pop_trampoline_limit;
				if let Some(i) = parsed_int() {
					self.push_pop_trampoline_limit = i;
				}
				conflict!(old)
			},
			"comments" => {
				let old = self.comments;
				if let Some(b) = parsed_bool() {
					self.comments = b;
				}
				conflict!(old)
			},
			"indent" => {
				let old = self.indent.as_str().to_string();
				self.indent = match value {
					"tabs" => Indent::Tabs,
					"spaces" => Indent::Spaces,
					literal => Indent::Literal(literal.into()),
				};
				conflict!(old)
			},
			"name" => {
				let old = self.name.clone();
				self.name = value.into();
				conflict!(old)
			},
			"author" => {
				let old = self.author.clone();
				self.author = value.into();
				conflict!(old)
			},
			"version" => {
				let old = self.version.clone();
				self.version = value.into();
				conflict!(old)
			},
			"renderer" => {
				let old = match self.renderer {
					RendererKind::Debug => "debug",
					RendererKind::Simple => "simple",
					RendererKind::Asm => "asm",
				}
				.to_string();
				self.renderer = match value {
					"debug" => RendererKind::Debug,
					"simple" => RendererKind::Simple,
					_ => RendererKind::Asm,
				};
				conflict!(old)
			},
			_ => {
				let parsed = if let Some(b) = parsed_bool() {
					PragmaValue::Bool(b)
				} else if let Some(i) = parsed_int() {
					PragmaValue::Int(i)
				} else {
					PragmaValue::Str(value.into())
				};
				if let Some(existing) = self.extra.iter_mut().find(|(n, _)| n == name) {
					let old = existing.1.to_string();
					let conflict = if old != value { Some((old.into(), value.into())) } else { None };
					existing.1 = parsed;
					conflict
				} else {
					self.extra.push((name.into(), parsed));
					None
				}
			},
		}
	}

	/// Produces the `__NAME__` constant-macro exposure for every stored pragma (spec §3).
	#[must_use]
	pub fn as_constant_macros(&self) -> Vec<(String, String)> {
		let mut out = vec![
			(format!("__{}__", "safe_stack".to_uppercase()).into(), i64::from(self.safe_stack).to_string().into()),
			(format!("__{}__", "stack_start".to_uppercase()).into(), self.stack_start.to_string().into()),
			(format!("__{}__", "stack_end".to_uppercase()).into(), self.stack_end.to_string().into()),
			(format!("__{}__", "name".to_uppercase()).into(), self.name.clone()),
			(format!("__{}__", "author".to_uppercase()).into(), self.author.clone()),
			(format!("__{}__", "version".to_uppercase()).into(), self.version.clone()),
		];
		for (name, value) in &self.extra {
			out.push((format!("__{}__", name.to_uppercase()).into(), value.to_string().into()));
		}
		out
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn defaults_match_spec() {
		let p = Pragmas::default();
		assert!(p.safe_stack);
		assert_eq!(p.stack_start, 300);
		assert_eq!(p.stack_end, 511);
		assert!(!p.keep_names);
		assert_eq!(p.push_pop_trampoline_limit, 2);
	}

	#[test]
	fn set_reports_conflict() {
		let mut p = Pragmas::default();
		assert!(p.set("name", "foo").is_none());
		let conflict = p.set("name", "bar");
		assert_eq!(conflict, Some(("foo".into(), "bar".into())));
	}
}
