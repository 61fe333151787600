//! Macro definitions and the macro table (spec §3, §4.1).

use smartstring::alias::String;

/// What kind of macro a name is bound to; used together with arity and the variadic position to
/// decide overload-set equality (spec §3: "Equality of signatures").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroKind {
	Constant,
	FunctionLike,
	ArrayLike,
}

/// One fragment of a macro body: either literal text or a reference to the `n`th parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyFragment {
	Literal(String),
	Param(usize),
	/// The `, ## __VA_ARGS__` pasting marker: elided entirely when the variadic expansion is
	/// empty, otherwise expands to `, <variadic arguments>` (spec §4.1).
	VariadicPaste,
}

/// A single `#define`.
#[derive(Debug, Clone)]
pub struct Macro {
	pub name: String,
	pub kind: MacroKind,
	pub params: Vec<String>,
	pub variadic: bool,
	pub body: Vec<BodyFragment>,
}

impl Macro {
	#[must_use]
	pub fn arity(&self) -> usize {
		self.params.len()
	}

	/// Signature equality per spec §3: name, arity, kind, and variadic position together decide
	/// whether a new `#define` replaces this one or is added as another overload.
	#[must_use]
	pub fn same_signature(&self, other: &Macro) -> bool {
		self.name == other.name
			&& self.kind == other.kind
			&& self.arity() == other.arity()
			&& self.variadic == other.variadic
	}

	/// Substitutes `args` (already macro-expanded) into the body, honouring `, ## __VA_ARGS__`.
	#[must_use]
	pub fn expand(&self, args: &[String]) -> String {
		let mut out = String::new();
		let variadic_args: String = if self.variadic && args.len() >= self.params.len() {
			args[self.params.len() - 1 ..].join(", ").into()
		} else {
			String::new()
		};
		for fragment in &self.body {
			match fragment {
				BodyFragment::Literal(text) => out.push_str(text),
				BodyFragment::Param(index) => {
					if let Some(arg) = args.get(*index) {
						out.push_str(arg);
					}
				},
				BodyFragment::VariadicPaste =>
					if !variadic_args.is_empty() {
						out.push_str(", ");
						out.push_str(&variadic_args);
					},
			}
		}
		out
	}

	/// Renders the body back to a plain string, ignoring parameter placeholders; used when a
	/// constant macro's body is inspected by `#ifdef`/`#if` without argument substitution.
	#[must_use]
	pub fn raw_body(&self) -> String {
		let mut out = String::new();
		for fragment in &self.body {
			if let BodyFragment::Literal(text) = fragment {
				out.push_str(text);
			}
		}
		out
	}
}

/// Maps a macro name to its ordered overload set (spec §3). Insertion order is preserved for
/// reproducible expansion: on a signature match, the existing entry is replaced in place; a new
/// signature is appended.
#[derive(Debug, Clone, Default)]
pub struct MacroTable {
	entries: Vec<(String, Vec<Macro>)>,
}

impl MacroTable {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn define(&mut self, new_macro: Macro) {
		if let Some((_, overloads)) = self.entries.iter_mut().find(|(name, _)| *name == new_macro.name) {
			if let Some(existing) = overloads.iter_mut().find(|m| m.same_signature(&new_macro)) {
				*existing = new_macro;
			} else {
				overloads.push(new_macro);
			}
		} else {
			self.entries.push((new_macro.name.clone(), vec![new_macro]));
		}
	}

	#[must_use]
	pub fn is_defined(&self, name: &str) -> bool {
		self.entries.iter().any(|(n, _)| n == name)
	}

	#[must_use]
	pub fn overloads(&self, name: &str) -> Option<&[Macro]> {
		self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_slice())
	}

	/// Finds the first overload (declaration order) matching an invocation of the given kind and
	/// argument count (spec §4.1: "expansion picks the first matching signature").
	#[must_use]
	pub fn resolve(&self, name: &str, kind: MacroKind, arg_count: usize) -> Option<&Macro> {
		self.overloads(name)?.iter().find(|m| {
			m.kind == kind && (m.arity() == arg_count || (m.variadic && arg_count + 1 >= m.arity()))
		})
	}

	/// Whether `name` is bound as a *constant* macro with a body other than the literal `"0"` —
	/// the definition spec §4.1 gives for `#ifdef`/`#ifndef`.
	#[must_use]
	pub fn is_truthy_constant(&self, name: &str) -> Option<bool> {
		let overloads = self.overloads(name)?;
		let constant = overloads.iter().find(|m| m.kind == MacroKind::Constant)?;
		Some(constant.raw_body().trim() != "0")
	}

	/// True when `name` exists but only as a function-like/array-like macro, never as a constant
	/// — the "not a constant" case from spec §9's resolved open question.
	#[must_use]
	pub fn is_non_constant_macro(&self, name: &str) -> bool {
		match self.overloads(name) {
			Some(overloads) => !overloads.iter().any(|m| m.kind == MacroKind::Constant),
			None => false,
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn constant(name: &str, body: &str) -> Macro {
		Macro {
			name: name.into(),
			kind: MacroKind::Constant,
			params: vec![],
			variadic: false,
			body: vec![BodyFragment::Literal(body.into())],
		}
	}

	#[test]
	fn replaces_same_signature() {
		let mut table = MacroTable::new();
		table.define(constant("X", "1"));
		table.define(constant("X", "2"));
		assert_eq!(table.overloads("X").unwrap().len(), 1);
		assert_eq!(table.overloads("X").unwrap()[0].raw_body(), "2");
	}

	#[test]
	fn adds_different_signature_as_overload() {
		let mut table = MacroTable::new();
		table.define(constant("X", "1"));
		table.define(Macro {
			name: "X".into(),
			kind: MacroKind::FunctionLike,
			params: vec!["a".into()],
			variadic: false,
			body: vec![BodyFragment::Param(0)],
		});
		assert_eq!(table.overloads("X").unwrap().len(), 2);
	}

	#[test]
	fn variadic_paste_elided_when_empty() {
		let m = Macro {
			name: "L".into(),
			kind: MacroKind::FunctionLike,
			params: vec!["fmt".into(), "...".into()],
			variadic: true,
			body: vec![
				BodyFragment::Literal("log(".into()),
				BodyFragment::Param(0),
				BodyFragment::VariadicPaste,
				BodyFragment::Literal(")".into()),
			],
		};
		assert_eq!(m.expand(&["\"hi\"".into()]), "log(\"hi\")");
		assert_eq!(m.expand(&["\"%d\"".into(), "n".into()]), "log(\"%d\", n)");
	}
}
