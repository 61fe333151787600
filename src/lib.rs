//! A lowering compiler from a C-like source dialect to the restricted SDS-C target dialect
//! (spec §1): directives/macros, tokenizing, statement parsing, lowering, and rendering,
//! wired together end to end by [`compile`].

#![allow(non_upper_case_globals)]

pub mod ast;
pub mod directive;
pub mod error;
pub mod lower;
pub mod pragma;
pub mod render;
pub mod source;
pub mod token;

#[cfg(feature = "binaries")]
pub mod cli;

use std::path::PathBuf;

use error::{CompileError, Result};
use pragma::{Pragmas, RendererKind};
use source::SourceCode;

#[cfg(feature = "binaries")]
shadow_rs::shadow!(buildinfo);

/// Every intermediate artifact the CLI's `--show-*` flags can surface (spec §6), plus the
/// final rendered output.
pub struct Pipeline {
	/// The untouched input text.
	pub original: std::sync::Arc<str>,
	/// Output of the directive layer's `process()`: includes resolved, conditionals evaluated,
	/// directives stripped, macros not yet substituted (spec §4.1).
	pub resolved: String,
	/// Output of `apply_macros()`: the fully macro-expanded text handed to the tokenizer.
	pub processed: String,
	/// A debug dump of the statement-level token stream (spec §4.2).
	pub tokens: String,
	/// A debug dump of the parsed, brace-normalized AST, before lowering.
	pub statements: String,
	/// The final target-dialect text.
	pub generated: String,
}

/// Runs the full pipeline described in spec §2 over `source`, using `working_dir` to resolve
/// relative `#include`s and `pragmas` (already seeded with any `-p` overrides) to parameterize
/// preprocessing and lowering.
///
/// `#pragma` directives encountered in the source are folded into `pragmas` after processing,
/// so a `-p` override and a `#pragma` of the same name can conflict; conflicts are reported as
/// warnings via the returned `Vec<String>`, never as hard errors (spec §4.1).
pub fn compile(source: &SourceCode, pragmas: &mut Pragmas, working_dir: PathBuf) -> Result<(Pipeline, Vec<String>)> {
	let mut warnings = Vec::new();

	let mut proc = directive::DirectiveProcessor::new(working_dir);
	let resolved = proc.process(source).map_err(|e| Box::new(CompileError::from(*e)))?;
	for captured in proc.pragmas() {
		if let Some((old, new)) = pragmas.set(&captured.name, &captured.value) {
			warnings.push(format!("pragma '{}' redefined with a conflicting value ('{old}' -> '{new}')", captured.name));
		}
	}
	warnings.extend(proc.warnings.iter().cloned());

	let processed = proc.apply_macros(&resolved).map_err(|e| Box::new(CompileError::from(*e)))?;

	let processed_source = SourceCode::new(source.name.clone(), processed.clone());
	let tokens = format!("{:#?}", token::Tokenizer::tokenize_statements(&processed));

	let mut ast = ast::parser::StatementParser::new(&processed_source)
		.parse_program(&processed)
		.map_err(|e| Box::new(CompileError::from(*e)))?;
	ast::addbraces::run(&mut ast);
	let statements = format!("{ast:#?}");

	let generated = match pragmas.renderer {
		RendererKind::Debug => render::debug::render(&ast, pragmas, &processed_source).map_err(|e| Box::new(CompileError::from(*e)))?,
		RendererKind::Simple => render::simple::render(&ast, pragmas, &processed_source).map_err(|e| Box::new(CompileError::from(*e)))?,
		RendererKind::Asm => render::asm::render(&ast, pragmas, &processed_source).map_err(|e| match *e {
			render::asm::AsmError::Lowering(inner) => Box::new(CompileError::from(inner)),
			render::asm::AsmError::Target(inner) => Box::new(CompileError::from(inner)),
		})?,
	};

	Ok((Pipeline { original: source.text.clone(), resolved, processed, tokens, statements, generated }, warnings))
}

#[cfg(feature = "binaries")]
#[allow(unused)]
fn main() -> miette::Result<()> {
	cli::main()
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn full_pipeline_renders_single_echo_call() {
		let source = SourceCode::new("t.c", "main() { echo(\"hi\"); }");
		let mut pragmas = Pragmas::default();
		let (pipeline, warnings) = compile(&source, &mut pragmas, PathBuf::from(".")).unwrap();
		assert!(warnings.is_empty());
		assert!(pipeline.generated.contains("echo('hi');"));
		assert!(pipeline.resolved.contains("echo(\"hi\")"));
		assert_eq!(&*pipeline.original, "main() { echo(\"hi\"); }");
	}

	#[test]
	fn pragma_override_conflicting_with_source_pragma_is_a_warning_not_an_error() {
		let source = SourceCode::new("t.c", "#pragma name foo\nmain() { echo(\"hi\"); }");
		let mut pragmas = Pragmas::default();
		pragmas.set("name", "bar");
		let (pipeline, warnings) = compile(&source, &mut pragmas, PathBuf::from(".")).unwrap();
		assert!(warnings.iter().any(|w| w.contains("name")));
		assert!(pipeline.generated.contains("echo('hi');"));
	}

	#[test]
	fn simple_renderer_rejects_structured_loops_through_the_full_pipeline() {
		let source = SourceCode::new("t.c", "main() { while (1) { } }");
		let mut pragmas = Pragmas { renderer: RendererKind::Simple, ..Pragmas::default() };
		let err = compile(&source, &mut pragmas, PathBuf::from(".")).unwrap_err();
		assert!(matches!(*err, CompileError::Target(_)));
	}
}
