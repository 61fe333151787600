//! The `sdscpr` binary: argument parsing, file I/O, and per-stage status output (spec §6).
//!
//! Command-line parsing, file I/O, and banner formatting are explicitly out of scope for the
//! core pipeline (spec §1); this module is the thin external collaborator the spec defers to.

use std::path::PathBuf;

use clap::Parser;

use crate::pragma::Pragmas;
use crate::source::SourceCode;

/// Compiles a source-dialect program into the restricted SDS-C target dialect.
#[derive(Parser, Debug)]
#[command(name = "sdscpr", version, about, long_about = None)]
pub struct Args {
	/// Path to the main source file.
	pub input: PathBuf,

	/// Where to write the rendered output. A literal `%V` in the name is replaced by the
	/// `version` pragma.
	#[arg(short, long)]
	pub output: Option<PathBuf>,

	/// Print the untouched input source.
	#[arg(long)]
	pub show_original: bool,

	/// Print the text after `#include`/`#if` resolution, before macro expansion.
	#[arg(long)]
	pub show_resolved: bool,

	/// Print the fully macro-expanded text handed to the tokenizer.
	#[arg(long)]
	pub show_processed: bool,

	/// Print a debug dump of the token stream.
	#[arg(long)]
	pub show_tokens: bool,

	/// Print a debug dump of the parsed statement tree, before lowering.
	#[arg(long)]
	pub show_statements: bool,

	/// Print the final rendered output (also implied by omitting `--output`).
	#[arg(long)]
	pub show_generated: bool,

	/// Inject a pragma, as if by `#pragma NAME VALUE`. Repeatable.
	#[arg(short, long = "pragma", num_args = 2, value_names = ["NAME", "VALUE"])]
	pub pragmas: Vec<std::string::String>,

	/// Print the final output to stdout even when `--output` is given.
	#[arg(short = 'd', long)]
	pub stdout: bool,
}

/// The binary entry point, called from the `#[cfg(feature = "binaries")] fn main()` in
/// `src/lib.rs` (mirrors the teacher's own `src/lib.rs` delegating to its own binary module).
pub fn main() -> miette::Result<()> {
	#[cfg(feature = "human-panic")]
	human_panic::setup_panic!();

	let args = Args::parse();

	let mut pragmas = Pragmas::default();
	for pair in args.pragmas.chunks_exact(2) {
		pragmas.set(&pair[0], &pair[1]);
	}

	let text = std::fs::read_to_string(&args.input).map_err(|e| miette::miette!("failed to read '{}': {e}", args.input.display()))?;
	let source = SourceCode::new(args.input.to_string_lossy().into_owned(), text);
	let working_dir = args.input.parent().map(std::path::Path::to_path_buf).unwrap_or_default();

	let (pipeline, warnings) = crate::compile(&source, &mut pragmas, working_dir).map_err(|e| miette::Report::from(*e))?;

	for warning in &warnings {
		eprintln!("warning: {warning}");
	}
	if args.show_original {
		eprintln!("=== original ===\n{}", pipeline.original);
	}
	if args.show_resolved {
		eprintln!("=== resolved ===\n{}", pipeline.resolved);
	}
	if args.show_processed {
		eprintln!("=== processed ===\n{}", pipeline.processed);
	}
	if args.show_tokens {
		eprintln!("=== tokens ===\n{}", pipeline.tokens);
	}
	if args.show_statements {
		eprintln!("=== statements ===\n{}", pipeline.statements);
	}
	if args.show_generated {
		eprintln!("=== generated ===\n{}", pipeline.generated);
	}

	if let Some(output) = &args.output {
		let path = substitute_version_placeholder(output, &pragmas.version);
		std::fs::write(&path, &pipeline.generated).map_err(|e| miette::miette!("failed to write '{}': {e}", path.display()))?;
		if args.stdout {
			println!("{}", pipeline.generated);
		}
	} else {
		println!("{}", pipeline.generated);
	}

	Ok(())
}

/// Replaces a literal `%V` in `path`'s file name with `version` (spec §6's output-path rule).
fn substitute_version_placeholder(path: &std::path::Path, version: &str) -> PathBuf {
	let Some(name) = path.file_name().and_then(std::ffi::OsStr::to_str) else { return path.to_path_buf() };
	if !name.contains("%V") {
		return path.to_path_buf();
	}
	path.with_file_name(name.replace("%V", version))
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn version_placeholder_is_substituted() {
		let out = substitute_version_placeholder(std::path::Path::new("build/out-%V.c"), "1.2.3");
		assert_eq!(out, std::path::PathBuf::from("build/out-1.2.3.c"));
	}

	#[test]
	fn path_without_placeholder_is_unchanged() {
		let out = substitute_version_placeholder(std::path::Path::new("build/out.c"), "1.2.3");
		assert_eq!(out, std::path::PathBuf::from("build/out.c"));
	}
}
