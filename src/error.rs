//! The error model for every pipeline stage.
//!
//! Each stage has its own small error enum; [`CompileError`] unifies them behind one
//! outward-facing type via `#[from]`, the same split the teacher uses between its
//! parser- and assembler-stage errors while still returning one error type from `main`.

use std::sync::Arc;

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Errors raised while processing `#`-directives and expanding macros (spec §7.1).
#[derive(Error, Debug, Diagnostic)]
pub enum DirectiveError {
	#[error("cannot find include file '{file}'")]
	#[diagnostic(code(sdscpr::directive::include_not_found))]
	IncludeNotFound {
		file: String,
		#[source_code]
		src: NamedSource<Arc<str>>,
		#[label("included here")]
		location: SourceSpan,
	},

	#[error("include cycle detected: '{file}' includes itself transitively")]
	#[diagnostic(code(sdscpr::directive::include_cycle))]
	IncludeCycle {
		file: String,
		#[source_code]
		src: NamedSource<Arc<str>>,
		#[label("cyclic include")]
		location: SourceSpan,
	},

	#[error("include depth exceeded 15 levels")]
	#[diagnostic(code(sdscpr::directive::include_depth))]
	IncludeDepthExceeded {
		#[source_code]
		src: NamedSource<Arc<str>>,
		#[label("here")]
		location: SourceSpan,
	},

	#[error("unterminated #if: missing #endif")]
	#[diagnostic(code(sdscpr::directive::unterminated_if))]
	UnterminatedIf {
		#[source_code]
		src: NamedSource<Arc<str>>,
		#[label("#if opened here is never closed")]
		location: SourceSpan,
	},

	#[error("#else or #endif without matching #if")]
	#[diagnostic(code(sdscpr::directive::unmatched_endif))]
	UnmatchedConditional {
		#[source_code]
		src: NamedSource<Arc<str>>,
		#[label("here")]
		location: SourceSpan,
	},

	#[error("#error: {message}")]
	#[diagnostic(code(sdscpr::directive::explicit_error))]
	ExplicitError {
		message: String,
		#[source_code]
		src: NamedSource<Arc<str>>,
		#[label("here")]
		location: SourceSpan,
	},

	#[error("pragma '{name}' redefined with a conflicting value ('{old}' -> '{new}')")]
	#[diagnostic(code(sdscpr::directive::pragma_conflict), severity(warning))]
	PragmaConflict {
		name: String,
		old: String,
		new: String,
		#[source_code]
		src: NamedSource<Arc<str>>,
		#[label("redefined here")]
		location: SourceSpan,
	},

	#[error("macro expansion did not converge after 10 passes (possible recursive macro)")]
	#[diagnostic(code(sdscpr::directive::macro_recursion))]
	MacroExpansionDidNotConverge {
		#[source_code]
		src: NamedSource<Arc<str>>,
		#[label("while expanding from here")]
		location: SourceSpan,
	},

	#[error("macro '{name}' invoked with {given} argument(s), expected {expected}")]
	#[diagnostic(code(sdscpr::directive::macro_arity))]
	MacroArityMismatch {
		name: String,
		given: usize,
		expected: usize,
		#[source_code]
		src: NamedSource<Arc<str>>,
		#[label("invoked here")]
		location: SourceSpan,
	},

	#[error("directive '#{directive}' is malformed: {reason}")]
	#[diagnostic(code(sdscpr::directive::malformed))]
	MalformedDirective {
		directive: String,
		reason: String,
		#[source_code]
		src: NamedSource<Arc<str>>,
		#[label("here")]
		location: SourceSpan,
	},
}

/// Errors raised while tokenizing or parsing statements/expressions (spec §7.2).
#[derive(Error, Debug, Diagnostic)]
pub enum SyntaxError {
	#[error("unexpected token: expected {expected}, found '{found}'")]
	#[diagnostic(code(sdscpr::syntax::unexpected_token))]
	UnexpectedToken {
		expected: String,
		found: String,
		#[source_code]
		src: NamedSource<Arc<str>>,
		#[label("here")]
		location: SourceSpan,
	},

	#[error("missing semicolon")]
	#[diagnostic(code(sdscpr::syntax::missing_semicolon))]
	MissingSemicolon {
		#[source_code]
		src: NamedSource<Arc<str>>,
		#[label("expected ';' after this")]
		location: SourceSpan,
	},

	#[error("invalid {kind} literal: {text}")]
	#[diagnostic(code(sdscpr::syntax::invalid_literal))]
	InvalidLiteral {
		kind: &'static str,
		text: String,
		#[source_code]
		src: NamedSource<Arc<str>>,
		#[label("here")]
		location: SourceSpan,
	},

	#[error("unexpected end of input while parsing {context}")]
	#[diagnostic(code(sdscpr::syntax::unexpected_eof))]
	UnexpectedEof {
		context: String,
		#[source_code]
		src: NamedSource<Arc<str>>,
		#[label("input ends here")]
		location: SourceSpan,
	},
}

/// Errors raised by the lowering engine (spec §7.3).
#[derive(Error, Debug, Diagnostic)]
pub enum LoweringError {
	#[error("function '{name}' is defined more than once")]
	#[diagnostic(code(sdscpr::lowering::duplicate_function))]
	DuplicateFunction {
		name: String,
		#[source_code]
		src: NamedSource<Arc<str>>,
		#[label("second definition here")]
		location: SourceSpan,
	},

	#[error("label '{name}' is defined more than once in function '{function}'")]
	#[diagnostic(code(sdscpr::lowering::duplicate_label))]
	DuplicateLabel {
		name: String,
		function: String,
		#[source_code]
		src: NamedSource<Arc<str>>,
		#[label("second definition here")]
		location: SourceSpan,
	},

	#[error("call to undefined function '{name}'")]
	#[diagnostic(code(sdscpr::lowering::undefined_function))]
	UndefinedFunction {
		name: String,
		#[source_code]
		src: NamedSource<Arc<str>>,
		#[label("called here")]
		location: SourceSpan,
	},

	#[error("'pop' target must be a plain variable")]
	#[diagnostic(code(sdscpr::lowering::pop_non_variable))]
	PopToNonVariable {
		#[source_code]
		src: NamedSource<Arc<str>>,
		#[label("here")]
		location: SourceSpan,
	},

	#[error("'{keyword}' used outside of a loop{switch_hint}")]
	#[diagnostic(code(sdscpr::lowering::break_continue_outside_scope))]
	BreakContinueOutsideScope {
		keyword: &'static str,
		switch_hint: &'static str,
		#[source_code]
		src: NamedSource<Arc<str>>,
		#[label("here")]
		location: SourceSpan,
	},

	#[error("cannot assign a string expression to a variable")]
	#[diagnostic(code(sdscpr::lowering::string_assignment))]
	StringAssignment {
		#[source_code]
		src: NamedSource<Arc<str>>,
		#[label("here")]
		location: SourceSpan,
	},

	#[error("cannot return a string literal")]
	#[diagnostic(code(sdscpr::lowering::string_return))]
	StringReturn {
		#[source_code]
		src: NamedSource<Arc<str>>,
		#[label("here")]
		location: SourceSpan,
	},

	#[error("use of undefined variable '{name}'")]
	#[diagnostic(code(sdscpr::lowering::undefined_variable))]
	UndefinedVariable {
		name: String,
		#[source_code]
		src: NamedSource<Arc<str>>,
		#[label("here")]
		location: SourceSpan,
	},

	#[error("local variable '{name}' shadows a global of the same name")]
	#[diagnostic(code(sdscpr::lowering::shadowed_global))]
	ShadowedGlobal {
		name: String,
		#[source_code]
		src: NamedSource<Arc<str>>,
		#[label("here")]
		location: SourceSpan,
	},

	#[error("function '{name}' referenced by '{caller}' is unreachable but required")]
	#[diagnostic(code(sdscpr::lowering::missing_reachable_function))]
	MissingReachableFunction {
		name: String,
		caller: String,
		#[source_code]
		src: NamedSource<Arc<str>>,
		#[label("here")]
		location: SourceSpan,
	},

	#[error("'goto {label}' targets an undefined label")]
	#[diagnostic(code(sdscpr::lowering::undefined_label))]
	UndefinedLabel {
		label: String,
		#[source_code]
		src: NamedSource<Arc<str>>,
		#[label("here")]
		location: SourceSpan,
	},
}

/// Errors raised when a renderer's target dialect rejects a construct (spec §7.4).
#[derive(Error, Debug, Diagnostic)]
pub enum TargetError {
	#[error("the '{renderer}' renderer does not support structured '{construct}'")]
	#[diagnostic(code(sdscpr::target::structured_control_flow))]
	StructuredControlFlow {
		renderer: &'static str,
		construct: &'static str,
		#[source_code]
		src: NamedSource<Arc<str>>,
		#[label("here")]
		location: SourceSpan,
	},

	#[error("the target dialect does not support function arguments")]
	#[diagnostic(code(sdscpr::target::function_arguments))]
	FunctionArguments {
		#[source_code]
		src: NamedSource<Arc<str>>,
		#[label("here")]
		location: SourceSpan,
	},

	#[error("the target dialect only supports value-less 'return;'")]
	#[diagnostic(code(sdscpr::target::non_void_return))]
	NonVoidReturn {
		#[source_code]
		src: NamedSource<Arc<str>>,
		#[label("here")]
		location: SourceSpan,
	},

	#[error("user-function calls are not allowed inside expressions under this renderer")]
	#[diagnostic(code(sdscpr::target::call_in_expression))]
	CallInExpression {
		#[source_code]
		src: NamedSource<Arc<str>>,
		#[label("here")]
		location: SourceSpan,
	},

	#[error("array indices may not be complex expressions under this renderer")]
	#[diagnostic(code(sdscpr::target::expression_array_index))]
	ExpressionArrayIndex {
		#[source_code]
		src: NamedSource<Arc<str>>,
		#[label("here")]
		location: SourceSpan,
	},
}

/// The unified, outward-facing error type returned by every public compilation entry point.
#[derive(Error, Debug, Diagnostic)]
pub enum CompileError {
	#[error(transparent)]
	#[diagnostic(transparent)]
	Directive(#[from] DirectiveError),

	#[error(transparent)]
	#[diagnostic(transparent)]
	Syntax(#[from] SyntaxError),

	#[error(transparent)]
	#[diagnostic(transparent)]
	Lowering(#[from] LoweringError),

	#[error(transparent)]
	#[diagnostic(transparent)]
	Target(#[from] TargetError),

	#[error("{0}")]
	#[diagnostic(code(sdscpr::io))]
	Io(String),
}

pub type Result<T> = std::result::Result<T, Box<CompileError>>;
