//! The "Asm" target renderer (spec §4.7 `AsmSdsRenderer`): drives the [`crate::lower::Lowerer`]
//! over the full source dialect, then renders the lowered tree with the same restricted-output
//! rules [`super::simple`] applies directly to an already-restricted source.

use crate::ast::Ast;
use crate::error::{LoweringError, TargetError};
use crate::pragma::Pragmas;
use crate::source::SourceCode;

/// One of the two stages that can fail when driving the asm renderer: the lowering engine itself,
/// or (in principle, though the lowering engine's output should always satisfy the restricted
/// dialect by construction) the final render.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum AsmError {
	#[error(transparent)]
	#[diagnostic(transparent)]
	Lowering(#[from] LoweringError),
	#[error(transparent)]
	#[diagnostic(transparent)]
	Target(#[from] TargetError),
}

/// Lowers `ast` (after [`crate::ast::addbraces::run`] has been applied), then renders the result
/// in the restricted dialect (spec §4.5, §4.7).
pub fn render(ast: &Ast, pragmas: &Pragmas, src: &SourceCode) -> Result<String, Box<AsmError>> {
	let mut lowered = crate::lower::Lowerer::lower_program(ast, pragmas, src).map_err(|e| Box::new(AsmError::from(*e)))?;
	if pragmas.remove_dead_code {
		crate::lower::deadcode::run(&mut lowered, src).map_err(|e| Box::new(AsmError::from(*e)))?;
	}
	super::Renderer::new(&lowered, pragmas, src, true, "asm").render_program().map_err(|e| Box::new(AsmError::from(*e)))
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::ast::parser::StatementParser;

	fn compile(text: &str, pragmas: &Pragmas) -> String {
		let source = SourceCode::new("t.c", text);
		let mut ast = StatementParser::new(&source).parse_program(&source.text).unwrap();
		crate::ast::addbraces::run(&mut ast);
		render(&ast, pragmas, &source).unwrap()
	}

	#[test]
	fn single_echo_call_lands_inside_main_after_reset_and_loop() {
		let out = compile("main() { echo(\"hi\"); }", &Pragmas::default());
		assert_eq!(out.matches("echo('hi');").count(), 1);
		let reset_pos = out.find("__reset:").unwrap();
		let loop_pos = out.find("__main_loop:").unwrap();
		let echo_pos = out.find("echo('hi');").unwrap();
		assert!(reset_pos < loop_pos);
		assert!(loop_pos < echo_pos);
	}

	#[test]
	fn single_call_site_collapses_dispatch_and_elides_the_return_address_push() {
		let out = compile("var g = 7; f(x) { return x + 1; } main() { echo(f(g)); }", &Pragmas::default());
		assert!(out.contains("__a0 = u1;"));
		let a0_pos = out.find("__a0 = u1;").unwrap();
		let goto_pos = out.find("goto __fn0;").unwrap();
		assert!(a0_pos < goto_pos);
		assert!(out.contains("__rval = __a0 + 1;"));
		assert!(out.contains("goto __fn0_end;"));
		assert!(!out.contains("push("));
		assert_eq!(out.matches("if (__addr ==").count(), 0);
	}

	#[test]
	fn multiple_call_sites_push_the_return_address_and_dispatch_on_it() {
		let pragmas = Pragmas { inline_one_use_functions: false, ..Pragmas::default() };
		let out = compile("var g = 7; f(x) { return x + 1; } main() { echo(f(g)); echo(f(g)); }", &pragmas);
		assert!(out.contains("push(0);"));
		assert!(out.contains("push(1);"));
		assert_eq!(out.matches("if (__addr ==").count(), 2);
		assert!(out.contains("goto __err_bad_addr;"));
	}

	#[test]
	fn for_loop_emits_three_distinct_label_families() {
		let out = compile("main() { for (var i = 0; i < 3; i = i + 1) echo(i); }", &Pragmas::default());
		assert!(out.contains("__for_test_0"));
		assert!(out.contains("__for_cont_0"));
		assert!(out.contains("__for_break_0"));
	}

	#[test]
	fn switch_emits_chained_case_tests_and_shared_break_label() {
		let out = compile(
			"main() { var x; switch (x) { case 1: echo(\"a\"); break; case 2: echo(\"b\"); break; default: echo(\"c\"); } }",
			&Pragmas::default(),
		);
		assert!(out.contains("!= 1"));
		assert!(out.contains("!= 2"));
		assert_eq!(out.matches("goto __sw_break_0;").count(), 2);

		// No label is ever defined twice, including the break label, which a prior bug reused as
		// the final case's false-jump target.
		assert_eq!(out.matches("__sw_break_0:").count(), 1);
		assert_eq!(out.matches("__sw_case_0:").count(), 1);
		assert_eq!(out.matches("__sw_case_1:").count(), 1);
		assert_eq!(out.matches("__sw_case_2:").count(), 1);

		// A value matching neither case falls through the whole chain into `default`: the second
		// case's failure jump lands on the label default's body begins at, before `break`'s label.
		assert!(out.contains("goto __sw_case_2;"));
		let case1_label_pos = out.find("__sw_case_1:").unwrap();
		let case2_test_pos = out.find("!= 2").unwrap();
		let case2_label_pos = out.find("__sw_case_2:").unwrap();
		let default_body_pos = out.find("echo('c');").unwrap();
		let break_label_pos = out.find("__sw_break_0:").unwrap();
		assert!(case1_label_pos < case2_test_pos);
		assert!(case2_label_pos < default_body_pos);
		assert!(default_body_pos < break_label_pos);
	}

	#[test]
	fn constant_folding_collapses_macro_expanded_square() {
		let mut proc = crate::directive::DirectiveProcessor::new(std::path::PathBuf::from("."));
		let source = SourceCode::new("t.c", "#define SQ(x) ((x)*(x))\nmain() { echo(SQ(2+3)); }");
		let resolved = proc.process(&source).unwrap();
		let expanded = proc.apply_macros(&resolved).unwrap();
		assert!(expanded.contains("((2+3)*(2+3))"));
		let out = compile(&expanded, &Pragmas::default());
		assert!(out.contains("echo(25);"));
	}

	#[test]
	fn push_pop_trampoline_routes_saves_through_shared_block() {
		let pragmas = Pragmas { push_pop_trampolines: true, push_pop_trampoline_limit: 2, ..Pragmas::default() };
		let out = compile("f(x, y) { var a; var b; a = x; b = y; return a + b; } main() { echo(f(1, 2)); }", &pragmas);
		assert!(out.contains("__addr = 0;"));
		assert!(out.contains("goto __push_tmps_2;"));
		assert!(out.contains("__fn0_push_tmps_end:"));
		assert!(out.contains("goto __pop_tmps_2;"));
		assert!(out.contains("__fn0_pop_tmps_end:"));
		assert!(out.contains("__push_tmps_2:"));
		assert!(out.contains("__pop_tmps_2:"));
		// Balanced: the shared block pushes exactly as many slots as it reverse-pops.
		let push_count = out.matches("ram[__sp] = __t").count();
		let pop_count = out.matches("= ram[__sp];").count();
		assert_eq!(push_count, pop_count);
	}

	#[test]
	fn push_pop_trampoline_not_engaged_below_the_limit() {
		let pragmas = Pragmas { push_pop_trampolines: true, push_pop_trampoline_limit: 5, ..Pragmas::default() };
		let out = compile("f(x, y) { var a; var b; a = x; b = y; return a + b; } main() { echo(f(1, 2)); }", &pragmas);
		assert!(!out.contains("push_tmps"));
	}

	#[test]
	fn global_initializer_is_assigned_during_init_before_the_user_init_body() {
		let out = compile("var g = 7; init() { echo(g); } main() { echo(g); }", &Pragmas::default());
		assert!(out.contains("u1 = 7;"));
		let reset_pos = out.find("__reset:").unwrap();
		let assign_pos = out.find("u1 = 7;").unwrap();
		let echo_pos = out.find("echo(u1);").unwrap();
		assert!(reset_pos < assign_pos);
		assert!(assign_pos < echo_pos);
	}

	#[test]
	fn global_initializer_may_reference_an_earlier_global() {
		let out = compile("var a = 1; var b = a + 1; main() { echo(b); }", &Pragmas::default());
		assert!(out.contains("u1 = 1;"));
		assert!(out.contains("u2 = u1 + 1;"));
	}

	#[test]
	fn push_of_clobbered_tmp_happens_before_the_tmp_is_overwritten_with_the_argument() {
		let pragmas = Pragmas { inline_one_use_functions: false, ..Pragmas::default() };
		let out = compile("f(x) { return g(x) + 1; } g(y) { return y; } main() { echo(f(3)); echo(f(4)); }", &pragmas);
		let push_idx = out.find("ram[__sp] = ").expect("expected a push inside f's prologue");
		let tmp_start = push_idx + "ram[__sp] = ".len();
		let tmp_end = tmp_start + out[tmp_start ..].find(';').unwrap();
		let tmp_name = &out[tmp_start .. tmp_end];
		assert!(tmp_name.starts_with("__t"));
		let copy_stmt = format!("{tmp_name} = __a0;");
		let copy_pos = out.find(&copy_stmt).expect("expected the argument copied into the same tmp afterwards");
		assert!(push_idx < copy_pos);
	}

	#[test]
	fn show_trace_pragma_emits_entry_and_return_echoes_for_a_regular_function() {
		let pragmas = Pragmas { show_trace: true, inline_one_use_functions: false, ..Pragmas::default() };
		let out = compile("f(x) { return x + 1; } main() { echo(f(2)); }", &pragmas);
		assert!(out.contains("[TRACE] in: f("));
		assert!(out.contains("[TRACE] return from f, with: "));
	}

	#[test]
	fn show_trace_pragma_emits_naked_entry_echo_for_main() {
		let pragmas = Pragmas { show_trace: true, ..Pragmas::default() };
		let out = compile("main() { echo(1); }", &pragmas);
		assert!(out.contains("[TRACE] in main()"));
	}

	#[test]
	fn builtin_logging_default_emits_info_echoes_at_reset_init_and_main_loop() {
		let out = compile("main() { echo(1); }", &Pragmas::default());
		assert!(out.contains("[INFO] Program reset."));
		assert!(out.contains("[INFO] Initialization..."));
		assert!(out.contains("[INFO] main() started."));
	}

	#[test]
	fn builtin_logging_disabled_suppresses_info_echoes() {
		let pragmas = Pragmas { builtin_logging: false, ..Pragmas::default() };
		let out = compile("main() { echo(1); }", &pragmas);
		assert!(!out.contains("[INFO]"));
	}

	#[test]
	fn side_effecting_loop_survives_constant_folding() {
		let out = compile(
			"main() { var s = 0; var i; for (i = 1; i <= 10; i = i + 1) s = s + i; echo(s); }",
			&Pragmas::default(),
		);
		assert!(out.contains("__for_test_0:"));
	}
}
