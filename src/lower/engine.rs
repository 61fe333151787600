//! The lowering engine: AST-to-AST passes that eliminate arguments, returns, locals, and
//! structured control flow (spec §4.5), ported from `original_source/mutators.py`'s `M_Grande`.

use std::collections::{BTreeSet, HashMap, HashSet};

use smartstring::alias::String as SmolStr;

use super::pools::{ArgPool, LabelPool, TmpPool};
use super::registry::FnRegistry;
use crate::ast::{Ast, ExprId, ExprKind, LiteralKind, StmtId, StmtKind};
use crate::error::LoweringError;
use crate::pragma::Pragmas;
use crate::source::SourceCode;

/// `@+ @-` / `! ~` as two distinct passes, then the binary levels, seven in total — the source's
/// actual precedence table, not the distilled prose's six-level summary (DESIGN.md).
const PRECEDENCE_LEVELS: &[(&[&str], bool)] = &[
	(&["@+", "@-"], true),
	(&["!", "~"], true),
	(&["*", "/", "%"], false),
	(&["+", "-"], false),
	(&["<<", ">>"], false),
	(&["<", "<=", ">", ">=", "==", "!="], false),
	(&["&", "^", "|", "&&", "||"], false),
];

const BUILTIN_FUNCTIONS: &[&str] = &[
	"echo", "wait", "sprintf", "atoi", "http_get", "push", "pop", "reset", "end", "len", "rand", "abs",
];

struct FnDef {
	params: Vec<SmolStr>,
	body: StmtId,
	index: u32,
}

/// Per-function lowering context, reset (or shared, when inlining) for each callee lowered.
#[derive(Default)]
struct FnCtx {
	tag: SmolStr,
	naked: bool,
	/// Set only for the callee currently being lowered (not inlined); `return` jumps here.
	fn_index: Option<u32>,
	/// Set only while lowering an inlined call's body; `return` jumps here instead of `fn_index`'s
	/// epilogue, since an inlined callee has no epilogue block of its own.
	inline_end_label: Option<SmolStr>,
	local_tmp_dict: HashMap<SmolStr, SmolStr>,
	changed_tmps: BTreeSet<SmolStr>,
	break_stack: Vec<SmolStr>,
	continue_stack: Vec<SmolStr>,
	rval_target: Option<SmolStr>,
}

pub struct Lowerer<'a> {
	input: &'a Ast,
	pragmas: &'a Pragmas,
	src: &'a SourceCode,
	out: Ast,
	tmp_pool: TmpPool,
	arg_pool: ArgPool,
	label_pool: LabelPool,
	registry: FnRegistry,
	global_rename: HashMap<SmolStr, SmolStr>,
	user_globals: Vec<(SmolStr, Option<ExprId>)>,
	functions: HashMap<SmolStr, FnDef>,
	call_graph: HashMap<SmolStr, HashSet<SmolStr>>,
	calls_made: HashMap<SmolStr, Vec<SmolStr>>,
	inline_set: HashSet<SmolStr>,
	/// Total call sites a callee will end up with once every (possibly inlined) caller is
	/// flattened, computed once up front so the single-caller dispatch collapse (spec §4.5.3) can
	/// be decided consistently at both the call site (elide the `push(k)`) and the callee's
	/// epilogue (elide the `pop(__addr)`), regardless of the order functions are lowered in.
	total_call_sites: HashMap<SmolStr, u32>,
	halt_needed: bool,
	/// `(fn_index, changed_tmps_count)` for every callee routed through the shared push/pop
	/// trampoline instead of inline saves (spec §4.5.3 step 3, §9 Open Question 1).
	trampoline_sites: Vec<(u32, u32)>,
}

impl<'a> Lowerer<'a> {
	fn err_span(&self) -> miette::SourceSpan {
		self.src.span(0, 0)
	}

	pub fn lower_program(input: &'a Ast, pragmas: &'a Pragmas, src: &'a SourceCode) -> Result<Ast, Box<LoweringError>> {
		let mut lowerer = Lowerer {
			input,
			pragmas,
			src,
			out: Ast::default(),
			tmp_pool: TmpPool::new(),
			arg_pool: ArgPool::new(),
			label_pool: LabelPool::new(),
			registry: FnRegistry::new(),
			global_rename: HashMap::new(),
			user_globals: Vec::new(),
			functions: HashMap::new(),
			call_graph: HashMap::new(),
			calls_made: HashMap::new(),
			inline_set: HashSet::new(),
			total_call_sites: HashMap::new(),
			halt_needed: false,
			trampoline_sites: Vec::new(),
		};
		lowerer.run()
	}

	fn run(&mut self) -> Result<Ast, Box<LoweringError>> {
		self.register_top_level()?;
		self.build_call_graph();
		if self.pragmas.inline_one_use_functions {
			self.mark_inline_candidates();
		}
		self.count_total_call_sites();

		let global_inits = self.lower_global_initializers()?;
		let main_body = self.lower_naked_function("main")?;
		let init_body = if self.functions.contains_key("init") { Some(self.lower_naked_function("init")?) } else { None };

		let reachable = self.close_reachable_set()?;
		let mut fn_blocks = Vec::new();
		let mut ordered: Vec<&SmolStr> = reachable.iter().collect();
		ordered.sort_by_key(|name| self.functions.get(*name).map_or(u32::MAX, |f| f.index));
		for name in ordered {
			if self.inline_set.contains(name) {
				continue;
			}
			fn_blocks.push(self.lower_callee(name)?);
		}

		self.assemble_output(global_inits, init_body, main_body, fn_blocks);
		Ok(std::mem::take(&mut self.out))
	}

	/// Lowers each global's initializer expression into an assignment statement, to be spliced
	/// into the `__init` section ahead of the user's own `init()` body (spec §4.5.2, ported from
	/// `original_source/mutators.py`'s `_add_global_var`, which splits a global into a bare
	/// `globals_declare` decl plus a `globals_assign` statement run at startup rather than folding
	/// the initial value into the declaration itself).
	fn lower_global_initializers(&mut self) -> Result<Vec<StmtId>, Box<LoweringError>> {
		let mut ctx = FnCtx { tag: "init".into(), naked: true, ..FnCtx::default() };
		let mut out = Vec::new();
		let globals = self.user_globals.clone();
		for (name, init) in globals {
			let Some(init) = init else { continue };
			let renamed = self.global_rename[&name].clone();
			let (pre, value) = self.lower_expr(init, &mut ctx)?;
			out.extend(pre);
			out.push(self.out.push_stmt(StmtKind::Assign { name: renamed, index: None, op: "=".into(), value: Some(value) }));
		}
		Ok(out)
	}

	// ---- registration -------------------------------------------------

	fn register_top_level(&mut self) -> Result<(), Box<LoweringError>> {
		for &id in &self.input.top_level {
			if let StmtKind::VarDecl { name, init } = &self.input.stmt(id).kind {
				self.user_globals.push((name.clone(), *init));
				let renamed = if self.pragmas.keep_names {
					name.clone()
				} else {
					let n: SmolStr = format!("u{}", self.user_globals.len()).into();
					n
				};
				self.global_rename.insert(name.clone(), renamed);
			}
		}
		for &id in &self.input.top_level {
			if let StmtKind::FunctionDecl { name, params, body, .. } = &self.input.stmt(id).kind {
				if self.functions.contains_key(name) {
					return Err(Box::new(LoweringError::DuplicateFunction {
						name: name.to_string(),
						src: self.src.named_source(),
						location: self.err_span(),
					}));
				}
				let index = self.registry.register(name.clone());
				self.functions.insert(name.clone(), FnDef { params: params.clone(), body: *body, index });
			}
		}
		if !self.functions.contains_key("main") {
			return Err(Box::new(LoweringError::UndefinedFunction {
				name: "main".to_string(),
				src: self.src.named_source(),
				location: self.err_span(),
			}));
		}
		Ok(())
	}

	fn build_call_graph(&mut self) {
		let names: Vec<SmolStr> = self.functions.keys().cloned().collect();
		for name in names {
			let body = self.functions[&name].body;
			let mut callees = Vec::new();
			self.collect_calls(body, &mut callees);
			for callee in &callees {
				self.call_graph.entry(callee.clone()).or_default().insert(name.clone());
			}
			self.calls_made.insert(name, callees);
		}
	}

	fn collect_calls(&self, id: StmtId, out: &mut Vec<SmolStr>) {
		match &self.input.stmt(id).kind {
			StmtKind::Call { name, args } => {
				if self.functions.contains_key(name) {
					out.push(name.clone());
				}
				for &a in args {
					self.collect_calls_expr(a, out);
				}
			},
			StmtKind::Assign { value, .. } => {
				if let Some(v) = value {
					self.collect_calls_expr(*v, out);
				}
			},
			StmtKind::VarDecl { init, .. } => {
				if let Some(v) = init {
					self.collect_calls_expr(*v, out);
				}
			},
			StmtKind::Return { value } => {
				if let Some(v) = value {
					self.collect_calls_expr(*v, out);
				}
			},
			StmtKind::If { cond, .. } | StmtKind::While { cond, .. } | StmtKind::DoWhile { cond, .. } | StmtKind::Switch { value: cond, .. } =>
				self.collect_calls_expr(*cond, out),
			_ => {},
		}
		for child in self.input.children_of(id) {
			self.collect_calls(child, out);
		}
	}

	fn collect_calls_expr(&self, id: ExprId, out: &mut Vec<SmolStr>) {
		match &self.input.expr(id).kind {
			ExprKind::Call { name, args } => {
				if self.functions.contains_key(name) {
					out.push(name.clone());
				}
				for &a in args {
					self.collect_calls_expr(a, out);
				}
			},
			ExprKind::Group(children) => {
				for &c in children {
					self.collect_calls_expr(c, out);
				}
			},
			ExprKind::Variable { index: Some(i), .. } => self.collect_calls_expr(*i, out),
			_ => {},
		}
	}

	fn mark_inline_candidates(&mut self) {
		for (name, def) in &self.functions {
			if name == "main" || name == "init" {
				continue;
			}
			let caller_count = self.call_graph.get(name).map_or(0, HashSet::len);
			if caller_count <= 1 {
				self.inline_set.insert(name.clone());
			}
			let _ = def;
		}
	}

	/// Flattens `calls_made` through the inline set to get, per non-inlined callee, the total
	/// number of call sites it will end up with once inlined callers are spliced into theirs —
	/// a call made twice from an inlined function called twice counts four times.
	fn count_total_call_sites(&mut self) {
		fn expand(calls_made: &HashMap<SmolStr, Vec<SmolStr>>, inline_set: &HashSet<SmolStr>, name: &str, totals: &mut HashMap<SmolStr, u32>) {
			let Some(callees) = calls_made.get(name) else { return };
			for callee in callees {
				if inline_set.contains(callee) {
					expand(calls_made, inline_set, callee, totals);
				} else {
					*totals.entry(callee.clone()).or_insert(0) += 1;
				}
			}
		}
		let mut totals = HashMap::new();
		for root in ["main", "init"] {
			expand(&self.calls_made, &self.inline_set, root, &mut totals);
		}
		self.total_call_sites = totals;
	}

	fn close_reachable_set(&mut self) -> Result<HashSet<SmolStr>, Box<LoweringError>> {
		let mut reachable: HashSet<SmolStr> = HashSet::new();
		let mut frontier: Vec<SmolStr> = Vec::new();
		for root in ["main", "init"] {
			if let Some(callees) = self.calls_made.get(root) {
				frontier.extend(callees.iter().cloned());
			}
		}
		while let Some(name) = frontier.pop() {
			if self.inline_set.contains(&name) {
				if let Some(callees) = self.calls_made.get(&name) {
					frontier.extend(callees.clone());
				}
				continue;
			}
			if !self.functions.contains_key(&name) {
				return Err(Box::new(LoweringError::UndefinedFunction {
					name: name.to_string(),
					src: self.src.named_source(),
					location: self.err_span(),
				}));
			}
			if reachable.insert(name.clone()) {
				if let Some(callees) = self.calls_made.get(&name) {
					frontier.extend(callees.clone());
				}
			}
		}
		Ok(reachable)
	}

	// ---- callee / naked lowering ---------------------------------------

	fn lower_naked_function(&mut self, name: &str) -> Result<Vec<StmtId>, Box<LoweringError>> {
		let Some(def) = self.functions.get(name) else { return Ok(vec![]) };
		let body = def.body;
		let mut ctx = FnCtx { tag: name.into(), naked: true, ..FnCtx::default() };
		let mut out = Vec::new();
		if self.pragmas.show_trace {
			let text = self.out.push_expr(ExprKind::Literal(LiteralKind::Str(format!("[TRACE] in {name}()").into())));
			out.push(self.out.push_stmt(StmtKind::Call { name: "echo".into(), args: vec![text] }));
		}
		out.extend(self.lower_stmt(body, &mut ctx)?);
		Ok(out)
	}

	/// `echo("[TRACE] in: <name>(", "<param>=", <value>, ", <param>=", <value>, ")");` — only ever
	/// carries real argument values when `passed_arg_names` is non-empty, which it only is when the
	/// callee has nested calls and therefore copied its `__aN`s into dedicated tmps (spec §6; ported
	/// from `original_source/mutators.py`'s `_process_fn` trace-echo construction, reproduced
	/// including its quirk of showing no argument values for a leaf function).
	fn emit_entry_trace(&mut self, name: &str, passed_arg_names: &[(SmolStr, SmolStr)]) -> StmtId {
		let mut args = vec![self.out.push_expr(ExprKind::Literal(LiteralKind::Str(format!("[TRACE] in: {name}(").into())))];
		for (i, (param, slot)) in passed_arg_names.iter().enumerate() {
			let prefix = if i == 0 { format!("{param}=") } else { format!(", {param}=") };
			args.push(self.out.push_expr(ExprKind::Literal(LiteralKind::Str(prefix.into()))));
			args.push(self.out.push_expr(ExprKind::Variable { name: slot.clone(), index: None }));
		}
		args.push(self.out.push_expr(ExprKind::Literal(LiteralKind::Str(")".into()))));
		self.out.push_stmt(StmtKind::Call { name: "echo".into(), args })
	}

	/// `echo("[TRACE] return from <name>, with: ", __rval);`
	fn emit_return_trace(&mut self, name: &str) -> StmtId {
		let prefix = self.out.push_expr(ExprKind::Literal(LiteralKind::Str(format!("[TRACE] return from {name}, with: ").into())));
		let rval = self.out.push_expr(ExprKind::Variable { name: "__rval".into(), index: None });
		self.out.push_stmt(StmtKind::Call { name: "echo".into(), args: vec![prefix, rval] })
	}

	#[allow(clippy::too_many_lines)]
	fn lower_callee(&mut self, name: &str) -> Result<Vec<StmtId>, Box<LoweringError>> {
		let def = &self.functions[name];
		let index = def.index;
		let params = def.params.clone();
		let body = def.body;

		let mut ctx = FnCtx { tag: index.to_string().into(), naked: false, fn_index: Some(index), ..FnCtx::default() };
		for (i, param) in params.iter().enumerate() {
			let arg_slot: SmolStr = format!("__a{i}").into();
			if self.function_has_nested_calls(name) {
				let tmp = self.tmp_pool.acquire();
				ctx.changed_tmps.insert(tmp.clone());
				ctx.local_tmp_dict.insert(param.clone(), tmp.clone());
			} else {
				ctx.local_tmp_dict.insert(param.clone(), arg_slot);
			}
		}

		let mut out = Vec::new();
		out.push(self.out.push_stmt(StmtKind::Label { name: FnRegistry::entry_label(index) }));

		// Push every tmp a call to this function will clobber *before* any of them get
		// overwritten with argument values below — the push must save the caller's value still
		// sitting in that slot, not the value this call is about to write into it (ported from
		// `original_source/mutators.py`'s `_process_fn`, where the "push changed tmps" section is
		// assembled strictly before the "store args to tmp vars" section it otherwise resembles).
		let saved: Vec<SmolStr> = ctx.changed_tmps.iter().cloned().collect();
		let use_trampoline =
			self.pragmas.push_pop_trampolines && i64::try_from(saved.len()).unwrap_or(i64::MAX) >= self.pragmas.push_pop_trampoline_limit;
		if use_trampoline {
			#[allow(clippy::cast_possible_truncation)]
			let count = saved.len() as u32;
			out.extend(self.emit_assign_literal("__addr", i64::from(index)));
			out.push(self.out.push_stmt(StmtKind::Goto { label: FnRegistry::push_tmps_label(count) }));
			out.push(self.out.push_stmt(StmtKind::Label { name: FnRegistry::push_tmps_end_label(index) }));
			self.trampoline_sites.push((index, count));
		} else {
			for tmp in &saved {
				out.extend(self.emit_push(tmp.clone()));
			}
		}

		let mut passed_arg_names = Vec::new();
		for (i, param) in params.iter().enumerate() {
			let arg_slot: SmolStr = format!("__a{i}").into();
			if let Some(tmp) = ctx.local_tmp_dict.get(param) {
				if tmp != &arg_slot {
					passed_arg_names.push((param.clone(), arg_slot.clone()));
					let value = self.out.push_expr(ExprKind::Variable { name: arg_slot, index: None });
					out.push(self.out.push_stmt(StmtKind::Assign {
						name: tmp.clone(),
						index: None,
						op: "=".into(),
						value: Some(value),
					}));
				}
			}
		}

		if self.pragmas.show_trace {
			out.push(self.emit_entry_trace(name, &passed_arg_names));
		}

		out.extend(self.lower_stmt(body, &mut ctx)?);

		out.push(self.out.push_stmt(StmtKind::Label { name: FnRegistry::epilogue_label(index) }));
		if use_trampoline {
			#[allow(clippy::cast_possible_truncation)]
			let count = saved.len() as u32;
			// Rewind SP past the pushed block before entering the trampoline, then rewind it a
			// second time after the trampoline returns, so the caller's view of `__sp` matches a
			// plain sequence of direct pops (spec §9 Open Question 1; ported from
			// `original_source/mutators.py`'s `_process_fn`).
			out.extend(self.emit_assign_literal_op("__sp", "+=", i64::from(count)));
			out.extend(self.emit_assign_literal("__addr", i64::from(index)));
			out.push(self.out.push_stmt(StmtKind::Goto { label: FnRegistry::pop_tmps_label(count) }));
			out.push(self.out.push_stmt(StmtKind::Label { name: FnRegistry::pop_tmps_end_label(index) }));
			out.extend(self.emit_assign_literal_op("__sp", "+=", i64::from(count)));
		} else {
			for tmp in saved.iter().rev() {
				out.extend(self.emit_pop(tmp.clone()));
			}
		}

		if self.pragmas.show_trace {
			out.push(self.emit_return_trace(name));
		}

		out.extend(self.emit_dispatch(name, index));
		Ok(out)
	}

	fn function_has_nested_calls(&self, name: &str) -> bool {
		self.calls_made.get(name).is_some_and(|c| !c.is_empty())
	}

	fn emit_dispatch(&mut self, name: &str, index: u32) -> Vec<StmtId> {
		let sites = self.registry.call_sites_for(name).into_iter().cloned().collect::<Vec<_>>();
		let mut out = Vec::new();
		let addr_slot: SmolStr = "__addr".into();
		if self.total_call_sites.get(name).copied() == Some(1) {
			if let Some(site) = sites.first() {
				out.push(self.out.push_stmt(StmtKind::Goto { label: FnRegistry::return_point_label(site.k) }));
			}
			return out;
		}
		out.extend(self.emit_pop(addr_slot.clone()));
		for site in &sites {
			let addr_var = self.out.push_expr(ExprKind::Variable { name: addr_slot.clone(), index: None });
			let k_lit = self.out.push_expr(ExprKind::Literal(LiteralKind::Number(i64::from(site.k))));
			let cmp = self.out.push_expr(ExprKind::Group(vec![
				addr_var,
				self.out.push_expr(ExprKind::Operator("==".into())),
				k_lit,
			]));
			let target = self.out.push_stmt(StmtKind::Goto { label: FnRegistry::return_point_label(site.k) });
			out.push(self.out.push_stmt(StmtKind::If { cond: cmp, then_branch: target, else_branch: self.empty() }));
		}
		out.push(self.out.push_stmt(StmtKind::Goto { label: "__err_bad_addr".into() }));
		let _ = index;
		out
	}

	fn empty(&mut self) -> StmtId {
		self.out.push_stmt(StmtKind::Empty)
	}

	// ---- stack primitives ------------------------------------------------

	fn emit_push(&mut self, tmp: SmolStr) -> Vec<StmtId> {
		let mut out = Vec::new();
		let sp = self.out.push_expr(ExprKind::Variable { name: "__sp".into(), index: None });
		let one = self.out.push_expr(ExprKind::Literal(LiteralKind::Number(1)));
		let decremented = self.out.push_expr(ExprKind::Group(vec![sp, self.out.push_expr(ExprKind::Operator("-".into())), one]));
		out.push(self.out.push_stmt(StmtKind::Assign { name: "__sp".into(), index: None, op: "=".into(), value: Some(decremented) }));
		let sp_val = self.out.push_expr(ExprKind::Variable { name: "__sp".into(), index: None });
		let value = self.out.push_expr(ExprKind::Variable { name: tmp, index: None });
		out.push(self.out.push_stmt(StmtKind::Assign { name: "ram".into(), index: Some(sp_val), op: "=".into(), value: Some(value) }));
		if self.pragmas.safe_stack {
			out.extend(self.emit_bounds_check_low());
		}
		out
	}

	fn emit_pop(&mut self, tmp: SmolStr) -> Vec<StmtId> {
		let mut out = Vec::new();
		if self.pragmas.safe_stack {
			out.extend(self.emit_bounds_check_high());
		}
		let sp_val = self.out.push_expr(ExprKind::Variable { name: "__sp".into(), index: None });
		let ram_read = self.out.push_expr(ExprKind::Variable { name: "ram".into(), index: Some(sp_val) });
		out.push(self.out.push_stmt(StmtKind::Assign { name: tmp, index: None, op: "=".into(), value: Some(ram_read) }));
		let sp = self.out.push_expr(ExprKind::Variable { name: "__sp".into(), index: None });
		let one = self.out.push_expr(ExprKind::Literal(LiteralKind::Number(1)));
		let incremented = self.out.push_expr(ExprKind::Group(vec![sp, self.out.push_expr(ExprKind::Operator("+".into())), one]));
		out.push(self.out.push_stmt(StmtKind::Assign { name: "__sp".into(), index: None, op: "=".into(), value: Some(incremented) }));
		out
	}

	fn emit_bounds_check_low(&mut self) -> Vec<StmtId> {
		let sp = self.out.push_expr(ExprKind::Variable { name: "__sp".into(), index: None });
		let start = self.out.push_expr(ExprKind::Literal(LiteralKind::Number(self.pragmas.stack_start)));
		let cond = self.out.push_expr(ExprKind::Group(vec![sp, self.out.push_expr(ExprKind::Operator("<".into())), start]));
		let target = self.out.push_stmt(StmtKind::Goto { label: "__err_so".into() });
		let empty = self.out.push_stmt(StmtKind::Empty);
		vec![self.out.push_stmt(StmtKind::If { cond, then_branch: target, else_branch: empty })]
	}

	fn emit_assign_literal(&mut self, name: &'static str, value: i64) -> Vec<StmtId> {
		self.emit_assign_literal_op(name, "=", value)
	}

	fn emit_assign_literal_op(&mut self, name: &'static str, op: &'static str, value: i64) -> Vec<StmtId> {
		let literal = self.out.push_expr(ExprKind::Literal(LiteralKind::Number(value)));
		vec![self.out.push_stmt(StmtKind::Assign { name: name.into(), index: None, op: op.into(), value: Some(literal) })]
	}

	/// `__sp -= 1; [bounds check]; name = ram[__sp];` — a pop that walks the stack in the same
	/// (descending) direction a push did, used only by the shared pop trampoline so it can replay
	/// a block of pushes in their original order (spec §4.5.3 step 6, §9 Open Question 1).
	fn emit_reverse_pop(&mut self, tmp: SmolStr) -> Vec<StmtId> {
		let mut out = Vec::new();
		let sp = self.out.push_expr(ExprKind::Variable { name: "__sp".into(), index: None });
		let one = self.out.push_expr(ExprKind::Literal(LiteralKind::Number(1)));
		let decremented = self.out.push_expr(ExprKind::Group(vec![sp, self.out.push_expr(ExprKind::Operator("-".into())), one]));
		out.push(self.out.push_stmt(StmtKind::Assign { name: "__sp".into(), index: None, op: "=".into(), value: Some(decremented) }));
		if self.pragmas.safe_stack {
			out.extend(self.emit_bounds_check_low());
		}
		let sp_val = self.out.push_expr(ExprKind::Variable { name: "__sp".into(), index: None });
		let ram_read = self.out.push_expr(ExprKind::Variable { name: "ram".into(), index: Some(sp_val) });
		out.push(self.out.push_stmt(StmtKind::Assign { name: tmp, index: None, op: "=".into(), value: Some(ram_read) }));
		out
	}

	/// Builds the one shared push and pop trampoline block, shared by every callee whose
	/// save-count met the threshold, keyed purely by *how many* tmps are saved rather than which
	/// ones (spec §4.5.3 step 3; ported from `original_source/mutators.py`'s
	/// `_build_pushpop_trampolines`). Entering `__push_tmps_<m>`/`__pop_tmps_<m>` falls through a
	/// suffix of the global tmp list of length `m`, so callers only get a correct save/restore
	/// when their changed tmps are exactly that trailing prefix of the pool — a known limitation
	/// inherited from the source (DESIGN.md), not something this port attempts to fix.
	fn emit_pushpop_trampolines(&mut self) -> Vec<StmtId> {
		if self.trampoline_sites.is_empty() {
			return vec![];
		}
		let mut used_tmps = self.tmp_pool.get_names();
		used_tmps.reverse();
		#[allow(clippy::cast_possible_truncation)]
		let total = used_tmps.len() as u32;

		let mut sites = self.trampoline_sites.clone();
		sites.sort_by_key(|&(index, _)| index);

		let mut out = Vec::new();
		out.push(self.out.push_stmt(StmtKind::Comment("Tmp push trampoline".into())));
		for (i, tmp) in used_tmps.iter().enumerate() {
			#[allow(clippy::cast_possible_truncation)]
			let label_count = total - i as u32;
			out.push(self.out.push_stmt(StmtKind::Label { name: FnRegistry::push_tmps_label(label_count) }));
			out.extend(self.emit_push(tmp.clone()));
		}
		for &(index, _) in &sites {
			let addr_var = self.out.push_expr(ExprKind::Variable { name: "__addr".into(), index: None });
			let lit = self.out.push_expr(ExprKind::Literal(LiteralKind::Number(i64::from(index))));
			let cmp = self.out.push_expr(ExprKind::Group(vec![addr_var, self.out.push_expr(ExprKind::Operator("==".into())), lit]));
			let target = self.out.push_stmt(StmtKind::Goto { label: FnRegistry::push_tmps_end_label(index) });
			out.push(self.out.push_stmt(StmtKind::If { cond: cmp, then_branch: target, else_branch: self.empty() }));
		}
		out.push(self.out.push_stmt(StmtKind::Goto { label: "__err_bad_addr".into() }));

		out.push(self.out.push_stmt(StmtKind::Comment("Tmp pop trampoline".into())));
		for (i, tmp) in used_tmps.iter().enumerate() {
			#[allow(clippy::cast_possible_truncation)]
			let label_count = total - i as u32;
			out.push(self.out.push_stmt(StmtKind::Label { name: FnRegistry::pop_tmps_label(label_count) }));
			out.extend(self.emit_reverse_pop(tmp.clone()));
		}
		for &(index, _) in &sites {
			let addr_var = self.out.push_expr(ExprKind::Variable { name: "__addr".into(), index: None });
			let lit = self.out.push_expr(ExprKind::Literal(LiteralKind::Number(i64::from(index))));
			let cmp = self.out.push_expr(ExprKind::Group(vec![addr_var, self.out.push_expr(ExprKind::Operator("==".into())), lit]));
			let target = self.out.push_stmt(StmtKind::Goto { label: FnRegistry::pop_tmps_end_label(index) });
			out.push(self.out.push_stmt(StmtKind::If { cond: cmp, then_branch: target, else_branch: self.empty() }));
		}
		out.push(self.out.push_stmt(StmtKind::Goto { label: "__err_bad_addr".into() }));
		out
	}

	fn emit_bounds_check_high(&mut self) -> Vec<StmtId> {
		let sp = self.out.push_expr(ExprKind::Variable { name: "__sp".into(), index: None });
		let end = self.out.push_expr(ExprKind::Literal(LiteralKind::Number(self.pragmas.stack_end)));
		let cond = self.out.push_expr(ExprKind::Group(vec![sp, self.out.push_expr(ExprKind::Operator(">".into())), end]));
		let target = self.out.push_stmt(StmtKind::Goto { label: "__err_su".into() });
		let empty = self.out.push_stmt(StmtKind::Empty);
		vec![self.out.push_stmt(StmtKind::If { cond, then_branch: target, else_branch: empty })]
	}

	// ---- statement lowering --------------------------------------------

	#[allow(clippy::too_many_lines)]
	fn lower_stmt(&mut self, id: StmtId, ctx: &mut FnCtx) -> Result<Vec<StmtId>, Box<LoweringError>> {
		match self.input.stmt(id).kind.clone() {
			StmtKind::Empty | StmtKind::Comment(_) => {
				if let StmtKind::Comment(text) = &self.input.stmt(id).kind {
					return Ok(vec![self.out.push_stmt(StmtKind::Comment(text.clone()))]);
				}
				Ok(vec![])
			},
			StmtKind::Block(stmts) => {
				let mut out = Vec::new();
				for s in stmts {
					out.extend(self.lower_stmt(s, ctx)?);
				}
				Ok(out)
			},
			StmtKind::VarDecl { name, init } => {
				let tmp = self.tmp_pool.acquire();
				ctx.changed_tmps.insert(tmp.clone());
				ctx.local_tmp_dict.insert(name, tmp.clone());
				let mut out = Vec::new();
				if let Some(expr) = init {
					let (pre, value) = self.lower_expr(expr, ctx)?;
					out.extend(pre);
					out.push(self.out.push_stmt(StmtKind::Assign { name: tmp, index: None, op: "=".into(), value: Some(value) }));
				}
				Ok(out)
			},
			StmtKind::Assign { name, index, op, value } => {
				let resolved = self.resolve_variable(&name, ctx)?;
				let mut out = Vec::new();
				let lowered_index = match index {
					Some(i) => {
						let (pre, v) = self.lower_expr(i, ctx)?;
						out.extend(pre);
						Some(v)
					},
					None => None,
				};
				let lowered_value = match value {
					Some(v) => {
						let (pre, lv) = self.lower_expr(v, ctx)?;
						out.extend(pre);
						Some(lv)
					},
					None => None,
				};
				out.push(self.out.push_stmt(StmtKind::Assign { name: resolved, index: lowered_index, op, value: lowered_value }));
				Ok(out)
			},
			StmtKind::Call { name, args } => {
				if name == "reset" {
					return Ok(vec![self.out.push_stmt(StmtKind::Goto { label: "__reset".into() })]);
				}
				if name == "end" {
					self.halt_needed = true;
					return Ok(vec![self.out.push_stmt(StmtKind::Goto { label: "__halt".into() })]);
				}
				if name == "push" && args.len() == 1 {
					let (mut pre, v) = self.lower_expr(args[0], ctx)?;
					let tmp = self.tmp_pool.acquire();
					ctx.changed_tmps.insert(tmp.clone());
					pre.push(self.out.push_stmt(StmtKind::Assign { name: tmp.clone(), index: None, op: "=".into(), value: Some(v) }));
					pre.extend(self.emit_push(tmp.clone()));
					self.tmp_pool.release(&tmp);
					return Ok(pre);
				}
				if name == "pop" && args.len() == 1 {
					let target = match &self.input.expr(args[0]).kind {
						ExprKind::Variable { name, index: None } => name.clone(),
						_ =>
							return Err(Box::new(LoweringError::PopToNonVariable {
								src: self.src.named_source(),
								location: self.err_span(),
							})),
					};
					let resolved = self.resolve_variable(&target, ctx)?;
					return Ok(self.emit_pop(resolved));
				}
				if BUILTIN_FUNCTIONS.contains(&name.as_str()) {
					let mut out = Vec::new();
					let mut lowered_args = Vec::new();
					for a in args {
						let (pre, v) = self.lower_expr(a, ctx)?;
						out.extend(pre);
						lowered_args.push(self.hoist_if_group(v, &mut out, ctx));
					}
					out.push(self.out.push_stmt(StmtKind::Call { name, args: lowered_args }));
					return Ok(out);
				}
				self.lower_user_call(&name, &args, ctx, None)
			},
			StmtKind::If { cond, then_branch, else_branch } => self.lower_if(cond, then_branch, else_branch, ctx),
			StmtKind::While { cond, body } => self.lower_while(cond, body, ctx),
			StmtKind::DoWhile { body, cond } => self.lower_do_while(body, cond, ctx),
			StmtKind::For { init, cond, iter, body } => self.lower_for(&init, cond, &iter, body, ctx),
			StmtKind::Switch { value, body } => self.lower_switch(value, body, ctx),
			StmtKind::Break => {
				let Some(label) = ctx.break_stack.last().cloned() else {
					return Err(Box::new(LoweringError::BreakContinueOutsideScope {
						keyword: "break",
						switch_hint: "",
						src: self.src.named_source(),
						location: self.err_span(),
					}));
				};
				Ok(vec![self.out.push_stmt(StmtKind::Goto { label })])
			},
			StmtKind::Continue => {
				let Some(label) = ctx.continue_stack.last().cloned() else {
					return Err(Box::new(LoweringError::BreakContinueOutsideScope {
						keyword: "continue",
						switch_hint: " (continue cannot target a switch)",
						src: self.src.named_source(),
						location: self.err_span(),
					}));
				};
				Ok(vec![self.out.push_stmt(StmtKind::Goto { label })])
			},
			StmtKind::Goto { label } => Ok(vec![self.out.push_stmt(StmtKind::Goto { label: self.namespace(ctx, &label) })]),
			StmtKind::Label { name } => Ok(vec![self.out.push_stmt(StmtKind::Label { name: self.namespace(ctx, &name) })]),
			StmtKind::Return { value } => {
				let mut out = Vec::new();
				if let Some(v) = value {
					if matches!(self.input.expr(v).kind, ExprKind::Literal(LiteralKind::Str(_))) {
						return Err(Box::new(LoweringError::StringReturn {
							src: self.src.named_source(),
							location: self.err_span(),
						}));
					}
					let (pre, lowered) = self.lower_expr(v, ctx)?;
					out.extend(pre);
					let dest = ctx.rval_target.clone().unwrap_or_else(|| "__rval".into());
					out.push(self.out.push_stmt(StmtKind::Assign { name: dest, index: None, op: "=".into(), value: Some(lowered) }));
				}
				let end_label = if let Some(inline_end) = &ctx.inline_end_label {
					inline_end.clone()
				} else if ctx.naked {
					match ctx.tag.as_str() {
						"main" => FnRegistry::MAIN_LOOP_END.into(),
						_ => FnRegistry::INIT_END.into(),
					}
				} else {
					FnRegistry::epilogue_label(ctx.fn_index.unwrap_or(0))
				};
				out.push(self.out.push_stmt(StmtKind::Goto { label: end_label }));
				Ok(out)
			},
			StmtKind::FunctionDecl { .. } | StmtKind::Case { .. } | StmtKind::Default => Ok(vec![]),
		}
	}

	fn namespace(&self, ctx: &FnCtx, label: &str) -> SmolStr {
		format!("__fn{}L_{label}", ctx.tag).into()
	}

	fn resolve_variable(&self, name: &str, ctx: &FnCtx) -> Result<SmolStr, Box<LoweringError>> {
		if let Some(tmp) = ctx.local_tmp_dict.get(name) {
			return Ok(tmp.clone());
		}
		if let Some(renamed) = self.global_rename.get(name) {
			return Ok(renamed.clone());
		}
		if name == "ram" || name == "sys" || name == "__rval" || name == "__sp" || name == "__addr" {
			return Ok(name.into());
		}
		Err(Box::new(LoweringError::UndefinedVariable { name: name.to_string(), src: self.src.named_source(), location: self.err_span() }))
	}

	fn lower_if(
		&mut self,
		cond: ExprId,
		then_branch: StmtId,
		else_branch: StmtId,
		ctx: &mut FnCtx,
	) -> Result<Vec<StmtId>, Box<LoweringError>> {
		if let Some(value) = self.fold_const(cond) {
			let mut out = Vec::new();
			out.push(self.out.push_stmt(StmtKind::Comment(format!("constant condition folded to {value}").into())));
			if value != 0 {
				out.extend(self.lower_stmt(then_branch, ctx)?);
			} else {
				out.extend(self.lower_stmt(else_branch, ctx)?);
			}
			return Ok(out);
		}

		let (mut out, cond) = self.lower_expr(cond, ctx)?;
		let has_else = !matches!(self.input.stmt(else_branch).kind, StmtKind::Empty);

		if !has_else && matches!(self.input.stmt(then_branch).kind, StmtKind::Goto { .. }) {
			let then_ids = self.lower_stmt(then_branch, ctx)?;
			let then_id = then_ids.first().copied().unwrap_or_else(|| self.empty());
			let empty = self.empty();
			out.push(self.out.push_stmt(StmtKind::If { cond, then_branch: then_id, else_branch: empty }));
			return Ok(out);
		}

		let lb = self.label_pool.fresh("if_end");
		let else_label = if has_else { self.label_pool.fresh("if_else") } else { lb.clone() };

		let goto_else = self.out.push_stmt(StmtKind::Goto { label: else_label.clone() });
		let not_cond = self.negate(cond);
		let empty = self.empty();
		out.push(self.out.push_stmt(StmtKind::If { cond: not_cond, then_branch: goto_else, else_branch: empty }));
		out.extend(self.lower_stmt(then_branch, ctx)?);

		if has_else {
			out.push(self.out.push_stmt(StmtKind::Goto { label: lb.clone() }));
			out.push(self.out.push_stmt(StmtKind::Label { name: else_label }));
			out.extend(self.lower_stmt(else_branch, ctx)?);
		}
		out.push(self.out.push_stmt(StmtKind::Label { name: lb }));
		Ok(out)
	}

	fn negate(&mut self, cond: ExprId) -> ExprId {
		let not_op = self.out.push_expr(ExprKind::Operator("!".into()));
		self.out.push_expr(ExprKind::Group(vec![not_op, cond]))
	}

	fn lower_while(&mut self, cond: ExprId, body: StmtId, ctx: &mut FnCtx) -> Result<Vec<StmtId>, Box<LoweringError>> {
		let lc = self.label_pool.fresh("while_test");
		let lk = self.label_pool.fresh("while_break");
		let mut out = Vec::new();
		out.push(self.out.push_stmt(StmtKind::Label { name: lc.clone() }));
		let (pre, cond_val) = self.lower_expr(cond, ctx)?;
		out.extend(pre);
		let not_cond = self.negate(cond_val);
		let goto_break = self.out.push_stmt(StmtKind::Goto { label: lk.clone() });
		let empty = self.empty();
		out.push(self.out.push_stmt(StmtKind::If { cond: not_cond, then_branch: goto_break, else_branch: empty }));
		ctx.break_stack.push(lk.clone());
		ctx.continue_stack.push(lc.clone());
		out.extend(self.lower_stmt(body, ctx)?);
		ctx.break_stack.pop();
		ctx.continue_stack.pop();
		out.push(self.out.push_stmt(StmtKind::Goto { label: lc }));
		out.push(self.out.push_stmt(StmtKind::Label { name: lk }));
		Ok(out)
	}

	fn lower_do_while(&mut self, body: StmtId, cond: ExprId, ctx: &mut FnCtx) -> Result<Vec<StmtId>, Box<LoweringError>> {
		let lb = self.label_pool.fresh("do_body");
		let lc = self.label_pool.fresh("do_test");
		let lk = self.label_pool.fresh("do_break");
		let mut out = Vec::new();
		out.push(self.out.push_stmt(StmtKind::Label { name: lb.clone() }));
		ctx.break_stack.push(lk.clone());
		ctx.continue_stack.push(lc.clone());
		out.extend(self.lower_stmt(body, ctx)?);
		ctx.break_stack.pop();
		ctx.continue_stack.pop();
		out.push(self.out.push_stmt(StmtKind::Label { name: lc }));
		let (pre, cond_val) = self.lower_expr(cond, ctx)?;
		out.extend(pre);
		let goto_body = self.out.push_stmt(StmtKind::Goto { label: lb });
		let empty = self.empty();
		out.push(self.out.push_stmt(StmtKind::If { cond: cond_val, then_branch: goto_body, else_branch: empty }));
		out.push(self.out.push_stmt(StmtKind::Label { name: lk }));
		Ok(out)
	}

	fn lower_for(
		&mut self,
		init: &[StmtId],
		cond: ExprId,
		iter: &[StmtId],
		body: StmtId,
		ctx: &mut FnCtx,
	) -> Result<Vec<StmtId>, Box<LoweringError>> {
		let lc = self.label_pool.fresh("for_test");
		let lit = self.label_pool.fresh("for_cont");
		let lk = self.label_pool.fresh("for_break");
		let mut out = Vec::new();
		for &s in init {
			out.extend(self.lower_stmt(s, ctx)?);
		}
		out.push(self.out.push_stmt(StmtKind::Label { name: lc.clone() }));
		let (pre, cond_val) = self.lower_expr(cond, ctx)?;
		out.extend(pre);
		let not_cond = self.negate(cond_val);
		let goto_break = self.out.push_stmt(StmtKind::Goto { label: lk.clone() });
		let empty = self.empty();
		out.push(self.out.push_stmt(StmtKind::If { cond: not_cond, then_branch: goto_break, else_branch: empty }));
		ctx.break_stack.push(lk.clone());
		ctx.continue_stack.push(lit.clone());
		out.extend(self.lower_stmt(body, ctx)?);
		ctx.break_stack.pop();
		ctx.continue_stack.pop();
		out.push(self.out.push_stmt(StmtKind::Label { name: lit }));
		for &s in iter {
			out.extend(self.lower_stmt(s, ctx)?);
		}
		out.push(self.out.push_stmt(StmtKind::Goto { label: lc }));
		out.push(self.out.push_stmt(StmtKind::Label { name: lk }));
		Ok(out)
	}

	fn lower_switch(&mut self, value: ExprId, body: StmtId, ctx: &mut FnCtx) -> Result<Vec<StmtId>, Box<LoweringError>> {
		let (mut out, operand) = self.lower_expr(value, ctx)?;
		let operand = match self.out.expr(operand).kind.clone() {
			ExprKind::Variable { index: None, .. } => operand,
			_ => {
				let tmp = self.tmp_pool.acquire();
				ctx.changed_tmps.insert(tmp.clone());
				out.push(self.out.push_stmt(StmtKind::Assign { name: tmp.clone(), index: None, op: "=".into(), value: Some(operand) }));
				self.out.push_expr(ExprKind::Variable { name: tmp, index: None })
			},
		};

		let StmtKind::Block(cases) = self.input.stmt(body).kind.clone() else {
			let lk = self.label_pool.fresh("sw_break");
			ctx.break_stack.push(lk.clone());
			out.extend(self.lower_stmt(body, ctx)?);
			ctx.break_stack.pop();
			out.push(self.out.push_stmt(StmtKind::Label { name: lk }));
			return Ok(out);
		};

		let lk = self.label_pool.fresh("sw_break");
		ctx.break_stack.push(lk.clone());

		let case_count = cases.iter().filter(|&&s| matches!(self.input.stmt(s).kind, StmtKind::Case { .. })).count();
		// One entry label per case, plus one extra "all cases failed" label distinct from the
		// break label (spec §4.6; ported from `original_source/mutators.py`'s `_transform_switch`,
		// which keeps its rolling `l_next_case` separate from `l_break` and emits both at the end).
		let next_labels: Vec<SmolStr> = (0 ..= case_count).map(|_| self.label_pool.fresh("sw_case")).collect();

		let mut case_index = 0usize;
		let mut final_label_emitted = false;
		for &stmt in &cases {
			match self.input.stmt(stmt).kind.clone() {
				StmtKind::Case { value: k } => {
					out.push(self.out.push_stmt(StmtKind::Label { name: next_labels[case_index].clone() }));
					let next = next_labels[case_index + 1].clone();
					let (pre, k_val) = self.lower_expr(k, ctx)?;
					out.extend(pre);
					let neq = self.out.push_expr(ExprKind::Group(vec![
						operand,
						self.out.push_expr(ExprKind::Operator("!=".into())),
						k_val,
					]));
					let goto_next = self.out.push_stmt(StmtKind::Goto { label: next });
					let empty = self.empty();
					out.push(self.out.push_stmt(StmtKind::If { cond: neq, then_branch: goto_next, else_branch: empty }));
					case_index += 1;
				},
				StmtKind::Default => {
					out.push(self.out.push_stmt(StmtKind::Label { name: next_labels[case_index].clone() }));
					if case_index == case_count {
						final_label_emitted = true;
					}
				},
				_ => out.extend(self.lower_stmt(stmt, ctx)?),
			}
		}
		if !final_label_emitted {
			out.push(self.out.push_stmt(StmtKind::Label { name: next_labels[case_count].clone() }));
		}
		ctx.break_stack.pop();
		out.push(self.out.push_stmt(StmtKind::Label { name: lk }));
		Ok(out)
	}

	// ---- expression lowering --------------------------------------------

	fn lower_user_call(
		&mut self,
		name: &str,
		args: &[ExprId],
		ctx: &mut FnCtx,
		dest: Option<SmolStr>,
	) -> Result<Vec<StmtId>, Box<LoweringError>> {
		if !self.functions.contains_key(name) {
			return Err(Box::new(LoweringError::UndefinedFunction {
				name: name.to_string(),
				src: self.src.named_source(),
				location: self.err_span(),
			}));
		}
		if self.inline_set.contains(name) {
			return self.inline_call(name, args, ctx, dest);
		}

		let mut out = Vec::new();
		let saved_cursor = self.arg_pool.rewind();
		for &arg in args {
			let (pre, value) = self.lower_expr(arg, ctx)?;
			out.extend(pre);
			let slot = self.arg_pool.acquire();
			out.push(self.out.push_stmt(StmtKind::Assign { name: slot, index: None, op: "=".into(), value: Some(value) }));
		}
		self.arg_pool.restore(saved_cursor);

		let k = self.registry.record_call(name.into(), ctx.tag.clone());
		if self.total_call_sites.get(name).copied() != Some(1) {
			out.push(self.out.push_stmt(StmtKind::Call { name: "push".into(), args: vec![self.out.push_expr(ExprKind::Literal(LiteralKind::Number(i64::from(k))))] }));
		}
		let index = self.functions[name].index;
		out.push(self.out.push_stmt(StmtKind::Goto { label: FnRegistry::entry_label(index) }));
		out.push(self.out.push_stmt(StmtKind::Label { name: FnRegistry::return_point_label(k) }));

		if let Some(dest) = dest {
			let rval = self.out.push_expr(ExprKind::Variable { name: "__rval".into(), index: None });
			out.push(self.out.push_stmt(StmtKind::Assign { name: dest, index: None, op: "=".into(), value: Some(rval) }));
		}
		Ok(out)
	}

	fn inline_call(
		&mut self,
		name: &str,
		args: &[ExprId],
		ctx: &mut FnCtx,
		dest: Option<SmolStr>,
	) -> Result<Vec<StmtId>, Box<LoweringError>> {
		let def_params = self.functions[name].params.clone();
		let def_body = self.functions[name].body;
		let mut out = Vec::new();
		let mut inline_ctx = FnCtx { tag: ctx.tag.clone(), naked: ctx.naked, rval_target: dest, ..FnCtx::default() };
		for (param, &arg) in def_params.iter().zip(args) {
			let (pre, value) = self.lower_expr(arg, ctx)?;
			out.extend(pre);
			let tmp = self.tmp_pool.acquire();
			ctx.changed_tmps.insert(tmp.clone());
			out.push(self.out.push_stmt(StmtKind::Assign { name: tmp.clone(), index: None, op: "=".into(), value: Some(value) }));
			inline_ctx.local_tmp_dict.insert(param.clone(), tmp);
		}
		let end_label = self.namespace(&inline_ctx, &format!("{name}_end"));
		inline_ctx.inline_end_label = Some(end_label.clone());
		out.extend(self.lower_stmt(def_body, &mut inline_ctx)?);
		out.push(self.out.push_stmt(StmtKind::Label { name: end_label }));
		ctx.changed_tmps.extend(inline_ctx.changed_tmps);
		Ok(out)
	}

	/// Returns `(pre-statements, value expr)`; built-in arguments that are still `Group`s are
	/// left for the caller to hoist via [`Self::hoist_if_group`] (spec §4.5.6 bug workaround).
	fn lower_expr(&mut self, id: ExprId, ctx: &mut FnCtx) -> Result<(Vec<StmtId>, ExprId), Box<LoweringError>> {
		match self.input.expr(id).kind.clone() {
			ExprKind::Literal(lit) => Ok((vec![], self.out.push_expr(ExprKind::Literal(lit)))),
			ExprKind::Operator(op) => Ok((vec![], self.out.push_expr(ExprKind::Operator(op)))),
			ExprKind::Variable { name, index } => {
				let resolved = self.resolve_variable(&name, ctx)?;
				let mut out = Vec::new();
				let lowered_index = match index {
					Some(i) => {
						let (pre, v) = self.lower_expr(i, ctx)?;
						out.extend(pre);
						Some(self.hoist_if_group(v, &mut out, ctx))
					},
					None => None,
				};
				Ok((out, self.out.push_expr(ExprKind::Variable { name: resolved, index: lowered_index })))
			},
			ExprKind::Call { name, args } => {
				if BUILTIN_FUNCTIONS.contains(&name.as_str()) {
					let mut out = Vec::new();
					let mut lowered = Vec::new();
					for a in args {
						let (pre, v) = self.lower_expr(a, ctx)?;
						out.extend(pre);
						lowered.push(self.hoist_if_group(v, &mut out, ctx));
					}
					return Ok((out, self.out.push_expr(ExprKind::Call { name, args: lowered })));
				}
				let dest = self.tmp_pool.acquire();
				ctx.changed_tmps.insert(dest.clone());
				let out = self.lower_user_call(&name, &args, ctx, Some(dest.clone()))?;
				Ok((out, self.out.push_expr(ExprKind::Variable { name: dest, index: None })))
			},
			ExprKind::Group(children) => {
				let mut out = Vec::new();
				let mut lowered_children = Vec::new();
				for c in children {
					let (pre, v) = self.lower_expr(c, ctx)?;
					out.extend(pre);
					lowered_children.push(v);
				}
				let regrouped = self.regroup(lowered_children);
				let folded = if self.pragmas.simplify_expressions { self.try_fold(regrouped) } else { regrouped };
				Ok((out, folded))
			},
		}
	}

	/// Hoists a still-`Group`-shaped argument into a tmp — the target compiler miscompiles a
	/// bare `Group` used as a built-in's argument (spec §4.5.6, §9 workaround (a)).
	fn hoist_if_group(&mut self, value: ExprId, out: &mut Vec<StmtId>, ctx: &mut FnCtx) -> ExprId {
		if matches!(self.out.expr(value).kind, ExprKind::Group(_)) {
			let tmp = self.tmp_pool.acquire();
			ctx.changed_tmps.insert(tmp.clone());
			out.push(self.out.push_stmt(StmtKind::Assign { name: tmp.clone(), index: None, op: "=".into(), value: Some(value) }));
			self.out.push_expr(ExprKind::Variable { name: tmp, index: None })
		} else {
			value
		}
	}

	fn regroup(&mut self, items: Vec<ExprId>) -> ExprId {
		let mut items = items;
		for (ops, unary) in PRECEDENCE_LEVELS {
			let mut i = 0;
			while i < items.len() {
				let is_match = matches!(&self.out.expr(items[i]).kind, ExprKind::Operator(op) if ops.contains(&op.as_str()));
				if is_match {
					if *unary {
						if i + 1 < items.len() {
							let group = self.out.push_expr(ExprKind::Group(vec![items[i], items[i + 1]]));
							items.splice(i ..= i + 1, [group]);
							continue;
						}
					} else if i > 0 && i + 1 < items.len() {
						let group = self.out.push_expr(ExprKind::Group(vec![items[i - 1], items[i], items[i + 1]]));
						items.splice(i - 1 ..= i + 1, [group]);
						i = i.saturating_sub(1);
						continue;
					}
				}
				i += 1;
			}
		}
		items.into_iter().next().unwrap_or_else(|| self.out.push_expr(ExprKind::Literal(LiteralKind::Number(0))))
	}

	fn try_fold(&mut self, id: ExprId) -> ExprId {
		if let Some(value) = self.fold_const(id) {
			return self.out.push_expr(ExprKind::Literal(LiteralKind::Number(value)));
		}
		id
	}

	fn fold_const(&self, id: ExprId) -> Option<i64> {
		let text = self.stringify_for_fold(id)?;
		crate::directive::eval::eval_expr(&text)
	}

	fn stringify_for_fold(&self, id: ExprId) -> Option<std::string::String> {
		match &self.out.expr(id).kind {
			ExprKind::Literal(LiteralKind::Number(n)) => Some(n.to_string()),
			ExprKind::Operator(op) => Some(op.to_string()),
			ExprKind::Group(children) => {
				let mut parts = Vec::new();
				for &c in children {
					parts.push(self.stringify_for_fold(c)?);
				}
				Some(format!("({})", parts.join(" ")))
			},
			_ => None,
		}
	}

	// ---- final assembly --------------------------------------------------

	fn assemble_output(
		&mut self,
		global_inits: Vec<StmtId>,
		init_body: Option<Vec<StmtId>>,
		main_body: Vec<StmtId>,
		fn_blocks: Vec<Vec<StmtId>>,
	) {
		let mut globals = Vec::new();
		let user_globals = self.user_globals.clone();
		for (name, _) in &user_globals {
			let renamed = self.global_rename[name].clone();
			globals.push(self.out.push_stmt(StmtKind::VarDecl { name: renamed, init: None }));
		}
		for tmp in self.tmp_pool.get_names() {
			globals.push(self.out.push_stmt(StmtKind::VarDecl { name: tmp, init: None }));
		}
		for arg in self.arg_pool.get_names() {
			globals.push(self.out.push_stmt(StmtKind::VarDecl { name: arg, init: None }));
		}
		for helper in ["__rval", "__sp", "__addr"] {
			globals.push(self.out.push_stmt(StmtKind::VarDecl { name: helper.into(), init: None }));
		}

		let mut body = Vec::new();
		if self.pragmas.fullspeed {
			let index = self.out.push_expr(ExprKind::Literal(LiteralKind::Number(63)));
			let value = self.out.push_expr(ExprKind::Literal(LiteralKind::Number(128)));
			body.push(self.out.push_stmt(StmtKind::Assign { name: "sys".into(), index: Some(index), op: "=".into(), value: Some(value) }));
		}
		body.push(self.out.push_stmt(StmtKind::Label { name: "__reset".into() }));
		if self.pragmas.builtin_logging {
			body.extend(self.emit_info_echo("Program reset."));
		}
		body.push(self.out.push_stmt(StmtKind::Comment("FUNC: init()".into())));
		body.push(self.out.push_stmt(StmtKind::Label { name: "__init".into() }));
		if self.pragmas.builtin_logging {
			body.extend(self.emit_info_echo("Initialization..."));
		}
		let sp_init = self.out.push_expr(ExprKind::Group(vec![
			self.out.push_expr(ExprKind::Literal(LiteralKind::Number(self.pragmas.stack_end))),
			self.out.push_expr(ExprKind::Operator("+".into())),
			self.out.push_expr(ExprKind::Literal(LiteralKind::Number(1))),
		]));
		body.push(self.out.push_stmt(StmtKind::Assign { name: "__sp".into(), index: None, op: "=".into(), value: Some(sp_init) }));
		body.extend(global_inits);
		if let Some(init_body) = init_body {
			body.extend(init_body);
		}
		body.push(self.out.push_stmt(StmtKind::Label { name: FnRegistry::INIT_END.into() }));
		body.push(self.out.push_stmt(StmtKind::Comment("FUNC: main()".into())));
		if self.pragmas.builtin_logging {
			body.extend(self.emit_info_echo("main() started."));
		}
		body.push(self.out.push_stmt(StmtKind::Label { name: "__main_loop".into() }));
		body.extend(main_body);
		body.push(self.out.push_stmt(StmtKind::Label { name: FnRegistry::MAIN_LOOP_END.into() }));
		body.push(self.out.push_stmt(StmtKind::Goto { label: "__main_loop".into() }));
		for block in fn_blocks {
			body.extend(block);
		}
		body.extend(self.emit_error_labels());
		if self.halt_needed {
			body.push(self.out.push_stmt(StmtKind::Label { name: "__halt".into() }));
			body.push(self.out.push_stmt(StmtKind::Return { value: None }));
		}
		if self.pragmas.push_pop_trampolines {
			body.extend(self.emit_pushpop_trampolines());
		}

		let main_block = self.out.push_stmt(StmtKind::Block(body));
		let main_fn = self.out.push_stmt(StmtKind::FunctionDecl { name: "main".into(), params: vec![], body: main_block, inline: false });

		let mut top = globals;
		top.push(main_fn);
		self.out.top_level = top;
		let roots = self.out.top_level.clone();
		self.out.rebind_parents(&roots);
	}

	/// `echo("[INFO] <msg>");`, gated by the `builtin_logging` pragma (spec §6; ported from
	/// `original_source/mutators.py`'s `do_builtin_logging` echoes at `__reset`/`__init`/
	/// `__main_loop`).
	fn emit_info_echo(&mut self, msg: &str) -> Vec<StmtId> {
		let text = self.out.push_expr(ExprKind::Literal(LiteralKind::Str(format!("[INFO] {msg}").into())));
		vec![self.out.push_stmt(StmtKind::Call { name: "echo".into(), args: vec![text] })]
	}

	fn emit_error_labels(&mut self) -> Vec<StmtId> {
		let mut out = Vec::new();
		for (label, message) in [("__err_so", "stack overflow"), ("__err_su", "stack underflow"), ("__err_bad_addr", "bad return address")]
		{
			out.push(self.out.push_stmt(StmtKind::Label { name: label.into() }));
			if self.pragmas.builtin_error_logging {
				let msg = self.out.push_expr(ExprKind::Literal(LiteralKind::Str(format!("[ERROR] {message}").into())));
				out.push(self.out.push_stmt(StmtKind::Call { name: "echo".into(), args: vec![msg] }));
			}
			out.push(self.out.push_stmt(StmtKind::Goto { label: "__reset".into() }));
		}
		out
	}
}
