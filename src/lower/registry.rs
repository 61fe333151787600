//! Bidirectional function name/index maps plus the call-site table (spec §3 `FnRegistry`).

use std::collections::HashMap;

use smartstring::alias::String as SmolStr;

#[derive(Debug, Clone)]
pub struct CallSite {
	pub k: u32,
	pub callee: SmolStr,
	pub caller: SmolStr,
}

#[derive(Debug, Clone, Default)]
pub struct FnRegistry {
	name_to_index: HashMap<SmolStr, u32>,
	index_to_name: Vec<SmolStr>,
	pub call_sites: Vec<CallSite>,
	next_return_index: u32,
}

impl FnRegistry {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&mut self, name: SmolStr) -> u32 {
		if let Some(&i) = self.name_to_index.get(&name) {
			return i;
		}
		let i = self.index_to_name.len() as u32;
		self.index_to_name.push(name.clone());
		self.name_to_index.insert(name, i);
		i
	}

	#[must_use]
	pub fn index_of(&self, name: &str) -> Option<u32> {
		self.name_to_index.get(name).copied()
	}

	#[must_use]
	pub fn name_of(&self, index: u32) -> &str {
		&self.index_to_name[index as usize]
	}

	pub fn record_call(&mut self, callee: SmolStr, caller: SmolStr) -> u32 {
		let k = self.next_return_index;
		self.next_return_index += 1;
		self.call_sites.push(CallSite { k, callee, caller });
		k
	}

	#[must_use]
	pub fn call_sites_for(&self, callee: &str) -> Vec<&CallSite> {
		self.call_sites.iter().filter(|c| c.callee == callee).collect()
	}

	#[must_use]
	pub fn entry_label(index: u32) -> SmolStr {
		format!("__fn{index}").into()
	}

	#[must_use]
	pub fn epilogue_label(index: u32) -> SmolStr {
		format!("__fn{index}_end").into()
	}

	#[must_use]
	pub fn return_point_label(k: u32) -> SmolStr {
		format!("__rp{k}").into()
	}

	#[must_use]
	pub fn user_label(index: u32, user_name: &str) -> SmolStr {
		format!("__fn{index}L_{user_name}").into()
	}

	/// Shared push trampoline entry for a save-count of `n` changed tmps (spec §4.5.3 step 3).
	#[must_use]
	pub fn push_tmps_label(n: u32) -> SmolStr {
		format!("__push_tmps_{n}").into()
	}

	/// Shared reverse-pop trampoline entry for a save-count of `n` changed tmps.
	#[must_use]
	pub fn pop_tmps_label(n: u32) -> SmolStr {
		format!("__pop_tmps_{n}").into()
	}

	#[must_use]
	pub fn push_tmps_end_label(index: u32) -> SmolStr {
		format!("__fn{index}_push_tmps_end").into()
	}

	#[must_use]
	pub fn pop_tmps_end_label(index: u32) -> SmolStr {
		format!("__fn{index}_pop_tmps_end").into()
	}

	pub const INIT_END: &'static str = "__init_end";
	pub const MAIN_LOOP_END: &'static str = "__main_loop_end";
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn registers_are_stable() {
		let mut r = FnRegistry::new();
		let a = r.register("f".into());
		let b = r.register("g".into());
		let a2 = r.register("f".into());
		assert_eq!(a, a2);
		assert_ne!(a, b);
		assert_eq!(r.name_of(a), "f");
	}

	#[test]
	fn call_sites_for_filters_by_callee() {
		let mut r = FnRegistry::new();
		r.record_call("f".into(), "main".into());
		r.record_call("g".into(), "main".into());
		r.record_call("f".into(), "init".into());
		assert_eq!(r.call_sites_for("f").len(), 2);
	}
}
