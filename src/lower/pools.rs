//! Named-slot generators shared by tmps, args, and labels (spec §3, §9 "Unified pool
//! abstraction"). All three are the same bookkeeping shape — a prefix, a monotonic counter,
//! and (for tmps/args only) a free-list of released slots to reuse.

use std::collections::BTreeSet;

use smartstring::alias::String as SmolStr;

/// A generator of `prefix0, prefix1, …` slot names with optional reuse of released slots.
#[derive(Debug, Clone)]
pub struct SlotPool {
	prefix: &'static str,
	next: u32,
	free: BTreeSet<u32>,
	all: BTreeSet<u32>,
	reuse: bool,
}

impl SlotPool {
	#[must_use]
	pub fn new(prefix: &'static str, reuse: bool) -> Self {
		Self { prefix, next: 0, free: BTreeSet::new(), all: BTreeSet::new(), reuse }
	}

	/// Returns a free slot (reusing a released one when `reuse` is enabled) or grows the pool.
	pub fn acquire(&mut self) -> SmolStr {
		let slot = if self.reuse {
			if let Some(&n) = self.free.iter().next() {
				self.free.remove(&n);
				n
			} else {
				let n = self.next;
				self.next += 1;
				n
			}
		} else {
			let n = self.next;
			self.next += 1;
			n
		};
		self.all.insert(slot);
		self.name(slot)
	}

	/// Releases a slot previously returned by [`Self::acquire`] back to the free list.
	pub fn release(&mut self, name: &str) {
		if !self.reuse {
			return;
		}
		if let Some(n) = self.index_of(name) {
			self.free.insert(n);
		}
	}

	fn index_of(&self, name: &str) -> Option<u32> {
		name.strip_prefix(self.prefix)?.parse().ok()
	}

	fn name(&self, n: u32) -> SmolStr {
		format!("{}{n}", self.prefix).into()
	}

	/// Every slot name ever handed out, in ascending numeric order (so `__t9` sorts before
	/// `__t10` — spec §3's reproducible-output requirement).
	#[must_use]
	pub fn get_names(&self) -> Vec<SmolStr> {
		self.all.iter().map(|&n| self.name(n)).collect()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.all.is_empty()
	}
}

#[derive(Debug, Clone)]
pub struct TmpPool(SlotPool);

impl TmpPool {
	#[must_use]
	pub fn new() -> Self {
		Self(SlotPool::new("__t", true))
	}

	pub fn acquire(&mut self) -> SmolStr {
		self.0.acquire()
	}

	pub fn release(&mut self, name: &str) {
		self.0.release(name);
	}

	#[must_use]
	pub fn get_names(&self) -> Vec<SmolStr> {
		self.0.get_names()
	}
}

impl Default for TmpPool {
	fn default() -> Self {
		Self::new()
	}
}

/// An ordered sequence `__a0, __a1, …` reused at every call site (spec §3).
#[derive(Debug, Clone)]
pub struct ArgPool {
	inner: SlotPool,
	cursor: u32,
	high_water: u32,
}

impl ArgPool {
	#[must_use]
	pub fn new() -> Self {
		Self { inner: SlotPool::new("__a", false), cursor: 0, high_water: 0 }
	}

	/// Resets the argument cursor to slot 0 at the start of a call site's argument lowering.
	pub fn rewind(&mut self) -> u32 {
		let prev = self.cursor;
		self.cursor = 0;
		prev
	}

	/// Acquires the next positional argument slot, extending the pool if this call uses more
	/// arguments than any previous call.
	pub fn acquire(&mut self) -> SmolStr {
		let idx = self.cursor;
		self.cursor += 1;
		if idx >= self.high_water {
			self.high_water = idx + 1;
			self.inner.acquire();
		}
		format!("__a{idx}").into()
	}

	/// Restores the cursor saved by [`Self::rewind`] once the call site has been emitted.
	pub fn restore(&mut self, saved: u32) {
		self.cursor = saved;
	}

	#[must_use]
	pub fn get_names(&self) -> Vec<SmolStr> {
		self.inner.get_names()
	}
}

impl Default for ArgPool {
	fn default() -> Self {
		Self::new()
	}
}

/// `__<prefix>_<n>` label generator plus a registry of every known label (generated and user).
#[derive(Debug, Clone, Default)]
pub struct LabelPool {
	counters: std::collections::HashMap<&'static str, u32>,
	known: std::collections::HashSet<SmolStr>,
}

impl LabelPool {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn fresh(&mut self, prefix: &'static str) -> SmolStr {
		let n = self.counters.entry(prefix).or_insert(0);
		let name: SmolStr = format!("__{prefix}_{n}").into();
		*n += 1;
		self.known.insert(name.clone());
		name
	}

	pub fn register(&mut self, name: SmolStr) {
		self.known.insert(name);
	}

	#[must_use]
	pub fn is_known(&self, name: &str) -> bool {
		self.known.contains(name)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn tmp_pool_reuses_released_slots() {
		let mut pool = TmpPool::new();
		let a = pool.acquire();
		let b = pool.acquire();
		pool.release(&a);
		let c = pool.acquire();
		assert_eq!(a, c);
		assert_ne!(b, c);
	}

	#[test]
	fn arg_pool_rewind_restore_round_trips() {
		let mut pool = ArgPool::new();
		let saved = pool.rewind();
		let a0 = pool.acquire();
		let a1 = pool.acquire();
		assert_eq!(a0.as_str(), "__a0");
		assert_eq!(a1.as_str(), "__a1");
		pool.restore(saved);
		assert_eq!(pool.get_names().len(), 2);
	}

	#[test]
	fn label_pool_natural_sort_order() {
		let mut pool = LabelPool::new();
		for _ in 0 .. 11 {
			pool.fresh("for_test");
		}
		assert!(pool.is_known("__for_test_9"));
		assert!(pool.is_known("__for_test_10"));
	}
}
