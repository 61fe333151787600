//! The lowering engine: pools, the function registry, the `Lowerer` itself, and the
//! dead-code-removal pass that runs over its output (spec §4.5, §4.6).

pub mod deadcode;
pub mod engine;
pub mod pools;
pub mod registry;

pub use engine::Lowerer;
pub use pools::{ArgPool, LabelPool, TmpPool};
pub use registry::{CallSite, FnRegistry};
