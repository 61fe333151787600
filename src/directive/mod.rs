//! The directive / macro processing layer (spec §4.1).

pub mod eval;
pub mod macros;
pub mod processor;
pub mod reader;

pub use macros::{BodyFragment, Macro, MacroKind, MacroTable};
pub use processor::{CapturedPragma, DirectiveProcessor};
pub use reader::Reader;
