mod matcher;
mod structured;

pub use matcher::{lookup, matches};
pub use structured::{FilterError, StructuredCompiler};
