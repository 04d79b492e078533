mod change;
mod document;
mod filter;
mod query;

pub use change::{Change, ChangeOperation};
pub use document::Document;
pub use filter::{FieldCondition, FilterOperator, LogicalFilter, StructuredFilter};
pub use query::{FindOptions, OrderBySpec, OrderDirection};
