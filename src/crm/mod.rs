mod error;
mod kind;
mod repository;
pub mod schema;
mod workflows;

pub use error::{CrmError, ValidationError};
pub use kind::{EntityKind, Reference};
pub use repository::{timestamp, PartnerScope, Repository};
pub use workflows::{lose_opportunity, mark_notification_read, win_opportunity, WonOpportunity};
