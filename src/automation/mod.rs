//! Process automations: stored trigger/condition/action rules evaluated on every
//! document change.

mod engine;
mod error;
mod rule;
mod template;

pub use engine::{AutomationEngine, Execution, ExecutionStatus, MAX_CHAIN_DEPTH};
pub use error::AutomationError;
pub use rule::{
  Action, AutomationRule, Recipient, RecipientSource, SelfTarget, Trigger, TriggerEvent,
  UpdateTarget,
};
pub use template::render;
