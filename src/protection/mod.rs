//! Protection Module
//!
//! Live protection-state read, deterministic planning, tag mutation and
//! reporting for one cluster pass.

pub mod engine;
pub mod reader;
pub mod reconciler;
pub mod report;

pub use engine::{
    execute, plan, ActionKind, ActionOutcome, ActionRecord, ProtectionPlan, ProtectionState,
};
pub use reader::{GroupClassification, ProtectionStateReader, ReadStatus};
pub use reconciler::Reconciler;
pub use report::{effective_keeper, ActionTaken, GroupResult, GroupStatus, RunReport, RunStatus};
