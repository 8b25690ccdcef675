//! Workflow automation engine
//!
//! Workflows pair a trigger (event, schedule or manual) with an ordered
//! chain of condition/action rules. The engine re-reads the chain on every
//! invocation, runs all rules without short-circuiting and records one row
//! in the append-only execution log.

pub mod actions;
pub mod conditions;
pub mod engine;
pub mod executor;
pub mod model;
pub mod registry;
pub mod store;

pub use actions::{ActionKind, ActionOutcome, Channel};
pub use conditions::{CompareOp, Condition};
pub use engine::{ExecutionSummary, WorkflowDraft, WorkflowEngine};
pub use executor::QueuedInvocation;
pub use model::{
    DomainEvent, ExecutionOutcome, TriggerType, WorkflowExecution, WorkflowFilter, WorkflowSummary,
};
pub use store::WorkflowStore;
