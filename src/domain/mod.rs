//! Domain types for stackctl.
//!
//! This module contains the core data structures:
//! - Stack: Deployed infrastructure and its lifecycle status
//! - ChangeSet: Proposed diffs against a stack
//! - Events: Resource status transitions streamed during a deploy

pub mod change_set;
pub mod events;
pub mod stack;

// Re-export commonly used types
pub use change_set::{
    Change, ChangeAction, ChangeSet, ChangeSetRef, ChangeSetStatus, ChangeSetType,
    ExecutionStatus,
};
pub use events::{
    is_discoverable_status, is_failure_status, EventBatch, ResourceKind, StackEvent, StreamEvent,
};
pub use stack::{Output, Parameter, Stack, StackStatus, Tag};
