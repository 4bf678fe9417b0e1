//! Core deployment logic.
//!
//! This module contains:
//! - EventSource: New-event polling for one stack
//! - EventAggregator: Fan-in of root and nested stack sources
//! - ChangeSetController: Change set submit/review/execute
//! - ProgressRenderer: Live resource tree
//! - Deployer: Deploy/delete orchestration
//! - StackManifest: YAML deployment descriptions

pub mod aggregator;
pub mod change_set;
pub mod event_source;
pub mod manifest;
pub mod orchestrator;
pub mod renderer;

// Re-export commonly used types
pub use aggregator::{stream_events, EventAggregator, DEFAULT_POLL_INTERVAL};
pub use change_set::{
    classify_status_reason, ChangeSetController, ChangeSetError, ChangeSetState, ReasonClass,
    ReviewOutcome, ReviewSettings,
};
pub use event_source::{select_new_events, EventSource, StreamError};
pub use manifest::StackManifest;
pub use orchestrator::{
    DeleteOutcome, DeployError, DeployOutcome, DeployRequest, DeploySettings, Deployer,
};
pub use renderer::{ProgressRenderer, RenderNode, RenderOptions, RenderTree};
