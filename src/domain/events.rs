//! Stack event types.
//!
//! A stack event is an immutable record of one resource's status transition
//! inside one stack. Events are produced by the remote service and are
//! read-only to the client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single resource status transition reported by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackEvent {
    /// Unique identifier within the stack (used for deduplication)
    pub event_id: String,

    /// Logical resource id as declared in the template
    pub logical_id: String,

    /// Physical resource id assigned by the service (may be empty early on)
    #[serde(default)]
    pub physical_id: String,

    /// Resource type string, e.g. "AWS::ECS::Service"
    pub resource_type: String,

    /// Free-form resource status, e.g. "CREATE_IN_PROGRESS"
    pub status: String,

    /// Optional diagnostic text
    #[serde(default)]
    pub reason: Option<String>,

    /// When the transition happened
    pub timestamp: DateTime<Utc>,
}

impl StackEvent {
    /// Create an event with no physical id and no reason
    pub fn new(
        event_id: impl Into<String>,
        logical_id: impl Into<String>,
        resource_type: impl Into<String>,
        status: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            logical_id: logical_id.into(),
            physical_id: String::new(),
            resource_type: resource_type.into(),
            status: status.into(),
            reason: None,
            timestamp,
        }
    }

    /// Attach a physical resource id
    pub fn with_physical_id(mut self, physical_id: impl Into<String>) -> Self {
        self.physical_id = physical_id.into();
        self
    }

    /// Attach a status reason
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Classify the resource type once
    pub fn kind(&self) -> ResourceKind {
        ResourceKind::from_type(&self.resource_type)
    }

    /// Whether the status reports a failure
    pub fn is_failure(&self) -> bool {
        is_failure_status(&self.status)
    }
}

/// Whether a free-form resource status reports a failure
pub fn is_failure_status(status: &str) -> bool {
    status.contains("FAILED")
}

/// Whether a nested stack resource in this status already has a physical
/// stack that can be polled for its own events.
pub fn is_discoverable_status(status: &str) -> bool {
    matches!(
        status,
        "CREATE_IN_PROGRESS" | "UPDATE_IN_PROGRESS" | "CREATE_COMPLETE" | "UPDATE_COMPLETE"
    )
}

/// Coarse classification of a resource type string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// An infrastructure sub-stack owned by the parent stack
    NestedStack,

    /// A long-running compute service with rollout state
    Service,

    /// Anything else
    Other,
}

impl ResourceKind {
    /// Classify by the last `::` segment of the resource type
    pub fn from_type(resource_type: &str) -> Self {
        match resource_type.rsplit("::").next() {
            Some("Stack") => Self::NestedStack,
            Some("Service") => Self::Service,
            _ => Self::Other,
        }
    }
}

/// A stack event tagged with the stack it was read from.
///
/// `stack` is the key the producing event source polls with: the stack
/// name for the root stack, the physical id for nested stacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    pub stack: String,
    pub event: StackEvent,
}

impl StreamEvent {
    pub fn new(stack: impl Into<String>, event: StackEvent) -> Self {
        Self {
            stack: stack.into(),
            event,
        }
    }
}

/// Events published together on one aggregator tick
pub type EventBatch = Vec<StreamEvent>;
