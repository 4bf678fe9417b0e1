//! Change set types.
//!
//! A change set is a proposed, named diff against a stack. It is created,
//! reviewed, and then either executed or discarded within one deploy.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether the change set targets a new stack or an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSetType {
    #[default]
    Create,
    Update,
}

impl fmt::Display for ChangeSetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
        }
    }
}

/// Identity of a submitted change set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSetRef {
    pub id: String,
    pub stack_id: String,
}

/// A change set as described by the remote service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub id: String,

    /// Parent stack id
    pub stack_id: String,

    /// When the change set was created; used as the event cutoff
    pub creation_time: DateTime<Utc>,

    /// Whether the diff has finished computing
    pub status: ChangeSetStatus,

    pub execution_status: ExecutionStatus,

    /// Free text; used to recognise "nothing to do" results
    #[serde(default)]
    pub status_reason: Option<String>,

    /// Proposed resource changes, in service order
    #[serde(default)]
    pub changes: Vec<Change>,
}

/// Computation status of a change set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeSetStatus {
    CreatePending,
    CreateInProgress,
    CreateComplete,
    Failed,
}

impl ChangeSetStatus {
    /// The diff is still being computed
    pub fn is_computing(&self) -> bool {
        matches!(self, Self::CreatePending | Self::CreateInProgress)
    }
}

/// Whether the change set can be executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Available,
    Unavailable,
    Executing,
    ExecuteComplete,
    ExecuteFailed,
}

/// One proposed resource change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub logical_id: String,
    pub resource_type: String,
    pub action: ChangeAction,

    /// Whether a modify requires replacing the resource
    #[serde(default)]
    pub replacement: bool,
}

impl Change {
    pub fn new(
        logical_id: impl Into<String>,
        resource_type: impl Into<String>,
        action: ChangeAction,
    ) -> Self {
        Self {
            logical_id: logical_id.into(),
            resource_type: resource_type.into(),
            action,
            replacement: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Add,
    Modify,
    Remove,
    Import,
    Dynamic,
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Add => "add",
            Self::Modify => "modify",
            Self::Remove => "remove",
            Self::Import => "import",
            Self::Dynamic => "dynamic",
        };
        f.write_str(s)
    }
}
