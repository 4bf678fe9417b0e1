//! Stack state as reported by the remote service.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A deployed unit of infrastructure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stack {
    /// Stack name (unique per account/region)
    pub name: String,

    /// Service-assigned stack id
    #[serde(default)]
    pub id: String,

    /// Current lifecycle status
    pub status: StackStatus,

    /// Diagnostic text for the current status
    #[serde(default)]
    pub status_reason: Option<String>,

    #[serde(default)]
    pub outputs: Vec<Output>,

    #[serde(default)]
    pub parameters: Vec<Parameter>,

    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl Stack {
    pub fn new(name: impl Into<String>, status: StackStatus) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            status,
            status_reason: None,
            outputs: Vec::new(),
            parameters: Vec::new(),
            tags: Vec::new(),
        }
    }
}

/// A stack output value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// An input parameter passed to the template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub key: String,
    pub value: String,
}

impl Parameter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A resource tag applied to the stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Stack lifecycle status.
///
/// Serialized as the service's SCREAMING_SNAKE_CASE string. Values this
/// client does not know about are kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StackStatus {
    CreateInProgress,
    CreateFailed,
    CreateComplete,
    RollbackInProgress,
    RollbackFailed,
    RollbackComplete,
    UpdateInProgress,
    UpdateCompleteCleanupInProgress,
    UpdateComplete,
    UpdateFailed,
    UpdateRollbackInProgress,
    UpdateRollbackFailed,
    UpdateRollbackCompleteCleanupInProgress,
    UpdateRollbackComplete,
    DeleteInProgress,
    DeleteFailed,
    DeleteComplete,
    ReviewInProgress,
    Other(String),
}

impl StackStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::CreateInProgress => "CREATE_IN_PROGRESS",
            Self::CreateFailed => "CREATE_FAILED",
            Self::CreateComplete => "CREATE_COMPLETE",
            Self::RollbackInProgress => "ROLLBACK_IN_PROGRESS",
            Self::RollbackFailed => "ROLLBACK_FAILED",
            Self::RollbackComplete => "ROLLBACK_COMPLETE",
            Self::UpdateInProgress => "UPDATE_IN_PROGRESS",
            Self::UpdateCompleteCleanupInProgress => "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS",
            Self::UpdateComplete => "UPDATE_COMPLETE",
            Self::UpdateFailed => "UPDATE_FAILED",
            Self::UpdateRollbackInProgress => "UPDATE_ROLLBACK_IN_PROGRESS",
            Self::UpdateRollbackFailed => "UPDATE_ROLLBACK_FAILED",
            Self::UpdateRollbackCompleteCleanupInProgress => {
                "UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS"
            }
            Self::UpdateRollbackComplete => "UPDATE_ROLLBACK_COMPLETE",
            Self::DeleteInProgress => "DELETE_IN_PROGRESS",
            Self::DeleteFailed => "DELETE_FAILED",
            Self::DeleteComplete => "DELETE_COMPLETE",
            Self::ReviewInProgress => "REVIEW_IN_PROGRESS",
            Self::Other(s) => s,
        }
    }

    /// No further transition happens without new intervention
    pub fn is_terminal(&self) -> bool {
        self.is_success() || self.is_failure()
    }

    /// The last requested operation completed as asked
    pub fn is_success(&self) -> bool {
        match self {
            Self::CreateComplete | Self::UpdateComplete | Self::DeleteComplete => true,
            Self::Other(s) => s.ends_with("_COMPLETE") && !s.ends_with("ROLLBACK_COMPLETE"),
            _ => false,
        }
    }

    /// The last requested operation failed or was rolled back
    pub fn is_failure(&self) -> bool {
        match self {
            Self::CreateFailed
            | Self::RollbackFailed
            | Self::RollbackComplete
            | Self::UpdateFailed
            | Self::UpdateRollbackFailed
            | Self::UpdateRollbackComplete
            | Self::DeleteFailed => true,
            Self::Other(s) => s.ends_with("_FAILED") || s.ends_with("ROLLBACK_COMPLETE"),
            _ => false,
        }
    }
}

impl From<String> for StackStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "CREATE_IN_PROGRESS" => Self::CreateInProgress,
            "CREATE_FAILED" => Self::CreateFailed,
            "CREATE_COMPLETE" => Self::CreateComplete,
            "ROLLBACK_IN_PROGRESS" => Self::RollbackInProgress,
            "ROLLBACK_FAILED" => Self::RollbackFailed,
            "ROLLBACK_COMPLETE" => Self::RollbackComplete,
            "UPDATE_IN_PROGRESS" => Self::UpdateInProgress,
            "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS" => Self::UpdateCompleteCleanupInProgress,
            "UPDATE_COMPLETE" => Self::UpdateComplete,
            "UPDATE_FAILED" => Self::UpdateFailed,
            "UPDATE_ROLLBACK_IN_PROGRESS" => Self::UpdateRollbackInProgress,
            "UPDATE_ROLLBACK_FAILED" => Self::UpdateRollbackFailed,
            "UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS" => {
                Self::UpdateRollbackCompleteCleanupInProgress
            }
            "UPDATE_ROLLBACK_COMPLETE" => Self::UpdateRollbackComplete,
            "DELETE_IN_PROGRESS" => Self::DeleteInProgress,
            "DELETE_FAILED" => Self::DeleteFailed,
            "DELETE_COMPLETE" => Self::DeleteComplete,
            "REVIEW_IN_PROGRESS" => Self::ReviewInProgress,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for StackStatus {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<StackStatus> for String {
    fn from(status: StackStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
