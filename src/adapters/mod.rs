//! Adapter interfaces for external systems.
//!
//! The deploy core talks to three collaborators through traits:
//! - `StackApi`: the remote declarative-infrastructure service
//! - `TemplateRenderer`: turns a template id plus data into a template body
//! - `RolloutResolver`: best-effort service rollout detail for diagnostics

pub mod http;
pub mod memory;
pub mod template;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{ChangeSet, ChangeSetRef, ChangeSetType, Parameter, Stack, StackEvent, Tag};

pub use http::HttpStackClient;
pub use memory::InMemoryStackApi;
pub use template::FileTemplateRenderer;

/// Errors returned by remote API calls
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("stack already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("service returned {status}: {message}")]
    Service { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Input for creating a change set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChangeSetInput {
    pub stack_name: String,
    pub change_set_name: String,
    pub change_set_type: ChangeSetType,
    pub template_body: String,
    pub parameters: Vec<Parameter>,
    pub tags: Vec<Tag>,
}

/// One page of a stack's event history, newest first
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StackEventsPage {
    pub events: Vec<StackEvent>,

    /// Continuation token; `None` on the last page
    #[serde(default)]
    pub next_token: Option<String>,
}

/// Rollout state of a compute service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutStatus {
    /// e.g. "IN_PROGRESS", "FAILED", "COMPLETED"
    pub state: String,
    pub running_count: u32,
    pub desired_count: u32,
    #[serde(default)]
    pub failed_tasks: u32,
    #[serde(default)]
    pub reason: Option<String>,
}

impl fmt::Display for RolloutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rollout {} ({}/{} running",
            self.state, self.running_count, self.desired_count
        )?;
        if self.failed_tasks > 0 {
            write!(f, ", {} failed tasks", self.failed_tasks)?;
        }
        write!(f, ")")?;
        if let Some(reason) = &self.reason {
            write!(f, ": {}", reason)?;
        }
        Ok(())
    }
}

/// Remote stack lifecycle operations
#[async_trait]
pub trait StackApi: Send + Sync {
    /// Create a change set against a new or existing stack.
    ///
    /// A create-intent change set for an existing stack fails with
    /// `ApiError::AlreadyExists`.
    async fn create_change_set(&self, input: &CreateChangeSetInput)
        -> Result<ChangeSetRef, ApiError>;

    async fn describe_change_set(
        &self,
        stack_name: &str,
        change_set_id: &str,
    ) -> Result<ChangeSet, ApiError>;

    async fn execute_change_set(&self, stack_name: &str, change_set_id: &str)
        -> Result<(), ApiError>;

    /// One page of events, newest first
    async fn describe_stack_events(
        &self,
        stack_name: &str,
        next_token: Option<&str>,
    ) -> Result<StackEventsPage, ApiError>;

    async fn describe_stack(&self, stack_name: &str) -> Result<Stack, ApiError>;

    async fn delete_stack(&self, stack_name: &str) -> Result<(), ApiError>;
}

/// Renders a template body for submission
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template_id: &str, data: &HashMap<String, String>) -> anyhow::Result<String>;
}

/// Looks up rollout detail for a failing service (best-effort)
#[async_trait]
pub trait RolloutResolver: Send + Sync {
    async fn resolve_service_rollout_status(
        &self,
        cluster: &str,
        service: &str,
    ) -> Result<RolloutStatus, ApiError>;
}
