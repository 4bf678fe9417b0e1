//! Change set submission, review and execution.
//!
//! One `ChangeSetController` drives one change set through
//! `Created → WaitingForCreation → {Available | SkippedNoChanges |
//! FailedToCreate} → [Executing → {Succeeded | ExecutionFailed}]`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{ApiError, CreateChangeSetInput, StackApi};
use crate::domain::{Change, ChangeSetRef, ChangeSetType, ExecutionStatus, Parameter, Tag};

/// Status reasons the service uses when a change set has nothing to do
const NO_CHANGE_REASONS: &[&str] = &[
    "The submitted information didn't contain changes",
    "No updates are to be performed",
];

/// Change set errors
#[derive(Debug, Error)]
pub enum ChangeSetError {
    #[error("stack {stack} already exists")]
    StackAlreadyExists { stack: String },

    #[error("change set {id} for stack {stack_id} is not executable: {reason}")]
    NotExecutable {
        id: String,
        stack_id: String,
        reason: String,
    },

    #[error("{op} failed for stack {stack}: {source}")]
    Api {
        op: &'static str,
        stack: String,
        #[source]
        source: ApiError,
    },

    #[error("execute change set {id} for stack {stack}: {source}")]
    ExecuteFailed {
        id: String,
        stack: String,
        #[source]
        source: ApiError,
    },

    #[error("change set {id} for stack {stack} still computing after {seconds}s")]
    WaitTimeout {
        id: String,
        stack: String,
        seconds: u64,
    },

    #[error("no change set has been submitted")]
    NotSubmitted,
}

/// Lifecycle of one change set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSetState {
    Created,
    WaitingForCreation,
    Available,
    SkippedNoChanges,
    FailedToCreate,
    Executing,
    Succeeded,
    ExecutionFailed,
}

impl ChangeSetState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::SkippedNoChanges | Self::FailedToCreate | Self::Succeeded | Self::ExecutionFailed
        )
    }
}

/// Result of reviewing a computed change set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewOutcome {
    /// Nothing to apply; the stack already matches the template
    NoChanges,

    /// Executable, with these proposed changes
    Changes(Vec<Change>),
}

/// What a change set status reason means
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasonClass {
    NoChanges,
    Other,
}

/// Classify a change set status reason.
///
/// The service only signals "nothing to do" through free text, so every
/// sentinel lives here.
pub fn classify_status_reason(reason: &str) -> ReasonClass {
    if NO_CHANGE_REASONS.iter().any(|s| reason.contains(s)) {
        ReasonClass::NoChanges
    } else {
        ReasonClass::Other
    }
}

/// Polling settings for change set review
#[derive(Debug, Clone)]
pub struct ReviewSettings {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for ReviewSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(600),
        }
    }
}

/// Drives a single change set
pub struct ChangeSetController {
    api: Arc<dyn StackApi>,
    settings: ReviewSettings,
    stack: String,
    change_set: Option<ChangeSetRef>,

    /// Creation time reported by the service, known after review
    created_at: Option<DateTime<Utc>>,

    state: ChangeSetState,
}

impl ChangeSetController {
    pub fn new(api: Arc<dyn StackApi>, settings: ReviewSettings) -> Self {
        Self {
            api,
            settings,
            stack: String::new(),
            change_set: None,
            created_at: None,
            state: ChangeSetState::Created,
        }
    }

    pub fn state(&self) -> ChangeSetState {
        self.state
    }

    pub fn change_set(&self) -> Option<&ChangeSetRef> {
        self.change_set.as_ref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    /// Create the change set.
    ///
    /// A create-intent submit against an existing stack returns
    /// `StackAlreadyExists` so the caller can retry as an update.
    #[instrument(skip(self, template_body, parameters, tags))]
    pub async fn submit(
        &mut self,
        stack: &str,
        template_body: &str,
        parameters: &[Parameter],
        tags: &[Tag],
        intent: ChangeSetType,
    ) -> Result<ChangeSetRef, ChangeSetError> {
        let input = CreateChangeSetInput {
            stack_name: stack.to_string(),
            change_set_name: format!("stackctl-{}", Uuid::new_v4()),
            change_set_type: intent,
            template_body: template_body.to_string(),
            parameters: parameters.to_vec(),
            tags: tags.to_vec(),
        };

        let change_set = match self.api.create_change_set(&input).await {
            Ok(change_set) => change_set,
            Err(ApiError::AlreadyExists(_)) if intent == ChangeSetType::Create => {
                return Err(ChangeSetError::StackAlreadyExists {
                    stack: stack.to_string(),
                });
            }
            Err(source) => {
                return Err(ChangeSetError::Api {
                    op: "create change set",
                    stack: stack.to_string(),
                    source,
                });
            }
        };

        info!(change_set = %change_set.id, "Change set created");
        self.stack = stack.to_string();
        self.change_set = Some(change_set.clone());
        self.created_at = None;
        self.state = ChangeSetState::Created;
        Ok(change_set)
    }

    /// Wait for the change set to finish computing and classify it
    #[instrument(skip(self), fields(stack = %self.stack))]
    pub async fn wait_for_review(&mut self) -> Result<ReviewOutcome, ChangeSetError> {
        let change_set_ref = self.change_set.clone().ok_or(ChangeSetError::NotSubmitted)?;
        self.state = ChangeSetState::WaitingForCreation;

        let started = Instant::now();
        let change_set = loop {
            let change_set = self
                .api
                .describe_change_set(&self.stack, &change_set_ref.id)
                .await
                .map_err(|source| ChangeSetError::Api {
                    op: "describe change set",
                    stack: self.stack.clone(),
                    source,
                })?;

            if !change_set.status.is_computing() {
                break change_set;
            }

            if started.elapsed() >= self.settings.timeout {
                self.state = ChangeSetState::FailedToCreate;
                return Err(ChangeSetError::WaitTimeout {
                    id: change_set_ref.id,
                    stack: self.stack.clone(),
                    seconds: self.settings.timeout.as_secs(),
                });
            }

            debug!(status = ?change_set.status, "Change set still computing");
            tokio::time::sleep(self.settings.poll_interval).await;
        };

        self.created_at = Some(change_set.creation_time);

        if change_set.execution_status == ExecutionStatus::Unavailable {
            let reason = change_set.status_reason.unwrap_or_default();

            if classify_status_reason(&reason) == ReasonClass::NoChanges {
                info!("Change set has no changes, skipping");
                self.state = ChangeSetState::SkippedNoChanges;
                return Ok(ReviewOutcome::NoChanges);
            }

            warn!(%reason, "Change set is not executable");
            self.state = ChangeSetState::FailedToCreate;
            return Err(ChangeSetError::NotExecutable {
                id: change_set.id,
                stack_id: change_set.stack_id,
                reason,
            });
        }

        self.state = ChangeSetState::Available;
        Ok(ReviewOutcome::Changes(change_set.changes))
    }

    /// Start applying the change set
    #[instrument(skip(self), fields(stack = %self.stack))]
    pub async fn execute(&mut self) -> Result<(), ChangeSetError> {
        let change_set = self.change_set.as_ref().ok_or(ChangeSetError::NotSubmitted)?;

        match self.api.execute_change_set(&self.stack, &change_set.id).await {
            Ok(()) => {
                info!(change_set = %change_set.id, "Change set executing");
                self.state = ChangeSetState::Executing;
                Ok(())
            }
            Err(source) => {
                self.state = ChangeSetState::ExecutionFailed;
                Err(ChangeSetError::ExecuteFailed {
                    id: change_set.id.clone(),
                    stack: self.stack.clone(),
                    source,
                })
            }
        }
    }

    /// Record the stack's terminal outcome after execution
    pub fn finish(&mut self, success: bool) {
        if self.state == ChangeSetState::Executing {
            self.state = if success {
                ChangeSetState::Succeeded
            } else {
                ChangeSetState::ExecutionFailed
            };
        }
    }
}
