//! In-process stack service.
//!
//! A scripted implementation of `StackApi` and `RolloutResolver` that keeps
//! everything in memory. It is what the test suite deploys against: tests
//! seed stacks and events, script the change set review result and the
//! sequence of stack statuses, inject failures per operation, and read back
//! call counts afterwards.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    ApiError, CreateChangeSetInput, RolloutResolver, RolloutStatus, StackApi, StackEventsPage,
};
use crate::domain::{
    Change, ChangeSet, ChangeSetRef, ChangeSetStatus, ChangeSetType, ExecutionStatus, Stack,
    StackEvent, StackStatus,
};

/// Remote operations, for failure injection and call counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateChangeSet,
    DescribeChangeSet,
    ExecuteChangeSet,
    DescribeStackEvents,
    DescribeStack,
    DeleteStack,
    ResolveRollout,
}

/// How the next created change set finishes computing
#[derive(Debug, Clone)]
pub struct ReviewScript {
    pub status: ChangeSetStatus,
    pub execution_status: ExecutionStatus,
    pub reason: Option<String>,
    pub changes: Vec<Change>,
}

impl ReviewScript {
    /// An executable change set with these changes
    pub fn changes(changes: Vec<Change>) -> Self {
        Self {
            status: ChangeSetStatus::CreateComplete,
            execution_status: ExecutionStatus::Available,
            reason: None,
            changes,
        }
    }

    /// A failed, unavailable change set with this reason
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            status: ChangeSetStatus::Failed,
            execution_status: ExecutionStatus::Unavailable,
            reason: Some(reason.into()),
            changes: Vec::new(),
        }
    }
}

impl Default for ReviewScript {
    fn default() -> Self {
        Self::changes(Vec::new())
    }
}

#[derive(Default)]
struct MemoryState {
    stacks: HashMap<String, Stack>,
    /// Scripted describe_stack results; `None` means the stack is gone
    statuses: HashMap<String, VecDeque<Option<StackStatus>>>,
    /// Chronological events keyed by stack name or physical id
    events: HashMap<String, Vec<StackEvent>>,
    change_sets: HashMap<String, ChangeSet>,
    /// Remaining "still computing" describe results per change set
    computing: HashMap<String, u32>,
    review: ReviewScript,
    computing_polls: u32,
    page_size: usize,
    clock: Option<DateTime<Utc>>,
    failures: HashMap<Operation, String>,
    calls: HashMap<Operation, usize>,
    rollouts: HashMap<(String, String), RolloutStatus>,
}

/// Scripted in-memory stack service
pub struct InMemoryStackApi {
    state: Mutex<MemoryState>,
}

impl Default for InMemoryStackApi {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStackApi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                page_size: 100,
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Limit the number of events per describe_stack_events page
    pub fn with_page_size(self, page_size: usize) -> Self {
        self.state().page_size = page_size.max(1);
        self
    }

    /// Fix the clock used for change set creation times
    pub fn set_clock(&self, now: DateTime<Utc>) {
        self.state().clock = Some(now);
    }

    /// Add or replace a stack
    pub fn put_stack(&self, stack: Stack) {
        self.state().stacks.insert(stack.name.clone(), stack);
    }

    /// Statuses returned by successive describe_stack calls; the last repeats
    pub fn script_statuses(&self, stack_name: &str, statuses: Vec<StackStatus>) {
        self.state()
            .statuses
            .entry(stack_name.to_string())
            .or_default()
            .extend(statuses.into_iter().map(Some));
    }

    /// After the scripted statuses, describe_stack reports the stack missing
    pub fn script_gone(&self, stack_name: &str) {
        self.state()
            .statuses
            .entry(stack_name.to_string())
            .or_default()
            .push_back(None);
    }

    /// Record an event in a stack's history
    pub fn push_event(&self, stack: &str, event: StackEvent) {
        let mut state = self.state();
        let history = state.events.entry(stack.to_string()).or_default();
        history.push(event);
        history.sort_by_key(|e| e.timestamp);
    }

    /// How the next change set finishes computing
    pub fn script_review(&self, review: ReviewScript) {
        self.state().review = review;
    }

    /// Number of describe_change_set calls that still report "computing"
    pub fn set_computing_polls(&self, polls: u32) {
        self.state().computing_polls = polls;
    }

    /// Make every call to `op` fail with a service error
    pub fn fail(&self, op: Operation, message: impl Into<String>) {
        self.state().failures.insert(op, message.into());
    }

    pub fn clear_failure(&self, op: Operation) {
        self.state().failures.remove(&op);
    }

    pub fn set_rollout(&self, cluster: &str, service: &str, status: RolloutStatus) {
        self.state()
            .rollouts
            .insert((cluster.to_string(), service.to_string()), status);
    }

    /// How many times `op` has been called
    pub fn calls(&self, op: Operation) -> usize {
        self.state().calls.get(&op).copied().unwrap_or(0)
    }

    /// Count the call and return the injected failure, if any
    fn enter(&self, state: &mut MemoryState, op: Operation) -> Result<(), ApiError> {
        *state.calls.entry(op).or_insert(0) += 1;
        match state.failures.get(&op) {
            Some(message) => Err(ApiError::Service {
                status: 500,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl StackApi for InMemoryStackApi {
    async fn create_change_set(
        &self,
        input: &CreateChangeSetInput,
    ) -> Result<ChangeSetRef, ApiError> {
        let mut state = self.state();
        self.enter(&mut state, Operation::CreateChangeSet)?;

        let exists = state.stacks.contains_key(&input.stack_name);
        match input.change_set_type {
            ChangeSetType::Create if exists => {
                return Err(ApiError::AlreadyExists(input.stack_name.clone()));
            }
            ChangeSetType::Update if !exists => {
                return Err(ApiError::NotFound(input.stack_name.clone()));
            }
            ChangeSetType::Create => {
                let mut stack = Stack::new(&input.stack_name, StackStatus::ReviewInProgress);
                stack.parameters = input.parameters.clone();
                stack.tags = input.tags.clone();
                state.stacks.insert(input.stack_name.clone(), stack);
            }
            ChangeSetType::Update => {}
        }

        let stack_id = state
            .stacks
            .get(&input.stack_name)
            .map(|s| s.id.clone())
            .unwrap_or_else(|| input.stack_name.clone());
        let review = state.review.clone();
        let change_set = ChangeSet {
            id: input.change_set_name.clone(),
            stack_id: stack_id.clone(),
            creation_time: state.clock.unwrap_or_else(Utc::now),
            status: review.status,
            execution_status: review.execution_status,
            status_reason: review.reason,
            changes: review.changes,
        };

        let polls = state.computing_polls;
        state.computing.insert(change_set.id.clone(), polls);
        state.change_sets.insert(change_set.id.clone(), change_set);

        Ok(ChangeSetRef {
            id: input.change_set_name.clone(),
            stack_id,
        })
    }

    async fn describe_change_set(
        &self,
        _stack_name: &str,
        change_set_id: &str,
    ) -> Result<ChangeSet, ApiError> {
        let mut state = self.state();
        self.enter(&mut state, Operation::DescribeChangeSet)?;

        let mut change_set = state
            .change_sets
            .get(change_set_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(change_set_id.to_string()))?;

        if let Some(remaining) = state.computing.get_mut(change_set_id) {
            if *remaining > 0 {
                *remaining -= 1;
                change_set.status = ChangeSetStatus::CreateInProgress;
                change_set.execution_status = ExecutionStatus::Pending;
                change_set.status_reason = None;
                change_set.changes.clear();
            }
        }

        Ok(change_set)
    }

    async fn execute_change_set(
        &self,
        _stack_name: &str,
        change_set_id: &str,
    ) -> Result<(), ApiError> {
        let mut state = self.state();
        self.enter(&mut state, Operation::ExecuteChangeSet)?;

        let change_set = state
            .change_sets
            .get_mut(change_set_id)
            .ok_or_else(|| ApiError::NotFound(change_set_id.to_string()))?;

        if change_set.execution_status != ExecutionStatus::Available {
            return Err(ApiError::Service {
                status: 400,
                message: format!("change set {} is not executable", change_set_id),
            });
        }
        change_set.execution_status = ExecutionStatus::Executing;
        Ok(())
    }

    async fn describe_stack_events(
        &self,
        stack_name: &str,
        next_token: Option<&str>,
    ) -> Result<StackEventsPage, ApiError> {
        let mut state = self.state();
        self.enter(&mut state, Operation::DescribeStackEvents)?;

        let history = match state.events.get(stack_name) {
            Some(history) => history.clone(),
            None if state.stacks.contains_key(stack_name) => Vec::new(),
            None => return Err(ApiError::NotFound(stack_name.to_string())),
        };

        let offset = match next_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| ApiError::InvalidResponse(format!("bad token {}", token)))?,
            None => 0,
        };

        let page_size = state.page_size;
        let events: Vec<StackEvent> = history
            .iter()
            .rev()
            .skip(offset)
            .take(page_size)
            .cloned()
            .collect();
        let next_token = if offset + page_size < history.len() {
            Some((offset + page_size).to_string())
        } else {
            None
        };

        Ok(StackEventsPage { events, next_token })
    }

    async fn describe_stack(&self, stack_name: &str) -> Result<Stack, ApiError> {
        let mut state = self.state();
        self.enter(&mut state, Operation::DescribeStack)?;

        let scripted = match state.statuses.get_mut(stack_name) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };

        match scripted {
            Some(None) => {
                state.stacks.remove(stack_name);
                Err(ApiError::NotFound(stack_name.to_string()))
            }
            Some(Some(status)) => {
                let stack = state
                    .stacks
                    .get_mut(stack_name)
                    .ok_or_else(|| ApiError::NotFound(stack_name.to_string()))?;
                stack.status = status;
                Ok(stack.clone())
            }
            None => state
                .stacks
                .get(stack_name)
                .cloned()
                .ok_or_else(|| ApiError::NotFound(stack_name.to_string())),
        }
    }

    async fn delete_stack(&self, stack_name: &str) -> Result<(), ApiError> {
        let mut state = self.state();
        self.enter(&mut state, Operation::DeleteStack)?;

        let stack = state
            .stacks
            .get_mut(stack_name)
            .ok_or_else(|| ApiError::NotFound(stack_name.to_string()))?;
        stack.status = StackStatus::DeleteInProgress;
        Ok(())
    }
}

#[async_trait]
impl RolloutResolver for InMemoryStackApi {
    async fn resolve_service_rollout_status(
        &self,
        cluster: &str,
        service: &str,
    ) -> Result<RolloutStatus, ApiError> {
        let mut state = self.state();
        self.enter(&mut state, Operation::ResolveRollout)?;

        state
            .rollouts
            .get(&(cluster.to_string(), service.to_string()))
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("{}/{}", cluster, service)))
    }
}
