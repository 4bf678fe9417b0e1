//! Polling source of new events for one stack.
//!
//! Each source owns its cutoff and seen-set. Nested stacks get their own
//! source; nothing here is shared between sources.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::adapters::{ApiError, StackApi};
use crate::domain::StackEvent;

/// Errors raised while streaming events
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("failed to describe events for stack {stack}: {source}")]
    Fetch {
        stack: String,
        #[source]
        source: ApiError,
    },
}

/// Fetches events for one stack, newer than a cutoff and never twice
pub struct EventSource {
    api: Arc<dyn StackApi>,

    /// Stack name (root) or physical id (nested)
    stack: String,

    /// Events before this instant belong to earlier operations
    cutoff: DateTime<Utc>,

    /// Event ids already returned by `fetch`
    seen: HashSet<String>,
}

impl EventSource {
    pub fn new(api: Arc<dyn StackApi>, stack: impl Into<String>, cutoff: DateTime<Utc>) -> Self {
        Self {
            api,
            stack: stack.into(),
            cutoff,
            seen: HashSet::new(),
        }
    }

    pub fn stack(&self) -> &str {
        &self.stack
    }

    pub fn cutoff(&self) -> DateTime<Utc> {
        self.cutoff
    }

    /// Fetch the full history and return the unseen events at or after the
    /// cutoff, oldest first.
    #[instrument(skip(self), fields(stack = %self.stack))]
    pub async fn fetch(&mut self) -> Result<Vec<StackEvent>, StreamError> {
        let history = self.fetch_history().await?;
        let fresh = select_new_events(history, self.cutoff, &mut self.seen);

        if !fresh.is_empty() {
            debug!(count = fresh.len(), "New stack events");
        }
        Ok(fresh)
    }

    /// Follow continuation tokens until the history is exhausted.
    /// The result is newest first, as the service returns it.
    async fn fetch_history(&self) -> Result<Vec<StackEvent>, StreamError> {
        let mut events = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let page = self
                .api
                .describe_stack_events(&self.stack, next_token.as_deref())
                .await
                .map_err(|source| StreamError::Fetch {
                    stack: self.stack.clone(),
                    source,
                })?;

            events.extend(page.events);

            match page.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        Ok(events)
    }
}

/// Reverse a newest-first history into chronological order and keep only
/// events at or after `cutoff` whose ids are not yet in `seen`. Kept ids are
/// added to `seen`.
pub fn select_new_events(
    mut history: Vec<StackEvent>,
    cutoff: DateTime<Utc>,
    seen: &mut HashSet<String>,
) -> Vec<StackEvent> {
    history.reverse();
    // Stable, so events sharing a timestamp keep the service's order.
    history.sort_by_key(|e| e.timestamp);

    history
        .into_iter()
        .filter(|e| e.timestamp >= cutoff)
        .filter(|e| seen.insert(e.event_id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::Operation;
    use crate::adapters::InMemoryStackApi;
    use crate::domain::{Stack, StackStatus};
    use chrono::{Duration, TimeZone};

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(seconds)
    }

    fn event(id: &str, seconds: i64) -> StackEvent {
        StackEvent::new(id, "Queue", "AWS::SQS::Queue", "CREATE_IN_PROGRESS", at(seconds))
    }

    #[test]
    fn test_select_reverses_and_filters() {
        let history = vec![event("e3", 3), event("e2", 2), event("e1", 1), event("e0", -5)];
        let mut seen = HashSet::new();

        let fresh = select_new_events(history, at(0), &mut seen);
        let ids: Vec<&str> = fresh.iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(ids, vec!["e1", "e2", "e3"]);
        assert!(!seen.contains("e0"));
    }

    #[test]
    fn test_select_keeps_event_exactly_at_cutoff() {
        let mut seen = HashSet::new();
        let fresh = select_new_events(vec![event("e0", 0)], at(0), &mut seen);
        assert_eq!(fresh.len(), 1);
    }

    #[test]
    fn test_select_skips_seen_ids() {
        let mut seen = HashSet::new();
        seen.insert("e1".to_string());

        let fresh = select_new_events(vec![event("e2", 2), event("e1", 1)], at(0), &mut seen);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].event_id, "e2");
    }

    #[tokio::test]
    async fn test_fetch_follows_pagination() {
        let api = Arc::new(InMemoryStackApi::new().with_page_size(2));
        api.put_stack(Stack::new("demo", StackStatus::CreateInProgress));
        for i in 0..5 {
            api.push_event("demo", event(&format!("e{}", i), i));
        }

        let mut source = EventSource::new(api.clone(), "demo", at(0));
        let fresh = source.fetch().await.unwrap();

        assert_eq!(fresh.len(), 5);
        assert_eq!(fresh[0].event_id, "e0");
        assert_eq!(api.calls(Operation::DescribeStackEvents), 3);
    }

    #[tokio::test]
    async fn test_fetch_wraps_api_errors() {
        let api = Arc::new(InMemoryStackApi::new());
        api.fail(Operation::DescribeStackEvents, "throttled");

        let mut source = EventSource::new(api, "demo", at(0));
        let err = source.fetch().await.unwrap_err();

        let message = err.to_string();
        assert!(message.contains("demo"));
        assert!(message.contains("throttled"));
    }
}
