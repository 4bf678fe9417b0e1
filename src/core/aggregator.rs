//! Fan-in of root and nested stack event sources.
//!
//! The aggregator polls every registered source once per tick, in
//! registration order, and publishes everything new as one batch to every
//! subscriber. Nested stacks announced by a delivered event get their own
//! source, polled from the next tick on.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::adapters::StackApi;
use crate::domain::{is_discoverable_status, EventBatch, ResourceKind, StackEvent, StreamEvent};

use super::event_source::{EventSource, StreamError};

/// Upper bound on drain rounds after cancellation
const MAX_DRAIN_ROUNDS: usize = 5;

/// Default delay between polling ticks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Merges event sources into one batched stream
pub struct EventAggregator {
    api: Arc<dyn StackApi>,
    sources: Vec<EventSource>,

    /// Stack keys that already have a source
    tracked: HashSet<String>,

    /// Earliest event per (parent stack, nested logical id), the cutoff for
    /// the nested source once its physical id shows up
    first_seen: HashMap<(String, String), DateTime<Utc>>,

    sinks: Vec<mpsc::Sender<EventBatch>>,
    poll_interval: Duration,
}

impl EventAggregator {
    /// Create an aggregator with a single root source
    pub fn new(
        api: Arc<dyn StackApi>,
        root_stack: &str,
        cutoff: DateTime<Utc>,
        poll_interval: Duration,
    ) -> Self {
        let root = EventSource::new(api.clone(), root_stack, cutoff);
        let mut tracked = HashSet::new();
        tracked.insert(root_stack.to_string());

        Self {
            api,
            sources: vec![root],
            tracked,
            first_seen: HashMap::new(),
            sinks: Vec::new(),
            poll_interval,
        }
    }

    /// Register a sink; every batch is sent to every sink
    pub fn subscribe(&mut self, sink: mpsc::Sender<EventBatch>) {
        self.sinks.push(sink);
    }

    /// Stack keys currently being polled, in registration order
    pub fn sources(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.stack()).collect()
    }

    /// Poll until cancelled or until a fetch fails.
    ///
    /// Any fetch error ends the whole aggregation. On cancellation a final
    /// drain picks up events (and nested stacks) that landed since the last
    /// tick. Dropping `self` on return closes every sink.
    #[instrument(skip_all)]
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), StreamError> {
        loop {
            if cancel.is_cancelled() {
                break;
            }

            self.tick().await?;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        self.drain().await?;
        debug!("Event aggregation stopped");
        Ok(())
    }

    /// Tick until no new nested stacks turn up
    async fn drain(&mut self) -> Result<(), StreamError> {
        for _ in 0..MAX_DRAIN_ROUNDS {
            if self.tick().await? == 0 {
                break;
            }
        }
        Ok(())
    }

    /// Poll every source once and publish one batch.
    /// Returns the number of nested sources discovered.
    ///
    /// When a source fails, events already fetched from earlier sources in
    /// the same tick are still published before the error is returned.
    pub async fn tick(&mut self) -> Result<usize, StreamError> {
        let mut batch = EventBatch::new();
        let mut discovered = Vec::new();
        let mut failure = None;

        for source in self.sources.iter_mut() {
            let events = match source.fetch().await {
                Ok(events) => events,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            };

            for event in events {
                let first_seen = record_first_seen(&mut self.first_seen, source.stack(), &event);
                if let Some(child) = nested_stack_to_follow(&event, &self.tracked) {
                    if !discovered.iter().any(|(key, _)| key == &child) {
                        discovered.push((child, first_seen.unwrap_or(event.timestamp)));
                    }
                }
                batch.push(StreamEvent::new(source.stack(), event));
            }
        }

        if let Some(e) = failure {
            if !batch.is_empty() {
                self.publish(batch).await;
            }
            return Err(e);
        }

        let found = discovered.len();
        for (stack, cutoff) in discovered {
            info!(%stack, "Following nested stack");
            self.tracked.insert(stack.clone());
            self.sources
                .push(EventSource::new(self.api.clone(), stack, cutoff));
        }

        if !batch.is_empty() {
            self.publish(batch).await;
        }
        Ok(found)
    }

    /// Send the batch to every live sink, dropping closed ones
    async fn publish(&mut self, batch: EventBatch) {
        let mut open = Vec::with_capacity(self.sinks.len());

        for sink in self.sinks.drain(..) {
            if sink.send(batch.clone()).await.is_ok() {
                open.push(sink);
            } else {
                debug!("Dropping closed event sink");
            }
        }

        self.sinks = open;
    }
}

/// Track the earliest timestamp of a nested stack resource in its parent.
/// Returns it for nested stack events, `None` for anything else.
fn record_first_seen(
    first_seen: &mut HashMap<(String, String), DateTime<Utc>>,
    parent: &str,
    event: &StackEvent,
) -> Option<DateTime<Utc>> {
    if event.kind() != ResourceKind::NestedStack {
        return None;
    }

    let earliest = first_seen
        .entry((parent.to_string(), event.logical_id.clone()))
        .or_insert(event.timestamp);
    if event.timestamp < *earliest {
        *earliest = event.timestamp;
    }
    Some(*earliest)
}

/// The physical id of a nested stack worth polling, if `event` announces one
fn nested_stack_to_follow(event: &StackEvent, tracked: &HashSet<String>) -> Option<String> {
    if event.kind() != ResourceKind::NestedStack {
        return None;
    }
    if !is_discoverable_status(&event.status) {
        return None;
    }
    if event.physical_id.is_empty() || tracked.contains(&event.physical_id) {
        return None;
    }
    Some(event.physical_id.clone())
}

/// Stream events for one stack to the given sinks until cancelled.
///
/// This is the raw progress feed without any change set orchestration.
pub async fn stream_events(
    api: Arc<dyn StackApi>,
    stack: &str,
    cutoff: DateTime<Utc>,
    sinks: Vec<mpsc::Sender<EventBatch>>,
    cancel: CancellationToken,
    poll_interval: Duration,
) -> Result<(), StreamError> {
    let mut aggregator = EventAggregator::new(api, stack, cutoff, poll_interval);
    for sink in sinks {
        aggregator.subscribe(sink);
    }
    aggregator.run(cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::Operation;
    use crate::adapters::InMemoryStackApi;
    use crate::domain::{Stack, StackStatus};
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + ChronoDuration::seconds(seconds)
    }

    fn nested(id: &str, status: &str, physical: &str, seconds: i64) -> StackEvent {
        StackEvent::new(id, "AddonsStack", "AWS::CloudFormation::Stack", status, at(seconds))
            .with_physical_id(physical)
    }

    #[test]
    fn test_nested_stack_detection() {
        let tracked: HashSet<String> = ["root".to_string()].into_iter().collect();

        let announced = nested("e1", "CREATE_IN_PROGRESS", "addons-id", 1);
        assert_eq!(
            nested_stack_to_follow(&announced, &tracked),
            Some("addons-id".to_string())
        );

        let no_physical = nested("e0", "CREATE_IN_PROGRESS", "", 1);
        assert_eq!(nested_stack_to_follow(&no_physical, &tracked), None);

        let deleting = nested("e2", "DELETE_IN_PROGRESS", "addons-id", 1);
        assert_eq!(nested_stack_to_follow(&deleting, &tracked), None);

        let plain = StackEvent::new("e3", "Queue", "AWS::SQS::Queue", "CREATE_COMPLETE", at(1))
            .with_physical_id("queue-url");
        assert_eq!(nested_stack_to_follow(&plain, &tracked), None);
    }

    #[tokio::test]
    async fn test_tick_discovers_nested_stack_once() {
        let api = Arc::new(InMemoryStackApi::new());
        api.put_stack(Stack::new("root", StackStatus::CreateInProgress));
        api.push_event("root", nested("r1", "CREATE_IN_PROGRESS", "addons-id", 1));
        api.push_event("root", nested("r2", "CREATE_COMPLETE", "addons-id", 3));
        api.push_event(
            "addons-id",
            StackEvent::new("a1", "MyTable", "AWS::DynamoDB::Table", "CREATE_COMPLETE", at(2)),
        );

        let (tx, mut rx) = mpsc::channel(8);
        let mut aggregator =
            EventAggregator::new(api.clone(), "root", at(0), Duration::from_millis(5));
        aggregator.subscribe(tx);

        assert_eq!(aggregator.tick().await.unwrap(), 1);
        assert_eq!(aggregator.sources(), vec!["root", "addons-id"]);
        let first = rx.recv().await.unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|e| e.stack == "root"));

        assert_eq!(aggregator.tick().await.unwrap(), 0);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].stack, "addons-id");
        assert_eq!(second[0].event.logical_id, "MyTable");
    }

    #[tokio::test]
    async fn test_batches_broadcast_to_every_sink() {
        let api = Arc::new(InMemoryStackApi::new());
        api.put_stack(Stack::new("root", StackStatus::CreateInProgress));
        api.push_event(
            "root",
            StackEvent::new("e1", "Queue", "AWS::SQS::Queue", "CREATE_COMPLETE", at(1)),
        );

        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        let (closed_tx, closed_rx) = mpsc::channel(8);
        drop(closed_rx);

        let mut aggregator = EventAggregator::new(api, "root", at(0), Duration::from_millis(5));
        aggregator.subscribe(tx1);
        aggregator.subscribe(closed_tx);
        aggregator.subscribe(tx2);

        aggregator.tick().await.unwrap();
        assert_eq!(rx1.recv().await.unwrap().len(), 1);
        assert_eq!(rx2.recv().await.unwrap().len(), 1);
        assert_eq!(aggregator.sinks.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_tick_publishes_nothing() {
        let api = Arc::new(InMemoryStackApi::new());
        api.put_stack(Stack::new("root", StackStatus::CreateInProgress));

        let (tx, mut rx) = mpsc::channel(8);
        let mut aggregator = EventAggregator::new(api, "root", at(0), Duration::from_millis(5));
        aggregator.subscribe(tx);

        aggregator.tick().await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel_and_closes_sinks() {
        let api = Arc::new(InMemoryStackApi::new());
        api.put_stack(Stack::new("root", StackStatus::CreateInProgress));

        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(stream_events(
            api.clone(),
            "root",
            at(0),
            vec![tx],
            cancel.clone(),
            Duration::from_millis(5),
        ));

        api.push_event(
            "root",
            StackEvent::new("e1", "Queue", "AWS::SQS::Queue", "CREATE_COMPLETE", at(1)),
        );
        cancel.cancel();

        handle.await.unwrap().unwrap();

        let mut delivered = 0;
        while let Some(batch) = rx.recv().await {
            delivered += batch.len();
        }
        assert_eq!(delivered, 1);
    }

    #[tokio::test]
    async fn test_fetch_error_ends_aggregation() {
        let api = Arc::new(InMemoryStackApi::new());
        api.put_stack(Stack::new("root", StackStatus::CreateInProgress));
        api.push_event("root", nested("r1", "CREATE_IN_PROGRESS", "addons-id", 1));
        // The nested stack has no history and no stack record: its fetch fails.

        let (tx, mut rx) = mpsc::channel(8);
        let result = stream_events(
            api.clone(),
            "root",
            at(0),
            vec![tx],
            CancellationToken::new(),
            Duration::from_millis(5),
        )
        .await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("addons-id"));
        assert!(api.calls(Operation::DescribeStackEvents) >= 2);

        assert_eq!(rx.recv().await.unwrap().len(), 1);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_nested_cutoff_starts_at_first_parent_event() {
        let api = Arc::new(InMemoryStackApi::new());
        api.put_stack(Stack::new("root", StackStatus::CreateInProgress));
        // The first parent event carries no physical id yet.
        api.push_event("root", nested("r1", "CREATE_IN_PROGRESS", "", 1));
        api.push_event("root", nested("r2", "CREATE_IN_PROGRESS", "addons-id", 3));
        api.push_event(
            "addons-id",
            StackEvent::new("a1", "MyTable", "AWS::DynamoDB::Table", "CREATE_IN_PROGRESS", at(2)),
        );

        let (tx, mut rx) = mpsc::channel(8);
        let mut aggregator =
            EventAggregator::new(api.clone(), "root", at(0), Duration::from_millis(5));
        aggregator.subscribe(tx);

        assert_eq!(aggregator.tick().await.unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap().len(), 2);

        aggregator.tick().await.unwrap();
        let nested_batch = rx.recv().await.unwrap();
        assert_eq!(nested_batch.len(), 1);
        assert_eq!(nested_batch[0].stack, "addons-id");
        assert_eq!(nested_batch[0].event.event_id, "a1");
    }

    #[tokio::test]
    async fn test_failing_tick_still_publishes_fetched_events() {
        let api = Arc::new(InMemoryStackApi::new());
        api.put_stack(Stack::new("root", StackStatus::CreateInProgress));
        api.push_event("root", nested("r1", "CREATE_IN_PROGRESS", "addons-id", 1));

        let (tx, mut rx) = mpsc::channel(8);
        let mut aggregator =
            EventAggregator::new(api.clone(), "root", at(0), Duration::from_millis(5));
        aggregator.subscribe(tx);

        assert_eq!(aggregator.tick().await.unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap().len(), 1);

        // Root is polled first and succeeds; the nested stack is unknown.
        api.push_event(
            "root",
            StackEvent::new("r2", "Cluster", "AWS::ECS::Cluster", "CREATE_COMPLETE", at(2)),
        );
        let err = aggregator.tick().await.unwrap_err();
        assert!(err.to_string().contains("addons-id"));

        let partial = rx.try_recv().unwrap();
        assert_eq!(partial.len(), 1);
        assert_eq!(partial[0].stack, "root");
        assert_eq!(partial[0].event.event_id, "r2");
        assert_eq!(partial[0].event.status, "CREATE_COMPLETE");
    }
}
