//! Deployment orchestration.
//!
//! `Deployer` ties the pieces together for one stack operation:
//! - renders the template and submits a change set (create, falling back
//!   to update when the stack already exists)
//! - waits for review and stops early when there is nothing to change
//! - streams root and nested stack events into the progress renderer while
//!   the change set executes
//! - watches the stack status until it is terminal and turns a failure into
//!   the first failing resource event

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{ApiError, RolloutResolver, StackApi, TemplateRenderer};
use crate::domain::{ChangeSetType, Parameter, Stack, StackStatus, Tag};

use super::aggregator::{EventAggregator, DEFAULT_POLL_INTERVAL};
use super::change_set::{ChangeSetController, ChangeSetError, ReviewOutcome, ReviewSettings};
use super::event_source::{EventSource, StreamError};
use super::renderer::{ProgressRenderer, RenderOptions, RenderTree};

/// Batches buffered between the aggregator and the renderer
const PROGRESS_CHANNEL_CAPACITY: usize = 64;

/// Deployment errors
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("failed to render template {template}: {message}")]
    Render { template: String, message: String },

    #[error(transparent)]
    ChangeSet(#[from] ChangeSetError),

    #[error("stack {stack} finished in {status}: resource {logical_id} failed: {reason}")]
    StackFailed {
        stack: String,
        status: StackStatus,
        logical_id: String,
        reason: String,
    },

    #[error("stack {stack} finished in {status} without a failing resource event")]
    StackFailedWithoutCause { stack: String, status: StackStatus },

    #[error("stack {stack} disappeared during the operation")]
    StackVanished { stack: String },

    #[error("{op} failed for stack {stack}: {source}")]
    Api {
        op: &'static str,
        stack: String,
        #[source]
        source: ApiError,
    },

    #[error("stack {stack} did not reach a terminal status within {seconds}s")]
    Timeout { stack: String, seconds: u64 },

    #[error("failed to write progress output: {0}")]
    Output(#[from] std::io::Error),
}

/// Timing for one deployment
#[derive(Debug, Clone)]
pub struct DeploySettings {
    /// Delay between event polling ticks
    pub event_poll_interval: Duration,

    /// Delay between stack status polls
    pub status_poll_interval: Duration,

    pub review: ReviewSettings,

    /// Upper bound on waiting for a terminal stack status
    pub deploy_timeout: Duration,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            event_poll_interval: DEFAULT_POLL_INTERVAL,
            status_poll_interval: Duration::from_secs(5),
            review: ReviewSettings::default(),
            deploy_timeout: Duration::from_secs(3600),
        }
    }
}

/// What to deploy
#[derive(Debug, Clone, Default)]
pub struct DeployRequest {
    pub stack: String,

    /// Template id handed to the `TemplateRenderer`
    pub template: String,

    /// Template variables
    pub data: HashMap<String, String>,

    pub parameters: Vec<Parameter>,
    pub tags: Vec<Tag>,
    pub intent: ChangeSetType,
}

/// Successful deployment result
#[derive(Debug)]
pub enum DeployOutcome {
    /// The stack already matched the template; nothing was executed
    NoChanges,

    Deployed {
        status: StackStatus,
        tree: RenderTree,

        /// Set when event streaming stopped early; the status is still final
        stream_error: Option<String>,
    },
}

/// Successful deletion result
#[derive(Debug)]
pub struct DeleteOutcome {
    pub tree: RenderTree,
    pub stream_error: Option<String>,
}

/// Terminal result of the status watcher
enum Watched {
    Terminal(Stack),
    Gone,
}

/// Aggregator and renderer tasks for one operation
struct Progress {
    cancel: CancellationToken,
    aggregator: JoinHandle<Result<(), StreamError>>,
    renderer: JoinHandle<std::io::Result<RenderTree>>,
}

impl Progress {
    /// Stop streaming, wait for the final drain and the last redraw
    async fn stop(self) -> (Option<RenderTree>, Option<String>) {
        self.cancel.cancel();

        let stream_error = match self.aggregator.await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => {
                warn!(error = %e, "Event streaming stopped early");
                Some(e.to_string())
            }
            Err(e) => {
                warn!(error = %e, "Event streaming task failed");
                Some(e.to_string())
            }
        };

        // The aggregator has dropped its senders, so the renderer finishes.
        let tree = match self.renderer.await {
            Ok(Ok(tree)) => Some(tree),
            Ok(Err(e)) => {
                warn!(error = %e, "Progress output failed");
                None
            }
            Err(e) => {
                warn!(error = %e, "Progress renderer task failed");
                None
            }
        };

        (tree, stream_error)
    }
}

/// Runs stack deployments against a `StackApi`
pub struct Deployer {
    api: Arc<dyn StackApi>,
    templates: Arc<dyn TemplateRenderer>,
    resolver: Option<Arc<dyn RolloutResolver>>,
    settings: DeploySettings,
    render_options: RenderOptions,
}

impl Deployer {
    pub fn new(api: Arc<dyn StackApi>, templates: Arc<dyn TemplateRenderer>) -> Self {
        Self {
            api,
            templates,
            resolver: None,
            settings: DeploySettings::default(),
            render_options: RenderOptions::default(),
        }
    }

    pub fn with_settings(mut self, settings: DeploySettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_render_options(mut self, options: RenderOptions) -> Self {
        self.render_options = options;
        self
    }

    /// Enrich failing services in the progress tree
    pub fn with_resolver(mut self, resolver: Arc<dyn RolloutResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn settings(&self) -> &DeploySettings {
        &self.settings
    }

    /// Deploy a stack and stream its progress to `out`
    #[instrument(skip(self, request, out), fields(stack = %request.stack))]
    pub async fn deploy<W>(
        &self,
        request: &DeployRequest,
        out: W,
    ) -> Result<DeployOutcome, DeployError>
    where
        W: Write + Send + 'static,
    {
        let body = self
            .templates
            .render(&request.template, &request.data)
            .map_err(|e| DeployError::Render {
                template: request.template.clone(),
                message: format!("{:#}", e),
            })?;

        let mut controller = ChangeSetController::new(self.api.clone(), self.settings.review.clone());
        let submitted = controller
            .submit(
                &request.stack,
                &body,
                &request.parameters,
                &request.tags,
                request.intent,
            )
            .await;

        match submitted {
            Err(ChangeSetError::StackAlreadyExists { .. }) => {
                info!("Stack already exists, submitting an update instead");
                controller
                    .submit(
                        &request.stack,
                        &body,
                        &request.parameters,
                        &request.tags,
                        ChangeSetType::Update,
                    )
                    .await?;
            }
            other => {
                other?;
            }
        }

        let changes = match controller.wait_for_review().await? {
            ReviewOutcome::NoChanges => {
                info!("No changes to deploy");
                return Ok(DeployOutcome::NoChanges);
            }
            ReviewOutcome::Changes(changes) => changes,
        };

        let mut renderer = self.renderer(&request.stack, out);
        renderer.render_changes(&request.stack, &changes)?;

        let cutoff = controller.created_at().unwrap_or_else(Utc::now);
        let progress = self.start_progress(&request.stack, cutoff, renderer);

        if let Err(e) = controller.execute().await {
            progress.stop().await;
            return Err(e.into());
        }

        let watched = self.watch_status(&request.stack).await;
        let (tree, stream_error) = progress.stop().await;
        let tree = tree.unwrap_or_else(|| RenderTree::new(&request.stack));

        let stack = match watched? {
            Watched::Terminal(stack) => stack,
            Watched::Gone => {
                controller.finish(false);
                return Err(DeployError::StackVanished {
                    stack: request.stack.clone(),
                });
            }
        };

        let success = stack.status.is_success();
        controller.finish(success);

        if !success {
            return Err(self.failure(&request.stack, stack.status, cutoff).await);
        }

        info!(status = %stack.status, "Deployment finished");
        Ok(DeployOutcome::Deployed {
            status: stack.status,
            tree,
            stream_error,
        })
    }

    /// Delete a stack and stream its progress until it is gone
    #[instrument(skip(self, out))]
    pub async fn delete<W>(&self, stack: &str, out: W) -> Result<DeleteOutcome, DeployError>
    where
        W: Write + Send + 'static,
    {
        let existing = self.describe(stack).await?;
        let cutoff = Utc::now();

        self.api
            .delete_stack(stack)
            .await
            .map_err(|source| DeployError::Api {
                op: "delete stack",
                stack: stack.to_string(),
                source,
            })?;
        info!("Stack deletion started");

        // Deleted stacks stay addressable by id only.
        let stack_key = if existing.id.is_empty() {
            stack
        } else {
            existing.id.as_str()
        };
        let renderer = self.renderer(stack, out);
        let progress = self.start_progress(stack_key, cutoff, renderer);

        let watched = self.watch_status(stack).await;
        let (tree, stream_error) = progress.stop().await;
        let tree = tree.unwrap_or_else(|| RenderTree::new(stack));

        match watched? {
            Watched::Gone => {}
            Watched::Terminal(current) if current.status == StackStatus::DeleteComplete => {}
            Watched::Terminal(current) => {
                return Err(self.failure(stack_key, current.status, cutoff).await);
            }
        }

        info!("Stack deleted");
        Ok(DeleteOutcome { tree, stream_error })
    }

    /// Current stack state
    pub async fn describe(&self, stack: &str) -> Result<Stack, DeployError> {
        self.api
            .describe_stack(stack)
            .await
            .map_err(|source| DeployError::Api {
                op: "describe stack",
                stack: stack.to_string(),
                source,
            })
    }

    fn renderer<W: Write>(&self, stack: &str, out: W) -> ProgressRenderer<W> {
        let renderer = ProgressRenderer::new(stack, out, self.render_options);
        match &self.resolver {
            Some(resolver) => renderer.with_resolver(resolver.clone()),
            None => renderer,
        }
    }

    fn start_progress<W>(
        &self,
        stack_key: &str,
        cutoff: DateTime<Utc>,
        renderer: ProgressRenderer<W>,
    ) -> Progress
    where
        W: Write + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);

        let mut aggregator = EventAggregator::new(
            self.api.clone(),
            stack_key,
            cutoff,
            self.settings.event_poll_interval,
        );
        aggregator.subscribe(tx);

        Progress {
            aggregator: tokio::spawn(aggregator.run(cancel.clone())),
            renderer: tokio::spawn(renderer.consume(rx)),
            cancel,
        }
    }

    /// Poll the stack until its status is terminal or it no longer exists
    async fn watch_status(&self, stack: &str) -> Result<Watched, DeployError> {
        let poll = async {
            loop {
                match self.api.describe_stack(stack).await {
                    Ok(current) if current.status.is_terminal() => {
                        return Ok(Watched::Terminal(current));
                    }
                    Ok(current) => debug!(status = %current.status, "Stack still in progress"),
                    Err(ApiError::NotFound(_)) => return Ok(Watched::Gone),
                    Err(source) => {
                        return Err(DeployError::Api {
                            op: "describe stack",
                            stack: stack.to_string(),
                            source,
                        });
                    }
                }
                tokio::time::sleep(self.settings.status_poll_interval).await;
            }
        };

        tokio::time::timeout(self.settings.deploy_timeout, poll)
            .await
            .map_err(|_| DeployError::Timeout {
                stack: stack.to_string(),
                seconds: self.settings.deploy_timeout.as_secs(),
            })?
    }

    /// Build the error for a failed terminal status from the first failing
    /// event in the stack's history since `cutoff`.
    async fn failure(&self, stack: &str, status: StackStatus, cutoff: DateTime<Utc>) -> DeployError {
        let mut source = EventSource::new(self.api.clone(), stack, cutoff);

        let cause = match source.fetch().await {
            Ok(events) => events.into_iter().find(|e| e.is_failure()),
            Err(e) => {
                warn!(error = %e, "Could not fetch events to find the failure cause");
                None
            }
        };

        match cause {
            Some(event) => DeployError::StackFailed {
                stack: stack.to_string(),
                status,
                logical_id: event.logical_id,
                reason: event.reason.unwrap_or_default(),
            },
            None => DeployError::StackFailedWithoutCause {
                stack: stack.to_string(),
                status,
            },
        }
    }
}
