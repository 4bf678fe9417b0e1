//! Live progress tree.
//!
//! The renderer owns the `RenderTree` and the output sink. It applies each
//! batch from the aggregator and redraws the whole tree. Everything here
//! runs on the single consumer loop, so the tree needs no locking.

use std::collections::{HashMap, HashSet};
use std::io::{self, Write};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use colored::Colorize;
use crossterm::cursor::MoveUp;
use crossterm::queue;
use crossterm::terminal::{Clear, ClearType};
use tokio::sync::mpsc;
use tracing::debug;

use crate::adapters::RolloutResolver;
use crate::domain::{Change, ChangeAction, EventBatch, ResourceKind, StreamEvent};

/// One resource (or stack) in the tree
#[derive(Debug, Clone)]
pub struct RenderNode {
    pub name: String,
    pub resource_type: String,

    /// Status from the newest event applied so far
    pub status: String,
    pub reason: Option<String>,

    /// Timestamp of the event that set `status`
    pub updated_at: Option<DateTime<Utc>>,

    /// Extra diagnostic line (e.g. service rollout state)
    pub detail: Option<String>,

    children: Vec<usize>,
}

impl RenderNode {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource_type: String::new(),
            status: String::new(),
            reason: None,
            updated_at: None,
            detail: None,
            children: Vec::new(),
        }
    }
}

/// Arena-backed tree of stacks and resources. Node 0 is the root stack.
#[derive(Debug, Clone)]
pub struct RenderTree {
    nodes: Vec<RenderNode>,

    /// (stack key, logical id) -> node
    resources: HashMap<(String, String), usize>,

    /// stack key -> node whose children are that stack's resources
    owners: HashMap<String, usize>,
}

impl RenderTree {
    pub fn new(root_stack: &str) -> Self {
        let mut owners = HashMap::new();
        owners.insert(root_stack.to_string(), 0);

        Self {
            nodes: vec![RenderNode::new(root_stack)],
            resources: HashMap::new(),
            owners,
        }
    }

    pub fn root(&self) -> &RenderNode {
        &self.nodes[0]
    }

    pub fn node(&self, idx: usize) -> Option<&RenderNode> {
        self.nodes.get(idx)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Children of a node, in first-seen order
    pub fn children(&self, idx: usize) -> impl Iterator<Item = &RenderNode> {
        self.nodes
            .get(idx)
            .map(|n| n.children.as_slice())
            .unwrap_or_default()
            .iter()
            .map(move |&child| &self.nodes[child])
    }

    /// Follow display names down from the root
    pub fn find(&self, path: &[&str]) -> Option<&RenderNode> {
        let mut current = 0;
        for name in path {
            current = *self.nodes[current]
                .children
                .iter()
                .find(|&&child| self.nodes[child].name == *name)?;
        }
        self.nodes.get(current)
    }

    /// Apply one event. Returns the node index when the event changed it.
    ///
    /// An event older than the one already applied to the same resource is
    /// ignored, so late deliveries never roll a status back.
    pub fn apply(&mut self, stream_event: &StreamEvent) -> Option<usize> {
        let event = &stream_event.event;
        let owner = self.owners.get(&stream_event.stack).copied().unwrap_or(0);

        let about_stack_itself =
            event.logical_id == stream_event.stack || event.physical_id == stream_event.stack;

        let idx = if about_stack_itself {
            owner
        } else {
            let key = (stream_event.stack.clone(), event.logical_id.clone());
            match self.resources.get(&key) {
                Some(&idx) => idx,
                None => {
                    let idx = self.nodes.len();
                    self.nodes.push(RenderNode::new(&event.logical_id));
                    self.nodes[owner].children.push(idx);
                    self.resources.insert(key, idx);
                    idx
                }
            }
        };

        if !about_stack_itself
            && event.kind() == ResourceKind::NestedStack
            && !event.physical_id.is_empty()
        {
            self.owners.entry(event.physical_id.clone()).or_insert(idx);
        }

        let node = &mut self.nodes[idx];
        if node.updated_at.is_some_and(|t| event.timestamp < t) {
            return None;
        }

        node.status = event.status.clone();
        node.reason = event.reason.clone();
        node.updated_at = Some(event.timestamp);
        if !event.resource_type.is_empty() {
            node.resource_type = event.resource_type.clone();
        }
        Some(idx)
    }

    fn set_detail(&mut self, idx: usize, detail: String) {
        if let Some(node) = self.nodes.get_mut(idx) {
            node.detail = Some(detail);
        }
    }

    /// Depth-first (depth, node) pairs starting at the root
    fn walk(&self) -> Vec<(usize, &RenderNode)> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(0usize, 0usize)];

        while let Some((idx, depth)) = stack.pop() {
            let node = &self.nodes[idx];
            out.push((depth, node));
            for &child in node.children.iter().rev() {
                stack.push((child, depth + 1));
            }
        }
        out
    }

    /// Render the tree as lines of `<name> <status> [reason]`
    pub fn render_lines(&self, color: bool) -> Vec<String> {
        let mut lines = Vec::new();

        for (depth, node) in self.walk() {
            let indent = "  ".repeat(depth);
            let mut line = format!("{}{}", indent, node.name);
            if !node.status.is_empty() {
                line.push(' ');
                line.push_str(&paint_status(&node.status, color));
            }
            if let Some(reason) = &node.reason {
                line.push_str(&format!(" [{}]", reason));
            }
            lines.push(line);

            if let Some(detail) = &node.detail {
                lines.push(format!("{}  {}", indent, detail));
            }
        }

        lines
    }

    /// Plain-text rendering
    pub fn render(&self) -> String {
        let mut out = self.render_lines(false).join("\n");
        out.push('\n');
        out
    }
}

fn paint_status(status: &str, color: bool) -> String {
    if !color {
        return status.to_string();
    }
    if status.contains("FAILED") || status.contains("ROLLBACK") {
        status.red().to_string()
    } else if status.ends_with("COMPLETE") {
        status.green().to_string()
    } else if status.contains("IN_PROGRESS") {
        status.yellow().to_string()
    } else {
        status.to_string()
    }
}

/// Output behaviour of the renderer
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    /// Erase the previous drawing before each redraw
    pub live: bool,
    pub color: bool,
}

/// Consumes event batches and keeps the tree drawn on the sink
pub struct ProgressRenderer<W: Write> {
    tree: RenderTree,
    out: W,
    options: RenderOptions,
    resolver: Option<Arc<dyn RolloutResolver>>,

    /// Lines drawn by the last redraw
    drawn: usize,

    /// Nodes already enriched, so each failure is looked up once
    enriched: HashSet<usize>,
}

impl<W: Write> ProgressRenderer<W> {
    pub fn new(root_stack: &str, out: W, options: RenderOptions) -> Self {
        Self {
            tree: RenderTree::new(root_stack),
            out,
            options,
            resolver: None,
            drawn: 0,
            enriched: HashSet::new(),
        }
    }

    /// Enrich failing services with rollout detail
    pub fn with_resolver(mut self, resolver: Arc<dyn RolloutResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn tree(&self) -> &RenderTree {
        &self.tree
    }

    pub fn into_parts(self) -> (RenderTree, W) {
        (self.tree, self.out)
    }

    /// Apply a batch in order and redraw
    pub async fn notify(&mut self, batch: &[StreamEvent]) -> io::Result<()> {
        for stream_event in batch {
            let Some(idx) = self.tree.apply(stream_event) else {
                continue;
            };

            let event = &stream_event.event;
            if event.is_failure() && event.kind() == ResourceKind::Service {
                self.enrich(idx, &event.physical_id).await;
            }
        }

        self.redraw()
    }

    /// Apply batches until the channel closes, then return the final tree
    pub async fn consume(mut self, mut rx: mpsc::Receiver<EventBatch>) -> io::Result<RenderTree> {
        while let Some(batch) = rx.recv().await {
            self.notify(&batch).await?;
        }
        debug!("Event stream closed");
        Ok(self.tree)
    }

    /// Print the proposed changes of a change set
    pub fn render_changes(&mut self, stack: &str, changes: &[Change]) -> io::Result<()> {
        if changes.is_empty() {
            writeln!(self.out, "No resource changes proposed for stack {}", stack)?;
            return self.out.flush();
        }

        writeln!(self.out, "Proposed changes for stack {}:", stack)?;
        for change in changes {
            let marker = match change.action {
                ChangeAction::Add => "+",
                ChangeAction::Modify => "~",
                ChangeAction::Remove => "-",
                ChangeAction::Import => "<",
                ChangeAction::Dynamic => "?",
            };
            let mut line = format!(
                "  {} {} ({})",
                marker, change.logical_id, change.resource_type
            );
            if change.replacement {
                line.push_str(" [replacement]");
            }
            writeln!(self.out, "{}", line)?;
        }
        self.out.flush()
    }

    /// Best-effort rollout lookup; failures only lose the extra line
    async fn enrich(&mut self, idx: usize, physical_id: &str) {
        let Some(resolver) = self.resolver.clone() else {
            return;
        };
        if !self.enriched.insert(idx) {
            return;
        }
        let Some((cluster, service)) = service_ref(physical_id) else {
            return;
        };

        match resolver.resolve_service_rollout_status(cluster, service).await {
            Ok(status) => self.tree.set_detail(idx, status.to_string()),
            Err(e) => debug!(%cluster, %service, error = %e, "Rollout lookup failed"),
        }
    }

    fn redraw(&mut self) -> io::Result<()> {
        if self.options.live && self.drawn > 0 {
            let up = u16::try_from(self.drawn).unwrap_or(u16::MAX);
            queue!(self.out, MoveUp(up), Clear(ClearType::FromCursorDown))?;
        }

        let lines = self.tree.render_lines(self.options.color);
        for line in &lines {
            writeln!(self.out, "{}", line)?;
        }
        self.drawn = lines.len();
        self.out.flush()
    }
}

/// Split a service physical id of the form `.../<cluster>/<service>`
fn service_ref(physical_id: &str) -> Option<(&str, &str)> {
    let mut parts = physical_id.rsplit('/');
    let service = parts.next().filter(|s| !s.is_empty())?;
    let cluster = parts.next().filter(|s| !s.is_empty())?;
    Some((cluster, service))
}
