//! Command-line interface for stackctl.
//!
//! Provides commands for deploying and deleting stacks, following stack
//! events, checking stack status, and showing the resolved configuration.

use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::adapters::{FileTemplateRenderer, HttpStackClient};
use crate::config;
use crate::core::{
    stream_events, DeployOutcome, Deployer, ProgressRenderer, RenderOptions, StackManifest,
};
use crate::domain::ChangeSetType;

/// stackctl - Deploy infrastructure stacks through reviewed change sets
#[derive(Parser, Debug)]
#[command(name = "stackctl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deploy a stack from a manifest
    Deploy {
        /// Path to the stack manifest (YAML)
        manifest: PathBuf,

        /// Submit an update change set even if the manifest says create
        #[arg(long)]
        update: bool,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Delete a stack and follow its progress
    Delete {
        /// Stack name
        stack: String,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Follow a stack's events (Ctrl-C to stop)
    Events {
        /// Stack name
        stack: String,

        /// Also show events from the last N minutes
        #[arg(long, default_value = "0")]
        since_minutes: i64,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Show the current state of a stack
    Status {
        /// Stack name
        stack: String,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Deploy {
                manifest,
                update,
                no_color,
            } => deploy(&manifest, update, no_color).await,
            Commands::Delete { stack, no_color } => delete(&stack, no_color).await,
            Commands::Events {
                stack,
                since_minutes,
                no_color,
            } => follow_events(&stack, since_minutes, no_color).await,
            Commands::Status { stack } => show_status(&stack).await,
            Commands::Config => show_config(),
        }
    }
}

/// HTTP client for the configured endpoint
fn client() -> Result<Arc<HttpStackClient>> {
    let endpoint = config::endpoint()?;
    let token = config::token()?;
    debug!(%endpoint, "Using stack service");
    Ok(Arc::new(HttpStackClient::new(endpoint, token)))
}

/// Live redraw and color only make sense on a terminal
fn render_options(no_color: bool) -> RenderOptions {
    let tty = io::stdout().is_terminal();
    RenderOptions {
        live: tty,
        color: tty && !no_color,
    }
}

fn deployer(templates_dir: &Path, no_color: bool) -> Result<Deployer> {
    let api = client()?;

    Ok(Deployer::new(
        api.clone(),
        Arc::new(FileTemplateRenderer::new(templates_dir)),
    )
    .with_resolver(api)
    .with_settings(config::deploy_settings()?)
    .with_render_options(render_options(no_color)))
}

/// Deploy a stack from a manifest
async fn deploy(manifest_path: &Path, update: bool, no_color: bool) -> Result<()> {
    let manifest = StackManifest::from_file(manifest_path)?;
    manifest
        .validate()
        .with_context(|| format!("Invalid manifest: {}", manifest_path.display()))?;

    let mut request = manifest.to_request();
    if update {
        request.intent = ChangeSetType::Update;
    }

    println!("Deploying stack {}", request.stack.bold());
    let deployer = deployer(&manifest.base_dir, no_color)?;

    match deployer.deploy(&request, io::stdout()).await? {
        DeployOutcome::NoChanges => {
            println!("{} Stack {} is already up to date", "=".dimmed(), request.stack);
        }
        DeployOutcome::Deployed {
            status,
            stream_error,
            ..
        } => {
            if let Some(e) = stream_error {
                eprintln!("{} Progress stream incomplete: {}", "!".yellow(), e);
            }
            println!(
                "{} Stack {} deployed ({})",
                "✓".green(),
                request.stack,
                status
            );
        }
    }

    Ok(())
}

/// Delete a stack
async fn delete(stack: &str, no_color: bool) -> Result<()> {
    println!("Deleting stack {}", stack.bold());
    let deployer = deployer(Path::new("."), no_color)?;

    let outcome = deployer.delete(stack, io::stdout()).await?;
    if let Some(e) = outcome.stream_error {
        eprintln!("{} Progress stream incomplete: {}", "!".yellow(), e);
    }
    println!("{} Stack {} deleted", "✓".green(), stack);

    Ok(())
}

/// Follow a stack's events until Ctrl-C
async fn follow_events(stack: &str, since_minutes: i64, no_color: bool) -> Result<()> {
    let api = client()?;
    let settings = config::deploy_settings()?;
    let cutoff = Utc::now() - Duration::minutes(since_minutes.max(0));

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let (tx, rx) = mpsc::channel(64);
    let renderer = ProgressRenderer::new(stack, io::stdout(), render_options(no_color))
        .with_resolver(api.clone());
    let rendering = tokio::spawn(renderer.consume(rx));

    let streamed = stream_events(
        api,
        stack,
        cutoff,
        vec![tx],
        cancel,
        settings.event_poll_interval,
    )
    .await;

    rendering
        .await
        .context("Progress renderer task failed")?
        .context("Failed to write progress output")?;
    streamed?;

    Ok(())
}

/// Show the current state of a stack
async fn show_status(stack_name: &str) -> Result<()> {
    let api = client()?;
    let deployer = Deployer::new(api, Arc::new(FileTemplateRenderer::default()));
    let stack = deployer.describe(stack_name).await?;

    println!("Stack:  {}", stack.name);
    println!("ID:     {}", stack.id);
    println!("Status: {}", stack.status);
    if let Some(reason) = &stack.status_reason {
        println!("Reason: {}", reason);
    }

    if !stack.parameters.is_empty() {
        println!("\nParameters:");
        for p in &stack.parameters {
            println!("  {}: {}", p.key, p.value);
        }
    }

    if !stack.outputs.is_empty() {
        println!("\nOutputs:");
        for o in &stack.outputs {
            match &o.description {
                Some(d) => println!("  {}: {}  ({})", o.key, o.value, d),
                None => println!("  {}: {}", o.key, o.value),
            }
        }
    }

    if !stack.tags.is_empty() {
        println!("\nTags:");
        for t in &stack.tags {
            println!("  {}: {}", t.key, t.value);
        }
    }

    Ok(())
}

/// Show resolved configuration
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("stackctl configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!("Home:        {}", cfg.home.display());
    println!(
        "Endpoint:    {}",
        cfg.endpoint.as_deref().unwrap_or("(not set)")
    );
    println!(
        "Token:       {}",
        if cfg.token.is_some() { "(set)" } else { "(not set)" }
    );
    println!();
    println!("Polling:");
    println!("  Event interval:       {}s", cfg.polling.event_interval_seconds);
    println!("  Status interval:      {}s", cfg.polling.status_interval_seconds);
    println!("  Change set interval:  {}s", cfg.polling.change_set_interval_seconds);
    println!("  Change set timeout:   {}s", cfg.polling.change_set_timeout_seconds);
    println!("  Deploy timeout:       {}s", cfg.polling.deploy_timeout_seconds);

    Ok(())
}
