//! stackctl - Change-set driven stack deployment
//!
//! Deploys declarative infrastructure stacks through reviewed change sets
//! and streams progress for the root stack and every nested stack it
//! creates.
//!
//! # Architecture
//!
//! A deployment is a short pipeline:
//! - A change set is submitted and reviewed before anything is applied
//! - Empty change sets end the deployment without touching the stack
//! - While the change set executes, stack events are polled, merged
//!   across nested stacks, and drawn as a live resource tree
//! - A failed stack is reported with the first failing resource
//!
//! # Modules
//!
//! - `adapters`: Remote stack service, template rendering, rollout lookup
//! - `core`: Event streaming, change sets, rendering, orchestration
//! - `domain`: Data structures (Stack, ChangeSet, StackEvent)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Deploy a stack described by a manifest
//! stackctl deploy stacks/app.yaml
//!
//! # Follow events of a running stack
//! stackctl events demo-app --since-minutes 10
//!
//! # Delete a stack
//! stackctl delete demo-app
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use adapters::{ApiError, StackApi};
pub use core::{DeployError, DeployOutcome, DeployRequest, Deployer, StackManifest};
pub use domain::{Stack, StackEvent, StackStatus};
