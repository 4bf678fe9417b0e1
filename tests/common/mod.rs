//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use stackctl::adapters::{InMemoryStackApi, TemplateRenderer};
use stackctl::core::{DeployRequest, DeploySettings, Deployer, ReviewSettings};

/// Fixed instant plus `seconds`
pub fn at(seconds: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(seconds)
}

/// Renders every template id to a fixed body
pub struct StaticTemplates;

impl TemplateRenderer for StaticTemplates {
    fn render(&self, template_id: &str, _data: &HashMap<String, String>) -> anyhow::Result<String> {
        Ok(format!("# {}\nResources: {{}}\n", template_id))
    }
}

/// Millisecond polling so tests finish quickly
pub fn fast_settings() -> DeploySettings {
    DeploySettings {
        event_poll_interval: Duration::from_millis(5),
        status_poll_interval: Duration::from_millis(5),
        review: ReviewSettings {
            poll_interval: Duration::from_millis(5),
            timeout: Duration::from_secs(5),
        },
        deploy_timeout: Duration::from_secs(5),
    }
}

/// In-memory service whose change sets are created at `at(0)`
pub fn memory_api() -> Arc<InMemoryStackApi> {
    let api = Arc::new(InMemoryStackApi::new());
    api.set_clock(at(0));
    api
}

pub fn deployer(api: &Arc<InMemoryStackApi>) -> Deployer {
    Deployer::new(api.clone(), Arc::new(StaticTemplates)).with_settings(fast_settings())
}

pub fn request(stack: &str) -> DeployRequest {
    DeployRequest {
        stack: stack.to_string(),
        template: "app.yml".to_string(),
        ..Default::default()
    }
}

/// Cloneable sink so tests can read what the renderer wrote
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
