//! Service configuration.

use anyhow::{bail, Context as _, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Largest capacity a broadcast channel accepts.
pub const MAX_EVENT_CAPACITY: usize = usize::MAX / 2;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Identifier stamped on every context of the session.
    pub session_id: String,
    /// Capacity of the breakpoint event broadcast.
    pub event_capacity: usize,
    /// Reject watchpoints that are neither read nor write. When off, they
    /// become write watchpoints.
    pub strict_watchpoint_access: bool,
    /// Name of the executor thread.
    pub thread_name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            session_id: "gdb-0".to_string(),
            event_capacity: 100,
            strict_watchpoint_access: true,
            thread_name: "mi-services".to_string(),
        }
    }
}

impl ServiceConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse service configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration from {}", path.display()))?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.session_id.trim().is_empty() {
            bail!("session_id must not be empty");
        }
        if self.event_capacity == 0 {
            bail!("event_capacity must be at least 1");
        }
        if self.event_capacity > MAX_EVENT_CAPACITY {
            bail!("event_capacity must be at most {MAX_EVENT_CAPACITY}");
        }
        Ok(())
    }
}
