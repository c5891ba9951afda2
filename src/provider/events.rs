//! Lifecycle notifications.
//!
//! Sinks are fire-and-forget: the lifecycle manager logs a failing sink and
//! carries on.

use serde_json::Value;
use tracing::info;

pub const BEFORE_INSTALL: &str = "before_install";
pub const INSTALLED: &str = "installed";
pub const BEFORE_REMOVE: &str = "before_remove";
pub const REMOVED: &str = "removed";

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &str, payload: &Value) -> anyhow::Result<()>;
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &str, _payload: &Value) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Logs every event at `info` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &str, payload: &Value) -> anyhow::Result<()> {
        info!(target: "levitate_env::events", event, %payload, "lifecycle event");
        Ok(())
    }
}
