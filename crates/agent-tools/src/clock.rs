use agent_core::error::AgentError;
use agent_core::tool_registry::Tool;
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use serde_json::{json, Value};
use tracing::debug;

pub const TOOL_NAME: &str = "get_current_time";

/// Rendering of the returned timestamp, e.g. `2024-05-01 12:34:56.000123`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Reports the current local date and time.
pub struct ClockTool {
    now: fn() -> NaiveDateTime,
}

impl Default for ClockTool {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockTool {
    /// Clock reading the system's local time.
    pub fn new() -> Self {
        Self {
            now: || Local::now().naive_local(),
        }
    }

    /// Clock reading from a custom time source.
    pub fn with_source(now: fn() -> NaiveDateTime) -> Self {
        Self { now }
    }
}

#[async_trait]
impl Tool for ClockTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Returns the current date and time as a string."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _args: Value) -> Result<String, AgentError> {
        let now = (self.now)();
        debug!("Clock read: {}", now);
        Ok(now.format(TIMESTAMP_FORMAT).to_string())
    }
}
