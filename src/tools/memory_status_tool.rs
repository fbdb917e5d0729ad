use std::sync::Arc;
use std::time::UNIX_EPOCH;

use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::mcp::types::{CallToolResult, ToolAnnotations, ToolDefinition};
use crate::utils::memory_monitor::MemoryMonitor;

pub static MEMORY_STATUS_TOOL_DEFINITION: Lazy<ToolDefinition> = Lazy::new(|| ToolDefinition {
    name: "memory-status".to_string(),
    description: "Report the server's current memory usage against its configured ceiling"
        .to_string(),
    input_schema: json!({
        "type": "object",
        "properties": {}
    }),
    annotations: Some(ToolAnnotations {
        title: Some("Memory Status".to_string()),
        read_only_hint: Some(true),
        open_world_hint: Some(false),
    }),
});

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MemoryStatus {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    memory_usage_mb: f64,
    memory_percent: f64,
    ceiling_mb: f64,
    near_ceiling: bool,
    measured: bool,
    /// Unix time of the reading, in milliseconds.
    sampled_at_ms: u64,
}

pub struct MemoryStatusTool {
    monitor: Arc<dyn MemoryMonitor>,
    headroom_mb: f64,
}

impl MemoryStatusTool {
    pub fn new(monitor: Arc<dyn MemoryMonitor>, headroom_mb: f64) -> Self {
        Self {
            monitor,
            headroom_mb,
        }
    }

    pub async fn execute(&self, _arguments: Option<serde_json::Value>) -> CallToolResult {
        let snapshot = self.monitor.snapshot();
        let status = MemoryStatus {
            status: "healthy",
            service: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            memory_usage_mb: round2(snapshot.used_mb),
            memory_percent: round2(snapshot.percent_of_ceiling),
            ceiling_mb: self.monitor.ceiling_mb(),
            near_ceiling: self.monitor.is_near_ceiling(&snapshot, self.headroom_mb),
            measured: snapshot.measured,
            sampled_at_ms: snapshot
                .timestamp
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_millis() as u64)
                .unwrap_or(0),
        };
        debug!(target: "memory_status", used_mb = status.memory_usage_mb, "Memory status requested");

        match serde_json::to_string_pretty(&status) {
            Ok(body) => CallToolResult::success(body),
            Err(e) => CallToolResult::error(format!("Failed to serialize memory status: {}", e)),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
