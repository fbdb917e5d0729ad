use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::transport::StdioTransport;
use super::types::*;
use crate::config::PipelineConfig;
use crate::pipeline::DocumentPipeline;
use crate::tools::{
    document_qa_tool::{DocumentQaTool, DOCUMENT_QA_TOOL_DEFINITION},
    memory_status_tool::{MemoryStatusTool, MEMORY_STATUS_TOOL_DEFINITION},
};
use crate::utils::memory_monitor::MemoryMonitor;

pub struct McpServer {
    transport: StdioTransport,
    config: Arc<PipelineConfig>,
    monitor: Arc<dyn MemoryMonitor>,
    /// Present only when an answer service is configured.
    pipeline: Option<Arc<DocumentPipeline>>,
    initialized: bool,
}

impl McpServer {
    pub fn new(
        config: Arc<PipelineConfig>,
        monitor: Arc<dyn MemoryMonitor>,
        pipeline: Option<Arc<DocumentPipeline>>,
    ) -> Self {
        Self {
            transport: StdioTransport::new(),
            config,
            monitor,
            pipeline,
            initialized: false,
        }
    }

    pub async fn start(&mut self) -> Result<()> {
        info!("MCP server started and listening on stdio");

        loop {
            match self.transport.read_message().await? {
                Some(message) => match message {
                    McpMessage::Request(request) => {
                        let response = self.handle_request(request).await;
                        self.transport.write_response(response).await?;
                    }
                    McpMessage::Notification(notification) => {
                        self.handle_notification(notification).await;
                    }
                },
                None => {
                    info!("Client disconnected");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn handle_request(&mut self, request: McpRequest) -> McpResponse {
        let id = Self::ensure_valid_id(request.id.clone());

        match request.method.as_str() {
            "initialize" => self.handle_initialize(request).await,
            "tools/list" => self.handle_list_tools(request).await,
            "tools/call" => self.handle_call_tool(request).await,
            "ping" => self.handle_ping(request).await,
            _ => McpResponse::error(id, -32601, "Method not found"),
        }
    }

    async fn handle_notification(&mut self, notification: McpNotification) {
        debug!("Received notification: {}", notification.method);

        match notification.method.as_str() {
            "notifications/initialized" => {
                info!("Client initialization completed");
                self.initialized = true;
            }
            "notifications/cancelled" => {
                debug!("Request cancelled notification received");
            }
            _ => {
                warn!("Unknown notification method: {}", notification.method);
            }
        }
    }

    fn ensure_valid_id(id: Option<serde_json::Value>) -> serde_json::Value {
        match id {
            Some(serde_json::Value::Null) | None => serde_json::Value::String("0".to_string()),
            Some(value) => value,
        }
    }

    fn result_response<T: Serialize>(id: serde_json::Value, result: &T) -> McpResponse {
        match serde_json::to_value(result) {
            Ok(value) => McpResponse::result(id, value),
            Err(e) => {
                error!("Failed to serialize result: {}", e);
                McpResponse::error(id, -32603, format!("Internal error: {}", e))
            }
        }
    }

    async fn handle_initialize(&mut self, request: McpRequest) -> McpResponse {
        let id = Self::ensure_valid_id(request.id.clone());

        match request.params {
            Some(params) => match serde_json::from_value::<InitializeParams>(params) {
                Ok(init_params) => {
                    debug!(client = %init_params.client_info.name, "Initialize requested");
                    let result = InitializeResult {
                        protocol_version: "2024-11-05".to_string(),
                        server_info: ServerInfo {
                            name: "PDF Document Q&A MCP".to_string(),
                            version: env!("CARGO_PKG_VERSION").to_string(),
                            description: Some(
                                "A Model Context Protocol server that answers questions about PDF documents under a fixed memory ceiling"
                                    .to_string(),
                            ),
                        },
                        capabilities: ServerCapabilities {
                            tools: Some(ToolsCapability {
                                list_changed: Some(true),
                            }),
                            logging: Some(serde_json::json!({})),
                        },
                    };
                    Self::result_response(id, &result)
                }
                Err(e) => McpResponse::error(id, -32602, format!("Invalid params: {}", e)),
            },
            None => McpResponse::error(id, -32602, "Missing params"),
        }
    }

    async fn handle_list_tools(&self, request: McpRequest) -> McpResponse {
        let mut tools = vec![MEMORY_STATUS_TOOL_DEFINITION.clone()];

        // Add document Q&A tool if an answer service is configured
        if self.pipeline.is_some() {
            tools.push(DOCUMENT_QA_TOOL_DEFINITION.clone());
        }

        let result = ListToolsResult { tools };
        Self::result_response(Self::ensure_valid_id(request.id), &result)
    }

    async fn handle_call_tool(&self, request: McpRequest) -> McpResponse {
        let id = Self::ensure_valid_id(request.id.clone());

        match request.params {
            Some(params) => match serde_json::from_value::<CallToolParams>(params) {
                Ok(call_params) => {
                    let result = self.execute_tool(call_params).await;
                    Self::result_response(id, &result)
                }
                Err(e) => McpResponse::error(id, -32602, format!("Invalid params: {}", e)),
            },
            None => McpResponse::error(id, -32602, "Missing params"),
        }
    }

    async fn handle_ping(&self, request: McpRequest) -> McpResponse {
        let id = Self::ensure_valid_id(request.id.clone());

        McpResponse::result(id, serde_json::json!({}))
    }

    async fn execute_tool(&self, params: CallToolParams) -> CallToolResult {
        match params.name.as_str() {
            "document-qa" => match &self.pipeline {
                Some(pipeline) => {
                    let tool = DocumentQaTool::new(Arc::clone(pipeline), Arc::clone(&self.config));
                    tool.execute(params.arguments).await
                }
                None => CallToolResult::error(
                    "document-qa is unavailable: no Gemini API key configured (set GOOGLE_API_KEY)",
                ),
            },
            "memory-status" => {
                let tool = MemoryStatusTool::new(Arc::clone(&self.monitor), self.config.headroom_mb);
                tool.execute(params.arguments).await
            }
            _ => CallToolResult::error(format!("Tool not found: {}", params.name)),
        }
    }
}
