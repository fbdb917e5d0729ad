use std::sync::Arc;

use once_cell::sync::Lazy;
use serde_json::json;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::mcp::types::{CallToolResult, ToolAnnotations, ToolDefinition};
use crate::pipeline::request::{validate, DocumentQaRequest};
use crate::pipeline::DocumentPipeline;
use crate::utils::content_guard::build_error_payload;

pub static DOCUMENT_QA_TOOL_DEFINITION: Lazy<ToolDefinition> = Lazy::new(|| ToolDefinition {
    name: "document-qa".to_string(),
    description: "Download a PDF from a URL and answer questions about its content. \
        Extraction and answering degrade gracefully when the server is low on memory; \
        the response reports whether that happened."
        .to_string(),
    input_schema: json!({
        "type": "object",
        "properties": {
            "documents": {
                "type": "string",
                "description": "URL of the PDF document"
            },
            "questions": {
                "type": "array",
                "items": { "type": "string" },
                "minItems": 1,
                "maxItems": 20,
                "description": "Questions to answer from the document, answered in order"
            }
        },
        "required": ["documents", "questions"]
    }),
    annotations: Some(ToolAnnotations {
        title: Some("Document Q&A".to_string()),
        read_only_hint: Some(true),
        open_world_hint: Some(true),
    }),
});

pub struct DocumentQaTool {
    pipeline: Arc<DocumentPipeline>,
    config: Arc<PipelineConfig>,
}

impl DocumentQaTool {
    pub fn new(pipeline: Arc<DocumentPipeline>, config: Arc<PipelineConfig>) -> Self {
        Self { pipeline, config }
    }

    pub async fn execute(&self, arguments: Option<serde_json::Value>) -> CallToolResult {
        let request = match arguments {
            Some(args) => match serde_json::from_value::<DocumentQaRequest>(args) {
                Ok(request) => request,
                Err(e) => {
                    error!(target: "document_qa", "Invalid document-qa parameters: {}", e);
                    return error_result(&PipelineError::Validation(format!(
                        "Invalid parameters: {}",
                        e
                    )));
                }
            },
            None => {
                return error_result(&PipelineError::Validation(
                    "Missing required parameters".to_string(),
                ));
            }
        };

        let (url, batch) = match validate(request, &self.config) {
            Ok(validated) => validated,
            Err(e) => {
                warn!(target: "document_qa", "Rejected request: {}", e);
                return error_result(&e);
            }
        };

        info!(
            target: "document_qa",
            url = %url,
            questions = batch.questions().len(),
            max_questions = batch.max_allowed(),
            "Processing document-qa request"
        );

        // Dropping the pipeline future on deadline releases its buffers and cancels extraction.
        let run = tokio::time::timeout(self.config.request_timeout, self.pipeline.run(&url, &batch)).await;
        match run {
            Ok(Ok(outcome)) => match serde_json::to_string_pretty(&outcome) {
                Ok(body) => CallToolResult::success(body),
                Err(e) => error_result(&PipelineError::Internal(format!(
                    "failed to serialize outcome: {e}"
                ))),
            },
            Ok(Err(e)) => error_result(&e),
            Err(_) => {
                warn!(target: "document_qa", url = %url, timeout = ?self.config.request_timeout, "Request deadline elapsed");
                let payload = build_error_payload(
                    "ERR_REQUEST_TIMEOUT",
                    "The document could not be processed in time",
                    json!({
                        "status": 504,
                        "timeoutSecs": self.config.request_timeout.as_secs(),
                        "hint": "Try a smaller document or fewer questions.",
                    }),
                );
                CallToolResult::error(payload)
            }
        }
    }
}

fn error_result(err: &PipelineError) -> CallToolResult {
    let mut details = json!({
        "status": err.status(),
        "hint": err.hint(),
    });
    if let PipelineError::DocumentTooLarge { limit, received } = err {
        details["limitBytes"] = json!(limit);
        details["receivedBytes"] = json!(received);
    }
    CallToolResult::error(build_error_payload(err.code(), &err.to_string(), details))
}
