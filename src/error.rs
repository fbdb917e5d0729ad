use thiserror::Error;

/// Classified failures that abort a single pipeline run.
///
/// Memory pressure normally degrades a run instead of failing it. Only a
/// download that would push the process past the ceiling itself fails, as
/// `MemoryCeiling`.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("document could not be fetched: {0}")]
    DocumentUnreachable(String),

    #[error("document exceeds the {limit} byte limit ({received} bytes received)")]
    DocumentTooLarge { limit: u64, received: u64 },

    #[error("not a PDF document: {0}")]
    InvalidDocument(String),

    #[error("PDF could not be parsed: {0}")]
    CorruptDocument(String),

    #[error("no text could be extracted from the PDF")]
    EmptyDocument,

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("memory ceiling reached during download ({used_mb:.0} MB of {ceiling_mb:.0} MB)")]
    MemoryCeiling { used_mb: f64, ceiling_mb: f64 },

    #[error("request was cancelled")]
    Cancelled,

    #[error("internal pipeline failure: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Stable machine-readable code used in tool error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::DocumentUnreachable(_) => "ERR_DOCUMENT_UNREACHABLE",
            PipelineError::DocumentTooLarge { .. } => "ERR_DOCUMENT_TOO_LARGE",
            PipelineError::InvalidDocument(_) => "ERR_INVALID_DOCUMENT",
            PipelineError::CorruptDocument(_) => "ERR_CORRUPT_DOCUMENT",
            PipelineError::EmptyDocument => "ERR_EMPTY_DOCUMENT",
            PipelineError::Validation(_) => "ERR_VALIDATION",
            PipelineError::MemoryCeiling { .. } => "ERR_MEMORY_CEILING",
            PipelineError::Cancelled => "ERR_CANCELLED",
            PipelineError::Internal(_) => "ERR_INTERNAL",
        }
    }

    /// HTTP-equivalent status for the boundary layer.
    pub fn status(&self) -> u16 {
        match self {
            PipelineError::Internal(_) => 500,
            PipelineError::MemoryCeiling { .. } => 507,
            PipelineError::Cancelled => 408,
            _ => 400,
        }
    }

    pub fn hint(&self) -> &'static str {
        match self {
            PipelineError::DocumentUnreachable(_) => "Please verify the URL or try again later.",
            PipelineError::DocumentTooLarge { .. } => "Provide a smaller PDF document.",
            PipelineError::InvalidDocument(_) => "The URL must point to a PDF file.",
            PipelineError::CorruptDocument(_) => {
                "Try an unencrypted PDF or re-save the file to simplify its structure."
            }
            PipelineError::EmptyDocument => {
                "The PDF may be scanned or image-based; no text layer was found."
            }
            PipelineError::Validation(_) => "Check the request fields and limits.",
            PipelineError::MemoryCeiling { .. } => {
                "The server is low on memory; retry later or with a smaller PDF."
            }
            PipelineError::Cancelled => "The request was abandoned before it finished.",
            PipelineError::Internal(_) => "Please try again later.",
        }
    }
}
