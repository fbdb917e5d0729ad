use serde::Deserialize;

use crate::config::PipelineConfig;
use crate::error::PipelineError;

/// Request shape accepted by the `document-qa` tool.
#[derive(Debug, Deserialize)]
pub struct DocumentQaRequest {
    pub documents: String,
    pub questions: Vec<String>,
}

/// Ordered questions for one run; never empty and never above `max_allowed`.
#[derive(Debug, Clone)]
pub struct QuestionBatch {
    questions: Vec<String>,
    max_allowed: usize,
}

impl QuestionBatch {
    pub fn new(questions: Vec<String>, max_allowed: usize) -> Result<Self, PipelineError> {
        if questions.is_empty() {
            return Err(PipelineError::Validation(
                "questions must be a non-empty list".to_string(),
            ));
        }
        if questions.len() > max_allowed {
            return Err(PipelineError::Validation(format!(
                "Maximum {} questions allowed",
                max_allowed
            )));
        }
        Ok(Self {
            questions,
            max_allowed,
        })
    }

    pub fn questions(&self) -> &[String] {
        &self.questions
    }

    pub fn max_allowed(&self) -> usize {
        self.max_allowed
    }
}

/// Checks a request against the configured limits and returns the document URL and batch.
pub fn validate(
    request: DocumentQaRequest,
    config: &PipelineConfig,
) -> Result<(url::Url, QuestionBatch), PipelineError> {
    let documents = request.documents.trim();
    if documents.is_empty() {
        return Err(PipelineError::Validation(
            "documents must be a valid URL string".to_string(),
        ));
    }
    let url = url::Url::parse(documents)
        .map_err(|e| PipelineError::Validation(format!("Invalid URL: {}", e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(PipelineError::Validation(format!(
            "unsupported URL scheme: {}",
            url.scheme()
        )));
    }

    for (i, question) in request.questions.iter().enumerate() {
        if question.trim().is_empty() {
            return Err(PipelineError::Validation(format!(
                "Question {} must be a non-empty string",
                i + 1
            )));
        }
        if question.chars().count() > config.max_question_chars {
            return Err(PipelineError::Validation(format!(
                "Question {} too long (max {} characters)",
                i + 1,
                config.max_question_chars
            )));
        }
    }

    let batch = QuestionBatch::new(request.questions, config.max_questions)?;
    Ok((url, batch))
}
