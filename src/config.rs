use std::time::Duration;

pub const MB: u64 = 1024 * 1024;

/// Process-wide limits read once at startup and shared by every pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_pdf_bytes: u64,
    pub max_questions: usize,
    pub max_question_chars: usize,
    /// Budget for extracted and normalized document text, in characters.
    pub max_text_chars: usize,
    /// Budget for the document context sent with each question.
    pub max_context_chars: usize,
    pub max_pages: usize,
    pub memory_ceiling_mb: f64,
    pub headroom_mb: f64,
    /// Projected memory cost of one in-flight question (prompt, request body, response).
    pub question_cost_mb: f64,
    pub download_timeout: Duration,
    pub llm_timeout: Duration,
    pub request_timeout: Duration,
    pub download_chunk_hint: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_pdf_bytes: 50 * MB,
            max_questions: 20,
            max_question_chars: 1000,
            max_text_chars: 200_000,
            max_context_chars: 80_000,
            max_pages: 500,
            memory_ceiling_mb: 512.0,
            headroom_mb: 112.0,
            question_cost_mb: 8.0,
            download_timeout: Duration::from_secs(60),
            llm_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(300),
            download_chunk_hint: 8 * 1024,
        }
    }
}

/// Settings for the Gemini-backed answer service.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
}

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-pro-latest";
