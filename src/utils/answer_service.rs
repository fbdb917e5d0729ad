use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use crate::config::GeminiConfig;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("model returned no answer text")]
    EmptyResponse,

    #[error("no answer within {0:?}")]
    Timeout(Duration),
}

/// Capability that answers one question from a bounded document context.
#[async_trait]
pub trait AnswerService: Send + Sync {
    async fn answer(&self, question: &str, context: &str) -> Result<String, ServiceError>;
}

pub fn build_prompt(question: &str, context: &str) -> String {
    format!(
        "Based on the following document, answer the question accurately and concisely.

Document:
{context}

Question: {question}

Instructions:
- Provide a direct, factual answer based only on the document
- If information is not in the document, state \"Information not available in the document\"
- Keep the answer concise but complete
- Quote specific details when relevant"
    )
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateResponse {
    fn into_text(self) -> Option<String> {
        let text: String = self
            .candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .filter_map(|part| part.text)
            .collect();
        let text = text.trim();
        if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }
}

/// Answers questions with Google's Generative Language `generateContent` endpoint.
pub struct GeminiAnswerService {
    client: Client,
    api_key: String,
    endpoint: String,
    timeout: Duration,
}

impl GeminiAnswerService {
    pub fn new(config: GeminiConfig, timeout: Duration) -> Result<Self, ServiceError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key: config.api_key,
            endpoint: format!(
                "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
                config.model
            ),
            timeout,
        })
    }
}

#[async_trait]
impl AnswerService for GeminiAnswerService {
    async fn answer(&self, question: &str, context: &str) -> Result<String, ServiceError> {
        let prompt = build_prompt(question, context);
        let body = GenerateRequest {
            contents: vec![RequestContent {
                role: "user",
                parts: vec![RequestPart { text: &prompt }],
            }],
        };

        debug!(
            target: "answer_service",
            prompt_len = prompt.len(),
            "Sending generateContent request"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ServiceError::Timeout(self.timeout)
                } else {
                    ServiceError::Request(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            error!(target: "answer_service", status = status.as_u16(), "Gemini API error");
            return Err(ServiceError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateResponse = response.json().await?;
        parsed.into_text().ok_or(ServiceError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_embeds_document_and_question() {
        let prompt = build_prompt("What is the grace period?", "Grace period is 30 days.");
        assert!(prompt.contains("Document:\nGrace period is 30 days."));
        assert!(prompt.contains("Question: What is the grace period?"));
        assert!(prompt.contains("Information not available in the document"));
    }

    #[test]
    fn response_text_joins_parts_and_trims() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"  Thirty "},{"text":"days. "}]}}]}"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.into_text().as_deref(), Some("Thirty days."));
    }

    #[test]
    fn blocked_response_has_no_text() {
        let raw = r#"{"candidates":[{"finishReason":"SAFETY"}]}"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        assert!(parsed.into_text().is_none());
        let parsed: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.into_text().is_none());
    }
}
