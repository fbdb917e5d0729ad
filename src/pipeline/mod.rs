pub mod degrade;
pub mod orchestrator;
pub mod request;

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::utils::answer_service::AnswerService;
use crate::utils::downloader::BoundedDownloader;
use crate::utils::extractor::{DocumentText, IncrementalExtractor, TruncationReason};
use crate::utils::memory_monitor::MemoryMonitor;
use crate::utils::normalizer::normalize;

use degrade::DegradationPolicy;
use orchestrator::{AnswerOrchestrator, AnswerSlot, OrchestratorSettings};
use request::QuestionBatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Downloading,
    Extracting,
    Normalizing,
    Answering,
    Done,
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Downloading => "DOWNLOADING",
            PipelineStage::Extracting => "EXTRACTING",
            PipelineStage::Normalizing => "NORMALIZING",
            PipelineStage::Answering => "ANSWERING",
            PipelineStage::Done => "DONE",
            PipelineStage::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Result of a run that reached `DONE`, possibly degraded.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutcome {
    pub status: u16,
    pub answers: Vec<String>,
    pub resource_ceiling_reached: bool,
    pub document_truncated: bool,
    pub truncation_reason: Option<TruncationReason>,
    pub questions_submitted: usize,
    pub questions_answered: usize,
    pub failed_answers: usize,
    pub page_count: usize,
    pub char_count: usize,
}

/// Owns the shared collaborators; each call to [`run`](Self::run) is an independent pipeline.
pub struct DocumentPipeline {
    config: Arc<PipelineConfig>,
    monitor: Arc<dyn MemoryMonitor>,
    service: Arc<dyn AnswerService>,
    downloader: BoundedDownloader,
}

impl DocumentPipeline {
    pub fn new(
        config: Arc<PipelineConfig>,
        monitor: Arc<dyn MemoryMonitor>,
        service: Arc<dyn AnswerService>,
    ) -> Result<Self, PipelineError> {
        let downloader = BoundedDownloader::new(config.download_timeout, config.download_chunk_hint)?
            .with_memory_guard(Arc::clone(&monitor));
        Ok(Self {
            config,
            monitor,
            service,
            downloader,
        })
    }

    pub async fn run(&self, url: &url::Url, batch: &QuestionBatch) -> Result<PipelineOutcome, PipelineError> {
        let started = Instant::now();
        let mut stage = PipelineStage::Downloading;
        info!(target: "pipeline", url = %url, questions = batch.questions().len(), "Pipeline stage {}", stage);

        let result = self.run_stages(url, batch, &mut stage).await;
        match &result {
            Ok(outcome) => info!(
                target: "pipeline",
                status = outcome.status,
                answered = outcome.questions_answered,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Pipeline stage {} -> {}",
                stage,
                PipelineStage::Done
            ),
            Err(err) => warn!(
                target: "pipeline",
                code = err.code(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Pipeline stage {} -> {}: {}",
                stage,
                PipelineStage::Failed,
                err
            ),
        }
        result
    }

    async fn run_stages(
        &self,
        url: &url::Url,
        batch: &QuestionBatch,
        stage: &mut PipelineStage,
    ) -> Result<PipelineOutcome, PipelineError> {
        let download = self
            .downloader
            .fetch(url.as_str(), self.config.max_pdf_bytes)
            .await?;

        info!(
            target: "pipeline",
            size = download.size,
            ct = ?download.content_type,
            "Document received"
        );

        advance(stage, PipelineStage::Extracting);
        let document = self.extract(download.bytes).await?;
        info!(
            target: "pipeline",
            pages = document.page_count,
            total_pages = document.total_pages,
            chars = document.char_count,
            "Document text extracted"
        );

        advance(stage, PipelineStage::Normalizing);
        let text = normalize(&document.content, self.config.max_text_chars);
        // The raw content is released here; only metadata lives through answering.
        let summary = document.into_summary();
        if text.is_empty() {
            return Err(PipelineError::EmptyDocument);
        }
        let char_count = text.chars().count();

        advance(stage, PipelineStage::Answering);
        let orchestrator = AnswerOrchestrator::new(
            self.service.as_ref(),
            self.monitor.as_ref(),
            OrchestratorSettings {
                headroom_mb: self.config.headroom_mb,
                llm_timeout: self.config.llm_timeout,
                policy: DegradationPolicy {
                    question_cost_mb: self.config.question_cost_mb,
                    max_context_chars: self.config.max_context_chars,
                },
            },
        );
        let set = orchestrator.answer(&text, batch.questions()).await;
        drop(text);

        let resource_ceiling_reached = summary.hit_memory_ceiling() || set.resource_ceiling_reached;
        let failed_answers = set.failed_count();
        let answers: Vec<String> = set.answers.into_iter().map(AnswerSlot::into_text).collect();

        Ok(PipelineOutcome {
            status: if resource_ceiling_reached { 507 } else { 200 },
            questions_answered: answers.len(),
            answers,
            resource_ceiling_reached,
            document_truncated: summary.was_truncated,
            truncation_reason: summary.truncation,
            questions_submitted: set.submitted,
            failed_answers,
            page_count: summary.page_count,
            char_count,
        })
    }

    /// Parses on the blocking pool; the downloaded bytes are dropped there once pages are walked.
    ///
    /// A blocking task cannot be aborted, so dropping this future cancels a token
    /// the page loop polls between pages.
    async fn extract(&self, bytes: Vec<u8>) -> Result<DocumentText, PipelineError> {
        let monitor = Arc::clone(&self.monitor);
        let headroom_mb = self.config.headroom_mb;
        let max_pages = self.config.max_pages;
        let budget = self.config.max_text_chars;
        let cancel = CancellationToken::new();
        let _cancel_on_drop = cancel.clone().drop_guard();

        tokio::task::spawn_blocking(move || {
            let extractor = IncrementalExtractor::new(monitor.as_ref(), headroom_mb, max_pages)
                .with_cancellation(cancel);
            let document = extractor.extract(&bytes, budget);
            drop(bytes);
            document
        })
        .await
        .map_err(|e| PipelineError::Internal(format!("extraction task failed: {e}")))?
    }
}

fn advance(stage: &mut PipelineStage, next: PipelineStage) {
    info!(target: "pipeline", "Pipeline stage {} -> {}", stage, next);
    *stage = next;
}
