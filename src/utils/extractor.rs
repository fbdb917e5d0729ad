use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::utils::content_guard::truncate_chars;
use crate::utils::memory_monitor::MemoryMonitor;
use crate::utils::pdf::PdfDocument;

const PAGE_SEPARATOR: &str = "\n\n";

/// Why extraction stopped before the end of the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationReason {
    CharBudget,
    PageLimit,
    MemoryCeiling,
}

/// Text gathered from a PDF, page by page, for one request.
#[derive(Debug)]
pub struct DocumentText {
    pub content: String,
    pub char_count: usize,
    /// Pages walked, including ones whose extraction failed.
    pub page_count: usize,
    pub total_pages: usize,
    pub was_truncated: bool,
    pub truncation: Option<TruncationReason>,
}

/// What remains of a [`DocumentText`] once its content has been normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentSummary {
    pub page_count: usize,
    pub was_truncated: bool,
    pub truncation: Option<TruncationReason>,
}

impl DocumentSummary {
    pub fn hit_memory_ceiling(&self) -> bool {
        self.truncation == Some(TruncationReason::MemoryCeiling)
    }
}

impl DocumentText {
    /// Consumes the text, releasing the content buffer and keeping the metadata.
    pub fn into_summary(self) -> DocumentSummary {
        DocumentSummary {
            page_count: self.page_count,
            was_truncated: self.was_truncated,
            truncation: self.truncation,
        }
    }
}

/// Walks a PDF one page at a time, stopping early on budget or memory pressure.
pub struct IncrementalExtractor<'a> {
    monitor: &'a dyn MemoryMonitor,
    headroom_mb: f64,
    max_pages: usize,
    cancel: Option<CancellationToken>,
}

impl<'a> IncrementalExtractor<'a> {
    pub fn new(monitor: &'a dyn MemoryMonitor, headroom_mb: f64, max_pages: usize) -> Self {
        Self {
            monitor,
            headroom_mb,
            max_pages,
            cancel: None,
        }
    }

    /// Stops the page walk at the next page boundary once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    pub fn extract(&self, pdf_bytes: &[u8], budget_chars: usize) -> Result<DocumentText, PipelineError> {
        let started = Instant::now();
        let pdf = PdfDocument::open(pdf_bytes)?;
        let total_pages = pdf.page_count();

        let mut content = String::new();
        let mut char_count = 0usize;
        let mut walked = 0usize;
        let mut extracted = 0usize;
        let mut truncation = None;

        let mut pages = pdf.pages();
        loop {
            // Checked before the next page is parsed.
            if self.is_cancelled() {
                info!(target: "extractor", page = walked, total_pages, "Extraction cancelled; releasing buffers");
                return Err(PipelineError::Cancelled);
            }
            let Some(page) = pages.next() else {
                break;
            };
            walked += 1;
            match page {
                Ok(page) => {
                    extracted += 1;
                    debug!(target: "extractor", page = page.index, bytes = page.byte_estimate, "Page extracted");
                    let text = page.text.trim();
                    if !text.is_empty() {
                        let separator = if char_count > 0 { PAGE_SEPARATOR } else { "" };
                        let room = budget_chars.saturating_sub(char_count + separator.len());
                        if room == 0 {
                            truncation = Some(TruncationReason::CharBudget);
                        } else {
                            content.push_str(separator);
                            char_count += separator.len();
                            let kept = truncate_chars(text, room);
                            content.push_str(kept);
                            char_count += kept.chars().count();
                            if kept.len() < text.len() {
                                truncation = Some(TruncationReason::CharBudget);
                            }
                        }
                    }
                    // `page` and its text are dropped here, before the next page is parsed.
                }
                Err(e) => {
                    warn!(target: "extractor", page = e.index, "Failed to extract page text: {}", e.message);
                }
            }

            let more_pages = walked < total_pages;
            if truncation.is_some() || !more_pages {
                break;
            }

            let snapshot = self.monitor.snapshot();
            if self.monitor.is_near_ceiling(&snapshot, self.headroom_mb) {
                warn!(
                    target: "extractor",
                    page = walked,
                    used_mb = snapshot.used_mb,
                    ceiling_mb = self.monitor.ceiling_mb(),
                    "Memory near ceiling; stopping extraction early"
                );
                truncation = Some(TruncationReason::MemoryCeiling);
                break;
            }
            if char_count >= budget_chars {
                truncation = Some(TruncationReason::CharBudget);
                break;
            }
            if walked >= self.max_pages {
                info!(target: "extractor", max_pages = self.max_pages, total_pages, "Page limit reached");
                truncation = Some(TruncationReason::PageLimit);
                break;
            }
        }
        drop(pages);
        drop(pdf);

        if extracted == 0 {
            return Err(PipelineError::CorruptDocument(
                "no page could be read".to_string(),
            ));
        }
        if content.trim().is_empty() {
            return Err(PipelineError::EmptyDocument);
        }

        info!(
            target: "extractor",
            pages = walked,
            total_pages,
            chars = char_count,
            truncation = ?truncation,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "PDF extraction finished"
        );

        Ok(DocumentText {
            content,
            char_count,
            page_count: walked,
            total_pages,
            was_truncated: truncation.is_some(),
            truncation,
        })
    }
}
