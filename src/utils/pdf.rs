// PDF utilities shared by the downloader and the incremental extractor.
// Pages are produced lazily; nothing here holds more than one page's text.

use lopdf::Document;
use tracing::debug;

use crate::error::PipelineError;

/// PDF readers accept the header anywhere in the first 1024 bytes.
pub const SIGNATURE_WINDOW: usize = 1024;
const PDF_MAGIC: &[u8] = b"%PDF-";

/// Returns true if the head of a body carries the `%PDF-` signature.
pub fn has_pdf_signature(head: &[u8]) -> bool {
    let window = &head[..head.len().min(SIGNATURE_WINDOW)];
    window.windows(PDF_MAGIC.len()).any(|w| w == PDF_MAGIC)
}

/// Returns true if the Content-Type header declares a PDF.
pub fn is_pdf_content_type(content_type: Option<&str>) -> bool {
    content_type
        .map(|ct| ct.to_ascii_lowercase().contains("application/pdf"))
        .unwrap_or(false)
}

/// Text of one page, alive only for the iteration that produced it.
#[derive(Debug)]
pub struct ExtractedPage {
    /// 1-based page number.
    pub index: u32,
    pub text: String,
    pub byte_estimate: usize,
}

#[derive(Debug)]
pub struct PageError {
    pub index: u32,
    pub message: String,
}

/// A parsed PDF whose pages can be walked any number of times from the start.
pub struct PdfDocument {
    doc: Document,
    page_numbers: Vec<u32>,
}

impl PdfDocument {
    /// Parses the PDF structure once. Encrypted documents are rejected.
    pub fn open(bytes: &[u8]) -> Result<Self, PipelineError> {
        let doc = Document::load_mem(bytes).map_err(|e| {
            let message = e.to_string();
            if is_encryption_error(&message) {
                PipelineError::CorruptDocument(format!("encrypted PDF is not supported: {message}"))
            } else {
                PipelineError::CorruptDocument(message)
            }
        })?;

        if doc.is_encrypted() {
            return Err(PipelineError::CorruptDocument(
                "encrypted PDF is not supported".to_string(),
            ));
        }

        let page_numbers: Vec<u32> = doc.get_pages().into_keys().collect();
        if page_numbers.is_empty() {
            return Err(PipelineError::CorruptDocument(
                "document has no pages".to_string(),
            ));
        }
        debug!(target: "pdf", pages = page_numbers.len(), "PDF structure loaded");

        Ok(Self { doc, page_numbers })
    }

    pub fn page_count(&self) -> usize {
        self.page_numbers.len()
    }

    /// A fresh lazy sequence over the pages, in document order.
    pub fn pages(&self) -> PageStream<'_> {
        PageStream {
            doc: &self.doc,
            page_numbers: &self.page_numbers,
            position: 0,
        }
    }
}

fn is_encryption_error(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("encrypt") || lower.contains("password") || lower.contains("decrypt")
}

/// Finite producer of pages; each `next` extracts exactly one page.
pub struct PageStream<'a> {
    doc: &'a Document,
    page_numbers: &'a [u32],
    position: usize,
}

impl Iterator for PageStream<'_> {
    type Item = Result<ExtractedPage, PageError>;

    fn next(&mut self) -> Option<Self::Item> {
        let index = *self.page_numbers.get(self.position)?;
        self.position += 1;

        let item = match self.doc.extract_text(&[index]) {
            Ok(text) => Ok(ExtractedPage {
                index,
                byte_estimate: text.capacity(),
                text,
            }),
            Err(e) => Err(PageError {
                index,
                message: e.to_string(),
            }),
        };
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.page_numbers.len() - self.position;
        (remaining, Some(remaining))
    }
}
