use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use reqwest::{header, Client};
use tracing::{info, warn};

use crate::config::MB;
use crate::error::PipelineError;
use crate::utils::memory_monitor::MemoryMonitor;
use crate::utils::pdf::{has_pdf_signature, is_pdf_content_type, SIGNATURE_WINDOW};

// Browser User-Agent; some document hosts refuse unknown clients
pub const BROWSER_UA: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Bytes of a fully received PDF, owned by the pipeline run that fetched it.
#[derive(Debug)]
pub struct DownloadResult {
    pub bytes: Vec<u8>,
    pub size: u64,
    pub content_type: Option<String>,
}

/// Streams a remote PDF into memory while enforcing a hard byte cap.
pub struct BoundedDownloader {
    client: Client,
    /// Initial buffer reservation when the server declares no length.
    chunk_hint: usize,
    /// Sampled once per MiB received; reaching the ceiling aborts the transfer.
    memory: Option<Arc<dyn MemoryMonitor>>,
}

impl BoundedDownloader {
    pub fn new(timeout: Duration, chunk_hint: usize) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(BROWSER_UA)
            .build()
            .map_err(|e| PipelineError::Internal(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            chunk_hint,
            memory: None,
        })
    }

    pub fn with_memory_guard(mut self, monitor: Arc<dyn MemoryMonitor>) -> Self {
        self.memory = Some(monitor);
        self
    }

    fn check_memory(&self, url: &str, received: usize) -> Result<(), PipelineError> {
        let Some(monitor) = &self.memory else {
            return Ok(());
        };
        let snapshot = monitor.snapshot();
        let ceiling_mb = monitor.ceiling_mb();
        if snapshot.used_mb >= ceiling_mb {
            warn!(
                target: "downloader",
                url = %url,
                received,
                used_mb = snapshot.used_mb,
                ceiling_mb,
                "Memory ceiling reached during download; aborting transfer"
            );
            return Err(PipelineError::MemoryCeiling {
                used_mb: snapshot.used_mb,
                ceiling_mb,
            });
        }
        Ok(())
    }

    /// Fetches `url`, failing as soon as the received byte count would exceed `max_bytes`.
    ///
    /// A declared `Content-Length` above the cap fails early, but the count of
    /// bytes actually received is what the cap is enforced against. Chunks are
    /// checked before they are appended, so the buffer never exceeds `max_bytes`.
    pub async fn fetch(&self, url: &str, max_bytes: u64) -> Result<DownloadResult, PipelineError> {
        info!(target: "downloader", url = %url, max_bytes, "Starting PDF download");
        let started = Instant::now();

        let response = self.client.get(url).send().await.map_err(|e| {
            warn!(target: "downloader", url = %url, "HTTP transport error: {}", e);
            PipelineError::DocumentUnreachable(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(target: "downloader", url = %url, status = status.as_u16(), "HTTP non-success status");
            return Err(PipelineError::DocumentUnreachable(format!(
                "HTTP error {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown error")
            )));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|ct| ct.to_str().ok())
            .map(|s| s.to_string());
        let declared = response.content_length();

        if let Some(declared) = declared {
            if declared > max_bytes {
                info!(target: "downloader", url = %url, declared, limit = max_bytes, "Declared length over limit; refusing");
                return Err(PipelineError::DocumentTooLarge {
                    limit: max_bytes,
                    received: 0,
                });
            }
        }

        let reserve = declared
            .map(|len| len as usize)
            .unwrap_or(self.chunk_hint)
            .min(max_bytes as usize);
        let mut buffer: Vec<u8> = Vec::with_capacity(reserve);
        let mut signature_checked = false;
        let mut next_memory_check = MB as usize;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                warn!(target: "downloader", url = %url, received = buffer.len(), "Body read failed: {}", e);
                PipelineError::DocumentUnreachable(format!("failed to read response body: {e}"))
            })?;

            let received = buffer.len() as u64 + chunk.len() as u64;
            if received > max_bytes {
                info!(target: "downloader", url = %url, received, limit = max_bytes, "Byte cap exceeded; aborting transfer");
                // Dropping the stream closes the connection.
                return Err(PipelineError::DocumentTooLarge {
                    limit: max_bytes,
                    received,
                });
            }
            buffer.extend_from_slice(&chunk);
            drop(chunk);

            if buffer.len() >= next_memory_check {
                self.check_memory(url, buffer.len())?;
                next_memory_check = buffer.len() + MB as usize;
            }

            if !signature_checked && buffer.len() >= SIGNATURE_WINDOW {
                check_signature(&buffer, content_type.as_deref())?;
                signature_checked = true;
            }
        }

        if !signature_checked {
            check_signature(&buffer, content_type.as_deref())?;
        }

        let size = buffer.len() as u64;
        info!(
            target: "downloader",
            url = %url,
            size,
            ct = ?content_type,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "PDF download completed"
        );

        Ok(DownloadResult {
            bytes: buffer,
            size,
            content_type,
        })
    }
}

fn check_signature(head: &[u8], content_type: Option<&str>) -> Result<(), PipelineError> {
    if has_pdf_signature(head) {
        if !is_pdf_content_type(content_type) {
            warn!(target: "downloader", ct = ?content_type, "PDF signature found despite non-PDF content type");
        }
        return Ok(());
    }
    Err(PipelineError::InvalidDocument(format!(
        "missing %PDF- signature (content type: {})",
        content_type.unwrap_or("unknown")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{build_pdf, serve, Body, FixedMemoryMonitor, ScriptedMemoryMonitor};

    fn downloader() -> BoundedDownloader {
        BoundedDownloader::new(Duration::from_secs(10), 8 * 1024).unwrap()
    }

    #[tokio::test]
    async fn downloads_pdf_within_limit() {
        let pdf = build_pdf(&["hello"]);
        let url = serve(Body::Fixed {
            content_type: "application/pdf",
            bytes: pdf.clone(),
        })
        .await;

        let result = downloader().fetch(&url, MB).await.unwrap();
        assert_eq!(result.bytes, pdf);
        assert_eq!(result.size, pdf.len() as u64);
        assert_eq!(result.content_type.as_deref(), Some("application/pdf"));
    }

    #[tokio::test]
    async fn accepts_pdf_served_with_generic_content_type() {
        let pdf = build_pdf(&["hello"]);
        let url = serve(Body::Fixed {
            content_type: "application/octet-stream",
            bytes: pdf,
        })
        .await;
        assert!(downloader().fetch(&url, MB).await.is_ok());
    }

    #[tokio::test]
    async fn declared_length_over_limit_fails_fast() {
        let url = serve(Body::Fixed {
            content_type: "application/pdf",
            bytes: vec![b'%'; 4096],
        })
        .await;
        let err = downloader().fetch(&url, 1024).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::DocumentTooLarge { limit: 1024, .. }
        ));
    }

    #[tokio::test]
    async fn endless_stream_is_cut_off_at_the_cap() {
        let url = serve(Body::Endless { chunk: 64 * 1024 }).await;
        let limit = 2 * MB;
        let result = tokio::time::timeout(Duration::from_secs(20), downloader().fetch(&url, limit))
            .await
            .expect("fetch terminates");
        match result {
            Err(PipelineError::DocumentTooLarge { limit: l, received }) => {
                assert_eq!(l, limit);
                assert!(received > limit);
                // One network read past the cap at most; hyper reads are bounded well below 1 MiB.
                assert!(received <= limit + MB);
            }
            other => panic!("expected DocumentTooLarge, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn html_body_is_invalid() {
        let mut page = b"<!doctype html><html><body>".to_vec();
        page.resize(4096, b'x');
        let url = serve(Body::Fixed {
            content_type: "text/html; charset=utf-8",
            bytes: page,
        })
        .await;
        let err = downloader().fetch(&url, MB).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidDocument(_)));
    }

    #[tokio::test]
    async fn tiny_non_pdf_body_is_invalid() {
        let url = serve(Body::Fixed {
            content_type: "application/pdf",
            bytes: b"nope".to_vec(),
        })
        .await;
        let err = downloader().fetch(&url, MB).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidDocument(_)));
    }

    #[tokio::test]
    async fn http_error_is_unreachable() {
        let url = serve(Body::Status(404)).await;
        let err = downloader().fetch(&url, MB).await.unwrap_err();
        match err {
            PipelineError::DocumentUnreachable(message) => assert!(message.contains("404")),
            other => panic!("expected DocumentUnreachable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn refused_connection_is_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = downloader()
            .fetch(&format!("http://{addr}/doc.pdf"), MB)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::DocumentUnreachable(_)));
    }

    fn large_pdf_body(len: usize) -> Vec<u8> {
        let mut body = b"%PDF-1.4\n".to_vec();
        body.resize(len, b'0');
        body
    }

    #[tokio::test]
    async fn ceiling_reached_mid_transfer_aborts() {
        let url = serve(Body::Fixed {
            content_type: "application/pdf",
            bytes: large_pdf_body(3 * MB as usize),
        })
        .await;
        let monitor = Arc::new(ScriptedMemoryMonitor::new(vec![100.0, 520.0], 512.0));
        let err = downloader()
            .with_memory_guard(monitor.clone())
            .fetch(&url, 10 * MB)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::MemoryCeiling { .. }));
        assert_eq!(monitor.calls(), 2);
    }

    #[tokio::test]
    async fn near_ceiling_alone_does_not_abort_download() {
        let body = large_pdf_body(2 * MB as usize + 10);
        let url = serve(Body::Fixed {
            content_type: "application/pdf",
            bytes: body.clone(),
        })
        .await;
        // Inside the headroom but below the ceiling itself.
        let monitor = Arc::new(FixedMemoryMonitor {
            used_mb: 450.0,
            ceiling_mb: 512.0,
        });
        let result = downloader()
            .with_memory_guard(monitor)
            .fetch(&url, 10 * MB)
            .await
            .unwrap();
        assert_eq!(result.size, body.len() as u64);
    }
}
