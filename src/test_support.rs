//! Fixtures shared by unit tests: in-memory PDFs, a throwaway HTTP server,
//! and fake collaborators for the memory monitor and the answer service.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::utils::answer_service::{AnswerService, ServiceError};
use crate::utils::memory_monitor::{MemoryMonitor, MemorySnapshot};

/// Builds a PDF with one page per entry, each showing its text in Courier.
pub fn build_pdf(pages: &[&str]) -> Vec<u8> {
    let mut doc = build_document(pages);
    let mut out = Vec::new();
    doc.save_to(&mut out).expect("pdf serializes");
    out
}

/// Same as [`build_pdf`] but with a standard security handler in the trailer.
pub fn build_encrypted_pdf(pages: &[&str]) -> Vec<u8> {
    let mut doc = build_document(pages);
    let encrypt_id = doc.add_object(dictionary! {
        "Filter" => "Standard",
        "V" => 1,
        "R" => 2,
        "O" => Object::string_literal(vec![0x11u8; 32]),
        "U" => Object::string_literal(vec![0x22u8; 32]),
        "P" => -4,
    });
    doc.trailer.set("Encrypt", encrypt_id);
    let mut out = Vec::new();
    doc.save_to(&mut out).expect("pdf serializes");
    out
}

fn build_document(pages: &[&str]) -> Document {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for text in pages {
        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new("Td", vec![72.into(), 720.into()]),
        ];
        if !text.is_empty() {
            operations.push(Operation::new("Tj", vec![Object::string_literal(*text)]));
        }
        operations.push(Operation::new("ET", vec![]));
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("content encodes"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(612),
                Object::Integer(792),
            ],
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc
}

/// What the throwaway server sends after reading a request.
pub enum Body {
    /// A fixed body with an accurate Content-Length.
    Fixed {
        content_type: &'static str,
        bytes: Vec<u8>,
    },
    /// Chunks of the given size forever, without Content-Length.
    Endless { chunk: usize },
    /// A fixed status line with an empty body.
    Status(u16),
}

/// Serves `body` to every connection on a random local port and returns the URL.
pub async fn serve(body: Body) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let body = std::sync::Arc::new(body);

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let body = body.clone();
            tokio::spawn(async move {
                let mut request = vec![0u8; 4096];
                let mut read = 0;
                while read < request.len() {
                    match socket.read(&mut request[read..]).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => read += n,
                    }
                    if request[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }

                match body.as_ref() {
                    Body::Fixed {
                        content_type,
                        bytes,
                    } => {
                        let head = format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                            content_type,
                            bytes.len()
                        );
                        let _ = socket.write_all(head.as_bytes()).await;
                        let _ = socket.write_all(bytes).await;
                    }
                    Body::Endless { chunk } => {
                        let head = "HTTP/1.1 200 OK\r\nContent-Type: application/pdf\r\nConnection: close\r\n\r\n";
                        if socket.write_all(head.as_bytes()).await.is_err() {
                            return;
                        }
                        let mut block = b"%PDF-1.4\n".to_vec();
                        block.resize(*chunk, b'0');
                        while socket.write_all(&block).await.is_ok() {}
                    }
                    Body::Status(code) => {
                        let head = format!(
                            "HTTP/1.1 {} Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                            code
                        );
                        let _ = socket.write_all(head.as_bytes()).await;
                    }
                }
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{}/document.pdf", addr)
}

/// Reports the same usage on every reading.
pub struct FixedMemoryMonitor {
    pub used_mb: f64,
    pub ceiling_mb: f64,
}

impl FixedMemoryMonitor {
    pub fn relaxed() -> Self {
        Self {
            used_mb: 64.0,
            ceiling_mb: 512.0,
        }
    }

    pub fn breached() -> Self {
        Self {
            used_mb: 600.0,
            ceiling_mb: 512.0,
        }
    }
}

impl MemoryMonitor for FixedMemoryMonitor {
    fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot::new(self.used_mb, self.ceiling_mb)
    }

    fn ceiling_mb(&self) -> f64 {
        self.ceiling_mb
    }
}

/// Plays back a list of readings, repeating the last one once exhausted.
pub struct ScriptedMemoryMonitor {
    readings: Vec<f64>,
    calls: AtomicUsize,
    pub ceiling_mb: f64,
}

impl ScriptedMemoryMonitor {
    pub fn new(readings: Vec<f64>, ceiling_mb: f64) -> Self {
        Self {
            readings,
            calls: AtomicUsize::new(0),
            ceiling_mb,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MemoryMonitor for ScriptedMemoryMonitor {
    fn snapshot(&self) -> MemorySnapshot {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let used = self
            .readings
            .get(call)
            .or(self.readings.last())
            .copied()
            .unwrap_or(0.0);
        MemorySnapshot::new(used, self.ceiling_mb)
    }

    fn ceiling_mb(&self) -> f64 {
        self.ceiling_mb
    }
}

/// Relaxed readings that each take `delay` of wall time, counting every call.
pub struct SlowMemoryMonitor {
    delay: Duration,
    calls: AtomicUsize,
}

impl SlowMemoryMonitor {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MemoryMonitor for SlowMemoryMonitor {
    fn snapshot(&self) -> MemorySnapshot {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        MemorySnapshot::new(64.0, 512.0)
    }

    fn ceiling_mb(&self) -> f64 {
        512.0
    }
}

/// Deterministic answer service: echoes the question, or fails / stalls on request.
#[derive(Default)]
pub struct ScriptedAnswers {
    pub failures: HashMap<String, ServiceErrorKind>,
    pub stalls: HashMap<String, Duration>,
    pub seen: Mutex<Vec<(String, usize)>>,
}

#[derive(Clone, Copy)]
pub enum ServiceErrorKind {
    Timeout,
    Api,
}

impl ScriptedAnswers {
    pub fn failing(question: &str, kind: ServiceErrorKind) -> Self {
        let mut answers = Self::default();
        answers.failures.insert(question.to_string(), kind);
        answers
    }

    pub fn stalling(question: &str, delay: Duration) -> Self {
        let mut answers = Self::default();
        answers.stalls.insert(question.to_string(), delay);
        answers
    }

    /// Questions received so far, with the context length each one carried.
    pub fn seen(&self) -> Vec<(String, usize)> {
        self.seen.lock().expect("lock").clone()
    }
}

#[async_trait]
impl AnswerService for ScriptedAnswers {
    async fn answer(&self, question: &str, context: &str) -> Result<String, ServiceError> {
        self.seen
            .lock()
            .expect("lock")
            .push((question.to_string(), context.chars().count()));

        if let Some(delay) = self.stalls.get(question) {
            tokio::time::sleep(*delay).await;
        }
        match self.failures.get(question) {
            Some(ServiceErrorKind::Timeout) => Err(ServiceError::Timeout(Duration::from_secs(60))),
            Some(ServiceErrorKind::Api) => Err(ServiceError::Api {
                status: 503,
                message: "overloaded".to_string(),
            }),
            None => Ok(format!("answer to: {}", question)),
        }
    }
}
