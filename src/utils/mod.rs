pub mod answer_service;
pub mod content_guard;
pub mod downloader;
pub mod extractor;
pub mod memory_monitor;
pub mod normalizer;
pub mod pdf;
