pub mod document_qa_tool;
pub mod memory_status_tool;
