use serde_json::{json, Value};

/// Marker appended to an LLM context that is shorter than the document it came from.
pub const CONTEXT_TRUNCATED_MARKER: &str = "\n\n[Document truncated]";

/// Returns the byte offset just past the first `max_chars` characters of `s`,
/// or `s.len()` when the string is shorter. Always a char boundary.
pub fn char_boundary_at(s: &str, max_chars: usize) -> usize {
    s.char_indices()
        .nth(max_chars)
        .map(|(offset, _)| offset)
        .unwrap_or(s.len())
}

/// Safely truncates a UTF-8 string to at most `max_chars` characters without
/// breaking a multi-byte sequence.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    &s[..char_boundary_at(s, max_chars)]
}

/// Cuts `text` down to an LLM context of at most `max_chars` characters.
///
/// Prefers the last line break in the second half of the budget so the
/// context does not end mid-paragraph. The marker is appended whenever
/// anything was cut, and counts toward the budget.
pub fn cut_context(text: &str, max_chars: usize) -> String {
    let end = char_boundary_at(text, max_chars);
    if end == text.len() {
        return text.to_string();
    }

    let marker_chars = CONTEXT_TRUNCATED_MARKER.chars().count();
    if max_chars <= marker_chars {
        return truncate_chars(text, max_chars).to_string();
    }

    let budget = max_chars - marker_chars;
    let hard_end = char_boundary_at(text, budget);
    let window = &text[..hard_end];
    let half = char_boundary_at(text, budget / 2);
    let cut = match window.rfind('\n') {
        Some(pos) if pos > half => pos,
        _ => hard_end,
    };

    let mut context = String::with_capacity(cut + CONTEXT_TRUNCATED_MARKER.len());
    context.push_str(text[..cut].trim_end());
    context.push_str(CONTEXT_TRUNCATED_MARKER);
    context
}

/// Builds a standardized error payload string for tool errors.
/// The resulting text is intended to be returned as a textual tool error body.
/// First line: short human-readable message.
/// Then a JSON object with fields: code, message, details.
pub fn build_error_payload(code: &str, message: &str, details: Value) -> String {
    let obj = json!({
        "code": code,
        "message": message,
        "details": details,
    });
    let mut out = String::new();
    out.push_str(message);
    out.push('\n');
    out.push_str(&obj.to_string());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_multibyte_characters() {
        let text = "añb€c";
        assert_eq!(truncate_chars(text, 2), "añ");
        assert_eq!(truncate_chars(text, 4), "añb€");
        assert_eq!(truncate_chars(text, 99), text);
        assert_eq!(truncate_chars(text, 0), "");
    }

    #[test]
    fn short_context_is_untouched() {
        assert_eq!(cut_context("hello\nworld", 100), "hello\nworld");
    }

    #[test]
    fn long_context_prefers_line_break_and_marks_cut() {
        let text = format!("{}\n{}", "a".repeat(60), "b".repeat(60));
        let context = cut_context(&text, 100);
        assert!(context.ends_with(CONTEXT_TRUNCATED_MARKER));
        assert!(context.starts_with(&"a".repeat(60)));
        assert!(!context.contains('b'));
        assert!(context.chars().count() <= 100);
    }

    #[test]
    fn context_without_line_break_is_cut_hard() {
        let text = "x".repeat(500);
        let context = cut_context(&text, 120);
        assert_eq!(context.chars().count(), 120);
        assert!(context.ends_with(CONTEXT_TRUNCATED_MARKER));
    }

    #[test]
    fn error_payload_has_message_line_and_json() {
        let payload = build_error_payload("ERR_X", "Something failed", json!({"status": 400}));
        let mut lines = payload.lines();
        assert_eq!(lines.next(), Some("Something failed"));
        let value: Value = serde_json::from_str(lines.next().unwrap()).unwrap();
        assert_eq!(value["code"], "ERR_X");
        assert_eq!(value["details"]["status"], 400);
    }
}
