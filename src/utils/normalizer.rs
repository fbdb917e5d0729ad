/// Cleans extracted document text and bounds it to `max_chars` characters.
///
/// Whitespace runs collapse to a single `\n` when the run contained a line
/// break and to a single space otherwise. Non-whitespace control characters
/// are dropped without interrupting a surrounding whitespace run. The result
/// never starts or ends with whitespace, so `normalize` is idempotent.
pub fn normalize(raw_text: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(raw_text.len().min(max_chars.saturating_mul(4)));
    let mut pending: Option<char> = None;
    let mut written = 0usize;

    for ch in raw_text.chars() {
        if ch.is_whitespace() {
            if is_line_break(ch) {
                pending = Some('\n');
            } else if pending.is_none() {
                pending = Some(' ');
            }
            continue;
        }
        if ch.is_control() {
            continue;
        }

        if let Some(separator) = pending.take() {
            if written > 0 {
                if written + 1 >= max_chars {
                    break;
                }
                out.push(separator);
                written += 1;
            }
        }
        if written >= max_chars {
            break;
        }
        out.push(ch);
        written += 1;
    }

    out
}

fn is_line_break(ch: char) -> bool {
    matches!(ch, '\n' | '\r' | '\u{0B}' | '\u{0C}' | '\u{85}' | '\u{2028}' | '\u{2029}')
}
