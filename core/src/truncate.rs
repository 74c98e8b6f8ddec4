//! Byte/line output limiter shared by every tool.

/// Default caps applied to tool output.
pub const DEFAULT_MAX_BYTES: usize = 8 * 1024;
pub const DEFAULT_MAX_LINES: usize = 200;

/// Cap `text` to at most `max_lines` lines and `max_bytes` bytes. The line cap
/// is applied first; if the kept prefix still exceeds the byte cap it is cut
/// at a valid UTF-8 boundary. When anything was dropped, exactly one sentinel
/// line `[truncated N bytes / M lines]` is appended and the flag is true;
/// otherwise the input is returned unchanged.
pub fn truncate(text: &str, max_bytes: usize, max_lines: usize) -> (String, bool) {
    let total_lines = text.lines().count();

    let mut kept = text;
    if total_lines > max_lines {
        let mut end = 0;
        let mut seen = 0;
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' {
                seen += 1;
                if seen == max_lines {
                    end = i + 1;
                    break;
                }
            }
        }
        kept = &text[..end];
    }

    if kept.len() > max_bytes {
        let mut end = max_bytes;
        while end > 0 && !kept.is_char_boundary(end) {
            end -= 1;
        }
        kept = &kept[..end];
    }

    if kept.len() == text.len() {
        return (text.to_string(), false);
    }

    let dropped_bytes = text.len() - kept.len();
    let dropped_lines = total_lines.saturating_sub(kept.lines().count());
    let sentinel = format!("[truncated {dropped_bytes} bytes / {dropped_lines} lines]");
    let mut out = String::with_capacity(kept.len() + sentinel.len() + 1);
    out.push_str(kept);
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&sentinel);
    (out, true)
}

/// Apply the default tool caps.
pub fn truncate_default(text: &str) -> (String, bool) {
    truncate(text, DEFAULT_MAX_BYTES, DEFAULT_MAX_LINES)
}
