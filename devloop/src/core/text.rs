//! Character-bounded text helpers.

/// Keep at most `limit` characters of `text`.
///
/// Returns the kept prefix and the number of characters dropped. Never splits a
/// UTF-8 sequence.
pub fn truncate_chars(text: &str, limit: usize) -> (&str, usize) {
    match text.char_indices().nth(limit) {
        Some((byte_idx, _)) => {
            let dropped = text[byte_idx..].chars().count();
            (&text[..byte_idx], dropped)
        }
        None => (text, 0),
    }
}

/// Like [`truncate_chars`], but appends a `[truncated N chars]` marker when needed.
pub fn truncate_with_notice(text: &str, limit: usize) -> String {
    let (kept, dropped) = truncate_chars(text, limit);
    if dropped == 0 {
        return kept.to_string();
    }
    format!("{kept}\n[truncated {dropped} chars]")
}
