/// Find the largest valid UTF-8 boundary at or before the given byte index.
#[inline]
fn safe_byte_boundary(s: &str, max_bytes: usize) -> usize {
    if max_bytes >= s.len() {
        return s.len();
    }
    s.char_indices()
        .map(|(i, _)| i)
        .take_while(|&i| i <= max_bytes)
        .last()
        .unwrap_or(0)
}

/// Truncate a string to maximum byte length, returning a borrowed slice
/// (UTF-8 safe).
#[inline]
pub fn truncate_str(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        s
    } else {
        &s[..safe_byte_boundary(s, max_len)]
    }
}

/// Truncate a string to a maximum character count with a "..." suffix
/// (UTF-8 safe). Used for agent messages in the status table.
#[inline]
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    let char_count = s.chars().count();
    if char_count <= max_chars {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_str_short_input_is_untouched() {
        assert_eq!(truncate_str("hello", 10), "hello");
    }

    #[test]
    fn truncate_str_respects_utf8_boundaries() {
        // Each Korean char is 3 bytes; 7 bytes lands mid-character.
        assert_eq!(truncate_str("안녕하세요", 7), "안녕");
    }

    #[test]
    fn truncate_chars_short_input_is_untouched() {
        assert_eq!(truncate_chars("hello", 10), "hello");
    }

    #[test]
    fn truncate_chars_adds_ellipsis() {
        assert_eq!(truncate_chars("hello world", 8), "hello...");
    }

    #[test]
    fn truncate_chars_unicode() {
        let result = truncate_chars("안녕하세요 세계", 6);
        assert_eq!(result, "안녕하...");
        assert!(!result.contains('\u{FFFD}'));
    }
}
