//! Text utilities shared across Parley crates.
//!
//! All lengths are measured in characters, never bytes, so multi-byte text
//! (Cyrillic, CJK, emoji) is never split mid-character.

/// Number of characters in `s`.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// The first `max_chars` characters of `s`.
pub fn char_prefix(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Split text into chunks of at most `max_chars` characters.
///
/// Prefers to break on the last newline inside the window, but never produces
/// a chunk shorter than half the window because of it. Leading newlines of
/// each following chunk are dropped.
pub fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if char_len(remaining) <= max_chars {
            chunks.push(remaining.to_string());
            break;
        }

        let window = char_prefix(remaining, max_chars);
        let split_at = match window.rfind('\n') {
            Some(pos) if char_len(&window[..pos]) >= max_chars / 2 => pos,
            _ => window.len(),
        };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start_matches('\n');
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_prefix() {
        assert_eq!(char_prefix("hello", 10), "hello");
        assert_eq!(char_prefix("hello", 3), "hel");
        assert_eq!(char_prefix("привет", 3), "при");
        assert_eq!(char_prefix("", 3), "");
    }

    #[test]
    fn test_split_text_short() {
        assert_eq!(split_text("short", 100), vec!["short".to_string()]);
        assert!(split_text("", 100).is_empty());
    }

    #[test]
    fn test_split_text_prefers_newline() {
        let text = format!("{}\n{}", "a".repeat(8), "b".repeat(8));
        let chunks = split_text(&text, 10);
        assert_eq!(chunks, vec!["a".repeat(8), "b".repeat(8)]);
    }

    #[test]
    fn test_split_text_ignores_early_newline() {
        let text = format!("ab\n{}", "c".repeat(20));
        let chunks = split_text(&text, 10);
        assert_eq!(chunks[0], format!("ab\n{}", "c".repeat(7)));
        assert!(chunks.iter().all(|c| char_len(c) <= 10));
        assert_eq!(chunks.concat().replace('\n', ""), text.replace('\n', ""));
    }

    #[test]
    fn test_split_text_multibyte() {
        let text = "ж".repeat(25);
        let chunks = split_text(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(char_len(&chunks[2]), 5);
    }
}
