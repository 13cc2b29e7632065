//! Shaping of texts that exceed the length ceiling.

use parley_common::util::{char_len, char_prefix};

/// The first `preview_chars` characters, cut back to a line break when one
/// falls in the second half, followed by the reference link.
pub(crate) fn preview_with_link(text: &str, preview_chars: usize, url: &str) -> String {
    let prefix = char_prefix(text, preview_chars);
    let preview = match prefix.rfind('\n') {
        Some(pos) if char_len(&prefix[..pos]) >= preview_chars / 2 => &prefix[..pos],
        _ => prefix,
    };
    format!("{}\n…\n\nFull answer: {url}", preview.trim_end())
}

/// `text` followed by `notice` after a blank line, or `text` alone.
pub(crate) fn with_notice(text: &str, notice: Option<&str>) -> String {
    match notice {
        Some(notice) if text.is_empty() => notice.to_string(),
        Some(notice) => format!("{text}\n\n{notice}"),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_cuts_at_late_newline() {
        let text = format!("{}\n{}", "a".repeat(700), "b".repeat(4000));
        let preview = preview_with_link(&text, 800, "https://telegra.ph/x");
        assert!(preview.starts_with(&"a".repeat(700)));
        assert!(!preview.contains('b'));
        assert!(preview.ends_with("https://telegra.ph/x"));
    }

    #[test]
    fn test_preview_ignores_early_newline() {
        let text = format!("title\n{}", "c".repeat(5000));
        let preview = preview_with_link(&text, 800, "u");
        assert!(preview.starts_with(&format!("title\n{}", "c".repeat(794))));
    }

    #[test]
    fn test_with_notice() {
        assert_eq!(with_notice("", Some("failed")), "failed");
        assert_eq!(with_notice("partial", Some("failed")), "partial\n\nfailed");
        assert_eq!(with_notice("partial", None), "partial");
    }
}
