//! Markdown to Telegram HTML.
//!
//! Telegram's HTML parse mode accepts a small tag set and rejects anything
//! unbalanced. Code blocks, code spans, tables and links are rendered first
//! and set aside in slots, so the later inline rewrites never touch them.

use regex::{Captures, Regex};
use std::sync::LazyLock;

// ============================================================================
// Patterns
// ============================================================================

static CODE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```([A-Za-z0-9_+-]*)\n?([\s\S]*?)```").unwrap());
static INLINE_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`([^`\n]+)`").unwrap());
static HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^#{1,6}\s+(.+?)\s*#*$").unwrap());
static QUOTE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^&gt;\s?(.*)$").unwrap());
static BULLET: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\s*)[-*+]\s+(.*)$").unwrap());
static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]\n]+)\]\(([^)\s]+)\)").unwrap());
static BOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*([^*\n]+?)\*\*|__([^_\n]+?)__").unwrap());
static STRIKE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"~~([^~\n]+?)~~").unwrap());
static ITALIC_STAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*([^*\n]+?)\*").unwrap());
// Only at word edges, so snake_case identifiers survive.
static ITALIC_UNDERSCORE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|[^\w])_([^_\n]+?)_($|[^\w])").unwrap());
static TABLE_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\|?\s*:?-{2,}:?\s*(\|\s*:?-{2,}:?\s*)*\|?$").unwrap());

const SLOT_MARK: char = '\u{0}';

/// Fragments that are already final HTML, replaced by opaque keys meanwhile.
#[derive(Default)]
struct Slots(Vec<String>);

impl Slots {
    fn hold(&mut self, html: String) -> String {
        let key = format!("{SLOT_MARK}{}{SLOT_MARK}", self.0.len());
        self.0.push(html);
        key
    }

    fn restore(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (i, html) in self.0.iter().enumerate() {
            out = out.replace(&format!("{SLOT_MARK}{i}{SLOT_MARK}"), html);
        }
        out
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Render model Markdown as Telegram HTML.
///
/// | Markdown              | HTML                                  |
/// |-----------------------|---------------------------------------|
/// | `# Title`             | `<b>Title</b>`                        |
/// | `- item`, `* item`    | `• item`                              |
/// | `> quote`             | `<blockquote>quote</blockquote>`      |
/// | ```` ```lang ````     | `<pre><code class="language-lang">`   |
/// | `` `code` ``          | `<code>code</code>`                   |
/// | `**bold**`            | `<b>bold</b>`                         |
/// | `*it*`, `_it_`        | `<i>it</i>`                           |
/// | `~~gone~~`            | `<s>gone</s>`                         |
/// | `[text](url)`         | `<a href="url">text</a>`              |
/// | pipe tables           | box-drawn table in `<pre>`            |
pub fn to_telegram_html(markdown: &str) -> String {
    let mut slots = Slots::default();

    let text = CODE_BLOCK.replace_all(markdown, |caps: &Captures| {
        let code = escape_html(caps[2].trim_matches('\n'));
        let html = match &caps[1] {
            "" => format!("<pre>{code}</pre>"),
            lang => format!("<pre><code class=\"language-{lang}\">{code}</code></pre>"),
        };
        slots.hold(html)
    });
    let text = render_tables(&text, &mut slots);
    let text = escape_html(&text);

    let text = INLINE_CODE.replace_all(&text, |caps: &Captures| {
        slots.hold(format!("<code>{}</code>", &caps[1]))
    });
    let text = LINK.replace_all(&text, |caps: &Captures| {
        let href = caps[2].replace('"', "&quot;");
        slots.hold(format!("<a href=\"{href}\">{}</a>", &caps[1]))
    });

    let lines: Vec<String> = text.lines().map(render_line).collect();
    let text = render_inline(&lines.join("\n"));

    slots.restore(&text)
}

/// Escape the three characters Telegram's HTML parser treats specially.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

// ============================================================================
// Block and inline rules
// ============================================================================

fn render_line(line: &str) -> String {
    if let Some(caps) = HEADING.captures(line) {
        return format!("<b>{}</b>", &caps[1]);
    }
    if let Some(caps) = QUOTE.captures(line) {
        return format!("<blockquote>{}</blockquote>", &caps[1]);
    }
    if let Some(caps) = BULLET.captures(line) {
        return format!("{}• {}", &caps[1], &caps[2]);
    }
    line.to_string()
}

fn render_inline(text: &str) -> String {
    let text = BOLD.replace_all(text, |caps: &Captures| {
        let inner = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
        format!("<b>{inner}</b>")
    });
    let text = STRIKE.replace_all(&text, "<s>$1</s>");
    let text = ITALIC_STAR.replace_all(&text, "<i>$1</i>");
    ITALIC_UNDERSCORE
        .replace_all(&text, "${1}<i>${2}</i>${3}")
        .into_owned()
}

// ============================================================================
// Tables
// ============================================================================

/// Replace pipe tables (header row, separator row, body rows) with slots
/// holding a monospace rendering.
fn render_tables(text: &str, slots: &mut Slots) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut out = Vec::with_capacity(lines.len());
    let mut i = 0;

    while i < lines.len() {
        let starts_table = is_table_row(lines[i])
            && lines
                .get(i + 1)
                .is_some_and(|next| TABLE_SEPARATOR.is_match(next.trim()));
        if !starts_table {
            out.push(lines[i].to_string());
            i += 1;
            continue;
        }

        let mut rows = vec![split_row(lines[i])];
        let mut j = i + 2;
        while j < lines.len() && is_table_row(lines[j]) {
            rows.push(split_row(lines[j]));
            j += 1;
        }
        out.push(slots.hold(draw_table(&rows)));
        i = j;
    }

    out.join("\n")
}

fn is_table_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.contains('|') && !TABLE_SEPARATOR.is_match(trimmed)
}

fn split_row(line: &str) -> Vec<String> {
    line.trim()
        .trim_matches('|')
        .split('|')
        .map(|cell| cell.trim().to_string())
        .collect()
}

fn draw_table(rows: &[Vec<String>]) -> String {
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let widths: Vec<usize> = (0..columns)
        .map(|c| {
            rows.iter()
                .filter_map(|row| row.get(c))
                .map(|cell| display_width(cell))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let rule = |left: &str, mid: &str, right: &str| {
        let segments: Vec<String> = widths.iter().map(|w| "─".repeat(w + 2)).collect();
        format!("{left}{}{right}", segments.join(mid))
    };
    let row = |cells: &[String]| {
        let padded: Vec<String> = widths
            .iter()
            .enumerate()
            .map(|(c, width)| {
                let cell = cells.get(c).map_or("", String::as_str);
                let pad = width.saturating_sub(display_width(cell));
                format!(" {cell}{} ", " ".repeat(pad))
            })
            .collect();
        format!("│{}│", padded.join("│"))
    };

    let mut out = vec![rule("┌", "┬", "┐")];
    for (n, cells) in rows.iter().enumerate() {
        out.push(row(cells));
        if n == 0 && rows.len() > 1 {
            out.push(rule("├", "┼", "┤"));
        }
    }
    out.push(rule("└", "┴", "┘"));

    format!("<pre>{}</pre>", escape_html(&out.join("\n")))
}

/// Monospace columns taken by `s`; CJK and fullwidth characters take two.
fn display_width(s: &str) -> usize {
    s.chars()
        .map(|c| match c as u32 {
            0x1100..=0x115F
            | 0x2E80..=0x303E
            | 0x3040..=0xA4CF
            | 0xAC00..=0xD7A3
            | 0xF900..=0xFAFF
            | 0xFF00..=0xFF60
            | 0xFFE0..=0xFFE6 => 2,
            _ => 1,
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headings() {
        assert_eq!(to_telegram_html("# Title"), "<b>Title</b>");
        assert_eq!(to_telegram_html("### Section ##"), "<b>Section</b>");
        assert_eq!(to_telegram_html("#hashtag"), "#hashtag");
    }

    #[test]
    fn test_inline_styles() {
        assert_eq!(
            to_telegram_html("**bold** and *it* and ~~gone~~"),
            "<b>bold</b> and <i>it</i> and <s>gone</s>"
        );
        assert_eq!(to_telegram_html("an _aside_ here"), "an <i>aside</i> here");
    }

    #[test]
    fn test_snake_case_is_untouched() {
        assert_eq!(to_telegram_html("call snake_case_name now"), "call snake_case_name now");
    }

    #[test]
    fn test_escapes_html() {
        assert_eq!(to_telegram_html("a < b & c > d"), "a &lt; b &amp; c &gt; d");
        assert_eq!(to_telegram_html("<bad>"), "&lt;bad&gt;");
    }

    #[test]
    fn test_code_block_content_is_only_escaped() {
        let html = to_telegram_html("```rust\nlet x = a**b** < c;\n```");
        assert_eq!(
            html,
            "<pre><code class=\"language-rust\">let x = a**b** &lt; c;</code></pre>"
        );
        assert_eq!(to_telegram_html("```\n# not a heading\n```"), "<pre># not a heading</pre>");
    }

    #[test]
    fn test_inline_code() {
        assert_eq!(
            to_telegram_html("use `*ptr_a_b*` here"),
            "use <code>*ptr_a_b*</code> here"
        );
    }

    #[test]
    fn test_links() {
        assert_eq!(
            to_telegram_html("see [the docs](https://x.io/a_b_c?q=1&r=2)"),
            "see <a href=\"https://x.io/a_b_c?q=1&amp;r=2\">the docs</a>"
        );
    }

    #[test]
    fn test_lists_and_quotes() {
        assert_eq!(to_telegram_html("- one\n  * two"), "• one\n  • two");
        assert_eq!(to_telegram_html("> wise words"), "<blockquote>wise words</blockquote>");
        assert_eq!(to_telegram_html("1. first"), "1. first");
    }

    #[test]
    fn test_table_rendering() {
        let html = to_telegram_html("| a | bb |\n|---|:--:|\n| 1 | 2 |");
        let expected = [
            "┌───┬────┐",
            "│ a │ bb │",
            "├───┼────┤",
            "│ 1 │ 2  │",
            "└───┴────┘",
        ]
        .join("\n");
        assert_eq!(html, format!("<pre>{expected}</pre>"));
    }

    #[test]
    fn test_pipe_without_separator_is_text() {
        assert_eq!(to_telegram_html("a | b"), "a | b");
    }

    #[test]
    fn test_display_width() {
        assert_eq!(display_width("abc"), 3);
        assert_eq!(display_width("你好"), 4);
    }
}
