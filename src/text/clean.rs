//! Markdown to speakable plain text.
//!
//! Documents arrive as markdown; formatting markers, code and link targets
//! read badly when spoken, so they are stripped before chunking. Paragraph
//! breaks survive because the chunker splits on them.

use std::sync::LazyLock;

use regex::Regex;

fn pattern(source: &str) -> Regex {
    Regex::new(source).expect("valid regex")
}

static FRONT_MATTER: LazyLock<Regex> = LazyLock::new(|| pattern(r"\A\s*---[ \t]*\r?\n(?s:.*?)\r?\n---[ \t]*(?:\r?\n|\z)"));
static BACKTICK_FENCE: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?ms)^[ \t]*```.*?^[ \t]*```[^\n]*$"));
static TILDE_FENCE: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?ms)^[ \t]*~~~.*?^[ \t]*~~~[^\n]*$"));
static HORIZONTAL_RULE: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?m)^[ \t]{0,3}(?:(?:-[ \t]*){3,}|(?:\*[ \t]*){3,}|(?:_[ \t]*){3,})$"));
static IMAGE: LazyLock<Regex> = LazyLock::new(|| pattern(r"!\[[^\]]*\]\([^)]*\)|!\[\[[^\]]*\]\]"));
static WIKI_LINK: LazyLock<Regex> = LazyLock::new(|| pattern(r"\[\[(?:[^\]|]*\|)?([^\]]+)\]\]"));
static LINK: LazyLock<Regex> = LazyLock::new(|| pattern(r"\[([^\]]+)\]\([^)]*\)"));
static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| pattern(r"</?[a-zA-Z][^>]*>|<!--(?s:.*?)-->"));
static INLINE_CODE: LazyLock<Regex> = LazyLock::new(|| pattern(r"`([^`\n]*)`"));
static HEADING: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?m)^[ \t]{0,3}#{1,6}[ \t]+"));
static BLOCKQUOTE: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?m)^[ \t]{0,3}(?:>[ \t]?)+"));
static LIST_MARKER: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?m)^[ \t]*(?:[-*+]|\d+[.)])[ \t]+(?:\[[ xX]\][ \t]+)?"));
static BOLD: LazyLock<Regex> = LazyLock::new(|| pattern(r"\*\*([^*\n]+)\*\*|__([^_\n]+)__"));
static ITALIC: LazyLock<Regex> = LazyLock::new(|| pattern(r"\*([^*\s][^*\n]*)\*|\b_([^_\n]+)_\b"));
static STRIKE_OR_HIGHLIGHT: LazyLock<Regex> = LazyLock::new(|| pattern(r"~~([^~\n]+)~~|==([^=\n]+)=="));
static SPACES: LazyLock<Regex> = LazyLock::new(|| pattern(r"[ \t]+"));
static BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| pattern(r"\n{3,}"));

/// Strip markdown formatting, keeping the words a listener should hear.
///
/// Returns an empty string when nothing readable is left.
#[must_use]
pub fn clean_text(text: &str) -> String {
    let text = text.replace("\r\n", "\n");
    let text = FRONT_MATTER.replace(&text, "");
    let text = BACKTICK_FENCE.replace_all(&text, "");
    let text = TILDE_FENCE.replace_all(&text, "");
    let text = HORIZONTAL_RULE.replace_all(&text, "");
    let text = IMAGE.replace_all(&text, "");
    let text = WIKI_LINK.replace_all(&text, "$1");
    let text = LINK.replace_all(&text, "$1");
    let text = HTML_TAG.replace_all(&text, "");
    let text = INLINE_CODE.replace_all(&text, "$1");
    let text = HEADING.replace_all(&text, "");
    let text = BLOCKQUOTE.replace_all(&text, "");
    let text = LIST_MARKER.replace_all(&text, "");
    let text = BOLD.replace_all(&text, "$1$2");
    let text = ITALIC.replace_all(&text, "$1$2");
    let text = STRIKE_OR_HIGHLIGHT.replace_all(&text, "$1$2");
    let text = SPACES.replace_all(&text, " ");

    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    let text = lines.join("\n");
    BLANK_LINES.replace_all(&text, "\n\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_inline_formatting() {
        let input = "# Title\n\nSome **bold**, *italic* and `code` with a [link](https://example.com).";
        assert_eq!(clean_text(input), "Title\n\nSome bold, italic and code with a link.");
    }

    #[test]
    fn test_removes_code_blocks_and_images() {
        let input = "Before.\n\n```rust\nfn main() {}\n```\n\n![diagram](img.png)\n\nAfter.";
        assert_eq!(clean_text(input), "Before.\n\nAfter.");
    }

    #[test]
    fn test_removes_front_matter() {
        let input = "---\ntitle: Notes\ntags: [a, b]\n---\nBody text.";
        assert_eq!(clean_text(input), "Body text.");
    }

    #[test]
    fn test_lists_quotes_and_rules() {
        let input = "> quoted line\n\n- first\n- [x] done\n1. numbered\n\n---\n\nEnd";
        assert_eq!(clean_text(input), "quoted line\n\nfirst\ndone\nnumbered\n\nEnd");
    }

    #[test]
    fn test_wiki_links_keep_alias() {
        assert_eq!(clean_text("See [[Some Page|this page]] and [[Other]]."), "See this page and Other.");
    }

    #[test]
    fn test_snake_case_words_survive() {
        assert_eq!(clean_text("call my_function_name now"), "call my_function_name now");
    }

    #[test]
    fn test_formatting_only_is_empty() {
        assert_eq!(clean_text("```\ncode only\n```\n\n---\n<br/>"), "");
        assert_eq!(clean_text("   \n\n  "), "");
    }
}
