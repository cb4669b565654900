//! HTML to plain-text conversion.
//!
//! Keeps paragraph structure (block tags become blank lines) and basic
//! emphasis (`_em_`, `*strong*`), strips everything else, and decodes a
//! fixed table of entities.

use std::sync::LazyLock;

use dkl_core::utils::truncate_at_char_boundary;
use regex::{Captures, Regex};

/// Inputs beyond this many bytes are truncated before conversion.
pub const MAX_HTML_BYTES: usize = 10 * 1024 * 1024;

static SCRIPT_STYLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>")
        .expect("valid regex")
});
static COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"));
static BLOCK_PARAGRAPH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</(p|table|h[1-6]|pre|form|ul|ol|article|section)\s*>").expect("valid regex")
});
static BLOCK_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</(div|tr|li)\s*>|<br\s*/?>").expect("valid regex"));
static EMPHASIS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</?(em|i)(\s[^>]*)?>").expect("valid regex"));
static STRONG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</?(b|strong)(\s[^>]*)?>").expect("valid regex"));
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));
static ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&[#A-Za-z0-9]+;").expect("valid regex"));
static SPACES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").expect("valid regex"));
static BLANK_LINES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

fn entity(name: &str) -> Option<&'static str> {
    let text = match name {
        "&nbsp;" => " ",
        "&amp;" => "&",
        "&lt;" => "<",
        "&gt;" => ">",
        "&quot;" => "\"",
        "&apos;" | "&#39;" => "'",
        "&cent;" => "¢",
        "&pound;" => "£",
        "&euro;" => "€",
        "&copy;" => "©",
        "&reg;" => "®",
        "&trade;" => "™",
        "&#8216;" | "&#8217;" | "&lsquo;" | "&rsquo;" => "'",
        "&#8220;" | "&#8221;" | "&ldquo;" | "&rdquo;" => "\"",
        "&#8230;" => "...",
        "&bull;" => "•",
        "&ndash;" => "–",
        "&mdash;" => "—",
        _ => return None,
    };
    Some(text)
}

/// Convert HTML markup to readable plain text.
pub fn html_to_text(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }
    let html = truncate_at_char_boundary(html, MAX_HTML_BYTES);

    let text = SCRIPT_STYLE_RE.replace_all(html, "");
    let text = COMMENT_RE.replace_all(&text, "");

    let text = BLOCK_PARAGRAPH_RE.replace_all(&text, "\n\n");
    let text = BLOCK_LINE_RE.replace_all(&text, "\n");

    let text = EMPHASIS_RE.replace_all(&text, "_");
    let text = STRONG_RE.replace_all(&text, "*");

    let text = TAG_RE.replace_all(&text, "");
    let text = ENTITY_RE.replace_all(&text, |caps: &Captures| {
        let raw = &caps[0];
        entity(raw).unwrap_or(raw).to_string()
    });

    // Decoded `&lt;`/`&gt;` may have formed new tags.
    let text = strip_formed_tags(&text);

    normalize_text(&text)
}

/// Remove every `<name ...>` / `</name ...>` span, including spans that only
/// close up once an inner one is removed, in a single pass.
///
/// `open` holds the positions in `out` of each `<` written since the last
/// `>`, so the top entry always starts a `[^<>]*` run up to the cursor.
fn strip_formed_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut open: Vec<usize> = Vec::new();

    for c in text.chars() {
        match c {
            '<' => {
                open.push(out.len());
                out.push(c);
            }
            '>' => match open.last() {
                Some(&start) if starts_tag(&out[start + 1..]) => {
                    out.truncate(start);
                    open.pop();
                }
                _ => {
                    // No earlier `<` can pair with anything past this `>`.
                    open.clear();
                    out.push(c);
                }
            },
            _ => out.push(c),
        }
    }
    out
}

fn starts_tag(inner: &str) -> bool {
    let name = inner.strip_prefix('/').unwrap_or(inner);
    name.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
}

/// Collapse runs of spaces and tabs, trim each line, allow at most one
/// blank line in a row, and trim the result.
pub fn normalize_text(text: &str) -> String {
    let joined = text
        .lines()
        .map(|line| SPACES_RE.replace_all(line.trim(), " "))
        .collect::<Vec<_>>()
        .join("\n");
    BLANK_LINES_RE
        .replace_all(&joined, "\n\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    static RECOGNIZABLE_TAG_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"</?[A-Za-z][^<>]*>").unwrap());

    #[test]
    fn test_empty_and_whitespace() {
        assert_eq!(html_to_text(""), "");
        assert_eq!(html_to_text("   \n\t "), "");
    }

    #[test]
    fn test_br() {
        assert_eq!(html_to_text("Hello<br>World"), "Hello\nWorld");
        assert_eq!(html_to_text("Hello<br/>World"), "Hello\nWorld");
        assert_eq!(html_to_text("Hello<BR />World"), "Hello\nWorld");
    }

    #[test]
    fn test_paragraphs() {
        assert_eq!(
            html_to_text("<p>Hello</p><p>World</p>"),
            "Hello\n\nWorld"
        );
    }

    #[test]
    fn test_uppercase_block_tags() {
        assert_eq!(html_to_text("<DIV>a</DIV><DIV>b</DIV>"), "a\nb");
    }

    #[test]
    fn test_emphasis_markers() {
        assert_eq!(
            html_to_text("<p>Dit is <b>belangrijk</b> en <em>nadrukkelijk</em></p>"),
            "Dit is *belangrijk* en _nadrukkelijk_"
        );
        assert_eq!(html_to_text(r#"<strong class="x">Let op</strong>"#), "*Let op*");
    }

    #[test]
    fn test_script_style_comment_removed() {
        let html = "<style>p { color: red; }</style><script type=\"text/javascript\">alert(1)</script>\
                    <!-- hidden -->\n<p>Visible</p>";
        assert_eq!(html_to_text(html), "Visible");
    }

    #[test]
    fn test_entities() {
        assert_eq!(
            html_to_text("&amp; &lt;3 &quot;x&quot; &euro;5 &#8230; &mdash;"),
            "& <3 \"x\" €5 ... —"
        );
    }

    #[test]
    fn test_unknown_entity_passes_through() {
        assert_eq!(html_to_text("a &hellip; b"), "a &hellip; b");
    }

    #[test]
    fn test_entity_formed_tags_are_stripped() {
        assert_eq!(html_to_text("x &lt;script&gt;y"), "x y");
        assert_eq!(html_to_text("&lt;&lt;b&gt;a&gt;z"), "z");
    }

    #[test]
    fn test_strip_formed_tags() {
        assert_eq!(strip_formed_tags("a <b>c</b> d"), "a c d");
        assert_eq!(strip_formed_tags("<<b>a>z"), "z");
        assert_eq!(strip_formed_tags("1 < 2 > 0"), "1 < 2 > 0");
        assert_eq!(strip_formed_tags("<3 <br/>"), "<3 ");
        assert_eq!(strip_formed_tags("x > <y"), "x > <y");
        assert_eq!(strip_formed_tags("<a\nb>c"), "c");
    }

    #[test]
    fn test_deeply_nested_entity_tags_are_linear() {
        let n = 50_000;
        let html = format!("{}x{}tail", "&lt;a".repeat(n), "&gt;".repeat(n));
        let start = std::time::Instant::now();
        let out = html_to_text(&html);
        assert_eq!(out, "tail");
        assert!(start.elapsed() < std::time::Duration::from_secs(5), "took {:?}", start.elapsed());
    }

    #[test]
    fn test_no_tags_remain() {
        let inputs = [
            "<div><p>a</p><span>b</span></div>",
            "<a href=\"https://dekoninklijkeloop.nl\">site</a>",
            "&lt;img src=x&gt; text",
            "<table><tr><td>1</td><td>2</td></tr></table>",
        ];
        for input in inputs {
            let out = html_to_text(input);
            assert!(!RECOGNIZABLE_TAG_RE.is_match(&out), "tag left in {out:?}");
        }
    }

    #[test]
    fn test_blank_lines_collapsed() {
        let out = html_to_text("<p>a</p><p></p><p></p><br><br><p>b</p>");
        assert_eq!(out, "a\n\nb");
        assert!(!out.contains("\n\n\n"));
    }

    #[test]
    fn test_intra_line_whitespace() {
        assert_eq!(html_to_text("<p>  a \t  b  </p>"), "a b");
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(
            normalize_text("  Naam:   Jan \r\n\r\n\r\n\r\nE-mail: jan@test.nl  "),
            "Naam: Jan\n\nE-mail: jan@test.nl"
        );
    }

    #[test]
    fn test_truncates_huge_input() {
        let html = format!("<p>{}</p>", "a".repeat(MAX_HTML_BYTES + 100));
        let out = html_to_text(&html);
        assert!(out.len() <= MAX_HTML_BYTES);
        assert!(out.starts_with("aaa"));
    }
}
