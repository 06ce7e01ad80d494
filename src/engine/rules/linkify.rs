use once_cell::sync::Lazy;
use regex::Regex;

use super::{InlineRule, RuleContext, Segment};
use crate::common::{escape_attr, escape_text};

static BARE_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?i)\bhttps?://[^\s<>"'`]+"#).unwrap());

/// Trailing characters that are almost always punctuation rather than part of the URL.
const TRAILING: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '\''];

/// Turns bare `http(s)://` URLs into anchors.
pub struct LinkifyRule;

impl LinkifyRule {
    /// Whether `text` is nothing but a single bare URL.
    pub fn is_bare_url(text: &str) -> bool {
        let text = text.trim();
        BARE_URL
            .find(text)
            .is_some_and(|m| m.start() == 0 && m.end() == text.len())
    }

    pub fn anchor(url: &str, extra: &str) -> String {
        format!(
            "<a href=\"{}\"{extra}>{}</a>",
            escape_attr(url),
            escape_text(url)
        )
    }
}

impl InlineRule for LinkifyRule {
    fn name(&self) -> &'static str {
        "linkify"
    }

    fn apply(&self, text: &str, _cx: &RuleContext) -> Option<Vec<Segment>> {
        if !text.contains("://") {
            return None;
        }

        let mut segments = Vec::new();
        let mut last = 0;

        for m in BARE_URL.find_iter(text) {
            let url = m.as_str().trim_end_matches(TRAILING);
            // Keep a closing paren when the URL itself opened one.
            let url = match m.as_str()[url.len()..].starts_with(')') && url.contains('(') {
                true => &m.as_str()[..url.len() + 1],
                false => url,
            };

            if url.len() <= "https://".len() {
                continue;
            }

            if last < m.start() {
                segments.push(Segment::Text(text[last..m.start()].to_owned()));
            }
            segments.push(Segment::Html(Self::anchor(url, "")));
            last = m.start() + url.len();
        }

        if segments.is_empty() {
            return None;
        }
        if last < text.len() {
            segments.push(Segment::Text(text[last..].to_owned()));
        }

        Some(segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::with_context;

    #[test]
    fn bare_urls() {
        with_context(|cx| {
            let out = LinkifyRule.apply("see https://example.com/a?b=1. ok", cx).unwrap();

            assert_eq!(
                out,
                vec![
                    Segment::Text("see ".into()),
                    Segment::Html("<a href=\"https://example.com/a?b=1\">https://example.com/a?b=1</a>".into()),
                    Segment::Text(". ok".into()),
                ]
            );
        });
    }

    #[test]
    fn parens() {
        with_context(|cx| {
            let out = LinkifyRule.apply("(https://en.wikipedia.org/wiki/Rust_(language))", cx).unwrap();

            assert_eq!(
                out[1],
                Segment::Html("<a href=\"https://en.wikipedia.org/wiki/Rust_(language)\">https://en.wikipedia.org/wiki/Rust_(language)</a>".into())
            );
        });
    }

    #[test]
    fn bare_detection() {
        assert!(LinkifyRule::is_bare_url("  https://example.com/watch?v=1 "));
        assert!(!LinkifyRule::is_bare_url("look: https://example.com"));
        assert!(!LinkifyRule::is_bare_url("https://"));
    }
}
