use once_cell::sync::Lazy;
use regex::Regex;

use super::{glued, InlineRule, RuleContext, Segment};
use crate::common::escape_text;

static MENTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"@([\w][\w.\-]*)").unwrap());

/// Wraps `@name` in a `span.mention`. Resolution into links happens after rendering.
pub struct MentionRule;

impl InlineRule for MentionRule {
    fn name(&self) -> &'static str {
        "mentions"
    }

    fn apply(&self, text: &str, _cx: &RuleContext) -> Option<Vec<Segment>> {
        if !text.contains('@') {
            return None;
        }

        let mut segments = Vec::new();
        let mut last = 0;

        for caps in MENTION.captures_iter(text) {
            // Unwrap justification: group 0 always participates in a match.
            let whole = caps.get(0).unwrap();
            if glued(&text[..whole.start()], &['@', '/', '`']) {
                continue;
            }

            // Names can contain dots and dashes, but never end with them.
            let name = caps[1].trim_end_matches(['.', '-']);
            if name.is_empty() {
                continue;
            }

            let end = whole.start() + 1 + name.len();
            if last < whole.start() {
                segments.push(Segment::Text(text[last..whole.start()].to_owned()));
            }
            segments.push(Segment::Html(format!(
                "<span class=\"mention\">@{}</span>",
                escape_text(name)
            )));
            last = end;
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
    fn wraps() {
        with_context(|cx| {
            let out = MentionRule.apply("@alice hello @bob.", cx).unwrap();

            assert_eq!(
                out,
                vec![
                    Segment::Html("<span class=\"mention\">@alice</span>".into()),
                    Segment::Text(" hello ".into()),
                    Segment::Html("<span class=\"mention\">@bob</span>".into()),
                    Segment::Text(".".into()),
                ]
            );
        });
    }

    #[test]
    fn ignores_emails_and_paths() {
        with_context(|cx| {
            assert_eq!(MentionRule.apply("mail me@example.com", cx), None);
            assert_eq!(MentionRule.apply("see /@alice", cx), None);
            assert_eq!(MentionRule.apply("no sigil here", cx), None);
        });
    }
}
