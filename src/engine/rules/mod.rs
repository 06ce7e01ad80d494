//! Core extension rules. Each one rewrites the text runs of a parsed Markdown document.

mod emoji;
mod hashtag;
mod linkify;
mod mention;
pub mod quote;
mod watched;

pub use emoji::EmojiRule;
pub use hashtag::HashtagRule;
pub use linkify::LinkifyRule;
pub use mention::MentionRule;
pub use watched::{CensorRule, WatchedWordsRule};

use regex::{Captures, Regex};

use super::options::OptionBundle;
use super::Budget;
use crate::common::{Host, SiteSettings};

/// Feature names of the core rules, in the order they run.
///
/// `quotes` and `onebox` are structural and live outside the inline chain.
pub const CORE_FEATURES: &[&str] = &[
    "quotes",
    "onebox",
    "linkify",
    "watched-words",
    "censored",
    "emoji",
    "mentions",
    "hashtags",
];

/// A run of output: either plain text (escaped when written) or trusted markup produced by a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Html(String),
}

/// Everything a rule may consult while it runs.
pub struct RuleContext<'a> {
    pub bundle: &'a OptionBundle,
    pub host: &'a dyn Host,
    pub budget: &'a Budget,
}

/// A rule that rewrites plain text into segments.
pub trait InlineRule: Send + Sync {
    /// Feature flag that gates the rule.
    fn name(&self) -> &'static str;

    /// Whether the rule also applies to the text of a link.
    fn applies_in_link(&self) -> bool {
        false
    }

    /// Returns `None` when the text is left untouched.
    fn apply(&self, text: &str, cx: &RuleContext) -> Option<Vec<Segment>>;
}

/// Builds the inline rules from a settings snapshot, in their fixed order.
pub fn core_rules(settings: &SiteSettings) -> Vec<Box<dyn InlineRule>> {
    vec![
        Box::new(LinkifyRule),
        Box::new(WatchedWordsRule::new(&settings.watched_words)),
        Box::new(CensorRule::new(&settings.watched_words.censor)),
        Box::new(EmojiRule::new(settings)),
        Box::new(MentionRule),
        Box::new(HashtagRule),
    ]
}

/// Runs every enabled rule over a text run, splicing the results together.
pub fn apply_rules(
    text: &str,
    rules: &[Box<dyn InlineRule>],
    cx: &RuleContext,
    in_link: bool,
) -> Vec<Segment> {
    let mut segments = vec![Segment::Text(text.to_owned())];

    for rule in rules {
        if !cx.bundle.enabled(rule.name()) || (in_link && !rule.applies_in_link()) {
            continue;
        }

        segments = segments
            .into_iter()
            .flat_map(|segment| match segment {
                Segment::Text(text) => rule
                    .apply(&text, cx)
                    .unwrap_or_else(|| vec![Segment::Text(text)]),
                html => vec![html],
            })
            .collect();
    }

    segments
}

/// Fine-tuned version of [`Regex::replace_all()`] that yields segments.
/// - The replacer sees each match's captures and may decline it by returning `None`,
///   in which case the matched text is kept as-is.
/// - Returns `None` if nothing was replaced.
pub fn regexp_expand(
    source: &str,
    expression: &Regex,
    mut replacer: impl FnMut(&Captures, &str) -> Option<Segment>,
) -> Option<Vec<Segment>> {
    let mut matches = expression.captures_iter(source).peekable();
    matches.peek()?;

    let mut segments = Vec::new();
    let mut buffer = String::new();
    let mut last_match = 0;
    let mut replaced = false;

    for caps in matches {
        // Unwrap justification: group 0 always participates in a match.
        let whole = caps.get(0).unwrap();
        let Some(replacement) = replacer(&caps, &source[..whole.start()]) else {
            continue;
        };

        buffer.push_str(&source[last_match..whole.start()]);
        match replacement {
            Segment::Text(text) => buffer.push_str(&text),
            html => {
                if !buffer.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut buffer)));
                }
                segments.push(html);
            }
        }
        last_match = whole.end();
        replaced = true;
    }

    if !replaced {
        return None;
    }

    buffer.push_str(&source[last_match..]);
    if !buffer.is_empty() {
        segments.push(Segment::Text(buffer));
    }

    Some(segments)
}

/// Whether `before` ends in a character that glues onto a following sigil (`@`, `#`).
fn glued(before: &str, extra: &[char]) -> bool {
    before
        .chars()
        .next_back()
        .is_some_and(|c| c.is_alphanumeric() || c == '_' || extra.contains(&c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;

    static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

    #[test]
    fn expand_splices() {
        let out = regexp_expand("a 12 b 3", &DIGITS, |caps, _| {
            Some(Segment::Html(format!("<n>{}</n>", &caps[0])))
        })
        .unwrap();

        assert_eq!(
            out,
            vec![
                Segment::Text("a ".into()),
                Segment::Html("<n>12</n>".into()),
                Segment::Text(" b ".into()),
                Segment::Html("<n>3</n>".into()),
            ]
        );
    }

    #[test]
    fn expand_declines() {
        assert_eq!(regexp_expand("a 12", &DIGITS, |_, _| None), None);
        assert_eq!(regexp_expand("none", &DIGITS, |_, _| None), None);

        let out = regexp_expand("1 2", &DIGITS, |caps, _| {
            (&caps[0] == "2").then(|| Segment::Text("two".into()))
        })
        .unwrap();
        assert_eq!(out, vec![Segment::Text("1 two".into())]);
    }

    #[test]
    fn glue() {
        assert!(glued("foo", &[]));
        assert!(glued("a/", &['/']));
        assert!(!glued("foo ", &[]));
        assert!(!glued("", &[]));
    }
}
