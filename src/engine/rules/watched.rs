use std::collections::BTreeMap;

use regex::{Regex, RegexBuilder};
use tracing::warn;

use super::{regexp_expand, InlineRule, RuleContext, Segment};
use crate::common::{escape_attr, escape_text, WatchedWords};

const CENSOR_CHAR: char = '\u{25A0}';

/// Compiles a watched word into a case-insensitive regex.
/// `*` matches any run of non-whitespace; word characters at the edges get word boundaries.
fn word_pattern(word: &str) -> String {
    let body = word
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"\S*");

    let is_word = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric() || c == '_');
    let prefix = if is_word(word.chars().next()) { r"\b" } else { "" };
    let suffix = if is_word(word.chars().next_back()) { r"\b" } else { "" };

    format!("{prefix}{body}{suffix}")
}

fn compile(pattern: &str) -> Option<Regex> {
    match RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(regex) => Some(regex),
        Err(e) => {
            warn!("Skipping watched word pattern {pattern:?}: {e}");
            None
        }
    }
}

fn compile_map(words: &BTreeMap<String, String>) -> Vec<(Regex, String)> {
    words
        .iter()
        .filter(|(word, _)| !word.trim().is_empty())
        .filter_map(|(word, target)| Some((compile(&word_pattern(word))?, target.clone())))
        .collect()
}

/// Applies `replace` (word to text) and `link` (word to anchor) watched words.
pub struct WatchedWordsRule {
    replace: Vec<(Regex, String)>,
    link: Vec<(Regex, String)>,
}

impl WatchedWordsRule {
    pub fn new(words: &WatchedWords) -> Self {
        Self {
            replace: compile_map(&words.replace),
            link: compile_map(&words.link),
        }
    }

    fn pass(
        segments: Vec<Segment>,
        regex: &Regex,
        mut replacement: impl FnMut(&str) -> Segment,
    ) -> (Vec<Segment>, bool) {
        let mut changed = false;
        let segments = segments
            .into_iter()
            .flat_map(|segment| match segment {
                Segment::Text(text) => match regexp_expand(&text, regex, |caps, _| Some(replacement(&caps[0]))) {
                    Some(out) => {
                        changed = true;
                        out
                    }
                    None => vec![Segment::Text(text)],
                },
                html => vec![html],
            })
            .collect();

        (segments, changed)
    }
}

impl InlineRule for WatchedWordsRule {
    fn name(&self) -> &'static str {
        "watched-words"
    }

    fn apply(&self, text: &str, _cx: &RuleContext) -> Option<Vec<Segment>> {
        if self.replace.is_empty() && self.link.is_empty() {
            return None;
        }

        let mut segments = vec![Segment::Text(text.to_owned())];
        let mut changed = false;

        for (regex, target) in &self.replace {
            let (out, hit) = Self::pass(segments, regex, |_| Segment::Text(target.clone()));
            segments = out;
            changed |= hit;
        }

        for (regex, url) in &self.link {
            let (out, hit) = Self::pass(segments, regex, |word| {
                Segment::Html(format!(
                    "<a href=\"{}\">{}</a>",
                    escape_attr(url),
                    escape_text(word)
                ))
            });
            segments = out;
            changed |= hit;
        }

        changed.then_some(segments)
    }
}

/// Replaces censored words with block characters.
pub struct CensorRule {
    regex: Option<Regex>,
}

impl CensorRule {
    pub fn new(words: &[String]) -> Self {
        let alternatives = words
            .iter()
            .filter(|word| !word.trim().is_empty())
            .map(|word| format!("(?:{})", word_pattern(word)))
            .collect::<Vec<_>>();

        let regex = match alternatives.is_empty() {
            true => None,
            false => compile(&alternatives.join("|")),
        };

        Self { regex }
    }
}

impl InlineRule for CensorRule {
    fn name(&self) -> &'static str {
        "censored"
    }

    fn applies_in_link(&self) -> bool {
        true
    }

    fn apply(&self, text: &str, _cx: &RuleContext) -> Option<Vec<Segment>> {
        let regex = self.regex.as_ref()?;

        regexp_expand(text, regex, |caps, _| {
            let blocks = std::iter::repeat(CENSOR_CHAR)
                .take(caps[0].chars().count())
                .collect();
            Some(Segment::Text(blocks))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::with_context;

    fn words() -> WatchedWords {
        let mut words = WatchedWords::default();
        words.censor = vec!["darn".into(), "heck*".into()];
        words.replace.insert("colour".into(), "color".into());
        words.link.insert("rust".into(), "https://rust-lang.org".into());
        words
    }

    #[test]
    fn patterns() {
        assert_eq!(word_pattern("darn"), r"\bdarn\b");
        assert_eq!(word_pattern("heck*"), r"\bheck\S*");
        assert_eq!(word_pattern("c++"), r"\bc\+\+");
    }

    #[test]
    fn censor() {
        with_context(|cx| {
            let rule = CensorRule::new(&words().censor);
            let out = rule.apply("Darn it, what the hecking darnation", cx).unwrap();

            assert_eq!(out, vec![Segment::Text("\u{25A0}\u{25A0}\u{25A0}\u{25A0} it, what the \u{25A0}\u{25A0}\u{25A0}\u{25A0}\u{25A0}\u{25A0}\u{25A0} darnation".into())]);
        });
    }

    #[test]
    fn replace_and_link() {
        with_context(|cx| {
            let rule = WatchedWordsRule::new(&words());
            let out = rule.apply("Colour me Rust", cx).unwrap();

            assert_eq!(
                out,
                vec![
                    Segment::Text("color me ".into()),
                    Segment::Html("<a href=\"https://rust-lang.org\">Rust</a>".into()),
                ]
            );
            assert_eq!(rule.apply("nothing here", cx), None);
        });
    }
}
