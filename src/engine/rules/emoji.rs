use std::collections::BTreeMap;

use ahash::AHashMap;
use gh_emoji as emoji;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{regexp_expand, InlineRule, RuleContext, Segment};
use crate::common::{escape_attr, SiteSettings};
use crate::engine::options::Paths;

static EMOJI_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r":([a-z0-9_+\-]+):").unwrap());

static SHORTCUT_REGEX: Lazy<Regex> = Lazy::new(|| {
    let alternatives = SHORTCUTS
        .iter()
        .map(|(code, _)| regex::escape(code))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(^|\s)({alternatives})")).unwrap()
});

/// Unicode emoji to their names, longest sequences first when scanning.
static UNICODE_NAMES: Lazy<AHashMap<&'static str, &'static str>> = Lazy::new(|| {
    emoji::all().map(|(name, glyph)| (glyph, name)).collect()
});

/// Longest emoji sequence, in chars.
const MAX_SEQUENCE: usize = 10;

const SHORTCUTS: &[(&str, &str)] = &[
    (":-)", "slightly_smiling_face"),
    (":)", "slightly_smiling_face"),
    (":-(", "frowning_face"),
    (":(", "frowning_face"),
    (";-)", "wink"),
    (";)", "wink"),
    (":-D", "smiley"),
    (":D", "smiley"),
    (":-P", "stuck_out_tongue"),
    (":P", "stuck_out_tongue"),
    (":p", "stuck_out_tongue"),
    (":O", "open_mouth"),
    (":o", "open_mouth"),
    (":/", "confused"),
    (":|", "neutral_face"),
    ("<3", "heart"),
];

/// Replaces `:name:` codes (and optionally ASCII shortcuts and raw Unicode emoji) with images.
///
/// The custom emoji table is captured when the rule is built, so new custom
/// emoji only show up once the engine context is rebuilt.
pub struct EmojiRule {
    custom: BTreeMap<String, String>,
    emoji_set: String,
    external_url: Option<String>,
    shortcuts: bool,
    inline_translation: bool,
}

impl EmojiRule {
    pub fn new(settings: &SiteSettings) -> Self {
        Self {
            custom: settings.custom_emoji.clone(),
            emoji_set: settings.emoji_set.clone(),
            external_url: settings
                .external_emoji_url
                .as_ref()
                .filter(|url| !url.is_empty())
                .map(|url| url.trim_end_matches('/').to_owned()),
            shortcuts: settings.enable_emoji_shortcuts,
            inline_translation: settings.enable_inline_emoji_translation,
        }
    }

    /// The `<img>` tag for an emoji name, or `None` if the name is unknown.
    pub fn image(&self, name: &str, paths: &Paths) -> Option<String> {
        let (src, class) = match self.custom.get(name) {
            Some(url) => (paths.get_url_with_cdn(url), "emoji emoji-custom"),
            None => {
                emoji::get(name)?;
                let src = match &self.external_url {
                    Some(external) => format!("{external}/{}/{name}.png", self.emoji_set),
                    None => paths.get_url_with_cdn(&format!("/images/emoji/{}/{name}.png?v=12", self.emoji_set)),
                };
                (src, "emoji")
            }
        };

        Some(format!(
            "<img src=\"{}\" title=\":{name}:\" class=\"{class}\" alt=\":{name}:\" loading=\"lazy\" width=\"20\" height=\"20\">",
            escape_attr(&src)
        ))
    }

    /// Rewrites ASCII shortcuts like `:)` into `:name:` codes.
    /// A shortcut only counts when it stands alone between whitespace.
    fn translate_shortcuts(text: &str) -> String {
        let mut output = String::with_capacity(text.len());
        let mut last = 0;

        for caps in SHORTCUT_REGEX.captures_iter(text) {
            // Unwrap justification: group 2 is not optional.
            let code = caps.get(2).unwrap();
            let standalone = text[code.end()..]
                .chars()
                .next()
                .map_or(true, char::is_whitespace);

            let name = SHORTCUTS.iter().find(|(shortcut, _)| *shortcut == code.as_str());
            let (true, Some((_, name))) = (standalone, name) else {
                continue;
            };

            output.push_str(&text[last..code.start()]);
            output.push(':');
            output.push_str(name);
            output.push(':');
            last = code.end();
        }

        output.push_str(&text[last..]);
        output
    }

    /// Rewrites raw Unicode emoji into `:name:` codes.
    fn translate_unicode(text: &str) -> String {
        if text.is_ascii() {
            return text.to_owned();
        }

        let mut output = String::with_capacity(text.len());
        let mut rest = text;

        'outer: while let Some(first) = rest.chars().next() {
            if !first.is_ascii() {
                let boundaries: Vec<usize> = rest
                    .char_indices()
                    .map(|(i, _)| i)
                    .skip(1)
                    .chain(std::iter::once(rest.len()))
                    .take(MAX_SEQUENCE)
                    .collect();

                for end in boundaries.into_iter().rev() {
                    if let Some(name) = UNICODE_NAMES.get(&rest[..end]) {
                        output.push(':');
                        output.push_str(name);
                        output.push(':');
                        rest = &rest[end..];
                        continue 'outer;
                    }
                }
            }

            output.push(first);
            rest = &rest[first.len_utf8()..];
        }

        output
    }

    fn normalize(&self, text: &str, shortcuts: bool, unicode: bool) -> String {
        let text = match shortcuts {
            true => Self::translate_shortcuts(text),
            false => text.to_owned(),
        };

        match unicode {
            true => Self::translate_unicode(&text),
            false => text,
        }
    }

    /// Replaces emoji codes in an already-escaped title with images.
    pub fn unescape(&self, title: &str, paths: &Paths) -> String {
        let title = self.normalize(title, self.shortcuts, self.inline_translation);

        let Some(segments) = self.expand(&title, paths) else {
            return title;
        };

        segments
            .into_iter()
            .map(|segment| match segment {
                Segment::Text(text) | Segment::Html(text) => text,
            })
            .collect()
    }

    /// Replaces shortcuts and raw Unicode emoji with `:name:` codes.
    pub fn escape(&self, title: &str, shortcuts: bool) -> String {
        self.normalize(title, shortcuts, self.inline_translation)
    }

    fn expand(&self, text: &str, paths: &Paths) -> Option<Vec<Segment>> {
        regexp_expand(text, &EMOJI_REGEX, |caps, _| {
            self.image(&caps[1], paths).map(Segment::Html)
        })
    }
}

impl InlineRule for EmojiRule {
    fn name(&self) -> &'static str {
        "emoji"
    }

    fn applies_in_link(&self) -> bool {
        true
    }

    fn apply(&self, text: &str, cx: &RuleContext) -> Option<Vec<Segment>> {
        let normalized = self.normalize(text, self.shortcuts, self.inline_translation);
        if !normalized.contains(':') {
            return None;
        }

        self.expand(&normalized, &cx.bundle.paths)
    }
}
