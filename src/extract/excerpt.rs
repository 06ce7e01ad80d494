use std::cell::RefCell;

use html_escape::decode_html_entities;
use lol_html::{doc_text, element, Settings};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::cook::Hooks;
use crate::passes::{rewrite, strip_image_wrapping, strip_oneboxed_media, Document};
use crate::prelude::*;

const ELLIPSIS: &str = "&hellip;";

static ENTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^&(?:#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z][a-zA-Z0-9]{1,31});").unwrap()
});

/// Elements that start a new line of text.
const BLOCKS: &[&str] = &[
    "p", "div", "br", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote", "pre",
    "table", "tr", "td", "th", "hr", "dl", "dt", "dd", "details", "summary", "figure",
    "figcaption", "section",
];

#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct ExcerptOptions {
    /// Keep emoji `<img>` tags. Otherwise each emoji is replaced by its `:name:` alt text.
    pub keep_emoji_images: bool,
    /// Render other images as `![alt](src)`. Otherwise they are dropped.
    pub markdown_images: bool,
    /// Emit decoded text instead of HTML.
    pub decode_entities: bool,
}

/// Accumulates visible text up to a character budget.
struct Builder<'o> {
    output: String,
    length: usize,
    max_length: usize,
    truncated: bool,
    space: bool,
    text: String,
    options: &'o ExcerptOptions,
}

impl<'o> Builder<'o> {
    fn new(max_length: usize, options: &'o ExcerptOptions) -> Self {
        Self {
            output: String::new(),
            length: 0,
            max_length,
            truncated: false,
            space: false,
            text: String::new(),
            options,
        }
    }

    fn separate(&mut self) {
        if self.length > 0 {
            self.space = true;
        }
    }

    /// Appends something `width` characters wide, or marks the excerpt as truncated if it doesn't fit.
    fn push(&mut self, visible: &str, width: usize) {
        if self.truncated {
            return;
        }

        if self.space {
            if self.length + 1 > self.max_length {
                self.truncated = true;
                return;
            }
            self.output.push(' ');
            self.length += 1;
            self.space = false;
        }

        if self.length + width > self.max_length {
            self.truncated = true;
            return;
        }

        self.output.push_str(visible);
        self.length += width;
    }

    /// Appends raw HTML text. Whitespace runs collapse; each entity is one character.
    fn push_text(&mut self, raw: &str) {
        let mut rest = raw;

        while let Some(c) = rest.chars().next() {
            if c.is_whitespace() {
                self.separate();
                rest = &rest[c.len_utf8()..];
                continue;
            }

            let token = match c {
                '&' => ENTITY.find(rest).map_or("&", |m| m.as_str()),
                _ => &rest[..c.len_utf8()],
            };

            match self.options.decode_entities && c == '&' {
                true => {
                    let decoded = decode_html_entities(token).into_owned();
                    self.push(&decoded, 1);
                }
                false => self.push(token, 1),
            }

            rest = &rest[token.len()..];
        }
    }

    fn flush_text(&mut self) {
        let text = std::mem::take(&mut self.text);
        self.push_text(&text);
    }

    /// Attribute values arrive as raw markup, so they are decoded and re-escaped before reuse.
    fn image(&mut self, class: &str, alt: &str, src: &str, title: &str) {
        let is_emoji = class.split_whitespace().any(|c| c == "emoji");
        let alt = decode_html_entities(alt);

        match (is_emoji, self.options) {
            (true, ExcerptOptions { keep_emoji_images: true, .. }) => {
                let tag = format!(
                    "<img src=\"{}\" title=\"{}\" class=\"{}\" alt=\"{}\">",
                    escape_attr(&decode_html_entities(src)),
                    escape_attr(&decode_html_entities(title)),
                    escape_attr(&decode_html_entities(class)),
                    escape_attr(&alt),
                );
                self.push(&tag, alt.chars().count().max(1));
            }
            (true, _) => self.push_text(&escape_text(&alt)),
            (false, ExcerptOptions { markdown_images: true, .. }) => {
                let src = decode_html_entities(src);
                let width = alt.chars().count() + src.chars().count() + 5;
                let markdown = format!("![{}]({})", escape_text(&alt), escape_text(&src));
                self.push(&markdown, width);
            }
            (false, _) => {}
        }
    }

    fn finish(self) -> String {
        let mut excerpt = self.output.trim_end().to_owned();
        if self.truncated {
            excerpt.push_str(ELLIPSIS);
        }
        excerpt
    }
}

/// Removes content that never shows up in an excerpt: quotes, oneboxes, scripts and styles.
fn strip_hidden(doc: &mut Document) {
    doc.rewrite(Settings {
        element_content_handlers: vec![element!("aside, script, style, template", |el| {
            el.remove();
            Ok(())
        })],
        ..Settings::default()
    });
}

fn truncate(html: &str, max_length: usize, options: &ExcerptOptions) -> String {
    let builder = RefCell::new(Builder::new(max_length, options));

    let result = rewrite(
        html,
        Settings {
            element_content_handlers: vec![element!("*", |el| {
                let tag = el.tag_name();
                let mut builder = builder.borrow_mut();

                if BLOCKS.contains(&tag.as_str()) {
                    builder.separate();
                } else if tag == "img" {
                    let attr = |name: &str| el.get_attribute(name).unwrap_or_default();
                    builder.image(&attr("class"), &attr("alt"), &attr("src"), &attr("title"));
                }
                Ok(())
            })],
            document_content_handlers: vec![doc_text!(|chunk| {
                let mut builder = builder.borrow_mut();
                builder.text.push_str(chunk.as_str());
                if chunk.last_in_text_node() {
                    builder.flush_text();
                }
                Ok(())
            })],
            ..Settings::default()
        },
    );

    if let Err(e) = result {
        warn!("Could not excerpt document: {e}");
        return String::new();
    }

    builder.into_inner().finish()
}

/// Truncates the visible text of `html` to `max_length` characters.
///
/// The `reduce_excerpt` hooks run first, then image metadata, oneboxed media
/// and quotes are stripped. Appends `&hellip;` when text was cut.
pub fn excerpt(html: &str, max_length: usize, options: &ExcerptOptions, hooks: &Hooks) -> String {
    let mut doc = Document::parse(html);

    hooks.reduce_excerpt(&mut doc, options);
    strip_image_wrapping(&mut doc);
    strip_oneboxed_media(&mut doc);
    strip_hidden(&mut doc);

    truncate(doc.as_str(), max_length, options)
}
