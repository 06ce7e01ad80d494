//! Markdown rendering with the inline rules spliced into the event stream.

use std::collections::HashMap;

use itertools::Itertools;
use pulldown_cmark::{html, CowStr, Event, Parser, Tag};

use super::rules::quote::{self, Quote, PLACEHOLDER};
use super::rules::{apply_rules, InlineRule, LinkifyRule, RuleContext, Segment};
use crate::error::EngineError;

const UPLOAD_SCHEME: &str = "upload://";

/// Renders Markdown through the core rules.
pub struct Markdown<'a> {
    rules: &'a [Box<dyn InlineRule>],
    cx: &'a RuleContext<'a>,
}

impl<'a> Markdown<'a> {
    pub fn new(rules: &'a [Box<dyn InlineRule>], cx: &'a RuleContext<'a>) -> Self {
        Self { rules, cx }
    }

    /// Renders `text`, appending the HTML to `output`.
    ///
    /// `[quote]` blocks are cut out first, rendered on their own, and spliced
    /// back in where their placeholders ended up.
    pub fn render(&self, text: &str, output: &mut String) -> Result<(), EngineError> {
        let text = text.replace(PLACEHOLDER, "");

        let (text, quotes) = match self.cx.bundle.enabled("quotes") {
            true => quote::extract(&text, &self.cx.budget)?,
            false => (text, Vec::new()),
        };

        self.render_with_quotes(&text, &quotes, output)
    }

    fn render_with_quotes(&self, text: &str, quotes: &[Quote], output: &mut String) -> Result<(), EngineError> {
        let mut rendered = Vec::with_capacity(quotes.len());
        for q in quotes {
            self.cx.budget.check()?;
            let mut inner = String::new();
            self.render_with_quotes(&q.body, &q.nested, &mut inner)?;
            rendered.push(quote::render(&q.attributes, &inner, self.cx));
        }

        let events = self.events(text)?;
        let start = output.len();
        html::push_html(output, events.into_iter());

        if !rendered.is_empty() {
            let substituted = substitute(&output[start..], &rendered);
            output.truncate(start);
            output.push_str(&substituted);
        }

        Ok(())
    }

    fn events<'t>(&self, text: &'t str) -> Result<Vec<Event<'t>>, EngineError> {
        let parsed = merge_text(Parser::new_ext(text, self.cx.bundle.extensions));
        let uploads = self.resolve_uploads(&parsed);
        let onebox = self.cx.bundle.enabled("onebox");

        let mut events = Vec::with_capacity(parsed.len());
        let mut code = 0usize;
        let mut links = 0usize;
        let mut images = 0usize;
        let mut rest = parsed.as_slice();

        while let Some((event, tail)) = rest.split_first() {
            self.cx.budget.check()?;
            rest = tail;

            if let (Event::Start(Tag::Paragraph), [Event::Text(url), Event::End(Tag::Paragraph), ..]) = (event, tail) {
                if onebox && links == 0 && LinkifyRule::is_bare_url(url) {
                    let anchor = LinkifyRule::anchor(url.trim(), " class=\"onebox\" target=\"_blank\"");
                    events.push(Event::Html(format!("<p>{anchor}</p>\n").into()));
                    rest = &tail[2..];
                    continue;
                }
            }

            match event {
                Event::Start(Tag::CodeBlock(_)) => code += 1,
                Event::End(Tag::CodeBlock(_)) => code = code.saturating_sub(1),
                Event::Start(Tag::Link(..)) => links += 1,
                Event::End(Tag::Link(..)) => links = links.saturating_sub(1),
                Event::Start(Tag::Image(..)) => images += 1,
                Event::End(Tag::Image(..)) => images = images.saturating_sub(1),
                _ => {}
            }

            match event {
                Event::Start(Tag::Link(kind, dest, title)) => {
                    let dest = resolve(dest, &uploads);
                    events.push(Event::Start(Tag::Link(*kind, dest, title.clone())));
                }
                Event::Start(Tag::Image(kind, dest, title)) => {
                    let dest = resolve(dest, &uploads);
                    events.push(Event::Start(Tag::Image(*kind, dest, title.clone())));
                }
                Event::Text(text) if code == 0 && images == 0 && !text.contains(PLACEHOLDER) => {
                    let segments = apply_rules(text, self.rules, self.cx, links > 0);
                    events.extend(segments.into_iter().map(|segment| match segment {
                        Segment::Text(text) => Event::Text(text.into()),
                        Segment::Html(html) => Event::Html(html.into()),
                    }));
                }
                other => events.push(other.clone()),
            }
        }

        Ok(events)
    }

    /// Looks up every `upload://` reference in one host call.
    fn resolve_uploads(&self, events: &[Event]) -> HashMap<String, String> {
        let identifiers: Vec<String> = events
            .iter()
            .filter_map(|event| match event {
                Event::Start(Tag::Link(_, dest, _) | Tag::Image(_, dest, _)) => {
                    let dest: &str = dest;
                    dest.starts_with(UPLOAD_SCHEME).then(|| dest.to_owned())
                }
                _ => None,
            })
            .unique()
            .collect();

        if identifiers.is_empty() {
            return HashMap::new();
        }

        self.cx.host.lookup_upload_urls(&identifiers)
    }
}

fn resolve<'t>(dest: &CowStr<'t>, uploads: &HashMap<String, String>) -> CowStr<'t> {
    let key: &str = dest;
    match uploads.get(key) {
        Some(url) => CowStr::from(url.clone()),
        None => dest.clone(),
    }
}

/// pulldown-cmark splits text runs on potential syntax characters; the rules need them whole.
fn merge_text<'t>(parser: impl Iterator<Item = Event<'t>>) -> Vec<Event<'t>> {
    let mut events: Vec<Event<'t>> = Vec::new();

    for event in parser {
        if let Event::Text(text) = &event {
            if let Some(Event::Text(previous)) = events.last_mut() {
                let mut merged = String::from(&**previous);
                merged.push_str(text);
                *previous = CowStr::from(merged);
                continue;
            }
        }
        events.push(event);
    }

    events
}

/// Swaps each quote placeholder for its rendered quote in one pass,
/// dropping the paragraph pulldown-cmark wraps around a lone placeholder.
fn substitute(html: &str, quotes: &[String]) -> String {
    const MARK: usize = PLACEHOLDER.len_utf8();

    let mut output = String::with_capacity(html.len() + quotes.iter().map(String::len).sum::<usize>());
    let mut rest = html;

    while let Some(open) = rest.find(PLACEHOLDER) {
        let after = &rest[open + MARK..];
        let Some(close) = after.find(PLACEHOLDER) else {
            break;
        };

        let Some(rendered) = after[..close].parse::<usize>().ok().and_then(|i| quotes.get(i)) else {
            output.push_str(&rest[..open + MARK]);
            rest = after;
            continue;
        };

        let before = &rest[..open];
        let tail = &after[close + MARK..];

        match (before.strip_suffix("<p>"), tail.strip_prefix("</p>\n")) {
            (Some(before), Some(tail)) => {
                output.push_str(before);
                output.push_str(rendered);
                output.push('\n');
                rest = tail;
            }
            _ => {
                output.push_str(before);
                output.push_str(rendered);
                rest = tail;
            }
        }
    }

    output.push_str(rest);
    output
}
