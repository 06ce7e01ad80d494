use std::cell::{Cell, RefCell};

use lol_html::html_content::Element;
use lol_html::{element, Settings};
use serde::Serialize;

use crate::passes::rewrite;
use crate::prelude::*;

/// A link found in cooked HTML.
#[derive(Serialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct DetectedLink {
    pub url: String,
    /// Reconstructed from a `[quote]` block rather than read off an anchor.
    pub is_quote: bool,
}

impl DetectedLink {
    fn new(url: impl Into<String>, is_quote: bool) -> Self {
        Self {
            url: url.into(),
            is_quote,
        }
    }
}

/// Lazily extracts the links of a cooked fragment.
///
/// Anchors inside quotes, oneboxes and elided blocks are skipped; each onebox
/// and quote instead yields one link reconstructed from its metadata. Every call
/// to [`LinkExtractor::iter`] starts over from the top.
#[derive(Debug, Clone)]
pub struct LinkExtractor {
    html: String,
}

pub fn extract_links(html: &str) -> LinkExtractor {
    LinkExtractor {
        html: html.to_owned(),
    }
}

impl LinkExtractor {
    pub fn iter(&self) -> Links<'_> {
        Links {
            html: &self.html,
            stage: Some(Stage::Oneboxes),
            pending: Vec::new().into_iter(),
        }
    }
}

impl<'a> IntoIterator for &'a LinkExtractor {
    type Item = DetectedLink;
    type IntoIter = Links<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Oneboxes,
    Anchors,
    Quotes,
    YouTube,
}

impl Stage {
    fn next(self) -> Option<Self> {
        match self {
            Self::Oneboxes => Some(Self::Anchors),
            Self::Anchors => Some(Self::Quotes),
            Self::Quotes => Some(Self::YouTube),
            Self::YouTube => None,
        }
    }

    fn scan(self, html: &str) -> Vec<DetectedLink> {
        let result = match self {
            Self::Oneboxes => scan_attribute(html, "aside.onebox[data-onebox-src]", |el| {
                let src = el.get_attribute("data-onebox-src")?;
                Some(DetectedLink::new(decode(&src), false))
            }),
            Self::Anchors => scan_anchors(html),
            Self::Quotes => scan_attribute(html, "aside.quote[data-topic]", |el| {
                let topic = el.get_attribute("data-topic").filter(|t| !t.is_empty())?;
                let url = match el.get_attribute("data-post").filter(|p| !p.is_empty()) {
                    Some(post) => format!("/t/{topic}/{post}"),
                    None => format!("/t/{topic}"),
                };
                Some(DetectedLink::new(url, true))
            }),
            Self::YouTube => scan_attribute(html, "div[data-youtube-id]", |el| {
                let id = el.get_attribute("data-youtube-id").filter(|id| !id.is_empty())?;
                Some(DetectedLink::new(format!("https://www.youtube.com/watch?v={}", decode(&id)), false))
            }),
        };

        result.unwrap_or_else(|e| {
            warn!("Link extraction ({self:?}) could not read the document: {e}");
            Vec::new()
        })
    }
}

/// Iterator over the links of a [`LinkExtractor`], one stage at a time.
pub struct Links<'a> {
    html: &'a str,
    stage: Option<Stage>,
    pending: std::vec::IntoIter<DetectedLink>,
}

impl Iterator for Links<'_> {
    type Item = DetectedLink;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(link) = self.pending.next() {
                return Some(link);
            }

            let stage = self.stage?;
            self.pending = stage.scan(self.html).into_iter();
            self.stage = stage.next();
        }
    }
}

fn decode(value: &str) -> String {
    html_escape::decode_html_entities(value).into_owned()
}

fn scan_attribute(
    html: &str,
    selector: &str,
    mut read: impl FnMut(&Element) -> Option<DetectedLink>,
) -> Result<Vec<DetectedLink>, lol_html::errors::RewritingError> {
    let links = RefCell::new(Vec::new());

    rewrite(
        html,
        Settings {
            element_content_handlers: vec![element!(selector, |el| {
                if let Some(link) = read(el) {
                    links.borrow_mut().push(link);
                }
                Ok(())
            })],
            ..Settings::default()
        },
    )?;

    Ok(links.into_inner())
}

fn scan_anchors(html: &str) -> Result<Vec<DetectedLink>, lol_html::errors::RewritingError> {
    let links = RefCell::new(Vec::<Option<DetectedLink>>::new());
    // Index of the innermost open `a.onebox`, whose link is dropped if it wraps an image.
    let onebox = Cell::new(None::<usize>);

    rewrite(
        html,
        Settings {
            element_content_handlers: vec![
                element!("aside.quote a, aside.onebox a, .elided a", |el| {
                    el.remove();
                    Ok(())
                }),
                element!("a", |el| {
                    if el.removed() {
                        onebox.set(None);
                        return Ok(());
                    }

                    let mut links = links.borrow_mut();
                    let is_onebox = el
                        .get_attribute("class")
                        .is_some_and(|class| class.split_whitespace().any(|c| c == "onebox"));
                    onebox.set(is_onebox.then_some(links.len()));

                    let link = el
                        .get_attribute("href")
                        .filter(|href| !href.is_empty() && !href.starts_with('#'))
                        .map(|href| DetectedLink::new(decode(&href), false));
                    links.push(link);
                    Ok(())
                }),
                element!("a.onebox > img", |_| {
                    if let Some(index) = onebox.take() {
                        links.borrow_mut()[index] = None;
                    }
                    Ok(())
                }),
            ],
            ..Settings::default()
        },
    )?;

    Ok(links.into_inner().into_iter().flatten().collect())
}
