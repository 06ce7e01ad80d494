//! Element and attribute allowlist applied to every rendered fragment.

use lol_html::html_content::Element;
use lol_html::{comments, element, Settings};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::passes::rewrite;
use crate::prelude::*;

/// Removed along with everything inside them.
const DROPPED: &[&str] = &[
    "script", "style", "iframe", "object", "embed", "form", "textarea", "select", "button",
    "frame", "frameset", "noscript", "template", "svg", "math", "title", "head", "meta", "link",
    "base", "applet", "xmp", "noembed", "noframes", "plaintext",
];

const ALLOWED: &[&str] = &[
    "a", "abbr", "aside", "audio", "b", "bdi", "bdo", "blockquote", "br", "caption", "cite",
    "code", "col", "colgroup", "dd", "del", "details", "div", "dl", "dt", "em", "figcaption",
    "figure", "h1", "h2", "h3", "h4", "h5", "h6", "hr", "i", "img", "input", "ins", "kbd",
    "li", "mark", "ol", "p", "picture", "pre", "q", "rp", "rt", "ruby", "s", "samp", "small",
    "source", "span", "strike", "strong", "sub", "summary", "sup", "table", "tbody", "td",
    "tfoot", "th", "thead", "tr", "track", "tt", "u", "ul", "var", "video", "wbr",
];

const GLOBAL_ATTRIBUTES: &[&str] = &["class", "title", "dir", "lang"];

/// Attributes that hold a URL and need their scheme checked.
const URL_ATTRIBUTES: &[&str] = &["href", "src", "srcset", "cite", "poster"];

static TEXT_ALIGN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^text-align:\s*(left|right|center);?$").unwrap());

fn tag_attributes(tag: &str) -> &'static [&'static str] {
    match tag {
        "a" => &["href", "name", "target", "rel"],
        "img" => &["src", "srcset", "alt", "width", "height", "loading"],
        "ol" => &["start", "reversed", "type"],
        "li" => &["value"],
        "td" | "th" => &["colspan", "rowspan", "align"],
        "col" | "colgroup" => &["span"],
        "input" => &["type", "checked", "disabled"],
        "source" => &["src", "srcset", "type", "media", "sizes"],
        "track" => &["src", "kind", "srclang", "label", "default"],
        "audio" | "video" => &["src", "controls", "preload", "poster", "width", "height", "loop", "muted"],
        "blockquote" | "q" | "del" | "ins" => &["cite"],
        "details" => &["open"],
        _ => &[],
    }
}

fn attribute_allowed(tag: &str, name: &str, value: &str) -> bool {
    if name.starts_with("on") {
        return false;
    }

    // Table alignment is the one inline style Markdown produces.
    if name == "style" {
        return matches!(tag, "td" | "th") && TEXT_ALIGN.is_match(value.trim());
    }

    let listed = GLOBAL_ATTRIBUTES.contains(&name)
        || name.starts_with("data-")
        || tag_attributes(tag).contains(&name);

    if !listed {
        return false;
    }

    if !URL_ATTRIBUTES.contains(&name) {
        return true;
    }

    match name {
        "srcset" => value
            .split(',')
            .filter_map(|candidate| candidate.split_whitespace().next())
            .all(|url| url_allowed(url, tag == "img" || tag == "source")),
        "src" => url_allowed(value, tag == "img"),
        _ => url_allowed(value, false),
    }
}

/// Accepts relative URLs and `http`, `https` and `mailto`.
/// `data:image/` is only accepted where an image is expected.
pub fn url_allowed(url: &str, image: bool) -> bool {
    // Browsers ignore embedded whitespace and control characters when reading the scheme.
    let cleaned: String = url
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect();

    let scheme_end = cleaned.find(|c| matches!(c, ':' | '/' | '?' | '#'));
    let Some(end) = scheme_end.filter(|&i| cleaned[i..].starts_with(':')) else {
        return true;
    };

    match cleaned[..end].to_ascii_lowercase().as_str() {
        "http" | "https" | "mailto" => true,
        "data" => image && cleaned[end + 1..].to_ascii_lowercase().starts_with("image/"),
        _ => false,
    }
}

fn filter_attributes(el: &mut Element) {
    let tag = el.tag_name();

    if tag == "input" && !el.get_attribute("type").is_some_and(|t| t.eq_ignore_ascii_case("checkbox")) {
        el.remove();
        return;
    }

    let rejected: Vec<String> = el
        .attributes()
        .iter()
        .filter(|attr| !attribute_allowed(&tag, &attr.name(), &attr.value()))
        .map(|attr| attr.name())
        .collect();

    for name in rejected {
        trace!("Sanitizer dropped attribute {name:?} from <{tag}>");
        el.remove_attribute(&name);
    }
}

/// Strips everything outside the allowlist.
///
/// If the fragment can't be rewritten at all, it is escaped wholesale.
pub fn sanitize(html: &str) -> String {
    let settings = Settings {
        element_content_handlers: vec![
            element!("*", |el| {
                let tag = el.tag_name();

                if DROPPED.contains(&tag.as_str()) {
                    el.remove();
                } else if !ALLOWED.contains(&tag.as_str()) {
                    el.remove_and_keep_content();
                } else {
                    filter_attributes(el);
                }

                Ok(())
            }),
            comments!("*", |comment| {
                comment.remove();
                Ok(())
            }),
        ],
        ..Settings::default()
    };

    match rewrite(html, settings) {
        Ok(html) => html,
        Err(e) => {
            warn!("Sanitizer could not rewrite fragment, escaping it instead: {e}");
            crate::common::escape_text(html).into_owned()
        }
    }
}
