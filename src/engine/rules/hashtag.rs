use once_cell::sync::Lazy;
use regex::Regex;

use super::{glued, regexp_expand, InlineRule, RuleContext, Segment};
use crate::common::{escape_attr, escape_text, HashtagItem};

static HASHTAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"#([\w\-]+(?:::?[\w\-]+)?)").unwrap());

/// Resolves `#slug`, `#slug::type` and `#parent:child` through the host.
/// Hashtags the host doesn't know stay as text.
pub struct HashtagRule;

impl HashtagRule {
    fn lookup(reference: &str, cx: &RuleContext) -> Option<HashtagItem> {
        if let Some((slug, kind)) = reference.split_once("::") {
            return cx.host.hashtag_lookup(slug, &[kind.to_owned()]);
        }

        if let Some((parent, child)) = reference.split_once(':') {
            return cx.host.category_hashtag_lookup(parent, child);
        }

        cx.host
            .hashtag_lookup(reference, &cx.bundle.hashtag_types_in_priority_order)
    }

    fn render(item: &HashtagItem, cx: &RuleContext) -> String {
        let href = cx.bundle.paths.get_url(&item.relative_url);

        let id = match item.id {
            Some(id) => format!(" data-id=\"{id}\""),
            None => String::new(),
        };

        let icon = match &item.icon {
            Some(icon) if cx.bundle.hashtag_icons.contains(icon) => {
                format!(" data-icon=\"{}\"", escape_attr(icon))
            }
            _ => String::new(),
        };

        format!(
            "<a class=\"hashtag-cooked\" href=\"{}\" data-type=\"{}\" data-slug=\"{}\"{id}>\
             <span class=\"hashtag-icon-placeholder\"{icon}></span><span>{}</span></a>",
            escape_attr(&href),
            escape_attr(&item.kind),
            escape_attr(&item.slug),
            escape_text(&item.text),
        )
    }
}

impl InlineRule for HashtagRule {
    fn name(&self) -> &'static str {
        "hashtags"
    }

    fn apply(&self, text: &str, cx: &RuleContext) -> Option<Vec<Segment>> {
        if !text.contains('#') {
            return None;
        }

        regexp_expand(text, &HASHTAG, |caps, before| {
            if glued(before, &['&', '/', '#']) {
                return None;
            }

            let item = Self::lookup(&caps[1], cx)?;
            Some(Segment::Html(Self::render(&item, cx)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Directory, StaticHost};
    use crate::engine::test_support::with_host;

    fn host() -> StaticHost {
        let item = |slug: &str, kind: &str, parent: Option<&str>| HashtagItem {
            slug: slug.into(),
            kind: kind.into(),
            text: slug.to_uppercase(),
            relative_url: format!("/{kind}/{slug}"),
            id: Some(7),
            icon: Some("folder".into()),
            parent_slug: parent.map(Into::into),
        };

        StaticHost::new(Directory {
            hashtags: vec![
                item("dev", "tag", None),
                item("dev", "category", None),
                item("rust", "category", Some("lang")),
            ],
            ..Directory::default()
        })
    }

    #[test]
    fn priority_order() {
        with_host(host(), |cx| {
            let out = HashtagRule.apply("see #dev now", cx).unwrap();

            assert_eq!(
                out[1],
                Segment::Html(
                    "<a class=\"hashtag-cooked\" href=\"/category/dev\" data-type=\"category\" data-slug=\"dev\" data-id=\"7\">\
                     <span class=\"hashtag-icon-placeholder\" data-icon=\"folder\"></span><span>DEV</span></a>"
                        .into()
                )
            );
        });
    }

    #[test]
    fn explicit_type_and_category_path() {
        with_host(host(), |cx| {
            let out = HashtagRule.apply("#dev::tag", cx).unwrap();
            assert!(matches!(&out[0], Segment::Html(html) if html.contains("data-type=\"tag\"")));

            let out = HashtagRule.apply("#lang:rust", cx).unwrap();
            assert!(matches!(&out[0], Segment::Html(html) if html.contains("href=\"/category/rust\"")));
        });
    }

    #[test]
    fn unknown_and_glued() {
        with_host(host(), |cx| {
            assert_eq!(HashtagRule.apply("#nothing", cx), None);
            assert_eq!(HashtagRule.apply("a/#dev &#dev", cx), None);
        });
    }
}
