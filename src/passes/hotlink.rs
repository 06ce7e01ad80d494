use lol_html::html_content::Element;
use lol_html::{element, Settings};
use regex::Regex;

use super::{Document, PassConfig};
use crate::common::{SiteSettings, BLOCKED_HOTLINKED_SRCSET_ATTR, BLOCKED_HOTLINKED_SRC_ATTR};
use crate::prelude::*;

/// Builds the pattern a media `src` must match to be embedded.
///
/// Each prefix that doesn't end in `/` must be followed by `/` or the end of
/// the URL, so `https://example.com` doesn't admit `https://example.com.evil.net`.
pub(super) fn allowed_src_pattern(settings: &SiteSettings) -> Option<Regex> {
    let prefixes = std::iter::once(settings.base_path.as_str())
        .chain(std::iter::once(settings.base_url.as_str()))
        .chain(settings.s3_cdn_url.as_deref())
        .chain(settings.cdn_url.as_deref())
        .chain(settings.external_emoji_url.as_deref().filter(|url| !url.is_empty()))
        .chain(settings.block_hotlinked_media_exceptions.iter().map(String::as_str))
        .map(|prefix| {
            let escaped = regex::escape(prefix);
            match prefix {
                // Site served at the root: local paths, but not protocol-relative URLs.
                "" => r"/(?:[^/]|\z)".to_owned(),
                _ if prefix.ends_with('/') => escaped,
                _ => format!(r"{escaped}(?:/|\z)"),
            }
        })
        .collect::<Vec<_>>()
        .join("|");

    match Regex::new(&format!(r"\A(?:data:|{prefixes})")) {
        Ok(regex) => Some(regex),
        Err(e) => {
            // Failing open here would embed everything, so block everything instead.
            error!("Could not build the hotlink allowlist ({e}); all external media will be blocked.");
            Regex::new(r"\A(?:data:)").ok()
        }
    }
}

fn srcset_allowed(srcset: &str, allowed: &Regex) -> bool {
    srcset
        .split(',')
        .filter_map(|candidate| candidate.split_whitespace().next())
        .all(|url| allowed.is_match(url))
}

fn block(el: &mut Element, allowed: &Regex) -> lol_html::HandlerResult {
    if let Some(src) = el.get_attribute("src") {
        if !allowed.is_match(src.trim()) {
            el.remove_attribute("src");
            el.set_attribute(BLOCKED_HOTLINKED_SRC_ATTR, &src)?;
        }
    }

    if let Some(srcset) = el.get_attribute("srcset") {
        if !srcset_allowed(&srcset, allowed) {
            el.remove_attribute("srcset");
            el.set_attribute(BLOCKED_HOTLINKED_SRCSET_ATTR, &srcset)?;
        }
    }

    Ok(())
}

/// Moves disallowed media URLs into `data-blocked-hotlinked-*` attributes so they never load.
pub fn block_hotlinked_media(doc: &mut Document, config: &PassConfig) {
    let Some(allowed) = &config.allowed_media else {
        return;
    };

    doc.rewrite(Settings {
        element_content_handlers: vec![
            element!("img[src], img[srcset], source[src], source[srcset], track[src]", |el| {
                block(el, allowed)
            }),
        ],
        ..Settings::default()
    });
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{config, run};
    use super::*;

    fn settings() -> SiteSettings {
        let mut settings = SiteSettings::default();
        settings.base_url = "https://forum.example.com".into();
        settings.cdn_url = Some("https://cdn.example.com".into());
        settings.block_hotlinked_media = true;
        settings.block_hotlinked_media_exceptions = vec!["https://img.partner.org/".into()];
        settings
    }

    #[test]
    fn pattern() {
        let allowed = allowed_src_pattern(&settings()).unwrap();

        assert!(allowed.is_match("/uploads/a.png"));
        assert!(allowed.is_match("https://forum.example.com/uploads/a.png"));
        assert!(allowed.is_match("https://cdn.example.com"));
        assert!(allowed.is_match("https://img.partner.org/x.png"));
        assert!(allowed.is_match("data:image/png;base64,AA"));
        assert!(!allowed.is_match("https://forum.example.com.evil.net/a.png"));
        assert!(!allowed.is_match("https://else.org/a.png"));
        assert!(!allowed.is_match("//else.org/a.png"));
    }

    #[test]
    fn blocks_src() {
        let config = config(&settings());

        assert_eq!(
            run(block_hotlinked_media, "<img src=\"https://else.org/a.png\" alt=\"a\">", &config),
            "<img alt=\"a\" data-blocked-hotlinked-src=\"https://else.org/a.png\">"
        );
        assert_eq!(
            run(block_hotlinked_media, "<img src=\"/uploads/a.png\">", &config),
            "<img src=\"/uploads/a.png\">"
        );
    }

    #[test]
    fn blocks_whole_srcset() {
        let config = config(&settings());
        let html = "<picture><source srcset=\"/a.png 1x, https://else.org/b.png 2x\"></picture>";

        assert_eq!(
            run(block_hotlinked_media, html, &config),
            "<picture><source data-blocked-hotlinked-srcset=\"/a.png 1x, https://else.org/b.png 2x\"></picture>"
        );
    }

    #[test]
    fn off_by_default() {
        let config = config(&SiteSettings::default());
        let html = "<img src=\"https://else.org/a.png\">";

        assert_eq!(run(block_hotlinked_media, html, &config), html);
    }
}
