//! Post-processing passes over cooked HTML.
//!
//! Every pass is a plain function over a [`Document`]. Passes are idempotent
//! and never fail: if `lol_html` can't rewrite a fragment, the fragment is
//! replaced by its escaped text.

mod bidi;
mod email;
mod hotlink;
mod mention;
mod rel;
mod script;

pub use bidi::escape_bidi;
pub use email::{
    convert_vimeo_iframes, make_all_links_absolute, strip_image_wrapping, strip_links,
    strip_oneboxed_media, strip_secure_uploads, SecureUploadNotice,
};
pub use hotlink::block_hotlinked_media;
pub use mention::resolve_mentions;
pub use rel::add_rel_attributes;
pub use script::strip_scripts;

use std::sync::Arc;

use lol_html::errors::RewritingError;
use lol_html::{HtmlRewriter, Settings};
use regex::Regex;
use url::Url;

use crate::common::{escape_text, Host, SiteSettings};
use crate::engine::options::CookOptions;
use crate::prelude::*;

/// A pass over a cooked fragment.
pub type Pass = fn(&mut Document, &PassConfig);

/// The cook passes, in the order they run.
pub const COOK_PASSES: &[(&str, Pass)] = &[
    ("rel", add_rel_attributes),
    ("bidi", escape_bidi),
    ("hotlink", block_hotlinked_media),
    ("mentions", resolve_mentions),
    ("script", strip_scripts),
];

/// Runs `html` through a streaming rewriter configured with `settings`.
pub(crate) fn rewrite(html: &str, settings: Settings<'_, '_>) -> Result<String, RewritingError> {
    let mut output = Vec::with_capacity(html.len());
    let mut rewriter = HtmlRewriter::new(settings, |c: &[u8]| output.extend_from_slice(c));
    rewriter.write(html.as_bytes())?;
    rewriter.end()?;

    Ok(String::from_utf8_lossy(&output).into_owned())
}

/// An owned HTML fragment, rewritten in place by the passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    html: String,
}

impl Document {
    pub fn parse(html: impl Into<String>) -> Self {
        Self { html: html.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.html
    }

    pub fn into_string(self) -> String {
        self.html
    }

    /// Applies a rewrite. On failure the document degrades to escaped text.
    pub fn rewrite(&mut self, settings: Settings<'_, '_>) {
        match rewrite(&self.html, settings) {
            Ok(html) => self.html = html,
            Err(e) => {
                warn!("Could not rewrite document, escaping it instead: {e}");
                self.html = escape_text(&self.html).into_owned();
            }
        }
    }
}

/// Everything the passes need, resolved once per call.
pub struct PassConfig {
    pub add_nofollow: bool,
    /// The site's base URL; `None` if it doesn't parse.
    pub site: Option<Url>,
    pub nofollow_exclusions: Vec<String>,
    /// Media `src` values that may be embedded. `None` when hotlinking isn't blocked.
    pub allowed_media: Option<Regex>,
    /// Tooltip for escaped bidi characters.
    pub bidi_title: String,
    pub enable_mentions: bool,
    pub base_path: String,
    pub user_id: Option<u64>,
    pub host: Arc<dyn Host>,
}

impl PassConfig {
    pub fn new(
        settings: &SiteSettings,
        options: &CookOptions,
        host: Arc<dyn Host>,
        bidi_title: String,
    ) -> Self {
        let site = match Url::parse(&settings.base_url) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("Site base URL {:?} does not parse ({e}); every link will be treated as external.", settings.base_url);
                None
            }
        };

        let allowed_media = match settings.block_hotlinked_media {
            true => hotlink::allowed_src_pattern(settings),
            false => None,
        };

        Self {
            add_nofollow: settings.add_rel_nofollow_to_user_content && !options.omit_nofollow,
            site,
            nofollow_exclusions: settings
                .exclude_rel_nofollow_domains
                .iter()
                .map(|domain| domain.trim().to_ascii_lowercase())
                .filter(|domain| !domain.is_empty())
                .collect(),
            allowed_media,
            bidi_title,
            enable_mentions: settings.enable_mentions,
            base_path: settings.base_path.trim_end_matches('/').to_owned(),
            user_id: options.user_id,
            host,
        }
    }
}

/// Runs the cook passes in order.
pub fn post_process(doc: &mut Document, config: &PassConfig) {
    for (name, pass) in COOK_PASSES {
        trace!("Running {name} pass");
        pass(doc, config);
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use proptest::prelude::*;

    fn settings() -> SiteSettings {
        let mut settings = SiteSettings::default();
        settings.base_url = "https://forum.example.com".into();
        settings.block_hotlinked_media = true;
        settings
    }

    #[test]
    fn document_round_trip() {
        let mut doc = Document::parse("<p>a</p>");
        doc.rewrite(Settings::default());

        assert_eq!(doc.as_str(), "<p>a</p>");
    }

    #[test]
    fn full_chain() {
        let html = "<p><a href=\"https://else.org\">x</a> <img src=\"https://else.org/a.png\"></p>\
                    <pre><code>a\u{202E}b</code></pre><script>x()</script>";
        let mut doc = Document::parse(html);
        post_process(&mut doc, &config(&settings()));

        let out = doc.into_string();
        assert!(out.contains("rel=\"noopener nofollow ugc\""));
        assert!(out.contains("data-blocked-hotlinked-src=\"https://else.org/a.png\""));
        assert!(out.contains("&lt;U+202E&gt;"));
        assert!(!out.contains("<script"));
    }

    proptest! {
        #[test]
        fn passes_are_idempotent(
            text in "[a-z @<>&\u{202E}]{0,24}",
            href in prop_oneof![
                Just("https://else.org/x"),
                Just("/t/1"),
                Just("http://exa mple.com"),
                Just("//cdn.other.net/a.png"),
            ],
        ) {
            let html = format!(
                "<p><a href=\"{href}\" target=\"_blank\">{text}</a><img src=\"{href}\" srcset=\"{href} 2x\"></p>\
                 <pre><code>{text}</code></pre><span class=\"mention\">@alice</span>",
                text = crate::common::escape_text(&text),
            );
            let config = config(&settings());

            for (_, pass) in COOK_PASSES {
                let once = run(*pass, &html, &config);
                let twice = run(*pass, &once, &config);
                prop_assert_eq!(once, twice);
            }

            let email: &[fn(&mut Document)] = &[
                strip_image_wrapping,
                strip_oneboxed_media,
                convert_vimeo_iframes,
                strip_links,
                |doc| make_all_links_absolute(doc, "https://forum.example.com"),
            ];
            for pass in email {
                let mut once = Document::parse(html.as_str());
                pass(&mut once);
                let mut twice = once.clone();
                pass(&mut twice);
                prop_assert_eq!(once, twice);
            }
        }
    }
}
