use lol_html::{element, Settings};
use url::{ParseError, Url};

use super::{Document, PassConfig};

const NOFOLLOW: &str = "noopener nofollow ugc";

impl PassConfig {
    /// Whether `href` points back at the site (or an excluded domain).
    /// Anything that can't be parsed counts as external.
    fn same_origin(&self, href: &str) -> bool {
        let resolved = match &self.site {
            Some(site) => site.join(href),
            None => Url::parse(href),
        };

        let url = match resolved {
            Ok(url) => url,
            Err(ParseError::RelativeUrlWithoutBase) => return true,
            Err(_) => return false,
        };

        let Some(host) = url.host_str().map(str::to_ascii_lowercase) else {
            return true;
        };

        let site_host = self.site.as_ref().and_then(Url::host_str);
        let matches = |domain: &str| host == domain || host.ends_with(&format!(".{domain}"));

        site_host.is_some_and(|site| matches(&site.to_ascii_lowercase()))
            || self.nofollow_exclusions.iter().any(|domain| matches(domain))
    }
}

/// `target="_blank"` links get `rel="noopener"`; external links get
/// `rel="noopener nofollow ugc"` when nofollow is on.
pub fn add_rel_attributes(doc: &mut Document, config: &PassConfig) {
    doc.rewrite(Settings {
        element_content_handlers: vec![element!("a", |el| {
            if el.get_attribute("target").as_deref() == Some("_blank") {
                el.set_attribute("rel", "noopener")?;
            }

            if config.add_nofollow {
                let href = el.get_attribute("href").unwrap_or_default();
                if !config.same_origin(href.trim()) {
                    el.set_attribute("rel", NOFOLLOW)?;
                }
            }

            Ok(())
        })],
        ..Settings::default()
    });
}
