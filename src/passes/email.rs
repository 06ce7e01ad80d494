//! Passes that prepare cooked HTML for plain mail clients.

use std::cell::{Cell, RefCell};

use ahash::AHashMap;
use lol_html::html_content::{ContentType, Element};
use lol_html::{element, Settings};
use url::{ParseError, Url};

use super::Document;
use crate::common::{escape_attr, escape_text, Host};

/// Removes the file name and size overlay from lightboxed images.
pub fn strip_image_wrapping(doc: &mut Document) {
    doc.rewrite(Settings {
        element_content_handlers: vec![element!(".lightbox-wrapper .meta", |el| {
            el.remove();
            Ok(())
        })],
        ..Settings::default()
    });
}

/// Removes embedded audio and video, which mail clients can't play.
pub fn strip_oneboxed_media(doc: &mut Document) {
    doc.rewrite(Settings {
        element_content_handlers: vec![element!("audio, video, div.video-onebox", |el| {
            el.remove();
            Ok(())
        })],
        ..Settings::default()
    });
}

fn vimeo_url(el: &Element) -> Option<String> {
    if let Some(original) = el.get_attribute("data-original-href").filter(|href| !href.is_empty()) {
        return Some(original);
    }

    let src = el.get_attribute("src")?;
    let id = src.rsplit('/').next()?.replacen("?h=", "/", 1);
    Some(format!("https://vimeo.com/{id}"))
}

/// Replaces Vimeo player iframes with a plain link to the video.
pub fn convert_vimeo_iframes(doc: &mut Document) {
    doc.rewrite(Settings {
        element_content_handlers: vec![element!("iframe[src*=\"player.vimeo.com\"]", |el| {
            if let Some(url) = vimeo_url(el) {
                let url = escape_attr(&url);
                el.replace(&format!("<p><a href=\"{url}\">{url}</a></p>"), ContentType::Html);
            }
            Ok(())
        })],
        ..Settings::default()
    });
}

/// Localized text for the notice left in place of secure media.
#[derive(Debug, Clone, Copy)]
pub struct SecureUploadNotice<'a> {
    pub text: &'a str,
    pub link: &'a str,
}

impl SecureUploadNotice<'_> {
    fn render(&self, url: &str, onebox_type: Option<&str>, width: Option<&str>, height: Option<&str>) -> String {
        let url = escape_attr(url);
        let mut data = String::new();

        if let Some(kind) = onebox_type {
            data.push_str(&format!(" data-onebox-type=\"{kind}\""));
        }
        if let Some(width) = width {
            data.push_str(&format!(" data-width=\"{}\"", escape_attr(width)));
        }
        if let Some(height) = height {
            data.push_str(&format!(" data-height=\"{}\"", escape_attr(height)));
        }

        format!(
            "<div class=\"secure-upload-notice\" data-stripped-secure-upload=\"{url}\"{data}>{} \
             <a class=\"stripped-secure-view-upload\" href=\"{url}\">{}</a>.</div>",
            escape_text(self.text),
            escape_text(self.link)
        )
    }
}

fn first_candidate(srcset: &str) -> Option<&str> {
    srcset.split(',').next()?.split_whitespace().next()
}

/// Replaces media the host marks as secure with a notice linking back to it.
///
/// Covers audio and video whose fallback link is secure, lightboxed images
/// (which always lose their image) and any other image with a secure source.
pub fn strip_secure_uploads(doc: &mut Document, host: &dyn Host, notice: &SecureUploadNotice) {
    // Audio and video can only be replaced from their start tag, so their
    // fallback links are inspected first.
    let media = Cell::new(0usize);
    let secure_media: RefCell<AHashMap<usize, String>> = RefCell::default();

    doc.rewrite(Settings {
        element_content_handlers: vec![
            element!("audio, video", |_el| {
                media.set(media.get() + 1);
                Ok(())
            }),
            element!("audio > a[href], video > a[href]", |el| {
                let href = el.get_attribute("href").unwrap_or_default();
                if host.is_secure_upload_url(&href) {
                    secure_media.borrow_mut().entry(media.get()).or_insert(href);
                }
                Ok(())
            }),
        ],
        ..Settings::default()
    });

    let secure_media = secure_media.into_inner();
    let media = Cell::new(0usize);
    let in_lightbox = Cell::new(false);
    let in_onebox = Cell::new(false);

    doc.rewrite(Settings {
        element_content_handlers: vec![
            element!("audio, video", |el| {
                media.set(media.get() + 1);
                if let Some(url) = secure_media.get(&media.get()) {
                    el.replace(&notice.render(url, None, None, None), ContentType::Html);
                }
                Ok(())
            }),
            element!("a.lightbox[href]", |el| {
                let href = el.get_attribute("href").unwrap_or_default();
                if host.is_secure_upload_url(&href) {
                    in_lightbox.set(true);
                    el.remove_and_keep_content();
                }
                Ok(())
            }),
            element!(".onebox-body img[src]", |_el| {
                in_onebox.set(true);
                Ok(())
            }),
            element!("img[src]", |el| {
                let lightbox = in_lightbox.replace(false);
                let onebox = in_onebox.replace(false);

                let src = el.get_attribute("src").unwrap_or_default();
                let srcset = el.get_attribute("srcset");
                let url = match (lightbox, srcset.as_deref().and_then(first_candidate)) {
                    (true, Some(candidate)) => candidate.to_owned(),
                    _ => src,
                };

                if !lightbox && !host.is_secure_upload_url(&url) {
                    return Ok(());
                }

                let class = el.get_attribute("class").unwrap_or_default();
                let has_class = |name: &str| class.split_whitespace().any(|c| c == name);

                let html = match has_class("site-icon") {
                    true => notice.render(&url, None, Some("16"), Some("16")),
                    false => {
                        let onebox_type = onebox.then(|| match has_class("onebox-avatar-inline") {
                            true => "avatar-inline",
                            false => "thumbnail",
                        });
                        let width = el.get_attribute("width");
                        let height = el.get_attribute("height");
                        notice.render(&url, onebox_type, width.as_deref(), height.as_deref())
                    }
                };

                el.replace(&html, ContentType::Html);
                Ok(())
            }),
        ],
        ..Settings::default()
    });
}

/// Prefixes every host-less link (except `mailto:`) with the site's base URL.
pub fn make_all_links_absolute(doc: &mut Document, base_url: &str) {
    doc.rewrite(Settings {
        element_content_handlers: vec![element!("a[href]", |el| {
            let href = el.get_attribute("href").unwrap_or_default();

            let relative = match Url::parse(&href) {
                Ok(_) => false,
                Err(ParseError::RelativeUrlWithoutBase) => !href.starts_with("//"),
                Err(_) => false,
            };

            if relative && !href.starts_with("mailto") {
                el.set_attribute("href", &format!("{}{href}", base_url.trim_end_matches('/')))?;
            }
            Ok(())
        })],
        ..Settings::default()
    });
}

/// Unwraps every link, keeping its text.
pub fn strip_links(doc: &mut Document) {
    doc.rewrite(Settings {
        element_content_handlers: vec![element!("a", |el| {
            el.remove_and_keep_content();
            Ok(())
        })],
        ..Settings::default()
    });
}
