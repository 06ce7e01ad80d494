use lol_html::html_content::ContentType;
use lol_html::{text, Settings};

use super::{Document, PassConfig};
use crate::common::{escape_attr, DANGEROUS_BIDI_CHARACTERS};

/// Makes bidirectional control characters visible inside `<code>` and `<pre>`,
/// where they could otherwise disguise what a snippet does.
pub fn escape_bidi(doc: &mut Document, config: &PassConfig) {
    if !doc.as_str().contains(DANGEROUS_BIDI_CHARACTERS) {
        return;
    }

    let title = escape_attr(&config.bidi_title);

    doc.rewrite(Settings {
        element_content_handlers: vec![text!("code, pre", |chunk| {
            let raw = chunk.as_str();
            if !raw.contains(DANGEROUS_BIDI_CHARACTERS) {
                return Ok(());
            }

            let mut replaced = String::with_capacity(raw.len() + 64);
            for c in raw.chars() {
                match DANGEROUS_BIDI_CHARACTERS.contains(&c) {
                    true => replaced.push_str(&format!(
                        "<span class=\"bidi-warning\" title=\"{title}\">&lt;U+{:04X}&gt;</span>",
                        c as u32
                    )),
                    false => replaced.push(c),
                }
            }

            // The chunk is raw markup already, so it goes back in as HTML.
            chunk.replace(&replaced, ContentType::Html);
            Ok(())
        })],
        ..Settings::default()
    });
}
