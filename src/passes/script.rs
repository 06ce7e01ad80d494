use lol_html::{element, Settings};

use super::{Document, PassConfig};

/// Removes every `<script>` element. Runs even when the sanitizer is off.
pub fn strip_scripts(doc: &mut Document, _config: &PassConfig) {
    if !doc.as_str().to_ascii_lowercase().contains("<script") {
        return;
    }

    doc.rewrite(Settings {
        element_content_handlers: vec![element!("script", |el| {
            el.remove();
            Ok(())
        })],
        ..Settings::default()
    });
}
