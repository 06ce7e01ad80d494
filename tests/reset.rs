use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;

use kiln::common::{EngineSettings, BIDI_TITLE_KEY};
use kiln::engine::registry::RuleRegistry;
use kiln::{CookOptions, Cooker, Host, NullHost, SiteSettings};

fn cooker(host: Arc<dyn Host>) -> Cooker {
    Cooker::new(SiteSettings::default(), EngineSettings::default(), RuleRegistry::new(), host)
}

#[test]
fn custom_emoji_after_reset() {
    let cooker = cooker(Arc::new(NullHost));
    let parrot = |cooker: &Cooker| cooker.cook(":parrot:", &CookOptions::default()).unwrap();

    assert_eq!(parrot(&cooker), "<p>:parrot:</p>\n");

    let mut settings = SiteSettings::default();
    settings.custom_emoji.insert("parrot".into(), "/uploads/parrot.gif".into());

    // Stored, but the live context still has the old emoji table.
    cooker.set_settings(settings.clone());
    assert_eq!(parrot(&cooker), "<p>:parrot:</p>\n");

    cooker.apply_settings(settings);
    let html = parrot(&cooker);
    assert!(html.contains("emoji-custom"));
    assert!(html.contains("src=\"/uploads/parrot.gif\""));
}

/// A host whose translation can change underneath the engine.
struct Locale(Mutex<String>);

impl Host for Locale {
    fn translate(&self, key: &str) -> Option<String> {
        (key == BIDI_TITLE_KEY).then(|| self.0.lock().unwrap().clone())
    }
}

#[test]
fn translations_are_cached_until_reset() {
    let locale = Arc::new(Locale(Mutex::new("Hidden character".into())));
    let cooker = cooker(Arc::clone(&locale) as Arc<dyn Host>);
    let title = |cooker: &Cooker| cooker.cook("`\u{202E}`", &CookOptions::default()).unwrap();

    assert!(title(&cooker).contains("title=\"Hidden character\""));

    *locale.0.lock().unwrap() = "Verborgenes Zeichen".into();
    assert!(title(&cooker).contains("title=\"Hidden character\""));

    cooker.reset_translations();
    assert!(title(&cooker).contains("title=\"Verborgenes Zeichen\""));
}

#[test]
fn reset_before_first_use() {
    let cooker = cooker(Arc::new(NullHost));
    cooker.reset();
    cooker.reset_translations();

    assert_eq!(cooker.cook("*ok*", &CookOptions::default()).unwrap(), "<p><em>ok</em></p>\n");
}
