use std::cell::RefCell;

use itertools::Itertools;
use lol_html::{element, text, Settings};

use super::{Document, PassConfig};
use crate::common::MentionKind;
use crate::prelude::*;

/// Lowercased names of every `span.mention`, in document order.
fn collect(doc: &mut Document) -> Vec<String> {
    let names = RefCell::new(Vec::<String>::new());

    doc.rewrite(Settings {
        element_content_handlers: vec![
            element!("span.mention", |_| {
                names.borrow_mut().push(String::new());
                Ok(())
            }),
            text!("span.mention", |chunk| {
                if let Some(last) = names.borrow_mut().last_mut() {
                    last.push_str(chunk.as_str());
                }
                Ok(())
            }),
        ],
        ..Settings::default()
    });

    names
        .into_inner()
        .into_iter()
        .map(|text| text.trim().trim_start_matches('@').to_lowercase())
        .collect()
}

/// Turns `span.mention` elements the host recognizes into links.
///
/// Names are resolved with a single batched lookup; unknown names stay as spans.
pub fn resolve_mentions(doc: &mut Document, config: &PassConfig) {
    if !config.enable_mentions || !doc.as_str().contains("mention") {
        return;
    }

    let names = collect(doc);
    if names.is_empty() {
        return;
    }

    let unique = names.iter().unique().cloned().collect::<Vec<_>>();
    let resolved = config.host.lookup_mentions(&unique, config.user_id);
    debug!("Resolved {} of {} mentioned name(s)", resolved.len(), unique.len());

    if resolved.is_empty() {
        return;
    }

    let mut index = 0;
    doc.rewrite(Settings {
        element_content_handlers: vec![element!("span.mention", |el| {
            let name = names.get(index).map(String::as_str).unwrap_or_default();
            index += 1;

            let Some(kind) = resolved.get(name) else {
                return Ok(());
            };

            let encoded = urlencoding::encode(name);
            let (class, href) = match kind {
                MentionKind::User => ("mention", format!("{}/u/{encoded}", config.base_path)),
                MentionKind::Group => ("mention-group", format!("{}/groups/{encoded}", config.base_path)),
                MentionKind::MentionableGroup => {
                    ("mention-group notify", format!("{}/groups/{encoded}", config.base_path))
                }
            };

            el.set_tag_name("a")?;
            el.set_attribute("class", class)?;
            el.set_attribute("href", &href)?;
            Ok(())
        })],
        ..Settings::default()
    });
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::super::test_support::{config_with_host, run};
    use super::*;
    use crate::common::{Directory, DirectoryGroup, Host, SiteSettings, StaticHost, UserRecord};

    fn host() -> StaticHost {
        StaticHost::new(Directory {
            users: vec![UserRecord {
                id: 1,
                username: "alice".into(),
                name: None,
                avatar_template: None,
                staged: false,
            }],
            groups: vec![
                DirectoryGroup { name: "team".into(), mentionable: true },
                DirectoryGroup { name: "quiet".into(), mentionable: false },
            ],
            ..Directory::default()
        })
    }

    #[test]
    fn kinds() {
        let config = config_with_host(&SiteSettings::default(), Arc::new(host()));
        let html = "<p><span class=\"mention\">@Alice</span> <span class=\"mention\">@team</span> \
                    <span class=\"mention\">@quiet</span> <span class=\"mention\">@nobody</span></p>";

        assert_eq!(
            run(resolve_mentions, html, &config),
            "<p><a class=\"mention\" href=\"/u/alice\">@Alice</a> \
             <a class=\"mention-group notify\" href=\"/groups/team\">@team</a> \
             <a class=\"mention-group\" href=\"/groups/quiet\">@quiet</a> \
             <span class=\"mention\">@nobody</span></p>"
        );
    }

    #[test]
    fn base_path_and_disabled() {
        let mut settings = SiteSettings::default();
        settings.base_path = "/forum".into();
        let config = config_with_host(&settings, Arc::new(host()));
        let html = "<span class=\"mention\">@alice</span>";

        assert_eq!(
            run(resolve_mentions, html, &config),
            "<a class=\"mention\" href=\"/forum/u/alice\">@alice</a>"
        );

        settings.enable_mentions = false;
        let config = config_with_host(&settings, Arc::new(host()));
        assert_eq!(run(resolve_mentions, html, &config), html);
    }

    struct CountingHost(AtomicUsize);

    impl Host for CountingHost {
        fn lookup_mentions(&self, names: &[String], _user_id: Option<u64>) -> HashMap<String, MentionKind> {
            self.0.fetch_add(1, Ordering::SeqCst);
            assert_eq!(names, ["bob"]);
            HashMap::new()
        }
    }

    #[test]
    fn one_batched_lookup() {
        let host = Arc::new(CountingHost(AtomicUsize::new(0)));
        let config = config_with_host(&SiteSettings::default(), host.clone());
        let html = "<span class=\"mention\">@bob</span><span class=\"mention\">@Bob</span>";

        assert_eq!(run(resolve_mentions, html, &config), html);
        assert_eq!(host.0.load(Ordering::SeqCst), 1);
    }
}
