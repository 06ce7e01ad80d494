use std::cell::RefCell;
use std::collections::HashSet;

use lol_html::{element, text, Settings};

use crate::passes::rewrite;
use crate::prelude::*;

/// Names mentioned in a cooked fragment, lowercased and without the `@`.
pub fn extract_mentions(html: &str) -> HashSet<String> {
    let texts = RefCell::new(Vec::<String>::new());
    let selector = ".mention, .mention-group";

    let result = rewrite(
        html,
        Settings {
            element_content_handlers: vec![
                element!(selector, |_| {
                    texts.borrow_mut().push(String::new());
                    Ok(())
                }),
                text!(selector, |chunk| {
                    if let Some(last) = texts.borrow_mut().last_mut() {
                        last.push_str(chunk.as_str());
                    }
                    Ok(())
                }),
            ],
            ..Settings::default()
        },
    );

    if let Err(e) = result {
        warn!("Could not read mentions from document: {e}");
        return HashSet::new();
    }

    texts
        .into_inner()
        .into_iter()
        .filter_map(|text| {
            let text = html_escape::decode_html_entities(text.trim()).into_owned();
            let mut chars = text.chars();
            chars.next()?;
            Some(chars.as_str().to_lowercase())
        })
        .filter(|name| !name.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_and_dedupes() {
        let html = "<p><a class=\"mention\" href=\"/u/alice\">@Alice</a> \
                    <span class=\"mention\">@bob</span> \
                    <a class=\"mention-group notify\" href=\"/groups/team\">@team</a> \
                    <a class=\"mention\" href=\"/u/alice\">@alice</a> \
                    <span class=\"mention\">@</span></p>";

        let mentions = extract_mentions(html);

        assert_eq!(mentions, HashSet::from(["alice".to_owned(), "bob".to_owned(), "team".to_owned()]));
    }

    #[test]
    fn none() {
        assert!(extract_mentions("<p>hello @nobody</p>").is_empty());
    }
}
