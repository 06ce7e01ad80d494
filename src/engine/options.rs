//! Per-call cooking options and the bundle the engine builds from them.

use std::collections::{BTreeMap, BTreeSet};

use pulldown_cmark::Options;
use serde::Serialize;

use crate::common::{Host, SiteSettings, UserRecord, DEFAULT_HASHTAG_CONTEXT};

/// Names of the optional Markdown grammar extensions.
pub const MARKDOWN_RULES: &[(&str, Options)] = &[
    ("table", Options::ENABLE_TABLES),
    ("strikethrough", Options::ENABLE_STRIKETHROUGH),
    ("footnote", Options::ENABLE_FOOTNOTES),
    ("tasklist", Options::ENABLE_TASKLISTS),
    ("smartquotes", Options::ENABLE_SMART_PUNCTUATION),
];

/// Options for a single cook call. Immutable once built.
///
/// ```ignore
/// let options = CookOptions::default().topic_id(12).user_id(3);
/// ```
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct CookOptions {
    pub disable_emojis: bool,
    /// Merged over the site's feature toggles.
    pub features: BTreeMap<String, bool>,
    /// When set, exactly these features are enabled and nothing else.
    pub features_override: Option<BTreeSet<String>>,
    /// When set, only these Markdown grammar extensions are enabled.
    pub markdown_it_rules: Option<BTreeSet<String>>,
    pub topic_id: Option<u64>,
    pub user_id: Option<u64>,
    /// Always link `[quote]` titles to their topic, even within the same topic.
    pub force_quote_link: bool,
    /// Controls the order in which `#hashtag` data sources are tried.
    pub hashtag_context: String,
    /// Run the allowlist sanitizer.
    ///
    /// Disabling this is only acceptable for trusted, system-generated
    /// content such as email bodies. `<script>` elements are still stripped.
    pub sanitize: bool,
    /// Never add `nofollow` to links, regardless of site settings.
    pub omit_nofollow: bool,
}

impl Default for CookOptions {
    fn default() -> Self {
        CookOptions {
            disable_emojis: false,
            features: BTreeMap::new(),
            features_override: None,
            markdown_it_rules: None,
            topic_id: None,
            user_id: None,
            force_quote_link: false,
            hashtag_context: DEFAULT_HASHTAG_CONTEXT.to_owned(),
            sanitize: true,
            omit_nofollow: false,
        }
    }
}

impl CookOptions {
    pub fn disable_emojis(mut self) -> Self {
        self.disable_emojis = true;
        self
    }

    pub fn feature(mut self, name: impl Into<String>, enabled: bool) -> Self {
        self.features.insert(name.into(), enabled);
        self
    }

    pub fn features_override<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.features_override = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn markdown_it_rules<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.markdown_it_rules = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn topic_id(mut self, id: u64) -> Self {
        self.topic_id = Some(id);
        self
    }

    pub fn user_id(mut self, id: u64) -> Self {
        self.user_id = Some(id);
        self
    }

    pub fn force_quote_link(mut self) -> Self {
        self.force_quote_link = true;
        self
    }

    pub fn hashtag_context(mut self, context: impl Into<String>) -> Self {
        self.hashtag_context = context.into();
        self
    }

    /// See the field docs: trusted content only.
    pub fn without_sanitizer(mut self) -> Self {
        self.sanitize = false;
        self
    }

    pub fn omit_nofollow(mut self) -> Self {
        self.omit_nofollow = true;
        self
    }
}

/// Path and CDN configuration handed to rules that build URLs.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub base_uri: String,
    pub base_url: String,
    pub cdn: Option<String>,
    pub s3_cdn: Option<String>,
}

impl Paths {
    pub fn from_settings(settings: &SiteSettings) -> Self {
        Paths {
            base_uri: settings.base_path.trim_end_matches('/').to_owned(),
            base_url: settings.base_url.trim_end_matches('/').to_owned(),
            cdn: settings.cdn_url.clone(),
            s3_cdn: settings.s3_cdn_url.clone(),
        }
    }

    /// Prefixes a root-relative path with the base path.
    pub fn get_url(&self, path: &str) -> String {
        if !path.starts_with('/') || path.starts_with("//") {
            return path.to_owned();
        }
        if !self.base_uri.is_empty() && path.starts_with(&format!("{}/", self.base_uri)) {
            return path.to_owned();
        }
        format!("{}{}", self.base_uri, path)
    }

    /// Like [`Paths::get_url`], but served from the CDN when one is configured.
    pub fn get_url_with_cdn(&self, path: &str) -> String {
        let url = self.get_url(path);
        match (&self.cdn, url.starts_with('/') && !url.starts_with("//")) {
            (Some(cdn), true) => format!("{}{}", cdn.trim_end_matches('/'), url),
            _ => url,
        }
    }
}

/// Everything the engine needs for one render, computed fresh per call.
#[derive(Serialize, Debug, Clone)]
pub struct OptionBundle {
    pub options: CookOptions,
    pub features: BTreeSet<String>,
    #[serde(skip)]
    pub extensions: Options,
    pub paths: Paths,
    pub current_user: Option<UserRecord>,
    pub hashtag_types_in_priority_order: Vec<String>,
    pub hashtag_icons: Vec<String>,
}

impl OptionBundle {
    /// Resolves which of `feature_names` are on for this call.
    pub fn build(
        options: &CookOptions,
        settings: &SiteSettings,
        host: &dyn Host,
        feature_names: &[String],
    ) -> Self {
        let features = feature_names
            .iter()
            .filter(|name| feature_enabled(name, options, settings))
            .cloned()
            .collect();

        let extensions = match &options.markdown_it_rules {
            Some(rules) => MARKDOWN_RULES
                .iter()
                .filter(|(name, _)| rules.contains(*name))
                .fold(Options::empty(), |acc, (_, flag)| acc | *flag),
            None => MARKDOWN_RULES
                .iter()
                .filter(|(name, _)| *name != "smartquotes")
                .fold(Options::empty(), |acc, (_, flag)| acc | *flag),
        };

        let current_user = options.user_id.and_then(|id| host.current_user(id));

        OptionBundle {
            options: options.clone(),
            features,
            extensions,
            paths: Paths::from_settings(settings),
            current_user,
            hashtag_types_in_priority_order: settings
                .hashtags
                .ordered_types_for_context(&options.hashtag_context),
            hashtag_icons: settings.hashtags.icons.clone(),
        }
    }

    pub fn enabled(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }
}

fn feature_enabled(name: &str, options: &CookOptions, settings: &SiteSettings) -> bool {
    if name == "emoji" && (options.disable_emojis || !settings.enable_emoji) {
        return false;
    }

    if let Some(only) = &options.features_override {
        return only.contains(name);
    }

    options
        .features
        .get(name)
        .or_else(|| settings.features.get(name))
        .copied()
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::NullHost;

    fn names() -> Vec<String> {
        ["emoji", "mentions", "quotes"].map(String::from).to_vec()
    }

    #[test]
    fn defaults_enable_everything() {
        let bundle = OptionBundle::build(&CookOptions::default(), &SiteSettings::default(), &NullHost, &names());

        assert!(bundle.enabled("emoji"));
        assert!(bundle.enabled("mentions"));
        assert!(bundle.extensions.contains(Options::ENABLE_TABLES));
        assert!(!bundle.extensions.contains(Options::ENABLE_SMART_PUNCTUATION));
        assert_eq!(bundle.hashtag_types_in_priority_order, vec!["category", "tag"]);
    }

    #[test]
    fn disable_emojis() {
        let options = CookOptions::default().disable_emojis();
        let bundle = OptionBundle::build(&options, &SiteSettings::default(), &NullHost, &names());

        assert!(!bundle.enabled("emoji"));
    }

    #[test]
    fn override_and_merge() {
        let mut settings = SiteSettings::default();
        settings.features.insert("quotes".into(), false);

        let options = CookOptions::default().feature("quotes", true).feature("mentions", false);
        let bundle = OptionBundle::build(&options, &settings, &NullHost, &names());
        assert!(bundle.enabled("quotes"));
        assert!(!bundle.enabled("mentions"));

        let options = CookOptions::default().features_override(["mentions"]);
        let bundle = OptionBundle::build(&options, &settings, &NullHost, &names());
        assert_eq!(bundle.features.iter().collect::<Vec<_>>(), vec!["mentions"]);
    }

    #[test]
    fn markdown_rules() {
        let options = CookOptions::default().markdown_it_rules(["strikethrough"]);
        let bundle = OptionBundle::build(&options, &SiteSettings::default(), &NullHost, &names());

        assert_eq!(bundle.extensions, Options::ENABLE_STRIKETHROUGH);
    }

    #[test]
    fn urls() {
        let mut settings = SiteSettings::default();
        settings.base_path = "/forum".into();
        settings.cdn_url = Some("https://cdn.example.com".into());
        let paths = Paths::from_settings(&settings);

        assert_eq!(paths.get_url("/u/alice"), "/forum/u/alice");
        assert_eq!(paths.get_url("/forum/u/alice"), "/forum/u/alice");
        assert_eq!(paths.get_url("https://x.org/a"), "https://x.org/a");
        assert_eq!(paths.get_url_with_cdn("/images/a.png"), "https://cdn.example.com/forum/images/a.png");
    }
}
