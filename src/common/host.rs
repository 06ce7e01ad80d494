//! The capability table: every piece of host state the pipeline is allowed to see.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// What an `@name` resolved to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum MentionKind {
    User,
    Group,
    /// A group that may be mentioned and notifies its members.
    MentionableGroup,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TopicInfo {
    pub id: u64,
    pub title: String,
    /// URL slug; derived from the title when absent.
    #[serde(default)]
    pub slug: Option<String>,
}

impl TopicInfo {
    pub fn slug(&self) -> String {
        match &self.slug {
            Some(slug) => slug.clone(),
            None => slug::slugify(&self.title),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Avatar URL template with a `{size}` placeholder.
    #[serde(default)]
    pub avatar_template: Option<String>,
    /// Staged users exist for email-in but can't be mentioned.
    #[serde(default)]
    pub staged: bool,
}

/// A resolved `#hashtag`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HashtagItem {
    pub slug: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    pub relative_url: String,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub icon: Option<String>,
    /// For category hashtags written as `#parent:child`.
    #[serde(default)]
    pub parent_slug: Option<String>,
}

/// Callbacks supplied by the host application.
///
/// Implementations must be pure functions of their arguments from the
/// pipeline's point of view; every method defaults to "nothing found".
pub trait Host: Send + Sync {
    /// Resolves a batch of lowercase names in one go.
    fn lookup_mentions(&self, _names: &[String], _user_id: Option<u64>) -> HashMap<String, MentionKind> {
        HashMap::new()
    }

    /// Avatar URL template for a username.
    fn lookup_avatar(&self, _username: &str) -> Option<String> {
        None
    }

    fn topic_info(&self, _topic_id: u64) -> Option<TopicInfo> {
        None
    }

    fn current_user(&self, _user_id: u64) -> Option<UserRecord> {
        None
    }

    /// Maps short upload identifiers (`upload://...`) to their real URLs.
    fn lookup_upload_urls(&self, _identifiers: &[String]) -> HashMap<String, String> {
        HashMap::new()
    }

    /// Resolves `#slug`, trying `types` in order.
    fn hashtag_lookup(&self, _slug: &str, _types: &[String]) -> Option<HashtagItem> {
        None
    }

    /// Resolves the legacy `#parent:child` category syntax.
    fn category_hashtag_lookup(&self, _parent: &str, _child: &str) -> Option<HashtagItem> {
        None
    }

    /// Localized string for a translation key.
    fn translate(&self, _key: &str) -> Option<String> {
        None
    }

    /// Whether `url` points at an upload that must not leave the site, such as in email.
    fn is_secure_upload_url(&self, _url: &str) -> bool {
        false
    }
}

/// A host that resolves nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHost;

impl Host for NullHost {}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DirectoryGroup {
    pub name: String,
    #[serde(default)]
    pub mentionable: bool,
}

/// Static lookup tables, typically read from the `[directory]` section of the config file.
#[derive(Serialize, Deserialize, Default, Debug, Clone)]
#[serde(default)]
pub struct Directory {
    pub users: Vec<UserRecord>,
    pub groups: Vec<DirectoryGroup>,
    pub topics: Vec<TopicInfo>,
    pub hashtags: Vec<HashtagItem>,
    pub uploads: BTreeMap<String, String>,
    pub translations: BTreeMap<String, String>,
    /// URL prefixes of uploads that are only served to signed-in users.
    pub secure_uploads: Vec<String>,
}

/// A [`Host`] backed by a [`Directory`].
#[derive(Debug, Default, Clone)]
pub struct StaticHost {
    directory: Directory,
}

impl StaticHost {
    pub fn new(directory: Directory) -> Self {
        Self { directory }
    }

    fn find_user(&self, username: &str) -> Option<&UserRecord> {
        self.directory
            .users
            .iter()
            .find(|user| user.username.eq_ignore_ascii_case(username))
    }
}

impl Host for StaticHost {
    fn lookup_mentions(&self, names: &[String], _user_id: Option<u64>) -> HashMap<String, MentionKind> {
        let mut mentions = HashMap::new();

        for name in names {
            let name = name.to_lowercase();

            // Users shadow groups of the same name.
            let kind = if self.find_user(&name).is_some_and(|user| !user.staged) {
                Some(MentionKind::User)
            } else {
                self.directory
                    .groups
                    .iter()
                    .find(|group| group.name.to_lowercase() == name)
                    .map(|group| match group.mentionable {
                        true => MentionKind::MentionableGroup,
                        false => MentionKind::Group,
                    })
            };

            if let Some(kind) = kind {
                mentions.insert(name, kind);
            }
        }

        mentions
    }

    fn lookup_avatar(&self, username: &str) -> Option<String> {
        self.find_user(username)?.avatar_template.clone()
    }

    fn topic_info(&self, topic_id: u64) -> Option<TopicInfo> {
        self.directory
            .topics
            .iter()
            .find(|topic| topic.id == topic_id)
            .cloned()
    }

    fn current_user(&self, user_id: u64) -> Option<UserRecord> {
        self.directory
            .users
            .iter()
            .find(|user| user.id == user_id)
            .cloned()
    }

    fn lookup_upload_urls(&self, identifiers: &[String]) -> HashMap<String, String> {
        identifiers
            .iter()
            .filter_map(|id| {
                self.directory
                    .uploads
                    .get(id)
                    .map(|url| (id.clone(), url.clone()))
            })
            .collect()
    }

    fn hashtag_lookup(&self, slug: &str, types: &[String]) -> Option<HashtagItem> {
        types.iter().find_map(|kind| {
            self.directory
                .hashtags
                .iter()
                .find(|item| &item.kind == kind && item.slug.eq_ignore_ascii_case(slug))
                .cloned()
        })
    }

    fn category_hashtag_lookup(&self, parent: &str, child: &str) -> Option<HashtagItem> {
        self.directory
            .hashtags
            .iter()
            .find(|item| {
                item.kind == "category"
                    && item.slug.eq_ignore_ascii_case(child)
                    && item
                        .parent_slug
                        .as_deref()
                        .is_some_and(|p| p.eq_ignore_ascii_case(parent))
            })
            .cloned()
    }

    fn translate(&self, key: &str) -> Option<String> {
        self.directory.translations.get(key).cloned()
    }

    fn is_secure_upload_url(&self, url: &str) -> bool {
        self.directory
            .secure_uploads
            .iter()
            .any(|prefix| !prefix.is_empty() && url.starts_with(prefix.as_str()))
    }
}
