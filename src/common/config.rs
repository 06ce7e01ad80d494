use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Directory, DEFAULT_HASHTAG_CONTEXT};
use crate::prelude::*;

/// Represents the contents of Kiln's configuration file.
#[derive(Serialize, Deserialize, Default, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub site: SiteSettings,
    pub engine: EngineSettings,
    /// Backing data for [`StaticHost`](super::StaticHost).
    pub directory: Directory,
}

impl Config {
    pub fn from_path(path: &Path) -> Result<Self> {
        let toml_raw = match path.exists() {
            true => {
                std::fs::read_to_string(path)
                    .wrap_err("Could not read in configuration file.")
                    .suggestion("The configuration file was found, but couldn't be read - try checking your file permissions.")?
            },
            false => {
                let err = eyre!("Configuration file \"{}\" not found.", path.display())
                    .suggestion("Pass an existing file with --config, or omit the flag to use the defaults.");
                bail!(err)
            }
        };

        Self::parse(&toml_raw)
    }

    pub fn parse(source: &str) -> Result<Self> {
        toml::from_str(source)
            .wrap_err("Could not parse configuration file.")
            .note("This error occurred because the configuration wasn't valid TOML, or a key had the wrong type.")
    }
}

/// Site-wide settings that affect how markup is cooked.
///
/// The engine snapshots these when its context is built, so changing them
/// only takes effect after [`ContextPool::reset`](crate::pool::ContextPool::reset).
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SiteSettings {
    /// Absolute base URL of the site, e.g. `https://forum.example.com`.
    pub base_url: String,
    /// Path prefix the site is served under, e.g. `/forum`. Empty when served at the root.
    pub base_path: String,
    pub cdn_url: Option<String>,
    pub s3_cdn_url: Option<String>,
    pub external_emoji_url: Option<String>,
    pub emoji_set: String,
    pub enable_emoji: bool,
    pub enable_emoji_shortcuts: bool,
    pub enable_inline_emoji_translation: bool,
    /// Custom emoji name to image URL.
    pub custom_emoji: BTreeMap<String, String>,
    pub enable_mentions: bool,
    pub add_rel_nofollow_to_user_content: bool,
    pub exclude_rel_nofollow_domains: Vec<String>,
    pub block_hotlinked_media: bool,
    pub block_hotlinked_media_exceptions: Vec<String>,
    pub watched_words: WatchedWords,
    pub hashtags: HashtagSettings,
    /// Site-level feature toggles, merged under the per-call ones.
    pub features: BTreeMap<String, bool>,
}

impl Default for SiteSettings {
    fn default() -> Self {
        SiteSettings {
            base_url: "http://localhost".to_owned(),
            base_path: String::new(),
            cdn_url: None,
            s3_cdn_url: None,
            external_emoji_url: None,
            emoji_set: "twitter".to_owned(),
            enable_emoji: true,
            enable_emoji_shortcuts: true,
            enable_inline_emoji_translation: false,
            custom_emoji: BTreeMap::new(),
            enable_mentions: true,
            add_rel_nofollow_to_user_content: true,
            exclude_rel_nofollow_domains: Vec::new(),
            block_hotlinked_media: false,
            block_hotlinked_media_exceptions: Vec::new(),
            watched_words: WatchedWords::default(),
            hashtags: HashtagSettings::default(),
            features: BTreeMap::new(),
        }
    }
}

impl SiteSettings {
    /// The host component of `base_url`, if it parses.
    pub fn site_host(&self) -> Option<String> {
        url::Url::parse(&self.base_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_owned))
    }
}

/// Watched word lists. Each entry may use `*` as a wildcard.
#[derive(Serialize, Deserialize, Default, Debug, Clone)]
#[serde(default)]
pub struct WatchedWords {
    /// Words that are replaced by block characters.
    pub censor: Vec<String>,
    /// Word to replacement text.
    pub replace: BTreeMap<String, String>,
    /// Word to link target.
    pub link: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct HashtagSettings {
    /// Hashtag context name to the data source types, in lookup priority order.
    pub contexts: HashMap<String, Vec<String>>,
    /// Icon name for each registered data source.
    pub icons: Vec<String>,
}

impl Default for HashtagSettings {
    fn default() -> Self {
        let mut contexts = HashMap::new();
        contexts.insert(
            DEFAULT_HASHTAG_CONTEXT.to_owned(),
            vec!["category".to_owned(), "tag".to_owned()],
        );

        HashtagSettings {
            contexts,
            icons: vec!["folder".to_owned(), "tag".to_owned()],
        }
    }
}

impl HashtagSettings {
    /// Data source types for a context. Unknown contexts fall back to the default context.
    pub fn ordered_types_for_context(&self, context: &str) -> Vec<String> {
        self.contexts
            .get(context)
            .or_else(|| self.contexts.get(DEFAULT_HASHTAG_CONTEXT))
            .cloned()
            .unwrap_or_default()
    }
}

/// Limits and discovery settings for the rule engine.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct EngineSettings {
    /// Wall-clock budget for one engine call.
    pub timeout_ms: u64,
    /// Instruction budget for one sandboxed script.
    pub fuel: u64,
    /// Idle period after which the context drops its scratch buffers and caches.
    pub gc_after_idle_ms: u64,
    /// Directories scanned for plugin rule modules, in order.
    pub plugin_dirs: Vec<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            timeout_ms: 25_000,
            fuel: 1_000_000,
            gc_after_idle_ms: 2_000,
            plugin_dirs: Vec::new(),
        }
    }
}

impl EngineSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn gc_after_idle(&self) -> Duration {
        Duration::from_millis(self.gc_after_idle_ms)
    }
}
