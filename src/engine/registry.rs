//! Plugin rule modules and their discovery on disk.

use std::path::{Path, PathBuf};

use itertools::Itertools;
use walkdir::{DirEntry, WalkDir};

use crate::error::EngineError;
use crate::prelude::*;

/// When a plugin module runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// On the raw markup, before Markdown.
    Text,
    /// On the rendered HTML, before sanitization.
    Html,
}

impl Phase {
    const TEXT_SUFFIX: &'static str = ".text.jinja";
    const HTML_SUFFIX: &'static str = ".html.jinja";

    /// Splits a file name like `spoiler.html.jinja` into its module name and phase.
    fn from_file_name(file_name: &str) -> Option<(&str, Phase)> {
        if let Some(name) = file_name.strip_suffix(Self::TEXT_SUFFIX) {
            return Some((name, Phase::Text));
        }
        file_name
            .strip_suffix(Self::HTML_SUFFIX)
            .map(|name| (name, Phase::Html))
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Html => write!(f, "html"),
        }
    }
}

/// A plugin rule: a minijinja template that receives `source` and `options`
/// and renders the replacement source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleModule {
    /// Also the module's feature flag.
    pub name: String,
    pub phase: Phase,
    pub source: String,
    /// Where the module was read from, if anywhere.
    pub origin: Option<PathBuf>,
}

impl RuleModule {
    pub fn new(name: impl Into<String>, phase: Phase, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phase,
            source: source.into(),
            origin: None,
        }
    }

    /// Name the module is registered under inside the sandbox.
    pub fn template_name(&self) -> String {
        format!("{}.{}", self.name, self.phase)
    }
}

/// The ordered set of plugin rule modules.
#[derive(Debug, Default, Clone)]
pub struct RuleRegistry {
    modules: Vec<RuleModule>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a module. Returns `false` (and keeps the first one) if a module with the
    /// same name and phase is already registered.
    ///
    /// A text module and an html module may share a name, and with it a feature flag.
    pub fn register(&mut self, module: RuleModule) -> bool {
        if self
            .modules
            .iter()
            .any(|existing| existing.name == module.name && existing.phase == module.phase)
        {
            warn!(
                "Ignoring rule module \"{}\" from {:?}: a {} module with that name is already registered.",
                module.name, module.origin, module.phase
            );
            return false;
        }

        debug!("Registered {} rule module \"{}\".", module.phase, module.name);
        self.modules.push(module);
        true
    }

    /// Walks each directory in order, registering every `*.text.jinja` and `*.html.jinja` file found.
    /// Files are visited sorted by name, so the resulting order is deterministic.
    pub fn discover<P: AsRef<Path>>(dirs: &[P]) -> Result<Self, EngineError> {
        let mut registry = Self::new();

        for dir in dirs {
            let dir = dir.as_ref();
            if !dir.exists() {
                warn!("Plugin rule directory {dir:?} does not exist, skipping.");
                continue;
            }

            for entry in WalkDir::new(dir).sort_by_file_name() {
                if let Some(module) = read_entry(entry?)? {
                    registry.register(module);
                }
            }
        }

        info!("Discovered {} plugin rule module(s).", registry.modules.len());
        Ok(registry)
    }

    pub fn modules(&self) -> &[RuleModule] {
        &self.modules
    }

    /// Each module name once, in registration order.
    pub fn feature_names(&self) -> impl Iterator<Item = &str> {
        self.modules.iter().map(|module| module.name.as_str()).unique()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

fn read_entry(entry: DirEntry) -> Result<Option<RuleModule>, EngineError> {
    if !entry.file_type().is_file() {
        return Ok(None);
    }

    let file_name = entry.file_name().to_string_lossy();
    let Some((name, phase)) = Phase::from_file_name(&file_name) else {
        trace!("Skipping non-rule file {:?}", entry.path());
        return Ok(None);
    };

    let module = RuleModule {
        name: name.to_owned(),
        phase,
        source: std::fs::read_to_string(entry.path())?,
        origin: Some(entry.path().to_path_buf()),
    };

    Ok(Some(module))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kiln-registry-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn file_names() {
        assert_eq!(Phase::from_file_name("spoiler.html.jinja"), Some(("spoiler", Phase::Html)));
        assert_eq!(Phase::from_file_name("shout.text.jinja"), Some(("shout", Phase::Text)));
        assert_eq!(Phase::from_file_name("README.md"), None);
    }

    #[test]
    fn duplicates_keep_first() {
        let mut registry = RuleRegistry::new();

        assert!(registry.register(RuleModule::new("shout", Phase::Text, "{{ source }}")));
        assert!(registry.register(RuleModule::new("shout", Phase::Html, "{{ source }}")));
        assert!(!registry.register(RuleModule::new("shout", Phase::Text, "{{ source | upper }}")));

        let phases: Vec<_> = registry.modules().iter().map(|module| module.phase).collect();
        assert_eq!(phases, vec![Phase::Text, Phase::Html]);
        assert_eq!(registry.modules()[0].source, "{{ source }}");
        assert_eq!(registry.feature_names().collect::<Vec<_>>(), vec!["shout"]);
    }

    #[test]
    fn discover_both_phases() {
        let dir = scratch_dir("phases");
        std::fs::write(dir.join("spoiler.text.jinja"), "{{ source }}").unwrap();
        std::fs::write(dir.join("spoiler.html.jinja"), "{{ source }}").unwrap();

        let registry = RuleRegistry::discover(&[&dir]).unwrap();
        let modules: Vec<_> = registry
            .modules()
            .iter()
            .map(|module| (module.name.as_str(), module.phase))
            .collect();

        assert_eq!(modules, vec![("spoiler", Phase::Html), ("spoiler", Phase::Text)]);
        assert_eq!(registry.feature_names().collect::<Vec<_>>(), vec!["spoiler"]);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn discover_sorted() {
        let dir = scratch_dir("sorted");
        std::fs::write(dir.join("zeta.text.jinja"), "{{ source }}").unwrap();
        std::fs::write(dir.join("alpha.html.jinja"), "{{ source }}").unwrap();
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();
        std::fs::create_dir_all(dir.join("nested")).unwrap();
        std::fs::write(dir.join("nested").join("beta.text.jinja"), "{{ source }}").unwrap();

        let missing = dir.join("missing");
        let registry = RuleRegistry::discover(&[dir.clone(), missing]).unwrap();
        let names: Vec<_> = registry.feature_names().collect();

        assert_eq!(names, vec!["alpha", "beta", "zeta"]);
        assert_eq!(registry.modules()[0].origin.as_deref(), Some(dir.join("alpha.html.jinja").as_path()));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
