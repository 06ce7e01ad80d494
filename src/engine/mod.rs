//! The sandboxed rule engine that turns markup into raw HTML.

pub mod helpers;
pub mod markdown;
pub mod options;
pub mod registry;
pub mod rules;
pub mod sandbox;
pub mod sanitize;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use ahash::AHashMap;
use minijinja::value::Value;

use self::markdown::Markdown;
use self::options::{CookOptions, OptionBundle, Paths};
use self::registry::{Phase, RuleModule, RuleRegistry};
use self::rules::{core_rules, EmojiRule, InlineRule, RuleContext, CORE_FEATURES};
use self::sandbox::Sandbox;
use crate::common::{EngineSettings, Host, SiteSettings};
use crate::error::EngineError;
use crate::prelude::*;

/// A wall-clock deadline for one engine call.
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    started: Instant,
    limit: Duration,
}

impl Budget {
    pub fn new(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    pub fn check(&self) -> Result<(), EngineError> {
        match self.started.elapsed() > self.limit {
            true => Err(EngineError::Timeout { budget: self.limit }),
            false => Ok(()),
        }
    }
}

/// Localized strings, fetched from the host on first use.
pub struct Translations {
    host: Arc<dyn Host>,
    cache: Mutex<AHashMap<String, String>>,
}

impl std::fmt::Debug for Translations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Translations")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl Translations {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self {
            host,
            cache: Mutex::new(AHashMap::new()),
        }
    }

    /// The localized string for `key`, or the key itself when the host has none.
    pub fn get(&self, key: &str) -> String {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(value) = cache.get(key) {
            return value.clone();
        }

        let value = self.host.translate(key).unwrap_or_else(|| key.to_owned());
        cache.insert(key.to_owned(), value.clone());
        value
    }

    pub fn clear(&self) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// One fully loaded engine: the sandbox, the rules and a snapshot of the site settings.
///
/// Not thread-safe on its own; [`ContextPool`](crate::pool::ContextPool) keeps it
/// behind the execution lock.
pub struct EvaluationContext {
    settings: Arc<SiteSettings>,
    engine: EngineSettings,
    host: Arc<dyn Host>,
    sandbox: Sandbox,
    rules: Vec<Box<dyn InlineRule>>,
    emoji: EmojiRule,
    plugins: Vec<RuleModule>,
    feature_names: Vec<String>,
    translations: Arc<Translations>,
    /// Reused Markdown output buffer.
    scratch: String,
    last_used: Instant,
    disposed: bool,
}

impl std::fmt::Debug for EvaluationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationContext")
            .field("sandbox", &self.sandbox)
            .field("plugins", &self.plugins.len())
            .field("feature_names", &self.feature_names)
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

impl EvaluationContext {
    /// Builds a context: core rules first, then every registered plugin module, compiled in order.
    pub fn initialize(
        registry: &RuleRegistry,
        host: Arc<dyn Host>,
        settings: Arc<SiteSettings>,
        engine: &EngineSettings,
    ) -> Result<Self, EngineError> {
        let started = Instant::now();
        let translations = Arc::new(Translations::new(Arc::clone(&host)));

        let mut sandbox = Sandbox::new(
            Arc::clone(&host),
            Arc::clone(&translations),
            Paths::from_settings(&settings),
            engine.fuel,
            engine.timeout(),
        );

        for module in registry.modules() {
            sandbox.load(module)?;
            debug!("Loaded {} rule module \"{}\".", module.phase, module.name);
        }

        let feature_names = CORE_FEATURES
            .iter()
            .map(|name| name.to_string())
            .chain(registry.feature_names().map(str::to_owned))
            .collect();

        info!(
            "Built evaluation context with {} plugin module(s) in {:?}.",
            registry.modules().len(),
            started.elapsed()
        );

        Ok(Self {
            rules: core_rules(&settings),
            emoji: EmojiRule::new(&settings),
            plugins: registry.modules().to_vec(),
            settings,
            engine: engine.clone(),
            host,
            sandbox,
            feature_names,
            translations,
            scratch: String::new(),
            last_used: Instant::now(),
            disposed: false,
        })
    }

    /// Appends an inline rule after the core ones, replacing any rule with the same name.
    /// Its name becomes a feature flag.
    pub fn push_rule(&mut self, rule: Box<dyn InlineRule>) {
        let name = rule.name();

        if let Some(existing) = self.rules.iter_mut().find(|existing| existing.name() == name) {
            *existing = rule;
            return;
        }

        if !self.feature_names.iter().any(|feature| feature == name) {
            self.feature_names.push(name.to_owned());
        }
        self.rules.push(rule);
    }

    /// Evaluates a free-standing expression in the sandbox.
    pub fn execute(&self, script: &str, vars: Value) -> Result<Value, EngineError> {
        let budget = Budget::new(self.engine.timeout());
        let value = self.sandbox.execute(script, vars)?;
        budget.check()?;
        Ok(value)
    }

    /// Runs the full rule chain over `text`.
    ///
    /// Plugin text modules, Markdown with the core rules, plugin HTML modules
    /// and finally the sanitizer. The deadline is checked between every step.
    pub fn render(&mut self, text: &str, options: &CookOptions) -> Result<String, EngineError> {
        let budget = Budget::new(self.engine.timeout());
        let bundle = OptionBundle::build(options, &self.settings, self.host.as_ref(), &self.feature_names);

        let mut text = text.to_owned();
        for module in enabled(&self.plugins, Phase::Text, &bundle) {
            budget.check()?;
            trace!("Running text rule \"{}\"", module.name);
            text = self.sandbox.run_rule(module, &text, &bundle)?;
        }

        budget.check()?;
        let cx = RuleContext {
            bundle: &bundle,
            host: self.host.as_ref(),
            budget: &budget,
        };
        self.scratch.clear();
        Markdown::new(&self.rules, &cx).render(&text, &mut self.scratch)?;

        let mut html = self.scratch.clone();
        for module in enabled(&self.plugins, Phase::Html, &bundle) {
            budget.check()?;
            trace!("Running HTML rule \"{}\"", module.name);
            html = self.sandbox.run_rule(module, &html, &bundle)?;
        }

        budget.check()?;
        if options.sanitize {
            html = sanitize::sanitize(&html);
        }

        self.last_used = Instant::now();
        Ok(html)
    }

    pub fn translate(&self, key: &str) -> String {
        self.translations.get(key)
    }

    pub fn reset_translations(&self) {
        debug!("Clearing cached translations.");
        self.translations.clear();
    }

    /// Drops scratch buffers and caches if the context sat idle for too long.
    pub fn collect_if_idle(&mut self) {
        let idle = self.last_used.elapsed();

        if idle > self.engine.gc_after_idle() {
            debug!("Context idle for {idle:?}, collecting.");
            self.translations.clear();
            self.scratch = String::new();
        }

        self.last_used = Instant::now();
    }

    /// Marks the context unusable. Callers still waiting on it will build a fresh one.
    pub fn dispose(&mut self) {
        info!("Disposing evaluation context.");
        self.disposed = true;
        self.translations.clear();
        self.scratch = String::new();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn settings(&self) -> &SiteSettings {
        &self.settings
    }

    pub fn avatar_img(&self, template: &str, size: u32) -> String {
        helpers::avatar_img(template, size, &Paths::from_settings(&self.settings))
    }

    pub fn unescape_emoji(&self, title: &str) -> String {
        self.emoji.unescape(title, &Paths::from_settings(&self.settings))
    }

    pub fn escape_emoji(&self, title: &str) -> String {
        self.emoji.escape(title, self.settings.enable_emoji_shortcuts)
    }
}

fn enabled<'a>(
    plugins: &'a [RuleModule],
    phase: Phase,
    bundle: &'a OptionBundle,
) -> impl Iterator<Item = &'a RuleModule> {
    plugins
        .iter()
        .filter(move |module| module.phase == phase && bundle.enabled(&module.name))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::common::NullHost;

    pub fn bundle() -> OptionBundle {
        let names: Vec<String> = CORE_FEATURES.iter().map(|name| name.to_string()).collect();
        OptionBundle::build(&CookOptions::default(), &SiteSettings::default(), &NullHost, &names)
    }

    pub fn with_context<R>(f: impl FnOnce(&RuleContext) -> R) -> R {
        with_host(NullHost, f)
    }

    pub fn with_host<H: Host, R>(host: H, f: impl FnOnce(&RuleContext) -> R) -> R {
        let bundle = bundle();
        let budget = Budget::new(Duration::from_secs(60));
        let cx = RuleContext {
            bundle: &bundle,
            host: &host,
            budget: &budget,
        };
        f(&cx)
    }
}
