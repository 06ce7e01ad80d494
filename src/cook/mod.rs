//! The cook pipeline: engine output, then the post-processing passes.

mod hooks;

pub use hooks::Hooks;

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::common::{
    EngineSettings, Host, SiteSettings, BIDI_TITLE_KEY, SECURE_UPLOAD_LINK_KEY, SECURE_UPLOAD_NOTICE_KEY,
};
use crate::engine::options::CookOptions;
use crate::engine::registry::RuleRegistry;
use crate::engine::EvaluationContext;
use crate::error::EngineError;
use crate::extract::{self, ExcerptOptions};
use crate::passes::{self, post_process, Document, PassConfig, SecureUploadNotice};
use crate::pool::ContextPool;
use crate::prelude::*;

/// Turns raw markup into cooked HTML.
///
/// Cheap to share between threads. Engine calls are serialized through one
/// [`ContextPool`]; the passes run concurrently on per-call data.
pub struct Cooker {
    pool: ContextPool,
    settings: Arc<ArcSwap<SiteSettings>>,
    host: Arc<dyn Host>,
    hooks: Arc<Hooks>,
}

impl std::fmt::Debug for Cooker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cooker")
            .field("pool", &self.pool)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl Cooker {
    pub fn new(
        settings: SiteSettings,
        engine: EngineSettings,
        registry: RuleRegistry,
        host: Arc<dyn Host>,
    ) -> Self {
        Self::with_hooks(settings, engine, registry, host, Hooks::default())
    }

    pub fn with_hooks(
        settings: SiteSettings,
        engine: EngineSettings,
        registry: RuleRegistry,
        host: Arc<dyn Host>,
        hooks: Hooks,
    ) -> Self {
        let settings = Arc::new(ArcSwap::from_pointee(settings));
        let hooks = Arc::new(hooks);

        let pool = {
            let settings = Arc::clone(&settings);
            let host = Arc::clone(&host);

            ContextPool::new(move || {
                EvaluationContext::initialize(&registry, Arc::clone(&host), settings.load_full(), &engine)
            })
        };

        Self {
            pool,
            settings,
            host,
            hooks,
        }
    }

    /// Cooks `text` into sanitized, post-processed HTML.
    ///
    /// Nothing partial is returned: if the engine fails, so does the call.
    pub fn cook(&self, text: &str, options: &CookOptions) -> Result<String, EngineError> {
        trace!("Cooking {} bytes of markup.", text.len());

        let (html, bidi_title) = self.pool.protect(|cx| -> Result<_, EngineError> {
            self.hooks.markdown_context(cx);
            let html = cx.render(text, options)?;
            Ok((html, cx.translate(BIDI_TITLE_KEY)))
        })??;

        trace!("Rendered markup, running passes.");
        let mut doc = Document::parse(html);
        let settings = self.settings.load();
        let config = PassConfig::new(&settings, options, Arc::clone(&self.host), bidi_title);
        post_process(&mut doc, &config);

        debug!("Cooked {} bytes into {} bytes of HTML.", text.len(), doc.as_str().len());
        Ok(doc.into_string())
    }

    /// The raw engine output, before any pass runs.
    pub fn markdown(&self, text: &str, options: &CookOptions) -> Result<String, EngineError> {
        self.pool.protect(|cx| {
            self.hooks.markdown_context(cx);
            cx.render(text, options)
        })?
    }

    /// Drops the engine context. Settings, rules and translations are picked up on the next call.
    pub fn reset(&self) {
        self.pool.reset();
    }

    pub fn reset_translations(&self) {
        self.pool.reset_translations();
    }

    /// Replaces the site settings. The passes see them right away; the engine only after [`Cooker::reset`].
    pub fn set_settings(&self, settings: SiteSettings) {
        self.settings.store(Arc::new(settings));
    }

    /// [`Cooker::set_settings`] followed by [`Cooker::reset`].
    pub fn apply_settings(&self, settings: SiteSettings) {
        self.set_settings(settings);
        self.reset();
    }

    pub fn settings(&self) -> Arc<SiteSettings> {
        self.settings.load_full()
    }

    pub fn avatar_img(&self, template: &str, size: u32) -> Result<String, EngineError> {
        self.pool.protect(|cx| cx.avatar_img(template, size))
    }

    /// Replaces `:name:` codes in an already-escaped title with emoji images.
    pub fn unescape_emoji(&self, title: &str) -> Result<String, EngineError> {
        self.pool.protect(|cx| cx.unescape_emoji(title))
    }

    /// Replaces shortcuts and Unicode emoji in a title with `:name:` codes.
    pub fn escape_emoji(&self, title: &str) -> Result<String, EngineError> {
        self.pool.protect(|cx| cx.escape_emoji(title))
    }

    /// Evaluates a free-standing expression in the sandbox.
    pub fn execute(&self, script: &str, vars: minijinja::Value) -> Result<minijinja::Value, EngineError> {
        self.pool.protect(|cx| cx.execute(script, vars))?
    }

    /// Reformats cooked HTML for mail clients.
    ///
    /// Media the host reports as secure is replaced with a notice linking back to it.
    pub fn format_for_email(&self, html: &str) -> String {
        let mut doc = Document::parse(html);

        self.hooks.reduce_cooked(&mut doc);

        let text = self.localized(SECURE_UPLOAD_NOTICE_KEY);
        let link = self.localized(SECURE_UPLOAD_LINK_KEY);
        let notice = SecureUploadNotice { text: &text, link: &link };
        passes::strip_secure_uploads(&mut doc, self.host.as_ref(), &notice);

        passes::strip_image_wrapping(&mut doc);
        passes::convert_vimeo_iframes(&mut doc);
        passes::make_all_links_absolute(&mut doc, &self.settings.load().base_url);

        doc.into_string()
    }

    fn localized(&self, key: &str) -> String {
        self.host.translate(key).unwrap_or_else(|| key.to_owned())
    }

    pub fn strip_links(&self, html: &str) -> String {
        let mut doc = Document::parse(html);
        passes::strip_links(&mut doc);
        doc.into_string()
    }

    /// [`extract::excerpt`] with this cooker's hooks.
    pub fn excerpt(&self, html: &str, max_length: usize, options: &ExcerptOptions) -> String {
        extract::excerpt(html, max_length, options, &self.hooks)
    }
}
