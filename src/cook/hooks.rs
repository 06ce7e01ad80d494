use crate::engine::EvaluationContext;
use crate::extract::ExcerptOptions;
use crate::passes::Document;

type ContextHook = Box<dyn Fn(&mut EvaluationContext) + Send + Sync>;
type ExcerptHook = Box<dyn Fn(&mut Document, &ExcerptOptions) + Send + Sync>;
type CookedHook = Box<dyn Fn(&mut Document) + Send + Sync>;

/// Host callbacks run at fixed points of the pipeline, in registration order.
#[derive(Default)]
pub struct Hooks {
    markdown_context: Vec<ContextHook>,
    reduce_excerpt: Vec<ExcerptHook>,
    reduce_cooked: Vec<CookedHook>,
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("markdown_context", &self.markdown_context.len())
            .field("reduce_excerpt", &self.reduce_excerpt.len())
            .field("reduce_cooked", &self.reduce_cooked.len())
            .finish()
    }
}

impl Hooks {
    /// Runs on the context right before every render, with the execution lock held.
    pub fn on_markdown_context(&mut self, hook: impl Fn(&mut EvaluationContext) + Send + Sync + 'static) -> &mut Self {
        self.markdown_context.push(Box::new(hook));
        self
    }

    /// Runs on the document before an excerpt is taken.
    pub fn on_reduce_excerpt(
        &mut self,
        hook: impl Fn(&mut Document, &ExcerptOptions) + Send + Sync + 'static,
    ) -> &mut Self {
        self.reduce_excerpt.push(Box::new(hook));
        self
    }

    /// Runs on the document before it is formatted for email.
    pub fn on_reduce_cooked(&mut self, hook: impl Fn(&mut Document) + Send + Sync + 'static) -> &mut Self {
        self.reduce_cooked.push(Box::new(hook));
        self
    }

    pub(crate) fn markdown_context(&self, cx: &mut EvaluationContext) {
        self.markdown_context.iter().for_each(|hook| hook(cx));
    }

    pub(crate) fn reduce_excerpt(&self, doc: &mut Document, options: &ExcerptOptions) {
        self.reduce_excerpt.iter().for_each(|hook| hook(doc, options));
    }

    pub(crate) fn reduce_cooked(&self, doc: &mut Document) {
        self.reduce_cooked.iter().for_each(|hook| hook(doc));
    }
}
