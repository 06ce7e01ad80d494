//! Kiln turns untrusted, user-authored forum markup into sanitized HTML.
//!
//! The pipeline is split into four layers:
//! - [`engine`]: the sandboxed rule engine that renders markup into raw HTML.
//! - [`pool`]: the process-wide, lazily built and resettable engine context.
//! - [`cook`]: the entry point that glues the engine to the post-processing [`passes`].
//! - [`extract`]: read-only utilities over HTML that has already been cooked.

pub mod common;
pub mod cook;
pub mod engine;
pub mod error;
pub mod extract;
pub mod passes;
pub mod pool;

pub use common::{Config, Host, MentionKind, NullHost, SiteSettings, StaticHost};
pub use cook::{Cooker, Hooks};
pub use engine::options::CookOptions;
pub use error::EngineError;
pub use extract::{excerpt, extract_links, extract_mentions, DetectedLink, ExcerptOptions};

pub mod prelude {
    pub use color_eyre::eyre::{bail, eyre, ContextCompat, Report, Result, WrapErr};
    pub use color_eyre::Section;
    pub use tracing::{debug, error, info, trace, warn};

    pub use crate::common::*;
}
