//! Read-only utilities over HTML that has already been cooked.

mod excerpt;
mod links;
mod mentions;

pub use excerpt::{excerpt, ExcerptOptions};
pub use links::{extract_links, DetectedLink, LinkExtractor, Links};
pub use mentions::extract_mentions;
