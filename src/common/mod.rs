//! Types, functions, constants and other items that are globally relevant throughout the Kiln codebase.

mod args;
mod config;
mod host;

pub use args::*;
pub use config::*;
pub use host::*;

pub const CONFIG_FILENAME: &str = "kiln.toml";

/// Environment variable consulted for the tracing filter.
pub const LOG_ENV: &str = "KILN_LOG";

/// Prefix applied to every message a sandboxed script logs.
pub const SCRIPT_LOG_PREFIX: &str = "[kiln] ";

/// Hashtag context used when the caller doesn't supply one.
pub const DEFAULT_HASHTAG_CONTEXT: &str = "topic-composer";

/// Translation key for the tooltip on escaped bidi characters.
pub const BIDI_TITLE_KEY: &str = "post.hidden_bidi_character";

/// Translation key for the notice that replaces secure media in email.
pub const SECURE_UPLOAD_NOTICE_KEY: &str = "emails.secure_uploads_placeholder";
/// Translation key for the link text pointing back to the redacted media.
pub const SECURE_UPLOAD_LINK_KEY: &str = "emails.view_redacted_media";

/// Attribute that receives a blocked `src` value.
pub const BLOCKED_HOTLINKED_SRC_ATTR: &str = "data-blocked-hotlinked-src";
/// Attribute that receives a blocked `srcset` value.
pub const BLOCKED_HOTLINKED_SRCSET_ATTR: &str = "data-blocked-hotlinked-srcset";

/// Bidirectional control characters that can be used to visually spoof code.
pub const DANGEROUS_BIDI_CHARACTERS: &[char] = &[
    '\u{202A}', '\u{202B}', '\u{202C}', '\u{202D}', '\u{202E}',
    '\u{2066}', '\u{2067}', '\u{2068}', '\u{2069}',
];

/// Escapes a string for use inside a double-quoted HTML attribute.
pub fn escape_attr(value: &str) -> std::borrow::Cow<'_, str> {
    html_escape::encode_double_quoted_attribute(value)
}

/// Escapes a string for use as HTML text content.
pub fn escape_text(value: &str) -> std::borrow::Cow<'_, str> {
    html_escape::encode_text(value)
}
