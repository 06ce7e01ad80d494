use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Arguments {
    /// Path to the configuration file. Defaults are used when omitted.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Cook one or more markup files into HTML.
    Cook(CookArgs),
    /// List the links found in a cooked HTML file.
    Links {
        /// The cooked HTML file.
        file: PathBuf,
    },
    /// List the usernames and groups mentioned in a cooked HTML file.
    Mentions {
        /// The cooked HTML file.
        file: PathBuf,
    },
    /// Print a plain-text excerpt of a cooked HTML file.
    Excerpt {
        /// The cooked HTML file.
        file: PathBuf,
        /// Maximum number of visible characters.
        #[arg(short, long, default_value_t = 300)]
        length: usize,
        /// Keep emoji images instead of replacing them with their `:name:` text.
        #[arg(long)]
        keep_emoji: bool,
        /// Render other images as Markdown instead of dropping them.
        #[arg(long)]
        markdown_images: bool,
        /// Print decoded text instead of HTML.
        #[arg(long)]
        decode: bool,
    },
    /// Reformat a cooked HTML file for inclusion in an email.
    Email {
        /// The cooked HTML file.
        file: PathBuf,
    },
}

#[derive(Debug, Args)]
pub struct CookArgs {
    /// Markup files to cook. Each result is printed in order.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
    /// Skip the allowlist sanitizer. Only for trusted, system-generated content.
    #[arg(long)]
    pub no_sanitize: bool,
    /// Topic the text belongs to.
    #[arg(long)]
    pub topic_id: Option<u64>,
    /// Author of the text.
    #[arg(long)]
    pub user_id: Option<u64>,
    /// Always link quotes to their topic.
    #[arg(long)]
    pub force_quote_link: bool,
    /// Print the raw engine output without post-processing.
    #[arg(long)]
    pub raw: bool,
}
