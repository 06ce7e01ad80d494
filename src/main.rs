#![warn(clippy::perf, clippy::style, clippy::cargo, warnings)]

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use rayon::prelude::*;
use tracing_error::ErrorLayer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kiln::common::{Arguments, Command, Config, CookArgs, StaticHost, CONFIG_FILENAME, LOG_ENV};
use kiln::engine::registry::RuleRegistry;
use kiln::prelude::*;
use kiln::{extract_links, extract_mentions, CookOptions, Cooker, ExcerptOptions};

fn main() -> Result<()> {
    install_logging();
    color_eyre::install()?;

    let args = Arguments::parse();
    let config = load_config(args.config.as_deref())?;

    match args.command {
        Command::Cook(cook_args) => cook(config, cook_args),
        Command::Links { file } => {
            let html = read(&file)?;
            for link in &extract_links(&html) {
                match link.is_quote {
                    true => println!("{}\tquote", link.url),
                    false => println!("{}", link.url),
                }
            }
            Ok(())
        }
        Command::Mentions { file } => {
            let html = read(&file)?;
            let mut mentions: Vec<_> = extract_mentions(&html).into_iter().collect();
            mentions.sort();
            mentions.iter().for_each(|name| println!("{name}"));
            Ok(())
        }
        Command::Excerpt {
            file,
            length,
            keep_emoji,
            markdown_images,
            decode,
        } => {
            let html = read(&file)?;
            let options = ExcerptOptions {
                keep_emoji_images: keep_emoji,
                markdown_images,
                decode_entities: decode,
            };
            println!("{}", build_cooker(config)?.excerpt(&html, length, &options));
            Ok(())
        }
        Command::Email { file } => {
            let html = read(&file)?;
            println!("{}", build_cooker(config)?.format_for_email(&html));
            Ok(())
        }
    }
}

fn install_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .with(ErrorLayer::default())
        .init();
}

/// An explicit `--config` must exist; otherwise `kiln.toml` in the working directory is used if present.
fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_path(path),
        None if Path::new(CONFIG_FILENAME).exists() => Config::from_path(Path::new(CONFIG_FILENAME)),
        None => {
            debug!("No {CONFIG_FILENAME} found, using the default configuration.");
            Ok(Config::default())
        }
    }
}

fn build_cooker(config: Config) -> Result<Cooker> {
    let registry = RuleRegistry::discover(&config.engine.plugin_dirs)
        .wrap_err("Could not load plugin rules.")
        .suggestion("Check that every directory in engine.plugin_dirs is readable.")?;

    if registry.is_empty() {
        debug!("No plugin rules registered.");
    }

    let host = Arc::new(StaticHost::new(config.directory));
    Ok(Cooker::new(config.site, config.engine, registry, host))
}

fn cook(config: Config, args: CookArgs) -> Result<()> {
    let cooker = build_cooker(config)?;

    let mut options = CookOptions::default();
    if args.no_sanitize {
        options = options.without_sanitizer();
    }
    if let Some(id) = args.topic_id {
        options = options.topic_id(id);
    }
    if let Some(id) = args.user_id {
        options = options.user_id(id);
    }
    if args.force_quote_link {
        options = options.force_quote_link();
    }

    info!("Cooking {} file(s)...", args.files.len());

    let results: Vec<Result<String>> = args
        .files
        .par_iter()
        .map(|path| {
            let source = read(path)?;
            let html = match args.raw {
                true => cooker.markdown(&source, &options),
                false => cooker.cook(&source, &options),
            };
            html.wrap_err_with(|| format!("Could not cook \"{}\".", path.display()))
        })
        .collect();

    for result in results {
        print!("{}", result?);
    }

    Ok(())
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .wrap_err_with(|| format!("Could not read \"{}\".", path.display()))
        .suggestion("Check that the file exists and is valid UTF-8.")
}
