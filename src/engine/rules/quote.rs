//! BBCode-style `[quote]` blocks.
//!
//! Quotes are lifted out of the raw markup before Markdown runs and replaced
//! with placeholders. Each body is cooked on its own and spliced back into the
//! rendered HTML.

use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_while, take_while1},
    character::complete::{char, space0},
    combinator::opt,
    multi::many0,
    sequence::{delimited, preceded, separated_pair, terminated},
    IResult,
};

use super::RuleContext;
use crate::common::{escape_attr, escape_text};
use crate::engine::helpers::avatar_img;
use crate::engine::Budget;
use crate::error::EngineError;

/// Marks the boundaries of a placeholder. Stripped from user input up front.
pub const PLACEHOLDER: char = '\u{FFFC}';

const OPEN: &str = "[quote";
const CLOSE: &str = "[/quote]";

const AVATAR_SIZE: u32 = 24;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct QuoteAttributes {
    pub username: Option<String>,
    pub post: Option<u64>,
    pub topic: Option<u64>,
    pub full: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub attributes: QuoteAttributes,
    /// The quoted markup, with placeholders standing in for `nested`.
    pub body: String,
    pub nested: Vec<Quote>,
}

pub fn placeholder(index: usize) -> String {
    format!("{PLACEHOLDER}{index}{PLACEHOLDER}")
}

/// `[quote]`, `[quote=alice]` or `[quote="alice, post:3, topic:7"]`.
fn opening(i: &str) -> IResult<&str, Option<&str>> {
    let quoted = delimited(char('"'), take_while(|c: char| c != '"' && c != '\n'), char('"'));
    let bare = take_while1(|c: char| c != ']' && c != '\n');

    delimited(
        tag_no_case(OPEN),
        opt(preceded(char('='), alt((quoted, bare)))),
        char(']'),
    )(i)
}

fn pair(i: &str) -> IResult<&str, (&str, &str)> {
    preceded(
        terminated(char(','), space0),
        separated_pair(
            take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_'),
            char(':'),
            take_while1(|c: char| c != ','),
        ),
    )(i)
}

fn attributes(i: &str) -> IResult<&str, (&str, Vec<(&str, &str)>)> {
    let (i, username) = take_while(|c: char| c != ',')(i)?;
    let (i, pairs) = many0(pair)(i)?;

    Ok((i, (username, pairs)))
}

pub fn parse_attributes(source: &str) -> QuoteAttributes {
    let Ok((_, (username, pairs))) = attributes(source) else {
        return QuoteAttributes::default();
    };

    let mut parsed = QuoteAttributes {
        username: Some(username.trim())
            .filter(|name| !name.is_empty())
            .map(str::to_owned),
        ..QuoteAttributes::default()
    };

    for (key, value) in pairs {
        let value = value.trim();
        match key {
            "post" => parsed.post = value.parse().ok(),
            "topic" => parsed.topic = value.parse().ok(),
            "full" => parsed.full = value == "true",
            _ => {}
        }
    }

    parsed
}

/// Quotes nested deeper than this are left as literal text inside the innermost rendered one.
pub const MAX_DEPTH: usize = 32;

/// A matched `[quote...]` / `[/quote]` pair, as byte offsets into the source.
struct Span<'t> {
    start: usize,
    body: usize,
    close: usize,
    attributes: Option<&'t str>,
}

/// Pairs every opening with its closing tag in one pass over the text.
/// Unterminated openings and stray closings pair with nothing.
fn spans<'t>(text: &'t str, budget: &Budget) -> Result<Vec<Span<'t>>, EngineError> {
    // ASCII lowercasing keeps byte offsets intact.
    let lower = text.to_ascii_lowercase();
    let mut open: Vec<(usize, usize, Option<&'t str>)> = Vec::new();
    let mut spans = Vec::new();
    let mut cursor = 0;

    while let Some(found) = lower[cursor..].find('[') {
        budget.check()?;
        let at = cursor + found;
        cursor = at + 1;

        if lower[at..].starts_with(CLOSE) {
            if let Some((start, body, attributes)) = open.pop() {
                spans.push(Span {
                    start,
                    body,
                    close: at,
                    attributes,
                });
            }
            cursor = at + CLOSE.len();
        } else if lower[at..].starts_with(OPEN) {
            if let Ok((remaining, attributes)) = opening(&text[at..]) {
                let body = text.len() - remaining.len();
                open.push((at, body, attributes));
                cursor = body;
            }
        }
    }

    spans.sort_unstable_by_key(|span| span.start);
    Ok(spans)
}

/// A quote being assembled: its body so far, and the offset copied up to.
struct Level {
    start: usize,
    close: usize,
    attributes: QuoteAttributes,
    body: String,
    nested: Vec<Quote>,
    last: usize,
}

impl Level {
    fn splice(&mut self, text: &str, child: Level) {
        let Level {
            start,
            close,
            attributes,
            mut body,
            nested,
            last,
        } = child;
        body.push_str(&text[last..close]);

        self.body.push_str(&text[self.last..start]);
        self.body.push_str("\n\n");
        self.body.push_str(&placeholder(self.nested.len()));
        self.body.push_str("\n\n");
        self.nested.push(Quote {
            attributes,
            body: body.trim_matches('\n').to_owned(),
            nested,
        });
        self.last = close + CLOSE.len();
    }
}

/// Lifts every quote out of `text`, leaving numbered placeholders behind.
///
/// Each returned quote carries its own body with placeholders for the quotes
/// nested inside it. Openings that don't start a line (or the body of the
/// enclosing quote) still pair with a closing tag but stay literal text, as do
/// unterminated ones.
pub fn extract(text: &str, budget: &Budget) -> Result<(String, Vec<Quote>), EngineError> {
    let spans = spans(text, budget)?;

    let mut levels = vec![Level {
        start: 0,
        close: text.len(),
        attributes: QuoteAttributes::default(),
        body: String::with_capacity(text.len()),
        nested: Vec::new(),
        last: 0,
    }];
    // Every enclosing span, literal or not: (close, body start, extracted).
    let mut frames: Vec<(usize, usize, bool)> = Vec::new();

    for span in spans {
        budget.check()?;

        while let Some(&(close, _, extracted)) = frames.last() {
            if close > span.start {
                break;
            }
            frames.pop();
            if extracted {
                close_level(text, &mut levels);
            }
        }

        let from = frames.last().map_or(0, |&(_, body, _)| body);
        let extracted = levels.len() <= MAX_DEPTH && (span.start == from || at_line_start(text, span.start));

        if extracted {
            levels.push(Level {
                start: span.start,
                close: span.close,
                attributes: span.attributes.map(parse_attributes).unwrap_or_default(),
                body: String::new(),
                nested: Vec::new(),
                last: span.body,
            });
        }
        frames.push((span.close, span.body, extracted));
    }

    while let Some((_, _, extracted)) = frames.pop() {
        if extracted {
            close_level(text, &mut levels);
        }
    }

    let Some(mut root) = levels.pop() else {
        return Ok((text.to_owned(), Vec::new()));
    };
    root.body.push_str(&text[root.last..]);
    Ok((root.body, root.nested))
}

fn close_level(text: &str, levels: &mut Vec<Level>) {
    if let Some(child) = levels.pop() {
        if let Some(parent) = levels.last_mut() {
            parent.splice(text, child);
        }
    }
}

fn at_line_start(text: &str, offset: usize) -> bool {
    offset == 0 || text[..offset].ends_with('\n')
}

/// Renders a quote around its already-cooked body.
pub fn render(attributes: &QuoteAttributes, inner: &str, cx: &RuleContext) -> String {
    let mut data = String::new();
    if let Some(username) = &attributes.username {
        data.push_str(&format!(" data-username=\"{}\"", escape_attr(username)));
    }
    if let Some(post) = attributes.post {
        data.push_str(&format!(" data-post=\"{post}\""));
    }
    if let Some(topic) = attributes.topic {
        data.push_str(&format!(" data-topic=\"{topic}\""));
    }
    if attributes.full {
        data.push_str(" data-full=\"true\"");
    }

    let title = title(attributes, cx);

    format!(
        "<aside class=\"quote no-group\"{data}>\n{title}<blockquote>\n{}\n</blockquote>\n</aside>",
        inner.trim_end_matches('\n')
    )
}

fn title(attributes: &QuoteAttributes, cx: &RuleContext) -> String {
    let options = &cx.bundle.options;
    let paths = &cx.bundle.paths;

    let avatar = attributes
        .username
        .as_deref()
        .and_then(|name| cx.host.lookup_avatar(name))
        .map(|template| avatar_img(&template, AVATAR_SIZE, paths))
        .unwrap_or_default();

    let linked = attributes
        .topic
        .filter(|topic| options.force_quote_link || options.topic_id != Some(*topic))
        .and_then(|topic| cx.host.topic_info(topic));

    let heading = match (linked, &attributes.username) {
        (Some(info), _) => {
            let mut href = format!("/t/{}/{}", info.slug(), info.id);
            if let Some(post) = attributes.post {
                href.push_str(&format!("/{post}"));
            }
            format!(
                "<a href=\"{}\">{}</a>",
                escape_attr(&paths.get_url(&href)),
                escape_text(&info.title)
            )
        }
        (None, Some(username)) => format!("{}:", escape_text(username)),
        (None, None) => return String::new(),
    };

    let separator = if avatar.is_empty() { "" } else { " " };

    format!(
        "<div class=\"title\">\n<div class=\"quote-controls\"></div>\n{avatar}{separator}{heading}</div>\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Directory, StaticHost, TopicInfo, UserRecord};
    use crate::engine::test_support::{with_context, with_host};
    use indoc::indoc;
    use std::time::Duration;

    #[test]
    fn attributes() {
        let parsed = parse_attributes("alice, post:3, topic:7, full:true");
        assert_eq!(
            parsed,
            QuoteAttributes {
                username: Some("alice".into()),
                post: Some(3),
                topic: Some(7),
                full: true,
            }
        );

        assert_eq!(parse_attributes("bob").username.as_deref(), Some("bob"));
        assert_eq!(parse_attributes("").username, None);
        assert_eq!(parse_attributes("carol, post:x").post, None);
    }

    #[test]
    fn openings() {
        assert_eq!(opening("[quote]rest"), Ok(("rest", None)));
        assert_eq!(opening("[QUOTE=alice]"), Ok(("", Some("alice"))));
        assert_eq!(
            opening("[quote=\"alice, post:1, topic:2\"]\nbody"),
            Ok(("\nbody", Some("alice, post:1, topic:2")))
        );
        assert!(opening("[quotes]").is_err());
    }

    fn budget() -> Budget {
        Budget::new(Duration::from_secs(60))
    }

    #[test]
    fn extract_nested() {
        let source = indoc! {"
            before
            [quote=\"alice, post:1, topic:2\"]
            outer
            [quote=bob]
            inner
            [/quote]
            [/quote]
            after"};

        let (text, quotes) = extract(source, &budget()).unwrap();

        assert_eq!(text, format!("before\n\n\n{}\n\n\nafter", placeholder(0)));
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].body, format!("outer\n\n\n{}", placeholder(0)));
        assert_eq!(quotes[0].attributes.topic, Some(2));

        let nested = &quotes[0].nested;
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].body, "inner");
        assert_eq!(nested[0].attributes.username.as_deref(), Some("bob"));
    }

    #[test]
    fn extract_siblings_and_body_start() {
        let (text, quotes) = extract("[quote=a]one[/quote]\n[quote=b][quote=c]two[/quote][/quote]", &budget()).unwrap();

        assert_eq!(text, format!("\n\n{}\n\n\n\n\n{}\n\n", placeholder(0), placeholder(1)));
        assert_eq!(quotes[0].body, "one");
        assert_eq!(quotes[1].body, placeholder(0));
        assert_eq!(quotes[1].nested[0].body, "two");
    }

    #[test]
    fn extract_ignores_unterminated_and_inline() {
        let (text, quotes) = extract("[quote]never closed", &budget()).unwrap();
        assert_eq!(text, "[quote]never closed");
        assert!(quotes.is_empty());

        let (text, quotes) = extract("inline [quote]x[/quote]", &budget()).unwrap();
        assert_eq!(text, "inline [quote]x[/quote]");
        assert!(quotes.is_empty());

        // An inline pair still owns its closing tag.
        let source = "[quote=a]\nsee [quote]x[/quote] here\n[/quote]";
        let (_, quotes) = extract(source, &budget()).unwrap();
        assert_eq!(quotes[0].body, "see [quote]x[/quote] here");

        let (_, quotes) = extract("[Quote]x[/QUOTE] [/quote]", &budget()).unwrap();
        assert_eq!(quotes[0].body, "x");
    }

    #[test]
    fn deep_nesting_is_capped() {
        let depth = 5_000;
        let source = format!("{}core{}", "[quote]\n".repeat(depth), "\n[/quote]".repeat(depth));

        let (_, quotes) = extract(&source, &budget()).unwrap();

        let mut levels = 0;
        let mut current = &quotes;
        while let Some(quote) = current.first() {
            levels += 1;
            current = &quote.nested;
        }
        assert_eq!(levels, MAX_DEPTH);
    }

    #[test]
    fn extraction_respects_the_budget() {
        let source = "[quote]\n".repeat(1_000);
        let expired = Budget::new(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(1));

        assert!(matches!(
            extract(&source, &expired),
            Err(EngineError::Timeout { .. })
        ));
    }

    #[test]
    fn render_plain() {
        with_context(|cx| {
            let attributes = parse_attributes("alice, post:3, topic:7");
            let html = render(&attributes, "<p>hi</p>", cx);

            assert_eq!(
                html,
                indoc! {r#"
                    <aside class="quote no-group" data-username="alice" data-post="3" data-topic="7">
                    <div class="title">
                    <div class="quote-controls"></div>
                    alice:</div>
                    <blockquote>
                    <p>hi</p>
                    </blockquote>
                    </aside>"#}
            );
        });
    }

    #[test]
    fn render_linked() {
        let host = StaticHost::new(Directory {
            topics: vec![TopicInfo {
                id: 7,
                title: "Kiln & friends".into(),
                slug: None,
            }],
            users: vec![UserRecord {
                id: 1,
                username: "alice".into(),
                name: None,
                avatar_template: Some("/avatars/alice/{size}.png".into()),
                staged: false,
            }],
            ..Directory::default()
        });

        with_host(host, |cx| {
            let attributes = parse_attributes("alice, post:3, topic:7");
            let html = render(&attributes, "<p>hi</p>", cx);

            assert!(html.contains(
                "<img loading=\"lazy\" alt=\"\" width=\"24\" height=\"24\" src=\"/avatars/alice/48.png\" class=\"avatar\"> \
                 <a href=\"/t/kiln-friends/7/3\">Kiln &amp; friends</a></div>"
            ));
        });
    }
}
