//! Markdown to HTML conversion using pulldown-cmark.

use std::collections::HashMap;

use pulldown_cmark::{CowStr, Event, Options, Parser, Tag, TagEnd, TextMergeStream, html};

use crate::{ConvertOptions, emoji, is_root_relative};

/// Markdown to HTML converter.
///
/// Headings get GitHub-style slug ids, root-relative link and image URLs are
/// prefixed, emoji shortcodes are replaced, and paragraphs holding nothing but a template tag or images are
/// unwrapped so they keep block structure.
#[derive(Debug, Clone)]
pub struct HtmlConverter {
    options: Options,
}

impl Default for HtmlConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl HtmlConverter {
    /// Create a converter with GFM extensions enabled.
    pub fn new() -> Self {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_FOOTNOTES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);
        options.insert(Options::ENABLE_HEADING_ATTRIBUTES);

        Self { options }
    }

    /// Convert markdown source to HTML.
    pub fn convert(&self, markdown: &str, options: &ConvertOptions) -> String {
        let events: Vec<Event<'_>> = TextMergeStream::new(Parser::new_ext(markdown, self.options))
            .map(|event| prefix_links(event, &options.link_prefix))
            .collect();

        let events = unwrap_paragraphs(replace_emoji(assign_heading_ids(events)));

        let mut out = String::with_capacity(markdown.len() + markdown.len() / 2);
        html::push_html(&mut out, events.into_iter());
        out
    }
}

fn prefix_links<'a>(event: Event<'a>, prefix: &str) -> Event<'a> {
    match event {
        Event::Start(Tag::Link {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Link {
            link_type,
            dest_url: prefixed(dest_url, prefix),
            title,
            id,
        }),
        Event::Start(Tag::Image {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Image {
            link_type,
            dest_url: prefixed(dest_url, prefix),
            title,
            id,
        }),
        other => other,
    }
}

fn prefixed<'a>(url: CowStr<'a>, prefix: &str) -> CowStr<'a> {
    if prefix.is_empty() || !is_root_relative(&url) {
        return url;
    }
    CowStr::from(format!("{prefix}{}", &*url))
}

fn assign_heading_ids(mut events: Vec<Event<'_>>) -> Vec<Event<'_>> {
    let mut seen: HashMap<String, usize> = HashMap::new();

    for i in 0..events.len() {
        let Event::Start(Tag::Heading { id, .. }) = &events[i] else {
            continue;
        };
        if let Some(explicit) = id {
            seen.entry(explicit.to_string()).or_insert(1);
            continue;
        }

        let text: String = events[i + 1..]
            .iter()
            .take_while(|event| !matches!(event, Event::End(TagEnd::Heading(_))))
            .filter_map(|event| match event {
                Event::Text(text) | Event::Code(text) => Some(&**text),
                _ => None,
            })
            .collect();

        let slug = slugify(&text);
        if slug.is_empty() {
            continue;
        }
        let slug = unique_slug(slug, &mut seen);

        if let Event::Start(Tag::Heading { id, .. }) = &mut events[i] {
            *id = Some(CowStr::from(slug));
        }
    }

    events
}

/// Replace emoji shortcodes in text outside code blocks. Inline code is a
/// separate event and is never touched.
fn replace_emoji(events: Vec<Event<'_>>) -> Vec<Event<'_>> {
    let mut in_code = false;
    events
        .into_iter()
        .map(|event| match event {
            Event::Start(Tag::CodeBlock(_)) => {
                in_code = true;
                event
            }
            Event::End(TagEnd::CodeBlock) => {
                in_code = false;
                event
            }
            Event::Text(text) if !in_code => Event::Text(emoji::replace_in_text(text)),
            other => other,
        })
        .collect()
}

fn unique_slug(base: String, seen: &mut HashMap<String, usize>) -> String {
    let count = seen.entry(base.clone()).or_insert(0);
    let slug = if *count == 0 {
        base
    } else {
        format!("{base}-{count}")
    };
    *count += 1;
    slug
}

/// Convert heading text to a GitHub-style anchor slug.
pub fn slugify(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .chars()
        .filter_map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                Some(c)
            } else if c.is_whitespace() {
                Some('-')
            } else {
                None
            }
        })
        .collect()
}

enum ParagraphKind {
    TemplateTag(String),
    ImagesOnly,
    Regular,
}

fn unwrap_paragraphs(events: Vec<Event<'_>>) -> Vec<Event<'_>> {
    let mut out = Vec::with_capacity(events.len());
    let mut iter = events.into_iter();

    while let Some(event) = iter.next() {
        if !matches!(event, Event::Start(Tag::Paragraph)) {
            out.push(event);
            continue;
        }

        let inner: Vec<Event<'_>> = iter
            .by_ref()
            .take_while(|event| !matches!(event, Event::End(TagEnd::Paragraph)))
            .collect();

        match classify(&inner) {
            ParagraphKind::TemplateTag(tag) => {
                out.push(Event::Html(CowStr::from(format!("{tag}\n"))));
            }
            ParagraphKind::ImagesOnly => out.extend(inner),
            ParagraphKind::Regular => {
                out.push(Event::Start(Tag::Paragraph));
                out.extend(inner);
                out.push(Event::End(TagEnd::Paragraph));
            }
        }
    }

    out
}

fn classify(inner: &[Event<'_>]) -> ParagraphKind {
    let mut text = String::new();
    let mut text_only = true;
    let mut image_depth = 0usize;
    let mut images = 0usize;
    let mut images_only = true;

    for event in inner {
        match event {
            Event::Text(t) => text.push_str(t),
            Event::SoftBreak => text.push('\n'),
            _ => text_only = false,
        }

        match event {
            Event::Start(Tag::Image { .. }) => {
                image_depth += 1;
                images += 1;
            }
            Event::End(TagEnd::Image) => image_depth = image_depth.saturating_sub(1),
            _ if image_depth > 0 => {}
            Event::Text(t) if t.trim().is_empty() => {}
            Event::SoftBreak | Event::HardBreak => {}
            Event::Start(Tag::Link { .. }) | Event::End(TagEnd::Link) => {}
            _ => images_only = false,
        }
    }

    let trimmed = text.trim();
    if text_only && is_template_tag(trimmed) {
        ParagraphKind::TemplateTag(trimmed.to_string())
    } else if images > 0 && images_only {
        ParagraphKind::ImagesOnly
    } else {
        ParagraphKind::Regular
    }
}

/// Whether `text` is exactly one `{% ... %}` block tag.
fn is_template_tag(text: &str) -> bool {
    text.strip_prefix("{%")
        .and_then(|rest| rest.strip_suffix("%}"))
        .is_some_and(|inner| !inner.contains('}'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convert(markdown: &str) -> String {
        HtmlConverter::new().convert(markdown, &ConvertOptions::default())
    }

    fn convert_prefixed(markdown: &str, prefix: &str) -> String {
        HtmlConverter::new().convert(markdown, &ConvertOptions::with_link_prefix(prefix))
    }

    #[test]
    fn test_simple_markdown() {
        let html = convert("# Hello World\n\nThis is a test.");

        assert!(html.contains("<h1 id=\"hello-world\">Hello World</h1>"));
        assert!(html.contains("<p>This is a test.</p>"));
    }

    #[test]
    fn test_duplicate_heading_ids() {
        let html = convert("## Notes\n\n## Notes\n\n## Notes");

        assert!(html.contains("id=\"notes\""));
        assert!(html.contains("id=\"notes-1\""));
        assert!(html.contains("id=\"notes-2\""));
    }

    #[test]
    fn test_explicit_heading_id_kept() {
        let html = convert("# Title {#custom}");
        assert!(html.contains("id=\"custom\""));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hello World"), "hello-world");
        assert_eq!(slugify("Test 123 Post"), "test-123-post");
        assert_eq!(slugify("What's new?"), "whats-new");
        assert_eq!(slugify("snake_case-name"), "snake_case-name");
    }

    #[test]
    fn test_link_prefix() {
        let html = convert_prefixed(
            "[a](/about) [b](//cdn.example.com/x) [c](https://example.com/) [d](rel/path)",
            "/blog",
        );

        assert!(html.contains("href=\"/blog/about\""));
        assert!(html.contains("href=\"//cdn.example.com/x\""));
        assert!(html.contains("href=\"https://example.com/\""));
        assert!(html.contains("href=\"rel/path\""));
    }

    #[test]
    fn test_image_prefix() {
        let html = convert_prefixed("Look: ![alt](/img/a.png)", "/blog");
        assert!(html.contains("src=\"/blog/img/a.png\""));
    }

    #[test]
    fn test_empty_prefix_leaves_links() {
        let html = convert("[a](/about)");
        assert!(html.contains("href=\"/about\""));
    }

    #[test]
    fn test_unwrap_template_tag_paragraph() {
        let html = convert("{% for p in pages %}\n\n- {{ p.title }}\n\n{% endfor %}");

        assert!(!html.contains("<p>{%"));
        assert!(html.contains("{% for p in pages %}\n"));
        assert!(html.contains("{% endfor %}\n"));
        assert!(html.contains("<li>{{ p.title }}</li>"));
    }

    #[test]
    fn test_mixed_paragraph_not_unwrapped() {
        let html = convert("Text {% if x %} more");
        assert!(html.contains("<p>Text {% if x %} more</p>"));

        let html = convert("{% if x %}yes{% endif %}");
        assert!(html.contains("<p>"));
    }

    #[test]
    fn test_unwrap_image_paragraph() {
        let html = convert("![one](a.png)\n![two](b.png)");

        assert!(!html.contains("<p>"));
        assert!(html.contains("<img src=\"a.png\" alt=\"one\" />"));
        assert!(html.contains("<img src=\"b.png\" alt=\"two\" />"));
    }

    #[test]
    fn test_gfm_extensions() {
        let html = convert(
            "| A | B |\n|---|---|\n| 1 | 2 |\n\n~~gone~~\n\n- [x] Done\n- [ ] Todo\n\nNote[^1]\n\n[^1]: Footnote.",
        );

        assert!(html.contains("<table>"));
        assert!(html.contains("<del>gone</del>"));
        assert!(html.contains("checkbox"));
        assert!(html.contains("checked"));
        assert!(html.contains("footnote"));
    }

    #[test]
    fn test_emoji_shortcodes_outside_code() {
        let html = convert("## Launch :rocket:\n\nShipped :tada: `:tada:`\n\n```\n:tada:\n```");

        assert!(html.contains("id=\"launch-rocket\">Launch 🚀</h2>"));
        assert!(html.contains("<p>Shipped 🎉 <code>:tada:</code></p>"));
        assert!(html.contains("<pre><code>:tada:\n</code></pre>"));
    }

    #[test]
    fn test_raw_html_is_trusted() {
        let html = convert("<div class=\"box\">raw</div>");
        assert!(html.contains("<div class=\"box\">raw</div>"));
    }
}
