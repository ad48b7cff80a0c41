//! Markdown to Gemtext conversion.
//!
//! Gemtext has no inline markup, so emphasis is dropped and links are moved
//! onto `=> url label` lines emitted after the block that contains them.

use pulldown_cmark::{
    CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd, TextMergeStream,
};

use crate::{ConvertOptions, emoji, is_root_relative};

/// Markdown to Gemtext converter.
#[derive(Debug, Clone)]
pub struct GemtextConverter {
    options: Options,
}

impl Default for GemtextConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl GemtextConverter {
    /// Create a converter with GFM extensions enabled.
    pub fn new() -> Self {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_FOOTNOTES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);

        Self { options }
    }

    /// Convert markdown source to Gemtext.
    pub fn convert(&self, markdown: &str, options: &ConvertOptions) -> String {
        let mut writer = GemtextWriter::new(&options.link_prefix);
        for event in TextMergeStream::new(Parser::new_ext(markdown, self.options)) {
            writer.event(event);
        }
        writer.finish()
    }
}

/// A link or image whose end tag has not been seen yet.
struct OpenLink {
    url: String,
    label: String,
    start: usize,
    epoch: usize,
}

struct GemtextWriter<'p> {
    link_prefix: &'p str,
    blocks: Vec<String>,
    lines: Vec<String>,
    text: String,
    links: Vec<String>,
    open_links: Vec<OpenLink>,
    /// Bumped whenever `text` is taken, so stale offsets can be detected.
    text_epoch: usize,
    list_depth: usize,
    quote_depth: usize,
    code: Option<(String, String)>,
    row: Vec<String>,
}

impl<'p> GemtextWriter<'p> {
    fn new(link_prefix: &'p str) -> Self {
        Self {
            link_prefix,
            blocks: Vec::new(),
            lines: Vec::new(),
            text: String::new(),
            links: Vec::new(),
            open_links: Vec::new(),
            text_epoch: 0,
            list_depth: 0,
            quote_depth: 0,
            code: None,
            row: Vec::new(),
        }
    }

    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),

            Event::Text(text) => match &mut self.code {
                Some((_, body)) => body.push_str(&text),
                None => self.push_text(&emoji::replace_shortcodes(&text)),
            },
            Event::Code(code) => self.push_text(&format!("`{code}`")),
            Event::InlineMath(math) | Event::DisplayMath(math) => self.push_text(&math),
            Event::Html(raw) | Event::InlineHtml(raw) => self.push_text(&raw),

            Event::SoftBreak => self.push_text(" "),
            Event::HardBreak => {
                for link in &mut self.open_links {
                    link.label.push(' ');
                }
                self.flush_text();
            }
            Event::Rule => self.close_block(),

            Event::FootnoteReference(name) => self.push_text(&format!("[{name}]")),
            Event::TaskListMarker(checked) => {
                self.push_text(if checked { "[x] " } else { "[ ] " });
            }
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Heading { .. } => {
                self.take_text();
            }
            Tag::BlockQuote(_) => self.quote_depth += 1,
            Tag::List(_) => self.list_depth += 1,
            Tag::Item => self.flush_item(),
            Tag::CodeBlock(kind) => {
                let lang = match kind {
                    CodeBlockKind::Fenced(lang) => lang.to_string(),
                    CodeBlockKind::Indented => String::new(),
                };
                self.code = Some((lang, String::new()));
            }
            Tag::Link { dest_url, .. } | Tag::Image { dest_url, .. } => {
                let url = self.prefix(&dest_url);
                self.open_links.push(OpenLink {
                    url,
                    label: String::new(),
                    start: self.text.len(),
                    epoch: self.text_epoch,
                });
            }
            Tag::FootnoteDefinition(name) => self.push_text(&format!("[{name}]: ")),
            Tag::Table(_) => self.lines.push("```".to_string()),
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph => {
                if self.list_depth > 0 {
                    self.text.push(' ');
                } else {
                    self.flush_text();
                    if self.quote_depth == 0 {
                        self.close_block();
                    }
                }
            }
            TagEnd::Heading(level) => {
                let marks = match level {
                    HeadingLevel::H1 => "#",
                    HeadingLevel::H2 => "##",
                    _ => "###",
                };
                let line = format!("{marks} {}", self.take_text().trim());
                self.push_line(line);
                self.close_block();
            }
            TagEnd::BlockQuote(_) => {
                self.flush_text();
                self.quote_depth = self.quote_depth.saturating_sub(1);
                if self.quote_depth == 0 {
                    self.close_block();
                }
            }
            TagEnd::Item => self.flush_item(),
            TagEnd::List(_) => {
                self.list_depth = self.list_depth.saturating_sub(1);
                if self.list_depth == 0 && self.quote_depth == 0 {
                    self.close_block();
                }
            }
            TagEnd::CodeBlock => {
                if let Some((lang, body)) = self.code.take() {
                    self.lines.push(format!("```{lang}"));
                    self.lines.extend(body.trim_end_matches('\n').lines().map(String::from));
                    self.lines.push("```".to_string());
                    self.close_block();
                }
            }
            TagEnd::Link => {
                if let Some(link) = self.open_links.pop() {
                    self.push_link(link.url, link.label.trim());
                }
            }
            TagEnd::Image => {
                if let Some(link) = self.open_links.pop() {
                    // Alt text is only kept on the link line.
                    let start = if link.epoch == self.text_epoch { link.start } else { 0 };
                    self.text.truncate(start.min(self.text.len()));
                    self.push_link(link.url, link.label.trim());
                }
            }
            TagEnd::TableCell => {
                let cell = self.take_text().trim().to_string();
                self.row.push(cell);
            }
            TagEnd::TableHead | TagEnd::TableRow => {
                let row = std::mem::take(&mut self.row).join(" | ");
                self.lines.push(row);
            }
            TagEnd::Table => {
                self.lines.push("```".to_string());
                self.close_block();
            }
            TagEnd::HtmlBlock => {
                self.flush_text();
                self.close_block();
            }
            _ => {}
        }
    }

    fn prefix(&self, url: &str) -> String {
        if self.link_prefix.is_empty() || !is_root_relative(url) {
            url.to_string()
        } else {
            format!("{}{url}", self.link_prefix)
        }
    }

    fn push_link(&mut self, url: String, label: &str) {
        if label.is_empty() {
            self.links.push(format!("=> {url}"));
        } else {
            self.links.push(format!("=> {url} {label}"));
        }
    }

    fn push_line(&mut self, line: String) {
        if self.quote_depth > 0 {
            self.lines.push(format!("> {line}"));
        } else {
            self.lines.push(line);
        }
    }

    fn push_text(&mut self, text: &str) {
        self.text.push_str(text);
        for link in &mut self.open_links {
            link.label.push_str(text);
        }
    }

    fn take_text(&mut self) -> String {
        self.text_epoch += 1;
        std::mem::take(&mut self.text)
    }

    fn flush_text(&mut self) {
        let line = self.take_text().trim().to_string();
        if !line.is_empty() {
            self.push_line(line);
        }
    }

    fn flush_item(&mut self) {
        let line = self.take_text().trim().to_string();
        if !line.is_empty() {
            self.push_line(format!("* {line}"));
        }
    }

    fn close_block(&mut self) {
        if !self.lines.is_empty() {
            self.blocks.push(self.lines.join("\n"));
            self.lines.clear();
        }
        if !self.links.is_empty() {
            self.blocks.push(self.links.join("\n"));
            self.links.clear();
        }
    }

    fn finish(mut self) -> String {
        self.flush_text();
        self.close_block();

        if self.blocks.is_empty() {
            return String::new();
        }
        let mut out = self.blocks.join("\n\n");
        out.push('\n');
        out
    }
}
