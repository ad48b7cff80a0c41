//! Smart punctuation.
//!
//! Straight quotes become curly quotes, `--` and `---` become en and em dashes
//! and `...` becomes an ellipsis. The output contains none of the sequences
//! that are rewritten, so applying a transform twice changes nothing.

/// Elements whose content is never rewritten.
const RAW_ELEMENTS: &[&str] = &["pre", "code", "kbd", "samp", "script", "style", "textarea"];

/// Elements that start a new run of text for quote direction purposes.
const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "body", "br", "dd", "div", "dl", "dt",
    "figcaption", "figure", "footer", "h1", "h2", "h3", "h4", "h5", "h6", "head", "header",
    "hr", "html", "li", "main", "nav", "ol", "p", "section", "summary", "table", "td", "th",
    "title", "tr", "ul",
];

#[derive(Debug, Default)]
struct Smartener {
    prev: Option<char>,
}

impl Smartener {
    fn opens_quote(&self) -> bool {
        match self.prev {
            None => true,
            Some(c) => {
                c.is_whitespace()
                    || matches!(c, '(' | '[' | '{' | '<' | '/' | '-' | '–' | '—' | '“' | '‘')
            }
        }
    }

    fn push_run(&mut self, run: &str, out: &mut String) {
        let mut chars = run.chars().peekable();

        while let Some(c) = chars.next() {
            let replacement = match c {
                '.' if chars.peek() == Some(&'.') => {
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    if lookahead.peek() == Some(&'.') {
                        chars.next();
                        chars.next();
                        '…'
                    } else {
                        '.'
                    }
                }
                '-' if chars.peek() == Some(&'-') => {
                    chars.next();
                    if chars.peek() == Some(&'-') {
                        chars.next();
                        '—'
                    } else {
                        '–'
                    }
                }
                '"' => {
                    if self.opens_quote() {
                        '“'
                    } else {
                        '”'
                    }
                }
                '\'' => {
                    if self.opens_quote() {
                        '‘'
                    } else {
                        '’'
                    }
                }
                other => other,
            };

            out.push(replacement);
            self.prev = Some(replacement);
        }
    }
}

/// Apply smart punctuation to a single run of plain text.
pub fn smarten(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    Smartener::default().push_run(text, &mut out);
    out
}

/// Apply smart punctuation to plain text or Gemtext.
///
/// Preformatted blocks between ```` ``` ```` lines and inline code spans are
/// left alone. On `=>` link lines only the label is rewritten.
pub fn smarten_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut preformatted = false;

    for line in text.split_inclusive('\n') {
        let (content, ending) = match line.strip_suffix('\n') {
            Some(content) => (content, "\n"),
            None => (line, ""),
        };

        if content.starts_with("```") {
            preformatted = !preformatted;
            out.push_str(line);
            continue;
        }
        if preformatted {
            out.push_str(line);
            continue;
        }

        match content.strip_prefix("=>") {
            Some(rest) => smarten_link_line(rest, &mut out),
            None => smarten_line(content, &mut out),
        }
        out.push_str(ending);
    }

    out
}

fn smarten_link_line(rest: &str, out: &mut String) {
    out.push_str("=>");

    let url_start = rest.len() - rest.trim_start().len();
    let url_end = rest[url_start..]
        .find(char::is_whitespace)
        .map_or(rest.len(), |i| url_start + i);

    out.push_str(&rest[..url_end]);
    smarten_line(&rest[url_end..], out);
}

fn smarten_line(line: &str, out: &mut String) {
    let mut state = Smartener::default();
    let segments: Vec<&str> = line.split('`').collect();
    let balanced = segments.len() % 2 == 1;

    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            out.push('`');
            state.prev = Some('`');
        }
        let in_code = i % 2 == 1 && (balanced || i + 1 < segments.len());
        if in_code {
            out.push_str(segment);
        } else {
            state.push_run(segment, out);
        }
    }
}

/// Apply smart punctuation to the text nodes of an HTML document.
///
/// Tags, comments and the bodies of raw elements such as `<pre>` and
/// `<script>` are copied unchanged.
pub fn smarten_html(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut state = Smartener::default();
    let mut rest = html;

    while !rest.is_empty() {
        if rest.starts_with("<!--") {
            let end = rest.find("-->").map_or(rest.len(), |i| i + 3);
            out.push_str(&rest[..end]);
            rest = &rest[end..];
            continue;
        }

        if starts_tag(rest) {
            let end = rest.find('>').map_or(rest.len(), |i| i + 1);
            let tag = &rest[..end];
            out.push_str(tag);
            rest = &rest[end..];

            let (name, closing) = tag_name(tag);
            if BLOCK_ELEMENTS.contains(&name.as_str()) {
                state = Smartener::default();
            }
            if !closing && !tag.ends_with("/>") && RAW_ELEMENTS.contains(&name.as_str()) {
                let body_end = find_closing_tag(rest, &name);
                out.push_str(&rest[..body_end]);
                rest = &rest[body_end..];
            }
            continue;
        }

        let end = rest
            .char_indices()
            .skip(1)
            .find(|&(i, c)| c == '<' && starts_tag(&rest[i..]))
            .map_or(rest.len(), |(i, _)| i);
        state.push_run(&rest[..end], &mut out);
        rest = &rest[end..];
    }

    out
}

fn starts_tag(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next() == Some('<')
        && chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || matches!(c, '/' | '!' | '?'))
}

fn tag_name(tag: &str) -> (String, bool) {
    let inner = tag.trim_start_matches('<');
    let (inner, closing) = match inner.strip_prefix('/') {
        Some(inner) => (inner, true),
        None => (inner, false),
    };
    let name = inner
        .chars()
        .take_while(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_ascii_lowercase();
    (name, closing)
}

fn find_closing_tag(rest: &str, name: &str) -> usize {
    let needle = format!("</{name}");
    rest.to_ascii_lowercase().find(&needle).unwrap_or(rest.len())
}
