//! Chop Parser Library
//!
//! Content converters for the output formats chop renders: markdown to HTML,
//! markdown to Gemtext and plain passthrough, plus smart punctuation and
//! emoji shortcodes.

pub mod emoji;
pub mod gemtext;
pub mod markdown;
pub mod typography;

use std::path::Path;

pub use gemtext::GemtextConverter;
pub use markdown::HtmlConverter;

/// Output format selected by a template's file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// Markdown rendered to HTML.
    Html,
    /// Markdown rendered to Gemtext.
    Gemtext,
    /// Source emitted unchanged.
    Plain,
}

/// Smart punctuation flavor applied to a format's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Typography {
    /// Rewrite text nodes only, leaving markup alone.
    Html,
    /// Rewrite plain text lines.
    Text,
}

/// Template extension to format dispatch table. Extensions not listed here
/// render as HTML.
pub const FORMATS: &[(&str, Format)] = &[
    ("html", Format::Html),
    ("xml", Format::Html),
    ("gmi", Format::Gemtext),
    ("txt", Format::Plain),
    ("md", Format::Plain),
];

/// Options shared by all converters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvertOptions {
    /// Prepended to root-relative link and image URLs.
    pub link_prefix: String,
}

impl ConvertOptions {
    /// Options with a link prefix, usually the site prefix.
    pub fn with_link_prefix(prefix: impl Into<String>) -> Self {
        Self {
            link_prefix: prefix.into(),
        }
    }
}

/// Whether `url` is root-relative: a single leading `/`, not `//`.
pub fn is_root_relative(url: &str) -> bool {
    url.starts_with('/') && !url.starts_with("//")
}

impl Format {
    /// Look up the format for a template extension, without the dot.
    pub fn from_extension(ext: &str) -> Self {
        let ext = ext.to_ascii_lowercase();
        FORMATS
            .iter()
            .find(|(candidate, _)| *candidate == ext)
            .map_or(Self::Html, |(_, format)| *format)
    }

    /// Format for a resolved template, HTML when there is none.
    pub fn for_template(path: Option<&Path>) -> Self {
        path.and_then(Path::extension)
            .and_then(|ext| ext.to_str())
            .map_or(Self::Html, Self::from_extension)
    }

    /// Smart punctuation flavor for this format.
    pub fn typography(self) -> Typography {
        match self {
            Self::Html => Typography::Html,
            Self::Gemtext | Self::Plain => Typography::Text,
        }
    }

    /// Convert markdown source into this format.
    pub fn convert(self, source: &str, options: &ConvertOptions) -> String {
        match self {
            Self::Html => HtmlConverter::new().convert(source, options),
            Self::Gemtext => GemtextConverter::new().convert(source, options),
            Self::Plain => source.to_string(),
        }
    }

    /// Apply this format's smart punctuation.
    pub fn smarten(self, text: &str) -> String {
        match self.typography() {
            Typography::Html => typography::smarten_html(text),
            Typography::Text => typography::smarten_text(text),
        }
    }
}
