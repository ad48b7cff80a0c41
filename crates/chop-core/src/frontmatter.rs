//! Frontmatter parsing for content files.
//!
//! A document is a `---` line, a YAML mapping, a second `---` line and the
//! body. Anything before the first delimiter makes the document malformed.

use std::path::Path;

use crate::{
    error::{CoreError, Result},
    variables::Variables,
};

/// Delimiter line surrounding the frontmatter block.
pub const DELIMITER: &str = "---";

/// Split content into the raw frontmatter block and the body.
///
/// Only the first two delimiter lines split the document; later `---` lines
/// stay part of the body.
pub fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut lines = content.split_inclusive('\n');

    let opening = lines.next()?;
    if opening.trim_end() != DELIMITER {
        return None;
    }

    let start = opening.len();
    let mut offset = start;
    for line in lines {
        if line.trim_end() == DELIMITER {
            return Some((&content[start..offset], &content[offset + line.len()..]));
        }
        offset += line.len();
    }

    None
}

/// Parse a document into its frontmatter variables and trimmed body.
pub fn parse_frontmatter(content: &str, path: &Path) -> Result<(Variables, String)> {
    let Some((block, body)) = split_frontmatter(content) else {
        let message = if content.trim_start_matches('\u{feff}').starts_with(DELIMITER) {
            "missing closing `---` line"
        } else {
            "document must start with a `---` line"
        };
        return Err(CoreError::frontmatter(path, message));
    };

    let variables =
        Variables::from_yaml(block).map_err(|e| CoreError::frontmatter(path, e.to_string()))?;

    Ok((variables, body.trim().to_string()))
}
