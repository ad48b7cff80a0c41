//! Content documents and site path resolution.

use std::path::{Component, Path, PathBuf};

use crate::{
    config::GlobalConfig,
    error::{CoreError, Result},
    frontmatter::parse_frontmatter,
    variables::{Value, Variables},
};

/// Base filename marking an index document.
pub const INDEX_STEM: &str = "index";

/// Variable holding the raw document body.
pub const CONTENT_KEY: &str = "content";

/// Variable holding the prefixed site path.
pub const PATH_KEY: &str = "path";

/// Variable holding the site path without `site_prefix`.
pub const PATH_UNPREFIXED_KEY: &str = "path_unprefixed";

/// Canonical location of a document on the site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitePath {
    /// Path including the site prefix, used for links.
    pub prefixed: String,

    /// Path without the site prefix, used for output file locations.
    pub unprefixed: String,
}

impl SitePath {
    /// Resolve the site path of a document.
    ///
    /// `relative` is the source path relative to the content root. An explicit
    /// frontmatter `path` string replaces the computed value verbatim.
    ///
    /// - `posts/a.txt` → `/posts/a`
    /// - `index.txt` → `/index`
    /// - `posts/a.txt` with `path: /custom` → `/custom`
    pub fn resolve(relative: &Path, explicit: Option<&Value>, site_prefix: &str) -> Self {
        let unprefixed = match explicit {
            Some(Value::String(path)) => path.clone(),
            Some(other) => {
                tracing::warn!(
                    path = %relative.display(),
                    value = %other,
                    "ignoring non-string `path` variable"
                );
                Self::compute(relative)
            }
            None => Self::compute(relative),
        };

        Self {
            prefixed: format!("{site_prefix}{unprefixed}"),
            unprefixed,
        }
    }

    /// Compute the unprefixed path from a content-relative source path.
    ///
    /// Segments are always joined with `/`, whatever the platform separator.
    #[must_use]
    pub fn compute(relative: &Path) -> String {
        let mut segments: Vec<String> = relative
            .parent()
            .into_iter()
            .flat_map(Path::components)
            .filter_map(|component| match component {
                Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();

        if let Some(stem) = relative.file_stem() {
            segments.push(stem.to_string_lossy().into_owned());
        }

        format!("/{}", segments.join("/"))
    }
}

/// One discovered source document.
#[derive(Debug, Clone)]
pub struct ContentFile {
    /// Absolute source path.
    pub source_path: PathBuf,

    /// Source path relative to the content root.
    pub relative_path: PathBuf,

    /// Global variables, overlaid with frontmatter and computed keys.
    pub variables: Variables,

    /// Trimmed body following the frontmatter block.
    pub raw_content: String,

    /// Resolved site path.
    pub site_path: SitePath,

    /// Whether the source base filename is `index`.
    pub is_index: bool,
}

impl ContentFile {
    /// Parse a document read from `source_path`.
    ///
    /// Fails with [`CoreError::MalformedFrontmatter`] when the document does
    /// not start with a valid frontmatter block.
    pub fn parse(
        root: &Path,
        source_path: &Path,
        source: &str,
        config: &GlobalConfig,
    ) -> Result<Self> {
        let relative_path = source_path
            .strip_prefix(root)
            .map_err(|_| {
                CoreError::frontmatter(source_path, "document lies outside the content root")
            })?
            .to_path_buf();

        let (frontmatter, raw_content) = parse_frontmatter(source, source_path)?;

        let site_path = SitePath::resolve(
            &relative_path,
            frontmatter.get(PATH_KEY),
            config.site_prefix(),
        );

        let mut variables = config.variables().merged(&frontmatter);
        variables.insert(CONTENT_KEY, raw_content.clone());
        variables.insert(PATH_KEY, site_path.prefixed.clone());
        variables.insert(PATH_UNPREFIXED_KEY, site_path.unprefixed.clone());

        let is_index = relative_path
            .file_stem()
            .is_some_and(|stem| stem == INDEX_STEM);

        Ok(Self {
            source_path: source_path.to_path_buf(),
            relative_path,
            variables,
            raw_content,
            site_path,
            is_index,
        })
    }

    /// Read and parse a document from disk.
    pub fn load(root: &Path, source_path: &Path, config: &GlobalConfig) -> Result<Self> {
        let source = std::fs::read_to_string(source_path)?;
        Self::parse(root, source_path, &source, config)
    }
}
