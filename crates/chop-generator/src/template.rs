//! Template resolution and rendering with Tera.
//!
//! Every output target owns a directory of templates. The file stem names
//! the role (`default` or `index`) and the extension selects the output
//! format. All files of the directory are loaded into one Tera instance, so
//! templates can `include`, `extend` or `import` their siblings by file name.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use chop_core::Variables;
use chop_parser::Format;
use tera::{Context, Tera};
use thiserror::Error;
use tracing::{debug, warn};

/// Template errors.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Template source failed to compile.
    #[error("failed to compile template {path}: {message}")]
    Compile { path: PathBuf, message: String },

    /// Template failed to evaluate.
    #[error("failed to render {path}: {message}")]
    Render { path: PathBuf, message: String },
}

/// Result type for template operations.
pub type Result<T> = std::result::Result<T, TemplateError>;

/// Role a template plays within a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateRole {
    /// Renders every non-index document.
    Default,
    /// Renders index documents, with the page list available.
    Index,
}

impl TemplateRole {
    /// File stem naming this role.
    #[must_use]
    pub fn stem(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Index => "index",
        }
    }
}

/// A compiled template.
///
/// Cloning is cheap; clones share the compiled template.
#[derive(Debug, Clone)]
pub struct Template {
    path: PathBuf,
    name: String,
    tera: Arc<Tera>,
}

impl Template {
    /// Compile template source read from `path`.
    pub fn compile(path: &Path, source: &str) -> Result<Self> {
        let name = template_name(path);

        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);
        tera.add_raw_template(&name, source)
            .map_err(|e| TemplateError::Compile {
                path: path.to_path_buf(),
                message: error_chain(&e),
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            name,
            tera: Arc::new(tera),
        })
    }

    /// Source path of the template.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Extension of emitted files, if the template has one.
    #[must_use]
    pub fn extension(&self) -> Option<&str> {
        self.path.extension().and_then(|ext| ext.to_str())
    }

    /// Output format selected by the template extension.
    #[must_use]
    pub fn format(&self) -> Format {
        Format::for_template(Some(&self.path))
    }

    /// Evaluate the template with `variables`.
    pub fn render(&self, variables: &Variables) -> Result<String> {
        let context = context(variables, &self.path)?;
        self.tera
            .render(&self.name, &context)
            .map_err(|e| TemplateError::Render {
                path: self.path.clone(),
                message: error_chain(&e),
            })
    }
}

/// Render document content as a one-off template.
///
/// `path` names the document in error messages.
pub fn render_inline(source: &str, variables: &Variables, path: &Path) -> Result<String> {
    let context = context(variables, path)?;
    Tera::one_off(source, &context, false).map_err(|e| TemplateError::Render {
        path: path.to_path_buf(),
        message: error_chain(&e),
    })
}

fn context(variables: &Variables, path: &Path) -> Result<Context> {
    Context::from_serialize(variables).map_err(|e| TemplateError::Render {
        path: path.to_path_buf(),
        message: error_chain(&e),
    })
}

/// Flatten a Tera error and its causes into one line.
fn error_chain(error: &tera::Error) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// The `default` and `index` templates of one target.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    default: Option<Template>,
    index: Option<Template>,
}

impl TemplateSet {
    /// Resolve the templates in `dir`.
    ///
    /// Only files directly inside `dir` are considered, and every one of them
    /// is compiled as a template named after its file name. When several
    /// files share a stem, the first by file name wins. A missing `index`
    /// falls back to `default`; a missing `default` leaves both roles empty
    /// unless an `index` template exists.
    pub async fn resolve(dir: &Path) -> Result<Self> {
        let candidates = list_templates(dir).await?;
        let tera = Arc::new(load_directory(dir, &candidates).await?);

        let template = |path: &Path| Template {
            path: path.to_path_buf(),
            name: template_name(path),
            tera: Arc::clone(&tera),
        };

        let default = find_role(&candidates, TemplateRole::Default).map(template);
        let index = find_role(&candidates, TemplateRole::Index)
            .map(template)
            .or_else(|| default.clone());

        debug!(
            dir = %dir.display(),
            default = ?default.as_ref().map(Template::path),
            index = ?index.as_ref().map(Template::path),
            "resolved templates"
        );

        Ok(Self { default, index })
    }

    /// Template for a role, after fallback.
    #[must_use]
    pub fn get(&self, role: TemplateRole) -> Option<&Template> {
        match role {
            TemplateRole::Default => self.default.as_ref(),
            TemplateRole::Index => self.index.as_ref(),
        }
    }

    /// Template rendering non-index documents.
    #[must_use]
    pub fn default_template(&self) -> Option<&Template> {
        self.get(TemplateRole::Default)
    }

    /// Template rendering index documents.
    #[must_use]
    pub fn index_template(&self) -> Option<&Template> {
        self.get(TemplateRole::Index)
    }
}

fn template_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| "template".to_string(), |n| n.to_string_lossy().into_owned())
}

/// Compile every file in `paths` into one Tera instance.
///
/// Files that are not UTF-8 cannot be templates and are skipped.
async fn load_directory(dir: &Path, paths: &[PathBuf]) -> Result<Tera> {
    let mut sources = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = tokio::fs::read(path).await?;
        match String::from_utf8(bytes) {
            Ok(source) => sources.push((template_name(path), source)),
            Err(_) => warn!(path = %path.display(), "skipping non UTF-8 file in template directory"),
        }
    }

    let mut tera = Tera::default();
    tera.autoescape_on(vec![]);
    tera.add_raw_templates(sources)
        .map_err(|e| TemplateError::Compile {
            path: dir.to_path_buf(),
            message: error_chain(&e),
        })?;

    Ok(tera)
}

async fn list_templates(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

fn find_role(candidates: &[PathBuf], role: TemplateRole) -> Option<&Path> {
    candidates
        .iter()
        .find(|path| path.file_stem().is_some_and(|stem| stem == role.stem()))
        .map(PathBuf::as_path)
}
