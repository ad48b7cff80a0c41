//! Document rendering for one output target.
//!
//! Rendering runs in two phases. The page phase renders every non-index
//! document and collects its variables. The index phase then renders index
//! documents with the complete page list available as `pages`.

use std::{
    collections::HashMap,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use chop_core::{ContentFile, GlobalConfig, TypographySettings, Value, Variables};
use chop_parser::{ConvertOptions, Format};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::template::{Template, TemplateError, render_inline};

/// Variable holding converted document content.
pub const CONTENT_RENDERED_KEY: &str = "content_rendered";

/// Variable holding the page list during the index phase.
pub const PAGES_KEY: &str = "pages";

/// Variable opting a document into inline template rendering.
pub const INLINE_TEMPLATE_KEY: &str = "inline_template";

/// Render errors. Each one is reported and the build continues.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Template failed to compile for the whole target.
    #[error("[{target}] {source}")]
    Resolve {
        target: String,
        #[source]
        source: TemplateError,
    },

    /// Document failed to render.
    #[error("[{target}] failed to render {}: {source}", source_path.display())]
    Template {
        target: String,
        source_path: PathBuf,
        #[source]
        source: TemplateError,
    },

    /// Output file could not be written.
    #[error("[{target}] failed to write {}: {message}", path.display())]
    Write {
        target: String,
        path: PathBuf,
        message: String,
    },

    /// Render task panicked or was cancelled.
    #[error("[{target}] render task failed for {}: {message}", source_path.display())]
    Task {
        target: String,
        source_path: PathBuf,
        message: String,
    },
}

/// A rendered document.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// Source document.
    pub source_path: PathBuf,

    /// Document variables including `content_rendered`.
    pub variables: Variables,

    /// Written output file, if the document had a template.
    pub output_path: Option<PathBuf>,
}

/// Outcome of one render phase.
#[derive(Debug, Default)]
pub struct PhaseOutcome {
    /// Rendered documents in discovery order.
    pub pages: Vec<RenderedPage>,

    /// Number of files written.
    pub written: usize,

    /// Per-document errors.
    pub errors: Vec<RenderError>,
}

#[derive(Debug)]
struct RenderContext {
    target: String,
    dest_dir: PathBuf,
    options: ConvertOptions,
    typography: TypographySettings,
}

/// Renders documents into one target's destination directory.
#[derive(Debug, Clone)]
pub struct Renderer {
    ctx: Arc<RenderContext>,
}

impl Renderer {
    /// Create a renderer writing below `dest_dir`.
    #[must_use]
    pub fn new(target: impl Into<String>, dest_dir: impl Into<PathBuf>, config: &GlobalConfig) -> Self {
        Self {
            ctx: Arc::new(RenderContext {
                target: target.into(),
                dest_dir: dest_dir.into(),
                options: ConvertOptions::with_link_prefix(config.site_prefix()),
                typography: config.settings().typography.clone(),
            }),
        }
    }

    /// Target name.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.ctx.target
    }

    /// Render the page phase.
    ///
    /// Pages are converted even when the target has no `default` template so
    /// that an `index` template still sees them.
    pub async fn render_pages(
        &self,
        template: Option<&Template>,
        files: &[Arc<ContentFile>],
    ) -> PhaseOutcome {
        info!(target = %self.ctx.target, count = files.len(), "rendering pages");
        self.render_phase(template, files, None).await
    }

    /// Render the index phase with the complete page list.
    pub async fn render_indexes(
        &self,
        template: Option<&Template>,
        files: &[Arc<ContentFile>],
        pages: &[RenderedPage],
    ) -> PhaseOutcome {
        if template.is_none() {
            debug!(target = %self.ctx.target, "no index template, skipping index documents");
            return PhaseOutcome::default();
        }

        info!(target = %self.ctx.target, count = files.len(), pages = pages.len(), "rendering indexes");

        let list = Value::Array(
            pages
                .iter()
                .map(|page| page.variables.clone().into_value())
                .collect(),
        );
        self.render_phase(template, files, Some(Arc::new(list))).await
    }

    async fn render_phase(
        &self,
        template: Option<&Template>,
        files: &[Arc<ContentFile>],
        pages: Option<Arc<Value>>,
    ) -> PhaseOutcome {
        let mut tasks = JoinSet::new();
        let mut task_slots = HashMap::with_capacity(files.len());
        for (index, file) in files.iter().enumerate() {
            let ctx = Arc::clone(&self.ctx);
            let file = Arc::clone(file);
            let template = template.cloned();
            let pages = pages.clone();
            let handle = tasks.spawn(async move {
                (
                    index,
                    render_document(&ctx, &file, template.as_ref(), pages.as_deref()).await,
                )
            });
            task_slots.insert(handle.id(), index);
        }

        let mut slots: Vec<Option<RenderedPage>> = (0..files.len()).map(|_| None).collect();
        let mut outcome = PhaseOutcome::default();

        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, (index, (page, errors)))) => {
                    if page.output_path.is_some() {
                        outcome.written += 1;
                    }
                    slots[index] = Some(page);
                    outcome.errors.extend(errors);
                }
                Err(e) => {
                    let file = task_slots.get(&e.id()).and_then(|&index| files.get(index));
                    warn!(
                        target = %self.ctx.target,
                        path = ?file.map(|f| f.source_path.display().to_string()),
                        error = %e,
                        "render task failed"
                    );
                    outcome.errors.push(RenderError::Task {
                        target: self.ctx.target.clone(),
                        source_path: file.map(|f| f.source_path.clone()).unwrap_or_default(),
                        message: e.to_string(),
                    });
                }
            }
        }

        // A document whose task failed still appears in `pages`, with its
        // unconverted body as `content_rendered`.
        outcome.pages = slots
            .into_iter()
            .zip(files)
            .map(|(slot, file)| slot.unwrap_or_else(|| fallback_page(file, pages.as_deref())))
            .collect();
        outcome
    }
}

async fn render_document(
    ctx: &RenderContext,
    file: &ContentFile,
    template: Option<&Template>,
    pages: Option<&Value>,
) -> (RenderedPage, Vec<RenderError>) {
    let format = template.map_or(Format::Html, Template::format);
    let mut errors = Vec::new();

    let (variables, inline_error) = prepare_variables(ctx, file, format, pages);
    if let Some(source) = inline_error {
        warn!(path = %file.source_path.display(), error = %source, "inline template failed");
        errors.push(RenderError::Template {
            target: ctx.target.clone(),
            source_path: file.source_path.clone(),
            source,
        });
    }

    let mut page = RenderedPage {
        source_path: file.source_path.clone(),
        variables,
        output_path: None,
    };

    let Some(template) = template else {
        return (page, errors);
    };

    let output = match template.render(&page.variables) {
        Ok(output) if ctx.typography.enabled => template.format().smarten(&output),
        Ok(output) => output,
        Err(source) => {
            errors.push(RenderError::Template {
                target: ctx.target.clone(),
                source_path: file.source_path.clone(),
                source,
            });
            return (page, errors);
        }
    };

    match write_output(ctx, &file.site_path.unprefixed, template.extension(), &output).await {
        Ok(path) => {
            debug!(target = %ctx.target, path = %path.display(), "wrote document");
            page.output_path = Some(path);
        }
        Err(e) => errors.push(e),
    }

    (page, errors)
}

fn fallback_page(file: &ContentFile, pages: Option<&Value>) -> RenderedPage {
    let mut variables = file.variables.clone();
    if let Some(pages) = pages {
        variables.insert(PAGES_KEY, pages.clone());
    }
    variables.insert(CONTENT_RENDERED_KEY, file.raw_content.clone());

    RenderedPage {
        source_path: file.source_path.clone(),
        variables,
        output_path: None,
    }
}

/// Build the template variables of a document.
///
/// A failing inline template leaves the converted content in place and
/// returns the error alongside.
fn prepare_variables(
    ctx: &RenderContext,
    file: &ContentFile,
    format: Format,
    pages: Option<&Value>,
) -> (Variables, Option<TemplateError>) {
    let mut variables = file.variables.clone();
    if let Some(pages) = pages {
        variables.insert(PAGES_KEY, pages.clone());
    }

    let mut rendered = format.convert(&file.raw_content, &ctx.options);
    let mut error = None;

    if variables.is_true(INLINE_TEMPLATE_KEY) {
        match render_inline(&rendered, &variables, &file.source_path) {
            Ok(inlined) => rendered = inlined,
            Err(e) => error = Some(e),
        }
    }

    if ctx.typography.enabled {
        rendered = format.smarten(&rendered);
        if ctx.typography.raw_content {
            variables.insert(
                chop_core::content::CONTENT_KEY,
                Format::Plain.smarten(&file.raw_content),
            );
        }
    }

    variables.insert(CONTENT_RENDERED_KEY, rendered);
    (variables, error)
}

async fn write_output(
    ctx: &RenderContext,
    site_path: &str,
    extension: Option<&str>,
    output: &str,
) -> Result<PathBuf, RenderError> {
    let path = output_path(&ctx.dest_dir, site_path, extension).map_err(|message| RenderError::Write {
        target: ctx.target.clone(),
        path: PathBuf::from(site_path),
        message,
    })?;

    let write_error = |e: std::io::Error| RenderError::Write {
        target: ctx.target.clone(),
        path: path.clone(),
        message: e.to_string(),
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_error)?;
    }
    tokio::fs::write(&path, output).await.map_err(write_error)?;

    Ok(path)
}

/// Destination file of a document.
///
/// `site_path` is the unprefixed site path; it must stay inside `dest_dir`.
pub fn output_path(
    dest_dir: &Path,
    site_path: &str,
    extension: Option<&str>,
) -> Result<PathBuf, String> {
    let relative = Path::new(site_path.trim_start_matches('/'));

    let mut has_name = false;
    for component in relative.components() {
        match component {
            Component::Normal(_) => has_name = true,
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(format!("site path `{site_path}` escapes the output directory"));
            }
        }
    }
    if !has_name || site_path.ends_with('/') {
        return Err(format!("site path `{site_path}` has no file name"));
    }

    let file = match extension {
        Some(ext) => format!("{}.{ext}", relative.display()),
        None => relative.display().to_string(),
    };
    Ok(dest_dir.join(file))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chop_core::ContentFile;
    use tempfile::TempDir;

    use super::*;

    fn config(yaml: &str) -> GlobalConfig {
        GlobalConfig::from_variables(Variables::from_yaml(yaml).unwrap())
    }

    fn doc(root: &Path, rel: &str, source: &str, config: &GlobalConfig) -> Arc<ContentFile> {
        let path = root.join(rel);
        Arc::new(ContentFile::parse(root, &path, source, config).unwrap())
    }

    fn template(name: &str, source: &str) -> Template {
        Template::compile(Path::new(name), source).unwrap()
    }

    #[test]
    fn test_output_path() {
        let dest = Path::new("/out/html");
        assert_eq!(
            output_path(dest, "/posts/a", Some("html")).unwrap(),
            Path::new("/out/html/posts/a.html")
        );
        assert_eq!(
            output_path(dest, "/posts/a", None).unwrap(),
            Path::new("/out/html/posts/a")
        );
        assert_eq!(
            output_path(dest, "custom", Some("gmi")).unwrap(),
            Path::new("/out/html/custom.gmi")
        );
        assert!(output_path(dest, "/../etc/passwd", Some("html")).is_err());
        assert!(output_path(dest, "/posts/../../x", Some("html")).is_err());
        assert!(output_path(dest, "/", Some("html")).is_err());
        assert!(output_path(dest, "", Some("html")).is_err());
    }

    #[tokio::test]
    async fn test_page_phase_writes_and_collects() {
        let dir = TempDir::new().unwrap();
        let config = config("site_name: Example\n");
        let files = vec![
            doc(dir.path(), "posts/a.txt", "---\ntitle: A\n---\n# A", &config),
            doc(dir.path(), "posts/b.txt", "---\ntitle: B\n---\nplain \"text\"", &config),
        ];
        let renderer = Renderer::new("html", dir.path().join("dist/html"), &config);
        let default = template("default.html", "{{ site_name }}|{{ content_rendered }}");

        let outcome = renderer.render_pages(Some(&default), &files).await;

        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.written, 2);
        assert_eq!(outcome.pages.len(), 2);
        assert_eq!(outcome.pages[0].variables.get_str("title"), Some("A"));

        let a = fs::read_to_string(dir.path().join("dist/html/posts/a.html")).unwrap();
        assert!(a.starts_with("Example|<h1"));
        assert!(a.contains("A</h1>"));

        let b = fs::read_to_string(dir.path().join("dist/html/posts/b.html")).unwrap();
        assert!(b.contains("\u{201c}text\u{201d}"));
    }

    #[tokio::test]
    async fn test_page_phase_without_template_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let config = GlobalConfig::default();
        let files = vec![doc(dir.path(), "a.txt", "---\ntitle: A\n---\nbody", &config)];
        let renderer = Renderer::new("html", dir.path().join("dist/html"), &config);

        let outcome = renderer.render_pages(None, &files).await;

        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.written, 0);
        assert_eq!(outcome.pages.len(), 1);
        assert_eq!(
            outcome.pages[0].variables.get_str(CONTENT_RENDERED_KEY),
            Some("<p>body</p>\n")
        );
        assert!(!dir.path().join("dist").exists());
    }

    #[tokio::test]
    async fn test_index_phase_sees_all_pages() {
        let dir = TempDir::new().unwrap();
        let config = GlobalConfig::default();
        let pages: Vec<_> = (0..20)
            .map(|i| doc(dir.path(), &format!("p{i:02}.txt"), &format!("---\ntitle: T{i}\n---\n"), &config))
            .collect();
        let index = vec![doc(dir.path(), "index.txt", "---\ntitle: Home\n---\n", &config)];

        let renderer = Renderer::new("html", dir.path().join("out"), &config);
        let phase1 = renderer.render_pages(None, &pages).await;
        let list = template("index.html", "{{ pages | length }}:{% for p in pages %}{{ p.title }},{% endfor %}");
        let phase2 = renderer.render_indexes(Some(&list), &index, &phase1.pages).await;

        assert!(phase2.errors.is_empty());
        let out = fs::read_to_string(dir.path().join("out/index.html")).unwrap();
        let expected: String = (0..20).map(|i| format!("T{i},")).collect();
        assert_eq!(out, format!("20:{expected}"));
    }

    #[tokio::test]
    async fn test_gemtext_index_lists_page_with_broken_link_label() {
        let dir = TempDir::new().unwrap();
        let config = GlobalConfig::default();
        let pages = vec![
            doc(dir.path(), "a.txt", "---\ntitle: A\n---\nIntro [foo\\\nbar](/x)", &config),
            doc(dir.path(), "b.txt", "---\ntitle: B\n---\n", &config),
        ];
        let index = vec![doc(dir.path(), "index.txt", "---\n---\n", &config)];
        let renderer = Renderer::new("gemini", dir.path().join("out"), &config);
        let default = template("default.gmi", "{{ content_rendered }}");
        let list = template("index.gmi", "{% for p in pages %}{{ p.title }};{% endfor %}");

        let phase1 = renderer.render_pages(Some(&default), &pages).await;
        assert!(phase1.errors.is_empty());
        let phase2 = renderer.render_indexes(Some(&list), &index, &phase1.pages).await;

        assert!(phase2.errors.is_empty());
        assert_eq!(fs::read_to_string(dir.path().join("out/index.gmi")).unwrap(), "A;B;");
        let a = fs::read_to_string(dir.path().join("out/a.gmi")).unwrap();
        assert!(a.contains("=> /x foo bar"));
    }

    #[test]
    fn test_fallback_page_keeps_document_variables() {
        let dir = TempDir::new().unwrap();
        let config = GlobalConfig::default();
        let file = doc(dir.path(), "a.txt", "---\ntitle: A\n---\n# Body", &config);

        let page = fallback_page(&file, None);

        assert_eq!(page.variables.get_str("title"), Some("A"));
        assert_eq!(page.variables.get_str(CONTENT_RENDERED_KEY), Some("# Body"));
        assert!(page.output_path.is_none());
    }

    #[tokio::test]
    async fn test_site_prefix_applies_to_links_not_files() {
        let dir = TempDir::new().unwrap();
        let config = config("site_prefix: /blog\n");
        let files = vec![doc(dir.path(), "posts/a.txt", "---\n---\n[x](/posts/b)", &config)];
        let renderer = Renderer::new("html", dir.path().join("out"), &config);
        let default = template("default.html", "{{ path }} {{ content_rendered }}");

        let outcome = renderer.render_pages(Some(&default), &files).await;

        assert!(outcome.errors.is_empty());
        let out = fs::read_to_string(dir.path().join("out/posts/a.html")).unwrap();
        assert!(out.starts_with("/blog/posts/a "));
        assert!(out.contains("href=\"/blog/posts/b\""));
    }

    #[tokio::test]
    async fn test_gemtext_target() {
        let dir = TempDir::new().unwrap();
        let config = GlobalConfig::default();
        let files = vec![doc(
            dir.path(),
            "a.txt",
            "---\n---\n# Title\n\nSee [docs](https://example.com).",
            &config,
        )];
        let renderer = Renderer::new("gemini", dir.path().join("out"), &config);
        let default = template("default.gmi", "{{ content_rendered }}");

        renderer.render_pages(Some(&default), &files).await;

        let out = fs::read_to_string(dir.path().join("out/a.gmi")).unwrap();
        assert!(out.starts_with("# Title\n"));
        assert!(out.contains("=> https://example.com docs"));
    }

    #[tokio::test]
    async fn test_inline_template() {
        let dir = TempDir::new().unwrap();
        let config = config("site_name: Example\n");
        let files = vec![
            doc(dir.path(), "a.txt", "---\ninline_template: true\n---\nHello {{ site_name }}", &config),
            doc(dir.path(), "b.txt", "---\n---\nHello {{ site_name }}", &config),
        ];
        let renderer = Renderer::new("text", dir.path().join("out"), &config);
        let default = template("default.txt", "{{ content_rendered }}");

        let outcome = renderer.render_pages(Some(&default), &files).await;

        assert!(outcome.errors.is_empty());
        assert_eq!(fs::read_to_string(dir.path().join("out/a.txt")).unwrap(), "Hello Example");
        assert_eq!(
            fs::read_to_string(dir.path().join("out/b.txt")).unwrap(),
            "Hello {{ site_name }}"
        );
    }

    #[tokio::test]
    async fn test_broken_inline_template_keeps_page() {
        let dir = TempDir::new().unwrap();
        let config = GlobalConfig::default();
        let files = vec![doc(dir.path(), "a.txt", "---\ninline_template: true\n---\n{% if %}", &config)];
        let renderer = Renderer::new("text", dir.path().join("out"), &config);
        let default = template("default.txt", "{{ content_rendered }}");

        let outcome = renderer.render_pages(Some(&default), &files).await;

        assert_eq!(outcome.errors.len(), 1);
        assert!(matches!(outcome.errors[0], RenderError::Template { .. }));
        assert_eq!(outcome.pages.len(), 1);
        assert_eq!(outcome.written, 1);
    }

    #[tokio::test]
    async fn test_template_error_is_per_document() {
        let dir = TempDir::new().unwrap();
        let config = GlobalConfig::default();
        let files = vec![
            doc(dir.path(), "a.txt", "---\nitems: [1]\n---\n", &config),
            doc(dir.path(), "b.txt", "---\n---\n", &config),
        ];
        let renderer = Renderer::new("html", dir.path().join("out"), &config);
        let default = template("default.html", "{% for i in items %}{{ i }}{% endfor %}");

        let outcome = renderer.render_pages(Some(&default), &files).await;

        assert_eq!(outcome.written, 1);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].to_string().contains("b.txt"));
        assert!(dir.path().join("out/a.html").exists());
    }

    #[tokio::test]
    async fn test_escaping_path_is_refused() {
        let dir = TempDir::new().unwrap();
        let config = GlobalConfig::default();
        let files = vec![doc(dir.path(), "a.txt", "---\npath: /../../escape\n---\n", &config)];
        let renderer = Renderer::new("html", dir.path().join("out"), &config);
        let default = template("default.html", "x");

        let outcome = renderer.render_pages(Some(&default), &files).await;

        assert_eq!(outcome.written, 0);
        assert!(matches!(outcome.errors[0], RenderError::Write { .. }));
    }

    #[tokio::test]
    async fn test_typography_disabled() {
        let dir = TempDir::new().unwrap();
        let config = config("build:\n  typography:\n    enabled: false\n");
        let files = vec![doc(dir.path(), "a.txt", "---\n---\n\"quoted\" -- text", &config)];
        let renderer = Renderer::new("text", dir.path().join("out"), &config);
        let default = template("default.txt", "{{ content_rendered }}");

        renderer.render_pages(Some(&default), &files).await;

        assert_eq!(
            fs::read_to_string(dir.path().join("out/a.txt")).unwrap(),
            "\"quoted\" -- text"
        );
    }

    #[tokio::test]
    async fn test_typography_raw_content() {
        let dir = TempDir::new().unwrap();
        let config = config("build:\n  typography:\n    raw_content: true\n");
        let files = vec![doc(dir.path(), "a.txt", "---\n---\nwait...", &config)];
        let renderer = Renderer::new("text", dir.path().join("out"), &config);

        let outcome = renderer.render_pages(None, &files).await;

        assert_eq!(outcome.pages[0].variables.get_str("content"), Some("wait\u{2026}"));
    }
}
