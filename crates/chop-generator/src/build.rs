//! Build orchestration.
//!
//! Collects all content once, then builds every output target concurrently.
//! Each target cleans its destination, resolves its templates, renders pages,
//! then indexes, and finally copies its static assets.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use chop_core::{ContentFile, GlobalConfig};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::{
    assets::{AssetCache, AssetError, AssetProcessor, AssetStats},
    collector::{CollectorError, ContentCollector, SiteContent},
    optimize::Optimizer,
    render::{RenderError, Renderer},
    template::{TemplateError, TemplateSet},
};

/// Build errors.
#[derive(Debug, Error)]
pub enum BuildError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Content could not be collected; nothing was written.
    #[error("collector error: {0}")]
    Collector(#[from] CollectorError),

    /// Destination directory could not be cleaned.
    #[error("failed to clean {path}: {source}")]
    Clean {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Document render or write error.
    #[error("render error: {0}")]
    Render(#[from] RenderError),

    /// Asset error.
    #[error("asset error: {0}")]
    Asset(#[from] AssetError),

    /// Template error.
    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    /// Target task panicked or was cancelled.
    #[error("build task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type for build operations.
pub type Result<T> = std::result::Result<T, BuildError>;

/// Progress of one target. States are passed strictly in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TargetState {
    Cleaning,
    TemplatesResolved,
    PagesRendered,
    IndexesRendered,
    AssetsCopied,
    Done,
}

/// Outcome of building one target.
#[derive(Debug)]
pub struct TargetReport {
    /// Target name.
    pub name: String,

    /// Last state reached.
    pub state: TargetState,

    /// Destination directory.
    pub dest_dir: PathBuf,

    /// Pages written.
    pub pages: usize,

    /// Index documents written.
    pub indexes: usize,

    /// Asset counters.
    pub assets: AssetStats,

    /// Per-item errors.
    pub errors: Vec<BuildError>,
}

impl TargetReport {
    fn new(name: &str, dest_dir: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            state: TargetState::Cleaning,
            dest_dir,
            pages: 0,
            indexes: 0,
            assets: AssetStats::default(),
            errors: Vec::new(),
        }
    }

    /// Whether the target finished without errors.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.state == TargetState::Done && self.errors.is_empty()
    }
}

/// Outcome of a whole build.
#[derive(Debug)]
pub struct BuildReport {
    /// Per-target reports, sorted by name.
    pub targets: Vec<TargetReport>,

    /// Number of documents collected.
    pub documents: usize,

    /// Wall-clock duration.
    pub duration: Duration,
}

impl BuildReport {
    /// Total number of errors across targets.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.targets.iter().map(|t| t.errors.len()).sum()
    }

    /// Whether every target finished without errors.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.targets.iter().all(TargetReport::is_success)
    }

    /// Report for a target.
    #[must_use]
    pub fn target(&self, name: &str) -> Option<&TargetReport> {
        self.targets.iter().find(|t| t.name == name)
    }
}

/// Template resolution of one target, as seen by [`Builder::check`].
#[derive(Debug)]
pub struct TargetCheck {
    /// Target name.
    pub name: String,
    /// Resolved `default` template.
    pub default: Option<PathBuf>,
    /// Resolved `index` template, after fallback.
    pub index: Option<PathBuf>,
    /// Compile error, if any.
    pub error: Option<TemplateError>,
}

/// Outcome of [`Builder::check`].
#[derive(Debug)]
pub struct CheckReport {
    /// Number of documents parsed.
    pub documents: usize,
    /// Number of index documents.
    pub indexes: usize,
    /// Per-target template resolution.
    pub targets: Vec<TargetCheck>,
}

impl CheckReport {
    /// Whether every target's templates compiled.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.targets.iter().all(|t| t.error.is_none())
    }
}

/// Everything a target build shares with its siblings.
#[derive(Debug)]
struct Shared {
    root: PathBuf,
    config: Arc<GlobalConfig>,
    content: SiteContent,
    cache: Arc<AssetCache>,
}

/// Site builder that orchestrates the build process.
#[derive(Debug)]
pub struct Builder {
    root: PathBuf,
    config: Arc<GlobalConfig>,
}

impl Builder {
    /// Create a builder for the project at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, config: GlobalConfig) -> Self {
        Self {
            root: root.into(),
            config: Arc::new(config),
        }
    }

    /// Project root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Template root; relative settings resolve against the project root.
    #[must_use]
    pub fn templates_dir(&self) -> PathBuf {
        self.root.join(&self.config.settings().templates_dir)
    }

    /// Destination root.
    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.root.join(&self.config.settings().output_dir)
    }

    /// Asset cache root.
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(&self.config.settings().cache_dir)
    }

    /// Output targets: the subdirectories of the template root, sorted.
    pub fn targets(&self) -> Result<Vec<String>> {
        let dir = self.templates_dir();
        if !dir.is_dir() {
            warn!(dir = %dir.display(), "template directory not found");
            return Ok(Vec::new());
        }

        let mut targets = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') {
                targets.push(name);
            }
        }

        targets.sort();
        Ok(targets)
    }

    /// Execute the full build.
    ///
    /// Malformed content aborts before any destination is touched. Every
    /// other failure is recorded in the report.
    pub async fn build(&self) -> Result<BuildReport> {
        let start = Instant::now();

        info!(root = %self.root.display(), "starting build");

        let collector = ContentCollector::new(Arc::clone(&self.config), &self.root);
        let content = collector.collect().await?;
        let documents = content.len();

        let targets = self.targets()?;
        let cache = AssetCache::new(self.cache_dir(), Optimizer::new(self.config.settings()));
        let shared = Arc::new(Shared {
            root: self.root.clone(),
            config: Arc::clone(&self.config),
            content,
            cache: Arc::new(cache),
        });

        let output_dir = self.output_dir();
        let templates_dir = self.templates_dir();

        let mut tasks = JoinSet::new();
        for name in targets {
            let shared = Arc::clone(&shared);
            let dest_dir = output_dir.join(&name);
            let template_dir = templates_dir.join(&name);
            tasks.spawn(async move { build_target(&shared, &name, &template_dir, dest_dir).await });
        }

        let mut reports = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            reports.push(joined?);
        }
        reports.sort_by(|a, b| a.name.cmp(&b.name));

        let report = BuildReport {
            targets: reports,
            documents,
            duration: start.elapsed(),
        };

        info!(
            targets = report.targets.len(),
            documents = report.documents,
            errors = report.error_count(),
            duration_ms = report.duration.as_millis() as u64,
            "build complete"
        );

        Ok(report)
    }

    /// Parse all content and resolve every target's templates without
    /// writing anything.
    pub async fn check(&self) -> Result<CheckReport> {
        let collector = ContentCollector::new(Arc::clone(&self.config), &self.root);
        let content = collector.collect().await?;
        let templates_dir = self.templates_dir();

        let mut targets = Vec::new();
        for name in self.targets()? {
            let check = match TemplateSet::resolve(&templates_dir.join(&name)).await {
                Ok(set) => TargetCheck {
                    name,
                    default: set.default_template().map(|t| t.path().to_path_buf()),
                    index: set.index_template().map(|t| t.path().to_path_buf()),
                    error: None,
                },
                Err(e) => TargetCheck {
                    name,
                    default: None,
                    index: None,
                    error: Some(e),
                },
            };
            targets.push(check);
        }

        Ok(CheckReport {
            documents: content.len(),
            indexes: content.indexes().count(),
            targets,
        })
    }
}

async fn build_target(
    shared: &Shared,
    name: &str,
    template_dir: &Path,
    dest_dir: PathBuf,
) -> TargetReport {
    let mut report = TargetReport::new(name, dest_dir);
    info!(target = %name, dest = %report.dest_dir.display(), "building target");

    if let Err(e) = clean(&report.dest_dir).await {
        report.errors.push(e);
        return report;
    }

    let templates = match TemplateSet::resolve(template_dir).await {
        Ok(templates) => templates,
        Err(source) => {
            warn!(target = %name, error = %source, "template resolution failed");
            report.errors.push(
                RenderError::Resolve {
                    target: name.to_string(),
                    source,
                }
                .into(),
            );
            TemplateSet::default()
        }
    };
    if templates.default_template().is_none() {
        debug!(target = %name, "no default template");
    }
    report.state = TargetState::TemplatesResolved;

    let renderer = Renderer::new(name, report.dest_dir.clone(), &shared.config);

    let pages: Vec<Arc<ContentFile>> = shared.content.pages().cloned().collect();
    let phase = renderer.render_pages(templates.default_template(), &pages).await;
    report.pages = phase.written;
    report.errors.extend(phase.errors.into_iter().map(BuildError::from));
    let rendered = phase.pages;
    report.state = TargetState::PagesRendered;

    let indexes: Vec<Arc<ContentFile>> = shared.content.indexes().cloned().collect();
    let phase = renderer
        .render_indexes(templates.index_template(), &indexes, &rendered)
        .await;
    report.indexes = phase.written;
    report.errors.extend(phase.errors.into_iter().map(BuildError::from));
    report.state = TargetState::IndexesRendered;

    let static_name = &shared.config.settings().static_dir;
    let static_dirs = [shared.root.join(static_name), template_dir.join(static_name)];
    let assets = AssetProcessor::new(Arc::clone(&shared.cache))
        .process(&static_dirs, &report.dest_dir)
        .await;
    report.assets = assets.stats;
    report.errors.extend(assets.errors.into_iter().map(BuildError::from));
    report.state = TargetState::AssetsCopied;

    report.state = TargetState::Done;
    info!(
        target = %name,
        pages = report.pages,
        indexes = report.indexes,
        assets = report.assets.copied,
        errors = report.errors.len(),
        "target complete"
    );

    report
}

/// Wipe and recreate a destination directory.
async fn clean(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!(dir = %dir.display(), "cleaned output directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(BuildError::Clean {
                path: dir.to_path_buf(),
                source,
            });
        }
    }

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| BuildError::Clean {
            path: dir.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_targets_sorted() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("templates/text")).unwrap();
        fs::create_dir_all(dir.path().join("templates/html")).unwrap();
        fs::create_dir_all(dir.path().join("templates/.hidden")).unwrap();
        write(dir.path(), "templates/README", "not a target");

        let builder = Builder::new(dir.path(), GlobalConfig::default());
        assert_eq!(builder.targets().unwrap(), ["html", "text"]);
    }

    #[test]
    fn test_targets_without_template_dir() {
        let dir = TempDir::new().unwrap();
        let builder = Builder::new(dir.path(), GlobalConfig::default());
        assert!(builder.targets().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clean_removes_stale_output() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "index.txt", "---\n---\nHi");
        write(dir.path(), "templates/html/default.html", "{{ content_rendered }}");
        write(dir.path(), "dist/html/stale.html", "old");

        let report = Builder::new(dir.path(), GlobalConfig::default())
            .build()
            .await
            .unwrap();

        assert!(report.is_success());
        assert!(!dir.path().join("dist/html/stale.html").exists());
        assert!(dir.path().join("dist/html/index.html").exists());
    }

    #[tokio::test]
    async fn test_template_compile_error_still_copies_assets() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.txt", "---\n---\nA");
        write(dir.path(), "templates/html/default.html", "{% for %}");
        write(dir.path(), "templates/html/static/site.txt", "asset");

        let report = Builder::new(dir.path(), GlobalConfig::default())
            .build()
            .await
            .unwrap();

        let html = report.target("html").unwrap();
        assert_eq!(html.errors.len(), 1);
        assert!(matches!(
            html.errors[0],
            BuildError::Render(RenderError::Resolve { .. })
        ));
        assert_eq!(html.pages, 0);
        assert_eq!(html.state, TargetState::Done);
        assert!(dir.path().join("dist/html/site.txt").exists());
        assert!(!dir.path().join("dist/html/a.html").exists());
    }

    #[tokio::test]
    async fn test_check_writes_nothing() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "index.txt", "---\n---\nHi");
        write(dir.path(), "templates/html/default.html", "{{ content_rendered }}");
        write(dir.path(), "templates/gemini/index.gmi", "{{ content_rendered }}");

        let report = Builder::new(dir.path(), GlobalConfig::default())
            .check()
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.documents, 1);
        assert_eq!(report.indexes, 1);
        assert_eq!(report.targets.len(), 2);
        assert_eq!(report.targets[0].name, "gemini");
        assert!(report.targets[0].default.is_none());
        assert!(report.targets[0].index.is_some());
        assert!(report.targets[1].index.as_ref().unwrap().ends_with("default.html"));
        assert!(!dir.path().join("dist").exists());
    }
}
