//! Content collection.
//!
//! Walks the project root for content documents and parses them all before
//! any output target is touched. A malformed document aborts collection.

use std::{
    ffi::OsStr,
    path::PathBuf,
    sync::Arc,
};

use chop_core::{ContentFile, CoreError, GlobalConfig, config::CONFIG_FILE};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

/// Content collection errors.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Directory traversal failed.
    #[error("failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    /// Document could not be read or parsed.
    #[error(transparent)]
    Document(#[from] CoreError),

    /// Parsing task panicked or was cancelled.
    #[error("content task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type for collector operations.
pub type Result<T> = std::result::Result<T, CollectorError>;

/// All documents of a site, in discovery order.
#[derive(Debug, Default)]
pub struct SiteContent {
    /// Parsed documents sorted by path.
    pub files: Vec<Arc<ContentFile>>,
}

impl SiteContent {
    /// Documents rendered with the `default` template.
    pub fn pages(&self) -> impl Iterator<Item = &Arc<ContentFile>> {
        self.files.iter().filter(|file| !file.is_index)
    }

    /// Documents rendered with the `index` template.
    pub fn indexes(&self) -> impl Iterator<Item = &Arc<ContentFile>> {
        self.files.iter().filter(|file| file.is_index)
    }

    /// Number of documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether no documents were found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Content collector that walks the project root and parses documents.
#[derive(Debug)]
pub struct ContentCollector {
    config: Arc<GlobalConfig>,
    root: PathBuf,
}

impl ContentCollector {
    /// Create a new content collector.
    #[must_use]
    pub fn new(config: Arc<GlobalConfig>, root: impl Into<PathBuf>) -> Self {
        Self {
            config,
            root: root.into(),
        }
    }

    /// Find every content document, sorted by path.
    ///
    /// Hidden directories and directories named like the template, output,
    /// cache or static directories are skipped at any depth.
    pub fn discover(&self) -> Result<Vec<PathBuf>> {
        let settings = self.config.settings();
        let excluded: Vec<&OsStr> = settings.excluded_dir_names().collect();
        let extension = settings.content_extension.trim_start_matches('.');

        let walker = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !is_skipped(entry, &excluded));

        let mut files = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|source| CollectorError::Walk {
                path: self.root.clone(),
                source,
            })?;

            if !entry.file_type().is_file() {
                continue;
            }
            if entry.depth() == 1 && entry.file_name() == CONFIG_FILE {
                continue;
            }
            if entry.path().extension().is_some_and(|ext| ext == extension) {
                files.push(entry.into_path());
            }
        }

        Ok(files)
    }

    /// Discover and parse every document.
    ///
    /// Documents are parsed concurrently but keep discovery order. When
    /// several documents are malformed, the first one in that order is
    /// reported.
    pub async fn collect(&self) -> Result<SiteContent> {
        info!(root = %self.root.display(), "collecting content");

        let paths = self.discover()?;
        info!(count = paths.len(), "found content files");

        let mut tasks = JoinSet::new();
        for (index, path) in paths.iter().cloned().enumerate() {
            let root = self.root.clone();
            let config = Arc::clone(&self.config);
            tasks.spawn(async move {
                let source = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(CoreError::from)?;
                let file = ContentFile::parse(&root, &path, &source, &config)?;
                Ok::<_, CoreError>((index, file))
            });
        }

        let mut slots: Vec<Option<ContentFile>> = (0..paths.len()).map(|_| None).collect();
        let mut failures: Vec<(usize, CoreError)> = Vec::new();

        while let Some(joined) = tasks.join_next().await {
            match joined? {
                Ok((index, file)) => {
                    debug!(path = %file.source_path.display(), site_path = %file.site_path.prefixed, "parsed document");
                    slots[index] = Some(file);
                }
                Err(e) => {
                    let index = failure_index(&paths, &e);
                    failures.push((index, e));
                }
            }
        }

        if let Some((_, error)) = failures.into_iter().min_by_key(|(index, _)| *index) {
            return Err(error.into());
        }

        let files: Vec<Arc<ContentFile>> = slots.into_iter().flatten().map(Arc::new).collect();

        info!(
            documents = files.len(),
            indexes = files.iter().filter(|f| f.is_index).count(),
            "content collection complete"
        );

        Ok(SiteContent { files })
    }
}

fn is_skipped(entry: &DirEntry, excluded: &[&OsStr]) -> bool {
    if entry.depth() == 0 {
        return false;
    }

    let name = entry.file_name();
    if name.to_string_lossy().starts_with('.') {
        return true;
    }

    entry.file_type().is_dir() && excluded.contains(&name)
}

fn failure_index(paths: &[PathBuf], error: &CoreError) -> usize {
    match error {
        CoreError::MalformedFrontmatter { path, .. } | CoreError::Config { path, .. } => paths
            .iter()
            .position(|candidate| candidate == path)
            .unwrap_or(usize::MAX),
        _ => usize::MAX,
    }
}
