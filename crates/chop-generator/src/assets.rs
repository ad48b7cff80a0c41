//! Static asset processing and caching.
//!
//! Every file under a `static` directory is optimized once into a cache
//! keyed by its base name, then copied from the cache into the target's
//! destination tree. An existing cache entry is always trusted.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use thiserror::Error;
use tokio::{
    sync::{Mutex, OnceCell},
    task::JoinSet,
};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::optimize::Optimizer;

/// Directory inside the cache root holding in-progress optimizer output.
const STAGING_DIR: &str = ".staging";

/// Asset processing errors.
#[derive(Debug, Error)]
pub enum AssetError {
    /// IO error on a specific path.
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Optimizer failed; the asset was copied unoptimized.
    #[error("optimizer failed for {path}: {message}")]
    Optimizer { path: PathBuf, message: String },

    /// Optimizer exceeded its time limit and was killed.
    #[error("optimizer timed out after {}s for {path}", timeout.as_secs())]
    Timeout { path: PathBuf, timeout: Duration },

    /// Static directory could not be traversed.
    #[error("failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

impl AssetError {
    /// Create an IO error for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create an optimizer error for `path`.
    pub fn optimizer(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Optimizer {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for asset operations.
pub type Result<T> = std::result::Result<T, AssetError>;

/// One file under a static directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticAsset {
    /// Source file.
    pub source_path: PathBuf,
    /// Cache entry, named after the source base name.
    pub cached_path: PathBuf,
    /// Location in the target's destination tree.
    pub destination_path: PathBuf,
}

/// Asset counters for one target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssetStats {
    /// Files written to the destination.
    pub copied: usize,
    /// Files served from an existing cache entry.
    pub cache_hits: usize,
    /// Optimizer invocations performed for this target.
    pub optimized: usize,
}

impl AssetStats {
    fn add(&mut self, other: Self) {
        self.copied += other.copied;
        self.cache_hits += other.cache_hits;
        self.optimized += other.optimized;
    }
}

#[derive(Debug, Clone, Copy)]
enum CacheState {
    Ready { optimized: bool },
    Failed,
}

/// Optimized asset cache shared by all targets of a build.
///
/// Concurrent requests for the same cache entry share a single
/// optimization.
#[derive(Debug)]
pub struct AssetCache {
    root: PathBuf,
    optimizer: Optimizer,
    entries: Mutex<HashMap<PathBuf, Arc<OnceCell<CacheState>>>>,
}

impl AssetCache {
    /// Create a cache rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, optimizer: Optimizer) -> Self {
        Self {
            root: root.into(),
            optimizer,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cache root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Cache entry for a source file.
    #[must_use]
    pub fn cached_path(&self, source: &Path) -> PathBuf {
        match source.file_name() {
            Some(name) => self.root.join(name),
            None => self.root.join("asset"),
        }
    }

    /// Copy one asset into place, optimizing it first when the cache has no
    /// entry for it.
    ///
    /// Optimizer failures still produce a destination file, copied from the
    /// source, and are reported alongside the stats.
    pub async fn install(&self, asset: &StaticAsset) -> (AssetStats, Option<AssetError>) {
        let mut stats = AssetStats::default();

        let (state, error) = self.ensure(asset).await;
        let copy_from = match state {
            CacheState::Ready { optimized } => {
                if optimized {
                    stats.optimized += 1;
                } else {
                    stats.cache_hits += 1;
                }
                &asset.cached_path
            }
            CacheState::Failed => &asset.source_path,
        };

        match copy_file(copy_from, &asset.destination_path).await {
            Ok(()) => {
                stats.copied += 1;
                (stats, error)
            }
            Err(copy_error) => {
                if let Some(error) = error {
                    warn!(error = %error, "asset optimizer failed before copy failure");
                }
                (stats, Some(copy_error))
            }
        }
    }

    /// Make sure the cache entry exists, running the optimizer at most once
    /// per entry and build.
    ///
    /// The returned `optimized` flag is only set for the caller that ran the
    /// optimizer, which is also the only one to receive its error.
    async fn ensure(&self, asset: &StaticAsset) -> (CacheState, Option<AssetError>) {
        let cell = {
            let mut entries = self.entries.lock().await;
            Arc::clone(entries.entry(asset.cached_path.clone()).or_default())
        };

        let mut ran = false;
        let mut error = None;
        let (ran_flag, error_slot) = (&mut ran, &mut error);

        let state = *cell
            .get_or_init(|| async move {
                *ran_flag = true;
                match self.populate(asset).await {
                    Ok(optimized) => CacheState::Ready { optimized },
                    Err(e) => {
                        *error_slot = Some(e);
                        CacheState::Failed
                    }
                }
            })
            .await;

        match state {
            CacheState::Ready { optimized } => (CacheState::Ready { optimized: optimized && ran }, error),
            CacheState::Failed => (CacheState::Failed, error),
        }
    }

    /// Fill the cache entry; returns whether the optimizer ran.
    async fn populate(&self, asset: &StaticAsset) -> Result<bool> {
        if tokio::fs::try_exists(&asset.cached_path)
            .await
            .map_err(|e| AssetError::io(&asset.cached_path, e))?
        {
            debug!(path = %asset.cached_path.display(), "asset cache hit");
            return Ok(false);
        }

        let staging_dir = self.root.join(STAGING_DIR);
        tokio::fs::create_dir_all(&staging_dir)
            .await
            .map_err(|e| AssetError::io(&staging_dir, e))?;

        let staging = match asset.cached_path.file_name() {
            Some(name) => staging_dir.join(name),
            None => staging_dir.join("asset"),
        };

        if let Err(e) = self.optimizer.optimize(&asset.source_path, &staging).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e);
        }

        tokio::fs::rename(&staging, &asset.cached_path)
            .await
            .map_err(|e| AssetError::io(&asset.cached_path, e))?;

        debug!(
            source = %asset.source_path.display(),
            cached = %asset.cached_path.display(),
            "asset optimized"
        );
        Ok(true)
    }
}

/// Result of processing one or more static directories.
#[derive(Debug, Default)]
pub struct AssetOutcome {
    /// Counters.
    pub stats: AssetStats,
    /// Per-asset failures.
    pub errors: Vec<AssetError>,
}

/// Copies static directories into a destination tree through the cache.
#[derive(Debug, Clone)]
pub struct AssetProcessor {
    cache: Arc<AssetCache>,
}

impl AssetProcessor {
    /// Create a processor backed by `cache`.
    #[must_use]
    pub fn new(cache: Arc<AssetCache>) -> Self {
        Self { cache }
    }

    /// List the assets of `static_dir` for `dest_dir`, sorted by path.
    ///
    /// Dotfiles such as `.well-known/` or `.htaccess` are included. A missing
    /// directory has no assets.
    pub fn discover(&self, static_dir: &Path, dest_dir: &Path) -> Result<Vec<StaticAsset>> {
        if !static_dir.is_dir() {
            return Ok(Vec::new());
        }

        let walker = WalkDir::new(static_dir).sort_by_file_name().into_iter();

        let mut assets = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|source| AssetError::Walk {
                path: static_dir.to_path_buf(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let source_path = entry.into_path();
            let relative = source_path
                .strip_prefix(static_dir)
                .map_err(|_| AssetError::optimizer(&source_path, "asset outside static directory"))?;

            assets.push(StaticAsset {
                cached_path: self.cache.cached_path(&source_path),
                destination_path: dest_dir.join(relative),
                source_path,
            });
        }

        Ok(assets)
    }

    /// Process the static directories in order.
    pub async fn process(&self, static_dirs: &[PathBuf], dest_dir: &Path) -> AssetOutcome {
        let mut outcome = AssetOutcome::default();

        for static_dir in static_dirs {
            match self.discover(static_dir, dest_dir) {
                Ok(assets) if assets.is_empty() => {}
                Ok(assets) => {
                    info!(
                        source = %static_dir.display(),
                        dest = %dest_dir.display(),
                        count = assets.len(),
                        "processing assets"
                    );
                    self.process_assets(assets, &mut outcome).await;
                }
                Err(e) => outcome.errors.push(e),
            }
        }

        outcome
    }

    async fn process_assets(&self, assets: Vec<StaticAsset>, outcome: &mut AssetOutcome) {
        let mut tasks = JoinSet::new();
        for asset in assets {
            let cache = Arc::clone(&self.cache);
            tasks.spawn(async move { cache.install(&asset).await });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((stats, error)) => {
                    outcome.stats.add(stats);
                    if let Some(error) = error {
                        warn!(error = %error, "asset degraded");
                        outcome.errors.push(error);
                    }
                }
                Err(e) => outcome
                    .errors
                    .push(AssetError::optimizer(PathBuf::new(), format!("asset task failed: {e}"))),
            }
        }
    }
}

async fn copy_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| AssetError::io(parent, e))?;
    }
    tokio::fs::copy(from, to)
        .await
        .map(|_| ())
        .map_err(|e| AssetError::io(to, e))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chop_core::BuildSettings;
    use tempfile::TempDir;

    use super::*;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn processor(cache_dir: &Path, overrides: &[(&str, &str)]) -> AssetProcessor {
        let mut settings = BuildSettings::default();
        for (ext, command) in overrides {
            settings
                .optimizers
                .insert((*ext).to_string(), (*command).to_string());
        }
        let cache = AssetCache::new(cache_dir, Optimizer::new(&settings));
        AssetProcessor::new(Arc::new(cache))
    }

    #[test]
    fn test_discover_assets() {
        let dir = TempDir::new().unwrap();
        let static_dir = dir.path().join("static");
        write(&static_dir.join("css/site.css"), "a");
        write(&static_dir.join("robots.txt"), "b");

        let processor = processor(&dir.path().join("cache"), &[]);
        let assets = processor
            .discover(&static_dir, &dir.path().join("dist/html"))
            .unwrap();

        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0].source_path, static_dir.join("css/site.css"));
        assert_eq!(assets[0].cached_path, dir.path().join("cache/site.css"));
        assert_eq!(
            assets[0].destination_path,
            dir.path().join("dist/html/css/site.css")
        );
        assert_eq!(assets[1].cached_path, dir.path().join("cache/robots.txt"));
    }

    #[tokio::test]
    async fn test_dotfiles_are_copied() {
        let dir = TempDir::new().unwrap();
        let static_dir = dir.path().join("static");
        write(&static_dir.join(".well-known/security.txt"), "Contact: x");
        write(&static_dir.join(".htaccess"), "Options -Indexes");
        write(&static_dir.join(".nojekyll"), "");

        let outcome = processor(&dir.path().join("cache"), &[])
            .process(&[static_dir], &dir.path().join("out"))
            .await;

        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.stats.copied, 3);
        assert_eq!(
            fs::read_to_string(dir.path().join("out/.well-known/security.txt")).unwrap(),
            "Contact: x"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("out/.htaccess")).unwrap(),
            "Options -Indexes"
        );
        assert!(dir.path().join("out/.nojekyll").exists());
    }

    #[test]
    fn test_missing_static_dir() {
        let dir = TempDir::new().unwrap();
        let processor = processor(&dir.path().join("cache"), &[]);
        let assets = processor
            .discover(&dir.path().join("nope"), dir.path())
            .unwrap();
        assert!(assets.is_empty());
    }

    #[tokio::test]
    async fn test_copy_and_cache_hit() {
        let dir = TempDir::new().unwrap();
        let static_dir = dir.path().join("static");
        let cache_dir = dir.path().join("cache");
        write(&static_dir.join("fonts/a.woff2"), "font");

        let first = processor(&cache_dir, &[])
            .process(&[static_dir.clone()], &dir.path().join("out1"))
            .await;
        assert!(first.errors.is_empty());
        assert_eq!(first.stats.copied, 1);
        assert_eq!(first.stats.optimized, 1);
        assert_eq!(fs::read_to_string(cache_dir.join("a.woff2")).unwrap(), "font");

        let second = processor(&cache_dir, &[])
            .process(&[static_dir], &dir.path().join("out2"))
            .await;
        assert_eq!(second.stats.cache_hits, 1);
        assert_eq!(second.stats.optimized, 0);
        assert_eq!(
            fs::read_to_string(dir.path().join("out2/fonts/a.woff2")).unwrap(),
            "font"
        );
    }

    #[tokio::test]
    async fn test_existing_cache_entry_is_authoritative() {
        let dir = TempDir::new().unwrap();
        let static_dir = dir.path().join("static");
        let cache_dir = dir.path().join("cache");
        write(&static_dir.join("app.js"), "source");
        write(&cache_dir.join("app.js"), "cached");

        let outcome = processor(&cache_dir, &[])
            .process(&[static_dir], &dir.path().join("out"))
            .await;

        assert!(outcome.errors.is_empty());
        assert_eq!(
            fs::read_to_string(dir.path().join("out/app.js")).unwrap(),
            "cached"
        );
    }

    #[tokio::test]
    async fn test_optimizer_failure_falls_back_to_source() {
        let dir = TempDir::new().unwrap();
        let static_dir = dir.path().join("static");
        let cache_dir = dir.path().join("cache");
        write(&static_dir.join("app.js"), "let x;");

        let outcome = processor(&cache_dir, &[("js", "chop-no-such-optimizer {input}")])
            .process(&[static_dir], &dir.path().join("out"))
            .await;

        assert_eq!(outcome.errors.len(), 1);
        assert!(matches!(outcome.errors[0], AssetError::Optimizer { .. }));
        assert_eq!(outcome.stats.copied, 1);
        assert_eq!(
            fs::read_to_string(dir.path().join("out/app.js")).unwrap(),
            "let x;"
        );
        assert!(!cache_dir.join("app.js").exists());
        assert!(!cache_dir.join(STAGING_DIR).join("app.js").exists());
    }

    #[tokio::test]
    async fn test_single_flight_across_destinations() {
        let dir = TempDir::new().unwrap();
        let static_dir = dir.path().join("static");
        write(&static_dir.join("site.css"), "body{}");

        let processor = processor(&dir.path().join("cache"), &[("css", "")]);
        let static_dirs = [static_dir];
        let (a_dir, b_dir) = (dir.path().join("a"), dir.path().join("b"));
        let (a, b) = tokio::join!(
            processor.process(&static_dirs, &a_dir),
            processor.process(&static_dirs, &b_dir),
        );

        assert_eq!(a.stats.optimized + b.stats.optimized, 1);
        assert_eq!(a.stats.cache_hits + b.stats.cache_hits, 1);
        assert!(dir.path().join("a/site.css").exists());
        assert!(dir.path().join("b/site.css").exists());
    }

    #[tokio::test]
    async fn test_site_and_target_static_dirs() {
        let dir = TempDir::new().unwrap();
        let site_static = dir.path().join("static");
        let target_static = dir.path().join("templates/html/static");
        write(&site_static.join("favicon.ico"), "site");
        write(&target_static.join("img/logo.txt"), "target");

        let outcome = processor(&dir.path().join("cache"), &[])
            .process(&[site_static, target_static], &dir.path().join("out"))
            .await;

        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.stats.copied, 2);
        assert_eq!(
            fs::read_to_string(dir.path().join("out/favicon.ico")).unwrap(),
            "site"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("out/img/logo.txt")).unwrap(),
            "target"
        );
    }

    #[tokio::test]
    async fn test_base_name_collision_shares_cache_entry() {
        let dir = TempDir::new().unwrap();
        let static_dir = dir.path().join("static");
        write(&static_dir.join("a/logo.txt"), "first");
        write(&static_dir.join("b/logo.txt"), "second");

        let outcome = processor(&dir.path().join("cache"), &[])
            .process(&[static_dir], &dir.path().join("out"))
            .await;

        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.stats.copied, 2);
        assert_eq!(outcome.stats.optimized, 1);
        let a = fs::read_to_string(dir.path().join("out/a/logo.txt")).unwrap();
        let b = fs::read_to_string(dir.path().join("out/b/logo.txt")).unwrap();
        assert_eq!(a, b);
    }
}
