//! Build command - renders every output target

use std::path::{Path, PathBuf};

use chop_core::{BuildSettings, GlobalConfig, config::CONFIG_FILE};
use chop_generator::{BuildReport, Builder};
use color_eyre::eyre::{Result, WrapErr, bail};

/// Command-line overrides for the `build` section of `config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Destination root.
    pub output: Option<PathBuf>,
    /// Asset cache root.
    pub cache: Option<PathBuf>,
    /// Maximum concurrent optimizer invocations.
    pub jobs: Option<usize>,
    /// Optimizer timeout in seconds.
    pub timeout: Option<u64>,
    /// Disable smart punctuation.
    pub no_typography: bool,
}

impl BuildOptions {
    /// Apply the overrides on top of the configured settings.
    pub fn apply(&self, settings: &mut BuildSettings) {
        if let Some(output) = &self.output {
            settings.output_dir.clone_from(output);
        }
        if let Some(cache) = &self.cache {
            settings.cache_dir.clone_from(cache);
        }
        if let Some(jobs) = self.jobs {
            settings.jobs = jobs;
        }
        if let Some(timeout) = self.timeout {
            settings.optimizer_timeout_secs = timeout;
        }
        if self.no_typography {
            settings.typography.enabled = false;
        }
    }
}

/// Load `config.yaml` under `root` and apply CLI overrides.
///
/// A missing or unparsable config file yields the defaults.
pub fn load_config(root: &Path, options: &BuildOptions) -> GlobalConfig {
    let mut config = GlobalConfig::load(&root.join(CONFIG_FILE));
    options.apply(config.settings_mut());
    tracing::debug!(settings = ?config.settings(), "loaded configuration");
    config
}

/// Run the build command.
///
/// Fails when content cannot be collected or any target reports an error.
pub async fn run(root: &Path, options: &BuildOptions) -> Result<()> {
    tracing::info!(root = %root.display(), ?options, "Starting build");

    let config = load_config(root, options);
    let builder = Builder::new(root, config);
    let report = builder.build().await.wrap_err("Build failed")?;

    print_report(&report, &builder.output_dir());

    if !report.is_success() {
        bail!("Build finished with {} error(s)", report.error_count());
    }

    tracing::info!(duration = ?report.duration, "Build completed successfully");
    Ok(())
}

fn print_report(report: &BuildReport, output: &Path) {
    println!();
    if report.targets.is_empty() {
        println!("  No output targets found");
    }

    for target in &report.targets {
        let mark = if target.is_success() { "✓" } else { "✗" };
        println!(
            "  {mark} {:<12} pages: {:<4} indexes: {:<3} assets: {:<4} (cached: {}, optimized: {})",
            target.name,
            target.pages,
            target.indexes,
            target.assets.copied,
            target.assets.cache_hits,
            target.assets.optimized,
        );
        for error in &target.errors {
            println!("      {error}");
        }
    }

    println!();
    println!("  Documents:  {}", report.documents);
    println!("  Errors:     {}", report.error_count());
    println!("  Duration:   {:.2}s", report.duration.as_secs_f64());
    println!("  Output:     {}", output.display());
    println!();
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_options_override_settings() {
        let mut settings = BuildSettings::default();
        let options = BuildOptions {
            output: Some(PathBuf::from("public")),
            cache: None,
            jobs: Some(2),
            timeout: Some(5),
            no_typography: true,
        };

        options.apply(&mut settings);

        assert_eq!(settings.output_dir, PathBuf::from("public"));
        assert_eq!(settings.cache_dir, BuildSettings::default().cache_dir);
        assert_eq!(settings.jobs, 2);
        assert_eq!(settings.optimizer_timeout_secs, 5);
        assert!(!settings.typography.enabled);
    }

    #[test]
    fn test_cli_wins_over_config_file() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("config.yaml"),
            "title: Site\nbuild:\n  output_dir: out\n  jobs: 8\n",
        )
        .unwrap();

        let options = BuildOptions {
            jobs: Some(1),
            ..Default::default()
        };
        let config = load_config(dir.path(), &options);

        assert_eq!(config.settings().output_dir, PathBuf::from("out"));
        assert_eq!(config.settings().jobs, 1);
        assert_eq!(config.variables().get_str("title"), Some("Site"));
    }

    #[tokio::test]
    async fn test_run_fails_on_item_errors() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("templates/html")).unwrap();
        fs::write(dir.path().join("templates/html/default.html"), "{{ missing }}").unwrap();
        fs::write(dir.path().join("a.txt"), "---\n---\nbody").unwrap();

        let err = run(dir.path(), &BuildOptions::default()).await.unwrap_err();
        assert!(err.to_string().contains("1 error"));
    }

    #[tokio::test]
    async fn test_run_succeeds() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("templates/html")).unwrap();
        fs::write(
            dir.path().join("templates/html/default.html"),
            "{{ content_rendered }}",
        )
        .unwrap();
        fs::write(dir.path().join("a.txt"), "---\n---\nbody").unwrap();

        run(dir.path(), &BuildOptions::default()).await.unwrap();
        assert!(dir.path().join("dist/html/a.html").exists());
    }
}
