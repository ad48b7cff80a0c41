//! Check command - validate content and templates without writing output

use std::path::Path;

use chop_generator::{Builder, CheckReport};
use color_eyre::eyre::{Result, WrapErr, bail};

use super::build::{BuildOptions, load_config};

/// Problems found by [`run`].
#[derive(Debug, Default)]
struct ValidationResult {
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl ValidationResult {
    fn from_report(report: &CheckReport) -> Self {
        let mut result = Self::default();

        if report.targets.is_empty() {
            result.warnings.push("no output targets found".to_string());
        }

        for target in &report.targets {
            if let Some(error) = &target.error {
                result.errors.push(format!("{}: {error}", target.name));
            } else if target.default.is_none() && target.index.is_none() {
                result.warnings.push(format!(
                    "{}: no default template, target renders no documents",
                    target.name
                ));
            } else if target.default.is_none() {
                result.warnings.push(format!(
                    "{}: no default template, only index documents are rendered",
                    target.name
                ));
            }
        }

        result
    }
}

/// Run the check command.
///
/// Parses every content document and compiles every target's templates.
pub async fn run(root: &Path, strict: bool) -> Result<()> {
    tracing::info!(root = %root.display(), strict, "Checking content and templates");

    let config = load_config(root, &BuildOptions::default());
    let report = Builder::new(root, config)
        .check()
        .await
        .wrap_err("Content check failed")?;

    println!("Checking content...");
    println!(
        "  ✓ {} document(s), {} index document(s)",
        report.documents, report.indexes
    );

    println!("\nChecking templates...");
    for target in &report.targets {
        let describe = |path: Option<&std::path::PathBuf>| {
            path.and_then(|p| p.file_name())
                .map_or_else(|| "-".to_string(), |n| n.to_string_lossy().into_owned())
        };
        let mark = if target.error.is_some() { "✗" } else { "✓" };
        println!(
            "  {mark} {:<12} default: {:<14} index: {}",
            target.name,
            describe(target.default.as_ref()),
            describe(target.index.as_ref()),
        );
    }

    let result = ValidationResult::from_report(&report);

    println!();
    println!("Summary:");
    println!("  Errors:   {}", result.errors.len());
    println!("  Warnings: {}", result.warnings.len());

    if !result.errors.is_empty() {
        println!();
        println!("Errors:");
        for err in &result.errors {
            println!("  ✗ {err}");
        }
    }

    if !result.warnings.is_empty() {
        println!();
        println!("Warnings:");
        for warn in &result.warnings {
            println!("  ⚠ {warn}");
        }
    }

    if !result.errors.is_empty() {
        bail!("Validation failed with {} error(s)", result.errors.len());
    }

    if strict && !result.warnings.is_empty() {
        bail!(
            "Validation failed with {} warning(s) (strict mode)",
            result.warnings.len()
        );
    }

    println!();
    println!("✓ All checks passed");

    Ok(())
}
