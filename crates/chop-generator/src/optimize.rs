//! Per-extension asset optimizers.
//!
//! Scripts, stylesheets and SVGs go through external commands, raster images
//! are scaled down in-process first, and everything else is copied verbatim.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::Duration,
};

use chop_core::BuildSettings;
use image::{ImageFormat, ImageReader, imageops::FilterType};
use tempfile::{NamedTempFile, TempPath};
use tokio::{process::Command, sync::Semaphore};
use tracing::{debug, trace};

use crate::assets::AssetError;

/// How an extension is optimized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerKind {
    /// External minifier.
    Minify,
    /// In-process downscale, then an optional external command.
    Image,
    /// External SVG optimizer.
    Svg,
    /// External command configured for an extension without built-in handling.
    Command,
    /// Verbatim copy.
    Copy,
}

/// Built-in optimizer table: extension, kind and default command.
///
/// `{input}` and `{output}` are replaced by the source and destination
/// paths. An empty command means no external step.
pub const DEFAULT_OPTIMIZERS: &[(&str, OptimizerKind, &str)] = &[
    (
        "js",
        OptimizerKind::Minify,
        "esbuild {input} --minify --log-level=error --outfile={output}",
    ),
    (
        "css",
        OptimizerKind::Minify,
        "esbuild {input} --minify --log-level=error --outfile={output}",
    ),
    (
        "png",
        OptimizerKind::Image,
        "oxipng --quiet --strip safe --out {output} {input}",
    ),
    (
        "jpg",
        OptimizerKind::Image,
        "jpegtran -copy none -optimize -progressive -outfile {output} {input}",
    ),
    (
        "jpeg",
        OptimizerKind::Image,
        "jpegtran -copy none -optimize -progressive -outfile {output} {input}",
    ),
    ("svg", OptimizerKind::Svg, "svgo {input} --quiet -o {output}"),
];

/// Optimizer selected for one extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Kind of optimization.
    pub kind: OptimizerKind,
    /// External command template, if any.
    pub command: Option<String>,
}

/// Runs optimizers, bounded by a shared job limit.
#[derive(Debug, Clone)]
pub struct Optimizer {
    plans: BTreeMap<String, Plan>,
    permits: Arc<Semaphore>,
    timeout: Duration,
    max_image_width: u32,
}

impl Optimizer {
    /// Build the optimizer table from the defaults and configured overrides.
    #[must_use]
    pub fn new(settings: &BuildSettings) -> Self {
        let mut plans: BTreeMap<String, Plan> = DEFAULT_OPTIMIZERS
            .iter()
            .map(|(ext, kind, command)| {
                let plan = Plan {
                    kind: *kind,
                    command: non_empty(command),
                };
                ((*ext).to_string(), plan)
            })
            .collect();

        for (ext, command) in &settings.optimizers {
            let ext = ext.trim_start_matches('.').to_ascii_lowercase();
            let command = non_empty(command);
            match plans.get_mut(&ext) {
                Some(plan) => plan.command = command,
                None => {
                    let kind = if command.is_some() {
                        OptimizerKind::Command
                    } else {
                        OptimizerKind::Copy
                    };
                    plans.insert(ext, Plan { kind, command });
                }
            }
        }

        Self {
            plans,
            permits: Arc::new(Semaphore::new(settings.effective_jobs())),
            timeout: settings.optimizer_timeout(),
            max_image_width: settings.max_image_width,
        }
    }

    /// Optimizer plan for a file, by extension.
    #[must_use]
    pub fn plan(&self, path: &Path) -> Plan {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .and_then(|ext| self.plans.get(&ext).cloned())
            .unwrap_or(Plan {
                kind: OptimizerKind::Copy,
                command: None,
            })
    }

    /// Optimize `input` into `output`.
    ///
    /// `output` is only complete when this returns `Ok`.
    pub async fn optimize(&self, input: &Path, output: &Path) -> Result<(), AssetError> {
        let Plan { kind, command } = self.plan(input);
        debug!(path = %input.display(), ?kind, "optimizing asset");

        match (kind, command) {
            (OptimizerKind::Image, command) => {
                let _permit = self.acquire().await?;
                let Some(command) = command else {
                    return self.downscale(input, output).await;
                };

                let intermediate = intermediate_path(output)?;
                self.downscale(input, &intermediate).await?;
                self.run(&command, &intermediate, output).await
            }
            (OptimizerKind::Copy, _) | (_, None) => copy(input, output).await,
            (_, Some(command)) => {
                let _permit = self.acquire().await?;
                self.run(&command, input, output).await
            }
        }
    }

    async fn acquire(&self) -> Result<tokio::sync::SemaphorePermit<'_>, AssetError> {
        self.permits
            .acquire()
            .await
            .map_err(|e| AssetError::optimizer(PathBuf::new(), e.to_string()))
    }

    async fn downscale(&self, input: &Path, output: &Path) -> Result<(), AssetError> {
        let (input_buf, output_buf) = (input.to_path_buf(), output.to_path_buf());
        let max_width = self.max_image_width;

        tokio::task::spawn_blocking(move || downscale_image(&input_buf, &output_buf, max_width))
            .await
            .map_err(|e| AssetError::optimizer(input, e.to_string()))?
    }

    async fn run(&self, template: &str, input: &Path, output: &Path) -> Result<(), AssetError> {
        let args = command_args(template, input, output);
        let Some((program, rest)) = args.split_first() else {
            return copy(input, output).await;
        };
        trace!(program, args = ?rest, "running optimizer");

        let child = Command::new(program)
            .args(rest)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AssetError::optimizer(input, format!("failed to start `{program}`: {e}")))?;

        let finished = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| AssetError::Timeout {
                path: input.to_path_buf(),
                timeout: self.timeout,
            })?
            .map_err(|e| AssetError::optimizer(input, e.to_string()))?;

        if !finished.status.success() {
            let stderr = String::from_utf8_lossy(&finished.stderr);
            return Err(AssetError::optimizer(
                input,
                format!("`{program}` exited with {}: {}", finished.status, stderr.trim()),
            ));
        }

        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            return Err(AssetError::optimizer(
                input,
                format!("`{program}` produced no output"),
            ));
        }

        Ok(())
    }
}

fn non_empty(command: &str) -> Option<String> {
    let command = command.trim();
    (!command.is_empty()).then(|| command.to_string())
}

/// Split a command template on whitespace and substitute the placeholders.
pub fn command_args(template: &str, input: &Path, output: &Path) -> Vec<String> {
    let input = input.to_string_lossy();
    let output = output.to_string_lossy();

    template
        .split_whitespace()
        .map(|arg| arg.replace("{input}", &input).replace("{output}", &output))
        .collect()
}

/// A uniquely named file next to `output` for the downscaled image, removed
/// when dropped. The name ends with the output's file name so external
/// commands still see the right extension.
fn intermediate_path(output: &Path) -> Result<TempPath, AssetError> {
    let name = output
        .file_name()
        .map_or_else(|| "asset".into(), |n| n.to_string_lossy().into_owned());
    let dir = output.parent().unwrap_or_else(|| Path::new("."));

    tempfile::Builder::new()
        .prefix("scaled-")
        .suffix(&format!("-{name}"))
        .tempfile_in(dir)
        .map(NamedTempFile::into_temp_path)
        .map_err(|e| AssetError::io(dir, e))
}

async fn copy(input: &Path, output: &Path) -> Result<(), AssetError> {
    tokio::fs::copy(input, output)
        .await
        .map(|_| ())
        .map_err(|e| AssetError::io(input, e))
}

/// Scale an image down to `max_width`, keeping its aspect ratio.
///
/// Images that already fit are copied without re-encoding.
fn downscale_image(input: &Path, output: &Path, max_width: u32) -> Result<(), AssetError> {
    let reader = ImageReader::open(input)
        .and_then(ImageReader::with_guessed_format)
        .map_err(|e| AssetError::io(input, e))?;
    let format = reader
        .format()
        .or_else(|| ImageFormat::from_path(input).ok())
        .ok_or_else(|| AssetError::optimizer(input, "unrecognized image format"))?;

    let image = reader
        .decode()
        .map_err(|e| AssetError::optimizer(input, format!("failed to decode: {e}")))?;

    if image.width() <= max_width {
        return std::fs::copy(input, output)
            .map(|_| ())
            .map_err(|e| AssetError::io(input, e));
    }

    let height = scaled_height(image.width(), image.height(), max_width);
    debug!(
        path = %input.display(),
        from = image.width(),
        to = max_width,
        "downscaling image"
    );

    image
        .resize_exact(max_width, height, FilterType::Lanczos3)
        .save_with_format(output, format)
        .map_err(|e| AssetError::optimizer(input, format!("failed to encode: {e}")))
}

fn scaled_height(width: u32, height: u32, max_width: u32) -> u32 {
    let scaled = u64::from(height) * u64::from(max_width) / u64::from(width.max(1));
    u32::try_from(scaled.max(1)).unwrap_or(u32::MAX)
}
