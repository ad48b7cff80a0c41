//! Chop Generator Library
//!
//! Static site build engine for chop.
//!
//! # Modules
//!
//! - [`collector`] - Content discovery and parsing
//! - [`template`] - Template resolution and rendering with Tera
//! - [`render`] - Two-phase document rendering per output target
//! - [`optimize`] - Per-extension asset optimizer dispatch
//! - [`assets`] - Cached static asset processing
//! - [`build`] - Build orchestration

pub mod assets;
pub mod build;
pub mod collector;
pub mod optimize;
pub mod render;
pub mod template;

pub use assets::{AssetCache, AssetError, AssetProcessor, AssetStats};
pub use build::{BuildError, BuildReport, Builder, CheckReport, TargetReport, TargetState};
pub use collector::{ContentCollector, SiteContent};
pub use optimize::{Optimizer, OptimizerKind};
pub use render::{RenderError, RenderedPage, Renderer};
pub use template::{Template, TemplateError, TemplateRole, TemplateSet};
