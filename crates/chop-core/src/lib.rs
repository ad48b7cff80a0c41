//! Chop Core Library
//!
//! Core types, configuration, frontmatter parsing and error handling for the
//! chop static site generator.

pub mod config;
pub mod content;
pub mod error;
pub mod frontmatter;
pub mod variables;

pub use config::{BuildSettings, GlobalConfig, TypographySettings};
pub use content::{ContentFile, SitePath};
pub use error::{CoreError, Result};
pub use frontmatter::{parse_frontmatter, split_frontmatter};
pub use variables::{Value, Variables, VariablesError};
