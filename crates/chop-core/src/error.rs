//! Error types for the chop core library.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error types for chop.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration file present but unusable.
    #[error("Configuration error in {path}: {message}")]
    Config { path: PathBuf, message: String },

    /// Document does not follow the `---` frontmatter layout.
    #[error("Malformed frontmatter in {path}: {message}")]
    MalformedFrontmatter { path: PathBuf, message: String },

    /// File system I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CoreError {
    /// Create a new configuration error.
    pub fn config(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Config {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new malformed frontmatter error.
    pub fn frontmatter(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::MalformedFrontmatter {
            path: path.into(),
            message: message.into(),
        }
    }
}
