//! Chop CLI Library
//!
//! Command implementations and logging setup for the `chop` binary.
//!
//! # Modules
//!
//! - [`cmd`] - Command implementations (build, check)
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use chop::cmd::build::{self, BuildOptions};
//!
//! # async fn demo() -> color_eyre::eyre::Result<()> {
//! build::run(Path::new("."), &BuildOptions::default()).await?;
//! # Ok(())
//! # }
//! ```

pub mod cmd;

pub use chop_core::{BuildSettings, GlobalConfig};
pub use chop_generator::{BuildReport, Builder};

/// Initialize tracing with the specified verbosity level.
///
/// # Arguments
///
/// * `verbose` - Verbosity level (0 = WARN, 1 = INFO, 2 = DEBUG, 3+ = TRACE)
pub fn init_tracing(verbose: u8) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();
}
