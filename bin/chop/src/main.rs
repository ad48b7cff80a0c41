//! Chop CLI
//!
//! Builds a static site into one output tree per template target.
//!
//! This is the binary entry point. The library functionality is in `lib.rs`.

use std::path::PathBuf;

use chop::cmd::build::BuildOptions;
use clap::Parser;
use color_eyre::eyre::Result;

/// Command-line interface for chop.
#[derive(Parser)]
#[command(
    name = "chop",
    version,
    about = "A static site builder with multiple output formats"
)]
struct Cli {
    /// Project root containing content, templates and config.yaml
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(clap::Subcommand)]
enum Commands {
    /// Build every output target
    Build {
        /// Output directory (overrides `build.output_dir`)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Asset cache directory (overrides `build.cache_dir`)
        #[arg(long)]
        cache: Option<PathBuf>,
        /// Maximum concurrent optimizer runs
        #[arg(short, long)]
        jobs: Option<usize>,
        /// Optimizer timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Disable smart punctuation
        #[arg(long)]
        no_typography: bool,
    },
    /// Parse content and compile templates without writing output
    Check {
        /// Treat warnings as errors
        #[arg(long)]
        strict: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    chop::init_tracing(cli.verbose);

    match cli.command {
        Commands::Build {
            output,
            cache,
            jobs,
            timeout,
            no_typography,
        } => {
            let options = BuildOptions {
                output,
                cache,
                jobs,
                timeout,
                no_typography,
            };
            chop::cmd::build::run(&cli.root, &options).await?;
        }
        Commands::Check { strict } => {
            chop::cmd::check::run(&cli.root, strict).await?;
        }
    }

    Ok(())
}
