//! spindebug — swap a running Spin app onto a debug image and attach to it.
//!
//! # Usage
//!
//! ```text
//! spindebug debug [NAME] --component <C> [-n NS] [--context CTX] [--kubeconfig PATH] [--container C]
//! spindebug build <IMAGE> --component <C>
//! spindebug pull <IMAGE> <DIR>
//! spindebug rewrite <FILE> --component <C> [--diff | --write]
//! spindebug config
//! ```

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use commands::{
    build::BuildArgs, config::ConfigArgs, debug::DebugArgs, pull::PullArgs,
    rewrite::RewriteArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "spindebug",
    version,
    about = "Debug a running Spin app by swapping in a console shim",
    long_about = None,
)]
struct Cli {
    /// Log at debug level (RUST_LOG overrides).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Swap an app onto a debug image, attach, and restore it afterwards.
    Debug(DebugArgs),

    /// Build and publish the debug image for an app image.
    Build(BuildArgs),

    /// Unpack an image into a directory.
    Pull(PullArgs),

    /// Preview the spin.toml rewrite for a component.
    Rewrite(RewriteArgs),

    /// Print the effective configuration.
    Config(ConfigArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = spindebug_core::config::load().context("failed to load spindebug config")?;
    match cli.command {
        Commands::Debug(args) => args.run(&config),
        Commands::Build(args) => args.run(&config),
        Commands::Pull(args) => args.run(&config),
        Commands::Rewrite(args) => args.run(&config),
        Commands::Config(args) => args.run(&config),
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
