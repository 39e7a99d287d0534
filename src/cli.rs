//! Command-line interface definitions.
//!
//! Defines all CLI arguments and subcommands using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Arbor static site builder CLI
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Site root directory
    #[arg(short, long, default_value = "./site")]
    pub root: PathBuf,

    /// Config file name (relative to site root)
    #[arg(short = 'C', long, default_value = "arbor.toml")]
    pub config: PathBuf,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Shared build arguments for Build and Serve commands
#[derive(clap::Args, Debug, Clone, Default)]
pub struct BuildArgs {
    /// Source directory (relative to site root)
    #[arg(short, long)]
    pub source: Option<PathBuf>,

    /// Data directory (relative to site root)
    #[arg(short, long)]
    pub data: Option<PathBuf>,

    /// Template directory (relative to site root)
    #[arg(short, long)]
    pub templates: Option<PathBuf>,

    /// Output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Base URL path prefix for the generated site
    #[arg(short, long)]
    pub base: Option<String>,

    /// Clean output directory completely before building
    #[arg(long)]
    pub clean: bool,

    /// Minify rendered markup and recognized assets
    #[arg(short, long, action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = false)]
    pub minify: Option<bool>,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Build the site once and exit
    Build {
        #[command(flatten)]
        build_args: BuildArgs,
    },

    /// Serve the site, rebuilding and reloading on change
    Serve {
        #[command(flatten)]
        build_args: BuildArgs,

        /// Interface to bind on
        #[arg(short, long)]
        interface: Option<String>,

        /// Port for the development server
        #[arg(short, long)]
        port: Option<u16>,

        /// Regex of paths excluded from watching
        #[arg(short, long)]
        exclude: Option<String>,
    },
}

impl Cli {
    pub const fn is_serve(&self) -> bool {
        matches!(self.command, Commands::Serve { .. })
    }

    pub const fn build_args(&self) -> &BuildArgs {
        match &self.command {
            Commands::Build { build_args } | Commands::Serve { build_args, .. } => build_args,
        }
    }
}
