//! Command-line interface for vermeer.
//!
//! Thin operator surface over [`MidjourneyClient`](crate::MidjourneyClient):
//! generate a grid (optionally upscaling and persisting all four
//! variants), or check that both gateway sessions come up.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Vermeer CLI - drive Midjourney image generation through Discord.
#[derive(Parser)]
#[command(name = "vermeer")]
#[command(about = "Generate and upscale Midjourney images over the Discord gateway", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Generate an image grid from a prompt
    Generate {
        /// The prompt to submit
        prompt: String,

        /// Also upscale all four variants
        #[arg(short, long)]
        upscale: bool,

        /// Directory to persist artifacts into
        #[arg(short, long, default_value = "./output")]
        output: PathBuf,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,

        /// Aspect ratio, e.g. 4:5
        #[arg(long)]
        ar: Option<String>,

        /// Quality setting
        #[arg(long)]
        quality: Option<String>,

        /// Use the niji model
        #[arg(long)]
        niji: bool,

        /// Model version, e.g. 6.1
        #[arg(long)]
        version: Option<String>,
    },

    /// Open both gateway sessions and report readiness
    Check,
}

impl Cli {
    /// Parse CLI arguments from the environment.
    pub fn parse_args() -> Self {
        <Self as Parser>::parse()
    }
}
