//! CLI Module
//!
//! Command-line interface for offline rendering and calibration inspection.

pub mod commands;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Auris - per-stream EQ, tone, anti-distortion and spatial effects
#[derive(Parser, Debug)]
#[command(name = "auris")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a WAV file through a full pipeline
    #[command(name = "render")]
    Render(RenderArgs),

    /// Print tone-control gain staging and dynamics calibration
    #[command(name = "staging")]
    Staging {
        /// Volume boost in percent (100 to 800)
        #[arg(long, default_value_t = 100.0)]
        volume: f32,

        /// Bass boost in dB
        #[arg(long, default_value_t = 0.0)]
        bass: f32,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RenderArgs {
    /// Input WAV file
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output WAV file
    #[arg(short, long)]
    pub output: PathBuf,

    /// Volume boost in percent (100 to 800)
    #[arg(long)]
    pub volume: Option<f32>,

    /// Bass boost in dB
    #[arg(long)]
    pub bass: Option<f32>,

    /// Voice (1 kHz) boost in dB
    #[arg(long)]
    pub voice: Option<f32>,

    /// Master gain (linear)
    #[arg(long)]
    pub gain: Option<f32>,

    /// Ten comma-separated EQ band gains in dB
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub eq: Option<Vec<f32>>,

    /// Effect to enable (audio8d, surround, echo); repeatable
    #[arg(long = "effect")]
    pub effects: Vec<String>,

    /// Engine configuration (JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,
}
