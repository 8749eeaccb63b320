// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "glcamera")]
#[command(about = "Camera preview rendered through a GLSL filter pipeline")]
#[command(version)]
struct Cli {
    /// Configuration file (default: <config dir>/glcamera/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available cameras
    List,

    /// Render camera frames headless
    Run {
        /// Camera index to use (from 'glcamera list'); defaults to the configured camera
        #[arg(short, long)]
        camera: Option<i32>,

        /// Number of frames to render
        #[arg(short, long, default_value = "60")]
        frames: u64,

        /// Enable the edge-detection filter chain
        #[arg(long)]
        filters: bool,

        /// Save one raw camera frame under this name
        #[arg(long)]
        capture: Option<String>,

        /// Save the last rendered frame as a PNG
        #[arg(long)]
        display_capture: bool,

        /// Directory captures are written below (default: pictures directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// GPU backend to render with
        #[arg(long, value_enum, default_value_t = cli::Backend::Gl)]
        backend: cli::Backend,
    },

    /// Print the effective configuration as JSON
    Config,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=glcamera=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let config = cli::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::List => cli::list_cameras(&config),
        Commands::Run {
            camera,
            frames,
            filters,
            capture,
            display_capture,
            output,
            backend,
        } => cli::run(
            &config,
            cli::RunOptions {
                camera,
                frames,
                filters,
                capture,
                display_capture,
                output,
                backend,
            },
        ),
        Commands::Config => cli::print_config(&config),
    }
}
