// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "streamforge")]
#[command(about = "Play media files and cameras into virtual camera and microphone devices")]
#[command(version = streamforge::constants::app_info::version())]
struct Cli {
    /// Log at info level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play files, directories or /dev/video* cameras to the virtual devices
    Play {
        /// Files, directories or camera device nodes
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Wrap to the first entry after the last one
        #[arg(short = 'l', long = "loop")]
        looping: bool,

        /// Play entries in a random order each pass
        #[arg(short, long)]
        shuffle: bool,

        /// Virtual camera backend: pipewire or v4l2loopback
        #[arg(short, long)]
        output: Option<String>,

        /// Configuration file (default: ~/.config/streamforge/config.json)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// List supported input formats
    Formats,

    /// Report virtual device availability and list video devices
    Devices,

    /// Open a source and print what the decoder finds
    Probe {
        path: PathBuf,

        /// Configuration file (default: ~/.config/streamforge/config.json)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=streamforge=debug, RUST_LOG=info
    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(true)
        .with_level(true)
        .init();

    match cli.command {
        Commands::Play {
            paths,
            looping,
            shuffle,
            output,
            config,
        } => cli::play(cli::PlayOptions {
            paths,
            looping,
            shuffle,
            output,
            config,
        }),
        Commands::Formats => cli::list_formats(),
        Commands::Devices => cli::list_devices(),
        Commands::Probe { path, config } => cli::probe(&path, config.as_deref()),
    }
}
