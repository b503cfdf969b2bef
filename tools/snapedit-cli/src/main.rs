//! SnapEdit CLI: apply AI-assisted edits to photos and videos.
//!
//! Usage:
//!   snapedit edit <INPUT> -o <OUTPUT> <OPERATION>   Run one edit job
//!   snapedit probe <INPUT>                          Show stream properties
//!   snapedit models                                 List bundled models
//!   snapedit check                                  Check system capabilities

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

mod commands;

#[derive(Parser)]
#[command(
    name = "snapedit",
    about = "On-device AI photo and video editing",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file (defaults to $XDG_CONFIG_HOME/snapedit/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Edit a photo or video
    Edit {
        /// Input photo or video
        input: PathBuf,

        /// Output file; the extension picks the format
        #[arg(short, long)]
        output: PathBuf,

        #[command(subcommand)]
        operation: OperationArgs,

        #[command(flatten)]
        options: EditOptions,
    },

    /// Show stream properties of a photo or video
    Probe {
        /// Input photo or video
        input: PathBuf,

        /// Print the asset as JSON
        #[arg(long)]
        json: bool,
    },

    /// List bundled models
    Models {
        /// Model directory (defaults to the configured one)
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Check system capabilities
    Check,
}

/// Options shared by every edit operation.
#[derive(Args, Debug, Clone)]
pub struct EditOptions {
    /// Model id (required for mask and region operations)
    #[arg(short, long, global = true)]
    pub model: Option<String>,

    /// Minimum confidence for a frame's own inference to be used
    #[arg(long, global = true, default_value = "0.5")]
    pub threshold: f32,

    /// What to do with low-confidence frames
    #[arg(long, global = true, value_enum, default_value = "skip")]
    pub fallback: FallbackArg,

    /// Binarize masks at this value
    #[arg(long, global = true)]
    pub mask_threshold: Option<f32>,

    /// Video format for .mp4 outputs: mp4-h264 or mp4-h265
    #[arg(long, global = true)]
    pub format: Option<String>,

    /// Video bitrate in kbps
    #[arg(long, global = true)]
    pub bitrate: Option<u32>,

    /// Drop the source audio track
    #[arg(long, global = true)]
    pub no_audio: bool,

    /// JPEG quality [1, 100]
    #[arg(long, global = true)]
    pub jpeg_quality: Option<u8>,

    /// Start applying the edit at this time (ms)
    #[arg(long, global = true)]
    pub start_ms: Option<u64>,

    /// Stop applying the edit at this time (ms, exclusive)
    #[arg(long, global = true)]
    pub end_ms: Option<u64>,

    /// Scale video so its shorter side has this many pixels
    #[arg(long, global = true)]
    pub resolution: Option<u32>,

    /// Output video frame rate
    #[arg(long, global = true)]
    pub fps: Option<f64>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum OperationArgs {
    /// Replace the background with a colour (transparent by default)
    RemoveBackground {
        /// Replacement colour as #RRGGBB or #RRGGBBAA
        #[arg(long)]
        color: Option<String>,
    },

    /// Blur the background
    BlurBackground {
        #[arg(long, default_value = "12")]
        radius: u32,
    },

    /// Colour grade the frame, foreground, or background
    Style {
        #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
        brightness: f32,
        #[arg(long, default_value = "1.0")]
        contrast: f32,
        #[arg(long, default_value = "1.0")]
        saturation: f32,
        #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
        exposure: f32,
        #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
        temperature: f32,
        #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
        tint: f32,
        #[arg(long, value_enum, default_value = "whole")]
        target: TargetArg,
    },

    /// Blend a colour over the frame, foreground, or background
    Tint {
        /// Colour as #RRGGBB
        #[arg(long)]
        color: String,
        #[arg(long, default_value = "0.35")]
        opacity: f32,
        #[arg(long, value_enum, default_value = "whole")]
        target: TargetArg,
    },

    /// Pixelate detected regions such as faces
    Pixelate {
        #[arg(long, default_value = "16")]
        block_size: u32,
    },

    /// Draw an image over the frame, optionally behind the subject
    Overlay {
        /// PNG, JPEG or WebP image
        image: PathBuf,
        /// Left edge as a fraction of the frame width
        #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
        x: f32,
        /// Top edge as a fraction of the frame height
        #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
        y: f32,
        #[arg(long, default_value = "1.0")]
        scale: f32,
        #[arg(long, default_value = "1.0")]
        opacity: f32,
        /// Hide the overlay wherever the subject mask covers it
        #[arg(long)]
        behind_subject: bool,
    },

    /// Read the edit from a JSON file
    FromFile {
        /// Serialized edit spec
        spec: PathBuf,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum TargetArg {
    Whole,
    Foreground,
    Background,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum FallbackArg {
    /// Leave the frame unedited
    Skip,
    /// Reuse the previous frame's mask
    Reuse,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => snapedit_common::config::AppConfig::load_from(path),
        None => snapedit_common::config::AppConfig::load(),
    };

    // Initialize logging
    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    logging.json |= cli.json_logs;
    snapedit_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Edit {
            input,
            output,
            operation,
            options,
        } => commands::edit::run(&config, input, output, operation, options).await,
        Commands::Probe { input, json } => commands::probe::run(input, json),
        Commands::Models { dir } => commands::models::run(&config, dir),
        Commands::Check => commands::check::run(&config),
    }
}
