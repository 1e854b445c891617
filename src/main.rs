// SPDX-License-Identifier: GPL-3.0-only

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "filter-camera")]
#[command(about = "Real-time camera filter pipeline")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    /// Config file (default: ~/.config/filter-camera/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct PipelineArgs {
    /// Filter to run instead of the configured chain
    #[arg(short, long)]
    filter: Option<String>,

    /// Test pattern frame width
    #[arg(long, requires = "height")]
    width: Option<u32>,

    /// Test pattern frame height
    #[arg(long, requires = "width")]
    height: Option<u32>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the filter chain and available kernels
    Filters,

    /// Filter test pattern frames and render the preview to an image file
    Preview {
        #[command(flatten)]
        pipeline: PipelineArgs,

        /// Output image path
        #[arg(short, long, default_value = "preview.png")]
        output: PathBuf,

        /// Frames to push through the pipeline before drawing
        #[arg(long, default_value = "10")]
        frames: u64,

        /// View width in points
        #[arg(long, default_value = "640")]
        view_width: f64,

        /// View height in points
        #[arg(long, default_value = "480")]
        view_height: f64,

        /// Device pixels per point
        #[arg(long, default_value = "1.0")]
        scale: f64,

        /// Mirror the preview horizontally
        #[arg(long)]
        mirror: Option<bool>,

        /// Preview rotation in degrees (0, 90, 180, 270)
        #[arg(long, allow_hyphen_values = true)]
        rotation: Option<i32>,

        /// Draw with wgpu instead of the software rasterizer
        #[arg(long)]
        gpu: bool,
    },

    /// Take filtered photos
    Photo {
        #[command(flatten)]
        pipeline: PipelineArgs,

        /// Output directory (default: ~/Pictures/filter-camera)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Number of photos
        #[arg(short = 'n', long, default_value = "1")]
        count: u32,
    },
}

impl PipelineArgs {
    fn into_options(self, config: Option<PathBuf>) -> cli::PipelineOptions {
        cli::PipelineOptions {
            config,
            filter: self.filter,
            size: self.width.zip(self.height),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=filter_camera=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Filters => cli::list_filters(cli.config),
        Commands::Preview {
            pipeline,
            output,
            frames,
            view_width,
            view_height,
            scale,
            mirror,
            rotation,
            gpu,
        } => cli::render_preview(cli::PreviewOptions {
            pipeline: pipeline.into_options(cli.config),
            output,
            frames,
            view: (view_width, view_height),
            scale,
            mirror,
            rotation,
            gpu,
        }),
        Commands::Photo {
            pipeline,
            output,
            count,
        } => cli::take_photos(pipeline.into_options(cli.config), output, count),
    }
}
