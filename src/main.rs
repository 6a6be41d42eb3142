// SPDX-License-Identifier: GPL-3.0-only

use clap::{Args, Parser, Subcommand};
use framepipe::backends::PixelFormat;
use framepipe::config::PipelineConfig;
use framepipe::constants::BRIGHTEN_OUTPUT;
use framepipe::media::HeaderStyle;
use framepipe::pipelines::BufferStrategy;
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "framepipe")]
#[command(about = "Capture frames, convert and brighten them, and report per-stage frame rates")]
#[command(version = env!("GIT_VERSION"))]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    capture: CaptureArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Brighten a PPM/PGM image with the capture transform
    Brighten {
        /// Input image
        input: PathBuf,

        /// Output image
        #[arg(default_value = BRIGHTEN_OUTPUT)]
        output: PathBuf,

        /// Brightness gain
        #[arg(long)]
        alpha: Option<f64>,

        /// Brightness bias
        #[arg(long)]
        beta: Option<u8>,
    },

    /// Write the photographic negative of a PPM/PGM image
    Negative {
        /// Input image
        input: PathBuf,

        /// Output image
        output: PathBuf,
    },
}

/// I/O method, at most one may be given
#[derive(Args, Default)]
#[group(required = false, multiple = false)]
struct IoMethod {
    /// Use memory mapped buffers (default)
    #[arg(short = 'm', long = "mmap")]
    mmap: bool,

    /// Use read() calls
    #[arg(short = 'r', long = "read")]
    read: bool,

    /// Use application allocated buffers
    #[arg(short = 'u', long = "userptr")]
    userptr: bool,
}

impl IoMethod {
    fn strategy(&self) -> Option<BufferStrategy> {
        if self.read {
            Some(BufferStrategy::DirectCopy)
        } else if self.userptr {
            Some(BufferStrategy::AppAllocated)
        } else if self.mmap {
            Some(BufferStrategy::SourceMapped)
        } else {
            None
        }
    }
}

#[derive(Args)]
struct CaptureArgs {
    /// Video device name
    #[arg(value_name = "DEVICE", conflicts_with = "device")]
    device_path: Option<PathBuf>,

    /// Video device name [default: /dev/video0]
    #[arg(short = 'd', long)]
    device: Option<PathBuf>,

    #[command(flatten)]
    io: IoMethod,

    /// Number of frames to grab, warm-up included
    #[arg(short = 'c', long = "count")]
    count: Option<u32>,

    /// Force the requested format instead of keeping the device's
    #[arg(short = 'f', long = "format")]
    force_format: bool,

    /// Pixel format to request
    #[arg(short = 'p', long, value_enum)]
    pixel_format: Option<PixelFormat>,

    /// Frame width to request
    #[arg(long)]
    width: Option<u32>,

    /// Frame height to request
    #[arg(long)]
    height: Option<u32>,

    /// Frames excluded from statistics and not written
    #[arg(long)]
    warmup: Option<u32>,

    /// Brightness gain
    #[arg(long)]
    alpha: Option<f64>,

    /// Brightness bias
    #[arg(long)]
    beta: Option<u8>,

    /// Directory for frame files
    #[arg(short = 'o', long)]
    output_dir: Option<PathBuf>,

    /// File name prefix for frame files
    #[arg(long)]
    prefix: Option<String>,

    /// Zero padding of the frame number in file names (4-8)
    #[arg(long)]
    digits: Option<usize>,

    /// Write greyscale PGM files from the luma samples
    #[arg(long)]
    luma: bool,

    /// Omit the timestamp comment from file headers
    #[arg(long)]
    simple_header: bool,

    /// Longest wait for a frame in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Pause after each frame in milliseconds
    #[arg(long)]
    frame_delay_ms: Option<u64>,

    /// Number of buffers to request for streaming
    #[arg(long)]
    buffers: Option<u32>,

    /// JSON configuration file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Capture from a built-in test pattern instead of a device
    #[arg(long)]
    synthetic: bool,
}

impl CaptureArgs {
    fn into_config(self) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path)?,
            None => PipelineConfig::default(),
        };

        if let Some(device) = self.device_path.or(self.device) {
            config.device = device;
        }
        if let Some(strategy) = self.io.strategy() {
            config.strategy = strategy;
        }
        if let Some(count) = self.count {
            config.frame_budget = count;
        }
        config.force_format |= self.force_format;
        if let Some(pixel_format) = self.pixel_format {
            config.pixel_format = pixel_format;
        }
        if let Some(width) = self.width {
            config.width = width;
        }
        if let Some(height) = self.height {
            config.height = height;
        }
        if let Some(warmup) = self.warmup {
            config.warmup_frames = warmup;
        }
        if let Some(alpha) = self.alpha {
            config.alpha = alpha;
        }
        if let Some(beta) = self.beta {
            config.beta = beta;
        }
        if let Some(dir) = self.output_dir {
            config.output_dir = dir;
        }
        if let Some(prefix) = self.prefix {
            config.file_prefix = prefix;
        }
        if let Some(digits) = self.digits {
            config.tag_digits = digits;
        }
        if self.luma {
            config.channels = 1;
        }
        if self.simple_header {
            config.header_style = HeaderStyle::Simple;
        }
        if let Some(timeout) = self.timeout_ms {
            config.ready_timeout_ms = timeout;
        }
        if let Some(delay) = self.frame_delay_ms {
            config.frame_delay_ms = delay;
        }
        if let Some(buffers) = self.buffers {
            config.buffer_count = Some(buffers);
        }

        Ok(config)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=framepipe=debug, RUST_LOG=warn
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Brighten {
            input,
            output,
            alpha,
            beta,
        }) => cli::brighten(&input, &output, alpha, beta),
        Some(Commands::Negative { input, output }) => cli::negative(&input, &output),
        None => {
            let synthetic = cli.capture.synthetic;
            let config = cli.capture.into_config()?;
            cli::capture(config, synthetic)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brighten_output_defaults_to_brighter_ppm() {
        let cli = Cli::try_parse_from(["framepipe", "brighten", "frame0000.ppm"]).unwrap();
        let Some(Commands::Brighten { output, .. }) = cli.command else {
            panic!("expected the brighten subcommand");
        };
        assert_eq!(output, PathBuf::from("brighter.ppm"));
    }

    #[test]
    fn test_io_methods_are_exclusive() {
        assert!(Cli::try_parse_from(["framepipe", "-r", "-u"]).is_err());
        let cli = Cli::try_parse_from(["framepipe", "-u"]).unwrap();
        assert_eq!(cli.capture.io.strategy(), Some(BufferStrategy::AppAllocated));
    }
}
