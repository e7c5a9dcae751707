//! framecap Command-Line Interface
//!
//! Drives the capture pipeline against the headless software renderer so the
//! whole readback, hand-off and encode path can be exercised and timed
//! without a GPU.

mod colors;
mod commands;
mod exit_codes;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use exit_codes::ExitCode;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// framecap - in-game screenshot pipeline
#[derive(Parser, Debug)]
#[command(name = "framecap")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output in JSON format for scripting
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Verbose output (debug logging on stderr)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a simulated game loop and capture screenshots from it
    Demo(DemoArgs),
    /// Show or reset the configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show version information
    Version,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the config file location
    Path,
    /// Overwrite the config file with defaults
    Reset,
}

/// Frame size given as `WIDTHxHEIGHT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl std::str::FromStr for Size {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
        let width: u32 = w.trim().parse().map_err(|_| format!("invalid width '{}'", w))?;
        let height: u32 = h.trim().parse().map_err(|_| format!("invalid height '{}'", h))?;
        if width == 0 || height == 0 {
            return Err("width and height must be positive".to_string());
        }
        Ok(Size { width, height })
    }
}

#[derive(Args, Debug, Clone)]
pub struct DemoArgs {
    /// Number of frames to render
    #[arg(short, long, default_value_t = 300)]
    pub frames: u64,

    /// Render surface size
    #[arg(short, long, default_value = "800x600")]
    pub size: Size,

    /// Target frame rate (0 renders as fast as possible)
    #[arg(long, default_value_t = 60)]
    pub fps: u32,

    /// Press the screenshot key at these frames
    #[arg(short = 'c', long = "capture-at", value_delimiter = ',', default_value = "100")]
    pub capture_at: Vec<u64>,

    /// Switch to the next screen every N frames (0 disables transitions)
    #[arg(long, default_value_t = 120)]
    pub screen_every: u64,

    /// Resize the surface at this frame
    #[arg(long, requires = "resize_to")]
    pub resize_at: Option<u64>,

    /// New surface size for --resize-at
    #[arg(long)]
    pub resize_to: Option<Size>,

    /// Output directory (overrides the configured one)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Path to the framecap-encoder binary
    #[arg(long)]
    pub encoder: Option<String>,

    /// Number of encode workers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Read automatic captures over two frames instead of blocking
    #[arg(long)]
    pub split: bool,

    /// Deliver rows bottom-up, like OpenGL readback
    #[arg(long)]
    pub bottom_up: bool,
}

/// Log to stderr and to a daily file in the platform log directory.
///
/// The returned guard flushes the file writer when dropped.
fn init_logging(verbose: bool) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (file_layer, guard) = match framecap_common::logging::ensure_log_dir() {
        Ok(dir) => {
            let appender =
                tracing_appender::rolling::daily(dir, framecap_common::logging::CLI_LOG_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        Err(e) => {
            eprintln!(
                "{}",
                colors::warning(&format!("Logging to stderr only: {}", e))
            );
            (None, None)
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    guard
}

fn main() {
    let cli = Cli::parse();
    let _guard = init_logging(cli.verbose);

    let exit_code = run(cli);
    std::process::exit(exit_code.as_i32());
}

fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Commands::Demo(args) => commands::demo(&args, cli.json, cli.quiet),
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_show(cli.json),
            ConfigAction::Path => commands::config_path(cli.json),
            ConfigAction::Reset => commands::config_reset(cli.json, cli.quiet),
        },
        Commands::Version => {
            commands::version(cli.json);
            ExitCode::Success
        }
    }
}
