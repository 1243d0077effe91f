//! vfx-exr - inspect and decode multi-part OpenEXR files
//!
//! Thin front end over `vfx-exr-reader`: every command opens the file the
//! way a compositing host would and prints what the reader hands back.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use vfx_exr_reader::{EdgeMode, FileReadMode};

mod commands;

#[derive(Parser)]
#[command(name = "vfx-exr")]
#[command(author, version, about = "Inspect and decode multi-part OpenEXR files")]
#[command(long_about = "
Opens OpenEXR files through the scanline, planar and deep engines and
prints what they produce.

Examples:
  vfx-exr info beauty.exr                  # Parts, windows and channels
  vfx-exr row beauty.exr 100 -c R,G,B,A    # One decoded row
  vfx-exr plane beauty.exr                 # Whole-plane decode with stats
  vfx-exr deep smoke.exr                   # Deep sample summary
  vfx-exr meta beauty.exr --grep exr/      # Published metadata
  vfx-exr --view right info stereo.exr
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Number of threads (0 = auto)
    #[arg(short = 'j', long, global = true, default_value = "0")]
    threads: usize,

    #[command(flatten)]
    reader: ReaderArgs,
}

/// Reader options shared by every command.
#[derive(Args, Clone)]
struct ReaderArgs {
    /// View to read from stereo files
    #[arg(long, global = true)]
    view: Option<String>,

    /// Edge handling: plate, edge, repeat or black
    #[arg(long, global = true, value_parser = parse_edge_mode)]
    edge: Option<EdgeMode>,

    /// File access: default, normal, mmap or buffer
    #[arg(long, global = true, value_parser = parse_read_mode)]
    read_mode: Option<FileReadMode>,

    /// Crop negative display windows instead of shifting them
    #[arg(long, global = true)]
    crop_negative: bool,

    /// Ignore part names when naming channels
    #[arg(long, global = true)]
    ignore_part_names: bool,

    /// Publish attributes without the `exr/` prefix
    #[arg(long, global = true)]
    no_prefix: bool,

    /// Skip the colour curve
    #[arg(long, global = true)]
    raw: bool,

    /// Decode a colour curve after reading: linear or srgb
    #[arg(long, global = true)]
    curve: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show parts, windows and channel mapping
    #[command(visible_alias = "i")]
    Info(InfoArgs),

    /// Decode one host row
    #[command(visible_alias = "r")]
    Row(RowArgs),

    /// Decode the whole image into a plane and print per-channel stats
    #[command(visible_alias = "p")]
    Plane(PlaneArgs),

    /// Decode deep samples and summarise them
    #[command(visible_alias = "d")]
    Deep(DeepArgs),

    /// List published metadata
    #[command(visible_alias = "m")]
    Meta(MetaArgs),
}

#[derive(Args)]
struct InfoArgs {
    /// Input file(s)
    #[arg(required = true)]
    input: Vec<PathBuf>,

    /// Show the file-to-host channel mapping
    #[arg(short, long)]
    mapping: bool,
}

#[derive(Args)]
struct RowArgs {
    /// Input file
    input: PathBuf,

    /// Host row (0 is the bottom of the display window)
    y: i32,

    /// Channels, comma separated (R,G,B,A,Z or layer.channel)
    #[arg(short, long, default_value = "R,G,B,A")]
    channels: String,

    /// First column (defaults to the bounding box)
    #[arg(short = 'x', long)]
    from: Option<i32>,

    /// End column, exclusive (defaults to the bounding box)
    #[arg(short = 'r', long)]
    to: Option<i32>,
}

#[derive(Args)]
struct PlaneArgs {
    /// Input file
    input: PathBuf,

    /// Channels, comma separated (defaults to every channel in the file)
    #[arg(short, long)]
    channels: Option<String>,

    /// Release cached buffers after decoding and report the bytes freed
    #[arg(long)]
    reclaim: bool,
}

#[derive(Args)]
struct DeepArgs {
    /// Input file
    input: PathBuf,

    /// Channels, comma separated (defaults to every deep channel)
    #[arg(short, long)]
    channels: Option<String>,

    /// Print the samples of one pixel, given as x,y in host coordinates
    #[arg(long, value_parser = parse_pixel)]
    pixel: Option<(i32, i32)>,
}

#[derive(Args)]
struct MetaArgs {
    /// Input file
    input: PathBuf,

    /// Only keys containing this text
    #[arg(short, long)]
    grep: Option<String>,
}

fn parse_edge_mode(value: &str) -> Result<EdgeMode, String> {
    EdgeMode::parse(value).ok_or_else(|| format!("unknown edge mode '{value}'"))
}

fn parse_read_mode(value: &str) -> Result<FileReadMode, String> {
    FileReadMode::parse(value).ok_or_else(|| format!("unknown read mode '{value}'"))
}

fn parse_pixel(value: &str) -> Result<(i32, i32), String> {
    let (x, y) = value.split_once(',').ok_or("expected x,y")?;
    let x = x.trim().parse().map_err(|e| format!("bad x: {e}"))?;
    let y = y.trim().parse().map_err(|e| format!("bad y: {e}"))?;
    Ok((x, y))
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    // RUST_LOG wins over -v
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let session = commands::Session::new(&cli.reader, cli.threads)?;
    match cli.command {
        Commands::Info(args) => commands::info::run(&session, args),
        Commands::Row(args) => commands::row::run(&session, args),
        Commands::Plane(args) => commands::plane::run(&session, args),
        Commands::Deep(args) => commands::deep::run(&session, args),
        Commands::Meta(args) => commands::meta::run(&session, args),
    }
}
