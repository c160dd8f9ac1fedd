//! PDF Recompressor CLI
//!
//! Command-line interface for recompressing the raster images in a PDF.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use pdf_recompress::{compress_file, Config};

/// Shrink a PDF by re-encoding the raster images embedded in it
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Name of the PDF inside the source directory
    file: String,

    /// Directory the source file is read from
    #[arg(long, default_value = ".")]
    source_dir: PathBuf,

    /// Directory the result is written to (created if missing)
    #[arg(long, default_value = "compressed")]
    dest_dir: PathBuf,

    /// Scale fraction applied to every image, overriding the name policy
    #[arg(short, long)]
    quality: Option<f32>,

    /// Verbose output (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(match args.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .init();

    let config = Config {
        source_dir: args.source_dir,
        dest_dir: args.dest_dir,
        quality_override: args.quality,
    };

    println!("PDF Recompressor");
    println!("================");

    let report = compress_file(&config, &args.file)
        .with_context(|| format!("failed to recompress {}", args.file))?;

    println!(
        "\nDone! {} pages: {} images recompressed, {} skipped, {} faults",
        report.pages, report.images_replaced, report.images_skipped, report.recoverable_faults
    );
    println!(
        "{} -> {} bytes ({:.1}% of original)",
        report.source_len,
        report.dest_len,
        report.percent_of_original()
    );
    println!("Output saved to: {:?}", config.dest_dir.join(&args.file));

    Ok(())
}
