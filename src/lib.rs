//! PDF Recompressor Library
//!
//! Core logic for shrinking PDFs by re-encoding the raster images embedded
//! in them. Shared between the CLI and library callers.
//!
//! Walks every page's XObject table, picks a recompression strategy for
//! each image from its storage filter, and splices the re-encoded result
//! back over the original object. Pages without image XObjects get their
//! content streams recompressed instead, and a run that replaced nothing
//! ends with a structural cleanup pass.

pub mod codec;
pub mod config;
pub mod document;
pub mod error;
pub mod filter;
pub mod policy;
pub mod report;
pub mod strategy;
pub mod walker;

use std::fs;
use std::time::Instant;

use log::info;
use lopdf::Document;

pub use config::Config;
pub use error::{Error, ImageFault, Result};
pub use filter::FilterKind;
pub use policy::OutputFormat;
pub use report::Report;
pub use strategy::{Outcome, SkipReason, StrategyKind, StrategyParams};
pub use walker::RunStats;

/// Recompress a document held in memory.
///
/// `document_name` drives the name-based quality policy and shows up in
/// log lines. Returns the rewritten bytes and the run report.
pub fn compress_bytes(
    config: &Config,
    document_name: &str,
    input: &[u8],
) -> Result<(Vec<u8>, Report)> {
    let started = Instant::now();
    let mut doc = Document::load_mem(input)?;
    let stats = walker::process_document(&mut doc, document_name, config.quality_override)?;
    doc.compress();

    let mut output = Vec::new();
    doc.save_to(&mut output)?;
    let report = Report::new(
        stats,
        input.len() as u64,
        output.len() as u64,
        started.elapsed(),
    );
    info!("\"{document_name}\": {report}");
    Ok((output, report))
}

/// Recompress `file_name` from the source directory into the destination
/// directory, creating the latter if needed. The output keeps the file
/// name.
pub fn compress_file(config: &Config, file_name: &str) -> Result<Report> {
    let source = config.source_dir.join(file_name);
    if !source.is_file() {
        return Err(Error::SourceMissing(source));
    }
    let input = fs::read(&source)?;
    let (output, report) = compress_bytes(config, file_name, &input)?;

    fs::create_dir_all(&config.dest_dir)?;
    fs::write(config.dest_dir.join(file_name), output)?;
    Ok(report)
}
