use std::fs::create_dir_all;
use std::path::PathBuf;

use log::info;
use thiserror::Error;

pub mod convert;
pub mod coords;
pub mod export;
pub mod geometry;
pub mod table;

pub use convert::{convert, Conversion, ConversionOptions, Feature, FeatureCollection};
pub use coords::{parse, CoordinateSequence};
pub use export::OutputFormat;
pub use geometry::{build, classify, GeometryKind, Transformation};
pub use table::{CellValue, Table};

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Table(#[from] table::TableError),

    #[error(transparent)]
    Convert(#[from] convert::ConvertError),

    #[error(transparent)]
    Export(#[from] export::ExportError),

    #[error("failed to create output directory {path}: {source}")]
    OutputDir {
        path: String,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// One table-to-geodata conversion.
#[derive(Debug, Clone)]
pub struct Job {
    /// CSV file or workbook.
    pub input: PathBuf,
    pub delimiter: u8,
    /// Workbook sheet; the first sheet when `None`.
    pub sheet: Option<String>,
    pub options: ConversionOptions,
    pub format: OutputFormat,
    pub output_dir: PathBuf,
}

/// What a finished [`Job`] produced.
#[derive(Debug)]
pub struct Report {
    pub output: PathBuf,
    pub sample_kind: GeometryKind,
    pub written: usize,
    pub rejected: Vec<convert::RejectedRecord>,
}

/// Load the job's table, convert the coordinate column and write the result.
///
/// Output files are named after the CSV file stem, or after the sheet for
/// workbook input.
pub fn process_file(job: &Job) -> Result<Report> {
    let loaded = table::load(&job.input, job.delimiter, job.sheet.as_deref())?;
    let conversion = convert::convert(&loaded.table, &job.options)?;

    create_dir_all(&job.output_dir).map_err(|source| Error::OutputDir {
        path: job.output_dir.display().to_string(),
        source,
    })?;

    let output = export::output_path(
        &job.output_dir,
        &loaded.name,
        &job.options.coordinate_column,
        &conversion.label(),
        job.format,
    );
    export::write(&conversion.collection, job.format, &output)?;
    info!("Output file can be found in: {}", output.display());

    Ok(Report {
        output,
        sample_kind: conversion.sample_kind,
        written: conversion.collection.len(),
        rejected: conversion.rejected,
    })
}
