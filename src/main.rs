use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Arg, ArgAction, Command};
use log::{error, info};
use odk_geo::convert::{detect_sample_kind, preview, ConversionOptions};
use odk_geo::{process_file, table, Job, OutputFormat, Transformation};

fn cli() -> Command {
    Command::new("ODK GPS Converter")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Converts ODK GPS coordinate columns into shapefile, KML, GeoPackage, GeoParquet or GeoJSON")
        .arg(
            Arg::new("file")
                .short('f')
                .long("file")
                .required(true)
                .help("Input CSV file or Excel workbook with a header row"),
        )
        .arg(
            Arg::new("sheet")
                .short('s')
                .long("sheet")
                .help("Workbook sheet to read (defaults to the first sheet)"),
        )
        .arg(
            Arg::new("list-sheets")
                .long("list-sheets")
                .action(ArgAction::SetTrue)
                .help("Print the sheet names of a workbook, then exit"),
        )
        .arg(
            Arg::new("column")
                .short('c')
                .long("column")
                .required_unless_present("list-sheets")
                .help("Column holding the ODK coordinate strings"),
        )
        .arg(
            Arg::new("columns")
                .long("columns")
                .num_args(1..)
                .action(ArgAction::Append)
                .help("Additional columns to include in the export"),
        )
        .arg(
            Arg::new("all-columns")
                .long("all-columns")
                .action(ArgAction::SetTrue)
                .conflicts_with("columns")
                .help("Include every column in the export"),
        )
        .arg(
            Arg::new("transformation")
                .short('t')
                .long("transformation")
                .value_parser(clap::value_parser!(Transformation))
                .default_value("polygon")
                .help("How closed rings are written (only used for polygon data)"),
        )
        .arg(
            Arg::new("format")
                .long("format")
                .value_parser(clap::value_parser!(OutputFormat))
                .default_value("geojson")
                .help("Output format"),
        )
        .arg(
            Arg::new("output-dir")
                .short('o')
                .long("output-dir")
                .default_value("output")
                .help("Directory for the output file"),
        )
        .arg(
            Arg::new("delimiter")
                .short('d')
                .long("delimiter")
                .default_value(",")
                .help("CSV field delimiter (a single byte)"),
        )
        .arg(
            Arg::new("preview")
                .long("preview")
                .value_parser(clap::value_parser!(usize))
                .help("Show the first N coordinate cells with their detected type, then exit"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Log per-record details"),
        )
}

fn main() {
    let matches = cli().get_matches();

    let level = if matches.get_flag("verbose") { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run(&matches) {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn run(matches: &clap::ArgMatches) -> Result<()> {
    let input = matches
        .get_one::<String>("file")
        .map(PathBuf::from)
        .context("missing input file")?;
    if !input.exists() {
        bail!("File not found: {}", input.display());
    }

    if matches.get_flag("list-sheets") {
        for name in table::sheet_names(&input)? {
            println!("{name}");
        }
        return Ok(());
    }

    let column = matches
        .get_one::<String>("column")
        .context("missing coordinate column")?
        .clone();
    let sheet = matches.get_one::<String>("sheet").cloned();

    let delimiter = match matches.get_one::<String>("delimiter").map(|s| s.as_bytes()) {
        Some([byte]) => *byte,
        _ => bail!("The delimiter must be a single byte"),
    };

    if let Some(&n) = matches.get_one::<usize>("preview") {
        let table = table::load(&input, delimiter, sheet.as_deref())?.table;
        for (cell, kind) in preview(&table, &column, n)? {
            println!("{:<8} {cell}", kind.to_string());
        }
        match detect_sample_kind(&table, &column) {
            Ok(kind) => println!("Detected geometry type: {kind}"),
            Err(e) => println!("{e}"),
        }
        return Ok(());
    }

    let transformation = matches
        .get_one::<Transformation>("transformation")
        .copied()
        .unwrap_or(Transformation::Polygon);
    let format = matches
        .get_one::<OutputFormat>("format")
        .copied()
        .unwrap_or(OutputFormat::Geojson);

    let mut options = ConversionOptions::new(column.clone()).with_transformation(transformation);
    if matches.get_flag("all-columns") {
        options = options.with_all_columns();
    } else if let Some(extra) = matches.get_many::<String>("columns") {
        options = options.with_columns(std::iter::once(column).chain(extra.cloned()));
    }

    let job = Job {
        input,
        delimiter,
        sheet,
        options,
        format,
        output_dir: matches
            .get_one::<String>("output-dir")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("output")),
    };

    let report = process_file(&job).with_context(|| format!("processing {}", job.input.display()))?;

    info!(
        "Detected {} data, wrote {} features to {} ({} rejected)",
        report.sample_kind,
        report.written,
        report.output.display(),
        report.rejected.len()
    );
    println!("{}", report.output.display());
    Ok(())
}
