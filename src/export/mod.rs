//! Writers for the supported output formats.
//!
//! Every writer takes a [`FeatureCollection`] and a destination path and
//! stores coordinates as-is in EPSG:4326; nothing is reprojected.

use std::fmt;
use std::path::{Path, PathBuf};

use geo::Geometry;
use log::info;
use thiserror::Error;

use crate::convert::FeatureCollection;
use crate::table::CellValue;

mod geojson;
mod geoparquet;
mod gpkg;
mod kml;
mod shp;
mod wkb;

pub use self::geojson::write_geojson;
pub use self::geoparquet::write_geoparquet;
pub use self::gpkg::write_gpkg;
pub use self::kml::write_kml;
pub use self::shp::write_shapefile_zip;

/// EPSG code of the only coordinate reference system written.
pub const EPSG_CODE: i32 = 4326;

/// ESRI WKT for WGS 84, as stored in shapefile `.prj` sidecars.
pub const WGS84_PRJ: &str = r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#;

pub type Result<T> = std::result::Result<T, ExportError>;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("shapefile error: {0}")]
    Shapefile(#[from] shapefile::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("unsupported geometry type: {0}")]
    UnsupportedGeometry(&'static str),

    #[error("a shapefile holds a single geometry type, found both {first} and {other}")]
    MixedGeometryTypes {
        first: &'static str,
        other: &'static str,
    },

    #[error("column name cannot be stored as a dBase field: {0}")]
    UnsupportedFieldName(String),

    #[error("nothing to export")]
    Empty,
}

/// Output formats, named the way users pick them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Shapefile,
    Kml,
    Gpkg,
    Geoparquet,
    Geojson,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Shapefile => "zip",
            OutputFormat::Kml => "kml",
            OutputFormat::Gpkg => "gpkg",
            OutputFormat::Geoparquet => "parquet",
            OutputFormat::Geojson => "geojson",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputFormat::Shapefile => "shapefile",
            OutputFormat::Kml => "kml",
            OutputFormat::Gpkg => "gpkg",
            OutputFormat::Geoparquet => "geoparquet",
            OutputFormat::Geojson => "geojson",
        };
        f.write_str(name)
    }
}

/// `{dir}/{stem}_{column}_{label}.{ext}`
pub fn output_path(
    dir: &Path,
    input_stem: &str,
    column: &str,
    label: &str,
    format: OutputFormat,
) -> PathBuf {
    dir.join(format!(
        "{input_stem}_{column}_{label}.{}",
        format.extension()
    ))
}

/// Write `collection` to `path` in `format`.
pub fn write(collection: &FeatureCollection, format: OutputFormat, path: &Path) -> Result<()> {
    if collection.is_empty() {
        return Err(ExportError::Empty);
    }
    info!(
        "Writing {} features as {} to {}",
        collection.len(),
        format,
        path.display()
    );
    match format {
        OutputFormat::Shapefile => write_shapefile_zip(collection, path),
        OutputFormat::Kml => write_kml(collection, path),
        OutputFormat::Gpkg => write_gpkg(collection, path),
        OutputFormat::Geoparquet => write_geoparquet(collection, path),
        OutputFormat::Geojson => write_geojson(collection, path),
    }
}

/// GeoPackage / GeoParquet / GeoJSON name of a geometry's type.
pub(crate) fn geometry_type_name(geometry: &Geometry<f64>) -> &'static str {
    wkb::geometry_name(geometry)
}

pub(crate) fn json_value(cell: &CellValue) -> serde_json::Value {
    match cell {
        CellValue::Null => serde_json::Value::Null,
        CellValue::Integer(i) => serde_json::Value::from(*i),
        CellValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        CellValue::Bool(b) => serde_json::Value::Bool(*b),
        other => serde_json::Value::String(other.to_string()),
    }
}
