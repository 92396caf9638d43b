use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use dbase::{FieldName, FieldValue, Record, TableWriterBuilder};
use geo::{Coord, Geometry, LineString};
use log::{debug, warn};
use shapefile::record::EsriShape;
use shapefile::{Point, PolygonRing, Polyline, Writer};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::wkb::geometry_name;
use super::{ExportError, Result, WGS84_PRJ};
use crate::convert::FeatureCollection;
use crate::table::{AttributeType, CellValue};

/// dBase field names hold at most 10 bytes.
const MAX_FIELD_NAME: usize = 10;
const MAX_CHARACTER_LENGTH: usize = 254;
/// Sign plus the 19 digits of `i64::MAX`.
const INTEGER_WIDTH: u8 = 20;
/// Largest magnitude dBase numerics hold exactly, since they are written
/// from `f64`.
const MAX_EXACT_INTEGER: i64 = 1 << 53;
const SIDECARS: [&str; 5] = ["shp", "shx", "dbf", "prj", "cpg"];

struct DbfField {
    name: String,
    kind: AttributeType,
}

/// Write the collection as a shapefile and bundle its sidecar files into the
/// zip archive at `path`.
pub fn write_shapefile_zip(collection: &FeatureCollection, path: &Path) -> Result<()> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("features")
        .to_string();

    let staging = tempfile::tempdir()?;
    let shp_path = staging.path().join(format!("{stem}.shp"));
    write_shapefile(collection, &shp_path)?;
    fs::write(staging.path().join(format!("{stem}.prj")), WGS84_PRJ)?;
    fs::write(staging.path().join(format!("{stem}.cpg")), "UTF-8")?;

    let mut zip = ZipWriter::new(BufWriter::new(File::create(path)?));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for ext in SIDECARS {
        let name = format!("{stem}.{ext}");
        let sidecar = staging.path().join(&name);
        if !sidecar.exists() {
            continue;
        }
        debug!("Adding {name} to archive");
        zip.start_file(name, options)?;
        zip.write_all(&fs::read(&sidecar)?)?;
    }
    zip.finish()?.flush()?;
    Ok(())
}

/// Write `.shp`, `.shx` and `.dbf` next to `shp_path`.
///
/// A shapefile holds one shape type, so every geometry must be of the same
/// kind as the first.
pub(crate) fn write_shapefile(collection: &FeatureCollection, shp_path: &Path) -> Result<()> {
    let first = collection.features.first().ok_or(ExportError::Empty)?;
    let first_type = geometry_name(&first.geometry);
    if let Some(other) = collection
        .features
        .iter()
        .map(|f| geometry_name(&f.geometry))
        .find(|name| *name != first_type)
    {
        return Err(ExportError::MixedGeometryTypes {
            first: first_type,
            other,
        });
    }

    let fields = dbf_fields(collection);
    let records = collection.features.iter().map(|feature| {
        let mut record = Record::default();
        for (field, cell) in fields.iter().zip(&feature.attributes) {
            record.insert(field.name.clone(), field_value(field.kind, cell));
        }
        record
    });

    let builder = table_builder(&fields, collection)?;
    let mut writer = Writer::from_path(shp_path, builder)?;

    match &first.geometry {
        Geometry::Point(_) => {
            let shapes = collection.features.iter().map(|f| match &f.geometry {
                Geometry::Point(p) => Point::new(p.x(), p.y()),
                _ => unreachable!("checked above"),
            });
            write_all(&mut writer, shapes, records)?;
        }
        Geometry::LineString(_) => {
            let shapes = collection.features.iter().map(|f| match &f.geometry {
                Geometry::LineString(line) => Polyline::new(points(line)),
                _ => unreachable!("checked above"),
            });
            write_all(&mut writer, shapes, records)?;
        }
        Geometry::Polygon(_) => {
            let shapes = collection.features.iter().map(|f| match &f.geometry {
                Geometry::Polygon(polygon) => {
                    let mut rings = vec![PolygonRing::Outer(points(polygon.exterior()))];
                    rings.extend(
                        polygon
                            .interiors()
                            .iter()
                            .map(|ring| PolygonRing::Inner(points(ring))),
                    );
                    shapefile::Polygon::with_rings(rings)
                }
                _ => unreachable!("checked above"),
            });
            write_all(&mut writer, shapes, records)?;
        }
        other => return Err(ExportError::UnsupportedGeometry(geometry_name(other))),
    }

    Ok(())
}

fn write_all<T, S, I, R>(writer: &mut Writer<T>, shapes: I, records: R) -> Result<()>
where
    T: Write + std::io::Seek,
    S: EsriShape,
    I: Iterator<Item = S>,
    R: Iterator<Item = Record>,
{
    for (shape, record) in shapes.zip(records) {
        writer.write_shape_and_record(&shape, &record)?;
    }
    Ok(())
}

fn points(line: &LineString<f64>) -> Vec<Point> {
    line.0
        .iter()
        .map(|&Coord { x, y }| Point::new(x, y))
        .collect()
}

/// dBase field names, truncated and made unique.
fn dbf_fields(collection: &FeatureCollection) -> Vec<DbfField> {
    let mut taken = HashSet::new();
    collection
        .columns
        .iter()
        .zip(collection.attribute_types())
        .enumerate()
        .map(|(i, (column, kind))| {
            let kind = match kind {
                AttributeType::Integer if !integers_fit(collection, i) => {
                    warn!("Column {column} holds integers too large for a dBase numeric, stored as text");
                    AttributeType::Text
                }
                other => other,
            };
            let base = truncate_utf8(column, MAX_FIELD_NAME);
            let mut name = base.to_string();
            let mut n = 1;
            while !taken.insert(name.to_uppercase()) {
                let suffix = format!("_{n}");
                let keep = MAX_FIELD_NAME.saturating_sub(suffix.len());
                name = format!("{}{suffix}", truncate_utf8(base, keep));
                n += 1;
            }
            if name != *column {
                warn!("Column {column} stored as dBase field {name}");
            }
            DbfField { name, kind }
        })
        .collect()
}

fn integers_fit(collection: &FeatureCollection, column: usize) -> bool {
    collection
        .features
        .iter()
        .filter_map(|f| f.attributes[column].as_i64())
        .all(|v| v.unsigned_abs() <= MAX_EXACT_INTEGER as u64)
}

fn table_builder(fields: &[DbfField], collection: &FeatureCollection) -> Result<TableWriterBuilder> {
    let mut builder = TableWriterBuilder::new();
    for (i, field) in fields.iter().enumerate() {
        let name = FieldName::try_from(field.name.as_str())
            .map_err(|_| ExportError::UnsupportedFieldName(field.name.clone()))?;
        builder = match field.kind {
            AttributeType::Integer => builder.add_numeric_field(name, INTEGER_WIDTH, 0),
            AttributeType::Float => builder.add_numeric_field(name, 24, 15),
            AttributeType::Bool => builder.add_logical_field(name),
            AttributeType::Text => {
                let longest = collection
                    .features
                    .iter()
                    .filter_map(|f| f.attributes[i].to_text())
                    .map(|s| s.len())
                    .max()
                    .unwrap_or(1);
                builder.add_character_field(name, longest.clamp(1, MAX_CHARACTER_LENGTH) as u8)
            }
        };
    }
    Ok(builder)
}

fn field_value(kind: AttributeType, cell: &CellValue) -> FieldValue {
    match kind {
        AttributeType::Integer | AttributeType::Float => FieldValue::Numeric(cell.as_f64()),
        AttributeType::Bool => FieldValue::Logical(cell.as_bool()),
        AttributeType::Text => FieldValue::Character(cell.to_text().map(|s| {
            if s.len() <= MAX_CHARACTER_LENGTH {
                s
            } else {
                truncate_utf8(&s, MAX_CHARACTER_LENGTH).to_string()
            }
        })),
    }
}

fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    let mut end = max_bytes.min(s.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
