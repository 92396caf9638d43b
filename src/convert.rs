use std::collections::HashSet;

use geo::{BoundingRect, Geometry, Rect};
use log::{debug, info, warn};
use rayon::prelude::*;
use thiserror::Error;

use crate::coords::parse_cell;
use crate::geometry::{build, GeometryKind, Transformation};
use crate::table::{AttributeType, CellValue, Table};

/// Name of the geometry column in every output format.
pub const GEOMETRY_COLUMN: &str = "geometry";

pub type Result<T> = std::result::Result<T, ConvertError>;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("column not found: {0}")]
    UnknownColumn(String),

    #[error("column {column} has no GPS data once empty cells are removed")]
    EmptyFilteredInput { column: String },

    #[error("column {column} contains no valid GPS data")]
    NoValidGpsData { column: String },

    #[error("none of the {rejected} records in column {column} produced a geometry")]
    NoGeometries { column: String, rejected: usize },
}

/// User choices for one conversion.
#[derive(Debug, Clone)]
pub struct ConversionOptions {
    pub coordinate_column: String,
    /// Columns carried into the output as attributes. The coordinate column
    /// is always added if missing.
    pub selected_columns: Vec<String>,
    /// Carry every table column instead of `selected_columns`.
    pub all_columns: bool,
    /// Applied to closed rings only; other shapes use their own kind.
    pub transformation: Transformation,
}

impl ConversionOptions {
    pub fn new(coordinate_column: impl Into<String>) -> Self {
        let coordinate_column = coordinate_column.into();
        Self {
            selected_columns: vec![coordinate_column.clone()],
            coordinate_column,
            all_columns: false,
            transformation: Transformation::Polygon,
        }
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selected_columns = columns.into_iter().map(Into::into).collect();
        self.all_columns = false;
        self
    }

    /// Select every column of whatever table is converted.
    pub fn with_all_columns(mut self) -> Self {
        self.all_columns = true;
        self
    }

    pub fn with_transformation(mut self, transformation: Transformation) -> Self {
        self.transformation = transformation;
        self
    }
}

/// Attributes and geometry of one converted record. `attributes` lines up
/// with [`FeatureCollection::columns`].
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub attributes: Vec<CellValue>,
    pub geometry: Geometry<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct FeatureCollection {
    pub columns: Vec<String>,
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Storage type of each attribute column.
    pub fn attribute_types(&self) -> Vec<AttributeType> {
        (0..self.columns.len())
            .map(|i| AttributeType::infer(self.features.iter().map(|f| &f.attributes[i])))
            .collect()
    }

    /// Bounding box of all geometries, if any.
    pub fn bounds(&self) -> Option<Rect<f64>> {
        self.features
            .iter()
            .filter_map(|f| f.geometry.bounding_rect())
            .reduce(|a, b| {
                Rect::new(
                    (a.min().x.min(b.min().x), a.min().y.min(b.min().y)),
                    (a.max().x.max(b.max().x), a.max().y.max(b.max().y)),
                )
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    MalformedCoordinateString,
    UnclassifiableGeometry,
}

/// A record that produced no geometry. `row` is the zero-based data row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRecord {
    pub row: usize,
    pub kind: GeometryKind,
    pub reason: RejectReason,
}

#[derive(Debug, Clone)]
pub struct Conversion {
    /// Kind detected on the first non-empty coordinate cell.
    pub sample_kind: GeometryKind,
    /// Transformation applied to records of the sample kind.
    pub transformation: Option<Transformation>,
    pub collection: FeatureCollection,
    pub rejected: Vec<RejectedRecord>,
}

impl Conversion {
    /// Short name of the applied transformation, used in output file names.
    pub fn label(&self) -> String {
        match self.transformation {
            Some(t) => t.as_str().to_string(),
            None => self.sample_kind.to_string().to_lowercase(),
        }
    }
}

/// Kind of the first non-empty cell in `column`.
pub fn detect_sample_kind(table: &Table, column: &str) -> Result<GeometryKind> {
    let sample = table
        .column(column)
        .ok_or_else(|| ConvertError::UnknownColumn(column.to_string()))?
        .find(|c| !c.is_null())
        .ok_or_else(|| ConvertError::EmptyFilteredInput {
            column: column.to_string(),
        })?;
    Ok(parse_cell(sample).1)
}

/// The first `n` cells of `column` with the kind each one parses to.
pub fn preview(table: &Table, column: &str, n: usize) -> Result<Vec<(CellValue, GeometryKind)>> {
    let cells = table
        .column(column)
        .ok_or_else(|| ConvertError::UnknownColumn(column.to_string()))?;
    Ok(cells
        .take(n)
        .map(|c| (c.clone(), parse_cell(c).1))
        .collect())
}

/// Convert every non-empty coordinate cell of `table` into a feature.
///
/// Records whose cell is malformed or does not describe a buildable shape are
/// returned in [`Conversion::rejected`] instead of failing the batch.
pub fn convert(table: &Table, options: &ConversionOptions) -> Result<Conversion> {
    let coord_idx = table
        .column_index(&options.coordinate_column)
        .ok_or_else(|| ConvertError::UnknownColumn(options.coordinate_column.clone()))?;

    let wanted = if options.all_columns {
        table.columns()
    } else {
        options.selected_columns.as_slice()
    };
    let mut selected = Vec::with_capacity(wanted.len() + 1);
    if !wanted.contains(&options.coordinate_column) {
        selected.push(coord_idx);
    }
    for name in wanted {
        let idx = table
            .column_index(name)
            .ok_or_else(|| ConvertError::UnknownColumn(name.clone()))?;
        if !selected.contains(&idx) {
            selected.push(idx);
        }
    }

    let columns = output_column_names(selected.iter().map(|&i| table.columns()[i].as_str()));

    let records: Vec<(usize, &Vec<CellValue>)> = table
        .rows()
        .iter()
        .enumerate()
        .filter(|(_, row)| !row[coord_idx].is_null())
        .collect();

    let Some((_, first)) = records.first() else {
        warn!("No valid GPS data found in column {}", options.coordinate_column);
        return Err(ConvertError::EmptyFilteredInput {
            column: options.coordinate_column.clone(),
        });
    };

    let sample_kind = parse_cell(&first[coord_idx]).1;
    if sample_kind == GeometryKind::Invalid {
        return Err(ConvertError::NoValidGpsData {
            column: options.coordinate_column.clone(),
        });
    }
    let transformation = Transformation::for_kind(sample_kind, options.transformation);
    info!(
        "Detected geometry type {} in column {}",
        sample_kind, options.coordinate_column
    );

    let requested = options.transformation;
    let results: Vec<_> = records
        .par_iter()
        .map(|&(row, cells)| {
            let attributes = selected
                .iter()
                .map(|&i| cells[i].clone().stringify_datetime())
                .collect();
            convert_record(row, &cells[coord_idx], requested)
                .map(|geometry| Feature { attributes, geometry })
        })
        .collect();

    let mut features = Vec::with_capacity(results.len());
    let mut rejected = Vec::new();
    for result in results {
        match result {
            Ok(feature) => features.push(feature),
            Err(rejection) => {
                warn!(
                    "Row {} rejected: {:?} (detected {})",
                    rejection.row, rejection.reason, rejection.kind
                );
                rejected.push(rejection);
            }
        }
    }

    info!(
        "Converted {} of {} records ({} rejected)",
        features.len(),
        records.len(),
        rejected.len()
    );

    if features.is_empty() {
        return Err(ConvertError::NoGeometries {
            column: options.coordinate_column.clone(),
            rejected: rejected.len(),
        });
    }

    Ok(Conversion {
        sample_kind,
        transformation,
        collection: FeatureCollection { columns, features },
        rejected,
    })
}

fn convert_record(
    row: usize,
    cell: &CellValue,
    requested: Transformation,
) -> std::result::Result<Geometry<f64>, RejectedRecord> {
    let (coords, kind) = parse_cell(cell);
    debug!("Row {row}: {} vertices, {kind}", coords.len());

    if kind == GeometryKind::Invalid {
        return Err(RejectedRecord {
            row,
            kind,
            reason: RejectReason::MalformedCoordinateString,
        });
    }

    Transformation::for_kind(kind, requested)
        .and_then(|t| build(&coords, kind, t))
        .ok_or(RejectedRecord {
            row,
            kind,
            reason: RejectReason::UnclassifiableGeometry,
        })
}

/// Attribute names for the output, renaming any that would clash with the
/// geometry column.
fn output_column_names<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    let names: Vec<&str> = names.collect();
    let mut taken: HashSet<String> = names.iter().map(|n| n.to_lowercase()).collect();
    taken.insert(GEOMETRY_COLUMN.to_string());

    names
        .into_iter()
        .map(|name| {
            if !name.eq_ignore_ascii_case(GEOMETRY_COLUMN) {
                return name.to_string();
            }
            let renamed = (1..)
                .map(|i| format!("{name}_{i}"))
                .find(|candidate| !taken.contains(&candidate.to_lowercase()))
                .unwrap_or_else(|| format!("{name}_src"));
            warn!("Column {name} collides with the output geometry column, renamed to {renamed}");
            taken.insert(renamed.to_lowercase());
            renamed
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::read_csv_from;

    fn table(csv: &str) -> Table {
        read_csv_from(csv.as_bytes(), b',').unwrap()
    }

    #[test]
    fn renames_reserved_geometry_column() {
        let names = output_column_names(["geometry", "geometry_1", "name"].into_iter());
        assert_eq!(names, ["geometry_2", "geometry_1", "name"]);

        let names = output_column_names(["Geometry", "GEOMETRY_1", "gps"].into_iter());
        assert_eq!(names, ["Geometry_2", "GEOMETRY_1", "gps"]);
    }

    #[test]
    fn coordinate_column_is_always_kept() {
        let t = table("id,gps\n1,10 20\n");
        let options = ConversionOptions::new("gps").with_columns(["id"]);
        let conversion = convert(&t, &options).unwrap();
        assert_eq!(conversion.collection.columns, ["gps", "id"]);
    }

    #[test]
    fn all_columns_follow_table_order() {
        let t = table("id,gps,note\n1,10 20,a\n");
        let options = ConversionOptions::new("gps").with_all_columns();
        let conversion = convert(&t, &options).unwrap();
        assert_eq!(conversion.collection.columns, ["id", "gps", "note"]);
    }

    #[test]
    fn empty_column_is_an_error() {
        let t = table("id,gps\n1,\n2,\n");
        let err = convert(&t, &ConversionOptions::new("gps")).unwrap_err();
        assert!(matches!(err, ConvertError::EmptyFilteredInput { .. }));
    }

    #[test]
    fn invalid_sample_stops_the_conversion() {
        let t = table("gps\n10 abc\n10 20\n");
        let err = convert(&t, &ConversionOptions::new("gps")).unwrap_err();
        assert!(matches!(err, ConvertError::NoValidGpsData { .. }));
    }

    #[test]
    fn unknown_column_is_reported() {
        let t = table("gps\n10 20\n");
        let options = ConversionOptions::new("gps").with_columns(["gps", "nope"]);
        let err = convert(&t, &options).unwrap_err();
        assert!(matches!(err, ConvertError::UnknownColumn(c) if c == "nope"));
    }

    #[test]
    fn sample_kind_and_preview() {
        let t = table("id,gps\n1,\n2,0 0;0 1;1 1;0 0\n3,10 20\n");
        assert_eq!(detect_sample_kind(&t, "gps").unwrap(), GeometryKind::Polygon);

        let rows = preview(&t, "gps", 2).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], (CellValue::Null, GeometryKind::Invalid));
        assert_eq!(rows[1].1, GeometryKind::Polygon);
    }

    #[test]
    fn bounds_cover_all_features() {
        let t = table("gps\n10 20\n-5 30;15 -40\n");
        let conversion = convert(&t, &ConversionOptions::new("gps")).unwrap();
        let rect = conversion.collection.bounds().unwrap();
        assert_eq!(rect.min().x, -40.0);
        assert_eq!(rect.max().x, 30.0);
        assert_eq!(rect.min().y, -5.0);
        assert_eq!(rect.max().y, 15.0);
    }
}
