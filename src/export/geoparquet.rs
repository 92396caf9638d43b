use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, BinaryArray, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::metadata::KeyValue;
use parquet::file::properties::WriterProperties;
use serde::Serialize;

use super::wkb::to_wkb;
use super::{geometry_type_name, Result};
use crate::convert::{FeatureCollection, GEOMETRY_COLUMN};
use crate::table::AttributeType;

const GEOPARQUET_VERSION: &str = "1.0.0";

/// Top-level `geo` file metadata.
#[derive(Debug, Serialize)]
struct GeoParquetMetadata {
    version: String,
    primary_column: String,
    columns: HashMap<String, GeoParquetColumnMetadata>,
}

#[derive(Debug, Serialize)]
struct GeoParquetColumnMetadata {
    encoding: String,
    /// Unique geometry type names present in the column.
    geometry_types: BTreeSet<&'static str>,
    /// `[min_x, min_y, max_x, max_y]`
    #[serde(skip_serializing_if = "Option::is_none")]
    bbox: Option<Vec<f64>>,
}

/// Write the collection as GeoParquet with a WKB geometry column.
///
/// No `crs` is written, which GeoParquet readers take as OGC:CRS84, the
/// longitude/latitude form of WGS 84.
pub fn write_geoparquet(collection: &FeatureCollection, path: &Path) -> Result<()> {
    let batch = to_record_batch(collection)?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(File::create(path)?, batch.schema(), Some(props))?;
    writer.append_key_value_metadata(KeyValue::new(
        "geo".to_string(),
        serde_json::to_string(&create_metadata(collection))?,
    ));
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

fn to_record_batch(collection: &FeatureCollection) -> Result<RecordBatch> {
    let types = collection.attribute_types();
    let mut fields = Vec::with_capacity(collection.columns.len() + 1);
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(collection.columns.len() + 1);

    for (i, (name, kind)) in collection.columns.iter().zip(&types).enumerate() {
        let cells = collection.features.iter().map(|f| &f.attributes[i]);
        let (data_type, array) = match kind {
            AttributeType::Integer => (
                DataType::Int64,
                Arc::new(Int64Array::from(cells.map(|c| c.as_i64()).collect::<Vec<_>>())) as ArrayRef,
            ),
            AttributeType::Float => (
                DataType::Float64,
                Arc::new(Float64Array::from(cells.map(|c| c.as_f64()).collect::<Vec<_>>())) as ArrayRef,
            ),
            AttributeType::Bool => (
                DataType::Boolean,
                Arc::new(BooleanArray::from(cells.map(|c| c.as_bool()).collect::<Vec<_>>())) as ArrayRef,
            ),
            AttributeType::Text => (
                DataType::Utf8,
                Arc::new(StringArray::from(cells.map(|c| c.to_text()).collect::<Vec<_>>())) as ArrayRef,
            ),
        };
        fields.push(Field::new(name, data_type, true));
        arrays.push(array);
    }

    let wkb = collection
        .features
        .iter()
        .map(|f| to_wkb(&f.geometry))
        .collect::<Result<Vec<_>>>()?;
    fields.push(Field::new(GEOMETRY_COLUMN, DataType::Binary, false));
    arrays.push(Arc::new(BinaryArray::from_iter_values(wkb)));

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
}

fn create_metadata(collection: &FeatureCollection) -> GeoParquetMetadata {
    let geometry_types = collection
        .features
        .iter()
        .map(|f| geometry_type_name(&f.geometry))
        .collect();
    let bbox = collection
        .bounds()
        .map(|r| vec![r.min().x, r.min().y, r.max().x, r.max().y]);

    let column_meta = GeoParquetColumnMetadata {
        encoding: "WKB".to_string(),
        geometry_types,
        bbox,
    };
    let mut columns = HashMap::with_capacity(1);
    columns.insert(GEOMETRY_COLUMN.to_string(), column_meta);

    GeoParquetMetadata {
        version: GEOPARQUET_VERSION.to_string(),
        primary_column: GEOMETRY_COLUMN.to_string(),
        columns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::Feature;
    use crate::table::CellValue;
    use geo::{line_string, point, Geometry};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use parquet::file::reader::{FileReader, SerializedFileReader};

    fn collection() -> FeatureCollection {
        FeatureCollection {
            columns: vec!["id".into(), "visited".into(), "note".into()],
            features: vec![
                Feature {
                    attributes: vec![
                        CellValue::Integer(1),
                        CellValue::Bool(true),
                        CellValue::Text("2024-03-01 10:15:30".into()),
                    ],
                    geometry: Geometry::Point(point!(x: 36.8, y: -1.3)),
                },
                Feature {
                    attributes: vec![CellValue::Integer(2), CellValue::Null, CellValue::Null],
                    geometry: Geometry::LineString(line_string![
                        (x: 36.0, y: -2.0),
                        (x: 37.0, y: -1.0)
                    ]),
                },
            ],
        }
    }

    #[test]
    fn typed_columns_and_wkb_geometry() {
        let batch = to_record_batch(&collection()).unwrap();
        let schema = batch.schema();
        let names: Vec<_> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, ["id", "visited", "note", "geometry"]);
        assert_eq!(schema.field(0).data_type(), &DataType::Int64);
        assert_eq!(schema.field(1).data_type(), &DataType::Boolean);
        assert_eq!(schema.field(2).data_type(), &DataType::Utf8);
        assert_eq!(schema.field(3).data_type(), &DataType::Binary);
        assert_eq!(batch.num_rows(), 2);
    }

    #[test]
    fn metadata_lists_types_and_bbox() {
        let meta = serde_json::to_value(create_metadata(&collection())).unwrap();
        assert_eq!(meta["version"], "1.0.0");
        assert_eq!(meta["primary_column"], "geometry");
        let column = &meta["columns"]["geometry"];
        assert_eq!(column["encoding"], "WKB");
        assert_eq!(column["geometry_types"], serde_json::json!(["LineString", "Point"]));
        assert_eq!(column["bbox"], serde_json::json!([36.0, -2.0, 37.0, -1.0]));
    }

    #[test]
    fn file_carries_geo_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("points.parquet");
        write_geoparquet(&collection(), &path).unwrap();

        let reader = SerializedFileReader::new(File::open(&path).unwrap()).unwrap();
        let geo = reader
            .metadata()
            .file_metadata()
            .key_value_metadata()
            .and_then(|kv| kv.iter().find(|kv| kv.key == "geo"))
            .and_then(|kv| kv.value.clone())
            .expect("geo metadata");
        let geo: serde_json::Value = serde_json::from_str(&geo).unwrap();
        assert_eq!(geo["primary_column"], "geometry");

        let rows: usize = ParquetRecordBatchReaderBuilder::try_new(File::open(&path).unwrap())
            .unwrap()
            .build()
            .unwrap()
            .map(|batch| batch.unwrap().num_rows())
            .sum();
        assert_eq!(rows, 2);
    }
}
