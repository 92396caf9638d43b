use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use geo::Geometry;
use geojson::{Feature, FeatureCollection as GeoJsonFeatureCollection, Geometry as GeoJsonGeometry, Value};

use super::wkb::geometry_name;
use super::{json_value, ExportError, Result};
use crate::convert::FeatureCollection;

/// Write the collection as an RFC 7946 FeatureCollection.
pub fn write_geojson(collection: &FeatureCollection, path: &Path) -> Result<()> {
    let features = collection
        .features
        .iter()
        .map(|feature| {
            let properties: serde_json::Map<String, serde_json::Value> = collection
                .columns
                .iter()
                .cloned()
                .zip(feature.attributes.iter().map(json_value))
                .collect();

            Ok(Feature {
                bbox: None,
                geometry: Some(to_geojson_geometry(&feature.geometry)?),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let feature_collection = GeoJsonFeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    };

    let file = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(file, &feature_collection)?;

    Ok(())
}

fn to_geojson_geometry(geometry: &Geometry<f64>) -> Result<GeoJsonGeometry> {
    let value = match geometry {
        Geometry::Point(point) => Value::Point(vec![point.x(), point.y()]),
        Geometry::LineString(line) => {
            Value::LineString(line.points().map(|p| vec![p.x(), p.y()]).collect())
        }
        Geometry::Polygon(polygon) => {
            let exterior: Vec<Vec<f64>> = polygon
                .exterior()
                .points()
                .map(|p| vec![p.x(), p.y()])
                .collect();
            let holes = polygon
                .interiors()
                .iter()
                .map(|ring| ring.points().map(|p| vec![p.x(), p.y()]).collect());
            let mut rings = vec![exterior];
            rings.extend(holes);
            Value::Polygon(rings)
        }
        other => return Err(ExportError::UnsupportedGeometry(geometry_name(other))),
    };
    Ok(GeoJsonGeometry::new(value))
}
