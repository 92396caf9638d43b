use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use geo::{Geometry, LineString};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use super::wkb::geometry_name;
use super::{ExportError, Result};
use crate::convert::{Feature, FeatureCollection};
use crate::table::CellValue;

const KML_NAMESPACE: &str = "http://www.opengis.net/kml/2.2";

/// Write one KML 2.2 Placemark per feature.
///
/// Attributes go into `ExtendedData`. A column called `name` (in any case)
/// also names each placemark.
pub fn write_kml(collection: &FeatureCollection, path: &Path) -> Result<()> {
    let file = BufWriter::new(File::create(path)?);
    let mut writer = Writer::new_with_indent(file, b' ', 2);

    let layer = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("features");

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.write_event(Event::Start(
        BytesStart::new("kml").with_attributes([("xmlns", KML_NAMESPACE)]),
    ))?;
    writer.write_event(Event::Start(BytesStart::new("Document")))?;
    write_text_element(&mut writer, "name", layer)?;

    let name_column = collection
        .columns
        .iter()
        .position(|c| c.eq_ignore_ascii_case("name"));
    for feature in &collection.features {
        write_placemark(&mut writer, &collection.columns, name_column, feature)?;
    }

    writer.write_event(Event::End(BytesEnd::new("Document")))?;
    writer.write_event(Event::End(BytesEnd::new("kml")))?;
    writer.into_inner().flush()?;
    Ok(())
}

fn write_placemark<W: Write>(
    writer: &mut Writer<W>,
    columns: &[String],
    name_column: Option<usize>,
    feature: &Feature,
) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new("Placemark")))?;

    if let Some(name) = name_column
        .and_then(|i| feature.attributes.get(i))
        .and_then(CellValue::to_text)
    {
        write_text_element(writer, "name", &name)?;
    }

    writer.write_event(Event::Start(BytesStart::new("ExtendedData")))?;
    for (column, cell) in columns.iter().zip(&feature.attributes) {
        writer.write_event(Event::Start(
            BytesStart::new("Data").with_attributes([("name", column.as_str())]),
        ))?;
        write_text_element(writer, "value", &cell.to_string())?;
        writer.write_event(Event::End(BytesEnd::new("Data")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("ExtendedData")))?;

    write_geometry(writer, &feature.geometry)?;

    writer.write_event(Event::End(BytesEnd::new("Placemark")))?;
    Ok(())
}

fn write_geometry<W: Write>(writer: &mut Writer<W>, geometry: &Geometry<f64>) -> Result<()> {
    match geometry {
        Geometry::Point(point) => {
            writer.write_event(Event::Start(BytesStart::new("Point")))?;
            write_text_element(writer, "coordinates", &format!("{},{}", point.x(), point.y()))?;
            writer.write_event(Event::End(BytesEnd::new("Point")))?;
        }
        Geometry::LineString(line) => {
            writer.write_event(Event::Start(BytesStart::new("LineString")))?;
            write_text_element(writer, "coordinates", &coordinates(line))?;
            writer.write_event(Event::End(BytesEnd::new("LineString")))?;
        }
        Geometry::Polygon(polygon) => {
            writer.write_event(Event::Start(BytesStart::new("Polygon")))?;
            write_boundary(writer, "outerBoundaryIs", polygon.exterior())?;
            for interior in polygon.interiors() {
                write_boundary(writer, "innerBoundaryIs", interior)?;
            }
            writer.write_event(Event::End(BytesEnd::new("Polygon")))?;
        }
        other => return Err(ExportError::UnsupportedGeometry(geometry_name(other))),
    }
    Ok(())
}

fn write_boundary<W: Write>(
    writer: &mut Writer<W>,
    tag: &str,
    ring: &LineString<f64>,
) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(tag)))?;
    writer.write_event(Event::Start(BytesStart::new("LinearRing")))?;
    write_text_element(writer, "coordinates", &coordinates(ring))?;
    writer.write_event(Event::End(BytesEnd::new("LinearRing")))?;
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

fn write_text_element<W: Write>(writer: &mut Writer<W>, tag: &str, text: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(tag)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

fn coordinates(line: &LineString<f64>) -> String {
    line.points()
        .map(|p| format!("{},{}", p.x(), p.y()))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{point, polygon};

    #[test]
    fn writes_placemarks_with_extended_data() {
        let collection = FeatureCollection {
            columns: vec!["gps".into(), "Name".into(), "area".into()],
            features: vec![
                Feature {
                    attributes: vec![
                        CellValue::Text("0 0;1 0;1 1;0 0".into()),
                        CellValue::Text("A & B".into()),
                        CellValue::Float(1.5),
                    ],
                    geometry: Geometry::Polygon(polygon![
                        (x: 0.0, y: 0.0),
                        (x: 0.0, y: 1.0),
                        (x: 1.0, y: 1.0),
                        (x: 0.0, y: 0.0)
                    ]),
                },
                Feature {
                    attributes: vec![
                        CellValue::Text("-1.25 36.5".into()),
                        CellValue::Null,
                        CellValue::Integer(2),
                    ],
                    geometry: Geometry::Point(point!(x: 36.5, y: -1.25)),
                },
            ],
        };

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plots.kml");
        write_kml(&collection, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();

        assert!(text.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(text.contains("<kml xmlns=\"http://www.opengis.net/kml/2.2\">"));
        assert_eq!(text.matches("<Placemark>").count(), 2);
        assert!(text.contains("<name>A &amp; B</name>"));
        // document name plus one named placemark
        assert_eq!(text.matches("<name>").count(), 2);
        assert!(!text.contains("<name>0 0;1 0;1 1;0 0</name>"));
        assert!(text.contains("<Data name=\"area\">"));
        assert!(text.contains("<outerBoundaryIs>"));
        assert!(text.contains("0,0 0,1 1,1 0,0"));
        assert!(text.contains("<coordinates>36.5,-1.25</coordinates>"));
    }
}
