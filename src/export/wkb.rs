//! Little-endian OGC Well-Known Binary for the shapes this crate produces.

use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};
use geo::{Coord, Geometry, LineString, Polygon};

use super::{ExportError, Result};

const LITTLE_ENDIAN: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub(crate) enum WkbType {
    Point = 1,
    LineString = 2,
    Polygon = 3,
}

/// Encode a point, line string or polygon as WKB.
pub(crate) fn to_wkb(geometry: &Geometry<f64>) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(wkb_size(geometry));
    write_geometry(&mut out, geometry)?;
    Ok(out)
}

pub(crate) fn write_geometry<W: Write>(writer: &mut W, geometry: &Geometry<f64>) -> Result<()> {
    match geometry {
        Geometry::Point(point) => {
            write_header(writer, WkbType::Point)?;
            write_coord(writer, point.0)?;
        }
        Geometry::LineString(line) => {
            write_header(writer, WkbType::LineString)?;
            write_ring(writer, line)?;
        }
        Geometry::Polygon(polygon) => write_polygon(writer, polygon)?,
        other => return Err(ExportError::UnsupportedGeometry(geometry_name(other))),
    }
    Ok(())
}

fn write_polygon<W: Write>(writer: &mut W, polygon: &Polygon<f64>) -> Result<()> {
    write_header(writer, WkbType::Polygon)?;
    writer.write_u32::<LittleEndian>(1 + polygon.interiors().len() as u32)?;
    write_ring(writer, polygon.exterior())?;
    for interior in polygon.interiors() {
        write_ring(writer, interior)?;
    }
    Ok(())
}

fn write_header<W: Write>(writer: &mut W, wkb_type: WkbType) -> Result<()> {
    writer.write_u8(LITTLE_ENDIAN)?;
    writer.write_u32::<LittleEndian>(wkb_type as u32)?;
    Ok(())
}

fn write_ring<W: Write>(writer: &mut W, line: &LineString<f64>) -> Result<()> {
    writer.write_u32::<LittleEndian>(line.0.len() as u32)?;
    for coord in &line.0 {
        write_coord(writer, *coord)?;
    }
    Ok(())
}

fn write_coord<W: Write>(writer: &mut W, coord: Coord<f64>) -> Result<()> {
    writer.write_f64::<LittleEndian>(coord.x)?;
    writer.write_f64::<LittleEndian>(coord.y)?;
    Ok(())
}

fn wkb_size(geometry: &Geometry<f64>) -> usize {
    let header = 1 + 4;
    match geometry {
        Geometry::Point(_) => header + 16,
        Geometry::LineString(line) => header + 4 + line.0.len() * 16,
        Geometry::Polygon(polygon) => {
            header
                + 4
                + std::iter::once(polygon.exterior())
                    .chain(polygon.interiors())
                    .map(|ring| 4 + ring.0.len() * 16)
                    .sum::<usize>()
        }
        _ => header,
    }
}

pub(crate) fn geometry_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{line_string, point, polygon};

    #[test]
    fn point_layout() {
        let wkb = to_wkb(&Geometry::Point(point!(x: 1.5, y: -2.0))).unwrap();
        assert_eq!(wkb.len(), 21);
        assert_eq!(wkb[0], 1);
        assert_eq!(&wkb[1..5], &1u32.to_le_bytes());
        assert_eq!(&wkb[5..13], &1.5f64.to_le_bytes());
        assert_eq!(&wkb[13..21], &(-2.0f64).to_le_bytes());
    }

    #[test]
    fn line_string_layout() {
        let line = line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0), (x: 2.0, y: 0.0)];
        let wkb = to_wkb(&Geometry::LineString(line)).unwrap();
        assert_eq!(wkb.len(), 1 + 4 + 4 + 3 * 16);
        assert_eq!(&wkb[1..5], &2u32.to_le_bytes());
        assert_eq!(&wkb[5..9], &3u32.to_le_bytes());
    }

    #[test]
    fn polygon_layout() {
        let poly = polygon![(x: 0.0, y: 0.0), (x: 0.0, y: 1.0), (x: 1.0, y: 1.0), (x: 0.0, y: 0.0)];
        let geometry = Geometry::Polygon(poly);
        let wkb = to_wkb(&geometry).unwrap();
        assert_eq!(wkb.len(), wkb_size(&geometry));
        assert_eq!(&wkb[1..5], &3u32.to_le_bytes());
        // one ring of four vertices
        assert_eq!(&wkb[5..9], &1u32.to_le_bytes());
        assert_eq!(&wkb[9..13], &4u32.to_le_bytes());
    }
}
