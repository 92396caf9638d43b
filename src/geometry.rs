use std::fmt;

use geo::{Coord, Geometry, LineString, Point, Polygon};

/// Shape inferred from a coordinate sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometryKind {
    Point,
    Line,
    Polygon,
    Unknown,
    Invalid,
}

impl fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GeometryKind::Point => "Point",
            GeometryKind::Line => "Line",
            GeometryKind::Polygon => "Polygon",
            GeometryKind::Unknown => "Unknown",
            GeometryKind::Invalid => "Invalid",
        };
        f.write_str(name)
    }
}

/// How a parsed sequence is turned into a geometry.
///
/// Only closed rings offer a choice: they can be kept as a polygon or opened up
/// into a line. Every other kind has a single possible transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Transformation {
    #[value(skip)]
    Point,
    Line,
    Polygon,
}

impl Transformation {
    /// The transformation to apply to a sequence of `kind` when the user asked
    /// for `requested`.
    pub fn for_kind(kind: GeometryKind, requested: Transformation) -> Option<Transformation> {
        match kind {
            GeometryKind::Point => Some(Transformation::Point),
            GeometryKind::Line => Some(Transformation::Line),
            GeometryKind::Polygon => Some(requested),
            GeometryKind::Unknown | GeometryKind::Invalid => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Transformation::Point => "point",
            Transformation::Line => "line",
            Transformation::Polygon => "polygon",
        }
    }
}

impl fmt::Display for Transformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a sequence by its length and whether it closes on itself.
///
/// Rules are checked in order: a single vertex is a point, differing endpoints
/// make a line, and a closed sequence needs at least four vertices to be a
/// polygon. Anything left over (empty, or closed with two or three vertices)
/// is unknown. Endpoint comparison is exact.
pub fn classify(coords: &[Coord<f64>]) -> GeometryKind {
    let n = coords.len();
    let closed = match (coords.first(), coords.last()) {
        (Some(first), Some(last)) => first == last,
        _ => false,
    };

    if n == 1 {
        GeometryKind::Point
    } else if n >= 2 && !closed {
        GeometryKind::Line
    } else if n >= 4 && closed {
        GeometryKind::Polygon
    } else {
        GeometryKind::Unknown
    }
}

/// Build the geometry for a classified sequence.
///
/// Returns `None` when the kind and transformation do not describe a
/// buildable shape; callers treat that as "no geometry for this record".
/// Rings are used as given and never closed here.
pub fn build(
    coords: &[Coord<f64>],
    kind: GeometryKind,
    transformation: Transformation,
) -> Option<Geometry<f64>> {
    match (kind, transformation) {
        (GeometryKind::Point, _) => coords.first().map(|c| Geometry::Point(Point::from(*c))),
        (GeometryKind::Line, _) | (GeometryKind::Polygon, Transformation::Line) => {
            Some(Geometry::LineString(LineString::new(coords.to_vec())))
        }
        (GeometryKind::Polygon, Transformation::Polygon) => Some(Geometry::Polygon(Polygon::new(
            LineString::new(coords.to_vec()),
            vec![],
        ))),
        _ => None,
    }
}
