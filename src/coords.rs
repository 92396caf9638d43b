use std::fmt;
use std::ops::Deref;

use geo::Coord;
use log::debug;

use crate::geometry::{classify, GeometryKind};
use crate::table::CellValue;

/// Ordered vertices parsed from one ODK coordinate cell.
///
/// Each `;`-separated segment of the source string contributes one vertex.
/// The first two numbers of a segment are stored swapped, so `"a b"` becomes
/// `Coord { x: b, y: a }`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoordinateSequence(Vec<Coord<f64>>);

impl CoordinateSequence {
    pub fn new(coords: Vec<Coord<f64>>) -> Self {
        Self(coords)
    }

    pub fn into_inner(self) -> Vec<Coord<f64>> {
        self.0
    }
}

impl Deref for CoordinateSequence {
    type Target = [Coord<f64>];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<Coord<f64>>> for CoordinateSequence {
    fn from(coords: Vec<Coord<f64>>) -> Self {
        Self(coords)
    }
}

/// Writes the sequence back in the ODK source order, so the output parses to
/// an equal sequence.
impl fmt::Display for CoordinateSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, coord) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ";")?;
            }
            write!(f, "{} {}", coord.y, coord.x)?;
        }
        Ok(())
    }
}

/// Parse a raw coordinate cell and classify the result.
///
/// `None` stands for a cell that is not a string. Segments with fewer than two
/// whitespace-separated tokens are skipped; a retained segment whose first two
/// tokens are not finite numbers invalidates the whole cell.
pub fn parse(raw: Option<&str>) -> (CoordinateSequence, GeometryKind) {
    let Some(raw) = raw else {
        return (CoordinateSequence::default(), GeometryKind::Invalid);
    };

    let mut coords = Vec::new();
    for segment in raw.split(';') {
        let mut tokens = segment.split_whitespace();
        let (Some(first), Some(second)) = (tokens.next(), tokens.next()) else {
            continue;
        };

        match (parse_component(first), parse_component(second)) {
            (Some(a), Some(b)) => coords.push(Coord { x: b, y: a }),
            _ => {
                debug!("malformed coordinate segment {segment:?}");
                return (CoordinateSequence::default(), GeometryKind::Invalid);
            }
        }
    }

    let kind = classify(&coords);
    (CoordinateSequence(coords), kind)
}

/// Parse a typed table cell. Only text cells can hold coordinates.
pub fn parse_cell(cell: &CellValue) -> (CoordinateSequence, GeometryKind) {
    match cell {
        CellValue::Text(s) => parse(Some(s)),
        _ => parse(None),
    }
}

fn parse_component(token: &str) -> Option<f64> {
    token.parse::<f64>().ok().filter(|v| v.is_finite())
}
