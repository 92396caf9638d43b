use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::NaiveDateTime;
use log::{info, warn};
use thiserror::Error;

mod excel;

pub use self::excel::{read_excel, sheet_names};

pub type Result<T> = std::result::Result<T, TableError>;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("workbook error: {0}")]
    Workbook(#[from] calamine::Error),

    #[error("sheet {sheet} not found, available sheets: {available}")]
    UnknownSheet { sheet: String, available: String },

    #[error("{path} contains no sheets")]
    NoSheets { path: String },

    #[error("row {row} has {found} cells but the header has {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
}

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Text form used when a datetime has to be written as an attribute.
pub const DATETIME_TEXT_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A single table cell with the type inferred from its text.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
}

impl CellValue {
    /// Infer a typed value from raw CSV text. Empty or blank cells are null.
    pub fn infer(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return CellValue::Null;
        }
        // Numbers only when written in canonical form, so text such as
        // `0712` or `1.50` keeps its exact spelling.
        if let Ok(i) = trimmed.parse::<i64>() {
            if i.to_string() == trimmed {
                return CellValue::Integer(i);
            }
            return CellValue::Text(raw.to_string());
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            if f.is_finite() && f.to_string() == trimmed {
                return CellValue::Float(f);
            }
            return CellValue::Text(raw.to_string());
        }
        match trimmed {
            "true" | "TRUE" | "True" => return CellValue::Bool(true),
            "false" | "FALSE" | "False" => return CellValue::Bool(false),
            _ => {}
        }
        for format in DATETIME_FORMATS {
            if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
                return CellValue::DateTime(dt);
            }
        }
        if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(trimmed) {
            return CellValue::DateTime(dt.naive_local());
        }
        if let Ok(date) = chrono::NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
            return CellValue::DateTime(date.and_time(chrono::NaiveTime::MIN));
        }
        CellValue::Text(raw.to_string())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Replace datetime values with their text form. Several output formats
    /// have no native datetime field.
    pub fn stringify_datetime(self) -> Self {
        match self {
            CellValue::DateTime(dt) => CellValue::Text(dt.format(DATETIME_TEXT_FORMAT).to_string()),
            other => other,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CellValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Integer(i) => Some(*i as f64),
            CellValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CellValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Text form of any non-null value.
    pub fn to_text(&self) -> Option<String> {
        match self {
            CellValue::Null => None,
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => Ok(()),
            CellValue::Text(s) => write!(f, "{s}"),
            CellValue::Integer(i) => write!(f, "{i}"),
            CellValue::Float(v) => write!(f, "{v}"),
            CellValue::Bool(b) => write!(f, "{b}"),
            CellValue::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_TEXT_FORMAT)),
        }
    }
}

/// Storage type of an attribute column, for formats with typed fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeType {
    Integer,
    Float,
    Bool,
    Text,
}

impl AttributeType {
    /// Narrowest type that can hold every non-null value. Integers widen to
    /// floats; any other mix, and an all-null column, falls back to text.
    pub fn infer<'a>(values: impl IntoIterator<Item = &'a CellValue>) -> Self {
        let mut inferred: Option<AttributeType> = None;
        for value in values {
            let this = match value {
                CellValue::Null => continue,
                CellValue::Integer(_) => AttributeType::Integer,
                CellValue::Float(_) => AttributeType::Float,
                CellValue::Bool(_) => AttributeType::Bool,
                CellValue::Text(_) | CellValue::DateTime(_) => return AttributeType::Text,
            };
            inferred = Some(match (inferred, this) {
                (None, t) => t,
                (Some(a), b) if a == b => a,
                (Some(AttributeType::Integer), AttributeType::Float)
                | (Some(AttributeType::Float), AttributeType::Integer) => AttributeType::Float,
                _ => return AttributeType::Text,
            });
        }
        inferred.unwrap_or(AttributeType::Text)
    }
}

/// An in-memory table: named columns and rows of typed cells.
#[derive(Debug, Clone, Default)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<CellValue>>) -> Result<Self> {
        if let Some((row, cells)) = rows
            .iter()
            .enumerate()
            .find(|(_, cells)| cells.len() != columns.len())
        {
            return Err(TableError::RaggedRow {
                row,
                expected: columns.len(),
                found: cells.len(),
            });
        }
        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cells of one column, in row order.
    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = &CellValue> + '_> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(move |row| &row[idx]))
    }
}

const WORKBOOK_EXTENSIONS: [&str; 5] = ["xlsx", "xlsm", "xlsb", "xls", "ods"];

/// A table together with the name its output files are based on.
#[derive(Debug, Clone)]
pub struct LoadedTable {
    /// File stem for CSV input, sheet name for workbooks.
    pub name: String,
    pub table: Table,
}

pub fn is_workbook(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            WORKBOOK_EXTENSIONS
                .iter()
                .any(|w| w.eq_ignore_ascii_case(ext))
        })
}

/// Load a workbook sheet or a CSV file, depending on the file extension.
///
/// `sheet` picks a workbook sheet and defaults to the first one. CSV files
/// ignore it and are split on `delimiter`.
pub fn load(path: &Path, delimiter: u8, sheet: Option<&str>) -> Result<LoadedTable> {
    if is_workbook(path) {
        let (name, table) = read_excel(path, sheet)?;
        return Ok(LoadedTable { name, table });
    }

    if let Some(sheet) = sheet {
        warn!("Ignoring sheet {sheet}: {} is not a workbook", path.display());
    }
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("data")
        .to_string();
    Ok(LoadedTable {
        name,
        table: read_csv(path, delimiter)?,
    })
}

/// Read a CSV file with a header row.
pub fn read_csv(path: &Path, delimiter: u8) -> Result<Table> {
    info!("Loading file: {}", path.display());
    let file = File::open(path).map_err(|source| TableError::Open {
        path: path.display().to_string(),
        source,
    })?;
    let table = read_csv_from(file, delimiter)?;
    info!(
        "Found {} rows and {} columns in file",
        table.len(),
        table.columns().len()
    );
    Ok(table)
}

pub fn read_csv_from<R: Read>(reader: R, delimiter: u8) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_reader(reader);

    let columns: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(CellValue::infer).collect());
    }

    Table::new(columns, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn infers_cell_types() {
        assert_eq!(CellValue::infer(""), CellValue::Null);
        assert_eq!(CellValue::infer("  "), CellValue::Null);
        assert_eq!(CellValue::infer("42"), CellValue::Integer(42));
        assert_eq!(CellValue::infer("4.5"), CellValue::Float(4.5));
        assert_eq!(CellValue::infer("TRUE"), CellValue::Bool(true));
        assert_eq!(
            CellValue::infer("10 20;11 21"),
            CellValue::Text("10 20;11 21".to_string())
        );

        let expected = NaiveDate::from_ymd_opt(2024, 3, 1)
            .and_then(|d| d.and_hms_opt(10, 15, 30))
            .map(CellValue::DateTime);
        assert_eq!(Some(CellValue::infer("2024-03-01 10:15:30")), expected);
        assert_eq!(Some(CellValue::infer("2024-03-01T10:15:30")), expected);
        // ODK timestamps keep the device's local time
        assert_eq!(Some(CellValue::infer("2024-03-01T10:15:30.000+03:00")), expected);
    }

    #[test]
    fn lossy_numbers_stay_text() {
        assert_eq!(
            CellValue::infer("0712345678"),
            CellValue::Text("0712345678".to_string())
        );
        assert_eq!(CellValue::infer("1.50"), CellValue::Text("1.50".to_string()));
        assert_eq!(CellValue::infer("NaN"), CellValue::Text("NaN".to_string()));
        assert_eq!(CellValue::infer("inf"), CellValue::Text("inf".to_string()));
        assert_eq!(CellValue::infer("+5"), CellValue::Text("+5".to_string()));
        assert_eq!(CellValue::infer("-7"), CellValue::Integer(-7));
        assert_eq!(CellValue::infer("0.25"), CellValue::Float(0.25));
    }

    #[test]
    fn datetimes_become_text() {
        let cell = CellValue::infer("2024-03-01T10:15:30.250");
        assert_eq!(
            cell.stringify_datetime(),
            CellValue::Text("2024-03-01 10:15:30.250".to_string())
        );

        let date = CellValue::infer("2024-03-01");
        assert_eq!(
            date.stringify_datetime(),
            CellValue::Text("2024-03-01 00:00:00".to_string())
        );

        assert_eq!(CellValue::Integer(3).stringify_datetime(), CellValue::Integer(3));
    }

    #[test]
    fn attribute_type_widens() {
        use CellValue::*;
        assert_eq!(
            AttributeType::infer(&[Integer(1), Null, Integer(2)]),
            AttributeType::Integer
        );
        assert_eq!(AttributeType::infer(&[Integer(1), Float(2.5)]), AttributeType::Float);
        assert_eq!(AttributeType::infer(&[Bool(true), Bool(false)]), AttributeType::Bool);
        assert_eq!(
            AttributeType::infer(&[Integer(1), Text("x".into())]),
            AttributeType::Text
        );
        assert_eq!(AttributeType::infer(&[Bool(true), Integer(1)]), AttributeType::Text);
        assert_eq!(AttributeType::infer(&[Null, Null]), AttributeType::Text);
    }

    #[test]
    fn reads_csv_with_header() {
        let data = "id,gps,note\n1,10 20;11 21,first\n2,,second\n";
        let table = read_csv_from(data.as_bytes(), b',').unwrap();

        assert_eq!(table.columns(), ["id", "gps", "note"]);
        assert_eq!(table.len(), 2);
        let gps: Vec<_> = table.column("gps").unwrap().cloned().collect();
        assert_eq!(
            gps,
            vec![CellValue::Text("10 20;11 21".into()), CellValue::Null]
        );
        assert!(table.column("missing").is_none());
    }

    #[test]
    fn honours_delimiter() {
        let data = "id;gps\n1;10 20\n";
        let table = read_csv_from(data.as_bytes(), b';').unwrap();
        assert_eq!(table.columns(), ["id", "gps"]);
        assert_eq!(table.rows()[0][1], CellValue::Text("10 20".into()));
    }

    #[test]
    fn workbooks_are_recognised_by_extension() {
        assert!(is_workbook(Path::new("survey.xlsx")));
        assert!(is_workbook(Path::new("survey.XLSX")));
        assert!(is_workbook(Path::new("survey.ods")));
        assert!(!is_workbook(Path::new("survey.csv")));
        assert!(!is_workbook(Path::new("survey")));
    }

    #[test]
    fn csv_tables_are_named_after_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wells.csv");
        std::fs::write(&path, "id;gps\n1;10 20\n").unwrap();

        let loaded = load(&path, b';', Some("ignored")).unwrap();
        assert_eq!(loaded.name, "wells");
        assert_eq!(loaded.table.columns(), ["id", "gps"]);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = Table::new(
            vec!["a".into(), "b".into()],
            vec![vec![CellValue::Null]],
        )
        .unwrap_err();
        assert!(matches!(err, TableError::RaggedRow { row: 0, expected: 2, found: 1 }));
    }
}
