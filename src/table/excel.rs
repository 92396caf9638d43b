//! Spreadsheet input. Cells keep the type the workbook stores them with.

use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use log::info;

use super::{CellValue, Result, Table, TableError};

/// Largest whole number an `f64` cell can hold exactly.
const MAX_EXACT_FLOAT: f64 = 9_007_199_254_740_992.0;

/// Sheet names in workbook order.
pub fn sheet_names(path: &Path) -> Result<Vec<String>> {
    let workbook = open_workbook_auto(path)?;
    Ok(workbook.sheet_names())
}

/// Read one sheet, or the first if `sheet` is `None`. The first row is the
/// header. Returns the name of the sheet that was read.
pub fn read_excel(path: &Path, sheet: Option<&str>) -> Result<(String, Table)> {
    info!("Loading workbook: {}", path.display());
    let mut workbook = open_workbook_auto(path)?;
    let names = workbook.sheet_names();

    let sheet = match sheet {
        Some(name) if names.iter().any(|n| n == name) => name.to_string(),
        Some(name) => {
            return Err(TableError::UnknownSheet {
                sheet: name.to_string(),
                available: names.join(", "),
            })
        }
        None => names.first().cloned().ok_or_else(|| TableError::NoSheets {
            path: path.display().to_string(),
        })?,
    };

    let range = workbook.worksheet_range(&sheet)?;
    let mut rows = range.rows();
    let columns: Vec<String> = rows
        .next()
        .map(|header| header.iter().map(|c| c.to_string()).collect())
        .unwrap_or_default();
    let rows = rows.map(|row| row.iter().map(cell_value).collect()).collect();

    let table = Table::new(columns, rows)?;
    info!(
        "Found {} rows and {} columns in sheet {sheet}",
        table.len(),
        table.columns().len()
    );
    Ok((sheet, table))
}

fn cell_value(cell: &Data) -> CellValue {
    match cell {
        Data::Empty | Data::Error(_) => CellValue::Null,
        Data::String(s) if s.trim().is_empty() => CellValue::Null,
        Data::String(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::Int(i) => CellValue::Integer(*i),
        // Workbooks store every number as a float.
        Data::Float(f) if f.fract() == 0.0 && f.abs() <= MAX_EXACT_FLOAT => {
            CellValue::Integer(*f as i64)
        }
        Data::Float(f) => CellValue::Float(*f),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(CellValue::DateTime)
            .unwrap_or(CellValue::Float(dt.as_f64())),
        Data::DateTimeIso(s) => match CellValue::infer(s) {
            dt @ CellValue::DateTime(_) => dt,
            _ => CellValue::Text(s.clone()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_xlsxwriter::{ExcelDateTime, Format, Workbook};

    fn write_workbook(path: &Path) {
        let mut workbook = Workbook::new();

        let notes = workbook.add_worksheet();
        notes.set_name("notes").unwrap();
        notes.write_string(0, 0, "comment").unwrap();
        notes.write_string(1, 0, "first visit").unwrap();

        let plots = workbook.add_worksheet();
        plots.set_name("plots").unwrap();
        for (col, header) in ["id", "gps", "visited_at", "phone", "area"].iter().enumerate() {
            plots.write_string(0, col as u16, *header).unwrap();
        }
        let date_format = Format::new().set_num_format("yyyy-mm-dd hh:mm:ss");
        let visited = ExcelDateTime::parse_from_str("2024-03-01 10:15:30").unwrap();
        plots.write_number(1, 0, 1.0).unwrap();
        plots.write_string(1, 1, "-1.5 36.5").unwrap();
        plots
            .write_datetime_with_format(1, 2, &visited, &date_format)
            .unwrap();
        plots.write_string(1, 3, "0712345678").unwrap();
        plots.write_number(1, 4, 2.5).unwrap();

        workbook.save(path).unwrap();
    }

    #[test]
    fn maps_stored_cell_types() {
        assert_eq!(cell_value(&Data::Empty), CellValue::Null);
        assert_eq!(cell_value(&Data::String(" ".into())), CellValue::Null);
        assert_eq!(
            cell_value(&Data::String("0712".into())),
            CellValue::Text("0712".into())
        );
        assert_eq!(cell_value(&Data::Float(3.0)), CellValue::Integer(3));
        assert_eq!(cell_value(&Data::Float(1.5)), CellValue::Float(1.5));
        assert_eq!(cell_value(&Data::Bool(true)), CellValue::Bool(true));
        assert_eq!(
            cell_value(&Data::DateTimeIso("2024-03-01T10:15:30".into())),
            CellValue::infer("2024-03-01T10:15:30")
        );
    }

    #[test]
    fn reads_first_or_named_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("survey.xlsx");
        write_workbook(&path);

        assert_eq!(sheet_names(&path).unwrap(), ["notes", "plots"]);

        let (name, table) = read_excel(&path, None).unwrap();
        assert_eq!(name, "notes");
        assert_eq!(table.columns(), ["comment"]);

        let (name, table) = read_excel(&path, Some("plots")).unwrap();
        assert_eq!(name, "plots");
        assert_eq!(table.columns(), ["id", "gps", "visited_at", "phone", "area"]);

        let row = &table.rows()[0];
        assert_eq!(row[0], CellValue::Integer(1));
        assert_eq!(row[1], CellValue::Text("-1.5 36.5".into()));
        assert_eq!(row[3], CellValue::Text("0712345678".into()));
        assert_eq!(row[4], CellValue::Float(2.5));

        let expected = NaiveDate::from_ymd_opt(2024, 3, 1)
            .and_then(|d| d.and_hms_opt(10, 15, 30))
            .unwrap();
        match &row[2] {
            CellValue::DateTime(dt) => assert!((*dt - expected).num_milliseconds().abs() < 1000),
            other => panic!("expected a datetime, got {other:?}"),
        }
    }

    #[test]
    fn unknown_sheet_lists_available_ones() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("survey.xlsx");
        write_workbook(&path);

        let err = read_excel(&path, Some("Sheet9")).unwrap_err();
        match err {
            TableError::UnknownSheet { sheet, available } => {
                assert_eq!(sheet, "Sheet9");
                assert_eq!(available, "notes, plots");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
