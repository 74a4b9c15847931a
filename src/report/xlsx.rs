use calamine::{Data, Reader, Xlsx, XlsxError, open_workbook};
use rust_xlsxwriter::{Workbook, Worksheet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use super::{COLUMNS, Cell, FileRecord, ReportError, report_row};
use crate::geo::GpsPrecision;

/// Excel's column width limit.
const MAX_COLUMN_WIDTH: usize = 255;

/// Read the first worksheet of an existing report as typed rows.
///
/// Rows and columns before the first used cell are returned as empty cells so
/// that positions are preserved.
pub fn read_rows(path: &Path) -> Result<Vec<Vec<Cell>>, ReportError> {
    let read_error = |reason: String| ReportError::Read {
        path: path.to_path_buf(),
        reason,
    };

    let mut workbook: Xlsx<BufReader<File>> =
        open_workbook(path).map_err(|e: XlsxError| read_error(e.to_string()))?;
    let range = match workbook.worksheet_range_at(0) {
        Some(range) => range.map_err(|e| read_error(e.to_string()))?,
        None => return Ok(Vec::new()),
    };
    let Some((first_row, first_col)) = range.start() else {
        return Ok(Vec::new());
    };

    let mut rows: Vec<Vec<Cell>> = vec![Vec::new(); first_row as usize];
    for data_row in range.rows() {
        let mut row = vec![Cell::Empty; first_col as usize];
        row.extend(data_row.iter().map(cell_from_data));
        rows.push(row);
    }
    Ok(rows)
}

fn cell_from_data(data: &Data) -> Cell {
    match data {
        Data::Empty | Data::Error(_) => Cell::Empty,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
        Data::Int(i) => Cell::Int(*i),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Cell::Int(*f as i64),
        Data::Float(f) => Cell::Float(*f),
        Data::Bool(b) => Cell::Text(b.to_string().to_uppercase()),
        Data::DateTime(dt) => Cell::Float(dt.as_f64()),
    }
}

fn header_row() -> Vec<Cell> {
    COLUMNS.iter().map(|c| Cell::Text(c.to_string())).collect()
}

fn write_cell(sheet: &mut Worksheet, row: u32, col: u16, cell: &Cell) -> Result<(), ReportError> {
    match cell {
        Cell::Empty => {}
        Cell::Text(s) => {
            sheet.write_string(row, col, s)?;
        }
        Cell::Int(i) => {
            sheet.write_number(row, col, *i as f64)?;
        }
        Cell::Float(f) => {
            sheet.write_number(row, col, *f)?;
        }
    }
    Ok(())
}

/// Read-modify-write: existing rows are copied verbatim, new rows follow.
pub(super) fn append(
    records: &[FileRecord],
    path: &Path,
    precision: GpsPrecision,
) -> Result<(), ReportError> {
    let mut rows = if path.exists() { read_rows(path)? } else { Vec::new() };
    if rows.is_empty() {
        rows.push(header_row());
    }
    let existing = rows.len();
    rows.extend(records.iter().map(|r| report_row(r, precision)));
    log::debug!("{} existing rows, {} new", existing, records.len());

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    for (r, row) in rows.iter().enumerate() {
        for (c, cell) in row.iter().enumerate() {
            write_cell(sheet, r as u32, c as u16, cell)?;
        }
    }

    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    for c in 0..columns {
        let width = rows
            .iter()
            .filter_map(|row| row.get(c))
            .map(|cell| cell.to_string().chars().count())
            .max()
            .unwrap_or(0)
            .min(MAX_COLUMN_WIDTH);
        if width > 0 {
            sheet.set_column_width(c as u16, width as f64)?;
        }
    }

    let buffer = workbook.save_to_buffer()?;
    std::fs::write(path, buffer).map_err(|e| ReportError::from_io(path, e))
}
