//! Spreadsheet validation and parsing
//!
//! Uploads are accepted only when the first bytes carry a spreadsheet
//! container signature: a zip local file header for `.xlsx` or the OLE2
//! compound file header for `.xls`. Only the first sheet is read and every
//! cell is rendered as text.

use calamine::{open_workbook, Data, Range, Reader, Sheets, Xls, Xlsx};
use std::fmt::Display;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use thiserror::Error;

/// Zip local file header (`.xlsx`)
pub const OOXML_SIGNATURE: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

/// OLE2 compound file header (`.xls`)
pub const OLE2_SIGNATURE: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Invalid file, only .xlsx or .xls allowed")]
    InvalidSignature,

    #[error("Unable to read spreadsheet")]
    Unreadable { detail: String },

    #[error("Missing columns at row {row}: expected {expected}, found {found}")]
    MissingColumns {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// True when `header` starts with a supported container signature
pub fn has_spreadsheet_signature(header: &[u8]) -> bool {
    header.starts_with(&OOXML_SIGNATURE) || header.starts_with(&OLE2_SIGNATURE)
}

/// Rows of the first sheet, header included, as trimmed cell text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sheet {
    rows: Vec<Vec<String>>,
}

impl Sheet {
    pub fn from_rows(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    /// Number of data rows (header excluded, 0 for an empty sheet)
    pub fn total_records(&self) -> usize {
        self.rows.len().saturating_sub(1)
    }

    /// Header row, empty for an empty sheet
    pub fn header(&self) -> &[String] {
        self.rows.first().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Data rows paired with their 1-based sheet row number (the header is row 1)
    pub fn data_rows(&self) -> impl Iterator<Item = (usize, &[String])> {
        self.rows
            .iter()
            .enumerate()
            .skip(1)
            .map(|(index, row)| (index + 1, row.as_slice()))
    }

    /// Fail on the first data row whose width differs from `expected`
    pub fn check_width(&self, expected: usize) -> Result<(), ParseError> {
        match self.data_rows().find(|(_, row)| row.len() != expected) {
            Some((row, cells)) => Err(ParseError::MissingColumns {
                row,
                expected,
                found: cells.len(),
            }),
            None => Ok(()),
        }
    }
}

/// Check the container signature and read the first sheet of the workbook at `path`.
///
/// Blocking; run it off the async executor.
pub fn read_workbook(path: &Path) -> Result<Sheet, ParseError> {
    let mut header = Vec::with_capacity(OLE2_SIGNATURE.len());
    File::open(path)?
        .take(OLE2_SIGNATURE.len() as u64)
        .read_to_end(&mut header)?;

    if !has_spreadsheet_signature(&header) {
        return Err(ParseError::InvalidSignature);
    }

    // The signature already tells the two containers apart
    let mut workbook: Sheets<BufReader<File>> = if header.starts_with(&OLE2_SIGNATURE) {
        Sheets::Xls(open_workbook::<Xls<_>, _>(path).map_err(unreadable)?)
    } else {
        Sheets::Xlsx(open_workbook::<Xlsx<_>, _>(path).map_err(unreadable)?)
    };

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ParseError::Unreadable {
            detail: "workbook has no sheets".to_string(),
        })?
        .map_err(unreadable)?;

    Ok(Sheet::from_rows(range_to_rows(&range)))
}

fn unreadable(e: impl Display) -> ParseError {
    ParseError::Unreadable {
        detail: e.to_string(),
    }
}

/// Render a calamine range as text rows anchored at A1.
///
/// calamine trims leading empty rows and columns from a range; they are put
/// back so row numbers and column positions match the sheet.
fn range_to_rows(range: &Range<Data>) -> Vec<Vec<String>> {
    let (first_row, first_col) = match range.start() {
        Some((row, col)) => (row as usize, col as usize),
        None => return Vec::new(),
    };

    let mut rows: Vec<Vec<String>> = vec![Vec::new(); first_row];
    for cells in range.rows() {
        let mut row: Vec<String> = vec![String::new(); first_col];
        row.extend(cells.iter().map(cell_text));
        trim_trailing_empty(&mut row);
        rows.push(row);
    }
    rows
}

fn trim_trailing_empty(row: &mut Vec<String>) {
    while row.last().is_some_and(|cell| cell.is_empty()) {
        row.pop();
    }
}

/// Text of a single cell. Whole floats lose their fractional part so ids and
/// phone numbers typed as numbers read back the way they were entered.
pub fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        other => other.to_string().trim().to_string(),
    }
}
