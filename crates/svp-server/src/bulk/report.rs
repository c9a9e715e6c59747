//! Result report generation
//!
//! A report is a workbook with one sheet named `Report`: the schema's record
//! columns followed by `Status` and `Remarks`, one row per outcome.

use rust_xlsxwriter::{Format, Workbook, XlsxError};
use std::path::Path;
use thiserror::Error;

use super::models::{Outcome, RowPayload};
use super::rows::{ReportCell, RowSchema};

pub const REPORT_SHEET_NAME: &str = "Report";
pub const STATUS_ACCEPTED: &str = "Accepted";
pub const STATUS_REJECTED: &str = "Rejected";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Report workbook error: {0}")]
    Xlsx(#[from] XlsxError),

    #[error("Report has too many rows: {0}")]
    TooManyRows(usize),
}

pub fn accepted_count<R>(outcomes: &[Outcome<R>]) -> usize {
    outcomes.iter().filter(|o| o.success).count()
}

/// Full header row for schema `S`
pub fn report_headers<S: RowSchema>() -> Vec<&'static str> {
    S::REPORT_HEADERS
        .iter()
        .copied()
        .chain(["Status", "Remarks"])
        .collect()
}

/// Render `outcomes` in order and save the workbook to `path`
pub fn write_report<S: RowSchema>(
    outcomes: &[Outcome<S::Record>],
    path: &Path,
) -> Result<(), ReportError> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(REPORT_SHEET_NAME)?;

    let bold = Format::new().set_bold();
    for (col, header) in report_headers::<S>().into_iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, header, &bold)?;
    }

    let record_columns = S::REPORT_HEADERS.len();
    let status_col = record_columns as u16;

    for (index, outcome) in outcomes.iter().enumerate() {
        let row = u32::try_from(index + 1).map_err(|_| ReportError::TooManyRows(outcomes.len()))?;

        let cells: Vec<ReportCell> = match &outcome.payload {
            RowPayload::Parsed(record) => S::report_cells(record),
            RowPayload::Unparsed(raw) => raw
                .iter()
                .take(record_columns)
                .map(|cell| ReportCell::Text(cell.clone()))
                .collect(),
        };

        for (col, cell) in cells.iter().enumerate() {
            match cell {
                ReportCell::Text(text) => sheet.write_string(row, col as u16, text)?,
                ReportCell::Number(number) => sheet.write_number(row, col as u16, *number)?,
            };
        }

        if outcome.success {
            sheet.write_string(row, status_col, STATUS_ACCEPTED)?;
        } else {
            sheet.write_string(row, status_col, STATUS_REJECTED)?;
            if let Some(reason) = &outcome.reason {
                sheet.write_string(row, status_col + 1, reason)?;
            }
        }
    }

    sheet.autofit();
    workbook.save(path)?;

    Ok(())
}
