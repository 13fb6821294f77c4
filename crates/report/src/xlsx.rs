use chrono::{FixedOffset, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use tracing::debug;
use tripclaim_core::{Money, TripRecord};
use umya_spreadsheet::{Spreadsheet, Worksheet};

use crate::generator::{currency_check, FillSummary, ReportError, ReportGenerator};
use crate::schema::ColumnSource;

/// Day zero of the workbook date system.
fn excel_epoch() -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(1899, 12, 30)
}

/// Cell text of a sheet row, one entry per column up to the sheet's width.
fn row_cells(sheet: &Worksheet, row: u32, width: u32) -> Vec<String> {
    (1..=width).map(|col| sheet.get_value((col, row))).collect()
}

impl ReportGenerator {
    /// Fills the claim-form sheet of an opened workbook in place.
    ///
    /// The header row is located the same way as for CSV templates. Trip rows
    /// start directly below it; formatting of the sheet is left alone apart
    /// from the number format of date cells.
    pub fn fill_workbook(
        &self,
        book: &mut Spreadsheet,
        trips: &[TripRecord],
    ) -> Result<FillSummary, ReportError> {
        let offset = self.checked_offset()?;
        let sheet_name = self.form_sheet(book)?;
        let sheet = book
            .get_sheet_by_name_mut(&sheet_name)
            .ok_or_else(|| ReportError::MissingSheet(sheet_name.clone()))?;

        let width = sheet.get_highest_column();
        let last_row = sheet.get_highest_row();
        let header_row = self
            .header_row(sheet)
            .ok_or_else(|| ReportError::MissingColumns(self.headers()))?;
        let header = row_cells(sheet, header_row, width);
        let positions = self.locate_columns(header.iter().map(String::as_str))?;
        let columns: Vec<u32> = positions.iter().map(|&p| p as u32 + 1).collect();
        debug!(sheet = %sheet_name, header_row, "workbook header located");

        let (currency, warnings) = currency_check(trips);
        let mut row = header_row;
        for trip in trips {
            row += 1;
            for (column, &col) in self.schema().columns.iter().zip(&columns) {
                self.write_cell(sheet, (col, row), &column.source, trip, &offset);
            }
        }

        let total: Money = trips.iter().map(|t| t.fare).sum();
        row += 1;
        let fare_col = self.fare_position(&positions).map(|p| p as u32 + 1);
        if let Some(col) = fare_col {
            sheet
                .get_cell_mut((col, row))
                .set_value_number(total.amount().to_f64().unwrap_or_default());
        }
        if let Some(col) = columns.iter().copied().filter(|&c| Some(c) != fare_col).min() {
            sheet
                .get_cell_mut((col, row))
                .set_value_string(self.schema().total_label.clone());
        }

        // Placeholder values left below the total would read as claims.
        for stale in row + 1..=last_row {
            for &col in &columns {
                if sheet.get_cell((col, stale)).is_some_and(|c| !c.get_value().is_empty()) {
                    sheet.get_cell_mut((col, stale)).set_value_string("");
                }
            }
        }

        Ok(FillSummary {
            rows: trips.len(),
            total,
            currency,
            warnings,
        })
    }

    /// The configured sheet, or else the first one carrying a known header.
    fn form_sheet(&self, book: &Spreadsheet) -> Result<String, ReportError> {
        if let Some(name) = &self.schema().sheet {
            return match book.get_sheet_by_name(name) {
                Some(_) => Ok(name.clone()),
                None => Err(ReportError::MissingSheet(name.clone())),
            };
        }
        book.get_sheet_collection()
            .iter()
            .find(|sheet| self.header_row(sheet).is_some())
            .map(|sheet| sheet.get_name().to_string())
            .ok_or_else(|| ReportError::MissingColumns(self.headers()))
    }

    /// First row holding any configured header.
    fn header_row(&self, sheet: &Worksheet) -> Option<u32> {
        let width = sheet.get_highest_column();
        (1..=sheet.get_highest_row()).find(|&row| {
            row_cells(sheet, row, width)
                .iter()
                .any(|cell| self.is_configured_header(cell))
        })
    }

    fn write_cell(
        &self,
        sheet: &mut Worksheet,
        at: (u32, u32),
        source: &ColumnSource,
        trip: &TripRecord,
        offset: &FixedOffset,
    ) {
        let cell = sheet.get_cell_mut(at);
        match source {
            ColumnSource::Date => {
                let day = trip.timestamp.with_timezone(offset).date_naive();
                match excel_epoch().map(|epoch| (day - epoch).num_days()) {
                    Some(serial) => {
                        cell.set_value_number(serial as f64);
                        cell.get_style_mut()
                            .get_number_format_mut()
                            .set_format_code(self.schema().cell_date_format.clone());
                    }
                    None => {
                        cell.set_value_string(self.render(source, trip, offset));
                    }
                }
            }
            ColumnSource::Fare => {
                cell.set_value_number(trip.fare.amount().to_f64().unwrap_or_default());
            }
            other => {
                cell.set_value_string(self.render(other, trip, offset));
            }
        }
    }
}
