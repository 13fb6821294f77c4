use chrono::format::{Item, StrftimeItems};
use chrono::FixedOffset;
use csv::StringRecord;
use std::ffi::OsStr;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use tripclaim_core::{DateRange, Money, TripRecord, Warning};

use crate::schema::{ColumnSource, TemplateSchema};

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("workbook error: {0}")]
    Xlsx(String),
    #[error("workbook has no sheet named {0:?}")]
    MissingSheet(String),
    #[error("template is missing expected columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("invalid date format: {0}")]
    InvalidDateFormat(String),
    #[error("invalid UTC offset: {0} minutes")]
    InvalidOffset(i32),
    #[error("refusing to overwrite the template at {0}")]
    WouldOverwriteTemplate(PathBuf),
}

#[derive(Debug, Clone)]
pub struct ReportOutcome {
    pub path: PathBuf,
    pub rows: usize,
    pub total: Money,
    /// Currency of the first trip; `None` for an empty month.
    pub currency: Option<String>,
    pub warnings: Vec<Warning>,
}

/// What [`ReportGenerator::fill`] wrote.
#[derive(Debug, Clone, PartialEq)]
pub struct FillSummary {
    pub rows: usize,
    pub total: Money,
    pub currency: Option<String>,
    pub warnings: Vec<Warning>,
}

/// How a template is read and the report written, chosen by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateFormat {
    Csv,
    Xlsx,
}

impl TemplateFormat {
    pub fn of(path: &Path) -> Self {
        match path.extension().and_then(OsStr::to_str) {
            Some(ext) if ext.eq_ignore_ascii_case("xlsx") || ext.eq_ignore_ascii_case("xlsm") => {
                TemplateFormat::Xlsx
            }
            _ => TemplateFormat::Csv,
        }
    }
}

/// Fills a copy of a claim-form template (CSV or XLSX workbook) with one row
/// per trip and a closing total row.
///
/// Everything above the header row (titles, employee fields) is carried
/// over verbatim. Rows below the header in the template are placeholder
/// space and are replaced by the trip rows.
pub struct ReportGenerator {
    schema: TemplateSchema,
}

impl ReportGenerator {
    pub fn new(schema: TemplateSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &TemplateSchema {
        &self.schema
    }

    /// `YYYY-MM_<template name>`, where the name defaults to the template's
    /// own file name.
    pub fn output_file_name(&self, period: &DateRange, template_path: &Path) -> String {
        let name = if self.schema.template_name.is_empty() {
            template_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "claim_form.csv".to_string())
        } else {
            self.schema.template_name.clone()
        };
        format!("{}_{}", period.label(), name)
    }

    /// Writes `<output_dir>/YYYY-MM_<template name>` in the template's
    /// format. The template is only read, and nothing is written unless the
    /// whole report could be built.
    pub fn generate(
        &self,
        template_path: &Path,
        output_dir: &Path,
        period: &DateRange,
        trips: &[TripRecord],
    ) -> Result<ReportOutcome, ReportError> {
        std::fs::create_dir_all(output_dir)?;
        let file_name = self.output_file_name(period, template_path);
        let path = output_dir.join(&file_name);
        let template_real = std::fs::canonicalize(template_path)?;
        if std::fs::canonicalize(output_dir)?.join(&file_name) == template_real {
            return Err(ReportError::WouldOverwriteTemplate(template_real));
        }

        let format = TemplateFormat::of(template_path);
        let summary = match format {
            TemplateFormat::Csv => {
                let template = std::fs::File::open(template_path)?;
                let mut buf = Vec::new();
                let summary = self.fill(template, &mut buf, trips)?;
                std::fs::write(&path, &buf)?;
                summary
            }
            TemplateFormat::Xlsx => {
                let mut book = umya_spreadsheet::reader::xlsx::read(template_path)
                    .map_err(|e| ReportError::Xlsx(e.to_string()))?;
                let summary = self.fill_workbook(&mut book, trips)?;
                umya_spreadsheet::writer::xlsx::write(&book, &path)
                    .map_err(|e| ReportError::Xlsx(e.to_string()))?;
                summary
            }
        };

        info!(
            path = %path.display(),
            ?format,
            rows = summary.rows,
            total = %summary.total,
            "report written"
        );
        Ok(ReportOutcome {
            path,
            rows: summary.rows,
            total: summary.total,
            currency: summary.currency,
            warnings: summary.warnings,
        })
    }

    pub fn fill<R: Read, W: Write>(
        &self,
        template: R,
        out: W,
        trips: &[TripRecord],
    ) -> Result<FillSummary, ReportError> {
        let offset = self.checked_offset()?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(template);
        let records: Vec<StringRecord> = reader.records().collect::<Result<_, _>>()?;

        let header_idx = records
            .iter()
            .position(|r| r.iter().any(|cell| self.is_configured_header(cell)))
            .ok_or_else(|| ReportError::MissingColumns(self.headers()))?;
        let header = &records[header_idx];
        let cells: Vec<&str> = header.iter().collect();
        let positions = self.locate_columns(cells.iter().copied())?;
        let width = header.len();
        debug!(header_row = header_idx, width, "template header located");

        let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(out);
        for record in &records[..=header_idx] {
            writer.write_record(record)?;
        }

        let (currency, warnings) = currency_check(trips);
        for trip in trips {
            let mut row = vec![String::new(); width];
            for (column, &pos) in self.schema.columns.iter().zip(&positions) {
                row[pos] = self.render(&column.source, trip, &offset);
            }
            writer.write_record(&row)?;
        }

        let total: Money = trips.iter().map(|t| t.fare).sum();
        writer.write_record(&self.total_row(width, &positions, total))?;
        writer.flush()?;

        Ok(FillSummary {
            rows: trips.len(),
            total,
            currency,
            warnings,
        })
    }

    pub(crate) fn checked_offset(&self) -> Result<FixedOffset, ReportError> {
        check_date_format(&self.schema.date_format)?;
        FixedOffset::east_opt(self.schema.utc_offset_minutes * 60)
            .ok_or(ReportError::InvalidOffset(self.schema.utc_offset_minutes))
    }

    pub(crate) fn headers(&self) -> Vec<String> {
        self.schema.columns.iter().map(|c| c.header.clone()).collect()
    }

    pub(crate) fn is_configured_header(&self, cell: &str) -> bool {
        self.schema.columns.iter().any(|c| same_header(&c.header, cell))
    }

    /// Index of each configured column within the header cells, in
    /// configuration order.
    pub(crate) fn locate_columns<'a>(
        &self,
        header: impl Iterator<Item = &'a str> + Clone,
    ) -> Result<Vec<usize>, ReportError> {
        let mut positions = Vec::with_capacity(self.schema.columns.len());
        let mut missing = Vec::new();
        for column in &self.schema.columns {
            match header.clone().position(|cell| same_header(&column.header, cell)) {
                Some(pos) => positions.push(pos),
                None => missing.push(column.header.clone()),
            }
        }
        if missing.is_empty() {
            Ok(positions)
        } else {
            Err(ReportError::MissingColumns(missing))
        }
    }

    pub(crate) fn render(&self, source: &ColumnSource, trip: &TripRecord, offset: &FixedOffset) -> String {
        match source {
            ColumnSource::Date => trip
                .timestamp
                .with_timezone(offset)
                .format(&self.schema.date_format)
                .to_string(),
            ColumnSource::Pickup => trip.pickup.clone(),
            ColumnSource::Dropoff => trip.dropoff.clone(),
            ColumnSource::Fare => trip.fare.to_string(),
            ColumnSource::Purpose => trip.purpose.report_text().to_string(),
            ColumnSource::TripId => trip.id.to_string(),
            ColumnSource::Currency => trip.currency.clone(),
            ColumnSource::Fixed { value } => value.clone(),
            ColumnSource::Blank => String::new(),
        }
    }

    /// Label in the first free column, sum under the first fare column.
    fn total_row(&self, width: usize, positions: &[usize], total: Money) -> Vec<String> {
        let mut row = vec![String::new(); width];
        let fare_pos = self.fare_position(positions);

        if let Some(pos) = fare_pos {
            row[pos] = total.to_string();
        }
        if let Some(label_pos) = (0..width).find(|&i| Some(i) != fare_pos) {
            row[label_pos] = self.schema.total_label.clone();
        }
        row
    }

    pub(crate) fn fare_position(&self, positions: &[usize]) -> Option<usize> {
        self.schema
            .columns
            .iter()
            .zip(positions)
            .find(|(c, _)| c.source == ColumnSource::Fare)
            .map(|(_, &p)| p)
    }
}

/// Currency of the first trip, and a warning for every trip that differs.
pub(crate) fn currency_check(trips: &[TripRecord]) -> (Option<String>, Vec<Warning>) {
    let currency = trips.first().map(|t| t.currency.clone());
    let mut warnings = Vec::new();
    if let Some(expected) = &currency {
        for trip in trips.iter().filter(|t| &t.currency != expected) {
            warn!(trip = %trip.id, %expected, found = %trip.currency, "mixed currency");
            warnings.push(Warning::MixedCurrency {
                trip_id: trip.id.clone(),
                expected: expected.clone(),
                found: trip.currency.clone(),
            });
        }
    }
    (currency, warnings)
}

fn same_header(expected: &str, cell: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(cell.trim())
}

fn check_date_format(fmt: &str) -> Result<(), ReportError> {
    if StrftimeItems::new(fmt).any(|item| matches!(item, Item::Error)) {
        return Err(ReportError::InvalidDateFormat(fmt.to_string()));
    }
    Ok(())
}
