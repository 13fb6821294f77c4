use serde::{Deserialize, Serialize};

/// Where a column's value comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ColumnSource {
    Date,
    Pickup,
    Dropoff,
    Fare,
    Purpose,
    TripId,
    Currency,
    /// Same text on every row, e.g. the payment method.
    Fixed {
        value: String,
    },
    Blank,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Header text as it appears in the template (matched case-insensitively).
    pub header: String,
    #[serde(flatten)]
    pub source: ColumnSource,
}

impl ColumnSpec {
    pub fn new(header: &str, source: ColumnSource) -> Self {
        Self {
            header: header.to_string(),
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateSchema {
    /// Output files are named `YYYY-MM_<template_name>`; empty means the
    /// template's own file name.
    pub template_name: String,
    /// Workbook sheet holding the form, e.g. `Claim Form`. Unset picks the
    /// first sheet with the configured headers. CSV templates ignore it.
    pub sheet: Option<String>,
    pub columns: Vec<ColumnSpec>,
    /// chrono format string for date columns in CSV output.
    pub date_format: String,
    /// Number format given to date cells in workbook output, which are
    /// written as real dates.
    pub cell_date_format: String,
    /// Offset applied to trip instants before formatting dates.
    pub utc_offset_minutes: i32,
    pub total_label: String,
}

impl Default for TemplateSchema {
    fn default() -> Self {
        Self {
            template_name: String::new(),
            sheet: None,
            columns: vec![
                ColumnSpec::new("Date", ColumnSource::Date),
                ColumnSpec::new("Pickup Location", ColumnSource::Pickup),
                ColumnSpec::new("Dropoff Location", ColumnSource::Dropoff),
                ColumnSpec::new("Price", ColumnSource::Fare),
                ColumnSpec::new("Reason", ColumnSource::Purpose),
                ColumnSpec::new(
                    "Payment Method",
                    ColumnSource::Fixed {
                        value: "App Wallet".to_string(),
                    },
                ),
                ColumnSpec::new("Notes", ColumnSource::Blank),
            ],
            date_format: "%d/%m/%Y".to_string(),
            cell_date_format: "dd/mm/yyyy".to_string(),
            utc_offset_minutes: 0,
            total_label: "Total".to_string(),
        }
    }
}
