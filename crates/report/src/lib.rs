pub mod generator;
pub mod schema;
pub mod xlsx;

pub use generator::{FillSummary, ReportError, ReportGenerator, ReportOutcome, TemplateFormat};
pub use schema::{ColumnSource, ColumnSpec, TemplateSchema};
