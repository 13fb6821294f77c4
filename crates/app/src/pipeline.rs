use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use tripclaim_core::{
    resolve_month, AddressClassifier, Money, PeriodError, PurposeLabel, TripRecord, Warning,
};
use tripclaim_receipts::{
    AggregateError, MergedEntry, ReceiptAggregator, ReceiptSource, ReceiptSummary,
};
use tripclaim_report::{ReportError, ReportGenerator};
use tripclaim_rides::{CredentialError, FetchError, TripFetcher, TripSource};

use crate::config::{AppConfig, ConfigError};

pub const TRIPS_FILE: &str = "trips.json";
pub const SUMMARY_FILE: &str = "summary.json";

/// Points the run passes through, in order. A failure is reported against
/// the stage the run was trying to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    DateResolved,
    TripsFetched,
    Classified,
    ReceiptsAggregated,
    ReportGenerated,
    Complete,
}

impl Stage {
    fn activity(self) -> &'static str {
        match self {
            Stage::Init => "starting up",
            Stage::DateResolved => "resolving the date range",
            Stage::TripsFetched => "fetching trips",
            Stage::Classified => "classifying trips",
            Stage::ReceiptsAggregated => "collecting receipts",
            Stage::ReportGenerated => "filling the claim form",
            Stage::Complete => "writing artifacts",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Init => "init",
            Stage::DateResolved => "date_resolved",
            Stage::TripsFetched => "trips_fetched",
            Stage::Classified => "classified",
            Stage::ReceiptsAggregated => "receipts_aggregated",
            Stage::ReportGenerated => "report_generated",
            Stage::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// What the user should do about a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Remediation {
    RefreshCredential,
    FixConfiguration,
    RetryLater,
}

impl Remediation {
    pub fn advice(self) -> &'static str {
        match self {
            Remediation::RefreshCredential => {
                "copy a fresh session cookie from the browser into the token file"
            }
            Remediation::FixConfiguration => "check the arguments and the configuration file",
            Remediation::RetryLater => "try again later",
        }
    }
}

#[derive(Debug, Error)]
pub enum FailureKind {
    #[error("configuration unusable: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid parameter: {0}")]
    InvalidParameter(#[from] PeriodError),
    #[error("credential unusable: {0}")]
    Credential(#[from] CredentialError),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("trip retrieval failed: {0}")]
    TransientFetch(String),
    #[error("template is missing expected columns: {}", .0.join(", "))]
    TemplateStructure(Vec<String>),
    #[error("report generation failed: {0}")]
    Report(ReportError),
    #[error("receipt aggregation failed: {0}")]
    Receipts(#[from] AggregateError),
    #[error("cannot write artifact: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot encode JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("run cancelled")]
    Cancelled,
}

impl From<FetchError> for FailureKind {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Authentication(msg) => FailureKind::Authentication(msg),
            other => FailureKind::TransientFetch(other.to_string()),
        }
    }
}

impl From<ReportError> for FailureKind {
    fn from(e: ReportError) -> Self {
        match e {
            ReportError::MissingColumns(missing) => FailureKind::TemplateStructure(missing),
            other => FailureKind::Report(other),
        }
    }
}

#[derive(Debug, Error)]
#[error("failed while {}: {kind}", .stage.activity())]
pub struct PipelineError {
    pub stage: Stage,
    pub kind: FailureKind,
}

impl PipelineError {
    pub fn new(stage: Stage, kind: impl Into<FailureKind>) -> Self {
        Self {
            stage,
            kind: kind.into(),
        }
    }

    pub fn remediation(&self) -> Remediation {
        match &self.kind {
            FailureKind::Credential(_) | FailureKind::Authentication(_) => {
                Remediation::RefreshCredential
            }
            FailureKind::Config(_)
            | FailureKind::InvalidParameter(_)
            | FailureKind::TemplateStructure(_)
            | FailureKind::Report(_)
            | FailureKind::Io(_) => Remediation::FixConfiguration,
            FailureKind::TransientFetch(_)
            | FailureKind::Receipts(_)
            | FailureKind::Json(_)
            | FailureKind::Cancelled => Remediation::RetryLater,
        }
    }
}

/// Shared flag checked between stages. Work already in flight within a
/// stage is allowed to finish.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LabelCounts {
    pub to_work: usize,
    pub from_work: usize,
    pub unclassified: usize,
}

impl LabelCounts {
    fn tally(trips: &[TripRecord]) -> Self {
        let mut counts = Self::default();
        for trip in trips {
            match trip.purpose {
                PurposeLabel::ToWork => counts.to_work += 1,
                PurposeLabel::FromWork => counts.from_work += 1,
                PurposeLabel::Unclassified => counts.unclassified += 1,
            }
        }
        counts
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Artifacts {
    pub directory: PathBuf,
    pub trips_json: PathBuf,
    /// Absent when no receipt could be retrieved.
    pub merged_receipts: Option<PathBuf>,
    pub report: PathBuf,
    pub summary: PathBuf,
}

impl Artifacts {
    /// The files that make up the expense package.
    pub fn files(&self) -> Vec<PathBuf> {
        let mut files = vec![self.trips_json.clone()];
        files.extend(self.merged_receipts.clone());
        files.push(self.report.clone());
        files.push(self.summary.clone());
        files
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub period: String,
    pub range_start: DateTime<Utc>,
    pub range_end: DateTime<Utc>,
    pub trips: usize,
    pub pages: usize,
    pub labels: LabelCounts,
    pub total: Money,
    pub currency: Option<String>,
    pub receipts: ReceiptSummary,
    pub merged: Vec<MergedEntry>,
    pub warnings: Vec<Warning>,
    pub artifacts: Artifacts,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}: {} trips, total {} {}",
            self.period,
            self.trips,
            self.total,
            self.currency.as_deref().unwrap_or("")
        )?;
        writeln!(
            f,
            "  to work {}, from work {}, unclassified {}",
            self.labels.to_work, self.labels.from_work, self.labels.unclassified
        )?;
        writeln!(
            f,
            "  receipts {} of {} retrieved, {} skipped",
            self.receipts.succeeded, self.receipts.attempted, self.receipts.skipped
        )?;
        if !self.warnings.is_empty() {
            writeln!(f, "  warnings:")?;
            for w in &self.warnings {
                writeln!(f, "    - {w}")?;
            }
        }
        write!(f, "  output: {}", self.artifacts.directory.display())
    }
}

#[derive(Serialize)]
struct TripsDocument<'a> {
    period: &'a str,
    overall_amount: Money,
    currency: Option<&'a str>,
    trips: &'a [TripRecord],
}

/// Runs one month end to end: resolve the period, fetch and classify its
/// trips, collect receipts, fill the claim form, then write the artifacts
/// under `<output>/<YYYY-MM>/`.
///
/// Any fatal error stops the run before the claim form is written. Receipt
/// failures, unclassified trips and the like only add warnings.
pub struct PipelineOrchestrator<T: TripSource, R: ReceiptSource> {
    fetcher: TripFetcher<T>,
    classifier: AddressClassifier,
    receipts: R,
    concurrency: usize,
    keep_individual: bool,
    report: ReportGenerator,
    template_path: PathBuf,
    output_root: PathBuf,
    cancel: CancelToken,
}

impl<T: TripSource, R: ReceiptSource> PipelineOrchestrator<T, R> {
    pub fn new(config: &AppConfig, trips: T, receipts: R) -> Self {
        Self {
            fetcher: TripFetcher::new(trips, config.retry.clone())
                .with_max_pages(config.api.max_pages),
            classifier: AddressClassifier::new(&config.classification),
            receipts,
            concurrency: config.receipts.concurrency,
            keep_individual: config.receipts.keep_individual,
            report: ReportGenerator::new(config.report.schema.clone()),
            template_path: config.report.template_path.clone(),
            output_root: config.output.directory.clone(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run(
        self,
        month: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<RunSummary, PipelineError> {
        let Self {
            fetcher,
            classifier,
            receipts,
            concurrency,
            keep_individual,
            report,
            template_path,
            output_root,
            cancel,
        } = self;

        let stage = Stage::DateResolved;
        checkpoint(&cancel, stage)?;
        let range = resolve_month(month, now).map_err(|e| PipelineError::new(stage, e))?;
        let period = range.label();
        info!(%stage, %period, "date range resolved");

        let stage = Stage::TripsFetched;
        checkpoint(&cancel, stage)?;
        let fetched = fetcher
            .fetch(&range)
            .await
            .map_err(|e| PipelineError::new(stage, e))?;
        let mut warnings = fetched.warnings;
        let pages = fetched.pages;
        info!(%stage, trips = fetched.trips.len(), pages, "trips fetched");

        let stage = Stage::Classified;
        checkpoint(&cancel, stage)?;
        let (trips, classification_warnings) = classifier.classify_all(fetched.trips);
        warnings.extend(classification_warnings);
        let labels = LabelCounts::tally(&trips);
        info!(
            %stage,
            to_work = labels.to_work,
            from_work = labels.from_work,
            unclassified = labels.unclassified,
            "trips classified"
        );

        let stage = Stage::ReceiptsAggregated;
        checkpoint(&cancel, stage)?;
        let run_dir = output_root.join(&period);
        std::fs::create_dir_all(&run_dir).map_err(|e| PipelineError::new(stage, e))?;
        let mut aggregator = ReceiptAggregator::new(receipts, concurrency);
        if keep_individual {
            aggregator = aggregator.with_store(run_dir.join("receipts"));
        }
        let aggregated = aggregator
            .aggregate(&trips)
            .await
            .map_err(|e| PipelineError::new(stage, e))?;
        warnings.extend(aggregated.warnings);
        info!(
            %stage,
            succeeded = aggregated.summary.succeeded,
            skipped = aggregated.summary.skipped,
            "receipts aggregated"
        );

        let stage = Stage::ReportGenerated;
        checkpoint(&cancel, stage)?;
        let filled = report
            .generate(&template_path, &run_dir, &range, &trips)
            .map_err(|e| PipelineError::new(stage, e))?;
        warnings.extend(filled.warnings);
        info!(%stage, path = %filled.path.display(), total = %filled.total, "report generated");

        let stage = Stage::Complete;
        checkpoint(&cancel, stage)?;
        let trips_json = run_dir.join(TRIPS_FILE);
        write_json(
            &trips_json,
            &TripsDocument {
                period: &period,
                overall_amount: filled.total,
                currency: filled.currency.as_deref(),
                trips: &trips,
            },
        )
        .map_err(|e| PipelineError::new(stage, e))?;

        let merged_receipts = match &aggregated.merged_pdf {
            Some(pdf) => {
                let path = run_dir.join(format!("{period}_receipts.pdf"));
                std::fs::write(&path, pdf).map_err(|e| PipelineError::new(stage, e))?;
                Some(path)
            }
            None => {
                warn!(%period, "no receipts retrieved, merged document not written");
                None
            }
        };

        let summary = RunSummary {
            period,
            range_start: range.start(),
            range_end: range.end(),
            trips: trips.len(),
            pages,
            labels,
            total: filled.total,
            currency: filled.currency,
            receipts: aggregated.summary,
            merged: aggregated.entries,
            warnings,
            artifacts: Artifacts {
                trips_json,
                merged_receipts,
                report: filled.path,
                summary: run_dir.join(SUMMARY_FILE),
                directory: run_dir,
            },
        };
        write_json(&summary.artifacts.summary, &summary)
            .map_err(|e| PipelineError::new(stage, e))?;

        info!(%stage, warnings = summary.warnings.len(), "run complete");
        Ok(summary)
    }
}

fn checkpoint(cancel: &CancelToken, next: Stage) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        warn!(stage = %next, "run cancelled");
        return Err(PipelineError::new(next, FailureKind::Cancelled));
    }
    Ok(())
}

fn write_json<V: Serialize>(path: &Path, value: &V) -> Result<(), FailureKind> {
    let body = serde_json::to_vec_pretty(value)?;
    std::fs::write(path, body)?;
    Ok(())
}
