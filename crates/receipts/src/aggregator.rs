use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use tripclaim_core::{TripId, TripRecord, Warning};

use crate::hash;
use crate::merge::{self, MergeError};
use crate::source::{ReceiptError, ReceiptSource};

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Receipt merge failed: {0}")]
    Merge(#[from] MergeError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReceiptSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub skipped: usize,
}

/// One receipt that made it into the merged document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergedEntry {
    pub trip_id: TripId,
    pub timestamp: DateTime<Utc>,
    pub sha256: String,
    /// Individual copy under the receipt store, when one is configured.
    pub path: Option<PathBuf>,
}

#[derive(Debug)]
pub struct AggregateOutcome {
    /// Entries in the order their pages appear in `merged_pdf`.
    pub entries: Vec<MergedEntry>,
    /// `None` when no receipt could be retrieved.
    pub merged_pdf: Option<Vec<u8>>,
    pub summary: ReceiptSummary,
    pub warnings: Vec<Warning>,
}

/// Downloads every trip's receipt and merges them, oldest trip first.
///
/// Retrieval runs with at most `concurrency` requests in flight. A failed or
/// missing receipt is recorded as a warning and left out of the merge; it
/// never fails the batch.
pub struct ReceiptAggregator<S: ReceiptSource> {
    source: S,
    concurrency: usize,
    store_dir: Option<PathBuf>,
}

impl<S: ReceiptSource> ReceiptAggregator<S> {
    pub fn new(source: S, concurrency: usize) -> Self {
        Self {
            source,
            concurrency: concurrency.max(1),
            store_dir: None,
        }
    }

    /// Also keep each receipt as `<dir>/<trip-id>.pdf`.
    pub fn with_store(mut self, dir: impl Into<PathBuf>) -> Self {
        self.store_dir = Some(dir.into());
        self
    }

    pub async fn aggregate(&self, trips: &[TripRecord]) -> Result<AggregateOutcome, AggregateError> {
        let mut warnings = Vec::new();

        let mut pending = Vec::new();
        for trip in trips {
            match trip.receipt_ref.as_deref() {
                Some(reference) => pending.push((trip, reference)),
                None => warnings.push(Warning::ReceiptUnavailable {
                    trip_id: trip.id.clone(),
                    reason: "no receipt reference".to_string(),
                }),
            }
        }

        let settled: Vec<(&TripRecord, Result<Vec<u8>, ReceiptError>)> = stream::iter(pending)
            .map(|(trip, reference)| async move {
                debug!(trip = %trip.id, "fetching receipt");
                (trip, self.source.fetch_receipt(trip, reference).await)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut fetched = Vec::new();
        for (trip, result) in settled {
            match result.and_then(|bytes| validate(&bytes).map(|doc| (bytes, doc))) {
                Ok((bytes, doc)) => fetched.push((trip, bytes, doc)),
                Err(e) => {
                    warn!(trip = %trip.id, error = %e, "receipt unavailable");
                    warnings.push(Warning::ReceiptUnavailable {
                        trip_id: trip.id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        // Completion order is arbitrary; the merge must follow the trips.
        fetched.sort_by(|a, b| {
            a.0.timestamp
                .cmp(&b.0.timestamp)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });

        let mut seen: HashMap<String, TripId> = HashMap::new();
        let mut entries = Vec::with_capacity(fetched.len());
        let mut documents = Vec::with_capacity(fetched.len());
        for (trip, bytes, doc) in fetched {
            let sha256 = hash::sha256_hex(&bytes);
            if let Some(first) = seen.get(&sha256) {
                warnings.push(Warning::DuplicateReceipt {
                    trip_id: trip.id.clone(),
                    duplicate_of: first.clone(),
                });
            } else {
                seen.insert(sha256.clone(), trip.id.clone());
            }

            let path = match &self.store_dir {
                Some(dir) => Some(store(dir, &trip.id, &bytes).await?),
                None => None,
            };

            entries.push(MergedEntry {
                trip_id: trip.id.clone(),
                timestamp: trip.timestamp,
                sha256,
                path,
            });
            documents.push(doc);
        }

        let merged_pdf = if documents.is_empty() {
            None
        } else {
            Some(merge::merge_pdfs(documents)?)
        };

        let summary = ReceiptSummary {
            attempted: trips.len(),
            succeeded: entries.len(),
            skipped: trips.len() - entries.len(),
        };
        info!(
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            "receipts aggregated"
        );

        Ok(AggregateOutcome {
            entries,
            merged_pdf,
            summary,
            warnings,
        })
    }
}

fn validate(bytes: &[u8]) -> Result<lopdf::Document, ReceiptError> {
    if !bytes.starts_with(b"%PDF") {
        return Err(ReceiptError::NotPdf(format!("{} bytes", bytes.len())));
    }
    merge::parse_pdf(bytes).map_err(|e| ReceiptError::Corrupt(e.to_string()))
}

async fn store(dir: &Path, trip_id: &TripId, bytes: &[u8]) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let dest = dir.join(format!("{trip_id}.pdf"));
    tokio::fs::write(&dest, bytes).await?;
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::testing::{one_page_pdf, page_markers};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashSet;
    use std::time::Duration;
    use tripclaim_core::{Money, PurposeLabel};

    /// Serves `one_page_pdf(trip id)` after a per-trip delay, failing the
    /// listed trips.
    struct FakeSource {
        delays_ms: HashMap<String, u64>,
        failing: HashSet<String>,
    }

    #[async_trait]
    impl ReceiptSource for FakeSource {
        async fn fetch_receipt(
            &self,
            trip: &TripRecord,
            _reference: &str,
        ) -> Result<Vec<u8>, ReceiptError> {
            let delay = self.delays_ms.get(trip.id.as_str()).copied().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            if self.failing.contains(trip.id.as_str()) {
                return Err(ReceiptError::Http("503 Service Unavailable".into()));
            }
            Ok(one_page_pdf(trip.id.as_str()))
        }
    }

    fn trip(id: &str, day: u32) -> TripRecord {
        TripRecord {
            id: TripId::new(id),
            timestamp: Utc.with_ymd_and_hms(2025, 3, day, 9, 0, 0).unwrap(),
            pickup: "home".into(),
            dropoff: "work".into(),
            fare: Money::from_cents(1000),
            currency: "EGP".into(),
            receipt_ref: Some(format!("ref-{id}")),
            purpose: PurposeLabel::Unclassified,
            matched_keyword: None,
        }
    }

    fn source(delays: &[(&str, u64)], failing: &[&str]) -> FakeSource {
        FakeSource {
            delays_ms: delays.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            failing: failing.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn merge_follows_trip_order_not_completion_order() {
        // Oldest trip finishes last.
        let src = source(&[("a", 60), ("b", 30), ("c", 0)], &[]);
        let trips = vec![trip("a", 1), trip("b", 2), trip("c", 3)];
        let outcome = ReceiptAggregator::new(src, 3).aggregate(&trips).await.unwrap();

        let ids: Vec<_> = outcome.entries.iter().map(|e| e.trip_id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert_eq!(page_markers(&outcome.merged_pdf.unwrap()), ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn failures_are_skipped_and_counted() {
        let src = source(&[], &["b", "d"]);
        let trips: Vec<_> = ["a", "b", "c", "d", "e"]
            .iter()
            .enumerate()
            .map(|(i, id)| trip(id, i as u32 + 1))
            .collect();
        let outcome = ReceiptAggregator::new(src, 2).aggregate(&trips).await.unwrap();

        assert_eq!(outcome.entries.len(), 3);
        assert_eq!(
            outcome.summary,
            ReceiptSummary { attempted: 5, succeeded: 3, skipped: 2 }
        );
        assert_eq!(page_markers(&outcome.merged_pdf.unwrap()), ["a", "c", "e"]);
        let skipped: Vec<_> = outcome
            .warnings
            .iter()
            .filter_map(|w| match w {
                Warning::ReceiptUnavailable { trip_id, .. } => Some(trip_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(skipped.len(), 2);
        assert!(skipped.contains(&"b") && skipped.contains(&"d"));
    }

    #[tokio::test]
    async fn missing_reference_is_skipped_without_fetch() {
        let mut no_ref = trip("x", 1);
        no_ref.receipt_ref = None;
        // Would fail if fetched.
        let src = source(&[], &["x"]);
        let outcome = ReceiptAggregator::new(src, 1)
            .aggregate(&[no_ref, trip("y", 2)])
            .await
            .unwrap();
        assert_eq!(outcome.summary.skipped, 1);
        assert_eq!(
            outcome.warnings,
            vec![Warning::ReceiptUnavailable {
                trip_id: TripId::new("x"),
                reason: "no receipt reference".into(),
            }]
        );
    }

    #[tokio::test]
    async fn all_failed_produces_no_document() {
        let src = source(&[], &["a"]);
        let outcome = ReceiptAggregator::new(src, 4).aggregate(&[trip("a", 1)]).await.unwrap();
        assert!(outcome.merged_pdf.is_none());
        assert_eq!(outcome.summary.succeeded, 0);
    }

    struct HtmlSource;

    #[async_trait]
    impl ReceiptSource for HtmlSource {
        async fn fetch_receipt(&self, _: &TripRecord, _: &str) -> Result<Vec<u8>, ReceiptError> {
            Ok(b"<html>please log in</html>".to_vec())
        }
    }

    #[tokio::test]
    async fn non_pdf_payload_is_a_skip() {
        let outcome = ReceiptAggregator::new(HtmlSource, 1)
            .aggregate(&[trip("a", 1)])
            .await
            .unwrap();
        assert_eq!(outcome.summary.skipped, 1);
        assert!(matches!(
            &outcome.warnings[0],
            Warning::ReceiptUnavailable { reason, .. } if reason.contains("not a PDF")
        ));
    }

    struct SameBytes;

    #[async_trait]
    impl ReceiptSource for SameBytes {
        async fn fetch_receipt(&self, _: &TripRecord, _: &str) -> Result<Vec<u8>, ReceiptError> {
            Ok(one_page_pdf("same"))
        }
    }

    #[tokio::test]
    async fn identical_receipts_are_flagged_and_stored() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = ReceiptAggregator::new(SameBytes, 2)
            .with_store(dir.path().join("receipts"))
            .aggregate(&[trip("a", 1), trip("b", 2)])
            .await
            .unwrap();

        assert_eq!(
            outcome.warnings,
            vec![Warning::DuplicateReceipt {
                trip_id: TripId::new("b"),
                duplicate_of: TripId::new("a"),
            }]
        );
        let stored = outcome.entries[0].path.as_ref().unwrap();
        assert!(stored.ends_with("a.pdf"));
        assert!(stored.exists());
    }
}
