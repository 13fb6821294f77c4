use std::collections::HashSet;
use tracing::{debug, info, warn};
use tripclaim_core::{sort_chronologically, DateRange, TripRecord, Warning};

use crate::error::FetchError;
use crate::retry::RetryPolicy;
use crate::source::TripSource;

pub const DEFAULT_MAX_PAGES: usize = 50;

#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// In-range trips, oldest first, one per identifier.
    pub trips: Vec<TripRecord>,
    pub pages: usize,
    pub warnings: Vec<Warning>,
}

/// Walks the paginated trip feed for a date range.
///
/// Pages are requested strictly in sequence since each cursor comes from the
/// previous response. The walk ends when the source has no next cursor, when
/// a page adds nothing new (no unseen in-range trip and no unseen skipped
/// entry), or after `max_pages` pages.
///
/// Transient failures are retried per page under the [`RetryPolicy`]. Once
/// retries run out the whole fetch fails and nothing gathered so far is
/// returned, so an incomplete month is never claimed.
pub struct TripFetcher<S: TripSource> {
    source: S,
    retry: RetryPolicy,
    max_pages: usize,
}

impl<S: TripSource> TripFetcher<S> {
    pub fn new(source: S, retry: RetryPolicy) -> Self {
        Self {
            source,
            retry,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub async fn fetch(&self, range: &DateRange) -> Result<FetchOutcome, FetchError> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut trips = Vec::new();
        let mut warnings = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0;

        loop {
            if pages == self.max_pages {
                warn!(pages, "page limit reached, stopping pagination");
                warnings.push(Warning::PageLimitReached { pages });
                break;
            }

            let page = self
                .retry
                .run("trip page", || self.source.fetch_page(range, cursor.as_deref()))
                .await?;
            pages += 1;

            let received = page.trips.len() + page.skipped.len();
            warnings.extend(page.warnings);
            let mut fresh = 0;
            for id in page.skipped {
                if seen.insert(id) {
                    fresh += 1;
                }
            }
            for trip in page.trips {
                if !range.contains(trip.timestamp) {
                    debug!(trip = %trip.id, at = %trip.timestamp, "outside range, dropped");
                    continue;
                }
                if seen.insert(trip.id.0.clone()) {
                    trips.push(trip);
                    fresh += 1;
                }
            }
            debug!(page = pages, received, fresh, "trip page processed");

            if fresh == 0 {
                break;
            }
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        sort_chronologically(&mut trips);
        info!(trips = trips.len(), pages, range = %range, "trips fetched");
        Ok(FetchOutcome {
            trips,
            pages,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::TripPage;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tripclaim_core::{Money, PurposeLabel, TripId};

    fn trip(id: &str, at: DateTime<Utc>) -> TripRecord {
        TripRecord {
            id: TripId::new(id),
            timestamp: at,
            pickup: "p".into(),
            dropoff: "d".into(),
            fare: Money::from_cents(100),
            currency: "EGP".into(),
            receipt_ref: Some(id.to_string()),
            purpose: PurposeLabel::Unclassified,
            matched_keyword: None,
        }
    }

    fn march(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, 10, 0, 0).unwrap()
    }

    /// Replays scripted responses and records the cursors it was asked for.
    struct Scripted {
        responses: Mutex<VecDeque<Result<TripPage, FetchError>>>,
        cursors: Mutex<Vec<Option<String>>>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<TripPage, FetchError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                cursors: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.cursors.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TripSource for Scripted {
        async fn fetch_page(
            &self,
            _range: &DateRange,
            cursor: Option<&str>,
        ) -> Result<TripPage, FetchError> {
            self.cursors.lock().unwrap().push(cursor.map(str::to_string));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(TripPage::default()))
        }
    }

    fn page(trips: Vec<TripRecord>, next: Option<&str>) -> Result<TripPage, FetchError> {
        Ok(TripPage {
            trips,
            next_cursor: next.map(str::to_string),
            ..TripPage::default()
        })
    }

    fn skipped_page(ids: &[&str], next: Option<&str>) -> Result<TripPage, FetchError> {
        Ok(TripPage {
            skipped: ids.iter().map(|s| s.to_string()).collect(),
            next_cursor: next.map(str::to_string),
            ..TripPage::default()
        })
    }

    fn range() -> DateRange {
        DateRange::month(2025, 3).unwrap()
    }

    #[tokio::test]
    async fn follows_cursors_and_sorts() {
        let src = Scripted::new(vec![
            page(vec![trip("c", march(20)), trip("b", march(10))], Some("p2")),
            page(vec![trip("a", march(1))], None),
        ]);
        let fetcher = TripFetcher::new(src, RetryPolicy::no_delay(1));
        let outcome = fetcher.fetch(&range()).await.unwrap();

        let ids: Vec<_> = outcome.trips.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert_eq!(outcome.pages, 2);
        assert_eq!(
            *fetcher.source().cursors.lock().unwrap(),
            vec![None, Some("p2".to_string())]
        );
    }

    #[tokio::test]
    async fn drops_out_of_range_and_duplicates() {
        let feb = Utc.with_ymd_and_hms(2025, 2, 28, 23, 0, 0).unwrap();
        let april = Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap();
        let src = Scripted::new(vec![
            page(vec![trip("a", march(2)), trip("old", feb)], Some("p2")),
            page(vec![trip("a", march(2)), trip("b", march(3)), trip("new", april)], None),
        ]);
        let outcome = TripFetcher::new(src, RetryPolicy::no_delay(1))
            .fetch(&range())
            .await
            .unwrap();

        let ids: Vec<_> = outcome.trips.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        let r = range();
        assert!(outcome.trips.iter().all(|t| r.contains(t.timestamp)));
    }

    #[tokio::test]
    async fn stops_when_page_adds_nothing_new() {
        // A feed that keeps handing out the same page with a fresh cursor.
        let looping: Vec<_> = (0..10)
            .map(|i| page(vec![trip("same", march(5))], Some(&format!("c{i}"))))
            .collect();
        let src = Scripted::new(looping);
        let fetcher = TripFetcher::new(src, RetryPolicy::no_delay(1));
        let outcome = fetcher.fetch(&range()).await.unwrap();

        assert_eq!(outcome.trips.len(), 1);
        assert_eq!(fetcher.source().calls(), 2);
    }

    #[tokio::test]
    async fn page_of_only_skipped_entries_keeps_walking() {
        let src = Scripted::new(vec![
            skipped_page(&["canceled-1"], Some("p2")),
            page(vec![trip("real", march(9))], None),
        ]);
        let fetcher = TripFetcher::new(src, RetryPolicy::no_delay(1));
        let outcome = fetcher.fetch(&range()).await.unwrap();

        let ids: Vec<_> = outcome.trips.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["real"]);
        assert_eq!(outcome.pages, 2);
    }

    #[tokio::test]
    async fn repeated_skipped_entries_end_the_walk() {
        let looping: Vec<_> = (0..10)
            .map(|i| skipped_page(&["canceled-1"], Some(&format!("c{i}"))))
            .collect();
        let fetcher = TripFetcher::new(Scripted::new(looping), RetryPolicy::no_delay(1));
        let outcome = fetcher.fetch(&range()).await.unwrap();
        assert!(outcome.trips.is_empty());
        assert_eq!(fetcher.source().calls(), 2);
    }

    #[tokio::test]
    async fn page_warnings_are_collected() {
        let src = Scripted::new(vec![Ok(TripPage {
            trips: vec![trip("a", march(2))],
            warnings: vec![Warning::TripDetailUnavailable {
                trip_id: TripId::new("a"),
                reason: "trip not found".into(),
            }],
            ..TripPage::default()
        })]);
        let outcome = TripFetcher::new(src, RetryPolicy::no_delay(1))
            .fetch(&range())
            .await
            .unwrap();
        assert_eq!(outcome.trips.len(), 1);
        assert!(matches!(
            outcome.warnings.as_slice(),
            [Warning::TripDetailUnavailable { .. }]
        ));
    }

    #[tokio::test]
    async fn page_limit_bounds_the_walk() {
        let endless: Vec<_> = (0..100)
            .map(|i| page(vec![trip(&format!("t{i}"), march(1 + i % 28))], Some("more")))
            .collect();
        let fetcher = TripFetcher::new(Scripted::new(endless), RetryPolicy::no_delay(1))
            .with_max_pages(5);
        let outcome = fetcher.fetch(&range()).await.unwrap();

        assert_eq!(outcome.pages, 5);
        assert_eq!(outcome.trips.len(), 5);
        assert_eq!(outcome.warnings, vec![Warning::PageLimitReached { pages: 5 }]);
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let src = Scripted::new(vec![
            Err(FetchError::Transient("timeout".into())),
            page(vec![trip("a", march(2))], None),
        ]);
        let fetcher = TripFetcher::new(src, RetryPolicy::no_delay(3));
        let outcome = fetcher.fetch(&range()).await.unwrap();
        assert_eq!(outcome.trips.len(), 1);
        assert_eq!(fetcher.source().calls(), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_discard_partial_results() {
        let src = Scripted::new(vec![
            page(vec![trip("a", march(2))], Some("p2")),
            Err(FetchError::Transient("HTTP 502".into())),
            Err(FetchError::Transient("HTTP 502".into())),
            Err(FetchError::Transient("HTTP 502".into())),
        ]);
        let fetcher = TripFetcher::new(src, RetryPolicy::no_delay(3));
        let result = fetcher.fetch(&range()).await;
        assert!(matches!(
            result,
            Err(FetchError::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(fetcher.source().calls(), 4);
    }

    #[tokio::test]
    async fn authentication_error_propagates_immediately() {
        let src = Scripted::new(vec![Err(FetchError::Authentication("HTTP 401".into()))]);
        let fetcher = TripFetcher::new(src, RetryPolicy::no_delay(3));
        let result = fetcher.fetch(&range()).await;
        assert!(matches!(result, Err(FetchError::Authentication(_))));
        assert_eq!(fetcher.source().calls(), 1);
    }

    #[tokio::test]
    async fn empty_feed_is_empty_result() {
        let fetcher = TripFetcher::new(Scripted::new(vec![]), RetryPolicy::default());
        let outcome = fetcher.fetch(&range()).await.unwrap();
        assert!(outcome.trips.is_empty());
        assert_eq!(outcome.pages, 1);
    }
}
