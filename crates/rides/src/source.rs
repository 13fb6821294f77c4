use async_trait::async_trait;
use tripclaim_core::{DateRange, TripRecord, Warning};

use crate::error::FetchError;

/// One page of the remote trip feed.
#[derive(Debug, Clone, Default)]
pub struct TripPage {
    pub trips: Vec<TripRecord>,
    /// Identifiers of feed entries read but not turned into trips (canceled,
    /// unfulfilled, no readable start time). They still count as progress
    /// through the feed.
    pub skipped: Vec<String>,
    pub warnings: Vec<Warning>,
    /// Cursor for the following page; `None` on the last one.
    pub next_cursor: Option<String>,
}

/// The remote trip API, one page at a time.
#[async_trait]
pub trait TripSource: Send + Sync {
    async fn fetch_page(
        &self,
        range: &DateRange,
        cursor: Option<&str>,
    ) -> Result<TripPage, FetchError>;
}
