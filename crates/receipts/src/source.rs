use async_trait::async_trait;
use thiserror::Error;
use tripclaim_core::TripRecord;

#[derive(Debug, Error)]
pub enum ReceiptError {
    #[error("no receipt published for this trip")]
    NotFound,
    #[error("request failed: {0}")]
    Http(String),
    #[error("payload is not a PDF: {0}")]
    NotPdf(String),
    #[error("unreadable PDF: {0}")]
    Corrupt(String),
}

/// Where receipt documents come from. `reference` is the trip's opaque
/// receipt handle.
#[async_trait]
pub trait ReceiptSource: Send + Sync {
    async fn fetch_receipt(
        &self,
        trip: &TripRecord,
        reference: &str,
    ) -> Result<Vec<u8>, ReceiptError>;
}
