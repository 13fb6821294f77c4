pub mod client;
pub mod error;
pub mod fetcher;
pub mod parse;
pub mod retry;
pub mod source;

pub use client::{ApiConfig, Credential, CredentialError, RidersClient};
pub use error::FetchError;
pub use fetcher::{FetchOutcome, TripFetcher, DEFAULT_MAX_PAGES};
pub use retry::RetryPolicy;
pub use source::{TripPage, TripSource};
