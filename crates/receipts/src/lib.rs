pub mod aggregator;
pub mod hash;
pub mod merge;
pub mod source;

pub use aggregator::{AggregateError, AggregateOutcome, MergedEntry, ReceiptAggregator, ReceiptSummary};
pub use hash::sha256_hex;
pub use merge::{merge_pdfs, parse_pdf, MergeError};
pub use source::{ReceiptError, ReceiptSource};
