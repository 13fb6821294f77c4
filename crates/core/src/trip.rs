use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::money::Money;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TripId(pub String);

impl TripId {
    pub fn new(id: impl Into<String>) -> Self {
        TripId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TripId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurposeLabel {
    ToWork,
    FromWork,
    #[default]
    Unclassified,
}

impl PurposeLabel {
    /// Text written into the claim form. Unclassified stays blank so the
    /// claimant fills it in by hand.
    pub fn report_text(self) -> &'static str {
        match self {
            PurposeLabel::ToWork => "To Work",
            PurposeLabel::FromWork => "From Work",
            PurposeLabel::Unclassified => "",
        }
    }
}

impl fmt::Display for PurposeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PurposeLabel::ToWork => write!(f, "to_work"),
            PurposeLabel::FromWork => write!(f, "from_work"),
            PurposeLabel::Unclassified => write!(f, "unclassified"),
        }
    }
}

/// One completed ride. Built by the fetcher with an `Unclassified` label;
/// the classifier hands back a relabelled copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripRecord {
    pub id: TripId,
    pub timestamp: DateTime<Utc>,
    pub pickup: String,
    pub dropoff: String,
    pub fare: Money,
    pub currency: String,
    /// Opaque handle the receipt source understands; `None` when the
    /// provider has no receipt for this trip.
    pub receipt_ref: Option<String>,
    #[serde(default)]
    pub purpose: PurposeLabel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_keyword: Option<String>,
}

impl TripRecord {
    pub fn with_purpose(self, purpose: PurposeLabel, matched_keyword: Option<String>) -> Self {
        TripRecord {
            purpose,
            matched_keyword,
            ..self
        }
    }
}

/// Sorts by timestamp, falling back to the identifier so equal instants
/// still order deterministically.
pub fn sort_chronologically(trips: &mut [TripRecord]) {
    trips.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
}
