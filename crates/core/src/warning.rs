use serde::{Deserialize, Serialize};
use std::fmt;

use super::trip::TripId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Leg {
    Pickup,
    Dropoff,
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Leg::Pickup => write!(f, "pickup"),
            Leg::Dropoff => write!(f, "dropoff"),
        }
    }
}

/// Non-fatal condition collected during a run and reported in the summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    Unclassified {
        trip_id: TripId,
    },
    AmbiguousAddress {
        trip_id: TripId,
        leg: Leg,
    },
    /// Pickup and dropoff could not be looked up; the trip is kept with
    /// blank addresses.
    TripDetailUnavailable {
        trip_id: TripId,
        reason: String,
    },
    ReceiptUnavailable {
        trip_id: TripId,
        reason: String,
    },
    DuplicateReceipt {
        trip_id: TripId,
        duplicate_of: TripId,
    },
    MixedCurrency {
        trip_id: TripId,
        expected: String,
        found: String,
    },
    PageLimitReached {
        pages: usize,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::Unclassified { trip_id } => {
                write!(f, "trip {trip_id}: purpose not recognised, fill in manually")
            }
            Warning::AmbiguousAddress { trip_id, leg } => {
                write!(f, "trip {trip_id}: {leg} address matches both home and work keywords")
            }
            Warning::TripDetailUnavailable { trip_id, reason } => {
                write!(f, "trip {trip_id}: addresses unavailable ({reason}), fill in manually")
            }
            Warning::ReceiptUnavailable { trip_id, reason } => {
                write!(f, "trip {trip_id}: receipt unavailable ({reason})")
            }
            Warning::DuplicateReceipt { trip_id, duplicate_of } => {
                write!(f, "trip {trip_id}: receipt identical to trip {duplicate_of}")
            }
            Warning::MixedCurrency { trip_id, expected, found } => {
                write!(f, "trip {trip_id}: fare in {found}, report total is in {expected}")
            }
            Warning::PageLimitReached { pages } => {
                write!(f, "stopped after {pages} pages; trip list may be incomplete")
            }
        }
    }
}
