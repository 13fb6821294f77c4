use serde::{Deserialize, Serialize};

use super::trip::{PurposeLabel, TripRecord};
use super::warning::{Leg, Warning};

/// Address keywords used to recognise commute legs. Order is preserved and
/// the first matching keyword is the one reported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationRules {
    #[serde(default)]
    pub home_address_keywords: Vec<String>,
    #[serde(default)]
    pub work_address_keywords: Vec<String>,
}

/// Outcome of classifying one trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub label: PurposeLabel,
    pub matched_keyword: Option<String>,
    /// Legs whose address matched a home and a work keyword at once.
    pub ambiguous: Vec<Leg>,
}

/// Lower-cased keyword paired with its original spelling for reporting.
struct Keyword {
    needle: String,
    original: String,
}

fn compile(keywords: &[String]) -> Vec<Keyword> {
    keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(|k| Keyword {
            needle: k.to_lowercase(),
            original: k.to_string(),
        })
        .collect()
}

fn first_match<'a>(keywords: &'a [Keyword], address: &str) -> Option<&'a Keyword> {
    let haystack = address.to_lowercase();
    keywords.iter().find(|k| haystack.contains(&k.needle))
}

/// Labels trips by matching address text against work keywords.
///
/// Rules are evaluated in order and the first hit wins:
///
/// 1. dropoff contains a work keyword: `ToWork`
/// 2. pickup contains a work keyword: `FromWork`
/// 3. otherwise: `Unclassified`
///
/// Home keywords never decide a label. A trip that only touches home-matching
/// addresses stays `Unclassified` rather than being guessed at.
pub struct AddressClassifier {
    home: Vec<Keyword>,
    work: Vec<Keyword>,
}

impl AddressClassifier {
    pub fn new(rules: &ClassificationRules) -> Self {
        Self {
            home: compile(&rules.home_address_keywords),
            work: compile(&rules.work_address_keywords),
        }
    }

    pub fn classify(&self, pickup: &str, dropoff: &str) -> Classification {
        let dropoff_work = first_match(&self.work, dropoff);
        let pickup_work = first_match(&self.work, pickup);

        let mut ambiguous = Vec::new();
        if pickup_work.is_some() && first_match(&self.home, pickup).is_some() {
            ambiguous.push(Leg::Pickup);
        }
        if dropoff_work.is_some() && first_match(&self.home, dropoff).is_some() {
            ambiguous.push(Leg::Dropoff);
        }

        let (label, matched) = if let Some(k) = dropoff_work {
            (PurposeLabel::ToWork, Some(k))
        } else if let Some(k) = pickup_work {
            (PurposeLabel::FromWork, Some(k))
        } else {
            (PurposeLabel::Unclassified, None)
        };

        Classification {
            label,
            matched_keyword: matched.map(|k| k.original.clone()),
            ambiguous,
        }
    }

    /// Classifies every trip, returning relabelled copies in the same order
    /// plus the warnings raised along the way.
    pub fn classify_all(&self, trips: Vec<TripRecord>) -> (Vec<TripRecord>, Vec<Warning>) {
        let mut warnings = Vec::new();
        let labelled = trips
            .into_iter()
            .map(|trip| {
                let c = self.classify(&trip.pickup, &trip.dropoff);
                for leg in &c.ambiguous {
                    warnings.push(Warning::AmbiguousAddress {
                        trip_id: trip.id.clone(),
                        leg: *leg,
                    });
                }
                if c.label == PurposeLabel::Unclassified {
                    warnings.push(Warning::Unclassified {
                        trip_id: trip.id.clone(),
                    });
                }
                trip.with_purpose(c.label, c.matched_keyword)
            })
            .collect();
        (labelled, warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Money;
    use crate::trip::TripId;
    use chrono::{TimeZone, Utc};

    fn rules() -> ClassificationRules {
        ClassificationRules {
            home_address_keywords: vec!["N Teseen".into(), "New Cairo".into()],
            work_address_keywords: vec!["Al Tabeer".into(), "Zeitoun".into()],
        }
    }

    fn make_trip(id: &str, pickup: &str, dropoff: &str) -> TripRecord {
        TripRecord {
            id: TripId::new(id),
            timestamp: Utc.with_ymd_and_hms(2025, 3, 3, 8, 0, 0).unwrap(),
            pickup: pickup.into(),
            dropoff: dropoff.into(),
            fare: Money::from_cents(1000),
            currency: "EGP".into(),
            receipt_ref: None,
            purpose: PurposeLabel::Unclassified,
            matched_keyword: None,
        }
    }

    #[test]
    fn dropoff_at_work_is_to_work() {
        let c = AddressClassifier::new(&rules()).classify("90 St, N Teseen", "1 AL TABEER, Cairo");
        assert_eq!(c.label, PurposeLabel::ToWork);
        assert_eq!(c.matched_keyword.as_deref(), Some("Al Tabeer"));
    }

    #[test]
    fn pickup_at_work_is_from_work() {
        let c = AddressClassifier::new(&rules()).classify("1 al tabeer", "Mall of Egypt");
        assert_eq!(c.label, PurposeLabel::FromWork);
    }

    #[test]
    fn dropoff_match_beats_pickup_match() {
        let c = AddressClassifier::new(&rules()).classify("Al Tabeer gate 2", "Zeitoun station");
        assert_eq!(c.label, PurposeLabel::ToWork);
        assert_eq!(c.matched_keyword.as_deref(), Some("Zeitoun"));
    }

    #[test]
    fn dropoff_matching_home_and_work_still_to_work() {
        let c = AddressClassifier::new(&rules()).classify("Airport", "Al Tabeer, New Cairo");
        assert_eq!(c.label, PurposeLabel::ToWork);
        assert_eq!(c.ambiguous, vec![Leg::Dropoff]);
    }

    #[test]
    fn home_to_home_is_unclassified() {
        let c = AddressClassifier::new(&rules()).classify("N Teseen", "New Cairo 1");
        assert_eq!(c.label, PurposeLabel::Unclassified);
        assert!(c.matched_keyword.is_none());
        assert!(c.ambiguous.is_empty());
    }

    #[test]
    fn no_match_is_unclassified() {
        let c = AddressClassifier::new(&rules()).classify("Heliopolis", "Maadi");
        assert_eq!(c.label, PurposeLabel::Unclassified);
    }

    #[test]
    fn blank_keywords_never_match() {
        let rules = ClassificationRules {
            home_address_keywords: vec![],
            work_address_keywords: vec!["  ".into(), String::new()],
        };
        let c = AddressClassifier::new(&rules).classify("anything", "anywhere");
        assert_eq!(c.label, PurposeLabel::Unclassified);
    }

    #[test]
    fn no_fuzzy_matching() {
        let c = AddressClassifier::new(&rules()).classify("Heliopolis", "Al Tabir");
        assert_eq!(c.label, PurposeLabel::Unclassified);
    }

    #[test]
    fn classify_all_keeps_order_and_collects_warnings() {
        let trips = vec![
            make_trip("1", "N Teseen", "Al Tabeer"),
            make_trip("2", "Al Tabeer", "N Teseen"),
            make_trip("3", "Maadi", "Dokki"),
        ];
        let (labelled, warnings) = AddressClassifier::new(&rules()).classify_all(trips);
        let labels: Vec<_> = labelled.iter().map(|t| t.purpose).collect();
        assert_eq!(
            labels,
            [PurposeLabel::ToWork, PurposeLabel::FromWork, PurposeLabel::Unclassified]
        );
        assert_eq!(
            warnings,
            vec![Warning::Unclassified { trip_id: TripId::new("3") }]
        );
    }
}
