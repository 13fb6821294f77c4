pub mod money;
pub mod period;
pub mod rules;
pub mod trip;
pub mod warning;

pub use money::Money;
pub use period::{resolve_month, DateRange, PeriodError};
pub use rules::{AddressClassifier, Classification, ClassificationRules};
pub use trip::{sort_chronologically, PurposeLabel, TripId, TripRecord};
pub use warning::{Leg, Warning};
