use async_trait::async_trait;
use chrono::{Datelike, FixedOffset, Offset, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, COOKIE, ORIGIN, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use tripclaim_core::{DateRange, Money, PurposeLabel, TripId, TripRecord, Warning};
use tripclaim_receipts::{ReceiptError, ReceiptSource};

use crate::error::FetchError;
use crate::fetcher::DEFAULT_MAX_PAGES;
use crate::parse;
use crate::source::{TripPage, TripSource};

const ACTIVITIES_QUERY: &str = r#"
query Activities(
  $endTimeMs: Float
  $limit: Int = 60
  $nextPageToken: String
  $orderTypes: [RVWebCommonActivityOrderType!] = [RIDES, TRAVEL]
  $profileType: RVWebCommonActivityProfileType = PERSONAL
  $startTimeMs: Float
) {
  activities {
    past(
      endTimeMs: $endTimeMs
      limit: $limit
      nextPageToken: $nextPageToken
      orderTypes: $orderTypes
      profileType: $profileType
      startTimeMs: $startTimeMs
    ) {
      activities {
        uuid
        description
        subtitle
      }
      nextPageToken
    }
  }
}
"#;

const TRIP_QUERY: &str = r#"
query GetTrip($tripUUID: String!) {
  getTrip(tripUUID: $tripUUID) {
    trip {
      uuid
      beginTripTime
      waypoints
    }
  }
}
"#;

const RECEIPT_QUERY: &str = r#"
query GetReceipt($tripUUID: String!, $timestamp: String) {
  getReceipt(tripUUID: $tripUUID, timestamp: $timestamp) {
    receiptsForJob {
      timestamp
      type
    }
  }
}
"#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Per-request timeout.
    pub timeout_secs: u64,
    pub page_size: u32,
    pub max_pages: usize,
    /// Currency assumed when a fare carries no code.
    pub default_currency: String,
    pub user_agent: String,
    /// Offset of the rider's local time from UTC, used to read the feed's
    /// wall-clock subtitles.
    pub utc_offset_minutes: i32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://riders.uber.com".to_string(),
            timeout_secs: 30,
            page_size: 60,
            max_pages: DEFAULT_MAX_PAGES,
            default_currency: "EGP".to_string(),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) tripclaim".to_string(),
            utc_offset_minutes: 0,
        }
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("cannot read credential file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("credential is empty")]
    Empty,
    #[error("credential file {} is empty", .0.display())]
    EmptyFile(PathBuf),
}

/// Browser session cookie. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(cookie: impl Into<String>) -> Result<Self, CredentialError> {
        let cookie = cookie.into().trim().to_string();
        if cookie.is_empty() {
            return Err(CredentialError::Empty);
        }
        Ok(Credential(cookie))
    }

    /// Reads the cookie from a text file; surrounding whitespace is ignored.
    pub fn from_file(path: &Path) -> Result<Self, CredentialError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CredentialError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Credential::new(raw).map_err(|_| CredentialError::EmptyFile(path.to_path_buf()))
    }

    fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential(<redacted>)")
    }
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    extensions: Option<Value>,
}

impl GraphqlError {
    fn is_auth(&self) -> bool {
        let code = self
            .extensions
            .as_ref()
            .and_then(|e| e.get("code"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let message = self.message.to_lowercase();
        code.eq_ignore_ascii_case("UNAUTHENTICATED")
            || message.contains("unauthorized")
            || message.contains("unauthenticated")
            || message.contains("not authenticated")
    }
}

impl<T> GraphqlResponse<T> {
    fn into_data(self) -> Result<T, FetchError> {
        if let Some(e) = self.errors.iter().find(|e| e.is_auth()) {
            return Err(FetchError::Authentication(e.message.clone()));
        }
        match self.data {
            Some(data) => Ok(data),
            None if self.errors.is_empty() => {
                Err(FetchError::Malformed("response carried no data".to_string()))
            }
            None => Err(FetchError::Malformed(
                self.errors
                    .iter()
                    .map(|e| e.message.as_str())
                    .collect::<Vec<_>>()
                    .join("; "),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ActivitiesData {
    activities: Activities,
}

#[derive(Debug, Deserialize)]
struct Activities {
    past: Option<PastActivities>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PastActivities {
    #[serde(default)]
    activities: Vec<Activity>,
    next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Activity {
    uuid: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    subtitle: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TripData {
    get_trip: TripEnvelope,
}

#[derive(Debug, Deserialize)]
struct TripEnvelope {
    trip: TripDetail,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TripDetail {
    #[serde(default)]
    begin_trip_time: Option<String>,
    #[serde(default)]
    waypoints: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceiptData {
    get_receipt: Option<ReceiptInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceiptInfo {
    #[serde(default)]
    receipts_for_job: Vec<ReceiptJob>,
}

#[derive(Debug, Deserialize)]
struct ReceiptJob {
    timestamp: String,
}

/// Combines a feed entry and its detail lookup into a trip. Returns `None`
/// when no start time can be recovered.
fn build_trip(
    activity: Activity,
    detail: TripDetail,
    range: &DateRange,
    default_currency: &str,
    offset: &FixedOffset,
) -> Option<TripRecord> {
    let timestamp = detail
        .begin_trip_time
        .as_deref()
        .and_then(parse::parse_instant)
        .or_else(|| parse::parse_subtitle(&activity.subtitle, range.start().year(), offset))?;

    let (fare, currency) = parse::parse_fare(&activity.description, default_currency)
        .unwrap_or_else(|| {
            debug!(trip = %activity.uuid, "no fare in description");
            (Money::zero(), default_currency.to_string())
        });

    let (pickup, dropoff) = match detail.waypoints.as_slice() {
        [first, .., last] => (first.clone(), last.clone()),
        _ => (String::new(), String::new()),
    };

    Some(TripRecord {
        id: TripId::new(activity.uuid.clone()),
        timestamp,
        pickup,
        dropoff,
        fare,
        currency,
        receipt_ref: Some(activity.uuid),
        purpose: PurposeLabel::Unclassified,
        matched_keyword: None,
    })
}

/// Decides what a failed detail lookup means for its trip. Session and
/// retryable failures stop the fetch; anything else keeps the trip with blank
/// addresses and a warning.
fn recover_detail(
    uuid: &str,
    failure: FetchError,
) -> Result<(TripDetail, Warning), FetchError> {
    if matches!(failure, FetchError::Authentication(_)) || failure.is_retryable() {
        return Err(failure);
    }
    warn!(trip = %uuid, error = %failure, "trip detail unavailable, keeping trip without addresses");
    Ok((
        TripDetail::default(),
        Warning::TripDetailUnavailable {
            trip_id: TripId::new(uuid),
            reason: failure.to_string(),
        },
    ))
}

fn local_offset(minutes: i32) -> FixedOffset {
    minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .unwrap_or_else(|| {
            warn!(minutes, "UTC offset out of range, reading feed times as UTC");
            Utc.fix()
        })
}

/// Client for the rider web GraphQL endpoint, authenticated with the
/// browser session cookie.
#[derive(Clone)]
pub struct RidersClient {
    http: reqwest::Client,
    base_url: String,
    page_size: u32,
    default_currency: String,
    local_offset: FixedOffset,
}

impl RidersClient {
    pub fn new(config: &ApiConfig, credential: &Credential) -> Result<Self, FetchError> {
        let mut cookie = HeaderValue::from_str(credential.expose()).map_err(|_| {
            FetchError::Authentication("cookie contains characters not allowed in a header".into())
        })?;
        cookie.set_sensitive(true);

        let base_url = config.base_url.trim_end_matches('/').to_string();
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, cookie);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(HeaderName::from_static("x-csrf-token"), HeaderValue::from_static("x"));
        if let Ok(origin) = HeaderValue::from_str(&base_url) {
            headers.insert(ORIGIN, origin);
        }
        if let Ok(agent) = HeaderValue::from_str(&config.user_agent) {
            headers.insert(USER_AGENT, agent);
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| FetchError::Malformed(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url,
            page_size: config.page_size,
            default_currency: config.default_currency.clone(),
            local_offset: local_offset(config.utc_offset_minutes),
        })
    }

    async fn graphql<T: DeserializeOwned>(
        &self,
        operation: &str,
        query: &str,
        variables: Value,
    ) -> Result<T, FetchError> {
        let url = format!("{}/graphql", self.base_url);
        debug!(operation, "graphql request");
        let resp = self
            .http
            .post(&url)
            .json(&json!({
                "operationName": operation,
                "query": query,
                "variables": variables,
            }))
            .send()
            .await?;

        // An expired session is answered with a redirect to the login page.
        if resp.url().path().contains("login") {
            return Err(FetchError::Authentication("redirected to login".into()));
        }
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::from_status(status, &body));
        }
        let envelope: GraphqlResponse<T> = resp.json().await?;
        envelope.into_data()
    }

    async fn trip_detail(&self, uuid: &str) -> Result<TripDetail, FetchError> {
        let data: TripData = self
            .graphql("GetTrip", TRIP_QUERY, json!({ "tripUUID": uuid }))
            .await?;
        Ok(data.get_trip.trip)
    }
}

#[async_trait]
impl TripSource for RidersClient {
    async fn fetch_page(
        &self,
        range: &DateRange,
        cursor: Option<&str>,
    ) -> Result<TripPage, FetchError> {
        let variables = json!({
            "limit": self.page_size,
            "orderTypes": ["RIDES", "TRAVEL"],
            "profileType": "PERSONAL",
            "startTimeMs": range.start_millis(),
            "endTimeMs": range.last_millis(),
            "nextPageToken": cursor,
        });
        let data: ActivitiesData = self.graphql("Activities", ACTIVITIES_QUERY, variables).await?;
        let past = data.activities.past.unwrap_or_default();

        let mut page = TripPage {
            trips: Vec::with_capacity(past.activities.len()),
            next_cursor: past.next_page_token.filter(|t| !t.is_empty()),
            ..TripPage::default()
        };
        for activity in past.activities {
            if parse::is_canceled_or_unfulfilled(&activity.description) {
                debug!(trip = %activity.uuid, "skipping canceled or unfulfilled trip");
                page.skipped.push(activity.uuid);
                continue;
            }
            let (detail, warning) = match self.trip_detail(&activity.uuid).await {
                Ok(detail) => (detail, None),
                Err(e) => {
                    let (detail, warning) = recover_detail(&activity.uuid, e)?;
                    (detail, Some(warning))
                }
            };
            let uuid = activity.uuid.clone();
            match build_trip(activity, detail, range, &self.default_currency, &self.local_offset) {
                Some(trip) => {
                    page.trips.push(trip);
                    page.warnings.extend(warning);
                }
                None => {
                    warn!(trip = %uuid, "skipping trip without a readable start time");
                    page.skipped.push(uuid);
                }
            }
        }

        Ok(page)
    }
}

#[async_trait]
impl ReceiptSource for RidersClient {
    /// Two steps: look up the receipt's timestamp, then download it as PDF.
    async fn fetch_receipt(
        &self,
        trip: &TripRecord,
        reference: &str,
    ) -> Result<Vec<u8>, ReceiptError> {
        let data: ReceiptData = self
            .graphql(
                "GetReceipt",
                RECEIPT_QUERY,
                json!({ "tripUUID": reference, "timestamp": "" }),
            )
            .await
            .map_err(|e| ReceiptError::Http(e.to_string()))?;
        let timestamp = data
            .get_receipt
            .and_then(|r| r.receipts_for_job.into_iter().next())
            .map(|job| job.timestamp)
            .ok_or(ReceiptError::NotFound)?;

        let url = format!("{}/trips/{}/receipt", self.base_url, reference);
        debug!(trip = %trip.id, "downloading receipt");
        let resp = self
            .http
            .get(&url)
            .query(&[("contentType", "PDF"), ("timestamp", timestamp.as_str())])
            .send()
            .await
            .map_err(|e| ReceiptError::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ReceiptError::Http(format!("HTTP {status}")));
        }
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.starts_with("application/pdf") {
            return Err(ReceiptError::NotPdf(format!("content type {content_type:?}")));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ReceiptError::Http(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc() -> FixedOffset {
        Utc.fix()
    }

    fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, FetchError> {
        serde_json::from_str::<GraphqlResponse<T>>(raw)
            .unwrap()
            .into_data()
    }

    #[test]
    fn decodes_activities_page() {
        let raw = r#"{"data":{"activities":{"past":{
            "activities":[
                {"uuid":"t-1","cardURL":"https://x/t-1","description":"EGP 55.00","subtitle":"Mar 3 • 8:00 AM","__typename":"Activity"}
            ],
            "nextPageToken":"abc"}}}}"#;
        let data: ActivitiesData = decode(raw).unwrap();
        let past = data.activities.past.unwrap();
        assert_eq!(past.activities.len(), 1);
        assert_eq!(past.activities[0].uuid, "t-1");
        assert_eq!(past.next_page_token.as_deref(), Some("abc"));
    }

    #[test]
    fn auth_error_in_graphql_body() {
        let raw = r#"{"data":null,"errors":[{"message":"Unauthorized","extensions":{"code":"UNAUTHENTICATED"}}]}"#;
        let result: Result<ActivitiesData, _> = decode(raw);
        assert!(matches!(result, Err(FetchError::Authentication(_))));
    }

    #[test]
    fn other_graphql_errors_are_malformed() {
        let raw = r#"{"data":null,"errors":[{"message":"Variable $limit invalid"}]}"#;
        let result: Result<ActivitiesData, _> = decode(raw);
        assert!(matches!(result, Err(FetchError::Malformed(m)) if m.contains("$limit")));
    }

    #[test]
    fn build_trip_prefers_detail_time_and_uses_end_waypoints() {
        let range = DateRange::month(2025, 3).unwrap();
        let activity = Activity {
            uuid: "t-9".into(),
            description: "EGP 123.40".into(),
            subtitle: "Mar 9 • 9:00 PM".into(),
        };
        let detail = TripDetail {
            begin_trip_time: Some("2025-03-09T18:55:00Z".into()),
            waypoints: vec!["Home St".into(), "Stop".into(), "Al Tabeer".into()],
        };
        let trip = build_trip(activity, detail, &range, "USD", &utc()).unwrap();
        assert_eq!(trip.timestamp, Utc.with_ymd_and_hms(2025, 3, 9, 18, 55, 0).unwrap());
        assert_eq!(trip.pickup, "Home St");
        assert_eq!(trip.dropoff, "Al Tabeer");
        assert_eq!(trip.fare, Money::from_cents(12340));
        assert_eq!(trip.currency, "EGP");
        assert_eq!(trip.receipt_ref.as_deref(), Some("t-9"));
    }

    #[test]
    fn build_trip_falls_back_to_subtitle() {
        let range = DateRange::month(2025, 3).unwrap();
        let activity = Activity {
            uuid: "t-2".into(),
            description: "Trip".into(),
            subtitle: "Mar 2 • 7:30 AM".into(),
        };
        let trip = build_trip(activity, TripDetail::default(), &range, "EGP", &utc()).unwrap();
        assert_eq!(trip.timestamp, Utc.with_ymd_and_hms(2025, 3, 2, 7, 30, 0).unwrap());
        assert_eq!(trip.fare, Money::zero());
        assert_eq!(trip.pickup, "");
    }

    #[test]
    fn build_trip_without_time_is_none() {
        let range = DateRange::month(2025, 3).unwrap();
        let activity = Activity {
            uuid: "t-3".into(),
            description: "EGP 10".into(),
            subtitle: String::new(),
        };
        assert!(build_trip(activity, TripDetail::default(), &range, "EGP", &utc()).is_none());
    }

    #[test]
    fn malformed_detail_keeps_trip_without_addresses() {
        let (detail, warning) =
            recover_detail("t-4", FetchError::Malformed("missing field `trip`".into())).unwrap();
        assert!(matches!(
            &warning,
            Warning::TripDetailUnavailable { trip_id, reason }
                if trip_id.as_str() == "t-4" && reason.contains("missing field")
        ));

        let range = DateRange::month(2025, 3).unwrap();
        let activity = Activity {
            uuid: "t-4".into(),
            description: "EGP 40.00".into(),
            subtitle: "Mar 4 • 9:10 AM".into(),
        };
        let trip = build_trip(activity, detail, &range, "EGP", &utc()).unwrap();
        assert_eq!(trip.pickup, "");
        assert_eq!(trip.dropoff, "");
        assert_eq!(trip.fare, Money::from_cents(4000));
        assert_eq!(trip.purpose, PurposeLabel::Unclassified);
    }

    #[test]
    fn session_and_retryable_detail_failures_stop_the_fetch() {
        assert!(matches!(
            recover_detail("t-5", FetchError::Authentication("expired".into())),
            Err(FetchError::Authentication(_))
        ));
        assert!(matches!(
            recover_detail("t-5", FetchError::Transient("HTTP 503".into())),
            Err(FetchError::Transient(_))
        ));
    }

    #[test]
    fn subtitle_fallback_uses_configured_offset() {
        let range = DateRange::month(2025, 3).unwrap();
        let activity = Activity {
            uuid: "t-6".into(),
            description: "EGP 20".into(),
            subtitle: "Mar 1 • 1:30 AM".into(),
        };
        let offset = local_offset(120);
        let trip = build_trip(activity, TripDetail::default(), &range, "EGP", &offset).unwrap();
        assert_eq!(trip.timestamp, Utc.with_ymd_and_hms(2025, 2, 28, 23, 30, 0).unwrap());
        assert_eq!(local_offset(i32::MAX), utc());
    }

    #[test]
    fn credential_trims_and_redacts() {
        let c = Credential::new("  sid=abc; csid=def \n").unwrap();
        assert_eq!(c.expose(), "sid=abc; csid=def");
        assert_eq!(format!("{c:?}"), "Credential(<redacted>)");
        assert!(matches!(Credential::new("   "), Err(CredentialError::Empty)));
    }

    #[test]
    fn credential_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.txt");
        std::fs::write(&path, "sid=xyz\n").unwrap();
        assert_eq!(Credential::from_file(&path).unwrap().expose(), "sid=xyz");

        std::fs::write(&path, "\n").unwrap();
        assert!(matches!(
            Credential::from_file(&path),
            Err(CredentialError::EmptyFile(_))
        ));
        assert!(matches!(
            Credential::from_file(&dir.path().join("missing.txt")),
            Err(CredentialError::Io { .. })
        ));
    }
}
