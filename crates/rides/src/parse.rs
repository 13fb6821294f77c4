use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use std::sync::OnceLock;
use tripclaim_core::Money;

fn re_fare() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| {
        Regex::new(r"(?:\b([A-Z]{3})\s*)?(\d[\d,]*(?:\.\d+)?)").expect("invalid regex")
    })
}

/// Pulls the fare out of an activity description such as `EGP 123.45` or
/// `EGP123.45 • Canceled`. The first number wins; a three-letter prefix is
/// taken as the currency code.
pub fn parse_fare(description: &str, default_currency: &str) -> Option<(Money, String)> {
    let caps = re_fare().captures(description)?;
    let amount: Money = caps.get(2)?.as_str().parse().ok()?;
    let currency = caps
        .get(1)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| default_currency.to_string());
    Some((amount, currency))
}

pub fn is_canceled_or_unfulfilled(description: &str) -> bool {
    let d = description.to_lowercase();
    d.contains("canceled") || d.contains("cancelled") || d.contains("unfulfilled")
}

/// Trip start time as reported by the detail endpoint: RFC 3339 text or
/// epoch milliseconds.
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    raw.parse::<i64>().ok().and_then(DateTime::<Utc>::from_timestamp_millis)
}

/// Parses the feed's human-readable time, either `Aug 31, 2025, 10:15 AM`
/// or the year-less `Mar 3 • 8:00 AM`, which gets `fallback_year`. The text
/// is wall-clock time at `offset` and is returned in UTC.
pub fn parse_subtitle(
    subtitle: &str,
    fallback_year: i32,
    offset: &FixedOffset,
) -> Option<DateTime<Utc>> {
    let cleaned = subtitle
        .replace('•', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    let naive = NaiveDateTime::parse_from_str(&cleaned, "%b %d, %Y, %I:%M %p").or_else(|_| {
        NaiveDateTime::parse_from_str(&format!("{cleaned} {fallback_year}"), "%b %d %I:%M %p %Y")
    });
    offset
        .from_local_datetime(&naive.ok()?)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}
