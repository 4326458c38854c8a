//! Timestamp to window-start mapping.

use crate::models::WindowSize;
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};

/// Start of the window of `granularity` that contains `ts`.
///
/// Sub-day intervals and days are aligned to the UTC epoch. Weeks start on
/// Sunday. Months start on the calendar 1st, or on the anchor's day of
/// month when a billing anchor is given.
pub fn bucket_start(
    ts: DateTime<Utc>,
    granularity: WindowSize,
    billing_anchor: Option<DateTime<Utc>>,
) -> DateTime<Utc> {
    match granularity {
        WindowSize::Minute => floor_seconds(ts, 60),
        WindowSize::FifteenMinutes => floor_seconds(ts, 15 * 60),
        WindowSize::ThirtyMinutes => floor_seconds(ts, 30 * 60),
        WindowSize::Hour => floor_seconds(ts, 3600),
        WindowSize::ThreeHours => floor_seconds(ts, 3 * 3600),
        WindowSize::SixHours => floor_seconds(ts, 6 * 3600),
        WindowSize::TwelveHours => floor_seconds(ts, 12 * 3600),
        WindowSize::Day => floor_seconds(ts, 86_400),
        WindowSize::Week => {
            let date = ts.date_naive();
            let back = i64::from(date.weekday().num_days_from_sunday());
            midnight(date - Duration::days(back)).unwrap_or(ts)
        }
        WindowSize::Month => match billing_anchor {
            Some(anchor) if anchor.day() > 1 => {
                let offset = Duration::days(i64::from(anchor.day() - 1));
                let shifted = ts - offset;
                month_start(shifted).map(|m| m + offset).unwrap_or(ts)
            }
            _ => month_start(ts).unwrap_or(ts),
        },
    }
}

fn floor_seconds(ts: DateTime<Utc>, interval: i64) -> DateTime<Utc> {
    let secs = ts.timestamp();
    let floored = secs - secs.rem_euclid(interval);
    Utc.timestamp_opt(floored, 0).single().unwrap_or(ts)
}

fn month_start(ts: DateTime<Utc>) -> Option<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(ts.year(), ts.month(), 1).and_then(midnight)
}

fn midnight(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive))
}
