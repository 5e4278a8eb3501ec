//! Bucket widths accepted by aggregated queries.
//!
//! Intervals only ever travel through the crate as [`Interval`] values. A
//! caller's literal is resolved once, in [`Interval::parse`], and anything
//! outside the allowed set is refused there.

use std::fmt;

use chrono::{DateTime, Datelike, TimeZone, Utc};

use crate::{Result, TimeseriesError};

const MICROS_PER_SECOND: i64 = 1_000_000;

/// Default `time_bucket` origin: Monday 2000-01-03 00:00:00 UTC.
const BUCKET_ORIGIN_MICROS: i64 = 946_857_600 * MICROS_PER_SECOND;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Interval {
    OneSecond,
    FiveSeconds,
    TenSeconds,
    ThirtySeconds,
    OneMinute,
    FiveMinutes,
    TenMinutes,
    ThirtyMinutes,
    OneHour,
    TwoHours,
    SixHours,
    TwelveHours,
    OneDay,
    SevenDays,
    OneMonth,
}

impl Interval {
    /// Every allowed interval, narrowest first.
    pub const ALL: [Interval; 15] = [
        Interval::OneSecond,
        Interval::FiveSeconds,
        Interval::TenSeconds,
        Interval::ThirtySeconds,
        Interval::OneMinute,
        Interval::FiveMinutes,
        Interval::TenMinutes,
        Interval::ThirtyMinutes,
        Interval::OneHour,
        Interval::TwoHours,
        Interval::SixHours,
        Interval::TwelveHours,
        Interval::OneDay,
        Interval::SevenDays,
        Interval::OneMonth,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::OneSecond => "1s",
            Interval::FiveSeconds => "5s",
            Interval::TenSeconds => "10s",
            Interval::ThirtySeconds => "30s",
            Interval::OneMinute => "1m",
            Interval::FiveMinutes => "5m",
            Interval::TenMinutes => "10m",
            Interval::ThirtyMinutes => "30m",
            Interval::OneHour => "1h",
            Interval::TwoHours => "2h",
            Interval::SixHours => "6h",
            Interval::TwelveHours => "12h",
            Interval::OneDay => "1d",
            Interval::SevenDays => "7d",
            Interval::OneMonth => "1mo",
        }
    }

    /// Resolve a caller-supplied literal.
    ///
    /// Accepts the canonical short form (`1h`) and the long form existing
    /// clients send (`1 hour`, `5 minutes`, `1 week`). Surrounding whitespace
    /// and case are ignored; nothing else is.
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        let interval = match normalized.as_str() {
            "1s" | "1 second" => Interval::OneSecond,
            "5s" | "5 seconds" => Interval::FiveSeconds,
            "10s" | "10 seconds" => Interval::TenSeconds,
            "30s" | "30 seconds" => Interval::ThirtySeconds,
            "1m" | "1 minute" => Interval::OneMinute,
            "5m" | "5 minutes" => Interval::FiveMinutes,
            "10m" | "10 minutes" => Interval::TenMinutes,
            "30m" | "30 minutes" => Interval::ThirtyMinutes,
            "1h" | "1 hour" => Interval::OneHour,
            "2h" | "2 hours" => Interval::TwoHours,
            "6h" | "6 hours" => Interval::SixHours,
            "12h" | "12 hours" => Interval::TwelveHours,
            "1d" | "1 day" => Interval::OneDay,
            "7d" | "7 days" | "1 week" => Interval::SevenDays,
            "1mo" | "1 month" => Interval::OneMonth,
            _ => {
                return Err(TimeseriesError::InvalidInterval {
                    interval: raw.to_string(),
                    allowed: Self::allowed_list(),
                })
            }
        };
        Ok(interval)
    }

    /// The allowed set as shown to callers, ordered by bucket width.
    pub fn allowed_list() -> String {
        Self::ALL
            .iter()
            .map(Interval::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Width in microseconds, or `None` for calendar months.
    fn fixed_width_micros(&self) -> Option<i64> {
        let seconds = match self {
            Interval::OneSecond => 1,
            Interval::FiveSeconds => 5,
            Interval::TenSeconds => 10,
            Interval::ThirtySeconds => 30,
            Interval::OneMinute => 60,
            Interval::FiveMinutes => 5 * 60,
            Interval::TenMinutes => 10 * 60,
            Interval::ThirtyMinutes => 30 * 60,
            Interval::OneHour => 3_600,
            Interval::TwoHours => 2 * 3_600,
            Interval::SixHours => 6 * 3_600,
            Interval::TwelveHours => 12 * 3_600,
            Interval::OneDay => 86_400,
            Interval::SevenDays => 7 * 86_400,
            Interval::OneMonth => return None,
        };
        Some(seconds * MICROS_PER_SECOND)
    }

    /// Start of the half-open bucket `[start, start + width)` containing `time`.
    pub fn bucket_start(&self, time: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let start = match self.fixed_width_micros() {
            Some(width) => {
                let offset = time.timestamp_micros() - BUCKET_ORIGIN_MICROS;
                let floored = BUCKET_ORIGIN_MICROS + offset.div_euclid(width) * width;
                DateTime::from_timestamp_micros(floored)
            }
            None => Utc
                .with_ymd_and_hms(time.year(), time.month(), 1, 0, 0, 0)
                .single(),
        };

        start.ok_or_else(|| {
            TimeseriesError::Internal(format!(
                "cannot compute {} bucket for {}",
                self.as_str(),
                time
            ))
        })
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
