//! Temporal value support for Nodus
//!
//! Dates are stored as days since the Unix epoch, datetimes as UTC
//! milliseconds since the epoch, and durations as a calendar-aware
//! (months, days, seconds, nanoseconds) quadruple.

use crate::error::{Error, Result};
use chrono::{DateTime, Datelike, Months, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const NANOS_PER_SECOND: i64 = 1_000_000_000;
const SECONDS_PER_DAY: i64 = 86_400;

/// A duration with separate calendar and clock components
///
/// Months and days are kept apart from seconds because their length
/// depends on the date they are applied to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DurationValue {
    pub months: i64,
    pub days: i64,
    pub seconds: i64,
    pub nanos: i32,
}

impl DurationValue {
    /// Create a normalized duration, failing if the carried seconds overflow
    pub fn new(months: i64, days: i64, seconds: i64, nanos: i64) -> Result<Self> {
        let seconds = seconds
            .checked_add(nanos.div_euclid(NANOS_PER_SECOND))
            .ok_or_else(|| out_of_range("duration"))?;
        let nanos = nanos.rem_euclid(NANOS_PER_SECOND) as i32;
        Ok(Self {
            months,
            days,
            seconds,
            nanos,
        })
    }

    /// Duration between two UTC millisecond instants
    pub fn between_millis(from: i64, to: i64) -> Result<Self> {
        let delta = to.checked_sub(from).ok_or_else(|| out_of_range("duration"))?;
        Self::new(0, 0, delta.div_euclid(1000), delta.rem_euclid(1000) * 1_000_000)
    }

    /// Approximate length in milliseconds, using 30-day months
    ///
    /// Widened to `i128` so every representable duration has a length.
    pub fn approx_millis(&self) -> i128 {
        let days = i128::from(self.months) * 30 + i128::from(self.days);
        (days * i128::from(SECONDS_PER_DAY) + i128::from(self.seconds)) * 1000
            + i128::from(self.nanos) / 1_000_000
    }

    /// Total milliseconds of the clock component
    pub fn clock_millis(&self) -> Option<i64> {
        self.seconds
            .checked_mul(1000)?
            .checked_add(i64::from(self.nanos) / 1_000_000)
    }

    /// Component-wise negation
    pub fn negate(&self) -> Result<Self> {
        let neg = |v: i64| v.checked_neg().ok_or_else(|| out_of_range("duration"));
        Self::new(
            neg(self.months)?,
            neg(self.days)?,
            neg(self.seconds)?,
            -i64::from(self.nanos),
        )
    }

    /// Component-wise sum
    pub fn add(&self, other: &DurationValue) -> Result<Self> {
        let sum = |a: i64, b: i64| a.checked_add(b).ok_or_else(|| out_of_range("duration"));
        Self::new(
            sum(self.months, other.months)?,
            sum(self.days, other.days)?,
            sum(self.seconds, other.seconds)?,
            i64::from(self.nanos) + i64::from(other.nanos),
        )
    }
}

impl fmt::Display for DurationValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.months == 0 && self.days == 0 && self.seconds == 0 && self.nanos == 0 {
            return write!(f, "PT0S");
        }
        write!(f, "P")?;
        let years = self.months / 12;
        let months = self.months % 12;
        if years != 0 {
            write!(f, "{years}Y")?;
        }
        if months != 0 {
            write!(f, "{months}M")?;
        }
        if self.days != 0 {
            write!(f, "{}D", self.days)?;
        }
        if self.seconds != 0 || self.nanos != 0 {
            write!(f, "T")?;
            let hours = self.seconds / 3600;
            let minutes = (self.seconds % 3600) / 60;
            let seconds = self.seconds % 60;
            if hours != 0 {
                write!(f, "{hours}H")?;
            }
            if minutes != 0 {
                write!(f, "{minutes}M")?;
            }
            if self.nanos != 0 {
                let frac = format!("{:09}", self.nanos);
                write!(f, "{}.{}S", seconds, frac.trim_end_matches('0'))?;
            } else if seconds != 0 {
                write!(f, "{seconds}S")?;
            }
        }
        Ok(())
    }
}

fn invalid(kind: &str, text: &str) -> Error {
    Error::QueryExecution(format!("invalid ISO-8601 {kind}: '{text}'"))
}

fn out_of_range(kind: &str) -> Error {
    Error::QueryExecution(format!("{kind} out of range"))
}

/// `acc + value * scale`, or the parse error for `text` on overflow
fn accumulate(acc: i64, value: i64, scale: i64, text: &str) -> Result<i64> {
    value
        .checked_mul(scale)
        .and_then(|v| acc.checked_add(v))
        .ok_or_else(|| invalid("duration", text))
}

/// Parse an ISO-8601 duration such as `P1Y2M10DT2H30M` or `PT0.5S`
///
/// Weeks (`W`) are accepted and folded into days. A leading `-` negates
/// the whole duration. Only the seconds component may be fractional.
pub fn parse_duration(text: &str) -> Result<DurationValue> {
    let trimmed = text.trim();
    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    let body = body
        .strip_prefix('P')
        .or_else(|| body.strip_prefix('p'))
        .ok_or_else(|| invalid("duration", text))?;
    if body.is_empty() {
        return Err(invalid("duration", text));
    }

    let (date_part, time_part) = match body.find(['T', 't']) {
        Some(pos) => (&body[..pos], Some(&body[pos + 1..])),
        None => (body, None),
    };
    if time_part == Some("") {
        return Err(invalid("duration", text));
    }

    let mut months = 0i64;
    let mut days = 0i64;
    let mut seconds = 0i64;
    let mut nanos = 0i64;

    for (number, unit) in duration_components(date_part, text)? {
        let value: i64 = number.parse().map_err(|_| invalid("duration", text))?;
        match unit {
            'Y' => months = accumulate(months, value, 12, text)?,
            'M' => months = accumulate(months, value, 1, text)?,
            'W' => days = accumulate(days, value, 7, text)?,
            'D' => days = accumulate(days, value, 1, text)?,
            _ => return Err(invalid("duration", text)),
        }
    }

    if let Some(time_part) = time_part {
        for (number, unit) in duration_components(time_part, text)? {
            if unit == 'S' {
                let (whole, frac) = match number.split_once('.') {
                    Some((w, f)) => (w, f),
                    None => (number, ""),
                };
                let whole = whole.parse::<i64>().map_err(|_| invalid("duration", text))?;
                seconds = accumulate(seconds, whole, 1, text)?;
                if !frac.is_empty() {
                    if frac.len() > 9 || !frac.bytes().all(|b| b.is_ascii_digit()) {
                        return Err(invalid("duration", text));
                    }
                    let padded = format!("{frac:0<9}");
                    nanos += padded.parse::<i64>().map_err(|_| invalid("duration", text))?;
                }
                continue;
            }
            let value: i64 = number.parse().map_err(|_| invalid("duration", text))?;
            match unit {
                'H' => seconds = accumulate(seconds, value, 3600, text)?,
                'M' => seconds = accumulate(seconds, value, 60, text)?,
                _ => return Err(invalid("duration", text)),
            }
        }
    }

    let duration = DurationValue::new(months, days, seconds, nanos)
        .map_err(|_| invalid("duration", text))?;
    if negative { duration.negate() } else { Ok(duration) }
}

fn duration_components<'a>(part: &'a str, text: &str) -> Result<Vec<(&'a str, char)>> {
    let mut out = Vec::new();
    let mut start = 0;
    for (idx, ch) in part.char_indices() {
        if ch.is_ascii_digit() || ch == '.' || (ch == '-' && idx == start) {
            continue;
        }
        if idx == start {
            return Err(invalid("duration", text));
        }
        out.push((&part[start..idx], ch.to_ascii_uppercase()));
        start = idx + ch.len_utf8();
    }
    if start != part.len() {
        return Err(invalid("duration", text));
    }
    Ok(out)
}

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

/// Days since the Unix epoch for a calendar date
pub fn date_to_days(date: NaiveDate) -> i32 {
    date.signed_duration_since(epoch()).num_days() as i32
}

/// Calendar date for a day count since the Unix epoch
pub fn days_to_date(days: i32) -> Option<NaiveDate> {
    epoch().checked_add_signed(TimeDelta::try_days(i64::from(days))?)
}

/// Build a date from year, month and day components
pub fn date_from_parts(year: i64, month: i64, day: i64) -> Result<i32> {
    let invalid_date = || Error::QueryExecution(format!("invalid date {year}-{month}-{day}"));
    let date = NaiveDate::from_ymd_opt(
        i32::try_from(year).map_err(|_| invalid_date())?,
        u32::try_from(month).map_err(|_| invalid_date())?,
        u32::try_from(day).map_err(|_| invalid_date())?,
    )
    .ok_or_else(invalid_date)?;
    Ok(date_to_days(date))
}

/// Parse an ISO-8601 calendar date (`YYYY-MM-DD`)
pub fn parse_date(text: &str) -> Result<i32> {
    let date = NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
        .map_err(|_| invalid("date", text))?;
    Ok(date_to_days(date))
}

/// Parse an ISO-8601 datetime into UTC milliseconds
///
/// Accepts RFC 3339 strings with an offset, naive datetimes (taken as
/// UTC) and bare dates (midnight UTC).
pub fn parse_datetime(text: &str) -> Result<i64> {
    let text_trimmed = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text_trimmed) {
        return Ok(dt.with_timezone(&Utc).timestamp_millis());
    }
    for pattern in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text_trimmed, pattern) {
            return Ok(naive.and_utc().timestamp_millis());
        }
    }
    let days = parse_date(text_trimmed).map_err(|_| invalid("datetime", text))?;
    Ok(i64::from(days) * SECONDS_PER_DAY * 1000)
}

/// Current date in UTC as days since the epoch
pub fn today() -> i32 {
    date_to_days(Utc::now().date_naive())
}

/// Current instant as UTC milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Format days since the epoch as `YYYY-MM-DD`
pub fn format_date(days: i32) -> String {
    match days_to_date(days) {
        Some(date) => date.format("%Y-%m-%d").to_string(),
        None => format!("date({days})"),
    }
}

/// Format UTC milliseconds as an RFC 3339 string with millisecond precision
pub fn format_datetime(millis: i64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(millis) {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        None => format!("datetime({millis})"),
    }
}

fn shift_months(date: NaiveDate, months: i64) -> Option<NaiveDate> {
    if months >= 0 {
        date.checked_add_months(Months::new(u32::try_from(months).ok()?))
    } else {
        date.checked_sub_months(Months::new(u32::try_from(-months).ok()?))
    }
}

/// Add a duration to a date; the clock component is truncated to whole days
pub fn add_duration_to_date(days: i32, duration: &DurationValue) -> Result<i32> {
    let date = days_to_date(days)
        .and_then(|d| shift_months(d, duration.months))
        .ok_or_else(|| out_of_range("date"))?;
    let total = duration
        .days
        .checked_add(duration.seconds.div_euclid(SECONDS_PER_DAY))
        .and_then(|extra| i64::from(date_to_days(date)).checked_add(extra))
        .and_then(|days| i32::try_from(days).ok())
        .ok_or_else(|| out_of_range("date"))?;
    days_to_date(total).ok_or_else(|| out_of_range("date"))?;
    Ok(total)
}

/// Add a duration to a UTC millisecond instant
pub fn add_duration_to_datetime(millis: i64, duration: &DurationValue) -> Result<i64> {
    let dt = DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| out_of_range("datetime"))?;
    let date = shift_months(dt.date_naive(), duration.months)
        .ok_or_else(|| out_of_range("datetime"))?;
    let shifted = date.and_time(dt.time()).and_utc().timestamp_millis();
    duration
        .days
        .checked_mul(SECONDS_PER_DAY * 1000)
        .zip(duration.clock_millis())
        .and_then(|(days, clock)| days.checked_add(clock))
        .and_then(|delta| shifted.checked_add(delta))
        .ok_or_else(|| out_of_range("datetime"))
}

/// Year, month and day of a date, for property access such as `d.year`
pub fn date_component(days: i32, component: &str) -> Option<i64> {
    let date = days_to_date(days)?;
    match component {
        "year" => Some(i64::from(date.year())),
        "month" => Some(i64::from(date.month())),
        "day" => Some(i64::from(date.day())),
        "dayOfWeek" => Some(i64::from(date.weekday().number_from_monday())),
        "ordinalDay" => Some(i64::from(date.ordinal())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_duration() {
        let d = parse_duration("P1Y2M10DT2H30M15S").unwrap();
        assert_eq!(d.months, 14);
        assert_eq!(d.days, 10);
        assert_eq!(d.seconds, 2 * 3600 + 30 * 60 + 15);
        assert_eq!(d.nanos, 0);
    }

    #[test]
    fn test_parse_weeks_and_fraction() {
        let d = parse_duration("P2W").unwrap();
        assert_eq!(d.days, 14);

        let d = parse_duration("PT1.5S").unwrap();
        assert_eq!(d.seconds, 1);
        assert_eq!(d.nanos, 500_000_000);
    }

    #[test]
    fn test_parse_negative_duration() {
        let d = parse_duration("-P3D").unwrap();
        assert_eq!(d.days, -3);
    }

    #[test]
    fn test_reject_malformed_durations() {
        for text in ["", "P", "PT", "1D", "P1X", "PT1.5H", "P1DT", "PXD"] {
            assert!(parse_duration(text).is_err(), "{text} should be rejected");
        }
    }

    #[test]
    fn test_duration_display() {
        let d = parse_duration("P1Y2M10DT2H30M").unwrap();
        assert_eq!(d.to_string(), "P1Y2M10DT2H30M");
        assert_eq!(DurationValue::default().to_string(), "PT0S");
        assert_eq!(parse_duration("PT0.25S").unwrap().to_string(), "PT0.25S");
    }

    #[test]
    fn test_date_round_trip() {
        let days = parse_date("2024-02-29").unwrap();
        assert_eq!(format_date(days), "2024-02-29");
        assert_eq!(parse_date("1970-01-01").unwrap(), 0);
        assert!(parse_date("2023-02-29").is_err());
    }

    #[test]
    fn test_parse_datetime_forms() {
        assert_eq!(parse_datetime("1970-01-01T00:00:01Z").unwrap(), 1000);
        assert_eq!(parse_datetime("1970-01-01T01:00:00+01:00").unwrap(), 0);
        assert_eq!(parse_datetime("1970-01-02").unwrap(), 86_400_000);
        assert_eq!(format_datetime(1000), "1970-01-01T00:00:01.000Z");
    }

    #[test]
    fn test_add_duration_to_date() {
        let jan31 = parse_date("2024-01-31").unwrap();
        let one_month = parse_duration("P1M").unwrap();
        assert_eq!(
            format_date(add_duration_to_date(jan31, &one_month).unwrap()),
            "2024-02-29"
        );
    }

    #[test]
    fn test_duration_overflow_is_an_error() {
        for text in [
            "P999999999999999999Y",
            "P9223372036854775807W",
            "PT9223372036854775807H",
            "P9223372036854775807M9223372036854775807M",
        ] {
            assert!(
                matches!(parse_duration(text), Err(Error::QueryExecution(_))),
                "{text} should overflow"
            );
        }

        let max = DurationValue::new(0, 0, i64::MAX, 0).unwrap();
        assert!(DurationValue::new(0, 0, i64::MAX, 1_000_000_000).is_err());
        assert!(max.add(&max).is_err());
        assert!(DurationValue::new(i64::MIN, 0, 0, 0).unwrap().negate().is_err());
        assert!(DurationValue::between_millis(i64::MIN, i64::MAX).is_err());
        assert_eq!(max.clock_millis(), None);
        assert!(max.approx_millis() > i128::from(i64::MAX));
    }

    #[test]
    fn test_add_duration_out_of_range() {
        let huge = DurationValue::new(0, i64::MAX, 0, 0).unwrap();
        assert!(add_duration_to_date(0, &huge).is_err());
        assert!(add_duration_to_datetime(0, &huge).is_err());
        assert!(date_from_parts(i64::from(i32::MAX) + 2021, 1, 1).is_err());
        assert!(date_from_parts(2021, -1, 1).is_err());
    }

    #[test]
    fn test_date_component() {
        let days = parse_date("2021-07-04").unwrap();
        assert_eq!(date_component(days, "year"), Some(2021));
        assert_eq!(date_component(days, "month"), Some(7));
        assert_eq!(date_component(days, "day"), Some(4));
        assert_eq!(date_component(days, "hour"), None);
    }
}
