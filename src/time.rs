//! Conversion between the portal's display timestamps (`2022-01-12 6:00 AM`)
//! and minutes since the Unix epoch. The portal's clock is taken as UTC.

use chrono::{DateTime, NaiveDate};

use crate::error::{Result, ScrapeError};

pub const MS_PER_MIN: i64 = 60_000;

/// Parses `YYYY-MM-DD h:MM AM|PM` into minutes since the epoch.
pub fn parse(display: &str) -> Result<i64> {
    let invalid = || ScrapeError::Format(format!("'{display}' is not a YYYY-MM-DD hh:MM AM/PM timestamp"));

    let mut parts = display.split_whitespace();
    let (Some(date), Some(clock), Some(meridiem), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid());
    };

    let mut ymd = date.split('-');
    let (Some(year), Some(month), Some(day), None) = (ymd.next(), ymd.next(), ymd.next(), ymd.next())
    else {
        return Err(invalid());
    };
    let (hour, minute) = clock.split_once(':').ok_or_else(invalid)?;

    if year.len() != 4 || !(1..=2).contains(&month.len()) || !(1..=2).contains(&day.len()) {
        return Err(invalid());
    }
    if !(1..=2).contains(&hour.len()) || minute.len() != 2 {
        return Err(invalid());
    }

    let year: i32 = digits(year).ok_or_else(invalid)?;
    let month: u32 = digits(month).ok_or_else(invalid)?;
    let day: u32 = digits(day).ok_or_else(invalid)?;
    let hour: u32 = digits(hour).ok_or_else(invalid)?;
    let minute: u32 = digits(minute).ok_or_else(invalid)?;

    if !(1..=12).contains(&hour) {
        return Err(invalid());
    }
    let hour = match (meridiem, hour) {
        ("AM", 12) => 0,
        ("PM", 12) => 12,
        ("AM", h) => h,
        ("PM", h) => h + 12,
        _ => return Err(invalid()),
    };

    let instant = NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, 0))
        .ok_or_else(invalid)?;

    Ok(instant.and_utc().timestamp().div_euclid(60))
}

/// Renders minutes since the epoch the way the portal displays them.
pub fn format(minutes: i64) -> String {
    match DateTime::from_timestamp(minutes * 60, 0) {
        Some(instant) => instant.format("%Y-%m-%d %-I:%M %p").to_string(),
        None => String::new(),
    }
}

fn digits<T: std::str::FromStr>(s: &str) -> Option<T> {
    if s.bytes().all(|b| b.is_ascii_digit()) {
        s.parse().ok()
    } else {
        None
    }
}
