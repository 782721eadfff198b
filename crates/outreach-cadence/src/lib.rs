//! # Outreach Cadence
//!
//! Pure computation of recurrence timestamps. Given a cadence rule and an
//! anchor instant, produce the next occurrence or a bounded list of them.
//! No I/O, no clock reads — everything is a function of its inputs, so the
//! same inputs always yield the same timestamps whether a campaign is
//! materialized eagerly up front or extended one job at a time at dispatch.
//!
//! All arithmetic is in UTC. Month shifts preserve the anchor's day-of-month
//! and clamp to the target month's last day when it is shorter
//! (Jan 31 -> Feb 28/29).

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};

use outreach_core::error::{OutreachError, Result};
use outreach_core::types::{CadenceType, CustomInterval, IntervalUnit};

/// Compute the next occurrence after `anchor`, or `None` for `single`.
///
/// The anchor is the *scheduled* time of the occurrence just completed, not
/// the wall-clock time it actually went out, so late sends do not drift the
/// cadence.
pub fn next_occurrence(
    cadence: CadenceType,
    data: Option<&CustomInterval>,
    anchor: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match cadence {
        CadenceType::Single => None,
        CadenceType::Weekly => Some(anchor + Duration::days(7)),
        CadenceType::Biweekly => Some(anchor + Duration::days(14)),
        CadenceType::Monthly => Some(add_months_clamped(anchor, 1)),
        CadenceType::EveryOtherMonth => Some(add_months_clamped(anchor, 2)),
        CadenceType::Quarterly => Some(add_months_clamped(anchor, 3)),
        CadenceType::Custom => {
            // Validated at campaign creation; a missing interval here means
            // the row predates validation — treat as non-recurring.
            let interval = data?;
            let n = interval.n as i64;
            Some(match interval.unit {
                IntervalUnit::Days => anchor + Duration::days(n),
                IntervalUnit::Weeks => anchor + Duration::days(n * 7),
                IntervalUnit::Months => add_months_clamped(anchor, interval.n),
            })
        }
    }
}

/// Produce the first `count` occurrences starting at `anchor`.
///
/// `single` always yields exactly the anchor. For recurring cadences this is
/// the fold of [`next_occurrence`], which is also exactly what the dispatcher
/// does one step at a time — eager and lazy scheduling agree by construction.
pub fn materialize(
    cadence: CadenceType,
    data: Option<&CustomInterval>,
    anchor: DateTime<Utc>,
    count: u32,
) -> Vec<DateTime<Utc>> {
    if cadence == CadenceType::Single {
        return vec![anchor];
    }
    let mut out = Vec::with_capacity(count.max(1) as usize);
    let mut current = anchor;
    for _ in 0..count.max(1) {
        out.push(current);
        match next_occurrence(cadence, data, current) {
            Some(next) => current = next,
            None => break,
        }
    }
    out
}

/// Validate a cadence definition at campaign creation time.
///
/// Malformed cadences are rejected here so dispatch never sees one.
pub fn validate(cadence: CadenceType, data: Option<&CustomInterval>) -> Result<()> {
    match cadence {
        CadenceType::Custom => match data {
            None => Err(OutreachError::validation(
                "cadence 'custom' requires cadence_data with n and unit",
            )),
            Some(interval) if interval.n == 0 => Err(OutreachError::validation(
                "cadence 'custom' interval must be at least 1",
            )),
            Some(_) => Ok(()),
        },
        _ => Ok(()),
    }
}

/// Shift `anchor` by `months` calendar months, preserving day-of-month and
/// clamping to the target month's last day when shorter.
fn add_months_clamped(anchor: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    let total = anchor.year() * 12 + anchor.month0() as i32 + months as i32;
    let year = total.div_euclid(12);
    let month0 = total.rem_euclid(12) as u32;
    let day = anchor.day().min(last_day_of_month(year, month0 + 1));

    Utc.with_ymd_and_hms(
        year,
        month0 + 1,
        day,
        anchor.hour(),
        anchor.minute(),
        anchor.second(),
    )
    .single()
    // Unreachable for clamped Y/M/D in UTC, but never panic on a date.
    .unwrap_or(anchor)
}

fn last_day_of_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        _ => {
            if is_leap_year(year) {
                29
            } else {
                28
            }
        }
    }
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}
