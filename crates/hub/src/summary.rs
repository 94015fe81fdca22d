//! Daily rollups derived from the raw logs.
//!
//! Lighting minutes come from replaying the day's ON/OFF events as a step
//! function that starts OFF at 00:00.  An interval still ON at the end of the
//! log is closed at "now" for today and at 23:59 for past days.  Each closed
//! interval contributes `(seconds + 5) / 60` whole minutes; the 5-second bias
//! keeps 29m59s-style captures from dropping a minute.
//!
//! Summaries are always recomputed from scratch, so running a refresh twice
//! over unchanged data writes the same row.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use time::{Date, PrimitiveDateTime};

use crate::clock::{self, END_OF_DAY};
use crate::db::{Db, LightEvent, SummaryRow, TemperatureSample};

/// One ON span, `start < end` not guaranteed for same-minute toggles.
pub type Interval = (PrimitiveDateTime, PrimitiveDateTime);

// ---------------------------------------------------------------------------
// Interval reconstruction
// ---------------------------------------------------------------------------

/// Where a still-open ON interval on `date` ends.
pub fn closing_time(date: Date, now: PrimitiveDateTime) -> PrimitiveDateTime {
    if now.date() == date {
        now
    } else {
        date.with_time(END_OF_DAY)
    }
}

/// Closed ON intervals for a day's ordered `(timestamp, on)` steps.
pub fn on_intervals(
    steps: &[(PrimitiveDateTime, bool)],
    close_at: PrimitiveDateTime,
) -> Vec<Interval> {
    let mut out = Vec::new();
    let mut started: Option<PrimitiveDateTime> = None;

    for &(at, on) in steps {
        match (started, on) {
            (None, true) => started = Some(at),
            (Some(from), false) => {
                out.push((from, at));
                started = None;
            }
            _ => {} // repeated value
        }
    }
    if let Some(from) = started {
        out.push((from, close_at.max(from)));
    }
    out
}

/// Whole minutes for one interval, with the +5 s bias.
pub fn interval_minutes((start, end): Interval) -> i64 {
    ((end - start).whole_seconds() + 5) / 60
}

pub fn lighting_minutes(intervals: &[Interval]) -> i64 {
    intervals.iter().copied().map(interval_minutes).sum()
}

/// Parse stored light rows into steps.  Unparseable rows are skipped.
pub fn light_steps(events: &[LightEvent]) -> Vec<(PrimitiveDateTime, bool)> {
    events
        .iter()
        .filter_map(|e| match clock::parse_datetime(&e.datetime) {
            Ok(at) => Some((at, e.value != 0)),
            Err(err) => {
                tracing::warn!(datetime = %e.datetime, %err, "skipping unparseable light row");
                None
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Temperature
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TemperatureStats {
    pub max: f64,
    pub min: f64,
    /// Midrange, `(max + min) / 2`, not the sample average.
    pub mean: f64,
}

pub fn temperature_stats(samples: &[TemperatureSample]) -> Option<TemperatureStats> {
    let mut temps = samples.iter().map(|s| s.temperature);
    let first = temps.next()?;
    let (max, min) = temps.fold((first, first), |(hi, lo), t| (hi.max(t), lo.min(t)));
    Some(TemperatureStats {
        max,
        min,
        mean: (max + min) / 2.0,
    })
}

// ---------------------------------------------------------------------------
// Recompute against the store
// ---------------------------------------------------------------------------

/// Lighting for `date`, rebuilt from the light log and upserted.
/// A day with no light events is left alone so it stays out of the table.
pub async fn refresh_lighting(
    db: &Db,
    date: Date,
    now: PrimitiveDateTime,
) -> Result<(i64, Vec<Interval>)> {
    let key = clock::format_date(date);
    let events = db.light_events_on(&key).await?;
    if events.is_empty() {
        return Ok((0, Vec::new()));
    }
    let intervals = on_intervals(&light_steps(&events), closing_time(date, now));
    let minutes = lighting_minutes(&intervals);

    db.upsert_lighting_minutes(&key, minutes)
        .await
        .with_context(|| format!("refresh_lighting {key}"))?;
    tracing::debug!(date = %key, minutes, intervals = intervals.len(), "lighting refreshed");
    Ok((minutes, intervals))
}

/// Temperature rollup for `date`.  A day without samples is left alone.
pub async fn refresh_temperature(db: &Db, date: Date) -> Result<Option<TemperatureStats>> {
    let key = clock::format_date(date);
    let samples = db.temperatures_on(&key).await?;
    let Some(stats) = temperature_stats(&samples) else {
        return Ok(None);
    };

    db.upsert_temperature_summary(&key, stats.max, stats.min, stats.mean)
        .await
        .with_context(|| format!("refresh_temperature {key}"))?;
    tracing::debug!(date = %key, max = stats.max, min = stats.min, "temperature refreshed");
    Ok(Some(stats))
}

// ---------------------------------------------------------------------------
// Multi-day cumulative summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SummaryEntry {
    pub max_temp: Option<f64>,
    pub min_temp: Option<f64>,
    pub mean_temp: Option<f64>,
    pub lighting_minutes: Option<i64>,
    pub lighting_minutes_sum: Option<i64>,
    pub mean_temp_sum: Option<f64>,
}

/// Running totals over `history` (ascending by date).  A missing value
/// yields `None` for its own row while the total carries on past it.
fn running_totals(history: &[SummaryRow]) -> BTreeMap<&str, (Option<i64>, Option<f64>)> {
    let (mut minutes, mut temps) = (0_i64, 0.0_f64);
    history
        .iter()
        .map(|row| {
            let m = row.lighting_minutes.map(|v| {
                minutes += v;
                minutes
            });
            let t = row.mean_temp.map(|v| {
                temps += v;
                temps
            });
            (row.date.as_str(), (m, t))
        })
        .collect()
}

/// Join the display window onto running totals that started at
/// `cumsum_date`.  Both inputs come from `summary` ordered by date string.
pub fn cumulative_window(
    window: &[SummaryRow],
    history: &[SummaryRow],
) -> BTreeMap<String, SummaryEntry> {
    let totals = running_totals(history);
    window
        .iter()
        .map(|row| {
            let (minutes_sum, temp_sum) =
                totals.get(row.date.as_str()).copied().unwrap_or_default();
            (
                row.date.clone(),
                SummaryEntry {
                    max_temp: row.max_temp,
                    min_temp: row.min_temp,
                    mean_temp: row.mean_temp,
                    lighting_minutes: row.lighting_minutes,
                    lighting_minutes_sum: minutes_sum,
                    mean_temp_sum: temp_sum,
                },
            )
        })
        .collect()
}

/// The last `days` days ending at `to`, with totals since `cumsum_date`.
pub async fn summary_table(
    db: &Db,
    cumsum_date: Date,
    to: Date,
    days: u32,
) -> Result<BTreeMap<String, SummaryEntry>> {
    let to_key = clock::format_date(to);
    let from = clock::window_start(to, days)
        .with_context(|| format!("{days}-day window before {to} is out of range"))?;
    let from_key = clock::format_date(from);
    let window = db.summary_range(&from_key, &to_key).await?;
    let history = db
        .summary_range(&clock::format_date(cumsum_date), &to_key)
        .await?;
    Ok(cumulative_window(&window, &history))
}
