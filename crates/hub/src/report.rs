//! Store-backed views: record a reading, then recompute and redraw whatever
//! depends on it.

use anyhow::Result;
use serde::Serialize;
use time::{Date, PrimitiveDateTime, Time};

use crate::clock;
use crate::db::{Db, SummaryRow};
use crate::ephem::{self, EphemError, Ephemeris, Site};
use crate::graph::{self, DayFrame};
use crate::summary;

#[derive(Debug, Serialize)]
pub struct DailyCharts {
    pub light_b64: String,
    pub temp_b64: String,
    pub lighting_minutes: i64,
    pub mean_temp: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct SummaryCharts {
    pub light_b64: String,
    pub temp_b64: String,
}

/// Sunrise/sunset stored for the day, if the ephemeris has been computed.
fn daylight(row: Option<&SummaryRow>) -> Option<(Time, Time)> {
    let row = row?;
    let rise = clock::parse_hhmm(row.sunrise_time.as_deref()?).ok()?;
    let set = clock::parse_hhmm(row.sunset_time.as_deref()?).ok()?;
    Some((rise, set))
}

async fn frame(
    db: &Db,
    date: Date,
    now: PrimitiveDateTime,
) -> Result<(DayFrame, Option<SummaryRow>)> {
    let row = db.get_summary(&clock::format_date(date)).await?;
    let frame = DayFrame {
        date,
        now,
        daylight: daylight(row.as_ref()),
    };
    Ok((frame, row))
}

// ---------------------------------------------------------------------------
// Recording
// ---------------------------------------------------------------------------

/// Log a grow-light state at `now` and return the refreshed light chart.
pub async fn record_light(db: &Db, on: bool, now: PrimitiveDateTime) -> Result<String> {
    db.insert_light(
        &clock::format_date(now.date()),
        &clock::format_datetime(now),
        on,
    )
    .await?;
    let (chart, _) = daily_light(db, now.date(), now).await?;
    Ok(chart)
}

/// Store a climate sample at `now` and return the refreshed temperature chart.
pub async fn record_climate(
    db: &Db,
    temperature: f64,
    humidity: f64,
    now: PrimitiveDateTime,
) -> Result<String> {
    let date = now.date();
    db.insert_temperature(
        &clock::format_date(date),
        &clock::format_datetime(now),
        temperature,
        humidity,
    )
    .await?;
    summary::refresh_temperature(db, date).await?;
    let (chart, _) = daily_temperature(db, date, now).await?;
    Ok(chart)
}

/// Compute the ephemeris for `date` and store it in the day's summary.
/// The outer `Result` is the store; the inner one is the astronomy.
pub async fn record_ephemeris(
    db: &Db,
    site: &Site,
    date: Date,
) -> Result<Result<Ephemeris, EphemError>> {
    let eph = match ephem::compute(site, date) {
        Ok(eph) => eph,
        Err(e) => return Ok(Err(e)),
    };
    db.upsert_ephemeris(
        &clock::format_date(date),
        &eph.sunrise_time,
        &eph.sunset_time,
        eph.moon_phase,
    )
    .await?;
    tracing::info!(
        date = %clock::format_date(date),
        sunrise = %eph.sunrise_time,
        sunset = %eph.sunset_time,
        moon_phase = eph.moon_phase,
        "ephemeris stored"
    );
    Ok(Ok(eph))
}

// ---------------------------------------------------------------------------
// Daily charts
// ---------------------------------------------------------------------------

/// Light chart for `date`; lighting minutes are recomputed and upserted.
pub async fn daily_light(db: &Db, date: Date, now: PrimitiveDateTime) -> Result<(String, i64)> {
    let (minutes, intervals) = summary::refresh_lighting(db, date, now).await?;
    let (frame, _) = frame(db, date, now).await?;
    let chart = graph::png_data_uri(&graph::daily_light_chart(&frame, &intervals, minutes))?;
    Ok((chart, minutes))
}

pub async fn daily_temperature(
    db: &Db,
    date: Date,
    now: PrimitiveDateTime,
) -> Result<(String, Option<f64>)> {
    let (frame, row) = frame(db, date, now).await?;
    let samples: Vec<(PrimitiveDateTime, f64)> = db
        .temperatures_on(&clock::format_date(date))
        .await?
        .into_iter()
        .filter_map(|s| Some((clock::parse_datetime(&s.datetime).ok()?, s.temperature)))
        .collect();
    let mean = row.and_then(|r| r.mean_temp);
    let chart = graph::png_data_uri(&graph::daily_temperature_chart(&frame, &samples, mean))?;
    Ok((chart, mean))
}

pub async fn daily_charts(db: &Db, date: Date, now: PrimitiveDateTime) -> Result<DailyCharts> {
    let (light_b64, lighting_minutes) = daily_light(db, date, now).await?;
    let (temp_b64, mean_temp) = daily_temperature(db, date, now).await?;
    Ok(DailyCharts {
        light_b64,
        temp_b64,
        lighting_minutes,
        mean_temp,
    })
}

// ---------------------------------------------------------------------------
// Summary charts
// ---------------------------------------------------------------------------

pub async fn summary_charts(
    db: &Db,
    cumsum_date: Date,
    to: Date,
    days: u32,
) -> Result<SummaryCharts> {
    let table = summary::summary_table(db, cumsum_date, to, days).await?;
    let labels: Vec<String> = table.keys().map(|k| graph::day_label(k)).collect();
    let rows: Vec<_> = table.values().collect();

    let max: Vec<_> = rows.iter().map(|e| e.max_temp).collect();
    let min: Vec<_> = rows.iter().map(|e| e.min_temp).collect();
    let mean: Vec<_> = rows.iter().map(|e| e.mean_temp).collect();
    let minutes: Vec<_> = rows
        .iter()
        .map(|e| e.lighting_minutes.map(|m| m as f64))
        .collect();

    Ok(SummaryCharts {
        light_b64: graph::png_data_uri(&graph::summary_light_chart(&labels, &minutes))?,
        temp_b64: graph::png_data_uri(&graph::summary_temperature_chart(
            &labels, &max, &min, &mean,
        ))?,
    })
}
