//! Sunrise, sunset and lunar age for the greenhouse site.
//!
//! Sun times use the NOAA sunrise equation (Wikipedia form) with the standard
//! -0.833° horizon plus an elevation dip.  Lunar age is days since the
//! previous new moon, found with Meeus' mean-phase series and its main
//! periodic corrections, evaluated at local noon.

use serde::Serialize;
use std::f64::consts::PI;
use time::macros::time;
use time::{Date, OffsetDateTime};

use crate::clock::{self, LOCAL_OFFSET};
use crate::moon;
use crate::settings::SettingsError;

const J2000: f64 = 2_451_545.0;
const UNIX_EPOCH_JD: f64 = 2_440_587.5;
const SECONDS_PER_DAY: f64 = 86_400.0;
const SYNODIC_MONTH: f64 = 29.530_588_861;
/// TT - UT for the 2020s, in days.
const DELTA_T: f64 = 69.0 / SECONDS_PER_DAY;

#[derive(Debug, thiserror::Error)]
pub enum EphemError {
    #[error("the sun never sets on {0} at this latitude")]
    AlwaysUp(String),

    #[error("the sun never rises on {0} at this latitude")]
    NeverUp(String),

    #[error("time out of range: {0}")]
    Range(#[from] time::error::ComponentRange),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("moon image: {0}")]
    Render(#[from] image::ImageError),
}

/// Observer location.  `elev` is metres above sea level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Site {
    pub lat: f64,
    pub lon: f64,
    pub elev: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Ephemeris {
    pub sunrise_time: String,
    pub sunset_time: String,
    pub moon_phase: f64,
    pub moon_image: String,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Everything the dashboard shows for `date`, with the moon icon rendered.
pub fn compute(site: &Site, date: Date) -> Result<Ephemeris, EphemError> {
    let (rise, set) = sun_times(site, date)?;
    let moon_phase = moon_age(date);
    Ok(Ephemeris {
        sunrise_time: clock::format_hhmm(rise.time()),
        sunset_time: clock::format_hhmm(set.time()),
        moon_phase,
        moon_image: moon::render_data_uri(moon_phase)?,
    })
}

/// Sunrise and sunset on the local calendar day `date`, at the local offset.
pub fn sun_times(site: &Site, date: Date) -> Result<(OffsetDateTime, OffsetDateTime), EphemError> {
    let noon = julian_day(local_noon(date));
    let lw = site.lon / 360.0;

    // Mean solar transit nearest local noon.
    let n = (noon - J2000 + 0.0008 + lw).round();
    let j_star = n - lw;

    let m = (357.5291 + 0.985_600_28 * j_star).rem_euclid(360.0);
    let c = 1.9148 * sin_d(m) + 0.0200 * sin_d(2.0 * m) + 0.0003 * sin_d(3.0 * m);
    let lambda = (m + c + 180.0 + 102.9372).rem_euclid(360.0);
    let transit = J2000 + j_star + 0.0053 * sin_d(m) - 0.0069 * sin_d(2.0 * lambda);

    let sin_dec = sin_d(lambda) * sin_d(23.4397);
    let cos_dec = sin_dec.asin().cos();

    let cos_omega =
        (sin_d(horizon(site.elev)) - sin_d(site.lat) * sin_dec) / (cos_d(site.lat) * cos_dec);
    if cos_omega < -1.0 {
        return Err(EphemError::AlwaysUp(clock::format_date(date)));
    }
    if cos_omega > 1.0 {
        return Err(EphemError::NeverUp(clock::format_date(date)));
    }
    let half_day = cos_omega.acos().to_degrees() / 360.0;

    Ok((
        from_julian(transit - half_day)?,
        from_julian(transit + half_day)?,
    ))
}

/// Largest age reported.  True lunations run up to about 29.8 days; longer
/// ones are held here so the age stays inside one mean synodic month.
pub const MAX_MOON_AGE: f64 = 29.52;

/// Days since the previous new moon at local noon of `date`, to 2 decimals.
pub fn moon_age(date: Date) -> f64 {
    let jd = julian_day(local_noon(date));
    let age = jd - previous_new_moon(jd);
    ((age * 100.0).round() / 100.0).min(MAX_MOON_AGE)
}

/// Julian day (UT) of the last new moon at or before `jd`.
pub fn previous_new_moon(jd: f64) -> f64 {
    let mut k = ((jd - J2000) / SYNODIC_MONTH).floor() + 1.0;
    while new_moon(k) > jd {
        k -= 1.0;
    }
    while new_moon(k + 1.0) <= jd {
        k += 1.0;
    }
    new_moon(k)
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

fn local_noon(date: Date) -> OffsetDateTime {
    date.with_time(time!(12:00)).assume_offset(LOCAL_OFFSET)
}

fn julian_day(at: OffsetDateTime) -> f64 {
    at.unix_timestamp() as f64 / SECONDS_PER_DAY + UNIX_EPOCH_JD
}

fn from_julian(jd: f64) -> Result<OffsetDateTime, EphemError> {
    let secs = ((jd - UNIX_EPOCH_JD) * SECONDS_PER_DAY).floor() as i64;
    Ok(OffsetDateTime::from_unix_timestamp(secs)?.to_offset(LOCAL_OFFSET))
}

/// Apparent altitude of the sun's upper limb at rise/set, in degrees.
fn horizon(elev: f64) -> f64 {
    -0.833 - 2.076 * elev.max(0.0).sqrt() / 60.0
}

/// Meeus ch. 49: true new moon for lunation `k` (k = 0 at 2000-01-06).
fn new_moon(k: f64) -> f64 {
    let t = k / 1236.85;
    let t2 = t * t;
    let t3 = t2 * t;
    let t4 = t3 * t;

    let jde = 2_451_550.097_66 + SYNODIC_MONTH * k + 0.000_154_37 * t2 - 0.000_000_150 * t3
        + 0.000_000_000_73 * t4;

    let e = 1.0 - 0.002_516 * t - 0.000_007_4 * t2;
    let m = 2.5534 + 29.105_356_70 * k - 0.000_001_4 * t2 - 0.000_000_11 * t3;
    let mp = 201.5643 + 385.816_935_28 * k + 0.010_758_2 * t2 + 0.000_012_38 * t3
        - 0.000_000_058 * t4;
    let f = 160.7108 + 390.670_502_84 * k - 0.001_611_8 * t2 - 0.000_002_27 * t3
        + 0.000_000_011 * t4;
    let om = 124.7746 - 1.563_755_88 * k + 0.002_067_2 * t2 + 0.000_002_15 * t3;

    let correction = -0.40720 * sin_d(mp)
        + 0.17241 * e * sin_d(m)
        + 0.01608 * sin_d(2.0 * mp)
        + 0.01039 * sin_d(2.0 * f)
        + 0.00739 * e * sin_d(mp - m)
        - 0.00514 * e * sin_d(mp + m)
        + 0.00208 * e * e * sin_d(2.0 * m)
        - 0.00111 * sin_d(mp - 2.0 * f)
        - 0.00057 * sin_d(mp + 2.0 * f)
        + 0.00056 * e * sin_d(2.0 * mp + m)
        - 0.00042 * sin_d(3.0 * mp)
        + 0.00042 * e * sin_d(m + 2.0 * f)
        + 0.00038 * e * sin_d(m - 2.0 * f)
        - 0.00024 * e * sin_d(2.0 * mp - m)
        - 0.00017 * sin_d(om)
        - 0.00007 * sin_d(mp + 2.0 * m)
        + 0.00004 * sin_d(2.0 * mp - 2.0 * f)
        + 0.00004 * sin_d(3.0 * m)
        + 0.00003 * sin_d(mp + m - 2.0 * f)
        + 0.00003 * sin_d(2.0 * mp + 2.0 * f)
        - 0.00003 * sin_d(mp + m + 2.0 * f)
        + 0.00003 * sin_d(mp - m + 2.0 * f)
        - 0.00002 * sin_d(mp - m - 2.0 * f)
        - 0.00002 * sin_d(3.0 * mp + m)
        + 0.00002 * sin_d(4.0 * mp);

    jde + correction - DELTA_T
}

fn sin_d(deg: f64) -> f64 {
    (deg * PI / 180.0).sin()
}

fn cos_d(deg: f64) -> f64 {
    (deg * PI / 180.0).cos()
}
