//! Operator settings: a flat key/value record persisted in the `config`
//! table and edited from the dashboard.
//!
//! Values are kept as strings, the way the page submits them; typed
//! accessors parse on demand.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::Date;

use crate::clock;
use crate::ephem::Site;

/// Keys a saved settings record must carry.  Anything else is stored as-is.
pub const REQUIRED_KEYS: &[&str] = &[
    "place",
    "lat",
    "lon",
    "elev",
    "morning_offset",
    "evening_offset",
    "morning_minutes",
    "evening_minutes",
    "sensing_interval",
    "sensing_count",
    "output1",
    "output2",
    "output3",
    "output4",
    "batt_yellow",
    "batt_green",
    "cumsum_date",
    "humidity_try",
    "inputs_try",
    "led_try",
    "night_sense",
];

const OUTPUT_KEYS: [&str; 4] = ["output1", "output2", "output3", "output4"];

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SettingsError {
    #[error("setting '{0}' is missing")]
    Missing(String),

    #[error("setting '{key}' = {value:?}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(BTreeMap<String, String>);

impl Settings {
    /// Factory values: Nagoya, four relays enabled, cumulative totals from
    /// `today`.
    pub fn defaults(today: Date) -> Self {
        let cumsum = clock::format_date(today);
        let pairs: [(&str, &str); 21] = [
            ("place", "名古屋"),
            ("lat", "35.1667"),
            ("lon", "136.9167"),
            ("elev", "0"),
            ("morning_offset", "0"),
            ("evening_offset", "0"),
            ("morning_minutes", "90"),
            ("evening_minutes", "90"),
            ("sensing_interval", "1"),
            ("sensing_count", "2"),
            ("output1", "1"),
            ("output2", "1"),
            ("output3", "1"),
            ("output4", "1"),
            ("batt_yellow", "5"),
            ("batt_green", "20"),
            ("cumsum_date", cumsum.as_str()),
            ("humidity_try", "false"),
            ("inputs_try", "false"),
            ("led_try", "false"),
            ("night_sense", "false"),
        ];
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Overlay `other` on top of `self`; keys in `other` win.
    pub fn overlay(&mut self, other: &Settings) {
        for (k, v) in other.iter() {
            self.insert(k, v);
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Every problem with this record, in key order.  Empty means valid.
    pub fn validate(&self) -> Vec<SettingsError> {
        let mut errors = Vec::new();

        for key in REQUIRED_KEYS {
            if self.get(key).is_none() {
                errors.push(SettingsError::Missing(key.to_string()));
            }
        }

        let checks: [(&str, fn(&Settings) -> Result<(), SettingsError>); 5] = [
            ("lat", |s| s.bounded("lat", -90.0, 90.0).map(drop)),
            ("lon", |s| s.bounded("lon", -180.0, 180.0).map(drop)),
            ("elev", |s| s.number("elev").map(drop)),
            ("sensing_count", |s| s.sensing_count().map(drop)),
            ("cumsum_date", |s| s.cumsum_date().map(drop)),
        ];
        for (key, check) in checks {
            if self.get(key).is_some() {
                if let Err(e) = check(self) {
                    errors.push(e);
                }
            }
        }

        for key in OUTPUT_KEYS {
            if self.get(key).is_some() {
                if let Err(e) = self.flag(key) {
                    errors.push(e);
                }
            }
        }

        errors
    }

    // -----------------------------------------------------------------------
    // Typed accessors
    // -----------------------------------------------------------------------

    pub fn site(&self) -> Result<Site, SettingsError> {
        Ok(Site {
            lat: self.bounded("lat", -90.0, 90.0)?,
            lon: self.bounded("lon", -180.0, 180.0)?,
            elev: self.number("elev")?,
        })
    }

    /// Start date of the cumulative totals.
    pub fn cumsum_date(&self) -> Result<Date, SettingsError> {
        let raw = self.required("cumsum_date")?;
        clock::parse_date(raw).map_err(|e| invalid("cumsum_date", raw, e))
    }

    /// Number of input polls per light-counting cycle.
    pub fn sensing_count(&self) -> Result<u32, SettingsError> {
        let raw = self.required("sensing_count")?;
        match raw.trim().parse::<u32>() {
            Ok(0) => Err(invalid("sensing_count", raw, "must be at least 1")),
            Ok(n) => Ok(n),
            Err(e) => Err(invalid("sensing_count", raw, e)),
        }
    }

    /// Which of the four grow-light relays to energise.
    pub fn relays(&self) -> Result<[bool; 4], SettingsError> {
        let mut relays = [false; 4];
        for (slot, key) in relays.iter_mut().zip(OUTPUT_KEYS) {
            *slot = self.flag(key)?;
        }
        Ok(relays)
    }

    fn required(&self, key: &str) -> Result<&str, SettingsError> {
        self.get(key)
            .ok_or_else(|| SettingsError::Missing(key.to_string()))
    }

    fn number(&self, key: &str) -> Result<f64, SettingsError> {
        let raw = self.required(key)?;
        raw.trim()
            .parse::<f64>()
            .map_err(|e| invalid(key, raw, e))
            .and_then(|v| {
                if v.is_finite() {
                    Ok(v)
                } else {
                    Err(invalid(key, raw, "must be finite"))
                }
            })
    }

    fn bounded(&self, key: &str, min: f64, max: f64) -> Result<f64, SettingsError> {
        let v = self.number(key)?;
        if (min..=max).contains(&v) {
            Ok(v)
        } else {
            Err(invalid(
                key,
                self.get(key).unwrap_or_default(),
                format!("out of range [{min}, {max}]"),
            ))
        }
    }

    fn flag(&self, key: &str) -> Result<bool, SettingsError> {
        match self.required(key)?.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(invalid(key, other, "must be 0 or 1")),
        }
    }
}

impl FromIterator<(String, String)> for Settings {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn invalid(key: &str, value: &str, reason: impl ToString) -> SettingsError {
    SettingsError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
