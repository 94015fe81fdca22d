//! TOML bootstrap config: server, hardware wiring, system hooks and the seed
//! values for the operator settings table.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use time::Date;

use crate::db::Db;
use crate::settings::Settings;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub hardware: HardwareConfig,
    pub system: SystemConfig,
    /// Seed values for the settings table; merged over the factory defaults.
    pub settings: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub database_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: "sqlite:terrarium.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareMode {
    #[default]
    Sim,
    Gpio,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub mode: HardwareMode,
    /// BCM pins for input connector pins 1..=8.
    pub input_pins: Vec<i64>,
    /// BCM pins for output connector pins 1..=4.
    pub output_pins: Vec<i64>,
    pub dht_pin: i64,
    pub active_low: bool,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            mode: HardwareMode::Sim,
            input_pins: vec![5, 6, 13, 19, 26, 16, 20, 21],
            output_pins: vec![17, 27, 22, 23],
            dht_pin: 4,
            active_low: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Program and leading args for setting the host clock; the operator's
    /// value is appended word by word.
    pub clock_command: Vec<String>,
    /// Plain-text daily lighting log, kept apart from the database.
    pub daily_log_path: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            clock_command: vec!["sudo".to_string(), "date".to_string()],
            daily_log_path: "daily_log.txt".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
/// GPIO 28+ are not exposed on the standard header.
const VALID_GPIO_PINS: &[i64] = &[
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
];

const INPUT_PIN_COUNT: usize = 8;
const OUTPUT_PIN_COUNT: usize = 4;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_server(&mut errors);
        self.validate_hardware(&mut errors);
        self.validate_system(&mut errors);
        self.validate_settings(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_server(&self, errors: &mut Vec<String>) {
        if self.server.port == 0 {
            errors.push("server: port must be non-zero".to_string());
        }
        if self.server.database_url.trim().is_empty() {
            errors.push("server: database_url is empty".to_string());
        }
    }

    fn validate_hardware(&self, errors: &mut Vec<String>) {
        let hw = &self.hardware;

        // ── Pin counts ──────────────────────────────────────
        if hw.input_pins.len() != INPUT_PIN_COUNT {
            errors.push(format!(
                "hardware: input_pins needs {INPUT_PIN_COUNT} pins, got {}",
                hw.input_pins.len()
            ));
        }
        if hw.output_pins.len() != OUTPUT_PIN_COUNT {
            errors.push(format!(
                "hardware: output_pins needs {OUTPUT_PIN_COUNT} pins, got {}",
                hw.output_pins.len()
            ));
        }

        // ── GPIO pin whitelist ──────────────────────────────
        let mut seen_pins: HashSet<i64> = HashSet::new();
        let all = hw
            .input_pins
            .iter()
            .map(|p| ("input_pins", *p))
            .chain(hw.output_pins.iter().map(|p| ("output_pins", *p)))
            .chain(std::iter::once(("dht_pin", hw.dht_pin)));

        for (field, pin) in all {
            if !VALID_GPIO_PINS.contains(&pin) {
                errors.push(format!(
                    "hardware: {field} {pin} is not a valid BCM GPIO pin (allowed: 2-27)"
                ));
            } else if !seen_pins.insert(pin) {
                errors.push(format!("hardware: {field} {pin} is already used by another line"));
            }
        }
    }

    fn validate_system(&self, errors: &mut Vec<String>) {
        if self
            .system
            .clock_command
            .first()
            .map_or(true, |p| p.trim().is_empty())
        {
            errors.push("system: clock_command is empty".to_string());
        }
        if self.system.daily_log_path.trim().is_empty() {
            errors.push("system: daily_log_path is empty".to_string());
        }
    }

    fn validate_settings(&self, errors: &mut Vec<String>) {
        let seeded = self.seed_settings(time::macros::date!(2000 - 01 - 01));
        for e in seeded.validate() {
            errors.push(format!("settings: {e}"));
        }
    }

    /// Factory settings for `today` with `[settings]` laid over them.
    pub fn seed_settings(&self, today: Date) -> Settings {
        let mut settings = Settings::defaults(today);
        let overrides: Settings = self
            .settings
            .iter()
            .map(|(k, v)| (k.clone(), toml_to_setting(v)))
            .collect();
        settings.overlay(&overrides);
        settings
    }

    /// `WEB_PORT` and `DB_URL` win over the file.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(port) = lookup("WEB_PORT").and_then(|s| s.parse().ok()) {
            self.server.port = port;
        }
        if let Some(url) = lookup("DB_URL") {
            self.server.database_url = url;
        }
    }
}

/// Settings are strings; TOML numbers and booleans are written the way the
/// dashboard would submit them.
fn toml_to_setting(v: &toml::Value) -> String {
    match v {
        toml::Value::String(s) => s.clone(),
        toml::Value::Integer(i) => i.to_string(),
        toml::Value::Float(f) => f.to_string(),
        toml::Value::Boolean(b) => b.to_string(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Load + apply
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.  A missing file means
/// built-in defaults.
pub fn load(path: &str) -> Result<Config> {
    let mut config: Config = if Path::new(path).exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?
    } else {
        tracing::warn!(path, "config file not found, using defaults");
        Config::default()
    };
    config.apply_env(|key| std::env::var(key).ok());
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

/// Seed the settings table on first start.  Saved settings are left alone
/// so operator edits survive restarts.
pub async fn apply(config: &Config, db: &Db, today: Date) -> Result<()> {
    let existing = db.load_settings().await?;
    if !existing.is_empty() {
        tracing::info!(keys = existing.len(), "settings already present, not seeding");
        return Ok(());
    }

    let seeded = config.seed_settings(today);
    db.save_settings(&seeded)
        .await
        .context("failed to seed settings")?;

    tracing::info!(keys = seeded.len(), "settings seeded from config");
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
