//! Simulated I/O board for development and "try mode".
//!
//! Inputs are coin flips, climate readings are uniform random values in a
//! plausible greenhouse range, and relay writes are remembered so callers can
//! inspect what would have been sent to the card.

use crate::{ClimateReading, HardwareError, RelayOutput, SensorSource, INPUT_CONNECTOR_PINS};

/// Temperature range (°C, inclusive) produced by the simulator.
const TEMPERATURE_RANGE: std::ops::RangeInclusive<i32> = 30..=60;
/// Relative humidity range (%, inclusive) produced by the simulator.
const HUMIDITY_RANGE: std::ops::RangeInclusive<i32> = 60..=90;

pub struct SimulatedBoard {
    rng: fastrand::Rng,
    last_mask: Option<u8>,
}

impl SimulatedBoard {
    pub fn new() -> Self {
        Self {
            rng: fastrand::Rng::new(),
            last_mask: None,
        }
    }

    /// Deterministic simulator, for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: fastrand::Rng::with_seed(seed),
            last_mask: None,
        }
    }

    /// Most recent byte written to the relay port, if any.
    pub fn last_mask(&self) -> Option<u8> {
        self.last_mask
    }
}

impl Default for SimulatedBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorSource for SimulatedBoard {
    fn read_inputs(&mut self) -> Result<Vec<bool>, HardwareError> {
        Ok(INPUT_CONNECTOR_PINS
            .iter()
            .map(|_| self.rng.bool())
            .collect())
    }

    fn read_climate(&mut self) -> ClimateReading {
        ClimateReading {
            valid: true,
            temperature: self.rng.i32(TEMPERATURE_RANGE) as f32,
            humidity: self.rng.i32(HUMIDITY_RANGE) as f32,
        }
    }
}

impl RelayOutput for SimulatedBoard {
    fn write_outputs(&mut self, mask: u8) -> Result<(), HardwareError> {
        tracing::info!(mask = format_args!("0x{mask:02x}"), "[sim] relay port written");
        self.last_mask = Some(mask);
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
