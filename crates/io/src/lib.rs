//! Hardware boundary for the terrarium hub.
//!
//! The hub talks to three pieces of hardware: eight digital input lines
//! (five light sensors and three battery-voltage relays), four relay outputs
//! driving the grow light, and a DHT11 temperature/humidity sensor.  Both
//! backends implement the same capability traits:
//!
//! - [`SimulatedBoard`]: random readings, always available; backs "try mode".
//! - `GpioBoard`: real pins via `rppal`, behind the `gpio` feature.

mod bits;
mod dht;
#[cfg(feature = "gpio")]
mod gpio;
mod sim;

use serde::Serialize;

pub use bits::{
    bits_from_byte, byte_from_bits, relay_mask, INPUT_CONNECTOR_PINS, OUTPUT_CONNECTOR_PINS,
};
pub use dht::{decode_frame, frame_from_pulses};
#[cfg(feature = "gpio")]
pub use gpio::{GpioBoard, GpioPins};
pub use sim::SimulatedBoard;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[cfg(feature = "gpio")]
    #[error("gpio: {0}")]
    Gpio(#[from] rppal::gpio::Error),

    #[error("expected {expected} pins, got {got}")]
    PinCount { expected: usize, got: usize },

    #[error("hardware unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

/// One temperature/humidity read.  `valid == false` means the sensor did not
/// answer or the frame failed its checksum; the numbers are then meaningless.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClimateReading {
    pub valid: bool,
    pub temperature: f32,
    pub humidity: f32,
}

impl ClimateReading {
    pub fn invalid() -> Self {
        Self {
            valid: false,
            temperature: -1.0,
            humidity: -1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// Anything that can report the digital input lines and the climate sensor.
pub trait SensorSource: Send {
    /// Levels of the input lines, ordered by [`INPUT_CONNECTOR_PINS`].
    fn read_inputs(&mut self) -> Result<Vec<bool>, HardwareError>;

    /// A single climate sample.  Never fails; a bad read is `valid: false`.
    fn read_climate(&mut self) -> ClimateReading;
}

/// Anything that can drive the relay output port.
pub trait RelayOutput: Send {
    /// Write an output byte.  Bit layout follows [`OUTPUT_CONNECTOR_PINS`].
    fn write_outputs(&mut self, mask: u8) -> Result<(), HardwareError>;
}

/// A full I/O board: sensors and relays behind one handle.
pub trait Board: SensorSource + RelayOutput {}

impl<T: SensorSource + RelayOutput> Board for T {}
