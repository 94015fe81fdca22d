//! Raspberry Pi backend: digital inputs, relay outputs and a DHT11 on BCM
//! GPIO pins via `rppal`.
//!
//! The eight input lines and four relay outputs are wired to plain GPIO pins
//! instead of a vendor DIO card; the port-byte layout is kept identical so the
//! rest of the system only ever sees connector-pin ordering.

use std::thread;
use std::time::{Duration, Instant};

use rppal::gpio::{Gpio, InputPin, IoPin, Level, Mode, OutputPin};

use crate::dht::{decode_frame, frame_from_pulses, FRAME_BITS};
use crate::{
    bits_from_byte, ClimateReading, HardwareError, RelayOutput, SensorSource,
    INPUT_CONNECTOR_PINS, OUTPUT_CONNECTOR_PINS,
};

/// Host start signal: hold the line low for at least 18 ms.
const DHT_START_LOW: Duration = Duration::from_millis(18);
/// Give up on any single edge after this long.
const DHT_EDGE_TIMEOUT: Duration = Duration::from_micros(200);

/// BCM pin assignment for the board.
#[derive(Debug, Clone)]
pub struct GpioPins {
    /// One BCM pin per entry of [`INPUT_CONNECTOR_PINS`].
    pub inputs: Vec<u8>,
    /// One BCM pin per entry of [`OUTPUT_CONNECTOR_PINS`].
    pub outputs: Vec<u8>,
    /// DHT11 data line.
    pub dht: u8,
    /// Many relay boards energise on LOW.
    pub active_low: bool,
}

pub struct GpioBoard {
    inputs: Vec<InputPin>,
    outputs: Vec<OutputPin>,
    dht: IoPin,
    active_low: bool,
}

impl GpioBoard {
    pub fn new(pins: &GpioPins) -> Result<Self, HardwareError> {
        if pins.inputs.len() != INPUT_CONNECTOR_PINS.len() {
            return Err(HardwareError::PinCount {
                expected: INPUT_CONNECTOR_PINS.len(),
                got: pins.inputs.len(),
            });
        }
        if pins.outputs.len() != OUTPUT_CONNECTOR_PINS.len() {
            return Err(HardwareError::PinCount {
                expected: OUTPUT_CONNECTOR_PINS.len(),
                got: pins.outputs.len(),
            });
        }

        let gpio = Gpio::new()?;

        let inputs = pins
            .inputs
            .iter()
            .map(|&n| gpio.get(n).map(|p| p.into_input_pulldown()))
            .collect::<Result<Vec<_>, _>>()?;

        let outputs = pins
            .outputs
            .iter()
            .map(|&n| gpio.get(n).map(|p| p.into_output()))
            .collect::<Result<Vec<_>, _>>()?;

        let dht = gpio.get(pins.dht)?.into_io(Mode::Input);

        let mut board = Self {
            inputs,
            outputs,
            dht,
            active_low: pins.active_low,
        };

        // Fail-safe: relays de-energised at startup.
        board.write_outputs(0)?;

        tracing::info!(
            inputs = ?pins.inputs,
            outputs = ?pins.outputs,
            dht = pins.dht,
            active_low = pins.active_low,
            "gpio board initialised"
        );

        Ok(board)
    }

    fn read_dht_once(&mut self) -> ClimateReading {
        let pin = &mut self.dht;

        pin.set_mode(Mode::Output);
        pin.set_low();
        thread::sleep(DHT_START_LOW);
        pin.set_high();
        pin.set_mode(Mode::Input);

        // Sensor acknowledges with ~80 µs low then ~80 µs high.
        if wait_while(pin, Level::High).is_none()
            || wait_while(pin, Level::Low).is_none()
            || wait_while(pin, Level::High).is_none()
        {
            tracing::debug!("dht11: no response");
            return ClimateReading::invalid();
        }

        let mut pulses = Vec::with_capacity(FRAME_BITS);
        for _ in 0..FRAME_BITS {
            if wait_while(pin, Level::Low).is_none() {
                break;
            }
            match wait_while(pin, Level::High) {
                Some(high) => pulses.push(high),
                None => break,
            }
        }

        match frame_from_pulses(&pulses) {
            Some(frame) => decode_frame(frame),
            None => {
                tracing::debug!(bits = pulses.len(), "dht11: short frame");
                ClimateReading::invalid()
            }
        }
    }
}

/// Spin while the line sits at `level`; returns how long it stayed there.
fn wait_while(pin: &IoPin, level: Level) -> Option<Duration> {
    let start = Instant::now();
    while pin.read() == level {
        if start.elapsed() > DHT_EDGE_TIMEOUT {
            return None;
        }
    }
    Some(start.elapsed())
}

impl SensorSource for GpioBoard {
    fn read_inputs(&mut self) -> Result<Vec<bool>, HardwareError> {
        Ok(self.inputs.iter().map(|p| p.is_high()).collect())
    }

    fn read_climate(&mut self) -> ClimateReading {
        self.read_dht_once()
    }
}

impl RelayOutput for GpioBoard {
    fn write_outputs(&mut self, mask: u8) -> Result<(), HardwareError> {
        let levels = bits_from_byte(mask, &OUTPUT_CONNECTOR_PINS);
        for (pin, on) in self.outputs.iter_mut().zip(levels) {
            // active-low relay: LOW = ON, HIGH = OFF
            if on != self.active_low {
                pin.set_high();
            } else {
                pin.set_low();
            }
        }
        tracing::info!(mask = format_args!("0x{mask:02x}"), "relay port written");
        Ok(())
    }
}
