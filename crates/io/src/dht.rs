//! DHT11 single-wire frame decoding.
//!
//! A transfer is 40 bits: humidity (integer, decimal), temperature (integer,
//! decimal) and a checksum byte.  Each bit is a ~50 µs low followed by a high
//! pulse whose length encodes the value: ~26 µs for 0, ~70 µs for 1.

use std::time::Duration;

use crate::ClimateReading;

/// Number of data bits in one DHT11 transfer.
pub const FRAME_BITS: usize = 40;

/// High pulses longer than this are read as a 1.
const ONE_THRESHOLD: Duration = Duration::from_micros(50);

/// Pack measured high-pulse lengths into the 5-byte frame.  Returns `None`
/// unless exactly [`FRAME_BITS`] pulses were captured.
pub fn frame_from_pulses(pulses: &[Duration]) -> Option<[u8; 5]> {
    if pulses.len() != FRAME_BITS {
        return None;
    }
    let mut frame = [0u8; 5];
    for (i, pulse) in pulses.iter().enumerate() {
        if *pulse > ONE_THRESHOLD {
            frame[i / 8] |= 1 << (7 - (i % 8));
        }
    }
    Some(frame)
}

/// Validate the checksum and convert a frame into a reading.
pub fn decode_frame(frame: [u8; 5]) -> ClimateReading {
    let sum = frame[..4]
        .iter()
        .fold(0u8, |acc, b| acc.wrapping_add(*b));
    if sum != frame[4] {
        return ClimateReading::invalid();
    }

    let humidity = frame[0] as f32 + frame[1] as f32 / 10.0;
    let magnitude = frame[2] as f32 + (frame[3] & 0x7f) as f32 / 10.0;
    let temperature = if frame[3] & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    };

    ClimateReading {
        valid: true,
        temperature: round1(temperature),
        humidity: round1(humidity),
    }
}

fn round1(v: f32) -> f32 {
    (v * 10.0).round() / 10.0
}
