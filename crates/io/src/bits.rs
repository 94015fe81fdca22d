//! Bit mapping between the I/O card's connector pins and its port bytes.
//!
//! Connector pin `p` (1-based) lives at bit `8 - p` of the port byte, so pin 1
//! is the MSB and pin 8 the LSB.

// ── Connector layout ────────────────────────────────────────────────────────

/// Input connector pins, in the order readings are reported.  Pins 1–5 carry
/// the light sensors, 6–8 the battery-voltage relays.
pub const INPUT_CONNECTOR_PINS: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];

/// Output connector pins wired to the four grow-light relays.
pub const OUTPUT_CONNECTOR_PINS: [u8; 4] = [1, 2, 3, 4];

const fn bit_for_pin(pin: u8) -> u8 {
    8 - pin
}

// ── Conversions ─────────────────────────────────────────────────────────────

/// Split a port byte into per-pin levels, one entry per pin in `pins`.
pub fn bits_from_byte(byte: u8, pins: &[u8]) -> Vec<bool> {
    pins.iter()
        .map(|&pin| byte & (1 << bit_for_pin(pin)) != 0)
        .collect()
}

/// Pack per-pin levels into a port byte.  Extra values or pins are ignored.
pub fn byte_from_bits(values: &[bool], pins: &[u8]) -> u8 {
    values
        .iter()
        .zip(pins)
        .filter(|(on, _)| **on)
        .fold(0u8, |acc, (_, &pin)| acc | (1 << bit_for_pin(pin)))
}

/// Output byte that energises every enabled relay.
pub fn relay_mask(relays: &[bool; 4]) -> u8 {
    byte_from_bits(relays, &OUTPUT_CONNECTOR_PINS)
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_one_is_msb() {
        assert_eq!(byte_from_bits(&[true], &[1]), 0b1000_0000);
    }

    #[test]
    fn pin_eight_is_lsb() {
        assert_eq!(byte_from_bits(&[true], &[8]), 0b0000_0001);
    }

    #[test]
    fn bits_from_byte_reads_all_inputs() {
        let bits = bits_from_byte(0b1010_0001, &INPUT_CONNECTOR_PINS);
        assert_eq!(
            bits,
            vec![true, false, true, false, false, false, false, true]
        );
    }

    #[test]
    fn bits_survive_a_pack_unpack() {
        let levels = vec![false, true, true, false, true, false, false, true];
        let byte = byte_from_bits(&levels, &INPUT_CONNECTOR_PINS);
        assert_eq!(bits_from_byte(byte, &INPUT_CONNECTOR_PINS), levels);
    }

    #[test]
    fn relay_mask_all_enabled() {
        assert_eq!(relay_mask(&[true; 4]), 0xF0);
    }

    #[test]
    fn relay_mask_none_enabled() {
        assert_eq!(relay_mask(&[false; 4]), 0);
    }

    #[test]
    fn relay_mask_partial() {
        // relays 1 and 3 → bits 7 and 5
        assert_eq!(relay_mask(&[true, false, true, false]), 0b1010_0000);
    }

    #[test]
    fn byte_from_bits_ignores_unpaired_values() {
        assert_eq!(byte_from_bits(&[true, true, true], &[1]), 0b1000_0000);
    }
}
