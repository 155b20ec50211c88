//! Protocol constants and byte codecs for the button panel
//!
//! The panel speaks a single-byte protocol in both directions:
//!
//! ```text
//! host -> panel   0x1F                         handshake request
//! panel -> host   0b111n_nnnn                  handshake reply, n = button count
//! panel -> host   0b000i_iiii                  button i was pressed
//! host -> panel   0bRGBi_iiii                  set LED of button i
//! ```

use crate::error::LinkError;

/// Serial line settings used by the panel firmware
pub mod serial {
    use std::time::Duration;

    pub const BAUD_RATE: u32 = 9600;
    /// How long to wait for the single handshake reply byte
    pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);
    /// The panel ignores LED commands sent right after the handshake
    pub const SETTLE_DELAY: Duration = Duration::from_millis(1500);
}

/// Handshake request byte
pub const HANDSHAKE_REQUEST: u8 = 0x1F;

/// High bits every valid handshake reply carries
pub const HANDSHAKE_MARKER: u8 = 0b1110_0000;

/// Low 5 bits: button index in commands, button count in handshake replies
pub const INDEX_MASK: u8 = 0b0001_1111;

/// Maximum number of buttons the protocol can address
pub const MAX_BUTTONS: u8 = INDEX_MASK;

/// LED color bits of a command byte
pub mod color {
    pub const RED: u8 = 0b1000_0000;
    pub const GREEN: u8 = 0b0100_0000;
    pub const BLUE: u8 = 0b0010_0000;
}

/// Decode the panel's handshake reply into its button count.
pub fn decode_handshake_reply(response: u8, path: &str) -> Result<u8, LinkError> {
    if response & HANDSHAKE_MARKER != HANDSHAKE_MARKER {
        return Err(LinkError::ProtocolMismatch {
            path: path.to_string(),
            response,
        });
    }
    Ok(response & INDEX_MASK)
}

/// Encode a handshake reply the way panel firmware does (used by test doubles).
pub fn encode_handshake_reply(button_count: u8) -> u8 {
    HANDSHAKE_MARKER | (button_count & INDEX_MASK)
}

/// Build an LED command byte for `index`.
///
/// Only the lower 5 bits of `index` are used, so color bits can never leak
/// into the index field and vice versa.
pub fn led_command(index: u8, red: bool, green: bool, blue: bool) -> u8 {
    let mut cmd = index & INDEX_MASK;
    if red {
        cmd |= color::RED;
    }
    if green {
        cmd |= color::GREEN;
    }
    if blue {
        cmd |= color::BLUE;
    }
    cmd
}

/// LED command that switches `index` off
pub fn led_off(index: u8) -> u8 {
    led_command(index, false, false, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_handshake_roundtrip() {
        let reply = encode_handshake_reply(7);
        assert_eq!(reply, 0b1110_0111);
        assert_eq!(decode_handshake_reply(reply, "/dev/ttyUSB0").unwrap(), 7);
    }

    #[test]
    fn test_handshake_zero_buttons() {
        assert_eq!(decode_handshake_reply(0xE0, "x").unwrap(), 0);
    }

    #[test]
    fn test_handshake_rejects_missing_marker() {
        // 0b1100_0111: only two of the three marker bits
        let err = decode_handshake_reply(0xC7, "/dev/ttyACM0").unwrap_err();
        match err {
            LinkError::ProtocolMismatch { path, response } => {
                assert_eq!(path, "/dev/ttyACM0");
                assert_eq!(response, 0xC7);
            }
            other => panic!("Expected ProtocolMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_led_command_bits() {
        assert_eq!(led_command(3, true, false, false), 0b1000_0011);
        assert_eq!(led_command(3, false, true, false), 0b0100_0011);
        assert_eq!(led_command(3, false, false, true), 0b0010_0011);
        assert_eq!(led_command(31, true, true, true), 0xFF);
        assert_eq!(led_off(5), 5);
    }

    #[test]
    fn test_led_command_masks_index() {
        // Index 33 would overflow into the blue bit without masking
        assert_eq!(led_command(33, false, false, false), 1);
    }

    proptest! {
        #[test]
        fn prop_low_bits_are_index(
            index in 0u8..=MAX_BUTTONS,
            r in any::<bool>(),
            g in any::<bool>(),
            b in any::<bool>()
        ) {
            let cmd = led_command(index, r, g, b);
            prop_assert_eq!(cmd & INDEX_MASK, index);
            prop_assert_eq!(cmd & color::RED != 0, r);
            prop_assert_eq!(cmd & color::GREEN != 0, g);
            prop_assert_eq!(cmd & color::BLUE != 0, b);
        }
    }
}
