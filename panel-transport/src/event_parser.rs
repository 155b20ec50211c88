//! Kernel input-event parsing for the single-button input link
//!
//! A `/dev/input/event*` node yields fixed-size `struct input_event` records.
//! On 64-bit Linux these are 24 bytes:
//!
//! ```text
//! [0..8]   tv_sec
//! [8..16]  tv_usec
//! [16..18] type   (LE u16)
//! [18..20] code   (LE u16)
//! [20..24] value  (LE i32)
//! ```
//!
//! A button that identifies itself as a keyboard sends its key codes as a
//! burst of `EV_KEY` frames terminated by `EV_SYN/SYN_REPORT`. The burst is
//! compared against a trigger sequence to decide whether "the button" fired.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Size of one `input_event` record
pub const FRAME_SIZE: usize = 24;

/// Longest key-code burst we keep between two sync frames
pub const MAX_SEQUENCE_LEN: usize = 8;

/// Trigger sent by the stock USB "big red button" (KEY_LEFTMETA, KEY_F12)
pub const DEFAULT_TRIGGER: [u16; 2] = [125, 88];

/// Event type constants
pub mod ev {
    pub const SYN: u16 = 0x00;
    pub const KEY: u16 = 0x01;
    /// `SYN_REPORT` code of a sync frame
    pub const SYN_REPORT: u16 = 0x00;
}

/// Raw `input_event` record.
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct RawInputEvent {
    tv_sec: [u8; 8],
    tv_usec: [u8; 8],
    event_type: [u8; 2],
    code: [u8; 2],
    value: [u8; 4],
}

impl RawInputEvent {
    /// Build a frame (used by test doubles and replay tools)
    pub fn new(event_type: u16, code: u16, value: i32) -> Self {
        Self {
            tv_sec: [0; 8],
            tv_usec: [0; 8],
            event_type: event_type.to_le_bytes(),
            code: code.to_le_bytes(),
            value: value.to_le_bytes(),
        }
    }

    pub fn event_type(&self) -> u16 {
        u16::from_le_bytes(self.event_type)
    }

    pub fn code(&self) -> u16 {
        u16::from_le_bytes(self.code)
    }
}

/// Decoded input frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFrame {
    /// `EV_SYN` with the given code
    Sync { code: u16 },
    /// `EV_KEY` with the given key code
    Key { code: u16 },
    /// Anything else (`EV_MSC` scan codes, LEDs, ...)
    Other { event_type: u16, code: u16 },
}

/// Parse one 24-byte frame.
///
/// Returns `None` if `data` is not exactly one frame long.
pub fn parse_input_frame(data: &[u8]) -> Option<InputFrame> {
    let raw = RawInputEvent::read_from_bytes(data).ok()?;
    let code = raw.code();
    Some(match raw.event_type() {
        ev::SYN => InputFrame::Sync { code },
        ev::KEY => InputFrame::Key { code },
        event_type => InputFrame::Other { event_type, code },
    })
}

/// Accumulates key codes between sync frames and matches them against a
/// trigger sequence.
#[derive(Debug, Clone)]
pub struct TriggerMatcher {
    trigger: Vec<u16>,
    sequence: Vec<u16>,
    overflowed: bool,
}

impl Default for TriggerMatcher {
    fn default() -> Self {
        Self::new(&DEFAULT_TRIGGER)
    }
}

impl TriggerMatcher {
    /// Create a matcher for the given trigger sequence
    pub fn new(trigger: &[u16]) -> Self {
        Self {
            trigger: trigger.to_vec(),
            sequence: Vec::with_capacity(MAX_SEQUENCE_LEN),
            overflowed: false,
        }
    }

    /// The configured trigger
    pub fn trigger(&self) -> &[u16] {
        &self.trigger
    }

    /// Feed one frame. Returns `true` when a sync frame completes a burst equal
    /// to the trigger.
    pub fn feed(&mut self, frame: InputFrame) -> bool {
        match frame {
            InputFrame::Key { code } => {
                if self.sequence.len() < MAX_SEQUENCE_LEN {
                    self.sequence.push(code);
                } else {
                    tracing::trace!("Key sequence overflow, dropping code {}", code);
                    self.overflowed = true;
                }
                false
            }
            InputFrame::Sync {
                code: ev::SYN_REPORT,
            } => {
                let matched = !self.overflowed && sequence_eq(&self.sequence, &self.trigger);
                self.sequence.clear();
                self.overflowed = false;
                matched
            }
            _ => false,
        }
    }
}

/// Ordered element-wise equality of two key-code sequences
pub fn sequence_eq(a: &[u16], b: &[u16]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x == y)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(event_type: u16, code: u16) -> Vec<u8> {
        RawInputEvent::new(event_type, code, 1).as_bytes().to_vec()
    }

    #[test]
    fn test_frame_size() {
        assert_eq!(std::mem::size_of::<RawInputEvent>(), FRAME_SIZE);
    }

    #[test]
    fn test_parse_offsets() {
        let mut bytes = [0u8; FRAME_SIZE];
        bytes[16] = 0x01; // EV_KEY
        bytes[18] = 0x7D; // code 125
        let parsed = parse_input_frame(&bytes).unwrap();
        assert_eq!(parsed, InputFrame::Key { code: 125 });
    }

    #[test]
    fn test_parse_rejects_short_frame() {
        assert!(parse_input_frame(&[0u8; 16]).is_none());
    }

    #[test]
    fn test_parse_other() {
        // EV_MSC / MSC_SCAN
        let parsed = parse_input_frame(&frame(0x04, 0x04)).unwrap();
        assert_eq!(
            parsed,
            InputFrame::Other {
                event_type: 0x04,
                code: 0x04
            }
        );
    }

    #[test]
    fn test_trigger_matches_on_sync() {
        let mut m = TriggerMatcher::default();
        assert!(!m.feed(parse_input_frame(&frame(ev::KEY, 125)).unwrap()));
        assert!(!m.feed(parse_input_frame(&frame(ev::KEY, 88)).unwrap()));
        assert!(m.feed(parse_input_frame(&frame(ev::SYN, 0)).unwrap()));
    }

    #[test]
    fn test_trigger_cleared_after_sync() {
        let mut m = TriggerMatcher::default();
        m.feed(InputFrame::Key { code: 125 });
        assert!(!m.feed(InputFrame::Sync { code: 0 }));
        // Second half alone must not match
        m.feed(InputFrame::Key { code: 88 });
        assert!(!m.feed(InputFrame::Sync { code: 0 }));
    }

    #[test]
    fn test_trigger_order_matters() {
        let mut m = TriggerMatcher::default();
        m.feed(InputFrame::Key { code: 88 });
        m.feed(InputFrame::Key { code: 125 });
        assert!(!m.feed(InputFrame::Sync { code: 0 }));
    }

    #[test]
    fn test_non_report_sync_ignored() {
        let mut m = TriggerMatcher::default();
        m.feed(InputFrame::Key { code: 125 });
        m.feed(InputFrame::Key { code: 88 });
        // SYN_DROPPED (3) does not finalize the burst
        assert!(!m.feed(InputFrame::Sync { code: 3 }));
        assert!(m.feed(InputFrame::Sync { code: 0 }));
    }

    #[test]
    fn test_overflow_never_matches() {
        let mut m = TriggerMatcher::new(&[1; MAX_SEQUENCE_LEN]);
        for _ in 0..MAX_SEQUENCE_LEN + 2 {
            m.feed(InputFrame::Key { code: 1 });
        }
        assert!(!m.feed(InputFrame::Sync { code: 0 }));
        // The next burst starts clean
        for _ in 0..MAX_SEQUENCE_LEN {
            m.feed(InputFrame::Key { code: 1 });
        }
        assert!(m.feed(InputFrame::Sync { code: 0 }));
    }
}
