//! LED states and the per-button animation engine.
//!
//! A module never writes to the panel itself. It sends [`LedState`] values
//! to its button's [`LedEngine`](engine::LedEngine), which renders colors,
//! flashes and expiry onto the shared device stream.

pub mod engine;
pub mod output;

use std::time::Duration;

use panel_transport::protocol::{led_command, led_off};

pub use engine::LedEngine;
pub use output::LedOutput;

/// What one LED should show.
///
/// `flash` of zero means solid; `ttl` of zero means indefinitely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LedState {
    pub red: bool,
    pub green: bool,
    pub blue: bool,
    /// Full on+off period
    pub flash: Duration,
    /// Time until the LED goes dark on its own
    pub ttl: Duration,
}

impl LedState {
    pub const OFF: Self = Self::solid(false, false, false);
    pub const RED: Self = Self::solid(true, false, false);
    pub const GREEN: Self = Self::solid(false, true, false);
    pub const BLUE: Self = Self::solid(false, false, true);

    /// An action failed
    pub const ERROR: Self = Self::RED
        .flashing(Duration::from_millis(333))
        .expiring(Duration::from_secs(4));

    /// An action was accepted and is in progress
    pub const PERFORMING: Self = Self::BLUE.flashing(Duration::from_millis(500));

    /// A destructive action waits for a second press
    pub const AWAITING_CONFIRMATION: Self = Self::RED.flashing(Duration::from_millis(150));

    pub const fn solid(red: bool, green: bool, blue: bool) -> Self {
        Self {
            red,
            green,
            blue,
            flash: Duration::ZERO,
            ttl: Duration::ZERO,
        }
    }

    pub const fn flashing(mut self, period: Duration) -> Self {
        self.flash = period;
        self
    }

    pub const fn expiring(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn is_flashing(&self) -> bool {
        !self.flash.is_zero()
    }

    pub fn expires(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Command byte lighting this state on button `index`
    pub fn command_byte(&self, index: u8) -> u8 {
        led_command(index, self.red, self.green, self.blue)
    }

    /// Command byte turning button `index` dark
    pub fn off_byte(index: u8) -> u8 {
        led_off(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_bytes() {
        assert_eq!(LedState::RED.command_byte(3), 0b1000_0011);
        assert_eq!(LedState::GREEN.command_byte(0), 0b0100_0000);
        assert_eq!(LedState::solid(true, true, true).command_byte(31), 0xFF);
        assert_eq!(LedState::OFF.command_byte(5), 5);
        assert_eq!(LedState::off_byte(5), 5);
    }

    #[test]
    fn test_feedback_states() {
        assert_eq!(LedState::ERROR.flash, Duration::from_millis(333));
        assert_eq!(LedState::ERROR.ttl, Duration::from_secs(4));
        assert!(LedState::ERROR.red && !LedState::ERROR.blue);

        assert!(LedState::PERFORMING.blue);
        assert!(LedState::PERFORMING.is_flashing());
        assert!(!LedState::PERFORMING.expires());

        assert!(!LedState::AWAITING_CONFIRMATION.expires());
        assert_eq!(LedState::AWAITING_CONFIRMATION.flash, Duration::from_millis(150));
    }
}
