//! Common types for the device link

/// 0-based index of one physical button/LED pair
pub type ButtonIndex = u8;

/// Link type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkType {
    /// Serial panel speaking the handshake protocol
    Serial,
    /// Single button read from a kernel input device (no LEDs)
    Input,
}

impl LinkType {
    /// Whether the link can drive LEDs
    pub fn has_leds(&self) -> bool {
        matches!(self, Self::Serial)
    }

    /// Whether presses arrive already debounced by hardware
    pub fn is_hardware_debounced(&self) -> bool {
        matches!(self, Self::Serial)
    }
}

/// Identification of an opened panel
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Link type
    pub link_type: LinkType,
    /// Device path the link was opened on
    pub device_path: String,
    /// Number of buttons reported by the panel
    pub button_count: u8,
}

impl DeviceInfo {
    /// "button" or "buttons", for log lines
    pub fn button_noun(&self) -> &'static str {
        if self.button_count == 1 {
            "button"
        } else {
            "buttons"
        }
    }
}
