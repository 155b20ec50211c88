//! Device link for multi-button LED panels
//!
//! This crate finds a panel, learns how many buttons it has and exposes the
//! two directions of its byte stream separately:
//!
//! - presses arrive on a bounded channel of raw button indices, fed by a
//!   dedicated reader thread (or task, for input devices)
//! - LED commands go through a shared [`LedSink`] that serializes writers
//!
//! Two backends exist:
//!
//! - Serial panel (handshake protocol, up to 31 buttons with tri-color LEDs)
//! - Kernel input device (one button recognized by its key sequence, no LEDs)

pub mod error;
pub mod event_parser;
pub mod protocol;
pub mod types;

mod discovery;
mod input;
mod reader;
mod sink;

pub use discovery::{handshake, SerialDiscovery};
pub use error::LinkError;
pub use event_parser::{parse_input_frame, sequence_eq, InputFrame, TriggerMatcher};
pub use input::{InputLink, INPUT_BUTTON, REOPEN_PAUSE};
pub use reader::{spawn_byte_reader, PRESS_CHANNEL_CAPACITY};
pub use sink::{LedSink, LedWriter, NullSink};
pub use types::{ButtonIndex, DeviceInfo, LinkType};

use std::sync::Arc;
use tokio::sync::mpsc;

/// An opened panel: identification, raw press stream and LED sink
pub struct PanelSession {
    /// What was opened
    pub info: DeviceInfo,
    /// Raw button indices as read from the device; closes when the device goes away
    pub presses: mpsc::Receiver<ButtonIndex>,
    /// Shared, serialized LED command writer
    pub leds: Arc<dyn LedSink>,
}

impl std::fmt::Debug for PanelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PanelSession")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}
