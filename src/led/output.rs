//! LED output that outlives device sessions
//!
//! Engines keep running while the panel is unplugged. They write into a
//! [`LedOutput`], which forwards to the currently attached device sink (or
//! nowhere) and remembers the last byte per button so a reattached panel
//! comes back showing what it showed before.

use std::sync::Arc;

use panel_transport::protocol::{INDEX_MASK, MAX_BUTTONS};
use panel_transport::{LedSink, LinkError, NullSink};
use parking_lot::Mutex;
use tracing::debug;

/// Device and remembered bytes change together, so a replay can never land
/// after a newer write
struct Routing {
    device: Arc<dyn LedSink>,
    last: [Option<u8>; MAX_BUTTONS as usize + 1],
}

pub struct LedOutput {
    routing: Mutex<Routing>,
}

impl LedOutput {
    pub fn new() -> Self {
        Self {
            routing: Mutex::new(Routing {
                device: Arc::new(NullSink),
                last: [None; MAX_BUTTONS as usize + 1],
            }),
        }
    }

    /// Route output to `sink` and replay the last known state of every LED
    pub fn attach(&self, sink: Arc<dyn LedSink>) -> Result<(), LinkError> {
        let mut routing = self.routing.lock();
        routing.device = sink;
        let replay: Vec<u8> = routing.last.iter().flatten().copied().collect();
        debug!("Replaying {} LED states", replay.len());
        for cmd in replay {
            routing.device.write_command(cmd)?;
        }
        Ok(())
    }

    /// Drop the device sink; writes are only remembered until the next attach
    pub fn detach(&self) {
        self.routing.lock().device = Arc::new(NullSink);
    }
}

impl Default for LedOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl LedSink for LedOutput {
    fn write_command(&self, cmd: u8) -> Result<(), LinkError> {
        let mut routing = self.routing.lock();
        routing.last[(cmd & INDEX_MASK) as usize] = Some(cmd);
        routing.device.write_command(cmd)
    }
}
