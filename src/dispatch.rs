//! Press dispatch: raw button indices in, debounced presses out to modules.

use std::time::Duration;

use panel_transport::ButtonIndex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::module::Press;

/// Debounce window for buttons read from kernel input devices
pub const INPUT_DEBOUNCE: Duration = Duration::from_millis(50);

/// Accepts a press only if the last *accepted* press is more than `window` ago.
///
/// Repeats inside the window are recorded as seen but never extend it.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    last_accepted: Option<Instant>,
    last_seen: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: None,
            last_seen: None,
        }
    }

    /// Pass-through for hardware-debounced links
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn accept(&mut self, now: Instant) -> bool {
        self.last_seen = Some(now);
        let accepted = match self.last_accepted {
            None => true,
            Some(_) if self.window.is_zero() => true,
            Some(last) => now.saturating_duration_since(last) > self.window,
        };
        if accepted {
            self.last_accepted = Some(now);
        }
        accepted
    }

    pub fn last_seen(&self) -> Option<Instant> {
        self.last_seen
    }
}

/// Route raw presses to per-button channels until the raw stream ends.
///
/// Indices outside `buttons` are logged and discarded. A full button channel
/// drops the press rather than stalling the other buttons. Returning drops
/// `buttons`, which closes every channel this function held the last sender of.
pub async fn dispatch(
    mut raw: mpsc::Receiver<ButtonIndex>,
    buttons: Vec<mpsc::Sender<Press>>,
    window: Duration,
) {
    let mut debouncers = vec![Debouncer::new(window); buttons.len()];

    while let Some(index) = raw.recv().await {
        let Some(button) = buttons.get(index as usize) else {
            warn!(
                "Press on button {} ignored, only {} configured",
                index,
                buttons.len()
            );
            continue;
        };

        if !debouncers[index as usize].accept(Instant::now()) {
            trace!("Button {} bounce ignored", index);
            continue;
        }

        debug!("Button {} pressed", index);
        match button.try_send(Press) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("Button {} busy, press dropped", index),
            Err(TrySendError::Closed(_)) => debug!("Button {} has no module running", index),
        }
    }

    info!("Press stream ended");
}
