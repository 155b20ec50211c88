//! Per-button LED animation engine
//!
//! Each engine owns one button's LED. It renders every new [`LedState`]
//! immediately and then keeps re-rendering on a timer while the state is
//! dynamic:
//!
//! - solid, no TTL: rendered once
//! - solid with TTL: lit, then dark after TTL
//! - flashing: toggles every half period; with a TTL the remaining time
//!   shrinks by each phase and the last phase is cut short so the LED goes
//!   dark exactly when the TTL runs out

use std::sync::Arc;
use std::time::Duration;

use panel_transport::{ButtonIndex, LedSink};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::LedState;

/// Animation state of one LED
#[derive(Debug, Clone)]
pub(crate) struct Animation {
    state: LedState,
    /// Next render turns the LED off
    dark: bool,
    /// TTL not yet consumed by flash phases
    remaining: Duration,
}

impl Animation {
    pub(crate) fn new(state: LedState) -> Self {
        Self {
            state,
            dark: false,
            remaining: state.ttl,
        }
    }

    /// Byte to write for the current phase
    pub(crate) fn render(&self, index: ButtonIndex) -> u8 {
        if self.dark {
            LedState::off_byte(index)
        } else {
            self.state.command_byte(index)
        }
    }

    /// Move to the next phase after a render; `None` when nothing is left to do
    pub(crate) fn advance(&mut self) -> Option<Duration> {
        if !self.state.is_flashing() {
            if self.dark || !self.state.expires() {
                return None;
            }
            self.dark = true;
            return Some(self.state.ttl);
        }

        let half = self.state.flash / 2;
        if self.state.expires() {
            if self.remaining <= half {
                // Final phase: dark once the TTL is spent, then stop
                self.state.flash = Duration::ZERO;
                self.dark = true;
                return Some(self.remaining);
            }
            self.remaining -= half;
        }
        self.dark = !self.dark;
        Some(half)
    }
}

/// Drives one LED from a stream of states
pub struct LedEngine {
    index: ButtonIndex,
    sink: Arc<dyn LedSink>,
}

impl LedEngine {
    pub fn new(index: ButtonIndex, sink: Arc<dyn LedSink>) -> Self {
        Self { index, sink }
    }

    /// Spawn the engine on the current runtime
    pub fn spawn(self, states: mpsc::Receiver<LedState>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(states))
    }

    /// Render states until the sender goes away.
    ///
    /// Commands are handled in send order. When the channel closes the
    /// engine stops without touching the LED again.
    pub async fn run(self, mut states: mpsc::Receiver<LedState>) {
        let mut animation: Option<Animation> = None;
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;
                next = states.recv() => match next {
                    Some(state) => {
                        trace!("LED {}: {:?}", self.index, state);
                        animation = Some(Animation::new(state));
                    }
                    None => {
                        debug!("LED {}: state channel closed", self.index);
                        return;
                    }
                },
                _ = sleep_until_opt(deadline) => {}
            }

            let Some(anim) = animation.as_mut() else {
                deadline = None;
                continue;
            };
            self.write(anim.render(self.index));
            deadline = anim.advance().map(|after| Instant::now() + after);
        }
    }

    fn write(&self, cmd: u8) {
        if let Err(e) = self.sink.write_command(cmd) {
            warn!("LED {}: write failed: {}", self.index, e);
        }
    }
}

/// Sleep until `deadline`, or forever when there is none
pub(crate) async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use panel_transport::LinkError;
    use parking_lot::Mutex;

    /// Records every command byte with the (paused) time it was written
    #[derive(Default)]
    struct RecordingSink {
        start: Mutex<Option<Instant>>,
        writes: Mutex<Vec<(Duration, u8)>>,
    }

    impl RecordingSink {
        fn mark_start(&self) {
            *self.start.lock() = Some(Instant::now());
        }

        fn writes(&self) -> Vec<(Duration, u8)> {
            self.writes.lock().clone()
        }
    }

    impl LedSink for RecordingSink {
        fn write_command(&self, cmd: u8) -> Result<(), LinkError> {
            let start = (*self.start.lock()).unwrap_or_else(Instant::now);
            self.writes.lock().push((Instant::now() - start, cmd));
            Ok(())
        }
    }

    const LIT: u8 = 0b0010_0010; // blue, button 2
    const DARK: u8 = 2;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_solid_without_ttl_renders_once() {
        let mut anim = Animation::new(LedState::GREEN);
        assert_eq!(anim.render(1), 0b0100_0001);
        assert_eq!(anim.advance(), None);
    }

    #[test]
    fn test_solid_with_ttl_goes_dark_once() {
        let mut anim = Animation::new(LedState::RED.expiring(Duration::from_secs(4)));
        assert_eq!(anim.advance(), Some(Duration::from_secs(4)));
        assert_eq!(anim.render(0), 0);
        assert_eq!(anim.advance(), None);
    }

    #[test]
    fn test_flash_without_ttl_toggles_forever() {
        let mut anim = Animation::new(LedState::PERFORMING);
        for i in 0..20 {
            let expected = if i % 2 == 0 { LIT } else { DARK };
            assert_eq!(anim.render(2), expected);
            assert_eq!(anim.advance(), Some(ms(250)));
        }
    }

    #[test]
    fn test_flash_ttl_truncates_last_phase() {
        let mut anim = Animation::new(LedState::BLUE.flashing(ms(500)).expiring(ms(1200)));
        let mut phases = Vec::new();
        loop {
            let byte = anim.render(2);
            match anim.advance() {
                Some(after) => phases.push((byte, after)),
                None => {
                    phases.push((byte, Duration::ZERO));
                    break;
                }
            }
        }
        assert_eq!(
            phases,
            vec![
                (LIT, ms(250)),
                (DARK, ms(250)),
                (LIT, ms(250)),
                (DARK, ms(250)),
                (LIT, ms(200)),
                (DARK, Duration::ZERO),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_flash_with_ttl_timeline() {
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = mpsc::channel(4);
        let engine = LedEngine::new(2, sink.clone()).spawn(rx);

        sink.mark_start();
        tx.send(LedState::BLUE.flashing(ms(500)).expiring(ms(1200)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(
            sink.writes(),
            vec![
                (ms(0), LIT),
                (ms(250), DARK),
                (ms(500), LIT),
                (ms(750), DARK),
                (ms(1000), LIT),
                (ms(1200), DARK),
            ]
        );

        drop(tx);
        engine.await.unwrap();
        assert_eq!(sink.writes().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_solid_ttl_timeline() {
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = mpsc::channel(4);
        let _engine = LedEngine::new(0, sink.clone()).spawn(rx);

        sink.mark_start();
        tx.send(LedState::RED.expiring(Duration::from_secs(4)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(
            sink.writes(),
            vec![(ms(0), 0b1000_0000), (Duration::from_secs(4), 0)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_state_replaces_animation() {
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = mpsc::channel(4);
        let _engine = LedEngine::new(2, sink.clone()).spawn(rx);

        sink.mark_start();
        tx.send(LedState::PERFORMING).await.unwrap();
        tokio::time::sleep(ms(300)).await;
        tx.send(LedState::GREEN).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(
            sink.writes(),
            vec![(ms(0), LIT), (ms(250), DARK), (ms(300), 0b0100_0010)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_channel_stops_without_writing() {
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = mpsc::channel(4);
        let engine = LedEngine::new(2, sink.clone()).spawn(rx);

        tx.send(LedState::PERFORMING).await.unwrap();
        tokio::time::sleep(ms(100)).await;
        drop(tx);
        engine.await.unwrap();

        let before = sink.writes().len();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(before, 1);
        assert_eq!(sink.writes().len(), 1);
    }
}
