//! Single-button link over a kernel input device
//!
//! Some off-the-shelf USB buttons enumerate as keyboards and emit a fixed key
//! combination when pressed. This link reads raw `input_event` frames from the
//! device node and reports a press of button 0 whenever a sync-terminated key
//! burst equals the trigger sequence. There is no handshake and no LED.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::event_parser::{parse_input_frame, TriggerMatcher, FRAME_SIZE};
use crate::reader::PRESS_CHANNEL_CAPACITY;
use crate::sink::NullSink;
use crate::types::{ButtonIndex, DeviceInfo, LinkType};
use crate::PanelSession;

/// Pause before reopening a device that failed to open or errored
pub const REOPEN_PAUSE: Duration = Duration::from_secs(5);

/// The only button an input link reports
pub const INPUT_BUTTON: ButtonIndex = 0;

/// Kernel input device treated as a one-button panel
#[derive(Debug, Clone)]
pub struct InputLink {
    path: PathBuf,
    trigger: Vec<u16>,
    reopen_pause: Duration,
}

impl InputLink {
    /// Create a link on `path` firing on `trigger`
    pub fn new(path: impl Into<PathBuf>, trigger: &[u16]) -> Self {
        Self {
            path: path.into(),
            trigger: trigger.to_vec(),
            reopen_pause: REOPEN_PAUSE,
        }
    }

    /// Override the reopen pause
    pub fn with_reopen_pause(mut self, pause: Duration) -> Self {
        self.reopen_pause = pause;
        self
    }

    /// Start reading the device. The returned session never ends on its own:
    /// device errors close and reopen the node until the press receiver is
    /// dropped.
    pub fn open(self) -> PanelSession {
        let info = DeviceInfo {
            link_type: LinkType::Input,
            device_path: self.path.display().to_string(),
            button_count: 1,
        };
        let (tx, presses) = mpsc::channel(PRESS_CHANNEL_CAPACITY);
        tokio::spawn(self.run(tx));

        PanelSession {
            info,
            presses,
            leds: Arc::new(NullSink),
        }
    }

    async fn run(self, tx: mpsc::Sender<ButtonIndex>) {
        let mut matcher = TriggerMatcher::new(&self.trigger);

        while !tx.is_closed() {
            let mut dev = match tokio::fs::File::open(&self.path).await {
                Ok(f) => f,
                Err(e) => {
                    warn!(
                        "Couldn't open button device {}, waiting {:?}: {}",
                        self.path.display(),
                        self.reopen_pause,
                        e
                    );
                    tokio::time::sleep(self.reopen_pause).await;
                    continue;
                }
            };

            info!(
                "Listening for pushes on {} (trigger {:?})",
                self.path.display(),
                matcher.trigger()
            );
            match read_frames(&mut dev, &mut matcher, &tx).await {
                Ok(()) => return,
                Err(e) => {
                    warn!("Failed listening for pushes: {}", e);
                    drop(dev);
                    tokio::time::sleep(self.reopen_pause).await;
                }
            }
        }
    }
}

/// Read frames until the stream errors (`Err`) or the receiver goes away (`Ok`).
pub(crate) async fn read_frames<R>(
    dev: &mut R,
    matcher: &mut TriggerMatcher,
    tx: &mpsc::Sender<ButtonIndex>,
) -> std::io::Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = [0u8; FRAME_SIZE];
    loop {
        let n = dev.read(&mut buf).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "input device closed",
            ));
        }
        if n != FRAME_SIZE {
            warn!("Only read {} bytes (instead of {})", n, FRAME_SIZE);
            continue;
        }

        let Some(frame) = parse_input_frame(&buf) else {
            warn!("Undecodable input frame: {:02X?}", &buf);
            continue;
        };

        if matcher.feed(frame) {
            debug!("Trigger sequence matched");
            if tx.send(INPUT_BUTTON).await.is_err() {
                return Ok(());
            }
        }
    }
}
