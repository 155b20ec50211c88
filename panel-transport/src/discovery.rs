//! Serial panel discovery and handshake

use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info, warn};

use crate::error::LinkError;
use crate::protocol::{self, serial};
use crate::reader::spawn_byte_reader;
use crate::sink::LedWriter;
use crate::types::{DeviceInfo, LinkType};
use crate::PanelSession;

/// Port name fragments that look like USB serial adapters
const CANDIDATE_PATTERNS: &[&str] = &["ttyUSB", "ttyACM", "usbserial", "usbmodem"];

/// Read timeout of an opened session; the reader thread just retries on it
const SESSION_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Finds a panel among serial ports by trying the handshake on each one
#[derive(Debug, Clone)]
pub struct SerialDiscovery {
    /// Explicit candidate paths; empty means "scan the system"
    candidates: Vec<String>,
    /// Delay after a successful handshake before the link is usable
    settle_delay: Duration,
}

impl Default for SerialDiscovery {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl SerialDiscovery {
    /// Create a discovery over explicit candidate paths (or a system scan if empty)
    pub fn new(candidates: Vec<String>) -> Self {
        Self {
            candidates,
            settle_delay: serial::SETTLE_DELAY,
        }
    }

    /// Override the post-handshake settle delay
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Candidate paths to try, in order
    pub fn candidates(&self) -> Result<Vec<String>, LinkError> {
        if !self.candidates.is_empty() {
            return Ok(self.candidates.clone());
        }

        let ports = serialport::available_ports()?;
        let mut paths: Vec<String> = ports
            .into_iter()
            .map(|p| p.port_name)
            .filter(|name| CANDIDATE_PATTERNS.iter().any(|pat| name.contains(pat)))
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Open the first candidate that completes the handshake.
    ///
    /// Blocks for the handshake and the settle delay; call from a blocking
    /// context (see [`SerialDiscovery::open`]).
    pub fn open_blocking(&self) -> Result<(Box<dyn SerialPort>, DeviceInfo), LinkError> {
        let paths = self.candidates()?;
        let mut mismatch = None;

        for path in &paths {
            match open_candidate(path) {
                Ok((port, button_count)) => {
                    let info = DeviceInfo {
                        link_type: LinkType::Serial,
                        device_path: path.clone(),
                        button_count,
                    };
                    info!(
                        "Found panel with {} {} at {}",
                        button_count,
                        info.button_noun(),
                        path
                    );
                    std::thread::sleep(self.settle_delay);
                    return Ok((port, info));
                }
                Err(e @ LinkError::ProtocolMismatch { .. }) => {
                    warn!("Skipping {}: {}", path, e);
                    mismatch = Some(e);
                }
                Err(e) => {
                    debug!("Skipping {}: {}", path, e);
                }
            }
        }

        Err(mismatch.unwrap_or_else(|| {
            LinkError::NoDeviceFound(if paths.is_empty() {
                "no serial ports".to_string()
            } else {
                paths.join(", ")
            })
        }))
    }

    /// Discover a panel and start its press reader.
    pub async fn open(&self) -> Result<PanelSession, LinkError> {
        let discovery = self.clone();
        let (port, info) = tokio::task::spawn_blocking(move || discovery.open_blocking())
            .await
            .map_err(|e| LinkError::Serial(format!("discovery task failed: {e}")))??;

        let mut reader = port.try_clone()?;
        reader.set_timeout(SESSION_READ_TIMEOUT)?;
        let presses = spawn_byte_reader(reader, &info.device_path);
        let leds = Arc::new(LedWriter::new(port));

        Ok(PanelSession {
            info,
            presses,
            leds,
        })
    }
}

/// Open one serial candidate and run the handshake on it
fn open_candidate(path: &str) -> Result<(Box<dyn SerialPort>, u8), LinkError> {
    let mut port = serialport::new(path, serial::BAUD_RATE)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(serial::HANDSHAKE_TIMEOUT)
        .open()?;

    let button_count = handshake(&mut port, path)?;
    Ok((port, button_count))
}

/// Perform the panel handshake on an already open stream.
///
/// Writes the request byte, reads exactly one reply byte and decodes the
/// button count from it.
pub fn handshake<P: Read + Write + ?Sized>(port: &mut P, path: &str) -> Result<u8, LinkError> {
    port.write_all(&[protocol::HANDSHAKE_REQUEST])?;
    port.flush()?;

    let mut reply = [0u8; 1];
    match port.read(&mut reply) {
        Ok(1) => {}
        Ok(_) => return Err(LinkError::Disconnected),
        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => return Err(LinkError::Timeout),
        Err(e) => return Err(e.into()),
    }

    debug!("Handshake reply from {}: 0x{:02X}", path, reply[0]);
    protocol::decode_handshake_reply(reply[0], path)
}
