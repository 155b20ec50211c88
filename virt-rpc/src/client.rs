//! Connection to a libvirt daemon
//!
//! One TCP connection carries both call/reply traffic and asynchronous event
//! messages. A reader task demultiplexes incoming messages:
//!
//! ```text
//!   call() ──► [writer lock] ──► socket ──► libvirtd
//!                                             │
//!   oneshot ◄── reply (by serial) ◄── [reader task]
//!   broadcast ◄── lifecycle message ◄──┘
//! ```
//!
//! When the socket closes every pending call fails with
//! [`VirtError::Disconnected`] and event receivers see the channel close.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::VirtError;
use crate::protocol::{
    decode_error, encode_call, procedure, Header, MessageType, Status, DEFAULT_PORT,
    EVENT_ID_LIFECYCLE, HEADER_LEN,
};
use crate::types::{Domain, DomainState, LifecycleEvent};
use crate::xdr::{XdrReader, XdrWriter};

/// `host` becomes `host:16509`; `host:port` and `[v6]:port` are kept
fn with_default_port(address: &str) -> String {
    match address.rsplit_once(':') {
        Some((_, port)) if port.parse::<u16>().is_ok() => address.to_string(),
        _ => format!("{address}:{DEFAULT_PORT}"),
    }
}

/// Dial timeout for the TCP connection
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// URI opened when none is given
pub const DEFAULT_URI: &str = "qemu:///system";

/// Buffered lifecycle events per subscriber
const EVENT_CHANNEL_CAPACITY: usize = 64;

type ReplySender = oneshot::Sender<Result<Vec<u8>, VirtError>>;

/// State shared between callers and the reader task
struct Shared {
    pending: HashMap<u32, ReplySender>,
    /// Dropped by the reader on exit, which closes every subscriber
    events: Option<broadcast::Sender<LifecycleEvent>>,
    closed: bool,
}

/// A libvirt remote-protocol connection
pub struct Libvirt {
    address: String,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    next_serial: AtomicU32,
    shared: Arc<Mutex<Shared>>,
    /// Callback ID of the lifecycle registration, once made
    lifecycle_callback: tokio::sync::Mutex<Option<i32>>,
    reader: JoinHandle<()>,
}

impl Libvirt {
    /// Dial `address` and open the default URI
    pub async fn connect(address: &str) -> Result<Self, VirtError> {
        Self::connect_uri(address, Some(DEFAULT_URI)).await
    }

    /// Dial `address` and open `uri` (`None` lets the daemon pick).
    ///
    /// An address without a port gets the libvirtd TCP port.
    pub async fn connect_uri(address: &str, uri: Option<&str>) -> Result<Self, VirtError> {
        let address = with_default_port(address);
        let address = address.as_str();
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(address))
            .await
            .map_err(|_| VirtError::ConnectTimeout(address.to_string()))?
            .map_err(|source| VirtError::Connect {
                address: address.to_string(),
                source,
            })?;
        let _ = stream.set_nodelay(true);

        let client = Self::from_stream(address, stream);

        let mut args = XdrWriter::new();
        args.put_opt_string(uri).put_u32(0);
        client.call(procedure::CONNECT_OPEN, args).await?;

        info!("Connected to libvirt at {} ({})", address, uri.unwrap_or("default"));
        Ok(client)
    }

    fn from_stream(address: &str, stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Arc::new(Mutex::new(Shared {
            pending: HashMap::new(),
            events: Some(events),
            closed: false,
        }));

        let reader = tokio::spawn(read_loop(read_half, Arc::clone(&shared)));

        Self {
            address: address.to_string(),
            writer: tokio::sync::Mutex::new(write_half),
            next_serial: AtomicU32::new(1),
            shared,
            lifecycle_callback: tokio::sync::Mutex::new(None),
            reader,
        }
    }

    /// Whether the connection has gone away
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Send one call and wait for its reply payload
    async fn call(&self, proc_nr: u32, args: XdrWriter) -> Result<Vec<u8>, VirtError> {
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut shared = self.shared.lock();
            if shared.closed {
                return Err(VirtError::Disconnected);
            }
            shared.pending.insert(serial, tx);
        }

        let msg = encode_call(proc_nr, serial, &args.into_bytes());
        trace!("call proc={} serial={} len={}", proc_nr, serial, msg.len());

        let written = {
            let mut writer = self.writer.lock().await;
            writer.write_all(&msg).await
        };
        if let Err(e) = written {
            self.shared.lock().pending.remove(&serial);
            return Err(e.into());
        }

        rx.await.map_err(|_| VirtError::Disconnected)?
    }

    pub async fn domain_lookup_by_name(&self, name: &str) -> Result<Domain, VirtError> {
        let mut args = XdrWriter::new();
        args.put_string(name);
        let reply = self.call(procedure::DOMAIN_LOOKUP_BY_NAME, args).await?;
        Domain::decode(&mut XdrReader::new(&reply))
    }

    /// Current state and its reason code
    pub async fn domain_get_state(&self, dom: &Domain) -> Result<(DomainState, i32), VirtError> {
        let mut args = XdrWriter::new();
        dom.encode(&mut args);
        args.put_u32(0);
        let reply = self.call(procedure::DOMAIN_GET_STATE, args).await?;

        let mut r = XdrReader::new(&reply);
        let raw = r.get_i32()?;
        let reason = r.get_i32()?;
        let state = DomainState::from_i32(raw)
            .ok_or_else(|| VirtError::Decode(format!("unknown domain state {raw}")))?;
        Ok((state, reason))
    }

    /// Start a defined, inactive domain
    pub async fn domain_create(&self, dom: &Domain) -> Result<(), VirtError> {
        self.domain_call(procedure::DOMAIN_CREATE, dom).await
    }

    /// Ask the guest to shut down (ACPI or agent, daemon's choice)
    pub async fn domain_shutdown(&self, dom: &Domain) -> Result<(), VirtError> {
        self.domain_call(procedure::DOMAIN_SHUTDOWN, dom).await
    }

    pub async fn domain_resume(&self, dom: &Domain) -> Result<(), VirtError> {
        self.domain_call(procedure::DOMAIN_RESUME, dom).await
    }

    /// Wake a guest from a power-management suspend
    pub async fn domain_pm_wakeup(&self, dom: &Domain) -> Result<(), VirtError> {
        let mut args = XdrWriter::new();
        dom.encode(&mut args);
        args.put_u32(0);
        self.call(procedure::DOMAIN_PM_WAKEUP, args).await.map(drop)
    }

    async fn domain_call(&self, proc_nr: u32, dom: &Domain) -> Result<(), VirtError> {
        let mut args = XdrWriter::new();
        dom.encode(&mut args);
        self.call(proc_nr, args).await.map(drop)
    }

    /// Subscribe to lifecycle events of every domain.
    ///
    /// The first subscription registers a callback with the daemon; later
    /// subscriptions share it. The receiver closes when the connection does.
    pub async fn lifecycle_events(
        &self,
    ) -> Result<broadcast::Receiver<LifecycleEvent>, VirtError> {
        let rx = self
            .shared
            .lock()
            .events
            .as_ref()
            .map(|tx| tx.subscribe())
            .ok_or(VirtError::Disconnected)?;

        let mut callback = self.lifecycle_callback.lock().await;
        if callback.is_none() {
            let mut args = XdrWriter::new();
            // eventID, then a null domain pointer (all domains)
            args.put_i32(EVENT_ID_LIFECYCLE).put_u32(0);
            let reply = self
                .call(procedure::CONNECT_DOMAIN_EVENT_CALLBACK_REGISTER_ANY, args)
                .await?;
            let id = XdrReader::new(&reply).get_i32()?;
            debug!("Registered lifecycle callback {}", id);
            *callback = Some(id);
        }

        Ok(rx)
    }

    /// Deregister callbacks and close the connection
    pub async fn disconnect(&self) -> Result<(), VirtError> {
        if let Some(id) = self.lifecycle_callback.lock().await.take() {
            let mut args = XdrWriter::new();
            args.put_i32(id);
            if let Err(e) = self
                .call(procedure::CONNECT_DOMAIN_EVENT_CALLBACK_DEREGISTER_ANY, args)
                .await
            {
                debug!("Deregistering lifecycle callback {} failed: {}", id, e);
            }
        }

        let result = self
            .call(procedure::CONNECT_CLOSE, XdrWriter::new())
            .await
            .map(drop);
        let _ = self.writer.lock().await.shutdown().await;
        info!("Disconnected from libvirt at {}", self.address);
        result
    }
}

impl Drop for Libvirt {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl std::fmt::Debug for Libvirt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Libvirt")
            .field("address", &self.address)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Reader task
// ============================================================================

async fn read_loop(mut sock: OwnedReadHalf, shared: Arc<Mutex<Shared>>) {
    match read_messages(&mut sock, &shared).await {
        Ok(()) => debug!("libvirt connection closed"),
        Err(e) => warn!("libvirt connection lost: {}", e),
    }

    let mut shared = shared.lock();
    shared.closed = true;
    // Dropping the reply senders fails every waiting call
    shared.pending.clear();
    shared.events = None;
}

/// Read until EOF (`Ok`) or a stream/framing error
async fn read_messages(
    sock: &mut OwnedReadHalf,
    shared: &Mutex<Shared>,
) -> Result<(), VirtError> {
    let mut head = [0u8; HEADER_LEN];
    loop {
        match sock.read_exact(&mut head).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        let header = Header::decode(&head)?;
        let mut payload = vec![0u8; header.payload_len()];
        sock.read_exact(&mut payload).await?;

        trace!(
            "recv proc={} type={:?} serial={} status={:?}",
            header.procedure,
            header.kind,
            header.serial,
            header.status
        );
        dispatch(&header, payload, shared);
    }
}

fn dispatch(header: &Header, payload: Vec<u8>, shared: &Mutex<Shared>) {
    match header.kind {
        MessageType::Reply => {
            let result = match header.status {
                Status::Ok => Ok(payload),
                Status::Error => Err(decode_error(&payload)),
                Status::Continue => {
                    debug!("Ignoring stream continuation for serial {}", header.serial);
                    return;
                }
            };
            match shared.lock().pending.remove(&header.serial) {
                Some(tx) => {
                    let _ = tx.send(result);
                }
                None => warn!("Reply for unknown serial {}", header.serial),
            }
        }
        MessageType::Message
            if header.procedure == procedure::DOMAIN_EVENT_CALLBACK_LIFECYCLE =>
        {
            match LifecycleEvent::decode(&mut XdrReader::new(&payload)) {
                Ok(event) => {
                    if let Some(tx) = shared.lock().events.as_ref() {
                        // No subscribers is fine
                        let _ = tx.send(event);
                    }
                }
                Err(e) => warn!("Bad lifecycle event: {}", e),
            }
        }
        _ => debug!(
            "Ignoring {:?} message for procedure {}",
            header.kind, header.procedure
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_port_added_when_missing() {
        assert_eq!(with_default_port("10.0.0.2"), "10.0.0.2:16509");
        assert_eq!(with_default_port("hv.lan:16510"), "hv.lan:16510");
        assert_eq!(with_default_port("[fe80::1]"), "[fe80::1]:16509");
        assert_eq!(with_default_port("[fe80::1]:16509"), "[fe80::1]:16509");
    }
}
