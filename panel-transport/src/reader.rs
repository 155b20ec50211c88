//! Press reader thread
//!
//! Device reads are blocking and cannot be cancelled, so each link gets a
//! dedicated OS thread that reads one byte at a time and forwards it into a
//! bounded tokio channel. The channel closes when the device reaches EOF or
//! errors, which is how consumers learn that the link is gone.

use std::io::{ErrorKind, Read};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::types::ButtonIndex;

/// Capacity of the raw press channel
pub const PRESS_CHANNEL_CAPACITY: usize = 16;

/// Spawn a thread reading single press bytes from `reader`.
///
/// Read timeouts and interrupts are retried; EOF and any other error end the
/// thread and close the returned channel.
pub fn spawn_byte_reader<R>(mut reader: R, name: &str) -> mpsc::Receiver<ButtonIndex>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel(PRESS_CHANNEL_CAPACITY);
    let name = name.to_string();
    let thread_name = format!("press-reader:{name}");

    let spawned = std::thread::Builder::new()
        .name(thread_name)
        .spawn(move || {
            debug!("{} press reader started", name);
            let mut byte = [0u8; 1];
            loop {
                match reader.read(&mut byte) {
                    Ok(0) => {
                        debug!("{} reached end of stream", name);
                        break;
                    }
                    Ok(_) => {
                        if tx.blocking_send(byte[0]).is_err() {
                            debug!("{} press channel closed", name);
                            break;
                        }
                    }
                    Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => {
                        if tx.is_closed() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("{} read error: {}", name, e);
                        break;
                    }
                }
            }
            debug!("{} press reader exiting", name);
        });

    if let Err(e) = spawned {
        // Dropping the sender inside the failed closure already closed `rx`
        warn!("Failed to spawn press reader: {}", e);
    }

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_bytes_forwarded_then_closed_on_eof() {
        let mut rx = spawn_byte_reader(Cursor::new(vec![0u8, 3, 1]), "test");
        assert_eq!(rx.recv().await, Some(0));
        assert_eq!(rx.recv().await, Some(3));
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, None);
    }

    struct Flaky {
        calls: usize,
    }

    impl Read for Flaky {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.calls += 1;
            match self.calls {
                1 => Err(std::io::Error::new(ErrorKind::TimedOut, "idle")),
                2 => {
                    buf[0] = 2;
                    Ok(1)
                }
                _ => Err(std::io::Error::new(ErrorKind::BrokenPipe, "unplugged")),
            }
        }
    }

    #[tokio::test]
    async fn test_timeout_retried_error_closes() {
        let mut rx = spawn_byte_reader(Flaky { calls: 0 }, "flaky");
        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(rx.recv().await, None);
    }
}
