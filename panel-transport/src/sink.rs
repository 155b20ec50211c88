//! LED command sinks
//!
//! Every button's LED engine writes through one shared sink. Writes are single
//! bytes and the sink serializes them behind one lock, so commands from
//! different buttons never interleave on the wire.

use std::io::Write;

use parking_lot::Mutex;
use tracing::trace;

use crate::error::LinkError;

/// Destination for LED command bytes
pub trait LedSink: Send + Sync {
    /// Write one command byte to the panel
    fn write_command(&self, cmd: u8) -> Result<(), LinkError>;
}

/// LED sink over the write half of a device stream
pub struct LedWriter {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl LedWriter {
    /// Wrap a writer
    pub fn new<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
        }
    }
}

impl LedSink for LedWriter {
    fn write_command(&self, cmd: u8) -> Result<(), LinkError> {
        let mut writer = self.writer.lock();
        writer.write_all(&[cmd])?;
        writer.flush()?;
        Ok(())
    }
}

/// Sink for links without LEDs; commands are only traced
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LedSink for NullSink {
    fn write_command(&self, cmd: u8) -> Result<(), LinkError> {
        trace!("LED command 0x{:02X} dropped (no LEDs)", cmd);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_writer_passes_bytes_through() {
        let buf = SharedBuf::default();
        let sink = LedWriter::new(buf.clone());
        sink.write_command(0x81).unwrap();
        sink.write_command(0x02).unwrap();
        assert_eq!(*buf.0.lock(), vec![0x81, 0x02]);
    }

    #[test]
    fn test_concurrent_writers_never_interleave() {
        let buf = SharedBuf::default();
        let sink = Arc::new(LedWriter::new(buf.clone()));
        let handles: Vec<_> = (0..4u8)
            .map(|i| {
                let sink = Arc::clone(&sink);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        sink.write_command(i).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let bytes = buf.0.lock();
        assert_eq!(bytes.len(), 400);
        for i in 0..4u8 {
            assert_eq!(bytes.iter().filter(|&&b| b == i).count(), 100);
        }
    }
}
