//! libvirt remote protocol framing
//!
//! Every message on the wire is a 4-byte big-endian length (which counts
//! itself) followed by a 24-byte header and an XDR payload.

use crate::error::VirtError;
use crate::xdr::{XdrReader, XdrWriter};

/// Remote program number (`REMOTE_PROGRAM`)
pub const PROGRAM: u32 = 0x2000_8086;
/// Remote protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Default libvirtd TCP port
pub const DEFAULT_PORT: u16 = 16509;

/// Bytes in the length prefix plus header
pub const HEADER_LEN: usize = 28;
/// Upper bound libvirt itself enforces on a single message
pub const MAX_MESSAGE_LEN: usize = 32 * 1024 * 1024;

/// Remote procedure numbers used by this client
pub mod procedure {
    pub const CONNECT_OPEN: u32 = 1;
    pub const CONNECT_CLOSE: u32 = 2;
    pub const DOMAIN_CREATE: u32 = 9;
    pub const DOMAIN_LOOKUP_BY_NAME: u32 = 23;
    pub const DOMAIN_RESUME: u32 = 28;
    pub const DOMAIN_SHUTDOWN: u32 = 33;
    pub const DOMAIN_GET_STATE: u32 = 212;
    pub const DOMAIN_PM_WAKEUP: u32 = 267;
    pub const CONNECT_DOMAIN_EVENT_CALLBACK_REGISTER_ANY: u32 = 316;
    pub const CONNECT_DOMAIN_EVENT_CALLBACK_DEREGISTER_ANY: u32 = 317;
    pub const DOMAIN_EVENT_CALLBACK_LIFECYCLE: u32 = 318;
}

/// Event ID for lifecycle callbacks (`VIR_DOMAIN_EVENT_ID_LIFECYCLE`)
pub const EVENT_ID_LIFECYCLE: i32 = 0;

/// Message type field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageType {
    Call = 0,
    Reply = 1,
    Message = 2,
    Stream = 3,
}

impl MessageType {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Call),
            1 => Some(Self::Reply),
            2 => Some(Self::Message),
            3 => Some(Self::Stream),
            _ => None,
        }
    }
}

/// Status field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Status {
    Ok = 0,
    Error = 1,
    Continue = 2,
}

impl Status {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Ok),
            1 => Some(Self::Error),
            2 => Some(Self::Continue),
            _ => None,
        }
    }
}

/// Decoded message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Total message length including the length word
    pub len: u32,
    pub program: u32,
    pub version: u32,
    pub procedure: u32,
    pub kind: MessageType,
    pub serial: u32,
    pub status: Status,
}

impl Header {
    /// Header for an outgoing call
    pub fn call(procedure: u32, serial: u32, payload_len: usize) -> Self {
        Self {
            len: (HEADER_LEN + payload_len) as u32,
            program: PROGRAM,
            version: PROTOCOL_VERSION,
            procedure,
            kind: MessageType::Call,
            serial,
            status: Status::Ok,
        }
    }

    pub fn payload_len(&self) -> usize {
        (self.len as usize).saturating_sub(HEADER_LEN)
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut w = XdrWriter::new();
        w.put_u32(self.len)
            .put_u32(self.program)
            .put_u32(self.version)
            .put_u32(self.procedure)
            .put_u32(self.kind as u32)
            .put_u32(self.serial)
            .put_u32(self.status as u32);
        let bytes = w.into_bytes();
        let mut out = [0u8; HEADER_LEN];
        out.copy_from_slice(&bytes);
        out
    }

    pub fn decode(buf: &[u8; HEADER_LEN]) -> Result<Self, VirtError> {
        let mut r = XdrReader::new(buf);
        let len = r.get_u32()?;
        let program = r.get_u32()?;
        let version = r.get_u32()?;
        let procedure = r.get_u32()?;
        let kind_raw = r.get_u32()?;
        let serial = r.get_u32()?;
        let status_raw = r.get_u32()?;

        if (len as usize) < HEADER_LEN || (len as usize) > MAX_MESSAGE_LEN {
            return Err(VirtError::Decode(format!("bad message length {len}")));
        }
        if program != PROGRAM || version != PROTOCOL_VERSION {
            return Err(VirtError::UnexpectedProgram { program, version });
        }
        let kind = MessageType::from_u32(kind_raw)
            .ok_or_else(|| VirtError::Decode(format!("bad message type {kind_raw}")))?;
        let status = Status::from_u32(status_raw)
            .ok_or_else(|| VirtError::Decode(format!("bad status {status_raw}")))?;

        Ok(Self {
            len,
            program,
            version,
            procedure,
            kind,
            serial,
            status,
        })
    }
}

/// Build a complete call message
pub fn encode_call(procedure: u32, serial: u32, payload: &[u8]) -> Vec<u8> {
    let header = Header::call(procedure, serial, payload.len());
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(payload);
    out
}

/// Decode the `remote_error` payload of an error reply
pub fn decode_error(payload: &[u8]) -> VirtError {
    match read_remote_error(&mut XdrReader::new(payload)) {
        Ok((code, domain, message)) => VirtError::Remote {
            code,
            domain,
            message: message.unwrap_or_else(|| "unknown error".to_string()),
        },
        Err(e) => e,
    }
}

fn read_remote_error(r: &mut XdrReader<'_>) -> Result<(i32, i32, Option<String>), VirtError> {
    let code = r.get_i32()?;
    let domain = r.get_i32()?;
    let message = r.get_opt_string()?;
    Ok((code, domain, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let msg = encode_call(procedure::DOMAIN_GET_STATE, 7, &[0, 0, 0, 0]);
        assert_eq!(msg.len(), 32);
        assert_eq!(&msg[0..4], &32u32.to_be_bytes());
        assert_eq!(&msg[4..8], &[0x20, 0x00, 0x80, 0x86]);
        assert_eq!(&msg[12..16], &212u32.to_be_bytes());
        assert_eq!(&msg[20..24], &7u32.to_be_bytes());
    }

    #[test]
    fn test_header_decode() {
        let mut h = Header::call(procedure::DOMAIN_SHUTDOWN, 3, 12);
        h.kind = MessageType::Reply;
        h.status = Status::Error;
        let decoded = Header::decode(&h.encode()).unwrap();
        assert_eq!(decoded, h);
        assert_eq!(decoded.payload_len(), 12);
    }

    #[test]
    fn test_header_rejects_foreign_program() {
        let mut h = Header::call(1, 1, 0);
        h.program = 0x2000_8087;
        assert!(matches!(
            Header::decode(&h.encode()),
            Err(VirtError::UnexpectedProgram { .. })
        ));
    }

    #[test]
    fn test_header_rejects_short_length() {
        let mut h = Header::call(1, 1, 0);
        h.len = 4;
        assert!(matches!(Header::decode(&h.encode()), Err(VirtError::Decode(_))));
    }

    #[test]
    fn test_decode_error_payload() {
        let mut w = XdrWriter::new();
        w.put_i32(42).put_i32(10).put_opt_string(Some("Domain not found"));
        match decode_error(&w.into_bytes()) {
            VirtError::Remote {
                code,
                domain,
                message,
            } => {
                assert_eq!(code, 42);
                assert_eq!(domain, 10);
                assert_eq!(message, "Domain not found");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
