//! Domain handles, states and lifecycle events

use crate::error::VirtError;
use crate::xdr::{XdrReader, XdrWriter};

pub const UUID_LEN: usize = 16;

/// A domain reference (`remote_nonnull_domain`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    pub name: String,
    pub uuid: [u8; UUID_LEN],
    /// Hypervisor ID, -1 while inactive
    pub id: i32,
}

impl Domain {
    pub fn encode(&self, w: &mut XdrWriter) {
        w.put_string(&self.name)
            .put_fixed_opaque(&self.uuid)
            .put_i32(self.id);
    }

    pub fn decode(r: &mut XdrReader<'_>) -> Result<Self, VirtError> {
        let name = r.get_string()?;
        let mut uuid = [0u8; UUID_LEN];
        uuid.copy_from_slice(r.get_fixed_opaque(UUID_LEN)?);
        let id = r.get_i32()?;
        Ok(Self { name, uuid, id })
    }

    /// Canonical 8-4-4-4-12 UUID text
    pub fn uuid_string(&self) -> String {
        let hex: String = self.uuid.iter().map(|b| format!("{b:02x}")).collect();
        format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        )
    }
}

/// Domain state as reported by `virDomainGetState`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainState {
    NoState,
    Running,
    Blocked,
    Paused,
    Shutdown,
    Shutoff,
    Crashed,
    PmSuspended,
}

impl DomainState {
    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Self::NoState),
            1 => Some(Self::Running),
            2 => Some(Self::Blocked),
            3 => Some(Self::Paused),
            4 => Some(Self::Shutdown),
            5 => Some(Self::Shutoff),
            6 => Some(Self::Crashed),
            7 => Some(Self::PmSuspended),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoState => "nostate",
            Self::Running => "running",
            Self::Blocked => "blocked",
            Self::Paused => "paused",
            Self::Shutdown => "shutdown",
            Self::Shutoff => "shutoff",
            Self::Crashed => "crashed",
            Self::PmSuspended => "pmsuspended",
        }
    }
}

impl std::fmt::Display for DomainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle event type (`virDomainEventType`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainEventType {
    Defined,
    Undefined,
    Started,
    Suspended,
    Resumed,
    Stopped,
    Shutdown,
    PmSuspended,
    Crashed,
}

impl DomainEventType {
    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Self::Defined),
            1 => Some(Self::Undefined),
            2 => Some(Self::Started),
            3 => Some(Self::Suspended),
            4 => Some(Self::Resumed),
            5 => Some(Self::Stopped),
            6 => Some(Self::Shutdown),
            7 => Some(Self::PmSuspended),
            8 => Some(Self::Crashed),
            _ => None,
        }
    }
}

/// A lifecycle event delivered by the daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub callback_id: i32,
    pub domain: Domain,
    /// `None` for event numbers newer than this client knows
    pub event: Option<DomainEventType>,
    pub raw_event: i32,
    pub detail: i32,
}

impl LifecycleEvent {
    /// Decode a `remote_domain_event_callback_lifecycle_msg`
    pub fn decode(r: &mut XdrReader<'_>) -> Result<Self, VirtError> {
        let callback_id = r.get_i32()?;
        let domain = Domain::decode(r)?;
        let raw_event = r.get_i32()?;
        let detail = r.get_i32()?;
        Ok(Self {
            callback_id,
            domain,
            event: DomainEventType::from_i32(raw_event),
            raw_event,
            detail,
        })
    }

    pub fn encode(&self, w: &mut XdrWriter) {
        w.put_i32(self.callback_id);
        self.domain.encode(w);
        w.put_i32(self.raw_event).put_i32(self.detail);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_domain() -> Domain {
        Domain {
            name: "win10".to_string(),
            uuid: [
                0x4d, 0xea, 0x22, 0xb3, 0x1d, 0x52, 0xd8, 0xf3, 0x2b, 0x18, 0x1e, 0x95, 0x3a,
                0x0c, 0xa2, 0x01,
            ],
            id: 3,
        }
    }

    #[test]
    fn test_domain_wire_layout() {
        let mut w = XdrWriter::new();
        sample_domain().encode(&mut w);
        let bytes = w.into_bytes();
        // 4 len + 8 padded name + 16 uuid + 4 id
        assert_eq!(bytes.len(), 32);
        assert_eq!(Domain::decode(&mut XdrReader::new(&bytes)).unwrap(), sample_domain());
    }

    #[test]
    fn test_uuid_string() {
        assert_eq!(
            sample_domain().uuid_string(),
            "4dea22b3-1d52-d8f3-2b18-1e953a0ca201"
        );
    }

    #[test]
    fn test_unknown_event_kept_raw() {
        let ev = LifecycleEvent {
            callback_id: 1,
            domain: sample_domain(),
            event: None,
            raw_event: 42,
            detail: 0,
        };
        let mut w = XdrWriter::new();
        ev.encode(&mut w);
        let bytes = w.into_bytes();
        let decoded = LifecycleEvent::decode(&mut XdrReader::new(&bytes)).unwrap();
        assert_eq!(decoded.event, None);
        assert_eq!(decoded.raw_event, 42);
    }

    #[test]
    fn test_state_numbers() {
        assert_eq!(DomainState::from_i32(1), Some(DomainState::Running));
        assert_eq!(DomainState::from_i32(7), Some(DomainState::PmSuspended));
        assert_eq!(DomainState::from_i32(8), None);
        assert_eq!(DomainEventType::from_i32(8), Some(DomainEventType::Crashed));
    }
}
