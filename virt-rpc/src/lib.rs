//! Minimal libvirt remote-protocol client
//!
//! Speaks the daemon's native XDR protocol over TCP, covering what a power
//! button needs: domain lookup, state queries, start/shutdown/resume/wakeup
//! and lifecycle event subscription.

pub mod error;
pub mod protocol;
pub mod types;
pub mod xdr;

mod client;

pub use client::{Libvirt, CONNECT_TIMEOUT, DEFAULT_URI};
pub use error::VirtError;
pub use types::{Domain, DomainEventType, DomainState, LifecycleEvent};
