//! libvirt client error types

use thiserror::Error;

/// Errors from the libvirt remote protocol client
#[derive(Error, Debug)]
pub enum VirtError {
    #[error("Connection to {address} failed: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection to {0} timed out")]
    ConnectTimeout(String),

    #[error("Connection closed")]
    Disconnected,

    /// libvirt answered the call with an error
    #[error("libvirt error {code} (domain {domain}): {message}")]
    Remote {
        code: i32,
        domain: i32,
        message: String,
    },

    #[error("Malformed message: {0}")]
    Decode(String),

    #[error("Unexpected message: program 0x{program:08X} version {version}")]
    UnexpectedProgram { program: u32, version: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VirtError {
    /// Whether the connection itself is unusable after this error
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VirtError::Disconnected | VirtError::Io(_) | VirtError::UnexpectedProgram { .. }
        )
    }
}
