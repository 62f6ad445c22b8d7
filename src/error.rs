//! Error types for the relay pipeline.
//!
//! Every per-endpoint and per-frame failure is recoverable: callers log it and
//! move on to the next endpoint or the next tick.

use std::{io, net::SocketAddr};

use thiserror::Error;

/// Failure to deliver one packet to one endpoint slot.
#[derive(Debug, Error)]
pub enum BroadcastError {
    /// The slot holds no host or no port.
    #[error("endpoint slot is empty")]
    EmptySlot,

    /// Host/port could not be turned into a socket address.
    #[error("cannot resolve {host}:{port}: {reason}")]
    AddressResolution {
        host: String,
        port: String,
        reason: String,
    },

    /// No datagram socket could be opened for the address family.
    #[error("failed to create datagram socket: {0}")]
    SocketCreation(#[source] io::Error),

    #[error("send to {addr} failed: {source}")]
    Send {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("short send to {addr}: {sent} of {expected} bytes")]
    ShortWrite {
        addr: SocketAddr,
        sent: usize,
        expected: usize,
    },
}

#[derive(Debug, Error)]
pub enum FrameError {
    /// Buffer length does not match the frame's stride and dimensions.
    #[error("frame buffer size mismatch: expected {expected}, got {actual}")]
    MalformedBuffer { expected: usize, actual: usize },

    /// No signalled feed had a frame to hand over.
    #[error("no frame available")]
    Unavailable,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("endpoint slot {index} out of range (capacity {capacity})")]
    SlotOutOfRange { index: usize, capacity: usize },
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to listen on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("settings line {line} is missing")]
    MissingLine { line: usize },

    #[error("settings line {line} is missing field `{field}`")]
    MissingField { line: usize, field: &'static str },

    #[error("settings line {line} field `{field}` has invalid value `{value}`")]
    InvalidField {
        line: usize,
        field: &'static str,
        value: String,
    },
}

impl SettingsError {
    pub(crate) fn invalid(line: usize, field: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidField {
            line,
            field,
            value: value.into(),
        }
    }
}
