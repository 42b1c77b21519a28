//! Error types
//!
//! `AmfError` covers control-message decoding, `EndpointError` covers the
//! producer/consumer capability contracts. `Error` aggregates both for
//! callers that do not care which layer failed.

use std::time::Duration;

use crate::hub::endpoint::CloseReason;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("amf error: {0}")]
    Amf(#[from] AmfError),
    #[error("endpoint error: {0}")]
    Endpoint(#[from] EndpointError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// AMF decode/encode errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmfError {
    /// Buffer ended before the named field could be read
    #[error("truncated input while reading {field}")]
    Truncated { field: &'static str },
    /// A specific marker was required at this position
    #[error("expected marker {expected:#04x}, found {found:#04x}")]
    UnexpectedMarker { expected: u8, found: u8 },
    /// Leading type marker is not part of the format
    #[error("unknown type marker {0:#04x}")]
    UnknownMarker(u8),
    /// Marker is part of the format but decoding it is not supported
    #[error("unsupported type {0}")]
    Unsupported(&'static str),
    #[error("unexpected value {0:#04x} for boolean")]
    InvalidBoolean(u8),
    #[error("invalid utf-8 in {field}")]
    InvalidUtf8 { field: &'static str },
    #[error("invalid reference index {0}")]
    InvalidReference(usize),
    #[error("nesting depth exceeded")]
    NestingTooDeep,
}

/// Errors surfaced by producer reads and consumer writes
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    /// Endpoint was closed, locally or by the hub
    #[error("endpoint closed: {0}")]
    Closed(CloseReason),
    /// The remote side of the endpoint went away
    #[error("peer disconnected")]
    Disconnected,
    /// Operation did not complete in time
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stream key text is not of the form `app/name`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid stream key {0:?}, expected app/name")]
pub struct InvalidStreamKey(pub String);
