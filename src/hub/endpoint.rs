//! Producer and consumer capabilities
//!
//! Protocol adapters (an RTMP publishing session, an HTTP-FLV response, an
//! HLS segmenter) plug into the hub through these two traits. The hub never
//! sees sockets, only packets.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{EndpointError, InvalidStreamKey};
use crate::media::Packet;

/// Unique identifier for a stream (app + stream name)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    /// Application name (e.g., "live")
    pub app: String,
    /// Stream name (e.g., "movie")
    pub name: String,
}

impl StreamKey {
    pub fn new(app: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.app, self.name)
    }
}

impl FromStr for StreamKey {
    type Err = InvalidStreamKey;

    /// Parse `app/name`; the name may itself contain slashes
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_matches('/').split_once('/') {
            Some((app, name)) if !app.is_empty() && !name.is_empty() => Ok(Self::new(app, name)),
            _ => Err(InvalidStreamKey(s.to_string())),
        }
    }
}

/// Identity of a producer or consumer
#[derive(Debug, Clone)]
pub struct EndpointInfo {
    pub key: StreamKey,
    /// Connection id; a producer with a different uid on a live key takes it over
    pub uid: Uuid,
    /// One-shot consumer (HTTP-FLV response, single HLS source) that is
    /// dropped when its producer goes away
    pub interval: bool,
    /// Request URL, for logs
    pub url: String,
}

impl EndpointInfo {
    /// New endpoint identity with a random uid
    pub fn new(key: StreamKey, interval: bool) -> Self {
        Self {
            key,
            uid: Uuid::new_v4(),
            interval,
            url: String::new(),
        }
    }

    pub fn with_uid(mut self, uid: Uuid) -> Self {
        self.uid = uid;
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

/// Why the hub (or the endpoint itself) closed an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// A producer with another uid took over the stream
    Superseded,
    /// Stream stopped without a successor
    Stopped,
    /// Producer made no progress within its timeout
    ReadTimeout,
    /// Consumer made no progress within its timeout
    WriteTimeout,
    /// A consumer write returned an error
    WriteFailed,
    /// The producer of an interval consumer went away
    ProducerEnded,
    /// Hub shut down
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CloseReason::Superseded => "superseded by new producer",
            CloseReason::Stopped => "stream stopped",
            CloseReason::ReadTimeout => "read timeout",
            CloseReason::WriteTimeout => "write timeout",
            CloseReason::WriteFailed => "write failed",
            CloseReason::ProducerEnded => "producer ended",
            CloseReason::Shutdown => "hub shutdown",
        };
        f.write_str(text)
    }
}

/// Source of packets for a stream
#[async_trait]
pub trait Producer: Send + Sync {
    fn info(&self) -> &EndpointInfo;

    /// Wait for the next packet
    ///
    /// Must return promptly with an error once [`close`](Self::close) has
    /// been called, so a stopped pump is not left hanging.
    async fn read(&self) -> Result<Packet, EndpointError>;

    fn close(&self, reason: CloseReason);

    /// Whether the producer has made progress recently
    fn alive(&self) -> bool;
}

/// Sink of packets for a stream
#[async_trait]
pub trait Consumer: Send + Sync {
    fn info(&self) -> &EndpointInfo;

    async fn write(&self, packet: Packet) -> Result<(), EndpointError>;

    fn close(&self, reason: CloseReason);

    /// Whether the consumer is still draining packets
    fn alive(&self) -> bool;

    /// Make timestamps written after this call continue from the last
    /// timestamp already delivered, so a producer change does not rewind
    /// the consumer's clock
    fn reset_base_timestamp(&self);
}
