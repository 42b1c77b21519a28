//! livehub: live media stream hub
//!
//! This library provides the core of a live streaming server:
//! - A registry with one stream per `app/name` key, created on demand
//! - One producer per stream, fanned out to any number of consumers
//! - Catch-up for late joiners (metadata, decoder config, last GOPs)
//! - Producer takeover with consumer timestamp rebasing
//! - Liveness sweeping of stalled endpoints and unused streams
//! - AMF0 decoding and encoding for command and metadata messages
//!
//! Protocol adapters (RTMP, HTTP-FLV, HLS) live outside this crate and plug
//! in through the [`Producer`] and [`Consumer`] traits.
//!
//! # Example: Relay
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bytes::Bytes;
//! use livehub::{ChannelConsumer, ChannelProducer, EndpointInfo, Hub, Packet, StreamKey};
//!
//! #[tokio::main]
//! async fn main() {
//!     let hub = Arc::new(Hub::new());
//!     let _sweeper = hub.spawn_sweeper();
//!     let key = StreamKey::new("live", "movie");
//!
//!     let (producer, tx) = ChannelProducer::with_config(EndpointInfo::new(key.clone(), false), hub.config());
//!     hub.handle_producer(Arc::new(producer));
//!
//!     let (consumer, mut rx) = ChannelConsumer::with_config(EndpointInfo::new(key, true), hub.config());
//!     hub.handle_consumer(Arc::new(consumer));
//!
//!     tx.send(Packet::video(0, Bytes::from_static(&[0x17, 0x01]))).await.ok();
//!     if let Some(packet) = rx.recv().await {
//!         println!("relayed {} bytes at {}ms", packet.size(), packet.timestamp);
//!     }
//! }
//! ```

pub mod amf;
pub mod error;
pub mod hub;
pub mod media;

// Re-export main types for convenience
pub use amf::{AmfObject, AmfValue};
pub use error::{AmfError, EndpointError, Error, Result};
pub use hub::{
    ChannelConsumer, ChannelProducer, CloseReason, Consumer, EndpointInfo, Hub, HubConfig,
    Producer, StreamKey,
};
pub use media::{CatchUpCache, Packet, PacketKind};
