//! Stream hub
//!
//! The hub sits between protocol adapters. Producers publish into a
//! [`Stream`], consumers attach to it, and the [`Hub`] keeps one stream per
//! key.
//!
//! # Architecture
//!
//! ```text
//!                              Arc<Hub>
//!                   ┌──────────────────────────────┐
//!                   │ streams: DashMap<StreamKey,  │
//!                   │   Arc<Stream> {              │
//!                   │     producer, consumers,     │
//!                   │     cache, pump task         │
//!                   │   }                          │
//!                   │ >                            │
//!                   └──────────────┬───────────────┘
//!                                  │
//!          ┌───────────────────────┼───────────────────────┐
//!          │                       │                       │
//!          ▼                       ▼                       ▼
//!     [Producer]              [Consumer]              [Consumer]
//!     RTMP publish            RTMP play               HTTP-FLV (interval)
//! ```
//!
//! Payloads are `bytes::Bytes`, so every consumer shares the producer's
//! allocation.

pub mod channel;
pub mod config;
pub mod endpoint;
pub mod registry;
pub mod stream;

pub use channel::{ChannelConsumer, ChannelProducer};
pub use config::HubConfig;
pub use endpoint::{CloseReason, Consumer, EndpointInfo, Producer, StreamKey};
pub use registry::Hub;
pub use stream::{Stream, StreamStats};
