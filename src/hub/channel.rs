//! Channel-backed endpoints
//!
//! [`ChannelProducer`] and [`ChannelConsumer`] implement the endpoint traits
//! on top of bounded tokio mpsc queues. A protocol adapter keeps the other
//! half of the queue: an RTMP session pushes demuxed packets into the
//! producer's sender, an HTTP-FLV response drains the consumer's receiver
//! into its body.
//!
//! ```text
//!   RTMP session ──tx──► ChannelProducer ──► Stream pump ──► ChannelConsumer ──rx──► HTTP-FLV
//! ```

use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::config::HubConfig;
use super::endpoint::{CloseReason, Consumer, EndpointInfo, Producer};
use crate::error::EndpointError;
use crate::media::{Packet, PacketKind};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Close state shared by both endpoint kinds
#[derive(Debug, Default)]
struct CloseState {
    token: CancellationToken,
    reason: Mutex<Option<CloseReason>>,
}

impl CloseState {
    /// Record the first reason and cancel; returns false if already closed
    fn close(&self, reason: CloseReason) -> bool {
        let mut slot = self.reason.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(reason);
        self.token.cancel();
        true
    }

    fn reason(&self) -> Option<CloseReason> {
        *self.reason.lock()
    }

    fn closed_error(&self) -> EndpointError {
        EndpointError::Closed(self.reason().unwrap_or(CloseReason::Stopped))
    }
}

/// Producer fed through an mpsc sender
///
/// Reports itself dead once no packet has been read for `timeout`.
pub struct ChannelProducer {
    info: EndpointInfo,
    rx: tokio::sync::Mutex<mpsc::Receiver<Packet>>,
    state: CloseState,
    last_read: Mutex<Instant>,
    timeout: Duration,
}

impl ChannelProducer {
    /// Create a producer and the sender that feeds it
    pub fn new(info: EndpointInfo, capacity: usize) -> (Self, mpsc::Sender<Packet>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let producer = Self {
            info,
            rx: tokio::sync::Mutex::new(rx),
            state: CloseState::default(),
            last_read: Mutex::new(Instant::now()),
            timeout: DEFAULT_TIMEOUT,
        };
        (producer, tx)
    }

    /// Create a producer sized and timed from hub configuration
    pub fn with_config(info: EndpointInfo, config: &HubConfig) -> (Self, mpsc::Sender<Packet>) {
        let (producer, tx) = Self::new(info, config.channel_capacity);
        (producer.timeout(config.producer_timeout), tx)
    }

    /// Set the idle limit
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.state.reason()
    }

    pub fn is_closed(&self) -> bool {
        self.state.token.is_cancelled()
    }
}

#[async_trait]
impl Producer for ChannelProducer {
    fn info(&self) -> &EndpointInfo {
        &self.info
    }

    async fn read(&self) -> Result<Packet, EndpointError> {
        if self.is_closed() {
            return Err(self.state.closed_error());
        }

        let mut rx = tokio::select! {
            _ = self.state.token.cancelled() => return Err(self.state.closed_error()),
            rx = self.rx.lock() => rx,
        };

        tokio::select! {
            _ = self.state.token.cancelled() => Err(self.state.closed_error()),
            packet = rx.recv() => match packet {
                Some(packet) => {
                    *self.last_read.lock() = Instant::now();
                    Ok(packet)
                }
                None => Err(EndpointError::Disconnected),
            },
        }
    }

    fn close(&self, reason: CloseReason) {
        if self.state.close(reason) {
            tracing::debug!(
                stream = %self.info.key,
                uid = %self.info.uid,
                reason = %reason,
                "Producer closed"
            );
        }
    }

    fn alive(&self) -> bool {
        !self.is_closed() && self.last_read.lock().elapsed() < self.timeout
    }
}

/// Last timestamps delivered per media kind, and the offset added on write
#[derive(Debug, Default)]
struct Rebase {
    base: u32,
    last_audio: u32,
    last_video: u32,
}

/// Consumer drained through an mpsc receiver
///
/// Reports itself dead once the receiver is dropped, or once the queue has
/// stayed full for `timeout`.
pub struct ChannelConsumer {
    info: EndpointInfo,
    tx: mpsc::Sender<Packet>,
    state: CloseState,
    rebase: Mutex<Rebase>,
    last_write: Mutex<Instant>,
    timeout: Duration,
}

impl ChannelConsumer {
    /// Create a consumer and the receiver that drains it
    pub fn new(info: EndpointInfo, capacity: usize) -> (Self, mpsc::Receiver<Packet>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let consumer = Self {
            info,
            tx,
            state: CloseState::default(),
            rebase: Mutex::new(Rebase::default()),
            last_write: Mutex::new(Instant::now()),
            timeout: DEFAULT_TIMEOUT,
        };
        (consumer, rx)
    }

    /// Create a consumer sized and timed from hub configuration
    pub fn with_config(info: EndpointInfo, config: &HubConfig) -> (Self, mpsc::Receiver<Packet>) {
        let (consumer, rx) = Self::new(info, config.channel_capacity);
        (consumer.timeout(config.consumer_timeout), rx)
    }

    /// Set the stall limit
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.state.reason()
    }

    pub fn is_closed(&self) -> bool {
        self.state.token.is_cancelled()
    }

    /// Offset currently added to written timestamps
    pub fn base_timestamp(&self) -> u32 {
        self.rebase.lock().base
    }

    fn rebased(&self, mut packet: Packet) -> Packet {
        let mut rebase = self.rebase.lock();
        packet.timestamp = packet.timestamp.wrapping_add(rebase.base);
        match packet.kind {
            PacketKind::Audio => rebase.last_audio = packet.timestamp,
            PacketKind::Video => rebase.last_video = packet.timestamp,
            PacketKind::Metadata => {}
        }
        packet
    }
}

#[async_trait]
impl Consumer for ChannelConsumer {
    fn info(&self) -> &EndpointInfo {
        &self.info
    }

    async fn write(&self, packet: Packet) -> Result<(), EndpointError> {
        if self.is_closed() {
            return Err(self.state.closed_error());
        }

        let packet = self.rebased(packet);
        tokio::select! {
            _ = self.state.token.cancelled() => Err(self.state.closed_error()),
            sent = self.tx.send(packet) => {
                sent.map_err(|_| EndpointError::Disconnected)?;
                *self.last_write.lock() = Instant::now();
                Ok(())
            }
        }
    }

    fn close(&self, reason: CloseReason) {
        if self.state.close(reason) {
            tracing::debug!(
                stream = %self.info.key,
                uid = %self.info.uid,
                reason = %reason,
                "Consumer closed"
            );
        }
    }

    fn alive(&self) -> bool {
        if self.is_closed() || self.tx.is_closed() {
            return false;
        }
        // an idle stream writes nothing; only a full queue counts as a stall
        self.tx.capacity() > 0 || self.last_write.lock().elapsed() < self.timeout
    }

    fn reset_base_timestamp(&self) {
        let mut rebase = self.rebase.lock();
        rebase.base = rebase.last_audio.max(rebase.last_video);
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::hub::endpoint::StreamKey;

    fn info() -> EndpointInfo {
        EndpointInfo::new(StreamKey::new("live", "movie"), false)
    }

    #[tokio::test]
    async fn test_producer_reads_in_order() {
        let (producer, tx) = ChannelProducer::new(info(), 8);
        tx.send(Packet::audio(1, Bytes::from_static(&[0xAF, 0x01])))
            .await
            .unwrap();
        tx.send(Packet::audio(2, Bytes::from_static(&[0xAF, 0x01])))
            .await
            .unwrap();

        assert_eq!(producer.read().await.unwrap().timestamp, 1);
        assert_eq!(producer.read().await.unwrap().timestamp, 2);
        assert!(producer.alive());
    }

    #[tokio::test]
    async fn test_producer_sender_dropped() {
        let (producer, tx) = ChannelProducer::new(info(), 8);
        drop(tx);

        assert!(matches!(
            producer.read().await,
            Err(EndpointError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_producer_close_unblocks_read() {
        let (producer, _tx) = ChannelProducer::new(info(), 8);
        let producer = std::sync::Arc::new(producer);

        let reader = {
            let producer = producer.clone();
            tokio::spawn(async move { producer.read().await })
        };
        tokio::task::yield_now().await;
        producer.close(CloseReason::Superseded);

        let result = reader.await.unwrap();
        assert!(matches!(
            result,
            Err(EndpointError::Closed(CloseReason::Superseded))
        ));
        assert!(!producer.alive());
    }

    #[tokio::test]
    async fn test_first_close_reason_wins() {
        let (producer, _tx) = ChannelProducer::new(info(), 8);
        producer.close(CloseReason::ReadTimeout);
        producer.close(CloseReason::Shutdown);

        assert_eq!(producer.close_reason(), Some(CloseReason::ReadTimeout));
    }

    #[tokio::test]
    async fn test_producer_idle_timeout() {
        let (producer, _tx) = ChannelProducer::new(info(), 8);
        let producer = producer.timeout(Duration::from_millis(50));
        assert!(producer.alive());

        std::thread::sleep(Duration::from_millis(60));
        assert!(!producer.alive());
    }

    #[tokio::test]
    async fn test_consumer_write_and_close() {
        let (consumer, mut rx) = ChannelConsumer::new(info(), 8);
        assert_ok!(
            consumer
                .write(Packet::video(40, Bytes::from_static(&[0x17, 0x01])))
                .await
        );
        assert_eq!(rx.recv().await.unwrap().timestamp, 40);

        consumer.close(CloseReason::WriteTimeout);
        assert_err!(
            consumer
                .write(Packet::video(80, Bytes::from_static(&[0x27, 0x01])))
                .await
        );
        assert!(!consumer.alive());
    }

    #[tokio::test]
    async fn test_consumer_receiver_dropped() {
        let (consumer, rx) = ChannelConsumer::new(info(), 8);
        drop(rx);

        assert!(!consumer.alive());
        assert!(matches!(
            consumer
                .write(Packet::audio(0, Bytes::from_static(&[0xAF, 0x01])))
                .await,
            Err(EndpointError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_consumer_stalled_queue() {
        let (consumer, _rx) = ChannelConsumer::new(info(), 1);
        let consumer = consumer.timeout(Duration::from_millis(20));
        assert_ok!(
            consumer
                .write(Packet::audio(0, Bytes::from_static(&[0xAF, 0x01])))
                .await
        );

        // queue is full and nobody drains it
        std::thread::sleep(Duration::from_millis(30));
        assert!(!consumer.alive());
    }

    #[tokio::test]
    async fn test_idle_consumer_stays_alive() {
        let (consumer, _rx) = ChannelConsumer::new(info(), 8);
        let consumer = consumer.timeout(Duration::from_millis(10));

        std::thread::sleep(Duration::from_millis(20));
        assert!(consumer.alive());
    }

    #[tokio::test]
    async fn test_reset_base_timestamp() {
        let (consumer, mut rx) = ChannelConsumer::new(info(), 8);
        consumer
            .write(Packet::video(1000, Bytes::from_static(&[0x17, 0x01])))
            .await
            .unwrap();
        consumer
            .write(Packet::audio(1020, Bytes::from_static(&[0xAF, 0x01])))
            .await
            .unwrap();

        // new producer restarts its clock at zero
        consumer.reset_base_timestamp();
        assert_eq!(consumer.base_timestamp(), 1020);
        consumer
            .write(Packet::video(0, Bytes::from_static(&[0x17, 0x01])))
            .await
            .unwrap();

        let received: Vec<u32> = [
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
        ]
        .iter()
        .map(|p| p.timestamp)
        .collect();
        assert_eq!(received, vec![1000, 1020, 1020]);
    }

    #[tokio::test]
    async fn test_with_config() {
        let config = HubConfig::default().channel_capacity(2);
        let (consumer, _rx) = ChannelConsumer::with_config(info(), &config);
        assert_eq!(consumer.timeout, config.consumer_timeout);

        let (producer, tx) = ChannelProducer::with_config(info(), &config);
        assert_eq!(producer.timeout, config.producer_timeout);
        assert_eq!(tx.max_capacity(), 2);
    }
}
