//! Stream registry
//!
//! The [`Hub`] maps stream keys to [`Stream`]s, creates them lazily on the
//! first producer or consumer, hands a key over when a new producer arrives,
//! and reclaims streams nobody uses.
//!
//! # Takeover
//!
//! When a producer with a different uid publishes on a key that already has
//! a producer, the old stream is stopped and a fresh one replaces it. Its
//! consumers move across with their timestamps rebased, so viewers keep
//! playing without a clock jump. The whole exchange runs under the map entry
//! lock, so no other producer or consumer can observe a half-moved stream.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::config::HubConfig;
use super::endpoint::{CloseReason, Consumer, Producer, StreamKey};
use super::stream::{Stream, StreamStats};

/// Registry of live streams
pub struct Hub {
    streams: DashMap<StreamKey, Arc<Stream>>,
    config: HubConfig,
    shutdown: CancellationToken,
}

impl Hub {
    /// Create a hub with default configuration
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    pub fn with_config(config: HubConfig) -> Self {
        Self {
            streams: DashMap::new(),
            config,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    fn new_stream(&self, key: &StreamKey) -> Arc<Stream> {
        Arc::new(Stream::new(key.clone(), self.config.clone()))
    }

    /// Start relaying a producer
    ///
    /// Returns the handle of the pump task, which completes when the producer
    /// ends or is superseded.
    pub fn handle_producer(&self, producer: Arc<dyn Producer>) -> JoinHandle<()> {
        let key = producer.info().key.clone();
        let uid = producer.info().uid;

        let stream = match self.streams.entry(key.clone()) {
            Entry::Vacant(vacant) => {
                let stream = self.new_stream(&key);
                vacant.insert(Arc::clone(&stream));
                tracing::info!(stream = %key, uid = %uid, "Stream created by producer");
                stream
            }
            Entry::Occupied(mut occupied) => {
                let current = Arc::clone(occupied.get());
                match current.producer_uid() {
                    Some(previous) if previous != uid => {
                        current.supersede();
                        let fresh = self.new_stream(&key);
                        let moved = current.transfer_consumers(&fresh);
                        occupied.insert(Arc::clone(&fresh));
                        tracing::info!(
                            stream = %key,
                            previous_uid = %previous,
                            uid = %uid,
                            consumers = moved,
                            "Producer takeover"
                        );
                        fresh
                    }
                    _ => current,
                }
            }
        };

        stream.attach_producer(producer)
    }

    /// Attach a consumer, creating its stream if needed
    pub fn handle_consumer(&self, consumer: Arc<dyn Consumer>) {
        let key = consumer.info().key.clone();
        // attach while holding the entry so a concurrent sweep cannot drop
        // the stream in between
        let stream = self.streams.entry(key.clone()).or_insert_with(|| {
            tracing::info!(stream = %key, "Stream created by consumer");
            self.new_stream(&key)
        });
        stream.attach_consumer(consumer);
    }

    /// Run one liveness pass over every stream
    ///
    /// Streams with no live endpoint are removed. Returns how many were
    /// removed.
    pub fn sweep(&self) -> usize {
        let snapshot: Vec<(StreamKey, Arc<Stream>)> = self
            .streams
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        let mut removed = 0;
        for (key, stream) in snapshot {
            if stream.liveness_sweep() > 0 {
                continue;
            }
            let gone = self
                .streams
                .remove_if(&key, |_, current| {
                    Arc::ptr_eq(current, &stream) && current.consumer_count() == 0
                })
                .is_some();
            if gone {
                removed += 1;
                tracing::info!(stream = %key, "Stream removed, no live endpoints");
            }
        }
        removed
    }

    /// Spawn the periodic sweep task
    ///
    /// The task ends after [`shutdown`](Self::shutdown).
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        let interval = hub.config.sweep_interval;
        let shutdown = hub.shutdown.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = hub.sweep();
                        tracing::trace!(removed, streams = hub.stream_count(), "Sweep done");
                    }
                }
            }
        })
    }

    pub fn stream(&self, key: &StreamKey) -> Option<Arc<Stream>> {
        self.streams.get(key).map(|e| Arc::clone(e.value()))
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn stream_stats(&self) -> Vec<StreamStats> {
        self.streams.iter().map(|e| e.value().stats()).collect()
    }

    /// Stop every pump, close every endpoint and empty the registry
    pub fn shutdown(&self) {
        self.shutdown.cancel();

        let keys: Vec<StreamKey> = self.streams.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, stream)) = self.streams.remove(&key) {
                stream.close_consumers(CloseReason::Shutdown);
                stream.stop(CloseReason::Shutdown);
            }
        }
        tracing::info!("Hub shut down");
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::sync::mpsc;

    use super::*;
    use crate::hub::channel::{ChannelConsumer, ChannelProducer};
    use crate::hub::endpoint::EndpointInfo;
    use crate::media::Packet;

    const WAIT: Duration = Duration::from_secs(2);

    fn key() -> StreamKey {
        StreamKey::new("live", "movie")
    }

    fn producer() -> (Arc<ChannelProducer>, mpsc::Sender<Packet>) {
        let (producer, tx) = ChannelProducer::new(EndpointInfo::new(key(), false), 16);
        (Arc::new(producer), tx)
    }

    fn consumer() -> (Arc<ChannelConsumer>, mpsc::Receiver<Packet>) {
        let (consumer, rx) = ChannelConsumer::new(EndpointInfo::new(key(), false), 16);
        (Arc::new(consumer), rx)
    }

    fn keyframe(ts: u32) -> Packet {
        Packet::video(ts, Bytes::from_static(&[0x17, 0x01]))
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    async fn recv_ts(rx: &mut mpsc::Receiver<Packet>) -> u32 {
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for packet")
            .expect("channel closed")
            .timestamp
    }

    #[tokio::test]
    async fn test_consumer_creates_stream() {
        let hub = Hub::new();
        let (viewer, _rx) = consumer();
        hub.handle_consumer(viewer.clone());

        assert_eq!(hub.stream_count(), 1);
        let stream = hub.stream(&key()).unwrap();
        assert!(stream.has_consumer(&viewer.info().uid));
        assert!(!stream.is_running());
    }

    #[tokio::test]
    async fn test_producer_joins_waiting_consumers() {
        let hub = Hub::new();
        let (viewer, mut rx) = consumer();
        hub.handle_consumer(viewer);
        let waiting = hub.stream(&key()).unwrap();

        let (producer, tx) = producer();
        hub.handle_producer(producer);
        assert!(Arc::ptr_eq(&waiting, &hub.stream(&key()).unwrap()));

        tx.send(keyframe(0)).await.unwrap();
        assert_eq!(recv_ts(&mut rx).await, 0);
    }

    #[tokio::test]
    async fn test_takeover_moves_consumers_and_rebases() {
        init_tracing();
        let hub = Hub::new();
        let (first, first_tx) = producer();
        let (viewer, mut rx) = consumer();
        hub.handle_producer(first.clone());
        hub.handle_consumer(viewer.clone());
        let old_stream = hub.stream(&key()).unwrap();

        first_tx.send(keyframe(1000)).await.unwrap();
        assert_eq!(recv_ts(&mut rx).await, 1000);

        let (second, second_tx) = producer();
        hub.handle_producer(second.clone());

        let new_stream = hub.stream(&key()).unwrap();
        assert!(!Arc::ptr_eq(&old_stream, &new_stream));
        assert_eq!(hub.stream_count(), 1);
        assert_eq!(first.close_reason(), Some(CloseReason::Superseded));
        assert!(!old_stream.is_running());
        assert_eq!(old_stream.consumer_count(), 0);
        assert!(new_stream.has_consumer(&viewer.info().uid));
        assert_eq!(new_stream.producer_uid(), Some(second.info().uid));

        // the new producer's clock restarts at zero; the viewer's does not
        second_tx.send(keyframe(0)).await.unwrap();
        assert_eq!(recv_ts(&mut rx).await, 1000);
        second_tx.send(keyframe(40)).await.unwrap();
        assert_eq!(recv_ts(&mut rx).await, 1040);
    }

    #[tokio::test]
    async fn test_takeover_moves_interval_consumers() {
        let hub = Hub::new();
        let (first, _first_tx) = producer();
        hub.handle_producer(first);
        let (flv, mut rx) = ChannelConsumer::new(EndpointInfo::new(key(), true), 16);
        let flv = Arc::new(flv);
        hub.handle_consumer(flv.clone());

        let (second, second_tx) = producer();
        hub.handle_producer(second);

        let stream = hub.stream(&key()).unwrap();
        assert!(stream.has_consumer(&flv.info().uid));
        assert_eq!(flv.close_reason(), None);

        second_tx.send(keyframe(0)).await.unwrap();
        assert_eq!(recv_ts(&mut rx).await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_interval_consumers_with_shutdown() {
        let hub = Hub::new();
        let (producer, _tx) = producer();
        hub.handle_producer(producer);
        let (flv, _rx) = ChannelConsumer::new(EndpointInfo::new(key(), true), 16);
        let flv = Arc::new(flv);
        hub.handle_consumer(flv.clone());

        hub.shutdown();
        assert_eq!(flv.close_reason(), Some(CloseReason::Shutdown));
    }

    #[tokio::test]
    async fn test_same_uid_republish_keeps_stream() {
        let hub = Hub::new();
        let info = EndpointInfo::new(key(), false);
        let (first, _first_tx) = ChannelProducer::new(info.clone(), 4);
        let (second, _second_tx) = ChannelProducer::new(info, 4);
        let first = Arc::new(first);

        hub.handle_producer(first.clone());
        let stream = hub.stream(&key()).unwrap();
        hub.handle_producer(Arc::new(second));

        assert!(Arc::ptr_eq(&stream, &hub.stream(&key()).unwrap()));
        assert_eq!(first.close_reason(), Some(CloseReason::Superseded));
        assert!(stream.is_running());
    }

    #[tokio::test]
    async fn test_takeover_after_producer_ended() {
        let hub = Hub::new();
        let (first, first_tx) = producer();
        let pump = hub.handle_producer(first);
        let old_stream = hub.stream(&key()).unwrap();
        drop(first_tx);
        tokio::time::timeout(WAIT, pump).await.unwrap().unwrap();

        let (second, _second_tx) = producer();
        hub.handle_producer(second);
        assert!(!Arc::ptr_eq(&old_stream, &hub.stream(&key()).unwrap()));
    }

    #[tokio::test]
    async fn test_sweep_removes_unused_streams() {
        let hub = Hub::new();
        let (live, _live_rx) = consumer();
        hub.handle_consumer(live);

        let other = StreamKey::new("live", "empty");
        let (ended, ended_tx) = ChannelProducer::new(EndpointInfo::new(other.clone(), false), 4);
        let pump = hub.handle_producer(Arc::new(ended));
        drop(ended_tx);
        tokio::time::timeout(WAIT, pump).await.unwrap().unwrap();

        assert_eq!(hub.sweep(), 1);
        assert!(hub.stream(&other).is_none());
        assert!(hub.stream(&key()).is_some());
    }

    #[tokio::test]
    async fn test_sweep_keeps_idle_stream_with_consumers() {
        let hub = Hub::new();
        let (viewer, viewer_rx) = consumer();
        drop(viewer_rx);
        hub.handle_consumer(viewer.clone());

        // no pump, so nothing judges the consumer dead
        assert_eq!(hub.sweep(), 0);
        let stream = hub.stream(&key()).unwrap();
        assert!(stream.has_consumer(&viewer.info().uid));
        assert_eq!(viewer.close_reason(), None);
    }

    #[tokio::test]
    async fn test_sweep_keeps_stream_with_running_producer() {
        let hub = Hub::new();
        let (producer, _tx) = producer();
        hub.handle_producer(producer);

        assert_eq!(hub.sweep(), 0);
        assert_eq!(hub.stream_count(), 1);
    }

    #[tokio::test]
    async fn test_sweeper_task() {
        init_tracing();
        let hub = Arc::new(Hub::with_config(
            HubConfig::default().sweep_interval(Duration::from_millis(10)),
        ));
        let sweeper = hub.spawn_sweeper();

        let (ended, ended_tx) = producer();
        let pump = hub.handle_producer(ended);
        drop(ended_tx);
        tokio::time::timeout(WAIT, pump).await.unwrap().unwrap();

        tokio::time::timeout(WAIT, async {
            while hub.stream_count() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        hub.shutdown();
        tokio::time::timeout(WAIT, sweeper).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let hub = Hub::new();
        let (producer, _tx) = producer();
        let (viewer, _rx) = consumer();
        let pump = hub.handle_producer(producer.clone());
        hub.handle_consumer(viewer.clone());

        hub.shutdown();
        tokio::time::timeout(WAIT, pump).await.unwrap().unwrap();

        assert_eq!(hub.stream_count(), 0);
        assert_eq!(producer.close_reason(), Some(CloseReason::Shutdown));
        assert_eq!(viewer.close_reason(), Some(CloseReason::Shutdown));
    }

    #[tokio::test]
    async fn test_stream_stats() {
        let hub = Hub::new();
        let (producer, _tx) = producer();
        hub.handle_producer(producer.clone());
        let (viewer, _rx) = ChannelConsumer::new(
            EndpointInfo::new(StreamKey::new("live", "other"), false),
            4,
        );
        hub.handle_consumer(Arc::new(viewer));

        let mut stats = hub.stream_stats();
        stats.sort_by_key(|s| s.key.to_string());
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].key, key());
        assert_eq!(stats[0].producer_uid, Some(producer.info().uid));
        assert!(stats[0].running);
        assert_eq!(stats[1].consumer_count, 1);
        assert!(!stats[1].running);
    }
}
