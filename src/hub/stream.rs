//! Per-stream multiplexer
//!
//! A [`Stream`] owns one producer slot, a set of consumers, and the catch-up
//! cache. A single pump task per producer moves packets:
//!
//! ```text
//!                 ┌───────────────────────── Stream ─────────────────────────┐
//!                 │                                                          │
//!   Producer ───► │ pump: read ──► fan out ──► cache.write                   │
//!                 │                  │                                       │
//!                 │                  ├─► consumer (initialized) ◄── packet   │
//!                 │                  └─► consumer (new) ◄── cache flush,     │
//!                 │                                         then packet      │
//!                 └──────────────────────────────────────────────────────────┘
//! ```
//!
//! A consumer is flushed exactly once, during the first pump iteration after
//! it attaches, with the cache as it stood before that iteration's packet.
//! The packet itself follows, so the flush and live phases never overlap and
//! nothing is duplicated.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::config::HubConfig;
use super::endpoint::{CloseReason, Consumer, Producer, StreamKey};
use crate::error::EndpointError;
use crate::media::{CatchUpCache, Packet};

/// Whether two trait objects point at the same endpoint
fn same_endpoint<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

struct ConsumerSlot {
    consumer: Arc<dyn Consumer>,
    /// Set once the cache has been flushed into this consumer
    initialized: bool,
}

/// Producer slot; `generation` identifies the pump allowed to touch shared
/// state when it exits
struct ProducerSlot {
    producer: Option<Arc<dyn Producer>>,
    cancel: CancellationToken,
    generation: u64,
}

/// Stream statistics
#[derive(Debug, Clone)]
pub struct StreamStats {
    pub key: StreamKey,
    /// Uid of the current (or last) producer
    pub producer_uid: Option<Uuid>,
    pub running: bool,
    pub consumer_count: usize,
    /// Consumers already flushed and receiving live packets
    pub live_consumer_count: usize,
    pub packets_relayed: u64,
}

/// One producer, many consumers
pub struct Stream {
    key: StreamKey,
    config: HubConfig,
    producer: Mutex<ProducerSlot>,
    consumers: DashMap<Uuid, ConsumerSlot>,
    /// Held by the pump for its whole lifetime
    cache: tokio::sync::Mutex<CatchUpCache>,
    running: AtomicBool,
    packets_relayed: AtomicU64,
}

impl Stream {
    pub fn new(key: StreamKey, config: HubConfig) -> Self {
        let cache = CatchUpCache::new(config.gop_retention);
        Self {
            key,
            config,
            producer: Mutex::new(ProducerSlot {
                producer: None,
                cancel: CancellationToken::new(),
                generation: 0,
            }),
            consumers: DashMap::new(),
            cache: tokio::sync::Mutex::new(cache),
            running: AtomicBool::new(false),
            packets_relayed: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    /// Whether a pump is currently relaying packets
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Uid of the current (or last) producer
    pub fn producer_uid(&self) -> Option<Uuid> {
        self.producer.lock().producer.as_ref().map(|p| p.info().uid)
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    pub fn has_consumer(&self, uid: &Uuid) -> bool {
        self.consumers.contains_key(uid)
    }

    /// Install a producer and start its pump
    ///
    /// A previous producer is closed with [`CloseReason::Superseded`] and its
    /// pump stopped. The new pump waits for the old one to release the cache.
    pub fn attach_producer(self: &Arc<Self>, producer: Arc<dyn Producer>) -> JoinHandle<()> {
        let (generation, cancel) = {
            let mut slot = self.producer.lock();
            slot.cancel.cancel();
            if let Some(old) = slot.producer.take() {
                if !same_endpoint(&old, &producer) {
                    old.close(CloseReason::Superseded);
                }
            }

            slot.generation += 1;
            slot.cancel = CancellationToken::new();
            slot.producer = Some(Arc::clone(&producer));
            self.running.store(true, Ordering::Release);
            (slot.generation, slot.cancel.clone())
        };

        tracing::info!(
            stream = %self.key,
            uid = %producer.info().uid,
            url = %producer.info().url,
            consumers = self.consumers.len(),
            "Producer attached"
        );

        tokio::spawn(Arc::clone(self).pump(producer, generation, cancel))
    }

    /// Register a consumer; it is flushed from the cache on the next packet
    pub fn attach_consumer(&self, consumer: Arc<dyn Consumer>) {
        let uid = consumer.info().uid;
        tracing::info!(
            stream = %self.key,
            uid = %uid,
            url = %consumer.info().url,
            interval = consumer.info().interval,
            "Consumer attached"
        );

        let previous = self.consumers.insert(
            uid,
            ConsumerSlot {
                consumer: Arc::clone(&consumer),
                initialized: false,
            },
        );
        if let Some(previous) = previous {
            if !same_endpoint(&previous.consumer, &consumer) {
                previous.consumer.close(CloseReason::Superseded);
            }
        }
    }

    /// Detach a consumer without closing it
    pub fn detach_consumer(&self, uid: &Uuid) -> Option<Arc<dyn Consumer>> {
        self.consumers.remove(uid).map(|(_, slot)| slot.consumer)
    }

    /// Stop the pump, close the producer, and drop interval consumers
    ///
    /// Persistent consumers stay registered, waiting for a new producer.
    pub fn stop(&self, reason: CloseReason) {
        self.halt(reason);
        self.close_interval_consumers();
    }

    /// Stop the pump for a takeover
    ///
    /// The producer is closed with [`CloseReason::Superseded`] and every
    /// consumer, interval or not, is left in place for
    /// [`transfer_consumers`](Self::transfer_consumers).
    pub fn supersede(&self) {
        self.halt(CloseReason::Superseded);
    }

    fn halt(&self, reason: CloseReason) {
        let mut slot = self.producer.lock();
        slot.generation += 1;
        slot.cancel.cancel();
        if let Some(producer) = &slot.producer {
            producer.close(reason);
        }
        if self.running.swap(false, Ordering::AcqRel) {
            tracing::info!(stream = %self.key, reason = %reason, "Stream stopped");
        }
    }

    /// Close and remove every consumer
    pub fn close_consumers(&self, reason: CloseReason) {
        for uid in self.consumer_uids() {
            if let Some((_, slot)) = self.consumers.remove(&uid) {
                slot.consumer.close(reason);
            }
        }
    }

    /// Move every consumer into `target`, rebasing their timestamps
    ///
    /// Each moved consumer gets exactly one `reset_base_timestamp` call and is
    /// flushed again from the target's cache.
    pub fn transfer_consumers(&self, target: &Stream) -> usize {
        let mut moved = 0;
        for uid in self.consumer_uids() {
            if let Some((uid, slot)) = self.consumers.remove(&uid) {
                slot.consumer.reset_base_timestamp();
                target.consumers.insert(
                    uid,
                    ConsumerSlot {
                        consumer: slot.consumer,
                        initialized: false,
                    },
                );
                moved += 1;
            }
        }
        moved
    }

    /// Count live endpoints, closing the ones that stopped making progress
    ///
    /// Only meaningful while the pump runs: a stalled producer is closed with
    /// [`CloseReason::ReadTimeout`], which ends the pump, and dead consumers
    /// are removed and closed with [`CloseReason::WriteTimeout`]. On an idle
    /// stream every attached consumer counts as live.
    pub fn liveness_sweep(&self) -> usize {
        let mut live = 0;
        let running = self.is_running();

        {
            let slot = self.producer.lock();
            if let Some(producer) = &slot.producer {
                if running {
                    if producer.alive() {
                        live += 1;
                    } else {
                        tracing::warn!(
                            stream = %self.key,
                            uid = %producer.info().uid,
                            "Producer read timeout"
                        );
                        producer.close(CloseReason::ReadTimeout);
                    }
                }
            }
        }

        for (uid, consumer) in self.consumer_snapshot() {
            if !running || consumer.alive() {
                live += 1;
                continue;
            }
            tracing::warn!(stream = %self.key, uid = %uid, "Consumer write timeout");
            self.remove_consumer(&uid, &consumer);
            consumer.close(CloseReason::WriteTimeout);
        }

        live
    }

    pub fn stats(&self) -> StreamStats {
        let live_consumer_count = self.consumers.iter().filter(|e| e.initialized).count();
        StreamStats {
            key: self.key.clone(),
            producer_uid: self.producer_uid(),
            running: self.is_running(),
            consumer_count: self.consumers.len(),
            live_consumer_count,
            packets_relayed: self.packets_relayed.load(Ordering::Relaxed),
        }
    }

    fn consumer_uids(&self) -> Vec<Uuid> {
        self.consumers.iter().map(|e| *e.key()).collect()
    }

    fn consumer_snapshot(&self) -> Vec<(Uuid, Arc<dyn Consumer>)> {
        self.consumers
            .iter()
            .map(|e| (*e.key(), Arc::clone(&e.consumer)))
            .collect()
    }

    /// Remove a consumer only if the slot still holds this endpoint
    fn remove_consumer(&self, uid: &Uuid, consumer: &Arc<dyn Consumer>) -> bool {
        self.consumers
            .remove_if(uid, |_, slot| same_endpoint(&slot.consumer, consumer))
            .is_some()
    }

    async fn pump(self: Arc<Self>, producer: Arc<dyn Producer>, generation: u64, cancel: CancellationToken) {
        let uid = producer.info().uid;

        let mut cache = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            cache = self.cache.lock() => cache,
        };

        tracing::debug!(stream = %self.key, uid = %uid, generation, "Pump started");

        loop {
            let packet = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                packet = producer.read() => packet,
            };

            match packet {
                Ok(packet) => {
                    self.fan_out(&cache, &packet).await;
                    cache.write(packet);
                    self.packets_relayed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    tracing::info!(stream = %self.key, uid = %uid, error = %e, "Producer ended");
                    producer.close(CloseReason::Stopped);
                    break;
                }
            }
        }

        drop(cache);
        self.finish_pump(generation);
    }

    /// Mark the stream idle and drop interval consumers, unless a newer pump
    /// (or an explicit stop) has taken over
    fn finish_pump(&self, generation: u64) {
        let slot = self.producer.lock();
        if slot.generation != generation {
            return;
        }
        self.running.store(false, Ordering::Release);
        self.close_interval_consumers();
    }

    fn close_interval_consumers(&self) {
        for (uid, consumer) in self.consumer_snapshot() {
            if !consumer.info().interval {
                continue;
            }
            if self.remove_consumer(&uid, &consumer) {
                tracing::debug!(stream = %self.key, uid = %uid, "Interval consumer closed");
                consumer.close(CloseReason::ProducerEnded);
            }
        }
    }

    async fn fan_out(&self, cache: &CatchUpCache, packet: &Packet) {
        let targets: Vec<(Uuid, Arc<dyn Consumer>, bool)> = self
            .consumers
            .iter()
            .map(|e| (*e.key(), Arc::clone(&e.consumer), e.initialized))
            .collect();
        if targets.is_empty() {
            return;
        }

        let timeout = self.config.consumer_timeout;
        let writes = targets.into_iter().map(|(uid, consumer, initialized)| {
            let packet = packet.clone();
            async move {
                let result: Result<(), EndpointError> = async {
                    if !initialized {
                        tokio::time::timeout(timeout, cache.flush_into(consumer.as_ref()))
                            .await
                            .map_err(|_| EndpointError::Timeout(timeout))??;
                    }
                    tokio::time::timeout(timeout, consumer.write(packet))
                        .await
                        .map_err(|_| EndpointError::Timeout(timeout))?
                }
                .await;
                (uid, consumer, initialized, result)
            }
        });

        for (uid, consumer, initialized, result) in join_all(writes).await {
            match result {
                Ok(()) if !initialized => {
                    if let Some(mut slot) = self.consumers.get_mut(&uid) {
                        if same_endpoint(&slot.consumer, &consumer) {
                            slot.initialized = true;
                        }
                    }
                    tracing::debug!(
                        stream = %self.key,
                        uid = %uid,
                        cached = cache.len(),
                        "Consumer caught up"
                    );
                }
                Ok(()) => {}
                Err(e) => {
                    let reason = match e {
                        EndpointError::Timeout(_) => CloseReason::WriteTimeout,
                        _ => CloseReason::WriteFailed,
                    };
                    tracing::warn!(stream = %self.key, uid = %uid, error = %e, "Consumer write failed");
                    self.remove_consumer(&uid, &consumer);
                    consumer.close(reason);
                }
            }
        }
    }
}
