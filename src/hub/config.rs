//! Hub configuration

use std::time::Duration;

/// Hub configuration options
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Number of GOPs kept for late joiners (0 = config records only)
    pub gop_retention: usize,

    /// Bound on a single consumer write; also the idle limit after which a
    /// channel consumer reports itself dead
    pub consumer_timeout: Duration,

    /// Idle limit after which a channel producer reports itself dead
    pub producer_timeout: Duration,

    /// Period of the background liveness sweep
    pub sweep_interval: Duration,

    /// Capacity of the mpsc queues behind channel endpoints
    pub channel_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            gop_retention: 1,
            consumer_timeout: Duration::from_secs(10),
            producer_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(5),
            channel_capacity: 1024,
        }
    }
}

impl HubConfig {
    /// Set the number of retained GOPs
    pub fn gop_retention(mut self, gops: usize) -> Self {
        self.gop_retention = gops;
        self
    }

    /// Disable GOP retention
    pub fn disable_gop_cache(mut self) -> Self {
        self.gop_retention = 0;
        self
    }

    /// Set the consumer write timeout
    pub fn consumer_timeout(mut self, timeout: Duration) -> Self {
        self.consumer_timeout = timeout;
        self
    }

    /// Set the producer read timeout
    pub fn producer_timeout(mut self, timeout: Duration) -> Self {
        self.producer_timeout = timeout;
        self
    }

    /// Set the sweep interval
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the channel endpoint queue capacity (at least 1)
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HubConfig::default();

        assert_eq!(config.gop_retention, 1);
        assert_eq!(config.consumer_timeout, Duration::from_secs(10));
        assert_eq!(config.producer_timeout, Duration::from_secs(10));
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.channel_capacity, 1024);
    }

    #[test]
    fn test_builder_disable_gop_cache() {
        let config = HubConfig::default().gop_retention(4).disable_gop_cache();

        assert_eq!(config.gop_retention, 0);
    }

    #[test]
    fn test_builder_channel_capacity_floor() {
        let config = HubConfig::default().channel_capacity(0);

        assert_eq!(config.channel_capacity, 1);
    }

    #[test]
    fn test_builder_chaining() {
        let config = HubConfig::default()
            .gop_retention(3)
            .consumer_timeout(Duration::from_secs(2))
            .producer_timeout(Duration::from_secs(3))
            .sweep_interval(Duration::from_millis(500))
            .channel_capacity(64);

        assert_eq!(config.gop_retention, 3);
        assert_eq!(config.consumer_timeout, Duration::from_secs(2));
        assert_eq!(config.producer_timeout, Duration::from_secs(3));
        assert_eq!(config.sweep_interval, Duration::from_millis(500));
        assert_eq!(config.channel_capacity, 64);
    }
}
