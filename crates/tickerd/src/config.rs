/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Configuration types for the [`TickerScheduler`](crate::TickerScheduler).
//!
//! # Construction
//!
//! ```rust,ignore
//! let config = SchedulerConfig::builder()
//!     .max_concurrent_jobs(8)
//!     .handler_timeout(Duration::from_secs(60))
//!     .lease_timeout(Duration::from_secs(90))
//!     .build()?;
//! ```

use crate::error::SchedulerError;
use std::time::Duration;

/// Runtime settings for one scheduler node.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct SchedulerConfig {
    worker_id: String,
    db_pool_size: u32,
    poll_interval: Duration,
    max_concurrent_jobs: usize,
    handler_timeout: Duration,
    lease_timeout: Duration,
    cron_horizon: usize,
    expansion_interval: Duration,
    default_retry_interval: Duration,
    relay_poll_interval: Duration,
    relay_batch_size: usize,
    relay_lock_timeout: Duration,
    relay_retry_delay: Duration,
    cleanup_interval: Duration,
    retention: Duration,
    prune_tickers: bool,
    notification_address: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfigBuilder::default().config
    }
}

impl SchedulerConfig {
    /// Creates a new configuration builder with default values.
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::default()
    }

    /// Identity written into `lock_holder` and relay lock ids.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Number of pooled database connections.
    pub fn db_pool_size(&self) -> u32 {
        self.db_pool_size
    }

    /// How often the dispatcher looks for due work.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Maximum number of handlers running at once on this node.
    pub fn max_concurrent_jobs(&self) -> usize {
        self.max_concurrent_jobs
    }

    /// Maximum wall time of one handler invocation.
    pub fn handler_timeout(&self) -> Duration {
        self.handler_timeout
    }

    /// Age after which a `Locked` row is considered abandoned.
    pub fn lease_timeout(&self) -> Duration {
        self.lease_timeout
    }

    /// Number of future occurrences kept per cron ticker.
    pub fn cron_horizon(&self) -> usize {
        self.cron_horizon
    }

    /// How often cron tickers are re-expanded and batches swept.
    pub fn expansion_interval(&self) -> Duration {
        self.expansion_interval
    }

    /// Retry delay used when a ticker has no retry intervals.
    pub fn default_retry_interval(&self) -> Duration {
        self.default_retry_interval
    }

    pub fn relay_poll_interval(&self) -> Duration {
        self.relay_poll_interval
    }

    /// Maximum outboxes claimed per relay pass.
    pub fn relay_batch_size(&self) -> usize {
        self.relay_batch_size
    }

    pub fn relay_lock_timeout(&self) -> Duration {
        self.relay_lock_timeout
    }

    /// How long an outbox stays out of the pending set after a transport
    /// failure.
    pub fn relay_retry_delay(&self) -> Duration {
        self.relay_retry_delay
    }

    pub fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval
    }

    /// How long terminal rows and delivered messages are kept.
    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Whether the cleanup loop also deletes settled tickers. Delivered
    /// outbox and expired inbox rows are always pruned.
    pub fn prune_tickers(&self) -> bool {
        self.prune_tickers
    }

    /// Destination of lifecycle notifications; none are staged when unset.
    pub fn notification_address(&self) -> Option<&str> {
        self.notification_address.as_deref()
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.worker_id.trim().is_empty() {
            return Err(SchedulerError::Config("worker_id must not be empty".into()));
        }
        if self.db_pool_size == 0 {
            return Err(SchedulerError::Config("db_pool_size must be at least 1".into()));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(SchedulerError::Config(
                "max_concurrent_jobs must be at least 1".into(),
            ));
        }
        if self.cron_horizon == 0 {
            return Err(SchedulerError::Config("cron_horizon must be at least 1".into()));
        }
        if self.relay_batch_size == 0 {
            return Err(SchedulerError::Config(
                "relay_batch_size must be at least 1".into(),
            ));
        }
        if self.poll_interval.is_zero() || self.relay_poll_interval.is_zero() {
            return Err(SchedulerError::Config("poll intervals must be non-zero".into()));
        }
        if self.lease_timeout <= self.handler_timeout {
            return Err(SchedulerError::Config(format!(
                "lease_timeout ({:?}) must exceed handler_timeout ({:?})",
                self.lease_timeout, self.handler_timeout
            )));
        }
        Ok(())
    }
}

/// Builder for [`SchedulerConfig`].
#[derive(Debug, Clone)]
pub struct SchedulerConfigBuilder {
    config: SchedulerConfig,
}

impl Default for SchedulerConfigBuilder {
    fn default() -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            config: SchedulerConfig {
                worker_id: format!("tickerd-{}", &suffix[..12]),
                db_pool_size: 10,
                poll_interval: Duration::from_secs(1),
                max_concurrent_jobs: 4,
                handler_timeout: Duration::from_secs(300),
                lease_timeout: Duration::from_secs(360),
                cron_horizon: 1,
                expansion_interval: Duration::from_secs(30),
                default_retry_interval: Duration::from_secs(30),
                relay_poll_interval: Duration::from_secs(1),
                relay_batch_size: 100,
                relay_lock_timeout: Duration::from_secs(60),
                relay_retry_delay: Duration::from_secs(5),
                cleanup_interval: Duration::from_secs(3600),
                retention: Duration::from_secs(7 * 24 * 3600),
                prune_tickers: false,
                notification_address: None,
            },
        }
    }
}

impl SchedulerConfigBuilder {
    pub fn worker_id(mut self, value: impl Into<String>) -> Self {
        self.config.worker_id = value.into();
        self
    }

    pub fn db_pool_size(mut self, value: u32) -> Self {
        self.config.db_pool_size = value;
        self
    }

    pub fn poll_interval(mut self, value: Duration) -> Self {
        self.config.poll_interval = value;
        self
    }

    pub fn max_concurrent_jobs(mut self, value: usize) -> Self {
        self.config.max_concurrent_jobs = value;
        self
    }

    pub fn handler_timeout(mut self, value: Duration) -> Self {
        self.config.handler_timeout = value;
        self
    }

    pub fn lease_timeout(mut self, value: Duration) -> Self {
        self.config.lease_timeout = value;
        self
    }

    pub fn cron_horizon(mut self, value: usize) -> Self {
        self.config.cron_horizon = value;
        self
    }

    pub fn expansion_interval(mut self, value: Duration) -> Self {
        self.config.expansion_interval = value;
        self
    }

    pub fn default_retry_interval(mut self, value: Duration) -> Self {
        self.config.default_retry_interval = value;
        self
    }

    pub fn relay_poll_interval(mut self, value: Duration) -> Self {
        self.config.relay_poll_interval = value;
        self
    }

    pub fn relay_batch_size(mut self, value: usize) -> Self {
        self.config.relay_batch_size = value;
        self
    }

    pub fn relay_lock_timeout(mut self, value: Duration) -> Self {
        self.config.relay_lock_timeout = value;
        self
    }

    pub fn relay_retry_delay(mut self, value: Duration) -> Self {
        self.config.relay_retry_delay = value;
        self
    }

    pub fn cleanup_interval(mut self, value: Duration) -> Self {
        self.config.cleanup_interval = value;
        self
    }

    pub fn retention(mut self, value: Duration) -> Self {
        self.config.retention = value;
        self
    }

    pub fn prune_tickers(mut self, value: bool) -> Self {
        self.config.prune_tickers = value;
        self
    }

    pub fn notification_address(mut self, value: Option<String>) -> Self {
        self.config.notification_address = value;
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<SchedulerConfig, SchedulerError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
