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

use crate::config::types::*;
use std::time::Duration;
use tickerd::{SchedulerConfig, SchedulerError};

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "${TICKERD_DATABASE_URL:-sqlite://tickerd.db}".to_string(),
            pool_size: 10,
        }
    }
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            worker_id: None,
            poll_interval_ms: 1000,
            max_concurrent_jobs: 4,
            handler_timeout_secs: 300,
            lease_timeout_secs: 360,
            cron_horizon: 1,
            expansion_interval_secs: 30,
            default_retry_interval_secs: 30,
        }
    }
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            relay_poll_interval_ms: 1000,
            relay_batch_size: 100,
            relay_lock_timeout_secs: 60,
            relay_retry_delay_secs: 5,
            notification_address: None,
        }
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: 3600,
            retention_secs: 7 * 24 * 3600,
            prune_tickers: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl TickerdConfig {
    /// Library configuration for a node.
    pub fn scheduler_config(&self) -> Result<SchedulerConfig, SchedulerError> {
        let s = &self.scheduler;
        let mut builder = SchedulerConfig::builder()
            .db_pool_size(self.database.pool_size)
            .poll_interval(Duration::from_millis(s.poll_interval_ms))
            .max_concurrent_jobs(s.max_concurrent_jobs)
            .handler_timeout(Duration::from_secs(s.handler_timeout_secs))
            .lease_timeout(Duration::from_secs(s.lease_timeout_secs))
            .cron_horizon(s.cron_horizon)
            .expansion_interval(Duration::from_secs(s.expansion_interval_secs))
            .default_retry_interval(Duration::from_secs(s.default_retry_interval_secs))
            .relay_poll_interval(Duration::from_millis(self.outbox.relay_poll_interval_ms))
            .relay_batch_size(self.outbox.relay_batch_size)
            .relay_lock_timeout(Duration::from_secs(self.outbox.relay_lock_timeout_secs))
            .relay_retry_delay(Duration::from_secs(self.outbox.relay_retry_delay_secs))
            .cleanup_interval(Duration::from_secs(self.maintenance.cleanup_interval_secs))
            .retention(Duration::from_secs(self.maintenance.retention_secs))
            .prune_tickers(self.maintenance.prune_tickers)
            .notification_address(self.outbox.notification_address.clone());
        if let Some(worker_id) = &s.worker_id {
            builder = builder.worker_id(worker_id.clone());
        }
        builder.build()
    }
}

/// Generate a complete default configuration as TOML string
pub fn generate_default_config_toml() -> Result<String, toml::ser::Error> {
    toml::to_string_pretty(&TickerdConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_library_defaults() {
        let config = TickerdConfig::default().scheduler_config().unwrap();
        let library = SchedulerConfig::default();
        assert_eq!(config.poll_interval(), library.poll_interval());
        assert_eq!(config.handler_timeout(), library.handler_timeout());
        assert_eq!(config.lease_timeout(), library.lease_timeout());
        assert_eq!(config.relay_batch_size(), library.relay_batch_size());
        assert_eq!(config.retention(), library.retention());
        assert_eq!(config.relay_retry_delay(), library.relay_retry_delay());
        assert_eq!(config.prune_tickers(), library.prune_tickers());
    }

    #[test]
    fn test_default_toml_round_trips() {
        let text = generate_default_config_toml().unwrap();
        assert!(text.contains("[database]"));
        assert!(text.contains("TICKERD_DATABASE_URL"));
        let parsed: TickerdConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.scheduler.max_concurrent_jobs, 4);
    }

    #[test]
    fn test_worker_id_is_passed_through() {
        let mut config = TickerdConfig::default();
        config.scheduler.worker_id = Some("node-7".to_string());
        assert_eq!(config.scheduler_config().unwrap().worker_id(), "node-7");
    }
}
