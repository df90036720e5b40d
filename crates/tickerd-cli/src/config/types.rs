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

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TickerdConfig {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerSection,
    pub outbox: OutboxConfig,
    pub maintenance: MaintenanceConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    /// Random when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    pub poll_interval_ms: u64,
    pub max_concurrent_jobs: usize,
    pub handler_timeout_secs: u64,
    pub lease_timeout_secs: u64,
    pub cron_horizon: usize,
    pub expansion_interval_secs: u64,
    pub default_retry_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    pub relay_poll_interval_ms: u64,
    pub relay_batch_size: usize,
    pub relay_lock_timeout_secs: u64,
    /// Backoff after a failed publish
    pub relay_retry_delay_secs: u64,
    /// Destination for ticker lifecycle events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub cleanup_interval_secs: u64,
    pub retention_secs: u64,
    /// Also delete settled tickers past retention
    pub prune_tickers: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}
