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

//! Subcommand implementations.

pub mod admin;
pub mod config;
pub mod cron;
pub mod run;
pub mod status;
pub mod time;

use crate::config::TickerdConfig;
use anyhow::{Context, Result};
use serde::Serialize;
use tickerd::{Database, SchedulerConfig, TickerScheduler, UniversalUuid};

/// Opens the store and builds a scheduler over it, running migrations first.
pub async fn open_scheduler(
    config: &TickerdConfig,
    scheduler_config: SchedulerConfig,
) -> Result<TickerScheduler> {
    let database = Database::try_new(&config.database.url, config.database.pool_size)
        .with_context(|| format!("failed to open database {}", config.database.url))?;

    TickerScheduler::builder()
        .database(database)
        .config(scheduler_config)
        .build()
        .await
        .context("failed to initialize scheduler")
}

/// Scheduler for one-off commands.
pub async fn connect(config: &TickerdConfig) -> Result<TickerScheduler> {
    let scheduler_config = config
        .scheduler_config()
        .context("invalid scheduler configuration")?;
    open_scheduler(config, scheduler_config).await
}

pub fn parse_id(id: &str) -> Result<UniversalUuid> {
    id.parse::<UniversalUuid>()
        .with_context(|| format!("'{}' is not a valid ticker id", id))
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize output")?
    );
    Ok(())
}

pub fn payload(request: Option<String>) -> Vec<u8> {
    request.map(String::into_bytes).unwrap_or_default()
}

fn display_payload(request: &[u8]) -> String {
    if request.is_empty() {
        "-".to_string()
    } else {
        String::from_utf8_lossy(request).into_owned()
    }
}

fn display_opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}
