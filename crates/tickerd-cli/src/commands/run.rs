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

//! `tickerctl run`: a long-running scheduler node.

use super::open_scheduler;
use crate::config::TickerdConfig;
use anyhow::{Context, Result};
use tickerd::{HandlerError, TickerContext, TickerScheduler};
use tracing::info;

/// Built-in handler that writes the request payload to the log.
pub const LOG_HANDLER: &str = "log";

pub async fn execute(config: &TickerdConfig, worker_id: Option<String>) -> Result<()> {
    let mut file_config = config.clone();
    if worker_id.is_some() {
        file_config.scheduler.worker_id = worker_id;
    }
    let scheduler_config = file_config
        .scheduler_config()
        .context("invalid scheduler configuration")?;

    let scheduler = open_scheduler(config, scheduler_config).await?;
    register_builtin_handlers(&scheduler);

    scheduler.start().await.context("failed to start scheduler")?;
    info!(
        "Node {} running against {} (handlers: {:?})",
        scheduler.config().worker_id(),
        config.database.url,
        scheduler.registry().names()
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    scheduler
        .shutdown()
        .await
        .context("scheduler did not shut down cleanly")?;
    Ok(())
}

fn register_builtin_handlers(scheduler: &TickerScheduler) {
    scheduler
        .registry()
        .register_fn(LOG_HANDLER, |ctx: TickerContext| async move {
            info!(
                ticker = %ctx.ticker_id,
                kind = %ctx.kind,
                attempt = ctx.retry_count + 1,
                "{}",
                String::from_utf8_lossy(&ctx.request)
            );
            Ok::<(), HandlerError>(())
        });
}
