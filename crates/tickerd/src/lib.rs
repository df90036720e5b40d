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

//! # tickerd
//!
//! Durable job scheduling on SQLite.
//!
//! - **Cron tickers** expand a cron expression into concrete occurrence rows,
//!   a configurable number of slots ahead.
//! - **Time tickers** run once at a given instant and can be grouped into
//!   parent/child batches whose children are gated on run conditions.
//! - Any number of nodes may poll the same store. A row runs on the node
//!   that wins its version-checked lease; stale leases are reclaimed.
//! - Failed attempts are retried on the ticker's interval schedule.
//! - Outcomes and outbound messages commit together through a transactional
//!   outbox; an inbox keeps consumers from processing a redelivery twice.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use tickerd::{HandlerError, NewTimeTicker, TickerContext, TickerScheduler};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     tickerd::init_logging(None);
//!
//!     let scheduler = TickerScheduler::new("tickerd.db").await?;
//!     scheduler.registry().register_fn("greet", |ctx: TickerContext| async move {
//!         println!("hello {}", ctx.request_str()?);
//!         Ok::<(), HandlerError>(())
//!     });
//!
//!     scheduler
//!         .schedule_time(NewTimeTicker::new("greet").with_request("world"))
//!         .await?;
//!     scheduler.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     scheduler.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod cron;
pub mod dal;
pub mod database;
pub mod dispatcher;
pub mod error;
pub mod messaging;
pub mod models;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod time_ticker;

pub use config::{SchedulerConfig, SchedulerConfigBuilder};
pub use cron::{CronExpansionEngine, CronExpression, ExpansionReport};
pub use dal::DAL;
pub use database::universal_types::{UniversalTimestamp, UniversalUuid};
pub use database::Database;
pub use dispatcher::{DispatchController, DispatchSummary};
pub use error::{
    DatabaseError, DispatchError, HandlerError, InboxError, RegistrationError, RelayError,
    SchedulerError, TransportError, ValidationError,
};
pub use messaging::{
    InMemoryTransport, InboxConsumer, InboxDeduplicator, InboxOutcome, LogTransport, OutboxRelay,
    RelayReport, Transport,
};
pub use models::{
    CronTicker, CronTickerOccurrence, CronTickerUpdate, NewBatchChild, NewCronTicker,
    NewOutboxMessage, NewTimeTicker, RecordResult, RegistrationOutcome, RunCondition,
    TickerEvent, TickerKind, TickerStatus, TimeTicker, TimeTickerBatch,
};
pub use registry::{HandlerRegistry, TickerContext, TickerHandler};
pub use retry::{RetryDecision, RetryPolicy};
pub use scheduler::{CleanupReport, TickerRecord, TickerScheduler, TickerSchedulerBuilder};
pub use time_ticker::TimeTickerEngine;

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static LOGGING: OnceCell<()> = OnceCell::new();

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `default_level` (or `info`). Later calls are no-ops, as is the first call
/// when another global subscriber is already installed.
pub fn init_logging(default_level: Option<&str>) {
    LOGGING.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level.unwrap_or("info")));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    });
}

