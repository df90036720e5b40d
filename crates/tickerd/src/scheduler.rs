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

//! # Ticker Scheduler
//!
//! [`TickerScheduler`] is the entry point that ties the store, the handler
//! registry, the cron and time ticker engines, the dispatcher and the outbox
//! relay together.
//!
//! Registration and status calls work without background loops running.
//! [`TickerScheduler::start`] spawns them:
//!
//! - **dispatch**: polls, leases and executes due rows
//! - **maintenance**: rolls every cron horizon forward and resolves batches
//! - **relay**: publishes staged outbox messages
//! - **cleanup**: prunes delivered outbox and expired inbox rows older than
//!   the retention window, and settled tickers when `prune_tickers` is set
//!
//! ```rust,ignore
//! use tickerd::{NewCronTicker, TickerScheduler};
//!
//! let scheduler = TickerScheduler::new("sqlite://tickerd.db").await?;
//! scheduler.registry().register_fn("report", |_ctx| async { Ok(()) });
//! scheduler.register_cron(NewCronTicker::new("0 */5 * * * *", "report")).await?;
//! scheduler.start().await?;
//! // ...
//! scheduler.shutdown().await?;
//! ```

use crate::config::SchedulerConfig;
use crate::cron::{CronExpansionEngine, CronExpression, ExpansionReport};
use crate::dal::DAL;
use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use crate::database::Database;
use crate::dispatcher::{DispatchController, DispatchSettings, DispatchSummary, PollDistributor};
use crate::error::{DispatchError, RegistrationError, RelayError, SchedulerError, ValidationError};
use crate::messaging::{InboxDeduplicator, LogTransport, OutboxRelay, RelayReport, Transport};
use crate::models::{
    BatchResolution, CronTicker, CronTickerOccurrence, CronTickerUpdate, NewBatchChild,
    NewCronTicker, NewOutboxMessage, NewTimeTicker, RegistrationOutcome, TickerKind, TickerStatus,
    TimeTicker, TimeTickerBatch,
};
use crate::registry::HandlerRegistry;
use crate::retry::RetryPolicy;
use crate::time_ticker::TimeTickerEngine;
use diesel::sqlite::SqliteConnection;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Rows removed (or, on a dry run, matched) by [`TickerScheduler::cleanup`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub occurrences: usize,
    pub time_tickers: usize,
    pub outboxes: usize,
    pub inbox_rows: usize,
    pub dry_run: bool,
}

impl CleanupReport {
    pub fn total(&self) -> usize {
        self.occurrences + self.time_tickers + self.outboxes + self.inbox_rows
    }
}

/// Any row `status <id>` can resolve to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum TickerRecord {
    Cron(CronTicker),
    Occurrence(CronTickerOccurrence),
    Time(TimeTicker),
}

/// Background task handles.
#[derive(Default)]
struct RuntimeHandles {
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    shutdown_sender: Option<broadcast::Sender<()>>,
}

/// Builder for [`TickerScheduler`].
pub struct TickerSchedulerBuilder {
    database_url: Option<String>,
    database: Option<Database>,
    config: SchedulerConfig,
    registry: HandlerRegistry,
    transport: Option<Arc<dyn Transport>>,
    run_migrations: bool,
}

impl TickerSchedulerBuilder {
    fn new() -> Self {
        Self {
            database_url: None,
            database: None,
            config: SchedulerConfig::default(),
            registry: HandlerRegistry::new(),
            transport: None,
            run_migrations: true,
        }
    }

    /// SQLite URL or path; ignored when [`database`](Self::database) is set.
    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// Shares an existing pool.
    pub fn database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Relay transport; defaults to [`LogTransport`].
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Skips applying embedded migrations on build.
    pub fn skip_migrations(mut self) -> Self {
        self.run_migrations = false;
        self
    }

    pub async fn build(self) -> Result<TickerScheduler, SchedulerError> {
        self.config.validate()?;

        let database = match (self.database, self.database_url) {
            (Some(database), _) => database,
            (None, Some(url)) => Database::try_new(&url, self.config.db_pool_size())?,
            (None, None) => {
                return Err(SchedulerError::Config(
                    "a database URL or an existing database is required".to_string(),
                ))
            }
        };

        if self.run_migrations {
            database.run_migrations().await?;
        }

        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(LogTransport) as Arc<dyn Transport>);

        Ok(TickerScheduler::assemble(
            DAL::new(database),
            self.config,
            self.registry,
            transport,
        ))
    }
}

/// Scheduler facade. Cheap to share behind an `Arc`.
pub struct TickerScheduler {
    config: SchedulerConfig,
    dal: DAL,
    registry: HandlerRegistry,
    cron: CronExpansionEngine,
    time: TimeTickerEngine,
    controller: DispatchController,
    relay: OutboxRelay,
    inbox: InboxDeduplicator,
    dispatch_distributor: PollDistributor,
    relay_distributor: PollDistributor,
    runtime_handles: RwLock<RuntimeHandles>,
}

impl TickerScheduler {
    /// Opens `database_url` with default configuration and applies migrations.
    pub async fn new(database_url: &str) -> Result<Self, SchedulerError> {
        Self::builder().database_url(database_url).build().await
    }

    pub async fn with_config(
        database_url: &str,
        config: SchedulerConfig,
    ) -> Result<Self, SchedulerError> {
        Self::builder()
            .database_url(database_url)
            .config(config)
            .build()
            .await
    }

    pub fn builder() -> TickerSchedulerBuilder {
        TickerSchedulerBuilder::new()
    }

    fn assemble(
        dal: DAL,
        config: SchedulerConfig,
        registry: HandlerRegistry,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let cron = CronExpansionEngine::new(dal.clone(), config.cron_horizon());
        let time = TimeTickerEngine::new(dal.clone());
        let controller = DispatchController::new(
            dal.clone(),
            registry.clone(),
            RetryPolicy::new(config.default_retry_interval()),
            cron.clone(),
            time.clone(),
            DispatchSettings {
                worker_id: config.worker_id().to_string(),
                max_concurrent_jobs: config.max_concurrent_jobs(),
                handler_timeout: config.handler_timeout(),
                lease_timeout: config.lease_timeout(),
                notification_address: config.notification_address().map(str::to_string),
            },
        );
        let relay = OutboxRelay::new(
            dal.clone(),
            transport,
            config.worker_id(),
            config.relay_batch_size(),
            config.relay_lock_timeout(),
            config.relay_retry_delay(),
        );
        let inbox = InboxDeduplicator::new(
            dal.clone(),
            config.worker_id(),
            config.relay_lock_timeout(),
        );

        Self {
            dispatch_distributor: PollDistributor::new(config.poll_interval()),
            relay_distributor: PollDistributor::new(config.relay_poll_interval()),
            config,
            dal,
            registry,
            cron,
            time,
            controller,
            relay,
            inbox,
            runtime_handles: RwLock::new(RuntimeHandles::default()),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn dal(&self) -> &DAL {
        &self.dal
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Inbox guard for consumers running next to this scheduler.
    pub fn inbox(&self) -> &InboxDeduplicator {
        &self.inbox
    }

    // ---------------------------------------------------------------------
    // Registration
    // ---------------------------------------------------------------------

    /// Registers a recurring job and schedules its next occurrence(s).
    ///
    /// Registering an identical definition returns `Existing`; a definition
    /// carrying a known init identifier is updated in place.
    pub async fn register_cron(
        &self,
        ticker: NewCronTicker,
    ) -> Result<RegistrationOutcome<CronTicker>, SchedulerError> {
        if ticker.function.trim().is_empty() {
            return Err(RegistrationError::EmptyFunction.into());
        }
        CronExpression::parse(&ticker.expression)?;
        validate_retries(ticker.retries)?;

        let outcome = self.dal.cron_ticker().create(ticker).await?;
        self.cron
            .expand(outcome.inner(), UniversalTimestamp::now())
            .await?;
        self.dispatch_distributor.wake();
        Ok(outcome)
    }

    /// Edits a recurring job. A changed expression drops pending
    /// first-attempt occurrences and re-expands.
    pub async fn update_cron(
        &self,
        id: UniversalUuid,
        update: CronTickerUpdate,
    ) -> Result<CronTicker, SchedulerError> {
        if let Some(expression) = update.expression.as_deref() {
            CronExpression::parse(expression)?;
        }
        if let Some(retries) = update.retries {
            validate_retries(retries)?;
        }

        let ticker = self.dal.cron_ticker().update(id, update).await?;
        self.cron.expand(&ticker, UniversalTimestamp::now()).await?;
        self.dispatch_distributor.wake();
        Ok(ticker)
    }

    /// Deletes a recurring job and all of its occurrences.
    pub async fn remove_cron(&self, id: UniversalUuid) -> Result<bool, SchedulerError> {
        Ok(self.dal.cron_ticker().delete(id).await?)
    }

    /// Schedules a one-shot job; no execution time means now.
    pub async fn schedule_time(
        &self,
        ticker: NewTimeTicker,
    ) -> Result<RegistrationOutcome<TimeTicker>, SchedulerError> {
        let outcome = self.time.schedule(ticker, UniversalTimestamp::now()).await?;
        self.dispatch_distributor.wake();
        Ok(outcome)
    }

    /// Schedules a parent and its children atomically.
    pub async fn schedule_batch(
        &self,
        parent: NewTimeTicker,
        children: Vec<NewBatchChild>,
    ) -> Result<RegistrationOutcome<TimeTickerBatch>, SchedulerError> {
        let outcome = self
            .time
            .schedule_batch(parent, children, UniversalTimestamp::now())
            .await?;
        self.dispatch_distributor.wake();
        Ok(outcome)
    }

    /// Deletes a time ticker that is not currently leased.
    pub async fn remove_time(&self, id: UniversalUuid) -> Result<(), SchedulerError> {
        Ok(self.time.remove(id).await?)
    }

    /// Cancels an Idle cron occurrence and schedules the slot after it.
    pub async fn skip_occurrence(
        &self,
        id: UniversalUuid,
        reason: &str,
    ) -> Result<bool, SchedulerError> {
        let skipped = self
            .dal
            .execution()
            .skip(TickerKind::CronOccurrence, id, reason)
            .await?;
        if skipped {
            if let Some(occurrence) = self.dal.cron_occurrence().get(id).await? {
                self.cron
                    .expand_by_id(occurrence.cron_ticker_id, UniversalTimestamp::now())
                    .await?;
            }
        }
        Ok(skipped)
    }

    /// Cancels an Idle time ticker; batch siblings waiting on it are resolved.
    pub async fn skip_time_ticker(
        &self,
        id: UniversalUuid,
        reason: &str,
    ) -> Result<bool, SchedulerError> {
        Ok(self.time.skip(id, reason).await?)
    }

    /// Runs `state_change` and stages `messages` in one transaction.
    pub async fn commit_with<T, F>(
        &self,
        state_change: F,
        messages: Vec<NewOutboxMessage>,
    ) -> Result<(T, Option<UniversalUuid>), SchedulerError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, ValidationError> + Send + 'static,
        T: Send + 'static,
    {
        let committed = self.dal.outbox().commit_with(state_change, messages).await?;
        if committed.1.is_some() {
            self.relay_distributor.wake();
        }
        Ok(committed)
    }

    // ---------------------------------------------------------------------
    // Status
    // ---------------------------------------------------------------------

    pub async fn get_cron_ticker(
        &self,
        id: UniversalUuid,
    ) -> Result<Option<CronTicker>, SchedulerError> {
        Ok(self.dal.cron_ticker().get(id).await?)
    }

    pub async fn list_cron_tickers(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CronTicker>, SchedulerError> {
        Ok(self.dal.cron_ticker().list(limit, offset).await?)
    }

    pub async fn get_occurrence(
        &self,
        id: UniversalUuid,
    ) -> Result<Option<CronTickerOccurrence>, SchedulerError> {
        Ok(self.dal.cron_occurrence().get(id).await?)
    }

    pub async fn list_occurrences(
        &self,
        cron_ticker_id: UniversalUuid,
        status: Option<TickerStatus>,
        limit: i64,
    ) -> Result<Vec<CronTickerOccurrence>, SchedulerError> {
        Ok(self
            .dal
            .cron_occurrence()
            .list_for_ticker(cron_ticker_id, status, limit)
            .await?)
    }

    pub async fn get_time_ticker(
        &self,
        id: UniversalUuid,
    ) -> Result<Option<TimeTicker>, SchedulerError> {
        Ok(self.dal.time_ticker().get(id).await?)
    }

    pub async fn list_time_tickers(
        &self,
        status: Option<TickerStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TimeTicker>, SchedulerError> {
        Ok(self.dal.time_ticker().list(status, limit, offset).await?)
    }

    pub async fn batch_children(
        &self,
        parent_id: UniversalUuid,
    ) -> Result<Vec<TimeTicker>, SchedulerError> {
        Ok(self.dal.time_ticker().children(parent_id).await?)
    }

    /// Resolves an id against cron tickers, occurrences and time tickers.
    pub async fn find(&self, id: UniversalUuid) -> Result<Option<TickerRecord>, SchedulerError> {
        if let Some(ticker) = self.get_cron_ticker(id).await? {
            return Ok(Some(TickerRecord::Cron(ticker)));
        }
        if let Some(occurrence) = self.get_occurrence(id).await? {
            return Ok(Some(TickerRecord::Occurrence(occurrence)));
        }
        Ok(self.get_time_ticker(id).await?.map(TickerRecord::Time))
    }

    // ---------------------------------------------------------------------
    // Single passes
    // ---------------------------------------------------------------------

    /// One dispatch cycle, waiting for the handlers it starts.
    pub async fn dispatch_once(
        &self,
        now: UniversalTimestamp,
    ) -> Result<DispatchSummary, DispatchError> {
        self.controller.dispatch_once(now).await
    }

    /// One relay pass.
    pub async fn relay_once(&self, now: UniversalTimestamp) -> Result<RelayReport, RelayError> {
        self.relay.run_once(now).await
    }

    /// Tops every cron ticker up to the configured horizon.
    pub async fn expand_all(
        &self,
        now: UniversalTimestamp,
    ) -> Result<ExpansionReport, ValidationError> {
        self.cron.expand_all(now).await
    }

    /// Resolves every batch with unresolved children.
    pub async fn resolve_batches(
        &self,
        now: UniversalTimestamp,
    ) -> Result<BatchResolution, ValidationError> {
        self.time.sweep(now).await
    }

    /// Deletes settled rows last touched more than `older_than` ago.
    ///
    /// Pending occurrences, pending or locked time tickers, batch parents
    /// with pending children and undelivered outboxes are never removed.
    pub async fn cleanup(
        &self,
        older_than: Duration,
        dry_run: bool,
    ) -> Result<CleanupReport, SchedulerError> {
        let now = UniversalTimestamp::now();
        let cutoff = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|d| now.into_inner().checked_sub_signed(d))
            .map(UniversalTimestamp)
            .ok_or_else(|| {
                SchedulerError::Config(format!("retention {:?} is out of range", older_than))
            })?;

        let report = if dry_run {
            CleanupReport {
                occurrences: self.dal.cron_occurrence().count_terminal_before(cutoff).await? as usize,
                time_tickers: self.dal.time_ticker().count_terminal_before(cutoff).await? as usize,
                outboxes: self.dal.outbox().count_delivered_before(cutoff).await? as usize,
                inbox_rows: self.dal.inbox().count_expired(now, cutoff).await? as usize,
                dry_run: true,
            }
        } else {
            CleanupReport {
                occurrences: self.dal.cron_occurrence().delete_terminal_before(cutoff).await?,
                time_tickers: self.dal.time_ticker().delete_terminal_before(cutoff).await?,
                outboxes: self.dal.outbox().delete_delivered_before(cutoff).await?,
                inbox_rows: self.inbox.cleanup(now, older_than).await?,
                dry_run: false,
            }
        };

        if report.total() > 0 {
            info!(
                "Cleanup{} before {}: {} occurrence(s), {} time ticker(s), {} outbox(es), {} inbox row(s)",
                if dry_run { " (dry run)" } else { "" },
                cutoff,
                report.occurrences,
                report.time_tickers,
                report.outboxes,
                report.inbox_rows
            );
        }
        Ok(report)
    }

    // ---------------------------------------------------------------------
    // Background services
    // ---------------------------------------------------------------------

    pub async fn is_running(&self) -> bool {
        self.runtime_handles.read().await.shutdown_sender.is_some()
    }

    /// Spawns the dispatch, maintenance, relay and cleanup loops.
    ///
    /// # Errors
    /// `SchedulerError::AlreadyStarted` if the loops are running.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let mut handles = self.runtime_handles.write().await;
        if handles.shutdown_sender.is_some() {
            return Err(SchedulerError::AlreadyStarted);
        }

        info!(
            "Starting scheduler {} with handlers {:?}",
            self.config.worker_id(),
            self.registry.names()
        );
        if self.registry.is_empty() {
            warn!("No handlers registered; nothing will be dispatched");
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let controller = self.controller.clone();
        let distributor = self.dispatch_distributor.clone();
        let rx = shutdown_tx.subscribe();
        handles.tasks.push((
            "dispatch",
            tokio::spawn(async move {
                if let Err(e) = controller.run(distributor, rx).await {
                    error!("Dispatch loop failed: {}", e);
                }
            }),
        ));

        let cron = self.cron.clone();
        let time = self.time.clone();
        let interval = self.config.expansion_interval();
        let mut rx = shutdown_tx.subscribe();
        handles.tasks.push((
            "maintenance",
            tokio::spawn(async move {
                loop {
                    let now = UniversalTimestamp::now();
                    if let Err(e) = cron.expand_all(now).await {
                        error!("Cron expansion sweep failed: {}", e);
                    }
                    if let Err(e) = time.sweep(now).await {
                        error!("Batch sweep failed: {}", e);
                    }

                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {}
                        _ = rx.recv() => {
                            debug!("Maintenance loop shutdown requested");
                            break;
                        }
                    }
                }
            }),
        ));

        let relay = self.relay.clone();
        let distributor = self.relay_distributor.clone();
        let rx = shutdown_tx.subscribe();
        handles.tasks.push((
            "relay",
            tokio::spawn(async move {
                if let Err(e) = relay.run(distributor, rx).await {
                    error!("Relay loop failed: {}", e);
                }
            }),
        ));

        let dal = self.dal.clone();
        let inbox = self.inbox.clone();
        let interval = self.config.cleanup_interval();
        let retention = self.config.retention();
        let prune_tickers = self.config.prune_tickers();
        let mut rx = shutdown_tx.subscribe();
        handles.tasks.push((
            "cleanup",
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {}
                        _ = rx.recv() => {
                            debug!("Cleanup loop shutdown requested");
                            break;
                        }
                    }
                    let now = UniversalTimestamp::now();
                    if let Err(e) = prune(&dal, &inbox, retention, prune_tickers, now).await {
                        error!("Cleanup pass failed: {}", e);
                    }
                }
            }),
        ));

        handles.shutdown_sender = Some(shutdown_tx);
        Ok(())
    }

    /// Stops the background loops and waits for running handlers.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        let mut handles = self.runtime_handles.write().await;

        if let Some(sender) = handles.shutdown_sender.take() {
            let _ = sender.send(());
        }

        let (names, tasks): (Vec<_>, Vec<_>) = handles.tasks.drain(..).unzip();
        for (name, result) in names.into_iter().zip(join_all(tasks).await) {
            if let Err(e) = result {
                error!("{} loop terminated abnormally: {}", name, e);
            }
        }

        info!("Scheduler {} stopped", self.config.worker_id());
        Ok(())
    }
}

/// One cleanup-loop pass. Ticker history is only deleted when
/// `prune_tickers` is set; operators otherwise remove it through
/// [`TickerScheduler::cleanup`].
async fn prune(
    dal: &DAL,
    inbox: &InboxDeduplicator,
    retention: Duration,
    prune_tickers: bool,
    now: UniversalTimestamp,
) -> Result<CleanupReport, ValidationError> {
    let mut report = CleanupReport::default();
    let Some(cutoff) = chrono::Duration::from_std(retention)
        .ok()
        .and_then(|d| now.into_inner().checked_sub_signed(d))
        .map(UniversalTimestamp)
    else {
        return Ok(report);
    };

    if prune_tickers {
        report.occurrences = dal.cron_occurrence().delete_terminal_before(cutoff).await?;
        report.time_tickers = dal.time_ticker().delete_terminal_before(cutoff).await?;
    }
    report.outboxes = dal.outbox().delete_delivered_before(cutoff).await?;
    report.inbox_rows = inbox.cleanup(now, retention).await?;
    debug!(
        "Pruned {} occurrence(s), {} time ticker(s), {} outbox(es), {} inbox row(s)",
        report.occurrences, report.time_tickers, report.outboxes, report.inbox_rows
    );
    Ok(report)
}

fn validate_retries(retries: i32) -> Result<(), ValidationError> {
    if retries < 0 {
        return Err(ValidationError::InvalidRetryIntervals(format!(
            "retries must not be negative (got {})",
            retries
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn scheduler() -> (tempfile::TempDir, TickerScheduler) {
        let dir = tempfile::tempdir().unwrap();
        let url = dir.path().join("scheduler.db");
        let scheduler = TickerScheduler::new(url.to_str().unwrap()).await.unwrap();
        (dir, scheduler)
    }

    #[tokio::test]
    async fn test_builder_requires_database() {
        let result = TickerScheduler::builder().build().await;
        assert!(matches!(result, Err(SchedulerError::Config(_))));
    }

    #[tokio::test]
    async fn test_register_cron_rejects_bad_input() {
        let (_dir, scheduler) = scheduler().await;

        let err = scheduler
            .register_cron(NewCronTicker::new("not a cron", "job"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Validation(ValidationError::InvalidCronExpression { .. })
        ));

        let err = scheduler
            .register_cron(NewCronTicker::new("0 * * * * *", " "))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Registration(RegistrationError::EmptyFunction)
        ));
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (_dir, scheduler) = scheduler().await;
        scheduler.start().await.unwrap();
        assert!(scheduler.is_running().await);
        assert!(matches!(
            scheduler.start().await,
            Err(SchedulerError::AlreadyStarted)
        ));

        scheduler.shutdown().await.unwrap();
        assert!(!scheduler.is_running().await);
    }

    #[tokio::test]
    async fn test_find_resolves_each_kind() {
        let (_dir, scheduler) = scheduler().await;
        let cron = scheduler
            .register_cron(NewCronTicker::new("0 0 * * * *", "hourly"))
            .await
            .unwrap()
            .into_inner();
        let occurrence = scheduler
            .list_occurrences(cron.id, None, 10)
            .await
            .unwrap()
            .remove(0);
        let time = scheduler
            .schedule_time(NewTimeTicker::new("once"))
            .await
            .unwrap()
            .into_inner();

        assert!(matches!(scheduler.find(cron.id).await.unwrap(), Some(TickerRecord::Cron(_))));
        assert!(matches!(
            scheduler.find(occurrence.id).await.unwrap(),
            Some(TickerRecord::Occurrence(_))
        ));
        assert!(matches!(scheduler.find(time.id).await.unwrap(), Some(TickerRecord::Time(_))));
        assert!(scheduler.find(UniversalUuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cleanup_pass_only_prunes_tickers_when_enabled() {
        let (_dir, scheduler) = scheduler().await;
        let ticker = scheduler
            .schedule_time(NewTimeTicker::new("job"))
            .await
            .unwrap()
            .into_inner();
        assert!(scheduler.skip_time_ticker(ticker.id, "not needed").await.unwrap());

        let later = UniversalTimestamp(chrono::Utc::now() + chrono::Duration::days(30));
        let retention = Duration::from_secs(7 * 24 * 3600);

        let report = prune(&scheduler.dal, &scheduler.inbox, retention, false, later)
            .await
            .unwrap();
        assert_eq!(report.time_tickers, 0);
        assert!(scheduler.get_time_ticker(ticker.id).await.unwrap().is_some());

        let report = prune(&scheduler.dal, &scheduler.inbox, retention, true, later)
            .await
            .unwrap();
        assert_eq!(report.time_tickers, 1);
        assert!(scheduler.get_time_ticker(ticker.id).await.unwrap().is_none());
    }
}
