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

//! Lease and dispatch controller.
//!
//! One cycle:
//! 1. Reset stale leases (`Locked` longer than the lease timeout) to Idle.
//! 2. Fetch at most as many due rows as there are free execution slots,
//!    restricted to functions registered on this node.
//! 3. Lease each row with a version CAS; losers move on.
//! 4. Run the handler under the handler timeout on its own task.
//! 5. Record the outcome fenced by the lease, then roll the cron horizon or
//!    resolve the batch when the row reached a terminal state.

use super::work_distributor::{PollDistributor, WorkDistributor};
use crate::cron::CronExpansionEngine;
use crate::dal::DAL;
use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use crate::error::{DispatchError, HandlerError};
use crate::models::{AttemptOutcome, DueTicker, Lease, LeaseOutcome, RecordResult, TickerKind};
use crate::registry::{HandlerRegistry, TickerContext};
use crate::retry::RetryPolicy;
use crate::time_ticker::TimeTickerEngine;
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const STALE_SCAN_LIMIT: i64 = 100;

/// Settings the controller needs from [`SchedulerConfig`](crate::SchedulerConfig).
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub worker_id: String,
    pub max_concurrent_jobs: usize,
    pub handler_timeout: Duration,
    pub lease_timeout: Duration,
    pub notification_address: Option<String>,
}

/// Counters for one dispatch cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub reclaimed: usize,
    pub leased: usize,
    pub contended: usize,
    /// Recorded outcomes, filled in by [`DispatchController::dispatch_once`]
    pub outcomes: Vec<(UniversalUuid, RecordResult)>,
}

/// Polls, leases, executes and records.
#[derive(Clone)]
pub struct DispatchController {
    dal: DAL,
    registry: HandlerRegistry,
    retry: RetryPolicy,
    cron: CronExpansionEngine,
    batches: TimeTickerEngine,
    settings: Arc<DispatchSettings>,
    slots: Arc<Semaphore>,
}

impl DispatchController {
    pub fn new(
        dal: DAL,
        registry: HandlerRegistry,
        retry: RetryPolicy,
        cron: CronExpansionEngine,
        batches: TimeTickerEngine,
        settings: DispatchSettings,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(settings.max_concurrent_jobs));
        Self {
            dal,
            registry,
            retry,
            cron,
            batches,
            settings: Arc::new(settings),
            slots,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.settings.worker_id
    }

    /// Execution slots not currently held by a running handler.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Runs one cycle and detaches the spawned executions.
    ///
    /// `now` is the cycle clock: it selects due rows, stamps leases and, moved
    /// forward by the handler's run time, timestamps the recorded outcome.
    /// Returns the cycle counters plus a handle per started execution.
    pub async fn dispatch_due(
        &self,
        now: UniversalTimestamp,
    ) -> Result<(DispatchSummary, Vec<JoinHandle<(UniversalUuid, Option<RecordResult>)>>), DispatchError>
    {
        let mut summary = DispatchSummary {
            reclaimed: self.reclaim_stale(now).await?,
            ..Default::default()
        };

        let free = self.slots.available_permits();
        if free == 0 {
            debug!("All execution slots busy, skipping poll");
            return Ok((summary, Vec::new()));
        }

        let functions = self.registry.names();
        let due = self
            .dal
            .execution()
            .due(now, &functions, free as i64)
            .await?;
        if due.is_empty() {
            debug!("No due tickers");
            return Ok((summary, Vec::new()));
        }

        let mut handles = Vec::with_capacity(due.len());
        for ticker in due {
            let Ok(permit) = self.slots.clone().try_acquire_owned() else {
                break;
            };

            match self
                .dal
                .execution()
                .try_lease(&ticker, &self.settings.worker_id, now)
                .await?
            {
                LeaseOutcome::Granted(lease) => {
                    counter!("tickerd_leases_acquired_total").increment(1);
                    summary.leased += 1;
                    let controller = self.clone();
                    handles.push(tokio::spawn(async move {
                        let id = lease.id;
                        (id, controller.execute(ticker, lease, permit, now).await)
                    }));
                }
                LeaseOutcome::Contended => {
                    counter!("tickerd_leases_contended_total").increment(1);
                    summary.contended += 1;
                }
            }
        }

        Ok((summary, handles))
    }

    /// Runs one cycle and waits for every execution it started.
    pub async fn dispatch_once(
        &self,
        now: UniversalTimestamp,
    ) -> Result<DispatchSummary, DispatchError> {
        let (mut summary, handles) = self.dispatch_due(now).await?;
        for handle in handles {
            let (id, result) = handle
                .await
                .map_err(|e| DispatchError::Join(e.to_string()))?;
            if let Some(result) = result {
                summary.outcomes.push((id, result));
            }
        }
        Ok(summary)
    }

    /// Dispatch loop. Returns after `shutdown` fires and running handlers
    /// finish (bounded by the handler timeout).
    pub async fn run(
        &self,
        distributor: PollDistributor,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), DispatchError> {
        info!(
            "Dispatcher {} started ({} slot(s))",
            self.settings.worker_id, self.settings.max_concurrent_jobs
        );

        loop {
            if let Err(e) = self.dispatch_due(UniversalTimestamp::now()).await {
                error!("Dispatch cycle failed: {}", e);
            }

            tokio::select! {
                _ = distributor.wait_for_work() => {}
                _ = shutdown.recv() => {
                    info!("Dispatcher shutdown requested");
                    break;
                }
            }
        }

        self.drain().await;
        Ok(())
    }

    async fn drain(&self) {
        let total = self.settings.max_concurrent_jobs as u32;
        let grace = self.settings.handler_timeout + Duration::from_secs(1);
        match tokio::time::timeout(grace, self.slots.acquire_many(total)).await {
            Ok(Ok(permits)) => drop(permits),
            Ok(Err(_)) => {}
            Err(_) => warn!(
                "Dispatcher {} stopped with handlers still running",
                self.settings.worker_id
            ),
        }
    }

    async fn reclaim_stale(&self, now: UniversalTimestamp) -> Result<usize, DispatchError> {
        let cutoff = chrono::Duration::from_std(self.settings.lease_timeout)
            .ok()
            .and_then(|d| now.into_inner().checked_sub_signed(d))
            .map(UniversalTimestamp)
            .unwrap_or(now);

        let stale = self
            .dal
            .execution()
            .find_stale(cutoff, STALE_SCAN_LIMIT)
            .await?;

        let mut reclaimed = 0;
        for lease in &stale {
            if self.dal.execution().reclaim(lease).await? {
                counter!("tickerd_leases_reclaimed_total").increment(1);
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    /// Runs the handler and records the outcome. `None` when no outcome was
    /// written (store failure or handler missing).
    async fn execute(
        &self,
        due: DueTicker,
        lease: Lease,
        _permit: OwnedSemaphorePermit,
        started_at: UniversalTimestamp,
    ) -> Option<RecordResult> {
        let Some(handler) = self.registry.get(&due.function) else {
            warn!(
                "Handler {} was unregistered before {} {} ran; releasing lease",
                due.function, due.kind, due.id
            );
            if let Err(e) = self.dal.execution().release(&lease).await {
                error!("Failed to release lease on {}: {}", due.id, e);
            }
            return None;
        };

        info!(
            "Executing {} {} ({}, attempt {})",
            due.kind,
            due.id,
            due.function,
            due.retry_count + 1
        );

        let ctx = TickerContext::from(&due);
        let started = Instant::now();
        let mut call = tokio::spawn(async move { handler.call(ctx).await });
        let result = match tokio::time::timeout(self.settings.handler_timeout, &mut call).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(HandlerError::retryable(format!("handler panicked: {}", join))),
            Err(_) => {
                call.abort();
                Err(HandlerError::retryable(format!(
                    "handler timed out after {:?}",
                    self.settings.handler_timeout
                )))
            }
        };
        let elapsed = started.elapsed();
        histogram!("tickerd_handler_duration_seconds").record(elapsed.as_secs_f64());

        let now = chrono::Duration::from_std(elapsed)
            .ok()
            .and_then(|d| started_at.into_inner().checked_add_signed(d))
            .map(UniversalTimestamp)
            .unwrap_or(started_at);
        let elapsed_ms = elapsed.as_millis() as i64;
        let outcome = match &result {
            Ok(()) => AttemptOutcome::Succeeded { elapsed_ms },
            Err(e) => self.retry.outcome_for(&due, e, elapsed_ms, now),
        };

        match &outcome {
            AttemptOutcome::Succeeded { .. } => {
                counter!("tickerd_jobs_executed_total").increment(1);
                info!("{} {} succeeded in {}ms", due.kind, due.id, elapsed_ms);
            }
            AttemptOutcome::RetryScheduled {
                retry_count,
                next_execution_time,
                message,
                ..
            } => {
                counter!("tickerd_jobs_retried_total").increment(1);
                warn!(
                    "{} {} failed ({}); retry {} of {} at {}",
                    due.kind, due.id, message, retry_count, due.retries, next_execution_time
                );
            }
            AttemptOutcome::Failed { message, .. } => {
                counter!("tickerd_jobs_failed_total").increment(1);
                warn!("{} {} failed permanently: {}", due.kind, due.id, message);
            }
        }

        let terminal = !matches!(outcome, AttemptOutcome::RetryScheduled { .. });
        let recorded = match self
            .dal
            .execution()
            .record(
                &due,
                &lease,
                outcome,
                now,
                self.settings.notification_address.as_deref(),
            )
            .await
        {
            Ok(recorded) => recorded,
            Err(e) => {
                error!("Failed to record outcome for {} {}: {}", due.kind, due.id, e);
                return None;
            }
        };

        let settled = match recorded {
            RecordResult::Applied => terminal,
            RecordResult::Superseded => true,
            RecordResult::Fenced => false,
        };
        if settled {
            self.after_terminal(&due, now).await;
        }
        Some(recorded)
    }

    async fn after_terminal(&self, due: &DueTicker, now: UniversalTimestamp) {
        match due.kind {
            TickerKind::CronOccurrence => {
                if let Some(cron_ticker_id) = due.cron_ticker_id {
                    if let Err(e) = self.cron.expand_by_id(cron_ticker_id, now).await {
                        error!("Failed to roll horizon of cron ticker {}: {}", cron_ticker_id, e);
                    }
                }
            }
            TickerKind::Time => {
                if let Err(e) = self.batches.on_member_settled(due.id, due.parent_id, now).await {
                    error!("Failed to resolve batch after {}: {}", due.id, e);
                }
            }
        }
    }
}
