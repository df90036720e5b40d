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

//! Rolling-horizon materialization of cron occurrences.
//!
//! Each expansion computes the next `horizon` instants strictly after `now`
//! and inserts whichever are missing. Inserts rely on the
//! `(cron_ticker_id, execution_time)` unique key, so concurrent expanders on
//! several nodes converge on one row per instant. Instants that passed while
//! no expander ran are never back-filled.

use super::CronExpression;
use crate::dal::DAL;
use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use crate::error::ValidationError;
use crate::models::{CronTicker, InsertOutcome};
use metrics::counter;
use tracing::{debug, info, warn};

/// What one expansion pass did for one ticker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpansionReport {
    pub cron_ticker_id: Option<UniversalUuid>,
    /// Instants inserted by this pass
    pub inserted: Vec<UniversalTimestamp>,
    /// Instants that already had a row
    pub already_scheduled: usize,
}

impl ExpansionReport {
    fn merge(&mut self, other: ExpansionReport) {
        self.inserted.extend(other.inserted);
        self.already_scheduled += other.already_scheduled;
    }
}

/// Materializes occurrence rows for cron tickers.
#[derive(Clone)]
pub struct CronExpansionEngine {
    dal: DAL,
    horizon: usize,
}

impl CronExpansionEngine {
    pub fn new(dal: DAL, horizon: usize) -> Self {
        Self {
            dal,
            horizon: horizon.max(1),
        }
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// Inserts the missing occurrences among the next `horizon` instants.
    pub async fn expand(
        &self,
        ticker: &CronTicker,
        now: UniversalTimestamp,
    ) -> Result<ExpansionReport, ValidationError> {
        let expression = CronExpression::parse(&ticker.expression)?;
        let mut report = ExpansionReport {
            cron_ticker_id: Some(ticker.id),
            ..Default::default()
        };

        for instant in expression.upcoming(now, self.horizon)? {
            match self
                .dal
                .cron_occurrence()
                .insert_if_absent(ticker.id, instant)
                .await?
            {
                InsertOutcome::Inserted(_) => report.inserted.push(instant),
                InsertOutcome::AlreadyScheduled => report.already_scheduled += 1,
            }
        }

        if !report.inserted.is_empty() {
            counter!("tickerd_cron_occurrences_scheduled_total")
                .increment(report.inserted.len() as u64);
            info!(
                "Scheduled {} occurrence(s) of cron ticker {} ({}), next at {}",
                report.inserted.len(),
                ticker.id,
                ticker.function,
                report.inserted[0]
            );
        }
        Ok(report)
    }

    /// Expands one ticker by id. `None` if it no longer exists.
    pub async fn expand_by_id(
        &self,
        id: UniversalUuid,
        now: UniversalTimestamp,
    ) -> Result<Option<ExpansionReport>, ValidationError> {
        match self.dal.cron_ticker().get(id).await? {
            Some(ticker) => self.expand(&ticker, now).await.map(Some),
            None => {
                debug!("Cron ticker {} vanished before expansion", id);
                Ok(None)
            }
        }
    }

    /// Sweeps every ticker. A ticker that fails to expand is logged and
    /// skipped so one bad row cannot stall the others.
    pub async fn expand_all(&self, now: UniversalTimestamp) -> Result<ExpansionReport, ValidationError> {
        let tickers = self.dal.cron_ticker().list_all().await?;
        let mut total = ExpansionReport::default();

        for ticker in &tickers {
            match self.expand(ticker, now).await {
                Ok(report) => total.merge(report),
                Err(e) => warn!("Failed to expand cron ticker {}: {}", ticker.id, e),
            }
        }

        debug!(
            "Expansion sweep over {} ticker(s): {} inserted, {} already scheduled",
            tickers.len(),
            total.inserted.len(),
            total.already_scheduled
        );
        Ok(total)
    }
}
