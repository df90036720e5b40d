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

//! # Time Ticker Engine
//!
//! One-shot jobs and parent/child batches.
//!
//! A batch child is timed in one of three ways:
//!
//! - `unconditional` with a time: due at that time regardless of siblings.
//! - `unconditional` without a time: due as soon as the parent is terminal.
//! - `all_succeeded` / `any_succeeded`: held with no time until the parent
//!   and every unconditional sibling are terminal, then released or skipped.
//!
//! Resolution runs after each terminal outcome of a batch member and from a
//! periodic sweep; both paths are idempotent.

use crate::dal::DAL;
use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use crate::error::{RegistrationError, ValidationError};
use crate::models::{
    BatchResolution, NewBatchChild, NewTimeTicker, RegistrationOutcome, TickerKind, TimeTicker,
    TimeTickerBatch,
};
use metrics::counter;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct TimeTickerEngine {
    dal: DAL,
}

impl TimeTickerEngine {
    pub fn new(dal: DAL) -> Self {
        Self { dal }
    }

    /// Schedules a one-shot job. A missing execution time means `now`.
    pub async fn schedule(
        &self,
        ticker: NewTimeTicker,
        now: UniversalTimestamp,
    ) -> Result<RegistrationOutcome<TimeTicker>, RegistrationError> {
        validate_ticker(&ticker)?;
        self.dal.time_ticker().create(ticker, now).await
    }

    /// Stores a parent and its children atomically.
    ///
    /// # Errors
    /// `ValidationError::InvalidBatch` when a conditional child carries an
    /// execution time.
    pub async fn schedule_batch(
        &self,
        parent: NewTimeTicker,
        children: Vec<NewBatchChild>,
        now: UniversalTimestamp,
    ) -> Result<RegistrationOutcome<TimeTickerBatch>, RegistrationError> {
        validate_ticker(&parent)?;
        for (index, child) in children.iter().enumerate() {
            validate_ticker(&child.ticker)?;
            if child.run_condition.is_conditional() && child.ticker.execution_time.is_some() {
                return Err(ValidationError::InvalidBatch(format!(
                    "child {} ({}) is {} and cannot carry an execution time",
                    index, child.ticker.function, child.run_condition
                ))
                .into());
            }
        }

        let outcome = self.dal.time_ticker().create_batch(parent, children, now).await?;

        // Children of a batch whose parent already settled (re-registration
        // by init identifier) may be resolvable right away.
        if !outcome.is_created() {
            self.resolve_batch(outcome.inner().parent.id, now).await?;
        }
        Ok(outcome)
    }

    /// Releases or skips the children of `parent_id` whose gating set is
    /// terminal. Children already resolved are left untouched.
    pub async fn resolve_batch(
        &self,
        parent_id: UniversalUuid,
        now: UniversalTimestamp,
    ) -> Result<BatchResolution, ValidationError> {
        let resolution = self.dal.time_ticker().resolve_children(parent_id, now).await?;
        counter!("tickerd_batch_children_released_total").increment(resolution.released.len() as u64);
        counter!("tickerd_batch_children_skipped_total").increment(resolution.skipped.len() as u64);
        Ok(resolution)
    }

    /// Resolves every batch that still has unresolved children.
    pub async fn sweep(&self, now: UniversalTimestamp) -> Result<BatchResolution, ValidationError> {
        let parents = self.dal.time_ticker().parents_with_unresolved_children().await?;
        let mut total = BatchResolution::default();

        for parent_id in parents {
            match self.resolve_batch(parent_id, now).await {
                Ok(resolution) => {
                    total.released.extend(resolution.released);
                    total.skipped.extend(resolution.skipped);
                }
                Err(e) => warn!("Failed to resolve batch {}: {}", parent_id, e),
            }
        }

        if !total.is_empty() {
            debug!(
                "Batch sweep released {} and skipped {} child(ren)",
                total.released.len(),
                total.skipped.len()
            );
        }
        Ok(total)
    }

    /// Called after a batch member reaches a terminal state.
    pub async fn on_member_settled(
        &self,
        ticker_id: UniversalUuid,
        parent_id: Option<UniversalUuid>,
        now: UniversalTimestamp,
    ) -> Result<BatchResolution, ValidationError> {
        self.resolve_batch(parent_id.unwrap_or(ticker_id), now).await
    }

    /// Deletes a ticker. Unresolved children of a parent are skipped first.
    pub async fn remove(&self, id: UniversalUuid) -> Result<(), RegistrationError> {
        self.dal.time_ticker().remove(id).await
    }

    /// Operator cancellation of an Idle ticker.
    pub async fn skip(&self, id: UniversalUuid, reason: &str) -> Result<bool, ValidationError> {
        let skipped = self.dal.execution().skip(TickerKind::Time, id, reason).await?;
        if skipped {
            if let Some(ticker) = self.dal.time_ticker().get(id).await? {
                self.on_member_settled(id, ticker.parent_id, UniversalTimestamp::now())
                    .await?;
            }
        }
        Ok(skipped)
    }
}

fn validate_ticker(ticker: &NewTimeTicker) -> Result<(), RegistrationError> {
    if ticker.function.trim().is_empty() {
        return Err(RegistrationError::EmptyFunction);
    }
    if ticker.retries < 0 {
        return Err(ValidationError::InvalidRetryIntervals(format!(
            "retries must not be negative (got {})",
            ticker.retries
        ))
        .into());
    }
    Ok(())
}
