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

//! # Retry Policy
//!
//! Decides whether a failed attempt is re-attempted and when.
//!
//! The delay before retry `n` (zero-based) is `retry_intervals[n]`; once the
//! list runs out its last entry is reused, and an empty list falls back to
//! the configured default. A ticker with `retries = 2` and intervals
//! `[5, 15]` therefore runs at `t`, `t + 5s` and `t + 5s + 15s` before it is
//! marked Failed.

use crate::database::universal_types::UniversalTimestamp;
use crate::error::HandlerError;
use crate::models::{AttemptOutcome, DueTicker};
use std::time::Duration;

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry {
        /// Value `retry_count` takes after this decision
        retry_count: i32,
        delay: Duration,
        next_execution_time: UniversalTimestamp,
    },
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    default_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl RetryPolicy {
    pub fn new(default_interval: Duration) -> Self {
        Self { default_interval }
    }

    pub fn default_interval(&self) -> Duration {
        self.default_interval
    }

    /// Delay before the retry that follows `retry_count` earlier retries.
    pub fn interval(&self, intervals: &[u64], retry_count: i32) -> Duration {
        match intervals.last() {
            None => self.default_interval,
            Some(last) => {
                let index = usize::try_from(retry_count).unwrap_or(0);
                Duration::from_secs(*intervals.get(index).unwrap_or(last))
            }
        }
    }

    pub fn decide(
        &self,
        retries: i32,
        intervals: &[u64],
        retry_count: i32,
        error: &HandlerError,
        now: UniversalTimestamp,
    ) -> RetryDecision {
        if !error.is_retryable() || retry_count >= retries {
            return RetryDecision::Fail;
        }

        let delay = self.interval(intervals, retry_count);
        let offset = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let next = now
            .into_inner()
            .checked_add_signed(offset)
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC);

        RetryDecision::Retry {
            retry_count: retry_count + 1,
            delay,
            next_execution_time: UniversalTimestamp(next),
        }
    }

    /// Outcome to record for a failed attempt on `due`.
    pub fn outcome_for(
        &self,
        due: &DueTicker,
        error: &HandlerError,
        elapsed_ms: i64,
        now: UniversalTimestamp,
    ) -> AttemptOutcome {
        match self.decide(due.retries, &due.retry_intervals, due.retry_count, error, now) {
            RetryDecision::Retry {
                retry_count,
                next_execution_time,
                ..
            } => AttemptOutcome::RetryScheduled {
                elapsed_ms,
                retry_count,
                next_execution_time,
                message: error.message().to_string(),
            },
            RetryDecision::Fail => AttemptOutcome::Failed {
                elapsed_ms,
                message: error.message().to_string(),
            },
        }
    }
}
