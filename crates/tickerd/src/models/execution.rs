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

//! Types passed between the due query, the lease step and outcome recording.

use super::status::TickerKind;
use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};

/// A row returned by the due query, flattened across both ticker tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueTicker {
    pub kind: TickerKind,
    pub id: UniversalUuid,
    /// Owning cron ticker for occurrences
    pub cron_ticker_id: Option<UniversalUuid>,
    /// Batch parent for time tickers
    pub parent_id: Option<UniversalUuid>,
    pub function: String,
    pub request: Vec<u8>,
    pub retries: i32,
    pub retry_intervals: Vec<u64>,
    pub retry_count: i32,
    pub version: i32,
    pub execution_time: UniversalTimestamp,
}

/// An exclusive claim on one row.
///
/// `version` is the row version written by the lease; every later write
/// for this attempt is conditional on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub kind: TickerKind,
    pub id: UniversalUuid,
    pub holder: String,
    pub version: i32,
    pub locked_at: UniversalTimestamp,
}

/// Result of a lease attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseOutcome {
    Granted(Lease),
    /// Another worker changed the row first
    Contended,
}

impl LeaseOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, LeaseOutcome::Granted(_))
    }
}

/// A `Locked` row whose lease is older than the lease timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleLease {
    pub kind: TickerKind,
    pub id: UniversalUuid,
    pub version: i32,
    pub lock_holder: Option<String>,
}

/// Terminal or retry outcome of one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Succeeded {
        elapsed_ms: i64,
    },
    RetryScheduled {
        elapsed_ms: i64,
        retry_count: i32,
        next_execution_time: UniversalTimestamp,
        message: String,
    },
    Failed {
        elapsed_ms: i64,
        message: String,
    },
}

/// What happened when an outcome was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordResult {
    Applied,
    /// The lease was lost (reclaimed or the row removed); nothing was written
    Fenced,
    /// The retry slot collided with an existing row; the row is now Skipped
    Superseded,
}
