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

//! Domain types.
//!
//! These are API-level types; SQLite row structs live in
//! [`crate::dal::models`] and are converted at the DAL boundary.

pub mod cron_occurrence;
pub mod cron_ticker;
pub mod event;
pub mod execution;
pub mod inbox;
pub mod outbox;
pub mod status;
pub mod time_ticker;

pub use cron_occurrence::CronTickerOccurrence;
pub use cron_ticker::{CronTicker, CronTickerUpdate, NewCronTicker};
pub use event::{TickerEvent, TICKER_EVENT_TYPE};
pub use execution::{AttemptOutcome, DueTicker, Lease, LeaseOutcome, RecordResult, StaleLease};
pub use inbox::InboxState;
pub use outbox::{NewOutboxMessage, OutboxLock, OutboxMessage, OutboxState};
pub use status::{ConditionResolution, RunCondition, TickerKind, TickerStatus};
pub use time_ticker::{BatchResolution, NewBatchChild, NewTimeTicker, TimeTicker, TimeTickerBatch};

/// Result of an idempotent registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome<T> {
    /// A new definition was stored
    Created(T),
    /// An identical definition already existed
    Existing(T),
    /// A definition with the same init identifier was changed in place
    Updated(T),
}

impl<T> RegistrationOutcome<T> {
    pub fn into_inner(self) -> T {
        match self {
            RegistrationOutcome::Created(t)
            | RegistrationOutcome::Existing(t)
            | RegistrationOutcome::Updated(t) => t,
        }
    }

    pub fn inner(&self) -> &T {
        match self {
            RegistrationOutcome::Created(t)
            | RegistrationOutcome::Existing(t)
            | RegistrationOutcome::Updated(t) => t,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, RegistrationOutcome::Created(_))
    }
}

/// Result of inserting an occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome<T> {
    Inserted(T),
    /// The unique key already existed
    AlreadyScheduled,
}
