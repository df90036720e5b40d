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

//! Data Access Layer
//!
//! Every read and write against the ticker store goes through the accessors
//! on [`DAL`]. Each accessor returns a short-lived borrowing handle:
//!
//! ```rust,ignore
//! let dal = DAL::new(database);
//! let ticker = dal.cron_ticker().get(id).await?;
//! let due = dal.execution().due(now, &functions, 10).await?;
//! ```
//!
//! Writes that must be atomic with each other (an outcome plus its outbox
//! notification, a batch parent plus its children) run inside a single
//! `BEGIN IMMEDIATE` transaction on one pooled connection.

pub mod cron_occurrence;
pub mod cron_ticker;
pub mod execution;
pub mod inbox;
pub mod models;
pub mod outbox;
pub mod time_ticker;

use crate::database::Database;
use diesel::result::{DatabaseErrorKind, Error as DieselError};

pub use cron_occurrence::CronOccurrenceDAL;
pub use cron_ticker::CronTickerDAL;
pub use execution::ExecutionDAL;
pub use inbox::InboxDAL;
pub use outbox::OutboxDAL;
pub use time_ticker::TimeTickerDAL;

/// The main Data Access Layer struct.
#[derive(Clone, Debug)]
pub struct DAL {
    /// Shared connection pool
    pub database: Database,
}

impl DAL {
    pub fn new(database: Database) -> Self {
        DAL { database }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn cron_ticker(&self) -> CronTickerDAL {
        CronTickerDAL::new(self)
    }

    pub fn cron_occurrence(&self) -> CronOccurrenceDAL {
        CronOccurrenceDAL::new(self)
    }

    pub fn time_ticker(&self) -> TimeTickerDAL {
        TimeTickerDAL::new(self)
    }

    /// Leasing, reclaim and outcome recording across both ticker tables.
    pub fn execution(&self) -> ExecutionDAL {
        ExecutionDAL::new(self)
    }

    pub fn outbox(&self) -> OutboxDAL {
        OutboxDAL::new(self)
    }

    pub fn inbox(&self) -> InboxDAL {
        InboxDAL::new(self)
    }
}

/// Skip reason recorded when a reschedule collides with an existing row.
pub const SUPERSEDED_REASON: &str = "superseded by an existing schedule";

/// Skip reason recorded on unresolved children of a removed batch parent.
pub const PARENT_REMOVED_REASON: &str = "parent removed";

/// True for `UNIQUE` and primary-key violations.
pub(crate) fn is_unique_violation(err: &DieselError) -> bool {
    matches!(
        err,
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)
    )
}
