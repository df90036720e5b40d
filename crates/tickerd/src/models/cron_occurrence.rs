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

//! One concrete firing of a recurring job.

use super::status::TickerStatus;
use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use serde::{Deserialize, Serialize};

/// A scheduled firing of a [`CronTicker`](super::cron_ticker::CronTicker).
///
/// `(cron_ticker_id, execution_time)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronTickerOccurrence {
    pub id: UniversalUuid,
    pub cron_ticker_id: UniversalUuid,
    pub status: TickerStatus,
    /// Worker holding the lease while `Locked`
    pub lock_holder: Option<String>,
    pub execution_time: UniversalTimestamp,
    pub locked_at: Option<UniversalTimestamp>,
    pub executed_at: Option<UniversalTimestamp>,
    pub skipped_reason: Option<String>,
    pub exception_message: Option<String>,
    /// Handler wall time of the last attempt, milliseconds
    pub elapsed_time: i64,
    pub retry_count: i32,
    /// Row version for compare-and-swap writes
    pub version: i32,
    pub created_at: UniversalTimestamp,
    pub updated_at: UniversalTimestamp,
}
