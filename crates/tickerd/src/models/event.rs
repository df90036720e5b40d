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

//! Lifecycle notification staged alongside each recorded outcome.

use super::outbox::NewOutboxMessage;
use super::status::{TickerKind, TickerStatus};
use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use serde::{Deserialize, Serialize};

/// `message_type` of staged lifecycle notifications.
pub const TICKER_EVENT_TYPE: &str = "tickerd.TickerEvent";

/// Body of a lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerEvent {
    pub kind: TickerKind,
    pub ticker_id: UniversalUuid,
    /// Owning definition for cron occurrences
    pub cron_ticker_id: Option<UniversalUuid>,
    pub function: String,
    /// Status after the outcome was applied
    pub status: TickerStatus,
    pub retry_count: i32,
    pub elapsed_ms: i64,
    pub next_execution_time: Option<UniversalTimestamp>,
    pub message: Option<String>,
    pub occurred_at: UniversalTimestamp,
}

impl TickerEvent {
    /// JSON outbox message addressed to `destination`, correlated by ticker id.
    pub fn to_outbox_message(
        &self,
        destination: &str,
    ) -> Result<NewOutboxMessage, serde_json::Error> {
        Ok(NewOutboxMessage::json(destination, TICKER_EVENT_TYPE, self)?
            .with_correlation_id(self.ticker_id)
            .with_source_address("tickerd"))
    }
}
