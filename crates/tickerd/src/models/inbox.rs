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

//! Consumer-side deduplication record.

use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use serde::{Deserialize, Serialize};

/// One row per `(message_id, consumer_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxState {
    pub id: i64,
    pub message_id: UniversalUuid,
    pub consumer_id: String,
    pub lock_id: Option<String>,
    pub locked_at: Option<UniversalTimestamp>,
    pub version: i32,
    pub received: UniversalTimestamp,
    /// How many times the transport has handed this message to the consumer
    pub receive_count: i32,
    pub expiration_time: Option<UniversalTimestamp>,
    pub consumed: Option<UniversalTimestamp>,
    pub delivered: Option<UniversalTimestamp>,
}

impl InboxState {
    pub fn is_consumed(&self) -> bool {
        self.consumed.is_some()
    }
}
