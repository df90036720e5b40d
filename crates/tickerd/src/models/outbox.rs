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

//! Transactional outbox model.
//!
//! One [`OutboxState`] exists per committed business transaction; its
//! [`OutboxMessage`]s are published in `sequence_number` order.

use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use serde::{Deserialize, Serialize};

/// Per-transaction outbox record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxState {
    pub outbox_id: UniversalUuid,
    /// Relay currently delivering this outbox
    pub lock_id: Option<String>,
    pub locked_at: Option<UniversalTimestamp>,
    pub version: i32,
    pub created: UniversalTimestamp,
    pub delivered: Option<UniversalTimestamp>,
    pub last_sequence_number: Option<i64>,
    /// Not offered to relays before this time
    pub next_attempt: Option<UniversalTimestamp>,
}

/// A relay's claim on one outbox, as written by the lock CAS.
///
/// Every delivery write for the outbox is conditional on both fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxLock {
    pub outbox_id: UniversalUuid,
    pub lock_id: String,
    pub version: i32,
}

/// A staged outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub sequence_number: i64,
    pub outbox_id: UniversalUuid,
    pub message_id: UniversalUuid,
    pub message_type: String,
    pub content_type: String,
    pub body: String,
    pub headers: Option<serde_json::Value>,
    pub conversation_id: Option<UniversalUuid>,
    pub correlation_id: Option<UniversalUuid>,
    pub initiator_id: Option<UniversalUuid>,
    pub request_id: Option<UniversalUuid>,
    pub source_address: Option<String>,
    pub destination_address: String,
    pub response_address: Option<String>,
    pub fault_address: Option<String>,
    /// Not published before this instant
    pub enqueue_time: Option<UniversalTimestamp>,
    /// Discarded instead of published after this instant
    pub expiration_time: Option<UniversalTimestamp>,
    pub sent_time: UniversalTimestamp,
    pub delivered: Option<UniversalTimestamp>,
}

/// A message to stage alongside a state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOutboxMessage {
    pub message_id: UniversalUuid,
    pub message_type: String,
    pub content_type: String,
    pub body: String,
    pub headers: Option<serde_json::Value>,
    pub conversation_id: Option<UniversalUuid>,
    pub correlation_id: Option<UniversalUuid>,
    pub initiator_id: Option<UniversalUuid>,
    pub request_id: Option<UniversalUuid>,
    pub source_address: Option<String>,
    pub destination_address: String,
    pub response_address: Option<String>,
    pub fault_address: Option<String>,
    pub enqueue_time: Option<UniversalTimestamp>,
    pub expiration_time: Option<UniversalTimestamp>,
}

impl NewOutboxMessage {
    /// A plain-text message with a fresh message id.
    pub fn new(
        destination_address: impl Into<String>,
        message_type: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            message_id: UniversalUuid::new_v4(),
            message_type: message_type.into(),
            content_type: "text/plain".to_string(),
            body: body.into(),
            headers: None,
            conversation_id: None,
            correlation_id: None,
            initiator_id: None,
            request_id: None,
            source_address: None,
            destination_address: destination_address.into(),
            response_address: None,
            fault_address: None,
            enqueue_time: None,
            expiration_time: None,
        }
    }

    /// A JSON message serialized from `payload`.
    pub fn json<T: Serialize>(
        destination_address: impl Into<String>,
        message_type: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_string(payload)?;
        let mut message = Self::new(destination_address, message_type, body);
        message.content_type = "application/json".to_string();
        Ok(message)
    }

    pub fn with_correlation_id(mut self, id: UniversalUuid) -> Self {
        self.correlation_id = Some(id);
        self
    }

    pub fn with_conversation_id(mut self, id: UniversalUuid) -> Self {
        self.conversation_id = Some(id);
        self
    }

    pub fn with_source_address(mut self, address: impl Into<String>) -> Self {
        self.source_address = Some(address.into());
        self
    }

    pub fn with_headers(mut self, headers: serde_json::Value) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn not_before(mut self, enqueue_time: impl Into<UniversalTimestamp>) -> Self {
        self.enqueue_time = Some(enqueue_time.into());
        self
    }

    pub fn expires_at(mut self, expiration_time: impl Into<UniversalTimestamp>) -> Self {
        self.expiration_time = Some(expiration_time.into());
        self
    }
}
