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

//! Inbox deduplicator.
//!
//! Guards consumer logic against redelivery: consumer code runs at most once
//! per `(message_id, consumer_id)` once its result has committed. Messages
//! the consumer produces are staged in the same transaction that marks the
//! inbox row consumed.

use crate::dal::inbox::ConsumeResult;
use crate::dal::DAL;
use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use crate::error::{HandlerError, InboxError, ValidationError};
use crate::models::{InboxState, NewOutboxMessage};
use async_trait::async_trait;
use metrics::counter;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Consumer logic guarded by the inbox.
#[async_trait]
pub trait InboxConsumer: Send + Sync {
    /// Handles a message; returned messages are staged atomically with the
    /// consumed mark.
    async fn consume(&self, inbox: &InboxState) -> Result<Vec<NewOutboxMessage>, HandlerError>;
}

#[async_trait]
impl<F, Fut> InboxConsumer for F
where
    F: Fn(InboxState) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<NewOutboxMessage>, HandlerError>> + Send,
{
    async fn consume(&self, inbox: &InboxState) -> Result<Vec<NewOutboxMessage>, HandlerError> {
        (self)(inbox.clone()).await
    }
}

/// Result of [`InboxDeduplicator::process`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboxOutcome {
    /// Consumer ran and its result committed
    Consumed { outbox_id: Option<UniversalUuid> },
    /// Already consumed; consumer logic was not run
    Duplicate,
    /// Another consumer instance holds the inbox lock
    Busy,
}

#[derive(Clone)]
pub struct InboxDeduplicator {
    dal: DAL,
    lock_id: String,
    lock_timeout: Duration,
}

impl InboxDeduplicator {
    pub fn new(dal: DAL, lock_id: impl Into<String>, lock_timeout: Duration) -> Self {
        Self {
            dal,
            lock_id: lock_id.into(),
            lock_timeout,
        }
    }

    /// Records the delivery and runs `consumer` unless the message was
    /// already consumed by `consumer_id`.
    ///
    /// # Errors
    /// `InboxError::Consumer` when the consumer fails; the lock is released
    /// and a redelivery runs it again.
    pub async fn process<C>(
        &self,
        message_id: UniversalUuid,
        consumer_id: &str,
        expiration_time: Option<UniversalTimestamp>,
        consumer: &C,
    ) -> Result<InboxOutcome, InboxError>
    where
        C: InboxConsumer + ?Sized,
    {
        let now = UniversalTimestamp::now();
        let state = self
            .dal
            .inbox()
            .receive(message_id, consumer_id, expiration_time, now)
            .await?;

        if state.is_consumed() {
            counter!("tickerd_inbox_duplicates_total").increment(1);
            debug!(
                "Message {} already consumed by {} (receive #{})",
                message_id, consumer_id, state.receive_count
            );
            return Ok(InboxOutcome::Duplicate);
        }

        let cutoff = self.lock_cutoff(now);
        let Some(version) = self
            .dal
            .inbox()
            .try_lock(state.id, state.version, &self.lock_id, now, cutoff)
            .await?
        else {
            return self.classify_contention(message_id, consumer_id).await;
        };

        let produced = match consumer.consume(&state).await {
            Ok(produced) => produced,
            Err(e) => {
                warn!(
                    "Consumer {} failed on message {}: {}",
                    consumer_id, message_id, e
                );
                self.dal.inbox().release(state.id, &self.lock_id, version).await?;
                return Err(InboxError::Consumer(e));
            }
        };

        match self
            .dal
            .inbox()
            .consume_with(state.id, &self.lock_id, version, UniversalTimestamp::now(), produced)
            .await?
        {
            ConsumeResult::Consumed { outbox_id } => {
                info!("Message {} consumed by {}", message_id, consumer_id);
                Ok(InboxOutcome::Consumed { outbox_id })
            }
            ConsumeResult::LockLost => Err(InboxError::LockLost { message_id }),
        }
    }

    /// Records transport acknowledgement of a consumed message.
    pub async fn mark_delivered(
        &self,
        message_id: UniversalUuid,
        consumer_id: &str,
    ) -> Result<bool, ValidationError> {
        self.dal
            .inbox()
            .mark_delivered(message_id, consumer_id, UniversalTimestamp::now())
            .await
    }

    /// Deletes rows delivered longer than `retention` ago and expired rows.
    pub async fn cleanup(
        &self,
        now: UniversalTimestamp,
        retention: Duration,
    ) -> Result<usize, ValidationError> {
        let cutoff = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|d| now.into_inner().checked_sub_signed(d))
            .map(UniversalTimestamp)
            .unwrap_or(now);
        self.dal.inbox().delete_expired(now, cutoff).await
    }

    fn lock_cutoff(&self, now: UniversalTimestamp) -> UniversalTimestamp {
        chrono::Duration::from_std(self.lock_timeout)
            .ok()
            .and_then(|d| now.into_inner().checked_sub_signed(d))
            .map(UniversalTimestamp)
            .unwrap_or(now)
    }

    async fn classify_contention(
        &self,
        message_id: UniversalUuid,
        consumer_id: &str,
    ) -> Result<InboxOutcome, InboxError> {
        let current = self.dal.inbox().get(message_id, consumer_id).await?;
        if current.is_some_and(|s| s.is_consumed()) {
            counter!("tickerd_inbox_duplicates_total").increment(1);
            Ok(InboxOutcome::Duplicate)
        } else {
            debug!("Message {} is being consumed elsewhere", message_id);
            Ok(InboxOutcome::Busy)
        }
    }
}
