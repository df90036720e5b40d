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

//! Outbox relay.
//!
//! Each pass claims undelivered outboxes with a version-CAS lock and
//! publishes their messages in `sequence_number` order. The first transport
//! failure stops that outbox and releases the lock, so a later message is
//! never published ahead of an earlier one; the outbox then sits out
//! `retry_delay` before a relay offers it again. A crash between publish and
//! the delivered mark republishes the message on the next pass.
//!
//! Messages past their `expiration_time` are marked delivered without being
//! published. A message whose `enqueue_time` is still in the future holds
//! back the rest of its outbox until that time.

use super::transport::Transport;
use crate::dal::DAL;
use crate::database::universal_types::UniversalTimestamp;
use crate::dispatcher::{PollDistributor, WorkDistributor};
use crate::error::RelayError;
use crate::models::{OutboxLock, OutboxState};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Counters for one relay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayReport {
    /// Outboxes fully delivered
    pub completed: usize,
    pub published: usize,
    /// Messages dropped because they expired before publication
    pub expired: usize,
    /// Outboxes stopped by a transport failure
    pub failed: usize,
    /// Outboxes held back by a future `enqueue_time`
    pub deferred: usize,
    /// Outboxes another relay claimed first
    pub contended: usize,
}

enum OutboxResult {
    Completed,
    Failed,
    Deferred,
    LockLost,
}

#[derive(Clone)]
pub struct OutboxRelay {
    dal: DAL,
    transport: Arc<dyn Transport>,
    lock_id: String,
    batch_size: usize,
    lock_timeout: Duration,
    retry_delay: Duration,
}

impl OutboxRelay {
    pub fn new(
        dal: DAL,
        transport: Arc<dyn Transport>,
        lock_id: impl Into<String>,
        batch_size: usize,
        lock_timeout: Duration,
        retry_delay: Duration,
    ) -> Self {
        Self {
            dal,
            transport,
            lock_id: lock_id.into(),
            batch_size: batch_size.max(1),
            lock_timeout,
            retry_delay,
        }
    }

    /// Claims and drains up to `batch_size` outboxes.
    pub async fn run_once(&self, now: UniversalTimestamp) -> Result<RelayReport, RelayError> {
        let cutoff = chrono::Duration::from_std(self.lock_timeout)
            .ok()
            .and_then(|d| now.into_inner().checked_sub_signed(d))
            .map(UniversalTimestamp)
            .unwrap_or(now);

        let pending = self
            .dal
            .outbox()
            .pending(now, cutoff, self.batch_size as i64)
            .await?;
        let mut report = RelayReport::default();

        for state in pending {
            let Some(lock) = self
                .dal
                .outbox()
                .try_lock(state.outbox_id, state.version, &self.lock_id, now, cutoff)
                .await?
            else {
                debug!("Outbox {} claimed by another relay", state.outbox_id);
                report.contended += 1;
                continue;
            };

            match self.deliver(&state, &lock, now, &mut report).await? {
                OutboxResult::Completed => report.completed += 1,
                OutboxResult::Failed => report.failed += 1,
                OutboxResult::Deferred => report.deferred += 1,
                OutboxResult::LockLost => report.contended += 1,
            }
        }

        if report.published > 0 || report.failed > 0 {
            info!(
                "Relay pass: {} published, {} outbox(es) completed, {} failed",
                report.published, report.completed, report.failed
            );
        }
        Ok(report)
    }

    async fn deliver(
        &self,
        state: &OutboxState,
        lock: &OutboxLock,
        now: UniversalTimestamp,
        report: &mut RelayReport,
    ) -> Result<OutboxResult, RelayError> {
        let messages = self.dal.outbox().undelivered_messages(state.outbox_id).await?;

        for message in &messages {
            if message.expiration_time.is_some_and(|t| t < now) {
                debug!("Dropping expired message {}", message.message_id);
                if !self
                    .dal
                    .outbox()
                    .mark_message_delivered(lock, message.sequence_number, now)
                    .await?
                {
                    return Ok(OutboxResult::LockLost);
                }
                report.expired += 1;
                continue;
            }

            if let Some(enqueue_time) = message.enqueue_time.filter(|t| *t > now) {
                self.dal.outbox().defer(lock, enqueue_time).await?;
                return Ok(OutboxResult::Deferred);
            }

            if let Err(e) = self.transport.publish(message).await {
                counter!("tickerd_outbox_messages_failed_total").increment(1);
                warn!(
                    "Publishing message {} of outbox {} failed: {}",
                    message.message_id, state.outbox_id, e
                );
                let retry_at = chrono::Duration::from_std(self.retry_delay)
                    .ok()
                    .and_then(|d| now.into_inner().checked_add_signed(d))
                    .map(UniversalTimestamp)
                    .unwrap_or(now);
                self.dal.outbox().defer(lock, retry_at).await?;
                return Ok(OutboxResult::Failed);
            }

            counter!("tickerd_outbox_messages_published_total").increment(1);
            report.published += 1;
            if !self
                .dal
                .outbox()
                .mark_message_delivered(lock, message.sequence_number, now)
                .await?
            {
                warn!(
                    "Lost lock on outbox {} after publishing {}",
                    state.outbox_id, message.message_id
                );
                return Ok(OutboxResult::LockLost);
            }
        }

        if self.dal.outbox().complete(lock, now).await? {
            Ok(OutboxResult::Completed)
        } else {
            Ok(OutboxResult::LockLost)
        }
    }

    /// Relay loop; returns when `shutdown` fires.
    pub async fn run(
        &self,
        distributor: PollDistributor,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), RelayError> {
        info!("Outbox relay {} started", self.lock_id);
        loop {
            if let Err(e) = self.run_once(UniversalTimestamp::now()).await {
                error!("Relay pass failed: {}", e);
            }

            tokio::select! {
                _ = distributor.wait_for_work() => {}
                _ = shutdown.recv() => {
                    info!("Outbox relay shutdown requested");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::messaging::InMemoryTransport;
    use crate::models::NewOutboxMessage;

    async fn setup() -> (tempfile::TempDir, DAL, InMemoryTransport, OutboxRelay) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::try_new(dir.path().join("relay.db").to_str().unwrap(), 2).unwrap();
        db.run_migrations().await.unwrap();
        let dal = DAL::new(db);
        let transport = InMemoryTransport::new();
        let relay = OutboxRelay::new(
            dal.clone(),
            Arc::new(transport.clone()),
            "relay-1",
            10,
            Duration::from_secs(60),
            Duration::ZERO,
        );
        (dir, dal, transport, relay)
    }

    #[tokio::test]
    async fn test_failure_preserves_order() {
        let (_dir, dal, transport, relay) = setup().await;
        let outbox_id = dal
            .outbox()
            .stage(vec![
                NewOutboxMessage::new("queue:a", "t", "first"),
                NewOutboxMessage::new("queue:a", "t", "second"),
            ])
            .await
            .unwrap()
            .unwrap();

        transport.fail_next(1);
        let report = relay.run_once(UniversalTimestamp::now()).await.unwrap();
        assert_eq!(report.failed, 1);
        assert!(transport.published().is_empty());

        let report = relay.run_once(UniversalTimestamp::now()).await.unwrap();
        assert_eq!(report.completed, 1);
        let bodies: Vec<String> = transport.published().into_iter().map(|m| m.body).collect();
        assert_eq!(bodies, vec!["first".to_string(), "second".to_string()]);

        let state = dal.outbox().get_state(outbox_id).await.unwrap().unwrap();
        assert!(state.delivered.is_some());
        assert!(state.lock_id.is_none());
    }

    #[tokio::test]
    async fn test_expired_message_is_dropped() {
        let (_dir, dal, transport, relay) = setup().await;
        let past = UniversalTimestamp(chrono::Utc::now() - chrono::Duration::minutes(5));
        dal.outbox()
            .stage(vec![
                NewOutboxMessage::new("queue:a", "t", "stale").expires_at(past),
                NewOutboxMessage::new("queue:a", "t", "fresh"),
            ])
            .await
            .unwrap();

        let report = relay.run_once(UniversalTimestamp::now()).await.unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.published, 1);
        assert_eq!(transport.published()[0].body, "fresh");
    }

    #[tokio::test]
    async fn test_future_enqueue_time_defers_outbox() {
        let (_dir, dal, transport, relay) = setup().await;
        let later = UniversalTimestamp(chrono::Utc::now() + chrono::Duration::hours(1));
        dal.outbox()
            .stage(vec![NewOutboxMessage::new("queue:a", "t", "later").not_before(later)])
            .await
            .unwrap();

        let report = relay.run_once(UniversalTimestamp::now()).await.unwrap();
        assert_eq!(report.deferred, 1);
        assert!(transport.published().is_empty());

        let report = relay
            .run_once(UniversalTimestamp(later.0 + chrono::Duration::seconds(1)))
            .await
            .unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(transport.published().len(), 1);
    }

    #[tokio::test]
    async fn test_deferred_outbox_does_not_starve_ready_ones() {
        let (_dir, dal, transport, _) = setup().await;
        let relay = OutboxRelay::new(
            dal.clone(),
            Arc::new(transport.clone()),
            "relay-1",
            1,
            Duration::from_secs(60),
            Duration::ZERO,
        );
        let later = UniversalTimestamp(chrono::Utc::now() + chrono::Duration::hours(1));
        dal.outbox()
            .stage(vec![NewOutboxMessage::new("queue:a", "t", "later").not_before(later)])
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        dal.outbox()
            .stage(vec![NewOutboxMessage::new("queue:a", "t", "now")])
            .await
            .unwrap();

        let first = relay.run_once(UniversalTimestamp::now()).await.unwrap();
        assert_eq!(first.deferred, 1);

        let second = relay.run_once(UniversalTimestamp::now()).await.unwrap();
        assert_eq!(second.completed, 1);
        let bodies: Vec<String> = transport.published().into_iter().map(|m| m.body).collect();
        assert_eq!(bodies, vec!["now".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_outbox_backs_off() {
        let (_dir, dal, transport, _) = setup().await;
        let relay = OutboxRelay::new(
            dal.clone(),
            Arc::new(transport.clone()),
            "relay-1",
            1,
            Duration::from_secs(60),
            Duration::from_secs(30),
        );
        dal.outbox()
            .stage(vec![NewOutboxMessage::new("queue:a", "t", "first")])
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        dal.outbox()
            .stage(vec![NewOutboxMessage::new("queue:a", "t", "second")])
            .await
            .unwrap();

        let now = UniversalTimestamp::now();
        transport.fail_next(1);
        let report = relay.run_once(now).await.unwrap();
        assert_eq!(report.failed, 1);

        // The failing outbox sits out its delay; the next one is delivered
        let report = relay.run_once(now).await.unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(transport.published()[0].body, "second");

        let report = relay
            .run_once(UniversalTimestamp(now.0 + chrono::Duration::seconds(31)))
            .await
            .unwrap();
        assert_eq!(report.completed, 1);
        let bodies: Vec<String> = transport.published().into_iter().map(|m| m.body).collect();
        assert_eq!(bodies, vec!["second".to_string(), "first".to_string()]);
    }
}
