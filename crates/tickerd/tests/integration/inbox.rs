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

use crate::fixtures::TestFixture;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tickerd::models::InboxState;
use tickerd::{
    HandlerError, InMemoryTransport, InboxConsumer, InboxOutcome, NewOutboxMessage,
    UniversalTimestamp, UniversalUuid,
};

/// Consumer that counts invocations and emits a reply per message.
struct Billing {
    runs: AtomicUsize,
}

#[async_trait::async_trait]
impl InboxConsumer for Billing {
    async fn consume(&self, inbox: &InboxState) -> Result<Vec<NewOutboxMessage>, HandlerError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(vec![NewOutboxMessage::new(
            "queue:billing-replies",
            "Invoiced",
            inbox.message_id.to_string(),
        )
        .with_correlation_id(inbox.message_id)])
    }
}

#[tokio::test]
async fn test_redelivery_does_not_rerun_consumer() {
    let fixture = TestFixture::new().await;
    let transport = InMemoryTransport::new();
    let scheduler = fixture
        .scheduler_with_transport(
            TestFixture::config("node-a").build().unwrap(),
            Arc::new(transport.clone()),
        )
        .await;
    let consumer = Billing {
        runs: AtomicUsize::new(0),
    };
    let message_id = UniversalUuid::new_v4();

    for _ in 0..3 {
        scheduler
            .inbox()
            .process(message_id, "billing", None, &consumer)
            .await
            .unwrap();
    }
    assert_eq!(consumer.runs.load(Ordering::SeqCst), 1);

    let state = fixture
        .dal()
        .inbox()
        .get(message_id, "billing")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.receive_count, 3);
    assert!(state.is_consumed());

    // The reply committed with the consumed mark is relayed exactly once
    scheduler.relay_once(UniversalTimestamp::now()).await.unwrap();
    let replies = transport.published_to("queue:billing-replies");
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].correlation_id, Some(message_id));
}

#[tokio::test]
async fn test_concurrent_deliveries_consume_once() {
    let fixture = TestFixture::new().await;
    let node_a = fixture.default_scheduler("node-a").await;
    let node_b = fixture.default_scheduler("node-b").await;
    let consumer = Arc::new(Billing {
        runs: AtomicUsize::new(0),
    });
    let message_id = UniversalUuid::new_v4();

    let (a, b) = tokio::join!(
        node_a
            .inbox()
            .process(message_id, "billing", None, consumer.as_ref()),
        node_b
            .inbox()
            .process(message_id, "billing", None, consumer.as_ref())
    );
    let outcomes = [a.unwrap(), b.unwrap()];

    let consumed = outcomes
        .iter()
        .filter(|o| matches!(o, InboxOutcome::Consumed { .. }))
        .count();
    assert_eq!(consumed, 1);
    assert_eq!(consumer.runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_expired_inbox_rows_are_cleaned_up() {
    let fixture = TestFixture::new().await;
    let scheduler = fixture.default_scheduler("node-a").await;
    let consumer = Billing {
        runs: AtomicUsize::new(0),
    };

    let past = UniversalTimestamp(chrono::Utc::now() - chrono::Duration::minutes(1));
    let expired = UniversalUuid::new_v4();
    let live = UniversalUuid::new_v4();
    scheduler
        .inbox()
        .process(expired, "billing", Some(past), &consumer)
        .await
        .unwrap();
    scheduler
        .inbox()
        .process(live, "billing", None, &consumer)
        .await
        .unwrap();

    let removed = scheduler
        .inbox()
        .cleanup(UniversalTimestamp::now(), Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(fixture.dal().inbox().get(expired, "billing").await.unwrap().is_none());
    assert!(fixture.dal().inbox().get(live, "billing").await.unwrap().is_some());
}
