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

use crate::fixtures::{counting_handler, TestFixture};
use diesel::prelude::*;
use std::collections::HashSet;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use tickerd::{
    InMemoryTransport, NewOutboxMessage, NewTimeTicker, SchedulerError, TickerEvent, TickerStatus,
    UniversalTimestamp, ValidationError,
};

async fn create_orders_table(scheduler: &tickerd::TickerScheduler) {
    scheduler
        .commit_with(
            |conn| {
                diesel::sql_query(
                    "CREATE TABLE IF NOT EXISTS orders (id INTEGER PRIMARY KEY, paid INTEGER NOT NULL)",
                )
                .execute(conn)?;
                Ok(())
            },
            Vec::new(),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_state_change_and_messages_commit_together() {
    let fixture = TestFixture::new().await;
    let transport = InMemoryTransport::new();
    let config = TestFixture::config("node-a").build().unwrap();
    let scheduler = fixture
        .scheduler_with_transport(config, Arc::new(transport.clone()))
        .await;
    create_orders_table(&scheduler).await;

    let (rows, outbox_id) = scheduler
        .commit_with(
            |conn| Ok(diesel::sql_query("INSERT INTO orders (id, paid) VALUES (1, 1)").execute(conn)?),
            vec![
                NewOutboxMessage::new("queue:orders", "OrderPaid", "1"),
                NewOutboxMessage::new("queue:orders", "ReceiptRequested", "1"),
            ],
        )
        .await
        .unwrap();
    assert_eq!(rows, 1);
    let outbox_id = outbox_id.expect("messages were staged");
    assert_eq!(fixture.dal().outbox().messages_for(outbox_id).await.unwrap().len(), 2);

    let report = scheduler.relay_once(UniversalTimestamp::now()).await.unwrap();
    assert_eq!(report.published, 2);
    assert_eq!(report.completed, 1);

    let types: Vec<String> = transport
        .published_to("queue:orders")
        .into_iter()
        .map(|m| m.message_type)
        .collect();
    assert_eq!(types, vec!["OrderPaid".to_string(), "ReceiptRequested".to_string()]);

    // A delivered outbox is not published again
    let report = scheduler.relay_once(UniversalTimestamp::now()).await.unwrap();
    assert_eq!(report.published, 0);
    assert_eq!(transport.published().len(), 2);
}

#[tokio::test]
async fn test_rolled_back_change_stages_nothing() {
    let fixture = TestFixture::new().await;
    let scheduler = fixture.default_scheduler("node-a").await;
    create_orders_table(&scheduler).await;

    let err = scheduler
        .commit_with(
            |conn| {
                diesel::sql_query("INSERT INTO orders (id, paid) VALUES (7, 0)").execute(conn)?;
                Err::<(), _>(ValidationError::Database(
                    diesel::result::Error::RollbackTransaction,
                ))
            },
            vec![NewOutboxMessage::new("queue:orders", "OrderPaid", "7")],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Validation(_)));
    assert_eq!(fixture.dal().outbox().count_undelivered().await.unwrap(), 0);

    // The insert was rolled back with the messages, so id 7 is free
    let (rows, _) = scheduler
        .commit_with(
            |conn| Ok(diesel::sql_query("INSERT INTO orders (id, paid) VALUES (7, 1)").execute(conn)?),
            Vec::new(),
        )
        .await
        .unwrap();
    assert_eq!(rows, 1);
}

#[tokio::test]
async fn test_outcomes_publish_lifecycle_events() {
    let fixture = TestFixture::new().await;
    let transport = InMemoryTransport::new();
    let config = TestFixture::config("node-a")
        .notification_address(Some("queue:ticker-events".to_string()))
        .build()
        .unwrap();
    let scheduler = fixture
        .scheduler_with_transport(config, Arc::new(transport.clone()))
        .await;
    counting_handler(&scheduler, "job", Arc::new(AtomicUsize::new(0)));

    let ticker = scheduler
        .schedule_time(NewTimeTicker::new("job"))
        .await
        .unwrap()
        .into_inner();
    scheduler.dispatch_once(UniversalTimestamp::now()).await.unwrap();
    scheduler.relay_once(UniversalTimestamp::now()).await.unwrap();

    let published = transport.published_to("queue:ticker-events");
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].correlation_id, Some(ticker.id));
    let event: TickerEvent = serde_json::from_str(&published[0].body).unwrap();
    assert_eq!(event.ticker_id, ticker.id);
    assert_eq!(event.status, TickerStatus::Executed);
}

#[tokio::test]
async fn test_competing_relays_publish_each_message_once() {
    let fixture = TestFixture::new().await;
    let transport = InMemoryTransport::new();
    let relay_a = fixture
        .scheduler_with_transport(
            TestFixture::config("relay-a").build().unwrap(),
            Arc::new(transport.clone()),
        )
        .await;
    let relay_b = fixture
        .scheduler_with_transport(
            TestFixture::config("relay-b").build().unwrap(),
            Arc::new(transport.clone()),
        )
        .await;

    for i in 0..5 {
        fixture
            .dal()
            .outbox()
            .stage(vec![
                NewOutboxMessage::new("queue:x", "A", format!("{}-1", i)),
                NewOutboxMessage::new("queue:x", "B", format!("{}-2", i)),
            ])
            .await
            .unwrap();
    }

    let now = UniversalTimestamp::now();
    let (a, b) = tokio::join!(relay_a.relay_once(now), relay_b.relay_once(now));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.completed + b.completed, 5);

    let published = transport.published();
    assert_eq!(published.len(), 10);
    let unique: HashSet<_> = published.iter().map(|m| m.message_id).collect();
    assert_eq!(unique.len(), 10);

    // Within each outbox the order is preserved
    for i in 0..5 {
        let bodies: Vec<&str> = published
            .iter()
            .filter(|m| m.body.starts_with(&format!("{}-", i)))
            .map(|m| m.body.as_str())
            .collect();
        assert_eq!(bodies, vec![format!("{}-1", i), format!("{}-2", i)]);
    }
}
