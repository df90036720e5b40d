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
use tickerd::{
    HandlerError, NewCronTicker, NewTimeTicker, TickerContext, TickerStatus, UniversalTimestamp,
};

fn seconds_from(ts: UniversalTimestamp, seconds: i64) -> UniversalTimestamp {
    UniversalTimestamp(ts.0 + chrono::Duration::seconds(seconds))
}

fn always_failing(scheduler: &tickerd::TickerScheduler, name: &str, calls: Arc<AtomicUsize>) {
    scheduler
        .registry()
        .register_fn(name, move |_ctx: TickerContext| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(HandlerError::retryable("upstream unavailable"))
            }
        });
}

#[tokio::test]
async fn test_retry_intervals_then_failure() {
    let fixture = TestFixture::new().await;
    let scheduler = fixture.default_scheduler("node-a").await;
    let calls = Arc::new(AtomicUsize::new(0));
    always_failing(&scheduler, "flaky", calls.clone());

    let ticker = scheduler
        .schedule_time(NewTimeTicker::new("flaky").with_retries(2, vec![5, 15]))
        .await
        .unwrap()
        .into_inner();

    // First attempt fails: retry 1 is scheduled 5s after the failure
    let start = UniversalTimestamp::now();
    scheduler.dispatch_once(start).await.unwrap();
    let after_first = scheduler.get_time_ticker(ticker.id).await.unwrap().unwrap();
    assert_eq!(after_first.status, TickerStatus::Idle);
    assert_eq!(after_first.retry_count, 1);
    assert_eq!(
        after_first.execution_time.unwrap().0 - after_first.updated_at.0,
        chrono::Duration::seconds(5)
    );
    assert_eq!(
        after_first.exception_message.as_deref(),
        Some("upstream unavailable")
    );

    // Not yet due
    let summary = scheduler.dispatch_once(seconds_from(start, 1)).await.unwrap();
    assert_eq!(summary.leased, 0);

    // Second attempt fails: retry 2 follows 15s later
    scheduler.dispatch_once(seconds_from(start, 10)).await.unwrap();
    let after_second = scheduler.get_time_ticker(ticker.id).await.unwrap().unwrap();
    assert_eq!(after_second.status, TickerStatus::Idle);
    assert_eq!(after_second.retry_count, 2);
    assert_eq!(
        after_second.execution_time.unwrap().0 - after_second.updated_at.0,
        chrono::Duration::seconds(15)
    );

    // Third attempt exhausts the retries
    scheduler.dispatch_once(seconds_from(start, 60)).await.unwrap();
    let failed = scheduler.get_time_ticker(ticker.id).await.unwrap().unwrap();
    assert_eq!(failed.status, TickerStatus::Failed);
    assert_eq!(failed.retry_count, 2);
    assert!(failed.executed_at.is_some());
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // Terminal rows are never picked up again
    let summary = scheduler.dispatch_once(seconds_from(start, 600)).await.unwrap();
    assert_eq!(summary.leased, 0);
}

#[tokio::test]
async fn test_last_interval_is_reused() {
    let fixture = TestFixture::new().await;
    let scheduler = fixture.default_scheduler("node-a").await;
    let calls = Arc::new(AtomicUsize::new(0));
    always_failing(&scheduler, "flaky", calls.clone());

    let ticker = scheduler
        .schedule_time(NewTimeTicker::new("flaky").with_retries(3, vec![7]))
        .await
        .unwrap()
        .into_inner();

    let start = UniversalTimestamp::now();
    scheduler.dispatch_once(start).await.unwrap();
    scheduler.dispatch_once(seconds_from(start, 30)).await.unwrap();

    let current = scheduler.get_time_ticker(ticker.id).await.unwrap().unwrap();
    assert_eq!(current.retry_count, 2);
    assert_eq!(
        current.execution_time.unwrap().0 - current.updated_at.0,
        chrono::Duration::seconds(7)
    );
}

#[tokio::test]
async fn test_cron_occurrence_retries_in_place() {
    let fixture = TestFixture::new().await;
    let scheduler = fixture.default_scheduler("node-a").await;
    let calls = Arc::new(AtomicUsize::new(0));
    always_failing(&scheduler, "nightly", calls.clone());

    let ticker = scheduler
        .register_cron(NewCronTicker::new("0 0 3 * * *", "nightly").with_retries(1, vec![30]))
        .await
        .unwrap()
        .into_inner();
    let occurrence = scheduler.list_occurrences(ticker.id, None, 1).await.unwrap()[0].clone();

    let slot = occurrence.execution_time;
    scheduler.dispatch_once(seconds_from(slot, 1)).await.unwrap();

    let retrying = scheduler.get_occurrence(occurrence.id).await.unwrap().unwrap();
    assert_eq!(retrying.status, TickerStatus::Idle);
    assert_eq!(retrying.retry_count, 1);
    assert_ne!(retrying.execution_time, slot);
    assert_eq!(
        retrying.exception_message.as_deref(),
        Some("upstream unavailable")
    );
}

#[tokio::test]
async fn test_minutely_cron_exhausts_retries_and_next_slot_stays_pending() {
    let fixture = TestFixture::new().await;
    let scheduler = fixture.default_scheduler("node-a").await;
    let calls = Arc::new(AtomicUsize::new(0));
    always_failing(&scheduler, "sync", calls.clone());

    let ticker = scheduler
        .register_cron(NewCronTicker::new("0 * * * * *", "sync").with_retries(2, vec![5, 15]))
        .await
        .unwrap()
        .into_inner();
    let occurrence = scheduler.list_occurrences(ticker.id, None, 1).await.unwrap()[0].clone();
    let slot = occurrence.execution_time;

    // Slot attempt fails: retry 1 lands 5s after the failure
    scheduler.dispatch_once(seconds_from(slot, 1)).await.unwrap();
    let first = scheduler.get_occurrence(occurrence.id).await.unwrap().unwrap();
    assert_eq!(first.status, TickerStatus::Idle);
    assert_eq!(first.retry_count, 1);
    assert_eq!(
        first.execution_time.0 - first.updated_at.0,
        chrono::Duration::seconds(5)
    );

    // Retry 1 fails: retry 2 lands 15s later
    scheduler.dispatch_once(seconds_from(slot, 10)).await.unwrap();
    let second = scheduler.get_occurrence(occurrence.id).await.unwrap().unwrap();
    assert_eq!(second.status, TickerStatus::Idle);
    assert_eq!(second.retry_count, 2);
    assert_eq!(
        second.execution_time.0 - second.updated_at.0,
        chrono::Duration::seconds(15)
    );

    // Retry 2 fails: retries are exhausted
    scheduler.dispatch_once(seconds_from(slot, 30)).await.unwrap();
    let failed = scheduler.get_occurrence(occurrence.id).await.unwrap().unwrap();
    assert_eq!(failed.status, TickerStatus::Failed);
    assert_eq!(failed.retry_count, 2);
    assert_eq!(failed.exception_message.as_deref(), Some("upstream unavailable"));
    assert!(failed.executed_at.is_some());
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // The following slot is untouched by the failure
    let pending = scheduler
        .list_occurrences(ticker.id, Some(TickerStatus::Idle), 10)
        .await
        .unwrap();
    let next = pending
        .iter()
        .find(|o| o.execution_time == seconds_from(slot, 60))
        .expect("next minute is materialized");
    assert_eq!(next.retry_count, 0);
    assert!(next.exception_message.is_none());
}
