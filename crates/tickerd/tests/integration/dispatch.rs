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
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tickerd::models::{AttemptOutcome, LeaseOutcome};
use tickerd::{
    HandlerError, NewTimeTicker, RecordResult, TickerContext, TickerStatus, UniversalTimestamp,
};

fn seconds_from(ts: UniversalTimestamp, seconds: i64) -> UniversalTimestamp {
    UniversalTimestamp(ts.0 + chrono::Duration::seconds(seconds))
}

#[tokio::test]
async fn test_competing_nodes_run_each_ticker_once() {
    let fixture = TestFixture::new().await;
    let node_a = fixture.default_scheduler("node-a").await;
    let node_b = fixture.default_scheduler("node-b").await;
    let calls = Arc::new(AtomicUsize::new(0));
    counting_handler(&node_a, "work", calls.clone());
    counting_handler(&node_b, "work", calls.clone());

    let mut ids = Vec::new();
    for i in 0..6 {
        let ticker = node_a
            .schedule_time(NewTimeTicker::new("work").with_request(format!("item-{}", i)))
            .await
            .unwrap()
            .into_inner();
        ids.push(ticker.id);
    }

    let now = UniversalTimestamp::now();
    let (a, b) = tokio::join!(node_a.dispatch_once(now), node_b.dispatch_once(now));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.leased + b.leased, 6);
    assert_eq!(calls.load(Ordering::SeqCst), 6);
    for id in ids {
        let ticker = node_a.get_time_ticker(id).await.unwrap().unwrap();
        assert_eq!(ticker.status, TickerStatus::Executed);
        assert!(ticker.lock_holder == Some("node-a".into()) || ticker.lock_holder == Some("node-b".into()));
    }
}

#[tokio::test]
async fn test_only_registered_functions_are_polled() {
    let fixture = TestFixture::new().await;
    let scheduler = fixture.default_scheduler("node-a").await;
    let calls = Arc::new(AtomicUsize::new(0));
    counting_handler(&scheduler, "known", calls.clone());

    let unknown = scheduler
        .schedule_time(NewTimeTicker::new("unknown"))
        .await
        .unwrap()
        .into_inner();
    scheduler
        .schedule_time(NewTimeTicker::new("known"))
        .await
        .unwrap();

    let summary = scheduler.dispatch_once(UniversalTimestamp::now()).await.unwrap();
    assert_eq!(summary.leased, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let untouched = scheduler.get_time_ticker(unknown.id).await.unwrap().unwrap();
    assert_eq!(untouched.status, TickerStatus::Idle);
}

#[tokio::test]
async fn test_future_tickers_wait_for_their_time() {
    let fixture = TestFixture::new().await;
    let scheduler = fixture.default_scheduler("node-a").await;
    let calls = Arc::new(AtomicUsize::new(0));
    counting_handler(&scheduler, "later", calls.clone());

    let at = seconds_from(UniversalTimestamp::now(), 60);
    scheduler
        .schedule_time(NewTimeTicker::new("later").at(at))
        .await
        .unwrap();

    let summary = scheduler.dispatch_once(UniversalTimestamp::now()).await.unwrap();
    assert_eq!(summary.leased, 0);

    let summary = scheduler.dispatch_once(seconds_from(at, 1)).await.unwrap();
    assert_eq!(summary.leased, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_lease_and_outcome_follow_the_cycle_clock() {
    use chrono::SubsecRound;

    let fixture = TestFixture::new().await;
    let scheduler = fixture.default_scheduler("node-a").await;
    let calls = Arc::new(AtomicUsize::new(0));
    counting_handler(&scheduler, "job", calls.clone());

    let ticker = scheduler
        .schedule_time(NewTimeTicker::new("job"))
        .await
        .unwrap()
        .into_inner();

    let cycle = UniversalTimestamp(chrono::Utc::now().trunc_subsecs(0) + chrono::Duration::hours(1));
    scheduler.dispatch_once(cycle).await.unwrap();

    let executed = scheduler.get_time_ticker(ticker.id).await.unwrap().unwrap();
    assert_eq!(executed.status, TickerStatus::Executed);
    assert_eq!(executed.locked_at, Some(cycle));
    let executed_at = executed.executed_at.unwrap();
    assert!(executed_at >= cycle);
    assert!(executed_at < seconds_from(cycle, 5));
    assert_eq!(executed.updated_at, executed_at);
}

#[tokio::test]
async fn test_stale_lease_is_reclaimed_and_old_holder_fenced() {
    let fixture = TestFixture::new().await;
    let dal = fixture.dal();
    let config = TestFixture::config("survivor")
        .handler_timeout(Duration::from_secs(1))
        .lease_timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    let scheduler = fixture.scheduler(config).await;
    let calls = Arc::new(AtomicUsize::new(0));
    counting_handler(&scheduler, "job", calls.clone());

    let ticker = scheduler
        .schedule_time(NewTimeTicker::new("job"))
        .await
        .unwrap()
        .into_inner();

    // A node leases the row and then disappears
    let now = UniversalTimestamp::now();
    let due = dal.execution().due(now, &["job".to_string()], 10).await.unwrap();
    assert_eq!(due.len(), 1);
    let LeaseOutcome::Granted(dead_lease) = dal
        .execution()
        .try_lease(&due[0], "crashed-node", now)
        .await
        .unwrap()
    else {
        panic!("expected lease");
    };

    // Within the lease timeout nothing is reclaimed
    let summary = scheduler.dispatch_once(UniversalTimestamp::now()).await.unwrap();
    assert_eq!(summary.reclaimed, 0);
    assert_eq!(summary.leased, 0);

    let summary = scheduler.dispatch_once(seconds_from(now, 10)).await.unwrap();
    assert_eq!(summary.reclaimed, 1);
    assert_eq!(summary.leased, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let executed = scheduler.get_time_ticker(ticker.id).await.unwrap().unwrap();
    assert_eq!(executed.status, TickerStatus::Executed);
    assert_eq!(executed.retry_count, 0);
    assert_eq!(executed.lock_holder.as_deref(), Some("survivor"));

    // The crashed node's late outcome is discarded
    let late = dal
        .execution()
        .record(
            &due[0],
            &dead_lease,
            AttemptOutcome::Failed {
                elapsed_ms: 1,
                message: "late".to_string(),
            },
            UniversalTimestamp::now(),
            None,
        )
        .await
        .unwrap();
    assert_eq!(late, RecordResult::Fenced);
    let unchanged = scheduler.get_time_ticker(ticker.id).await.unwrap().unwrap();
    assert_eq!(unchanged.status, TickerStatus::Executed);
}

#[tokio::test]
async fn test_handler_timeout_counts_as_retryable_failure() {
    let fixture = TestFixture::new().await;
    let config = TestFixture::config("node-a")
        .handler_timeout(Duration::from_millis(100))
        .lease_timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    let scheduler = fixture.scheduler(config).await;
    scheduler
        .registry()
        .register_fn("slow", |_ctx: TickerContext| async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok::<(), HandlerError>(())
        });

    let ticker = scheduler
        .schedule_time(NewTimeTicker::new("slow").with_retries(1, vec![60]))
        .await
        .unwrap()
        .into_inner();

    scheduler.dispatch_once(UniversalTimestamp::now()).await.unwrap();
    let after = scheduler.get_time_ticker(ticker.id).await.unwrap().unwrap();
    assert_eq!(after.status, TickerStatus::Idle);
    assert_eq!(after.retry_count, 1);
    assert!(after
        .exception_message
        .as_deref()
        .is_some_and(|m| m.contains("timed out")));
}

#[tokio::test]
async fn test_handler_panic_is_contained() {
    let fixture = TestFixture::new().await;
    let scheduler = fixture.default_scheduler("node-a").await;
    scheduler
        .registry()
        .register_fn("boom", |_ctx: TickerContext| async {
            if true {
                panic!("handler bug");
            }
            Ok::<(), HandlerError>(())
        });

    let ticker = scheduler
        .schedule_time(NewTimeTicker::new("boom"))
        .await
        .unwrap()
        .into_inner();

    let summary = scheduler.dispatch_once(UniversalTimestamp::now()).await.unwrap();
    assert_eq!(summary.outcomes, vec![(ticker.id, RecordResult::Applied)]);

    let failed = scheduler.get_time_ticker(ticker.id).await.unwrap().unwrap();
    assert_eq!(failed.status, TickerStatus::Failed);
    assert!(failed
        .exception_message
        .as_deref()
        .is_some_and(|m| m.contains("panicked")));
}

#[tokio::test]
async fn test_terminal_error_skips_retries() {
    let fixture = TestFixture::new().await;
    let scheduler = fixture.default_scheduler("node-a").await;
    scheduler
        .registry()
        .register_fn("strict", |ctx: TickerContext| async move {
            let _: serde_json::Value = ctx.request_json()?;
            Ok::<(), HandlerError>(())
        });

    let ticker = scheduler
        .schedule_time(
            NewTimeTicker::new("strict")
                .with_request("{not json")
                .with_retries(5, vec![1]),
        )
        .await
        .unwrap()
        .into_inner();

    scheduler.dispatch_once(UniversalTimestamp::now()).await.unwrap();
    let failed = scheduler.get_time_ticker(ticker.id).await.unwrap().unwrap();
    assert_eq!(failed.status, TickerStatus::Failed);
    assert_eq!(failed.retry_count, 0);
}

#[tokio::test]
async fn test_background_loop_executes_due_work() {
    let fixture = TestFixture::new().await;
    let scheduler = fixture.default_scheduler("node-a").await;
    let calls = Arc::new(AtomicUsize::new(0));
    counting_handler(&scheduler, "bg", calls.clone());

    scheduler.start().await.unwrap();
    let ticker = scheduler
        .schedule_time(NewTimeTicker::new("bg"))
        .await
        .unwrap()
        .into_inner();

    let mut executed = false;
    for _ in 0..100 {
        let current = scheduler.get_time_ticker(ticker.id).await.unwrap().unwrap();
        if current.status == TickerStatus::Executed {
            executed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    scheduler.shutdown().await.unwrap();

    assert!(executed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
