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
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;
use tickerd::{NewCronTicker, NewTimeTicker, TickerRecord, TickerStatus, UniversalTimestamp};

#[tokio::test]
async fn test_skip_only_applies_to_idle_rows() {
    let fixture = TestFixture::new().await;
    let scheduler = fixture.default_scheduler("node-a").await;

    let later = UniversalTimestamp(chrono::Utc::now() + chrono::Duration::hours(1));
    let ticker = scheduler
        .schedule_time(NewTimeTicker::new("job").at(later))
        .await
        .unwrap()
        .into_inner();

    assert!(scheduler.skip_time_ticker(ticker.id, "operator").await.unwrap());
    let skipped = scheduler.get_time_ticker(ticker.id).await.unwrap().unwrap();
    assert_eq!(skipped.status, TickerStatus::Skipped);
    assert_eq!(skipped.skipped_reason.as_deref(), Some("operator"));
    assert!(skipped.executed_at.is_none());

    assert!(!scheduler.skip_time_ticker(ticker.id, "again").await.unwrap());
}

#[tokio::test]
async fn test_skip_occurrence() {
    let fixture = TestFixture::new().await;
    let scheduler = fixture.default_scheduler("node-a").await;

    let cron = scheduler
        .register_cron(NewCronTicker::new("0 0 * * * *", "hourly"))
        .await
        .unwrap()
        .into_inner();
    let occurrence = scheduler.list_occurrences(cron.id, None, 1).await.unwrap()[0].clone();

    assert!(scheduler.skip_occurrence(occurrence.id, "holiday").await.unwrap());
    let skipped = scheduler.get_occurrence(occurrence.id).await.unwrap().unwrap();
    assert_eq!(skipped.status, TickerStatus::Skipped);

    let Some(TickerRecord::Occurrence(found)) = scheduler.find(occurrence.id).await.unwrap() else {
        panic!("occurrence not found by id");
    };
    assert_eq!(found.skipped_reason.as_deref(), Some("holiday"));
}

#[tokio::test]
async fn test_cleanup_removes_only_settled_rows() {
    let fixture = TestFixture::new().await;
    let scheduler = fixture.default_scheduler("node-a").await;
    counting_handler(&scheduler, "done", Arc::new(AtomicUsize::new(0)));

    let finished = scheduler
        .schedule_time(NewTimeTicker::new("done"))
        .await
        .unwrap()
        .into_inner();
    let pending = scheduler
        .schedule_time(
            NewTimeTicker::new("done")
                .at(UniversalTimestamp(chrono::Utc::now() + chrono::Duration::hours(1))),
        )
        .await
        .unwrap()
        .into_inner();
    scheduler.dispatch_once(UniversalTimestamp::now()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let preview = scheduler.cleanup(Duration::ZERO, true).await.unwrap();
    assert!(preview.dry_run);
    assert_eq!(preview.time_tickers, 1);
    assert!(scheduler.get_time_ticker(finished.id).await.unwrap().is_some());

    let report = scheduler.cleanup(Duration::ZERO, false).await.unwrap();
    assert_eq!(report.time_tickers, 1);
    assert!(scheduler.get_time_ticker(finished.id).await.unwrap().is_none());
    assert!(scheduler.get_time_ticker(pending.id).await.unwrap().is_some());

    // Long retention keeps everything
    let report = scheduler.cleanup(Duration::from_secs(86_400), false).await.unwrap();
    assert_eq!(report.total(), 0);
}

#[tokio::test]
async fn test_cleanup_loop_keeps_ticker_history_unless_enabled() {
    let fixture = TestFixture::new().await;

    for prune_tickers in [false, true] {
        let config = TestFixture::config("node-a")
            .cleanup_interval(Duration::from_millis(50))
            .retention(Duration::from_millis(1))
            .prune_tickers(prune_tickers)
            .build()
            .unwrap();
        let scheduler = fixture.scheduler(config).await;

        let ticker = scheduler
            .schedule_time(
                NewTimeTicker::new("archive")
                    .at(UniversalTimestamp(chrono::Utc::now() + chrono::Duration::hours(1))),
            )
            .await
            .unwrap()
            .into_inner();
        assert!(scheduler.skip_time_ticker(ticker.id, "not needed").await.unwrap());

        scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        scheduler.shutdown().await.unwrap();

        let kept = scheduler.get_time_ticker(ticker.id).await.unwrap();
        assert_eq!(kept.is_some(), !prune_tickers, "prune_tickers = {}", prune_tickers);
    }
}

#[tokio::test]
async fn test_list_time_tickers_by_status() {
    let fixture = TestFixture::new().await;
    let scheduler = fixture.default_scheduler("node-a").await;
    counting_handler(&scheduler, "a", Arc::new(AtomicUsize::new(0)));

    scheduler
        .schedule_time(NewTimeTicker::new("a").with_request("1"))
        .await
        .unwrap();
    scheduler
        .schedule_time(
            NewTimeTicker::new("b")
                .at(UniversalTimestamp(chrono::Utc::now() + chrono::Duration::hours(1))),
        )
        .await
        .unwrap();
    scheduler.dispatch_once(UniversalTimestamp::now()).await.unwrap();

    let idle = scheduler
        .list_time_tickers(Some(TickerStatus::Idle), 10, 0)
        .await
        .unwrap();
    assert_eq!(idle.len(), 1);
    assert_eq!(idle[0].function, "b");

    let executed = scheduler
        .list_time_tickers(Some(TickerStatus::Executed), 10, 0)
        .await
        .unwrap();
    assert_eq!(executed.len(), 1);
    assert_eq!(scheduler.list_time_tickers(None, 10, 0).await.unwrap().len(), 2);
}
