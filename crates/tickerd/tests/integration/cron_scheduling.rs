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
use tickerd::{
    CronTickerUpdate, NewCronTicker, RegistrationOutcome, TickerStatus, UniversalTimestamp,
};

fn hours_from(ts: UniversalTimestamp, hours: i64) -> UniversalTimestamp {
    UniversalTimestamp(ts.0 + chrono::Duration::hours(hours))
}

#[tokio::test]
async fn test_identical_registration_is_a_noop() {
    let fixture = TestFixture::new().await;
    let scheduler = fixture.default_scheduler("node-a").await;

    let first = scheduler
        .register_cron(NewCronTicker::new("0 0 * * * *", "hourly").with_request("r"))
        .await
        .unwrap();
    assert!(first.is_created());

    let second = scheduler
        .register_cron(NewCronTicker::new("0 0 * * * *", "hourly").with_request("r"))
        .await
        .unwrap();
    let RegistrationOutcome::Existing(existing) = second else {
        panic!("expected Existing, got {:?}", second);
    };
    assert_eq!(existing.id, first.inner().id);

    assert_eq!(scheduler.list_cron_tickers(10, 0).await.unwrap().len(), 1);
    let occurrences = scheduler.list_occurrences(existing.id, None, 10).await.unwrap();
    assert_eq!(occurrences.len(), 1);
}

#[tokio::test]
async fn test_horizon_materializes_configured_slots() {
    let fixture = TestFixture::new().await;
    let config = TestFixture::config("node-a").cron_horizon(3).build().unwrap();
    let scheduler = fixture.scheduler(config).await;

    let ticker = scheduler
        .register_cron(NewCronTicker::new("0 */10 * * * *", "report"))
        .await
        .unwrap()
        .into_inner();

    let occurrences = scheduler
        .list_occurrences(ticker.id, Some(TickerStatus::Idle), 10)
        .await
        .unwrap();
    assert_eq!(occurrences.len(), 3);
    for pair in occurrences.windows(2) {
        assert_eq!(
            pair[1].execution_time.0 - pair[0].execution_time.0,
            chrono::Duration::minutes(10)
        );
    }
    assert!(occurrences[0].execution_time > UniversalTimestamp::now());
}

#[tokio::test]
async fn test_init_identifier_updates_in_place() {
    let fixture = TestFixture::new().await;
    let scheduler = fixture.default_scheduler("node-a").await;

    let original = scheduler
        .register_cron(NewCronTicker::new("0 0 * * * *", "sync").with_init_identifier("nightly-sync"))
        .await
        .unwrap()
        .into_inner();

    let updated = scheduler
        .register_cron(NewCronTicker::new("0 30 * * * *", "sync").with_init_identifier("nightly-sync"))
        .await
        .unwrap();
    let RegistrationOutcome::Updated(updated) = updated else {
        panic!("expected Updated, got {:?}", updated);
    };
    assert_eq!(updated.id, original.id);
    assert_eq!(updated.expression, "0 30 * * * *");

    // The pending slot of the old expression is replaced by one of the new
    let occurrences = scheduler.list_occurrences(original.id, None, 10).await.unwrap();
    assert_eq!(occurrences.len(), 1);
    assert_eq!(occurrences[0].execution_time.0.format("%M").to_string(), "30");
}

#[tokio::test]
async fn test_update_cron_reexpands() {
    let fixture = TestFixture::new().await;
    let scheduler = fixture.default_scheduler("node-a").await;

    let ticker = scheduler
        .register_cron(NewCronTicker::new("0 0 * * * *", "job"))
        .await
        .unwrap()
        .into_inner();

    let updated = scheduler
        .update_cron(
            ticker.id,
            CronTickerUpdate {
                expression: Some("0 15 * * * *".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.expression, "0 15 * * * *");

    let occurrences = scheduler.list_occurrences(ticker.id, None, 10).await.unwrap();
    assert_eq!(occurrences.len(), 1);
    assert_eq!(occurrences[0].execution_time.0.format("%M").to_string(), "15");

    assert!(scheduler
        .update_cron(
            ticker.id,
            CronTickerUpdate {
                expression: Some("every tuesday".to_string()),
                ..Default::default()
            },
        )
        .await
        .is_err());
}

#[tokio::test]
async fn test_due_occurrence_runs_and_missed_slots_are_not_backfilled() {
    let fixture = TestFixture::new().await;
    let scheduler = fixture.default_scheduler("node-a").await;
    let calls = Arc::new(AtomicUsize::new(0));
    counting_handler(&scheduler, "hourly", calls.clone());

    let ticker = scheduler
        .register_cron(NewCronTicker::new("0 0 * * * *", "hourly"))
        .await
        .unwrap()
        .into_inner();
    let first = scheduler.list_occurrences(ticker.id, None, 10).await.unwrap()[0].clone();

    // Two hours later the first slot is due; the one in between was never
    // materialized and is not run.
    let later = hours_from(UniversalTimestamp::now(), 2);
    let summary = scheduler.dispatch_once(later).await.unwrap();
    assert_eq!(summary.leased, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let executed = scheduler.get_occurrence(first.id).await.unwrap().unwrap();
    assert_eq!(executed.status, TickerStatus::Executed);
    assert!(executed.executed_at.is_some());

    // The horizon rolled on the cycle clock: the next slot follows `later`
    let pending = scheduler
        .list_occurrences(ticker.id, Some(TickerStatus::Idle), 10)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].execution_time > later);
    assert_eq!(
        pending[0].execution_time.0 - first.execution_time.0,
        chrono::Duration::hours(2)
    );

    let report = scheduler.expand_all(later).await.unwrap();
    assert!(report.inserted.is_empty());
    assert_eq!(report.already_scheduled, 1);
}

#[tokio::test]
async fn test_remove_cron_cascades() {
    let fixture = TestFixture::new().await;
    let scheduler = fixture.default_scheduler("node-a").await;

    let ticker = scheduler
        .register_cron(NewCronTicker::new("0 0 * * * *", "job"))
        .await
        .unwrap()
        .into_inner();
    let occurrence = scheduler.list_occurrences(ticker.id, None, 1).await.unwrap()[0].clone();

    assert!(scheduler.remove_cron(ticker.id).await.unwrap());
    assert!(scheduler.get_cron_ticker(ticker.id).await.unwrap().is_none());
    assert!(scheduler.get_occurrence(occurrence.id).await.unwrap().is_none());
    assert!(!scheduler.remove_cron(ticker.id).await.unwrap());
}
