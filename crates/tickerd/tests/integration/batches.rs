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
    HandlerError, NewBatchChild, NewTimeTicker, RegistrationError, SchedulerError, TickerContext,
    TickerStatus, UniversalTimestamp, ValidationError,
};

#[tokio::test]
async fn test_run_conditions_follow_gating_outcomes() {
    let fixture = TestFixture::new().await;
    let scheduler = fixture.default_scheduler("node-a").await;
    scheduler
        .registry()
        .register_fn("parent", |_ctx: TickerContext| async {
            Err::<(), _>(HandlerError::terminal("import rejected"))
        });
    let calls = Arc::new(AtomicUsize::new(0));
    counting_handler(&scheduler, "child", calls.clone());

    let batch = scheduler
        .schedule_batch(
            NewTimeTicker::new("parent"),
            vec![
                NewBatchChild::unconditional(NewTimeTicker::new("child").with_request("cleanup")),
                NewBatchChild::all_succeeded(NewTimeTicker::new("child").with_request("publish")),
                NewBatchChild::any_succeeded(NewTimeTicker::new("child").with_request("report")),
            ],
        )
        .await
        .unwrap()
        .into_inner();
    let [cleanup, publish, report] = [0, 1, 2].map(|i| batch.children[i].id);

    // Nothing but the parent is visible before it settles
    for child in &batch.children {
        assert!(child.execution_time.is_none());
    }

    // Parent fails: the unconditional child is released
    let summary = scheduler.dispatch_once(UniversalTimestamp::now()).await.unwrap();
    assert_eq!(summary.leased, 1);
    let parent = scheduler.get_time_ticker(batch.parent.id).await.unwrap().unwrap();
    assert_eq!(parent.status, TickerStatus::Failed);
    let released = scheduler.get_time_ticker(cleanup).await.unwrap().unwrap();
    assert!(released.execution_time.is_some());
    let held = scheduler.get_time_ticker(publish).await.unwrap().unwrap();
    assert!(held.execution_time.is_none());

    // Cleanup succeeds: all_succeeded is skipped, any_succeeded is released
    scheduler.dispatch_once(UniversalTimestamp::now()).await.unwrap();
    let skipped = scheduler.get_time_ticker(publish).await.unwrap().unwrap();
    assert_eq!(skipped.status, TickerStatus::Skipped);
    assert!(skipped
        .skipped_reason
        .as_deref()
        .is_some_and(|r| r.contains("all_succeeded")));

    scheduler.dispatch_once(UniversalTimestamp::now()).await.unwrap();
    let ran = scheduler.get_time_ticker(report).await.unwrap().unwrap();
    assert_eq!(ran.status, TickerStatus::Executed);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let children = scheduler.batch_children(batch.parent.id).await.unwrap();
    assert!(children.iter().all(|c| c.status.is_terminal()));
}

#[tokio::test]
async fn test_all_succeeded_child_runs_after_successful_parent() {
    let fixture = TestFixture::new().await;
    let scheduler = fixture.default_scheduler("node-a").await;
    let calls = Arc::new(AtomicUsize::new(0));
    counting_handler(&scheduler, "step", calls.clone());

    let batch = scheduler
        .schedule_batch(
            NewTimeTicker::new("step").with_request("extract"),
            vec![NewBatchChild::all_succeeded(
                NewTimeTicker::new("step").with_request("load"),
            )],
        )
        .await
        .unwrap()
        .into_inner();

    scheduler.dispatch_once(UniversalTimestamp::now()).await.unwrap();
    scheduler.dispatch_once(UniversalTimestamp::now()).await.unwrap();

    let child = scheduler
        .get_time_ticker(batch.children[0].id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(child.status, TickerStatus::Executed);
    assert_eq!(child.parent_id, Some(batch.parent.id));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_siblings_with_empty_payloads_all_run() {
    let fixture = TestFixture::new().await;
    let scheduler = fixture.default_scheduler("node-a").await;
    let parent_calls = Arc::new(AtomicUsize::new(0));
    let notify_calls = Arc::new(AtomicUsize::new(0));
    let audit_calls = Arc::new(AtomicUsize::new(0));
    counting_handler(&scheduler, "import", parent_calls.clone());
    counting_handler(&scheduler, "notify", notify_calls.clone());
    counting_handler(&scheduler, "audit", audit_calls.clone());

    let batch = scheduler
        .schedule_batch(
            NewTimeTicker::new("import"),
            vec![
                NewBatchChild::any_succeeded(NewTimeTicker::new("notify")),
                NewBatchChild::any_succeeded(NewTimeTicker::new("audit")),
                NewBatchChild::any_succeeded(NewTimeTicker::new("notify")),
            ],
        )
        .await
        .unwrap()
        .into_inner();

    scheduler.dispatch_once(UniversalTimestamp::now()).await.unwrap();
    for child in scheduler.batch_children(batch.parent.id).await.unwrap() {
        assert_eq!(child.status, TickerStatus::Idle, "child {}", child.function);
        assert!(child.execution_time.is_some());
        assert!(child.skipped_reason.is_none());
    }

    let summary = scheduler.dispatch_once(UniversalTimestamp::now()).await.unwrap();
    assert_eq!(summary.leased, 3);
    let children = scheduler.batch_children(batch.parent.id).await.unwrap();
    assert!(children.iter().all(|c| c.status == TickerStatus::Executed));
    assert_eq!(parent_calls.load(Ordering::SeqCst), 1);
    assert_eq!(notify_calls.load(Ordering::SeqCst), 2);
    assert_eq!(audit_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_conditional_child_cannot_carry_a_time() {
    let fixture = TestFixture::new().await;
    let scheduler = fixture.default_scheduler("node-a").await;

    let err = scheduler
        .schedule_batch(
            NewTimeTicker::new("parent"),
            vec![NewBatchChild::any_succeeded(
                NewTimeTicker::new("child").at(UniversalTimestamp::now()),
            )],
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::Registration(RegistrationError::Validation(
            ValidationError::InvalidBatch(_)
        ))
    ));
    assert!(scheduler.list_time_tickers(None, 10, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_skipping_parent_resolves_children() {
    let fixture = TestFixture::new().await;
    let scheduler = fixture.default_scheduler("node-a").await;

    let later = UniversalTimestamp(chrono::Utc::now() + chrono::Duration::hours(1));
    let batch = scheduler
        .schedule_batch(
            NewTimeTicker::new("parent").at(later),
            vec![NewBatchChild::all_succeeded(NewTimeTicker::new("child"))],
        )
        .await
        .unwrap()
        .into_inner();

    assert!(scheduler
        .skip_time_ticker(batch.parent.id, "maintenance window")
        .await
        .unwrap());

    let child = scheduler
        .get_time_ticker(batch.children[0].id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(child.status, TickerStatus::Skipped);
}

#[tokio::test]
async fn test_removing_parent_skips_unresolved_children() {
    let fixture = TestFixture::new().await;
    let scheduler = fixture.default_scheduler("node-a").await;

    let batch = scheduler
        .schedule_batch(
            NewTimeTicker::new("parent"),
            vec![NewBatchChild::unconditional(NewTimeTicker::new("child"))],
        )
        .await
        .unwrap()
        .into_inner();

    scheduler.remove_time(batch.parent.id).await.unwrap();
    assert!(scheduler.get_time_ticker(batch.parent.id).await.unwrap().is_none());

    let child = scheduler
        .get_time_ticker(batch.children[0].id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(child.status, TickerStatus::Skipped);
    assert_eq!(child.parent_id, None);

    let err = scheduler.remove_time(batch.parent.id).await.unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::Registration(RegistrationError::NotFound(_))
    ));
}
