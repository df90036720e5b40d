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

//! Wake-up source for the poll loops.
//!
//! SQLite has no change notification, so loops sleep for a fixed interval
//! between scans. A local registration can cut the sleep short with
//! [`PollDistributor::wake`] so that work scheduled for "now" on this node
//! does not wait a full interval.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

/// Abstracts how a loop waits for work to become available.
#[async_trait]
pub trait WorkDistributor: Send + Sync {
    /// Returns when work might be available. Callers must tolerate finding
    /// nothing to do.
    async fn wait_for_work(&self);

    /// Makes pending and future `wait_for_work` calls return promptly.
    fn shutdown(&self);
}

/// Interval polling with an early-wake signal.
#[derive(Clone)]
pub struct PollDistributor {
    poll_interval: Duration,
    shutdown: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl PollDistributor {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            shutdown: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Ends the current wait early.
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkDistributor for PollDistributor {
    async fn wait_for_work(&self) {
        if self.is_shutdown() {
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(self.poll_interval) => {
                debug!("Poll interval elapsed");
            }
            _ = self.notify.notified() => {
                debug!("Woken before poll interval");
            }
        }
    }

    fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_poll_interval() {
        let distributor = PollDistributor::new(Duration::from_millis(50));

        let start = std::time::Instant::now();
        distributor.wait_for_work().await;
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_millis(40));
        assert!(elapsed < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_wake_cuts_wait_short() {
        let distributor = PollDistributor::new(Duration::from_secs(60));
        let waker = distributor.clone();

        let start = std::time::Instant::now();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waker.wake();
        });

        distributor.wait_for_work().await;
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(!distributor.is_shutdown());
    }

    #[tokio::test]
    async fn test_shutdown() {
        let distributor = PollDistributor::new(Duration::from_secs(60));
        let stopper = distributor.clone();

        let start = std::time::Instant::now();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stopper.shutdown();
        });

        distributor.wait_for_work().await;
        assert!(start.elapsed() < Duration::from_secs(1));

        // Once shut down, waits return immediately
        let again = std::time::Instant::now();
        distributor.wait_for_work().await;
        assert!(again.elapsed() < Duration::from_millis(50));
    }
}
