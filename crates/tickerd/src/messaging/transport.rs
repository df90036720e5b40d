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

//! Outbound transports.
//!
//! A [`Transport`] returns `Ok` only once the broker has acknowledged the
//! message; the relay marks a message delivered only after that.

use crate::error::TransportError;
use crate::models::OutboxMessage;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Publishes one message and waits for acknowledgement.
    async fn publish(&self, message: &OutboxMessage) -> Result<(), TransportError>;
}

#[derive(Default)]
struct InMemoryState {
    published: Vec<OutboxMessage>,
    failures_remaining: usize,
}

/// Records published messages in memory. Can be told to fail the next N
/// publishes, which makes it useful for exercising relay ordering.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` publishes fail with `Unavailable`.
    pub fn fail_next(&self, count: usize) {
        self.state.lock().failures_remaining = count;
    }

    pub fn published(&self) -> Vec<OutboxMessage> {
        self.state.lock().published.clone()
    }

    pub fn published_to(&self, destination: &str) -> Vec<OutboxMessage> {
        self.state
            .lock()
            .published
            .iter()
            .filter(|m| m.destination_address == destination)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.state.lock().published.clear();
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(&self, message: &OutboxMessage) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(TransportError::Unavailable(format!(
                "injected failure publishing {}",
                message.message_id
            )));
        }
        state.published.push(message.clone());
        Ok(())
    }
}

/// Writes each message to the log and acknowledges it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    async fn publish(&self, message: &OutboxMessage) -> Result<(), TransportError> {
        info!(
            message_id = %message.message_id,
            message_type = %message.message_type,
            destination = %message.destination_address,
            "{}",
            message.body
        );
        Ok(())
    }
}
