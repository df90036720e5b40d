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

//! # Messaging
//!
//! Transactional outbox and idempotent inbox.
//!
//! State changes and the messages announcing them are written in one
//! transaction through [`OutboxDAL::commit_with`](crate::dal::OutboxDAL::commit_with).
//! The [`OutboxRelay`] later publishes them through a [`Transport`], and the
//! [`InboxDeduplicator`] keeps a consumer from acting twice on a redelivered
//! message.

pub mod inbox;
pub mod relay;
pub mod transport;

pub use inbox::{InboxConsumer, InboxDeduplicator, InboxOutcome};
pub use relay::{OutboxRelay, RelayReport};
pub use transport::{InMemoryTransport, LogTransport, Transport};
