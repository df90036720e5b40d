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

//! Error types, one enum per layer.
//!
//! Duplicate registrations, duplicate occurrences and lease contention are
//! not errors; they surface as outcome values (`RegistrationOutcome`,
//! `InsertOutcome`, `LeaseOutcome`).

use thiserror::Error;

use crate::database::UniversalUuid;

/// Errors raised while creating the pool or migrating the schema.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Failed to create connection pool: {0}")]
    PoolCreation(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Unsupported database URL '{0}': expected sqlite://, a file path, or a file: URI")]
    UnsupportedUrl(String),
}

/// Store-level errors returned by the DAL.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Connection pool error: {0}")]
    ConnectionPool(String),

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Corrupt value in {table}.{column}: {message}")]
    CorruptRow {
        table: &'static str,
        column: &'static str,
        message: String,
    },

    #[error("Invalid cron expression '{expression}': {message}")]
    InvalidCronExpression { expression: String, message: String },

    #[error("Invalid retry intervals: {0}")]
    InvalidRetryIntervals(String),

    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors returned by registration and operator calls.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Function name must not be empty")]
    EmptyFunction,

    #[error("Ticker {0} not found")]
    NotFound(UniversalUuid),

    #[error("Definition collides with existing cron ticker {0}")]
    Duplicate(UniversalUuid),

    #[error("A pending time ticker {existing} for function '{function}' already has this execution time and request")]
    DuplicatePending {
        existing: UniversalUuid,
        function: String,
    },

    #[error("Ticker {0} is held by a running execution")]
    Locked(UniversalUuid),
}

impl From<diesel::result::Error> for RegistrationError {
    fn from(e: diesel::result::Error) -> Self {
        RegistrationError::Validation(ValidationError::Database(e))
    }
}

/// Failure reported by a job handler.
///
/// `Retryable` failures go through the retry policy; `Terminal` failures
/// move the ticker straight to `Failed`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    #[error("{0}")]
    Retryable(String),

    #[error("{0}")]
    Terminal(String),
}

impl HandlerError {
    pub fn retryable(message: impl Into<String>) -> Self {
        HandlerError::Retryable(message.into())
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        HandlerError::Terminal(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, HandlerError::Retryable(_))
    }

    pub fn message(&self) -> &str {
        match self {
            HandlerError::Retryable(m) | HandlerError::Terminal(m) => m,
        }
    }
}

/// Errors from the dispatch loop.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Execution task failed: {0}")]
    Join(String),
}

/// Errors from the outbound transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    #[error("Message rejected by {destination}: {reason}")]
    Rejected { destination: String, reason: String },
}

/// Errors from the outbox relay.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Relay task failed: {0}")]
    Join(String),
}

/// Errors from the inbox deduplicator.
#[derive(Debug, Error)]
pub enum InboxError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Consumer failed: {0}")]
    Consumer(#[from] HandlerError),

    #[error("Inbox lock for message {message_id} was lost before commit")]
    LockLost { message_id: UniversalUuid },
}

/// Errors from building or running the scheduler facade.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Scheduler background loops are already running")]
    AlreadyStarted,
}
