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

//! SQLite row models
//!
//! Diesel model definitions using SQLite-compatible types. UUIDs are stored
//! as BLOB (`Vec<u8>`), timestamps as fixed-width TEXT, retry interval lists
//! as JSON TEXT.
//!
//! These are converted to domain types at the DAL boundary. Conversion is
//! fallible: a corrupt value surfaces as [`ValidationError::CorruptRow`].

use crate::database::schema::*;
use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use crate::error::ValidationError;
use crate::models::{
    CronTicker, CronTickerOccurrence, InboxState, OutboxMessage, OutboxState, RunCondition,
    TickerStatus, TimeTicker,
};
use chrono::Utc;
use diesel::prelude::*;

// ============================================================================
// Cron Ticker Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = cron_tickers)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SqliteCronTicker {
    pub id: Vec<u8>,
    pub expression: String,
    pub function: String,
    pub request: Vec<u8>,
    pub retries: i32,
    pub retry_intervals: String,
    pub description: Option<String>,
    pub init_identifier: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = cron_tickers)]
pub struct NewSqliteCronTicker {
    pub id: Vec<u8>,
    pub expression: String,
    pub function: String,
    pub request: Vec<u8>,
    pub retries: i32,
    pub retry_intervals: String,
    pub description: Option<String>,
    pub init_identifier: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

// ============================================================================
// Cron Occurrence Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = cron_ticker_occurrences)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SqliteCronOccurrence {
    pub id: Vec<u8>,
    pub cron_ticker_id: Vec<u8>,
    pub status: String,
    pub lock_holder: Option<String>,
    pub execution_time: String,
    pub locked_at: Option<String>,
    pub executed_at: Option<String>,
    pub skipped_reason: Option<String>,
    pub exception_message: Option<String>,
    pub elapsed_time: i64,
    pub retry_count: i32,
    pub version: i32,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = cron_ticker_occurrences)]
pub struct NewSqliteCronOccurrence {
    pub id: Vec<u8>,
    pub cron_ticker_id: Vec<u8>,
    pub status: String,
    pub execution_time: String,
    pub created_at: String,
    pub updated_at: String,
}

// ============================================================================
// Time Ticker Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = time_tickers)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SqliteTimeTicker {
    pub id: Vec<u8>,
    pub function: String,
    pub request: Vec<u8>,
    pub retries: i32,
    pub retry_intervals: String,
    pub description: Option<String>,
    pub init_identifier: Option<String>,
    pub status: String,
    pub lock_holder: Option<String>,
    pub execution_time: Option<String>,
    pub locked_at: Option<String>,
    pub executed_at: Option<String>,
    pub skipped_reason: Option<String>,
    pub exception_message: Option<String>,
    pub elapsed_time: i64,
    pub retry_count: i32,
    pub version: i32,
    pub parent_id: Option<Vec<u8>>,
    pub run_condition: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = time_tickers)]
pub struct NewSqliteTimeTicker {
    pub id: Vec<u8>,
    pub function: String,
    pub request: Vec<u8>,
    pub retries: i32,
    pub retry_intervals: String,
    pub description: Option<String>,
    pub init_identifier: Option<String>,
    pub status: String,
    pub execution_time: Option<String>,
    pub parent_id: Option<Vec<u8>>,
    pub run_condition: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

// ============================================================================
// Outbox Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = outbox_state)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SqliteOutboxState {
    pub outbox_id: Vec<u8>,
    pub lock_id: Option<String>,
    pub locked_at: Option<String>,
    pub version: i32,
    pub created: String,
    pub delivered: Option<String>,
    pub last_sequence_number: Option<i64>,
    pub next_attempt: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = outbox_state)]
pub struct NewSqliteOutboxState {
    pub outbox_id: Vec<u8>,
    pub created: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = outbox_messages)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SqliteOutboxMessage {
    pub sequence_number: i64,
    pub outbox_id: Vec<u8>,
    pub message_id: Vec<u8>,
    pub message_type: String,
    pub content_type: String,
    pub body: String,
    pub headers: Option<String>,
    pub conversation_id: Option<Vec<u8>>,
    pub correlation_id: Option<Vec<u8>>,
    pub initiator_id: Option<Vec<u8>>,
    pub request_id: Option<Vec<u8>>,
    pub source_address: Option<String>,
    pub destination_address: String,
    pub response_address: Option<String>,
    pub fault_address: Option<String>,
    pub enqueue_time: Option<String>,
    pub expiration_time: Option<String>,
    pub sent_time: String,
    pub delivered: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = outbox_messages)]
pub struct NewSqliteOutboxMessage {
    pub outbox_id: Vec<u8>,
    pub message_id: Vec<u8>,
    pub message_type: String,
    pub content_type: String,
    pub body: String,
    pub headers: Option<String>,
    pub conversation_id: Option<Vec<u8>>,
    pub correlation_id: Option<Vec<u8>>,
    pub initiator_id: Option<Vec<u8>>,
    pub request_id: Option<Vec<u8>>,
    pub source_address: Option<String>,
    pub destination_address: String,
    pub response_address: Option<String>,
    pub fault_address: Option<String>,
    pub enqueue_time: Option<String>,
    pub expiration_time: Option<String>,
    pub sent_time: String,
}

// ============================================================================
// Inbox Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = inbox_state)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SqliteInboxState {
    pub id: i64,
    pub message_id: Vec<u8>,
    pub consumer_id: String,
    pub lock_id: Option<String>,
    pub locked_at: Option<String>,
    pub version: i32,
    pub received: String,
    pub receive_count: i32,
    pub expiration_time: Option<String>,
    pub consumed: Option<String>,
    pub delivered: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = inbox_state)]
pub struct NewSqliteInboxState {
    pub message_id: Vec<u8>,
    pub consumer_id: String,
    pub received: String,
    pub receive_count: i32,
    pub expiration_time: Option<String>,
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

/// Convert UUID to SQLite BLOB
pub fn uuid_to_blob(id: &UniversalUuid) -> Vec<u8> {
    id.to_blob()
}

/// Convert SQLite BLOB to UUID
pub fn blob_to_uuid(
    blob: &[u8],
    table: &'static str,
    column: &'static str,
) -> Result<UniversalUuid, ValidationError> {
    UniversalUuid::from_bytes(blob).map_err(|e| ValidationError::CorruptRow {
        table,
        column,
        message: e.to_string(),
    })
}

fn opt_blob_to_uuid(
    blob: Option<&[u8]>,
    table: &'static str,
    column: &'static str,
) -> Result<Option<UniversalUuid>, ValidationError> {
    blob.map(|b| blob_to_uuid(b, table, column)).transpose()
}

/// Convert a timestamp to its fixed-width storage string
pub fn timestamp_to_string(ts: &UniversalTimestamp) -> String {
    ts.to_db_string()
}

/// Parse a stored timestamp
pub fn string_to_timestamp(
    s: &str,
    table: &'static str,
    column: &'static str,
) -> Result<UniversalTimestamp, ValidationError> {
    UniversalTimestamp::from_db_string(s).map_err(|e| ValidationError::CorruptRow {
        table,
        column,
        message: e.to_string(),
    })
}

fn opt_string_to_timestamp(
    s: Option<&str>,
    table: &'static str,
    column: &'static str,
) -> Result<Option<UniversalTimestamp>, ValidationError> {
    s.map(|v| string_to_timestamp(v, table, column)).transpose()
}

/// Current timestamp as a storage string
pub fn current_timestamp_string() -> String {
    UniversalTimestamp(Utc::now()).to_db_string()
}

/// Serialize a retry interval list
pub fn intervals_to_json(intervals: &[u64]) -> Result<String, ValidationError> {
    Ok(serde_json::to_string(intervals)?)
}

/// Parse a stored retry interval list
pub fn json_to_intervals(s: &str, table: &'static str) -> Result<Vec<u64>, ValidationError> {
    serde_json::from_str(s).map_err(|e| ValidationError::CorruptRow {
        table,
        column: "retry_intervals",
        message: e.to_string(),
    })
}

fn parse_status(s: &str, table: &'static str) -> Result<TickerStatus, ValidationError> {
    TickerStatus::from_str(s).ok_or_else(|| ValidationError::CorruptRow {
        table,
        column: "status",
        message: format!("unknown status '{}'", s),
    })
}

fn parse_run_condition(
    s: Option<&str>,
    table: &'static str,
) -> Result<Option<RunCondition>, ValidationError> {
    s.map(|v| {
        RunCondition::from_str(v).ok_or_else(|| ValidationError::CorruptRow {
            table,
            column: "run_condition",
            message: format!("unknown run condition '{}'", v),
        })
    })
    .transpose()
}

// ============================================================================
// Conversion Implementations: SQLite models -> Domain models
// ============================================================================

impl TryFrom<SqliteCronTicker> for CronTicker {
    type Error = ValidationError;

    fn try_from(s: SqliteCronTicker) -> Result<Self, Self::Error> {
        const T: &str = "cron_tickers";
        Ok(CronTicker {
            id: blob_to_uuid(&s.id, T, "id")?,
            expression: s.expression,
            function: s.function,
            request: s.request,
            retries: s.retries,
            retry_intervals: json_to_intervals(&s.retry_intervals, T)?,
            description: s.description,
            init_identifier: s.init_identifier,
            created_at: string_to_timestamp(&s.created_at, T, "created_at")?,
            updated_at: string_to_timestamp(&s.updated_at, T, "updated_at")?,
        })
    }
}

impl TryFrom<SqliteCronOccurrence> for CronTickerOccurrence {
    type Error = ValidationError;

    fn try_from(s: SqliteCronOccurrence) -> Result<Self, Self::Error> {
        const T: &str = "cron_ticker_occurrences";
        Ok(CronTickerOccurrence {
            id: blob_to_uuid(&s.id, T, "id")?,
            cron_ticker_id: blob_to_uuid(&s.cron_ticker_id, T, "cron_ticker_id")?,
            status: parse_status(&s.status, T)?,
            lock_holder: s.lock_holder,
            execution_time: string_to_timestamp(&s.execution_time, T, "execution_time")?,
            locked_at: opt_string_to_timestamp(s.locked_at.as_deref(), T, "locked_at")?,
            executed_at: opt_string_to_timestamp(s.executed_at.as_deref(), T, "executed_at")?,
            skipped_reason: s.skipped_reason,
            exception_message: s.exception_message,
            elapsed_time: s.elapsed_time,
            retry_count: s.retry_count,
            version: s.version,
            created_at: string_to_timestamp(&s.created_at, T, "created_at")?,
            updated_at: string_to_timestamp(&s.updated_at, T, "updated_at")?,
        })
    }
}

impl TryFrom<SqliteTimeTicker> for TimeTicker {
    type Error = ValidationError;

    fn try_from(s: SqliteTimeTicker) -> Result<Self, Self::Error> {
        const T: &str = "time_tickers";
        Ok(TimeTicker {
            id: blob_to_uuid(&s.id, T, "id")?,
            function: s.function,
            request: s.request,
            retries: s.retries,
            retry_intervals: json_to_intervals(&s.retry_intervals, T)?,
            description: s.description,
            init_identifier: s.init_identifier,
            status: parse_status(&s.status, T)?,
            lock_holder: s.lock_holder,
            execution_time: opt_string_to_timestamp(
                s.execution_time.as_deref(),
                T,
                "execution_time",
            )?,
            locked_at: opt_string_to_timestamp(s.locked_at.as_deref(), T, "locked_at")?,
            executed_at: opt_string_to_timestamp(s.executed_at.as_deref(), T, "executed_at")?,
            skipped_reason: s.skipped_reason,
            exception_message: s.exception_message,
            elapsed_time: s.elapsed_time,
            retry_count: s.retry_count,
            version: s.version,
            parent_id: opt_blob_to_uuid(s.parent_id.as_deref(), T, "parent_id")?,
            run_condition: parse_run_condition(s.run_condition.as_deref(), T)?,
            created_at: string_to_timestamp(&s.created_at, T, "created_at")?,
            updated_at: string_to_timestamp(&s.updated_at, T, "updated_at")?,
        })
    }
}

impl TryFrom<SqliteOutboxState> for OutboxState {
    type Error = ValidationError;

    fn try_from(s: SqliteOutboxState) -> Result<Self, Self::Error> {
        const T: &str = "outbox_state";
        Ok(OutboxState {
            outbox_id: blob_to_uuid(&s.outbox_id, T, "outbox_id")?,
            lock_id: s.lock_id,
            locked_at: opt_string_to_timestamp(s.locked_at.as_deref(), T, "locked_at")?,
            version: s.version,
            created: string_to_timestamp(&s.created, T, "created")?,
            delivered: opt_string_to_timestamp(s.delivered.as_deref(), T, "delivered")?,
            last_sequence_number: s.last_sequence_number,
            next_attempt: opt_string_to_timestamp(s.next_attempt.as_deref(), T, "next_attempt")?,
        })
    }
}

impl TryFrom<SqliteOutboxMessage> for OutboxMessage {
    type Error = ValidationError;

    fn try_from(s: SqliteOutboxMessage) -> Result<Self, Self::Error> {
        const T: &str = "outbox_messages";
        let headers = s
            .headers
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| ValidationError::CorruptRow {
                table: T,
                column: "headers",
                message: e.to_string(),
            })?;

        Ok(OutboxMessage {
            sequence_number: s.sequence_number,
            outbox_id: blob_to_uuid(&s.outbox_id, T, "outbox_id")?,
            message_id: blob_to_uuid(&s.message_id, T, "message_id")?,
            message_type: s.message_type,
            content_type: s.content_type,
            body: s.body,
            headers,
            conversation_id: opt_blob_to_uuid(s.conversation_id.as_deref(), T, "conversation_id")?,
            correlation_id: opt_blob_to_uuid(s.correlation_id.as_deref(), T, "correlation_id")?,
            initiator_id: opt_blob_to_uuid(s.initiator_id.as_deref(), T, "initiator_id")?,
            request_id: opt_blob_to_uuid(s.request_id.as_deref(), T, "request_id")?,
            source_address: s.source_address,
            destination_address: s.destination_address,
            response_address: s.response_address,
            fault_address: s.fault_address,
            enqueue_time: opt_string_to_timestamp(s.enqueue_time.as_deref(), T, "enqueue_time")?,
            expiration_time: opt_string_to_timestamp(
                s.expiration_time.as_deref(),
                T,
                "expiration_time",
            )?,
            sent_time: string_to_timestamp(&s.sent_time, T, "sent_time")?,
            delivered: opt_string_to_timestamp(s.delivered.as_deref(), T, "delivered")?,
        })
    }
}

impl TryFrom<SqliteInboxState> for InboxState {
    type Error = ValidationError;

    fn try_from(s: SqliteInboxState) -> Result<Self, Self::Error> {
        const T: &str = "inbox_state";
        Ok(InboxState {
            id: s.id,
            message_id: blob_to_uuid(&s.message_id, T, "message_id")?,
            consumer_id: s.consumer_id,
            lock_id: s.lock_id,
            locked_at: opt_string_to_timestamp(s.locked_at.as_deref(), T, "locked_at")?,
            version: s.version,
            received: string_to_timestamp(&s.received, T, "received")?,
            receive_count: s.receive_count,
            expiration_time: opt_string_to_timestamp(
                s.expiration_time.as_deref(),
                T,
                "expiration_time",
            )?,
            consumed: opt_string_to_timestamp(s.consumed.as_deref(), T, "consumed")?,
            delivered: opt_string_to_timestamp(s.delivered.as_deref(), T, "delivered")?,
        })
    }
}

/// Converts a batch of rows, failing on the first corrupt one.
pub fn convert_all<S, D>(rows: Vec<S>) -> Result<Vec<D>, ValidationError>
where
    D: TryFrom<S, Error = ValidationError>,
{
    rows.into_iter().map(D::try_from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrupt_status_is_reported() {
        let row = SqliteCronOccurrence {
            id: UniversalUuid::new_v4().to_blob(),
            cron_ticker_id: UniversalUuid::new_v4().to_blob(),
            status: "Running".to_string(),
            lock_holder: None,
            execution_time: current_timestamp_string(),
            locked_at: None,
            executed_at: None,
            skipped_reason: None,
            exception_message: None,
            elapsed_time: 0,
            retry_count: 0,
            version: 0,
            created_at: current_timestamp_string(),
            updated_at: current_timestamp_string(),
        };

        let err = CronTickerOccurrence::try_from(row).unwrap_err();
        match err {
            ValidationError::CorruptRow { column, .. } => assert_eq!(column, "status"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_intervals_round_trip_through_json() {
        let json = intervals_to_json(&[5, 15, 60]).unwrap();
        assert_eq!(json, "[5,15,60]");
        assert_eq!(json_to_intervals(&json, "cron_tickers").unwrap(), vec![5, 15, 60]);
        assert!(json_to_intervals("[-1]", "cron_tickers").is_err());
    }
}
