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

//! Outbox Data Access Layer
//!
//! Messages are staged in the same transaction as the state change that
//! produced them: one `outbox_state` row per transaction plus its ordered
//! `outbox_messages`. The relay later claims an outbox with a version CAS
//! and walks its messages in `sequence_number` order.
//!
//! Delivery writes are fenced by the [`OutboxLock`] returned from
//! [`OutboxDAL::try_lock`]; a relay whose lock timed out and was taken over
//! cannot mark anything delivered.

use super::models::{
    convert_all, current_timestamp_string, timestamp_to_string, uuid_to_blob,
    NewSqliteOutboxMessage, NewSqliteOutboxState, SqliteOutboxMessage, SqliteOutboxState,
};
use super::DAL;
use crate::database::schema::{outbox_messages, outbox_state};
use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use crate::error::ValidationError;
use crate::models::{NewOutboxMessage, OutboxLock, OutboxMessage, OutboxState};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use tracing::debug;

pub struct OutboxDAL<'a> {
    dal: &'a DAL,
}

impl<'a> OutboxDAL<'a> {
    pub fn new(dal: &'a DAL) -> Self {
        Self { dal }
    }

    /// Runs `state_change` and stages `messages` in one immediate
    /// transaction. Either both commit or neither does.
    ///
    /// Returns the closure's value and the new outbox id (`None` when
    /// `messages` is empty).
    ///
    /// ```rust,ignore
    /// let (rows, outbox_id) = dal
    ///     .outbox()
    ///     .commit_with(
    ///         |conn| Ok(diesel::sql_query("UPDATE orders SET paid = 1").execute(conn)?),
    ///         vec![NewOutboxMessage::new("queue:orders", "OrderPaid", "42")],
    ///     )
    ///     .await?;
    /// ```
    pub async fn commit_with<T, F>(
        &self,
        state_change: F,
        messages: Vec<NewOutboxMessage>,
    ) -> Result<(T, Option<UniversalUuid>), ValidationError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, ValidationError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.dal.database.get_connection().await?;

        let (value, outbox_id) = conn
            .interact(move |conn| {
                conn.immediate_transaction::<_, ValidationError, _>(|conn| {
                    let value = state_change(conn)?;
                    let outbox_id = stage_messages(conn, &messages)?;
                    Ok((value, outbox_id))
                })
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        if let Some(id) = outbox_id {
            debug!("Committed outbox {}", id);
        }
        Ok((value, outbox_id))
    }

    /// Stages messages with no accompanying state change.
    pub async fn stage(
        &self,
        messages: Vec<NewOutboxMessage>,
    ) -> Result<Option<UniversalUuid>, ValidationError> {
        let ((), outbox_id) = self.commit_with(|_| Ok(()), messages).await?;
        Ok(outbox_id)
    }

    /// Undelivered outboxes that are unlocked or whose lock is older than
    /// `lock_cutoff`, oldest first. Outboxes deferred past `now` are left out
    /// so they never take a slot from deliverable ones.
    pub async fn pending(
        &self,
        now: UniversalTimestamp,
        lock_cutoff: UniversalTimestamp,
        limit: i64,
    ) -> Result<Vec<OutboxState>, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let now_str = timestamp_to_string(&now);
        let cutoff = timestamp_to_string(&lock_cutoff);

        let rows: Vec<SqliteOutboxState> = conn
            .interact(move |conn| {
                outbox_state::table
                    .filter(outbox_state::delivered.is_null())
                    .filter(
                        outbox_state::lock_id
                            .is_null()
                            .or(outbox_state::locked_at.lt(cutoff)),
                    )
                    .filter(
                        outbox_state::next_attempt
                            .is_null()
                            .or(outbox_state::next_attempt.le(now_str)),
                    )
                    .select(SqliteOutboxState::as_select())
                    .order(outbox_state::created.asc())
                    .limit(limit)
                    .load(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        convert_all(rows)
    }

    /// Claims an outbox for delivery.
    ///
    /// Succeeds only if the row is still at `expected_version`, undelivered,
    /// and unlocked (or its lock is older than `lock_cutoff`).
    pub async fn try_lock(
        &self,
        outbox_id: UniversalUuid,
        expected_version: i32,
        lock_id: &str,
        now: UniversalTimestamp,
        lock_cutoff: UniversalTimestamp,
    ) -> Result<Option<OutboxLock>, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let id_blob = uuid_to_blob(&outbox_id);
        let lock = lock_id.to_string();
        let now_str = timestamp_to_string(&now);
        let cutoff = timestamp_to_string(&lock_cutoff);

        let affected = conn
            .interact(move |conn| {
                diesel::update(
                    outbox_state::table
                        .filter(outbox_state::outbox_id.eq(&id_blob))
                        .filter(outbox_state::version.eq(expected_version))
                        .filter(outbox_state::delivered.is_null())
                        .filter(
                            outbox_state::lock_id
                                .is_null()
                                .or(outbox_state::locked_at.lt(cutoff)),
                        ),
                )
                .set((
                    outbox_state::lock_id.eq(Some(lock)),
                    outbox_state::locked_at.eq(Some(now_str)),
                    outbox_state::version.eq(outbox_state::version + 1),
                ))
                .execute(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok((affected == 1).then(|| OutboxLock {
            outbox_id,
            lock_id: lock_id.to_string(),
            version: expected_version + 1,
        }))
    }

    /// Undelivered messages of one outbox in sequence order.
    pub async fn undelivered_messages(
        &self,
        outbox_id: UniversalUuid,
    ) -> Result<Vec<OutboxMessage>, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let id_blob = uuid_to_blob(&outbox_id);

        let rows: Vec<SqliteOutboxMessage> = conn
            .interact(move |conn| {
                outbox_messages::table
                    .filter(outbox_messages::outbox_id.eq(&id_blob))
                    .filter(outbox_messages::delivered.is_null())
                    .select(SqliteOutboxMessage::as_select())
                    .order(outbox_messages::sequence_number.asc())
                    .load(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        convert_all(rows)
    }

    /// Every message of one outbox in sequence order.
    pub async fn messages_for(
        &self,
        outbox_id: UniversalUuid,
    ) -> Result<Vec<OutboxMessage>, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let id_blob = uuid_to_blob(&outbox_id);

        let rows: Vec<SqliteOutboxMessage> = conn
            .interact(move |conn| {
                outbox_messages::table
                    .filter(outbox_messages::outbox_id.eq(&id_blob))
                    .select(SqliteOutboxMessage::as_select())
                    .order(outbox_messages::sequence_number.asc())
                    .load(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        convert_all(rows)
    }

    pub async fn get_state(
        &self,
        outbox_id: UniversalUuid,
    ) -> Result<Option<OutboxState>, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let id_blob = uuid_to_blob(&outbox_id);

        let row: Option<SqliteOutboxState> = conn
            .interact(move |conn| {
                outbox_state::table
                    .filter(outbox_state::outbox_id.eq(&id_blob))
                    .select(SqliteOutboxState::as_select())
                    .first(conn)
                    .optional()
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        row.map(OutboxState::try_from).transpose()
    }

    /// Marks one message delivered and advances `last_sequence_number`.
    ///
    /// Returns `false` without writing if the lock is no longer held.
    pub async fn mark_message_delivered(
        &self,
        lock: &OutboxLock,
        sequence_number: i64,
        now: UniversalTimestamp,
    ) -> Result<bool, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let id_blob = uuid_to_blob(&lock.outbox_id);
        let lock_id = lock.lock_id.clone();
        let version = lock.version;
        let now_str = timestamp_to_string(&now);

        let applied = conn
            .interact(move |conn| {
                conn.immediate_transaction::<_, diesel::result::Error, _>(|conn| {
                    let held = diesel::update(
                        outbox_state::table
                            .filter(outbox_state::outbox_id.eq(&id_blob))
                            .filter(outbox_state::lock_id.eq(&lock_id))
                            .filter(outbox_state::version.eq(version)),
                    )
                    .set(outbox_state::last_sequence_number.eq(Some(sequence_number)))
                    .execute(conn)?;
                    if held == 0 {
                        return Ok(false);
                    }

                    diesel::update(
                        outbox_messages::table
                            .filter(outbox_messages::sequence_number.eq(sequence_number))
                            .filter(outbox_messages::outbox_id.eq(&id_blob))
                            .filter(outbox_messages::delivered.is_null()),
                    )
                    .set(outbox_messages::delivered.eq(Some(now_str)))
                    .execute(conn)?;
                    Ok(true)
                })
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(applied)
    }

    /// Marks the outbox delivered and clears its lock, provided every
    /// message has been delivered and the lock is still held.
    pub async fn complete(
        &self,
        lock: &OutboxLock,
        now: UniversalTimestamp,
    ) -> Result<bool, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let id_blob = uuid_to_blob(&lock.outbox_id);
        let lock_id = lock.lock_id.clone();
        let version = lock.version;
        let now_str = timestamp_to_string(&now);

        let applied = conn
            .interact(move |conn| {
                conn.immediate_transaction::<_, diesel::result::Error, _>(|conn| {
                    let remaining: i64 = outbox_messages::table
                        .filter(outbox_messages::outbox_id.eq(&id_blob))
                        .filter(outbox_messages::delivered.is_null())
                        .count()
                        .get_result(conn)?;
                    if remaining > 0 {
                        return Ok(false);
                    }

                    let updated = diesel::update(
                        outbox_state::table
                            .filter(outbox_state::outbox_id.eq(&id_blob))
                            .filter(outbox_state::lock_id.eq(&lock_id))
                            .filter(outbox_state::version.eq(version)),
                    )
                    .set((
                        outbox_state::delivered.eq(Some(now_str)),
                        outbox_state::lock_id.eq(None::<String>),
                        outbox_state::locked_at.eq(None::<String>),
                        outbox_state::version.eq(outbox_state::version + 1),
                    ))
                    .execute(conn)?;
                    Ok(updated == 1)
                })
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(applied)
    }

    /// Releases the lock and keeps the outbox out of [`pending`] until
    /// `until`.
    ///
    /// [`pending`]: OutboxDAL::pending
    pub async fn defer(
        &self,
        lock: &OutboxLock,
        until: UniversalTimestamp,
    ) -> Result<bool, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let id_blob = uuid_to_blob(&lock.outbox_id);
        let lock_id = lock.lock_id.clone();
        let version = lock.version;
        let until_str = timestamp_to_string(&until);

        let affected = conn
            .interact(move |conn| {
                diesel::update(
                    outbox_state::table
                        .filter(outbox_state::outbox_id.eq(&id_blob))
                        .filter(outbox_state::lock_id.eq(&lock_id))
                        .filter(outbox_state::version.eq(version)),
                )
                .set((
                    outbox_state::lock_id.eq(None::<String>),
                    outbox_state::locked_at.eq(None::<String>),
                    outbox_state::next_attempt.eq(Some(until_str)),
                    outbox_state::version.eq(outbox_state::version + 1),
                ))
                .execute(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(affected == 1)
    }

    pub async fn count_undelivered(&self) -> Result<i64, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let count = conn
            .interact(|conn| {
                outbox_state::table
                    .filter(outbox_state::delivered.is_null())
                    .count()
                    .get_result::<i64>(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;
        Ok(count)
    }

    /// Deletes delivered outboxes (and, by cascade, their messages)
    /// delivered before `cutoff`.
    pub async fn delete_delivered_before(
        &self,
        cutoff: UniversalTimestamp,
    ) -> Result<usize, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let cutoff_str = timestamp_to_string(&cutoff);

        let deleted = conn
            .interact(move |conn| {
                diesel::delete(
                    outbox_state::table
                        .filter(outbox_state::delivered.is_not_null())
                        .filter(outbox_state::delivered.lt(cutoff_str)),
                )
                .execute(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(deleted)
    }

    pub async fn count_delivered_before(
        &self,
        cutoff: UniversalTimestamp,
    ) -> Result<i64, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let cutoff_str = timestamp_to_string(&cutoff);

        let count = conn
            .interact(move |conn| {
                outbox_state::table
                    .filter(outbox_state::delivered.is_not_null())
                    .filter(outbox_state::delivered.lt(cutoff_str))
                    .count()
                    .get_result::<i64>(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(count)
    }
}

/// Writes a new outbox and its messages on an open connection.
///
/// Must run inside the caller's transaction. Returns `None` and writes
/// nothing when `messages` is empty.
pub(crate) fn stage_messages(
    conn: &mut SqliteConnection,
    messages: &[NewOutboxMessage],
) -> Result<Option<UniversalUuid>, ValidationError> {
    if messages.is_empty() {
        return Ok(None);
    }

    let outbox_id = UniversalUuid::new_v4();
    let outbox_blob = uuid_to_blob(&outbox_id);
    let now = current_timestamp_string();

    diesel::insert_into(outbox_state::table)
        .values(&NewSqliteOutboxState {
            outbox_id: outbox_blob.clone(),
            created: now.clone(),
        })
        .execute(conn)?;

    for message in messages {
        let row = NewSqliteOutboxMessage {
            outbox_id: outbox_blob.clone(),
            message_id: uuid_to_blob(&message.message_id),
            message_type: message.message_type.clone(),
            content_type: message.content_type.clone(),
            body: message.body.clone(),
            headers: message
                .headers
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            conversation_id: message.conversation_id.as_ref().map(uuid_to_blob),
            correlation_id: message.correlation_id.as_ref().map(uuid_to_blob),
            initiator_id: message.initiator_id.as_ref().map(uuid_to_blob),
            request_id: message.request_id.as_ref().map(uuid_to_blob),
            source_address: message.source_address.clone(),
            destination_address: message.destination_address.clone(),
            response_address: message.response_address.clone(),
            fault_address: message.fault_address.clone(),
            enqueue_time: message.enqueue_time.as_ref().map(timestamp_to_string),
            expiration_time: message.expiration_time.as_ref().map(timestamp_to_string),
            sent_time: now.clone(),
        };
        diesel::insert_into(outbox_messages::table)
            .values(&row)
            .execute(conn)?;
    }

    Ok(Some(outbox_id))
}
