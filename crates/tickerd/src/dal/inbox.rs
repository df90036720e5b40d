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

//! Inbox Data Access Layer
//!
//! One row per `(message_id, consumer_id)`. A receive upserts the row and
//! bumps `receive_count`; the consumer then takes a version-CAS lock, runs,
//! and marks the row consumed in the same transaction that stages any
//! messages it produced.

use super::models::{timestamp_to_string, uuid_to_blob, NewSqliteInboxState, SqliteInboxState};
use super::outbox::stage_messages;
use super::DAL;
use crate::database::schema::inbox_state;
use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use crate::error::ValidationError;
use crate::models::{InboxState, NewOutboxMessage};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

/// Result of [`InboxDAL::consume_with`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeResult {
    /// Row marked consumed; staged messages (if any) landed in this outbox
    Consumed { outbox_id: Option<UniversalUuid> },
    /// The lock was taken over before commit; nothing was written
    LockLost,
}

pub struct InboxDAL<'a> {
    dal: &'a DAL,
}

impl<'a> InboxDAL<'a> {
    pub fn new(dal: &'a DAL) -> Self {
        Self { dal }
    }

    /// Records a delivery of `message_id` to `consumer_id`.
    ///
    /// The first delivery inserts the row with `receive_count = 1`; later
    /// deliveries increment it.
    pub async fn receive(
        &self,
        message_id: UniversalUuid,
        consumer_id: &str,
        expiration_time: Option<UniversalTimestamp>,
        now: UniversalTimestamp,
    ) -> Result<InboxState, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let row = NewSqliteInboxState {
            message_id: uuid_to_blob(&message_id),
            consumer_id: consumer_id.to_string(),
            received: timestamp_to_string(&now),
            receive_count: 1,
            expiration_time: expiration_time.as_ref().map(timestamp_to_string),
        };

        let stored: SqliteInboxState = conn
            .interact(move |conn| {
                conn.immediate_transaction::<_, diesel::result::Error, _>(|conn| {
                    diesel::insert_into(inbox_state::table)
                        .values(&row)
                        .on_conflict((inbox_state::message_id, inbox_state::consumer_id))
                        .do_update()
                        .set(inbox_state::receive_count.eq(inbox_state::receive_count + 1))
                        .execute(conn)?;
                    load(conn, &row.message_id, &row.consumer_id)
                })
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        stored.try_into()
    }

    pub async fn get(
        &self,
        message_id: UniversalUuid,
        consumer_id: &str,
    ) -> Result<Option<InboxState>, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let message_blob = uuid_to_blob(&message_id);
        let consumer = consumer_id.to_string();

        let row = conn
            .interact(move |conn| load(conn, &message_blob, &consumer).optional())
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        row.map(InboxState::try_from).transpose()
    }

    /// Takes the consumer lock on an unconsumed row.
    ///
    /// Succeeds only at `expected_version` and when the row is unlocked or
    /// its lock is older than `lock_cutoff`. Returns the new version.
    pub async fn try_lock(
        &self,
        id: i64,
        expected_version: i32,
        lock_id: &str,
        now: UniversalTimestamp,
        lock_cutoff: UniversalTimestamp,
    ) -> Result<Option<i32>, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let lock = lock_id.to_string();
        let now_str = timestamp_to_string(&now);
        let cutoff = timestamp_to_string(&lock_cutoff);

        let affected = conn
            .interact(move |conn| {
                diesel::update(
                    inbox_state::table
                        .filter(inbox_state::id.eq(id))
                        .filter(inbox_state::version.eq(expected_version))
                        .filter(inbox_state::consumed.is_null())
                        .filter(
                            inbox_state::lock_id
                                .is_null()
                                .or(inbox_state::locked_at.lt(cutoff)),
                        ),
                )
                .set((
                    inbox_state::lock_id.eq(Some(lock)),
                    inbox_state::locked_at.eq(Some(now_str)),
                    inbox_state::version.eq(inbox_state::version + 1),
                ))
                .execute(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok((affected == 1).then_some(expected_version + 1))
    }

    /// Marks the row consumed and stages `messages`, atomically.
    pub async fn consume_with(
        &self,
        id: i64,
        lock_id: &str,
        version: i32,
        now: UniversalTimestamp,
        messages: Vec<NewOutboxMessage>,
    ) -> Result<ConsumeResult, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let lock = lock_id.to_string();
        let now_str = timestamp_to_string(&now);

        let result = conn
            .interact(move |conn| {
                conn.immediate_transaction::<_, ValidationError, _>(|conn| {
                    let updated = diesel::update(
                        inbox_state::table
                            .filter(inbox_state::id.eq(id))
                            .filter(inbox_state::lock_id.eq(&lock))
                            .filter(inbox_state::version.eq(version))
                            .filter(inbox_state::consumed.is_null()),
                    )
                    .set((
                        inbox_state::consumed.eq(Some(now_str)),
                        inbox_state::lock_id.eq(None::<String>),
                        inbox_state::locked_at.eq(None::<String>),
                        inbox_state::version.eq(inbox_state::version + 1),
                    ))
                    .execute(conn)?;
                    if updated == 0 {
                        return Ok(ConsumeResult::LockLost);
                    }

                    let outbox_id = stage_messages(conn, &messages)?;
                    Ok(ConsumeResult::Consumed { outbox_id })
                })
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(result)
    }

    /// Drops the consumer lock after a failed consume.
    pub async fn release(&self, id: i64, lock_id: &str, version: i32) -> Result<bool, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let lock = lock_id.to_string();

        let affected = conn
            .interact(move |conn| {
                diesel::update(
                    inbox_state::table
                        .filter(inbox_state::id.eq(id))
                        .filter(inbox_state::lock_id.eq(&lock))
                        .filter(inbox_state::version.eq(version)),
                )
                .set((
                    inbox_state::lock_id.eq(None::<String>),
                    inbox_state::locked_at.eq(None::<String>),
                    inbox_state::version.eq(inbox_state::version + 1),
                ))
                .execute(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(affected == 1)
    }

    /// Records transport acknowledgement of a consumed message.
    pub async fn mark_delivered(
        &self,
        message_id: UniversalUuid,
        consumer_id: &str,
        now: UniversalTimestamp,
    ) -> Result<bool, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let message_blob = uuid_to_blob(&message_id);
        let consumer = consumer_id.to_string();
        let now_str = timestamp_to_string(&now);

        let affected = conn
            .interact(move |conn| {
                diesel::update(
                    inbox_state::table
                        .filter(inbox_state::message_id.eq(&message_blob))
                        .filter(inbox_state::consumer_id.eq(&consumer))
                        .filter(inbox_state::consumed.is_not_null())
                        .filter(inbox_state::delivered.is_null()),
                )
                .set(inbox_state::delivered.eq(Some(now_str)))
                .execute(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(affected == 1)
    }

    /// Deletes rows delivered before `delivered_cutoff` and rows whose
    /// expiration time has passed.
    pub async fn delete_expired(
        &self,
        now: UniversalTimestamp,
        delivered_cutoff: UniversalTimestamp,
    ) -> Result<usize, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let now_str = timestamp_to_string(&now);
        let cutoff = timestamp_to_string(&delivered_cutoff);

        let deleted = conn
            .interact(move |conn| {
                diesel::delete(
                    inbox_state::table.filter(
                        inbox_state::delivered
                            .lt(cutoff)
                            .or(inbox_state::expiration_time.lt(now_str)),
                    ),
                )
                .execute(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(deleted)
    }

    pub async fn count_expired(
        &self,
        now: UniversalTimestamp,
        delivered_cutoff: UniversalTimestamp,
    ) -> Result<i64, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let now_str = timestamp_to_string(&now);
        let cutoff = timestamp_to_string(&delivered_cutoff);

        let count = conn
            .interact(move |conn| {
                inbox_state::table
                    .filter(
                        inbox_state::delivered
                            .lt(cutoff)
                            .or(inbox_state::expiration_time.lt(now_str)),
                    )
                    .count()
                    .get_result::<i64>(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(count)
    }
}

fn load(
    conn: &mut SqliteConnection,
    message_blob: &[u8],
    consumer_id: &str,
) -> QueryResult<SqliteInboxState> {
    inbox_state::table
        .filter(inbox_state::message_id.eq(message_blob))
        .filter(inbox_state::consumer_id.eq(consumer_id))
        .select(SqliteInboxState::as_select())
        .first(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use chrono::Duration;

    #[tokio::test]
    async fn test_redelivery_increments_receive_count() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::try_new(dir.path().join("inbox.db").to_str().unwrap(), 2).unwrap();
        db.run_migrations().await.unwrap();
        let dal = DAL::new(db);

        let message_id = UniversalUuid::new_v4();
        let now = UniversalTimestamp::now();

        let first = dal.inbox().receive(message_id, "billing", None, now).await.unwrap();
        let second = dal.inbox().receive(message_id, "billing", None, now).await.unwrap();
        let other = dal.inbox().receive(message_id, "audit", None, now).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.receive_count, 1);
        assert_eq!(second.receive_count, 2);
        assert_ne!(other.id, first.id);
        assert_eq!(other.receive_count, 1);

        let cutoff = UniversalTimestamp(now.0 - Duration::seconds(30));
        let version = dal
            .inbox()
            .try_lock(first.id, first.version, "node-1", now, cutoff)
            .await
            .unwrap()
            .unwrap();
        assert!(dal
            .inbox()
            .try_lock(first.id, first.version, "node-2", now, cutoff)
            .await
            .unwrap()
            .is_none());

        let result = dal
            .inbox()
            .consume_with(first.id, "node-1", version, now, Vec::new())
            .await
            .unwrap();
        assert_eq!(result, ConsumeResult::Consumed { outbox_id: None });
        assert!(dal.inbox().get(message_id, "billing").await.unwrap().unwrap().is_consumed());
    }
}
