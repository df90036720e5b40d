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

//! Execution Data Access Layer
//!
//! Leasing and outcome recording for both schedulable tables. Cron
//! occurrences and time tickers share their execution columns, so every
//! statement here is written once and aimed at the table named by
//! [`TickerKind`].
//!
//! The conditional `UPDATE` is the only mutual-exclusion primitive:
//!
//! | Step    | Guard                                                       |
//! |---------|-------------------------------------------------------------|
//! | lease   | `status = 'Idle' AND version = ?`                           |
//! | reclaim | `status = 'Locked' AND version = ?`                         |
//! | record  | `status = 'Locked' AND lock_holder = ? AND version = ?`     |
//! | skip    | `status = 'Idle'`                                           |
//!
//! Each successful write bumps `version`, so a worker holding an old lease
//! can never overwrite the state produced by a newer one.

use super::models::{blob_to_uuid, json_to_intervals, string_to_timestamp, timestamp_to_string, uuid_to_blob};
use super::outbox::stage_messages;
use super::{is_unique_violation, DAL, SUPERSEDED_REASON};
use crate::database::schema::{cron_ticker_occurrences, cron_tickers, time_tickers};
use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use crate::error::ValidationError;
use crate::models::{
    AttemptOutcome, DueTicker, Lease, LeaseOutcome, RecordResult, StaleLease, TickerEvent,
    TickerKind, TickerStatus,
};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Binary, Integer, Nullable, Text};
use diesel::sqlite::SqliteConnection;
use tracing::{debug, info, warn};

const FENCE: &str = "WHERE id = ? AND status = 'Locked' AND lock_holder = ? AND version = ?";

type CronDueRow = (Vec<u8>, Vec<u8>, String, Vec<u8>, i32, String, i32, i32, String);
type TimeDueRow = (
    Vec<u8>,
    Option<Vec<u8>>,
    String,
    Vec<u8>,
    i32,
    String,
    i32,
    i32,
    Option<String>,
);

#[derive(QueryableByName)]
struct LockedRow {
    #[diesel(sql_type = Binary)]
    id: Vec<u8>,
    #[diesel(sql_type = Integer)]
    version: i32,
    #[diesel(sql_type = Nullable<Text>)]
    lock_holder: Option<String>,
}

pub struct ExecutionDAL<'a> {
    dal: &'a DAL,
}

impl<'a> ExecutionDAL<'a> {
    pub fn new(dal: &'a DAL) -> Self {
        Self { dal }
    }

    /// Idle rows with `execution_time <= now` whose function is in
    /// `functions`, earliest first, across both tables.
    ///
    /// Time tickers with no execution time are never returned.
    pub async fn due(
        &self,
        now: UniversalTimestamp,
        functions: &[String],
        limit: i64,
    ) -> Result<Vec<DueTicker>, ValidationError> {
        if functions.is_empty() || limit <= 0 {
            return Ok(Vec::new());
        }

        let conn = self.dal.database.get_connection().await?;
        let now_str = timestamp_to_string(&now);
        let functions = functions.to_vec();
        let idle = TickerStatus::Idle.as_str();

        let (cron_rows, time_rows) = conn
            .interact(move |conn| -> QueryResult<(Vec<CronDueRow>, Vec<TimeDueRow>)> {
                let cron_rows = cron_ticker_occurrences::table
                    .inner_join(cron_tickers::table)
                    .filter(cron_ticker_occurrences::status.eq(idle))
                    .filter(cron_ticker_occurrences::execution_time.le(&now_str))
                    .filter(cron_tickers::function.eq_any(&functions))
                    .order(cron_ticker_occurrences::execution_time.asc())
                    .limit(limit)
                    .select((
                        cron_ticker_occurrences::id,
                        cron_ticker_occurrences::cron_ticker_id,
                        cron_tickers::function,
                        cron_tickers::request,
                        cron_tickers::retries,
                        cron_tickers::retry_intervals,
                        cron_ticker_occurrences::retry_count,
                        cron_ticker_occurrences::version,
                        cron_ticker_occurrences::execution_time,
                    ))
                    .load::<CronDueRow>(conn)?;

                let time_rows = time_tickers::table
                    .filter(time_tickers::status.eq(idle))
                    .filter(time_tickers::execution_time.is_not_null())
                    .filter(time_tickers::execution_time.le(&now_str))
                    .filter(time_tickers::function.eq_any(&functions))
                    .order(time_tickers::execution_time.asc())
                    .limit(limit)
                    .select((
                        time_tickers::id,
                        time_tickers::parent_id,
                        time_tickers::function,
                        time_tickers::request,
                        time_tickers::retries,
                        time_tickers::retry_intervals,
                        time_tickers::retry_count,
                        time_tickers::version,
                        time_tickers::execution_time,
                    ))
                    .load::<TimeDueRow>(conn)?;

                Ok((cron_rows, time_rows))
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        let mut due = Vec::with_capacity(cron_rows.len() + time_rows.len());
        for (id, cron_ticker_id, function, request, retries, intervals, retry_count, version, time) in
            cron_rows
        {
            const T: &str = "cron_ticker_occurrences";
            due.push(DueTicker {
                kind: TickerKind::CronOccurrence,
                id: blob_to_uuid(&id, T, "id")?,
                cron_ticker_id: Some(blob_to_uuid(&cron_ticker_id, T, "cron_ticker_id")?),
                parent_id: None,
                function,
                request,
                retries,
                retry_intervals: json_to_intervals(&intervals, "cron_tickers")?,
                retry_count,
                version,
                execution_time: string_to_timestamp(&time, T, "execution_time")?,
            });
        }
        for (id, parent_id, function, request, retries, intervals, retry_count, version, time) in
            time_rows
        {
            const T: &str = "time_tickers";
            let Some(time) = time else { continue };
            due.push(DueTicker {
                kind: TickerKind::Time,
                id: blob_to_uuid(&id, T, "id")?,
                cron_ticker_id: None,
                parent_id: parent_id
                    .map(|p| blob_to_uuid(&p, T, "parent_id"))
                    .transpose()?,
                function,
                request,
                retries,
                retry_intervals: json_to_intervals(&intervals, T)?,
                retry_count,
                version,
                execution_time: string_to_timestamp(&time, T, "execution_time")?,
            });
        }

        due.sort_by(|a, b| a.execution_time.cmp(&b.execution_time));
        due.truncate(limit as usize);
        Ok(due)
    }

    /// Attempts to lease a due row for `holder`.
    ///
    /// Granted iff the row is still Idle at the version the due query saw.
    pub async fn try_lease(
        &self,
        due: &DueTicker,
        holder: &str,
        now: UniversalTimestamp,
    ) -> Result<LeaseOutcome, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let sql = format!(
            "UPDATE {} SET status = 'Locked', lock_holder = ?, locked_at = ?, \
             version = version + 1, updated_at = ? \
             WHERE id = ? AND status = 'Idle' AND version = ?",
            due.kind.table_name()
        );
        let holder_owned = holder.to_string();
        let now_str = timestamp_to_string(&now);
        let id_blob = uuid_to_blob(&due.id);
        let version = due.version;

        let affected = conn
            .interact(move |conn| {
                diesel::sql_query(sql)
                    .bind::<Text, _>(holder_owned)
                    .bind::<Text, _>(&now_str)
                    .bind::<Text, _>(&now_str)
                    .bind::<Binary, _>(id_blob)
                    .bind::<Integer, _>(version)
                    .execute(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        if affected == 1 {
            debug!("Leased {} {} as {}", due.kind, due.id, holder);
            Ok(LeaseOutcome::Granted(Lease {
                kind: due.kind,
                id: due.id,
                holder: holder.to_string(),
                version: due.version + 1,
                locked_at: now,
            }))
        } else {
            debug!("Lease contention on {} {}", due.kind, due.id);
            Ok(LeaseOutcome::Contended)
        }
    }

    /// Locked rows whose lease was taken before `cutoff`.
    pub async fn find_stale(
        &self,
        cutoff: UniversalTimestamp,
        limit: i64,
    ) -> Result<Vec<StaleLease>, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let cutoff_str = timestamp_to_string(&cutoff);

        let rows = conn
            .interact(move |conn| -> QueryResult<Vec<(TickerKind, LockedRow)>> {
                let mut found = Vec::new();
                for kind in [TickerKind::CronOccurrence, TickerKind::Time] {
                    let sql = format!(
                        "SELECT id, version, lock_holder FROM {} \
                         WHERE status = 'Locked' AND locked_at < ? \
                         ORDER BY locked_at LIMIT ?",
                        kind.table_name()
                    );
                    let rows: Vec<LockedRow> = diesel::sql_query(sql)
                        .bind::<Text, _>(&cutoff_str)
                        .bind::<BigInt, _>(limit)
                        .load(conn)?;
                    found.extend(rows.into_iter().map(|r| (kind, r)));
                }
                Ok(found)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        rows.into_iter()
            .map(|(kind, row)| {
                Ok(StaleLease {
                    kind,
                    id: blob_to_uuid(&row.id, kind.table_name(), "id")?,
                    version: row.version,
                    lock_holder: row.lock_holder,
                })
            })
            .collect()
    }

    /// Resets a stale lease to Idle without touching `retry_count`.
    ///
    /// Returns `true` for the single caller whose CAS matched. If returning
    /// the row to Idle would duplicate an identical pending row, it is
    /// skipped as superseded instead.
    pub async fn reclaim(&self, stale: &StaleLease) -> Result<bool, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let table = stale.kind.table_name();
        let guard = "WHERE id = ? AND status = 'Locked' AND version = ?";
        let reset = format!(
            "UPDATE {} SET status = 'Idle', lock_holder = NULL, locked_at = NULL, \
             version = version + 1, updated_at = ? {}",
            table, guard
        );
        let supersede = format!(
            "UPDATE {} SET status = 'Skipped', skipped_reason = ?, \
             version = version + 1, updated_at = ? {}",
            table, guard
        );
        let id_blob = uuid_to_blob(&stale.id);
        let version = stale.version;
        let now_str = timestamp_to_string(&UniversalTimestamp::now());

        let won = conn
            .interact(move |conn| {
                conn.immediate_transaction::<_, diesel::result::Error, _>(|conn| {
                    let attempt = conn.transaction::<usize, diesel::result::Error, _>(|conn| {
                        diesel::sql_query(&reset)
                            .bind::<Text, _>(&now_str)
                            .bind::<Binary, _>(&id_blob)
                            .bind::<Integer, _>(version)
                            .execute(conn)
                    });
                    match attempt {
                        Ok(n) => Ok(n == 1),
                        Err(e) if is_unique_violation(&e) => {
                            let n = diesel::sql_query(&supersede)
                                .bind::<Text, _>(SUPERSEDED_REASON)
                                .bind::<Text, _>(&now_str)
                                .bind::<Binary, _>(&id_blob)
                                .bind::<Integer, _>(version)
                                .execute(conn)?;
                            Ok(n == 1)
                        }
                        Err(e) => Err(e),
                    }
                })
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        if won {
            info!(
                "Reclaimed stale lease on {} {} (holder {:?})",
                stale.kind, stale.id, stale.lock_holder
            );
        }
        Ok(won)
    }

    /// Hands a lease back without recording an attempt.
    pub async fn release(&self, lease: &Lease) -> Result<bool, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let sql = format!(
            "UPDATE {} SET status = 'Idle', lock_holder = NULL, locked_at = NULL, \
             version = version + 1, updated_at = ? {}",
            lease.kind.table_name(),
            FENCE
        );
        let id_blob = uuid_to_blob(&lease.id);
        let holder = lease.holder.clone();
        let version = lease.version;
        let now_str = timestamp_to_string(&UniversalTimestamp::now());

        let affected = conn
            .interact(move |conn| {
                diesel::sql_query(sql)
                    .bind::<Text, _>(now_str)
                    .bind::<Binary, _>(id_blob)
                    .bind::<Text, _>(holder)
                    .bind::<Integer, _>(version)
                    .execute(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(affected == 1)
    }

    /// Writes the outcome of an attempt, fenced by the lease.
    ///
    /// When `notify` names an address, a [`TickerEvent`] describing the new
    /// state is staged in the outbox inside the same transaction. A fenced
    /// write stages nothing.
    pub async fn record(
        &self,
        due: &DueTicker,
        lease: &Lease,
        outcome: AttemptOutcome,
        now: UniversalTimestamp,
        notify: Option<&str>,
    ) -> Result<RecordResult, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let table = lease.kind.table_name();
        let id_blob = uuid_to_blob(&lease.id);
        let holder = lease.holder.clone();
        let version = lease.version;
        let now_str = timestamp_to_string(&now);
        let notify = notify.map(str::to_string);

        let mut event = TickerEvent {
            kind: lease.kind,
            ticker_id: lease.id,
            cron_ticker_id: due.cron_ticker_id,
            function: due.function.clone(),
            status: TickerStatus::Executed,
            retry_count: due.retry_count,
            elapsed_ms: 0,
            next_execution_time: None,
            message: None,
            occurred_at: now,
        };

        let result = conn
            .interact(move |conn| {
                conn.immediate_transaction::<_, ValidationError, _>(|conn| {
                    let result = apply_outcome(
                        conn,
                        table,
                        &id_blob,
                        &holder,
                        version,
                        &now_str,
                        &outcome,
                    )?;

                    match (&result, &outcome) {
                        (RecordResult::Fenced, _) => return Ok(result),
                        (RecordResult::Superseded, AttemptOutcome::RetryScheduled { elapsed_ms, message, .. }) => {
                            event.status = TickerStatus::Skipped;
                            event.elapsed_ms = *elapsed_ms;
                            event.message = Some(message.clone());
                        }
                        (_, AttemptOutcome::Succeeded { elapsed_ms }) => {
                            event.elapsed_ms = *elapsed_ms;
                        }
                        (_, AttemptOutcome::RetryScheduled { elapsed_ms, retry_count, next_execution_time, message }) => {
                            event.status = TickerStatus::Idle;
                            event.elapsed_ms = *elapsed_ms;
                            event.retry_count = *retry_count;
                            event.next_execution_time = Some(*next_execution_time);
                            event.message = Some(message.clone());
                        }
                        (_, AttemptOutcome::Failed { elapsed_ms, message }) => {
                            event.status = TickerStatus::Failed;
                            event.elapsed_ms = *elapsed_ms;
                            event.message = Some(message.clone());
                        }
                    }

                    if let Some(address) = notify.as_deref() {
                        stage_messages(conn, &[event.to_outbox_message(address)?])?;
                    }
                    Ok(result)
                })
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        match result {
            RecordResult::Applied => {}
            RecordResult::Fenced => warn!(
                "Discarded outcome for {} {}: lease held by {} at version {} was lost",
                lease.kind, lease.id, lease.holder, lease.version
            ),
            RecordResult::Superseded => info!(
                "Retry of {} {} collided with an existing schedule; marked Skipped",
                lease.kind, lease.id
            ),
        }
        Ok(result)
    }

    /// Operator cancellation: moves an Idle row to Skipped.
    ///
    /// Returns `false` if the row is missing or no longer Idle (a granted
    /// lease runs to completion).
    pub async fn skip(
        &self,
        kind: TickerKind,
        id: UniversalUuid,
        reason: &str,
    ) -> Result<bool, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let sql = format!(
            "UPDATE {} SET status = 'Skipped', skipped_reason = ?, \
             version = version + 1, updated_at = ? \
             WHERE id = ? AND status = 'Idle'",
            kind.table_name()
        );
        let reason = reason.to_string();
        let id_blob = uuid_to_blob(&id);
        let now_str = timestamp_to_string(&UniversalTimestamp::now());

        let affected = conn
            .interact(move |conn| {
                diesel::sql_query(sql)
                    .bind::<Text, _>(reason)
                    .bind::<Text, _>(now_str)
                    .bind::<Binary, _>(id_blob)
                    .execute(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        if affected == 1 {
            info!("Skipped {} {}", kind, id);
        }
        Ok(affected == 1)
    }
}

fn apply_outcome(
    conn: &mut SqliteConnection,
    table: &str,
    id_blob: &[u8],
    holder: &str,
    version: i32,
    now_str: &str,
    outcome: &AttemptOutcome,
) -> Result<RecordResult, ValidationError> {
    let affected = match outcome {
        AttemptOutcome::Succeeded { elapsed_ms } => diesel::sql_query(format!(
            "UPDATE {} SET status = 'Executed', executed_at = ?, elapsed_time = ?, \
             exception_message = NULL, version = version + 1, updated_at = ? {}",
            table, FENCE
        ))
        .bind::<Text, _>(now_str)
        .bind::<BigInt, _>(*elapsed_ms)
        .bind::<Text, _>(now_str)
        .bind::<Binary, _>(id_blob)
        .bind::<Text, _>(holder)
        .bind::<Integer, _>(version)
        .execute(conn)?,

        AttemptOutcome::Failed {
            elapsed_ms,
            message,
        } => diesel::sql_query(format!(
            "UPDATE {} SET status = 'Failed', executed_at = ?, elapsed_time = ?, \
             exception_message = ?, version = version + 1, updated_at = ? {}",
            table, FENCE
        ))
        .bind::<Text, _>(now_str)
        .bind::<BigInt, _>(*elapsed_ms)
        .bind::<Text, _>(message)
        .bind::<Text, _>(now_str)
        .bind::<Binary, _>(id_blob)
        .bind::<Text, _>(holder)
        .bind::<Integer, _>(version)
        .execute(conn)?,

        AttemptOutcome::RetryScheduled {
            elapsed_ms,
            retry_count,
            next_execution_time,
            message,
        } => {
            let next = timestamp_to_string(next_execution_time);
            let attempt = conn.transaction::<usize, diesel::result::Error, _>(|conn| {
                diesel::sql_query(format!(
                    "UPDATE {} SET status = 'Idle', lock_holder = NULL, locked_at = NULL, \
                     execution_time = ?, retry_count = ?, elapsed_time = ?, \
                     exception_message = ?, version = version + 1, updated_at = ? {}",
                    table, FENCE
                ))
                .bind::<Text, _>(&next)
                .bind::<Integer, _>(*retry_count)
                .bind::<BigInt, _>(*elapsed_ms)
                .bind::<Text, _>(message)
                .bind::<Text, _>(now_str)
                .bind::<Binary, _>(id_blob)
                .bind::<Text, _>(holder)
                .bind::<Integer, _>(version)
                .execute(conn)
            });

            match attempt {
                Ok(n) => n,
                Err(e) if is_unique_violation(&e) => {
                    let n = diesel::sql_query(format!(
                        "UPDATE {} SET status = 'Skipped', skipped_reason = ?, elapsed_time = ?, \
                         exception_message = ?, version = version + 1, updated_at = ? {}",
                        table, FENCE
                    ))
                    .bind::<Text, _>(SUPERSEDED_REASON)
                    .bind::<BigInt, _>(*elapsed_ms)
                    .bind::<Text, _>(message)
                    .bind::<Text, _>(now_str)
                    .bind::<Binary, _>(id_blob)
                    .bind::<Text, _>(holder)
                    .bind::<Integer, _>(version)
                    .execute(conn)?;
                    return Ok(if n == 1 {
                        RecordResult::Superseded
                    } else {
                        RecordResult::Fenced
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    };

    Ok(if affected == 1 {
        RecordResult::Applied
    } else {
        RecordResult::Fenced
    })
}
