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

//! Time Ticker Data Access Layer
//!
//! One-shot jobs and batches. A pending ticker is keyed by
//! `(status, execution_time, function, request)` through a partial unique
//! index over Idle rows, so scheduling the same job for the same instant
//! twice yields the existing row.
//!
//! Batch children without an execution time are invisible to the due query.
//! [`TimeTickerDAL::resolve_children`] assigns them a time (or skips them)
//! once their gating set has settled; every write it makes is conditional on
//! `status = 'Idle' AND execution_time IS NULL`, so concurrent resolvers
//! cannot release a child twice.

use super::models::{
    blob_to_uuid, convert_all, current_timestamp_string, intervals_to_json, timestamp_to_string,
    uuid_to_blob, NewSqliteTimeTicker, SqliteTimeTicker,
};
use super::{is_unique_violation, DAL, PARENT_REMOVED_REASON, SUPERSEDED_REASON};
use crate::database::schema::time_tickers;
use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use crate::error::{RegistrationError, ValidationError};
use crate::models::{
    BatchResolution, ConditionResolution, NewBatchChild, NewTimeTicker, RegistrationOutcome,
    RunCondition, TickerStatus, TimeTicker, TimeTickerBatch,
};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Text};
use diesel::sqlite::SqliteConnection;
use tracing::{debug, info};

const PRUNABLE_FILTER: &str = "status IN ('Executed', 'Failed', 'Skipped') \
     AND updated_at < ? \
     AND NOT EXISTS (SELECT 1 FROM time_tickers c \
                     WHERE c.parent_id = time_tickers.id AND c.status IN ('Idle', 'Locked'))";

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    count: i64,
}

const MAX_SIBLING_OFFSETS: i64 = 1_000;

enum ReleaseResult {
    Released,
    Superseded,
    Unchanged,
}

pub struct TimeTickerDAL<'a> {
    dal: &'a DAL,
}

impl<'a> TimeTickerDAL<'a> {
    pub fn new(dal: &'a DAL) -> Self {
        Self { dal }
    }

    /// Schedules a standalone ticker. A missing execution time means `now`.
    ///
    /// # Returns
    /// * `Existing` - an identical pending ticker exists, or the init
    ///   identifier names a ticker that is unchanged or no longer Idle
    /// * `Updated` - an Idle ticker with the same init identifier was rewritten
    ///
    /// # Errors
    /// `DuplicatePending` when rescheduling by init identifier would land on
    /// the key of another pending ticker.
    pub async fn create(
        &self,
        new_ticker: NewTimeTicker,
        now: UniversalTimestamp,
    ) -> Result<RegistrationOutcome<TimeTicker>, RegistrationError> {
        let conn = self.dal.database.get_connection().await?;
        let intervals_json = intervals_to_json(&new_ticker.retry_intervals)?;
        let execution_time = timestamp_to_string(&new_ticker.execution_time.unwrap_or(now));

        let outcome = conn
            .interact(move |conn| {
                conn.immediate_transaction::<_, RegistrationError, _>(|conn| {
                    if let Some(identifier) = new_ticker.init_identifier.as_deref() {
                        if let Some(row) = by_init_identifier(conn, identifier)? {
                            let current = TimeTicker::try_from(row)?;
                            let unchanged = current.function == new_ticker.function
                                && current.request == new_ticker.request
                                && current.retries == new_ticker.retries
                                && current.retry_intervals == new_ticker.retry_intervals
                                && current.description == new_ticker.description
                                && new_ticker
                                    .execution_time
                                    .map_or(true, |t| current.execution_time == Some(t));

                            if unchanged || current.status != TickerStatus::Idle {
                                return Ok(RegistrationOutcome::Existing(current));
                            }

                            let id_blob = uuid_to_blob(&current.id);
                            let time = match new_ticker.execution_time {
                                Some(t) => Some(timestamp_to_string(&t)),
                                None => current.execution_time.as_ref().map(timestamp_to_string),
                            };
                            let result = diesel::update(
                                time_tickers::table
                                    .filter(time_tickers::id.eq(&id_blob))
                                    .filter(time_tickers::status.eq(TickerStatus::Idle.as_str())),
                            )
                            .set((
                                time_tickers::function.eq(&new_ticker.function),
                                time_tickers::request.eq(&new_ticker.request),
                                time_tickers::retries.eq(new_ticker.retries),
                                time_tickers::retry_intervals.eq(&intervals_json),
                                time_tickers::description.eq(&new_ticker.description),
                                time_tickers::execution_time.eq(&time),
                                time_tickers::version.eq(time_tickers::version + 1),
                                time_tickers::updated_at.eq(current_timestamp_string()),
                            ))
                            .execute(conn);

                            if let Err(e) = result {
                                return Err(pending_conflict_or(
                                    conn,
                                    e,
                                    time.as_deref(),
                                    &new_ticker.function,
                                    &new_ticker.request,
                                ));
                            }

                            let row = load(conn, &id_blob)?;
                            return Ok(RegistrationOutcome::Updated(TimeTicker::try_from(row)?));
                        }
                    }

                    if let Some(row) = pending_duplicate(
                        conn,
                        Some(execution_time.as_str()),
                        &new_ticker.function,
                        &new_ticker.request,
                    )? {
                        return Ok(RegistrationOutcome::Existing(TimeTicker::try_from(row)?));
                    }

                    let id = UniversalUuid::new_v4();
                    let row = new_row(
                        &id,
                        &new_ticker,
                        intervals_json.clone(),
                        Some(execution_time.clone()),
                        None,
                        None,
                    );
                    insert_checked(conn, &row)?;

                    let stored = load(conn, &row.id)?;
                    Ok(RegistrationOutcome::Created(TimeTicker::try_from(stored)?))
                })
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        match &outcome {
            RegistrationOutcome::Created(t) => info!(
                "Scheduled time ticker {} for {} at {:?}",
                t.id, t.function, t.execution_time
            ),
            RegistrationOutcome::Updated(t) => info!("Rescheduled time ticker {}", t.id),
            RegistrationOutcome::Existing(t) => debug!("Time ticker {} already scheduled", t.id),
        }
        Ok(outcome)
    }

    /// Stores a parent and its children in one transaction.
    ///
    /// Conditional children are stored without an execution time; callers
    /// validate that none was supplied. A parent carrying a known init
    /// identifier returns the stored batch unchanged.
    pub async fn create_batch(
        &self,
        parent: NewTimeTicker,
        children: Vec<NewBatchChild>,
        now: UniversalTimestamp,
    ) -> Result<RegistrationOutcome<TimeTickerBatch>, RegistrationError> {
        let conn = self.dal.database.get_connection().await?;

        let parent_id = UniversalUuid::new_v4();
        let parent_row = new_row(
            &parent_id,
            &parent,
            intervals_to_json(&parent.retry_intervals)?,
            Some(timestamp_to_string(&parent.execution_time.unwrap_or(now))),
            None,
            None,
        );

        let mut child_rows = Vec::with_capacity(children.len());
        for child in &children {
            let time = if child.run_condition.is_conditional() {
                None
            } else {
                child.ticker.execution_time.as_ref().map(timestamp_to_string)
            };
            child_rows.push(new_row(
                &UniversalUuid::new_v4(),
                &child.ticker,
                intervals_to_json(&child.ticker.retry_intervals)?,
                time,
                Some(uuid_to_blob(&parent_id)),
                Some(child.run_condition),
            ));
        }
        let init_identifier = parent.init_identifier.clone();

        let outcome = conn
            .interact(move |conn| {
                conn.immediate_transaction::<_, RegistrationError, _>(|conn| {
                    if let Some(identifier) = init_identifier.as_deref() {
                        if let Some(row) = by_init_identifier(conn, identifier)? {
                            let parent = TimeTicker::try_from(row)?;
                            let children = convert_all(children_of(conn, &parent.id.to_blob())?)?;
                            return Ok(RegistrationOutcome::Existing(TimeTickerBatch {
                                parent,
                                children,
                            }));
                        }
                    }

                    insert_checked(conn, &parent_row)?;
                    for row in &child_rows {
                        insert_checked(conn, row)?;
                    }

                    let parent = TimeTicker::try_from(load(conn, &parent_row.id)?)?;
                    let mut children = Vec::with_capacity(child_rows.len());
                    for row in &child_rows {
                        children.push(TimeTicker::try_from(load(conn, &row.id)?)?);
                    }
                    Ok(RegistrationOutcome::Created(TimeTickerBatch { parent, children }))
                })
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        if let RegistrationOutcome::Created(batch) = &outcome {
            info!(
                "Scheduled batch {} ({}) with {} child(ren)",
                batch.parent.id,
                batch.parent.function,
                batch.children.len()
            );
        }
        Ok(outcome)
    }

    pub async fn get(&self, id: UniversalUuid) -> Result<Option<TimeTicker>, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let id_blob = uuid_to_blob(&id);

        let row = conn
            .interact(move |conn| load(conn, &id_blob).optional())
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        row.map(TimeTicker::try_from).transpose()
    }

    /// Tickers ordered by execution time, optionally filtered by status.
    pub async fn list(
        &self,
        status: Option<TickerStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TimeTicker>, ValidationError> {
        let conn = self.dal.database.get_connection().await?;

        let rows: Vec<SqliteTimeTicker> = conn
            .interact(move |conn| {
                let mut query = time_tickers::table.into_boxed();
                if let Some(status) = status {
                    query = query.filter(time_tickers::status.eq(status.as_str()));
                }
                query
                    .select(SqliteTimeTicker::as_select())
                    .order((
                        time_tickers::execution_time.asc(),
                        time_tickers::created_at.asc(),
                    ))
                    .limit(limit)
                    .offset(offset)
                    .load(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        convert_all(rows)
    }

    /// All children of a batch parent.
    pub async fn children(&self, parent_id: UniversalUuid) -> Result<Vec<TimeTicker>, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let parent_blob = uuid_to_blob(&parent_id);

        let rows = conn
            .interact(move |conn| children_of(conn, &parent_blob))
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        convert_all(rows)
    }

    /// Releases or skips the parent's unresolved children whose gating set
    /// has settled.
    ///
    /// Unconditional children without a time are released as soon as the
    /// parent is terminal. Conditional children are evaluated against the
    /// parent plus every unconditional sibling. A released child that would
    /// duplicate an identical pending ticker outside its batch is skipped as
    /// superseded; identical siblings are spread over consecutive
    /// microseconds instead.
    pub async fn resolve_children(
        &self,
        parent_id: UniversalUuid,
        now: UniversalTimestamp,
    ) -> Result<BatchResolution, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let parent_blob = uuid_to_blob(&parent_id);

        let resolution = conn
            .interact(move |conn| {
                conn.immediate_transaction::<_, ValidationError, _>(|conn| {
                    let Some(parent) = load(conn, &parent_blob).optional()? else {
                        return Ok(BatchResolution::default());
                    };
                    let parent = TimeTicker::try_from(parent)?;
                    let children: Vec<TimeTicker> =
                        convert_all(children_of(conn, &parent_blob)?)?;

                    let mut gating = vec![parent.status];
                    gating.extend(children.iter().filter(|c| c.is_gating()).map(|c| c.status));

                    let mut resolution = BatchResolution::default();
                    let unresolved = children
                        .iter()
                        .filter(|c| c.status == TickerStatus::Idle && c.execution_time.is_none());

                    for child in unresolved {
                        let condition = child.run_condition.unwrap_or(RunCondition::Unconditional);
                        let decision = if condition.is_conditional() {
                            condition.evaluate(&gating)
                        } else if parent.status.is_terminal() {
                            ConditionResolution::Release
                        } else {
                            ConditionResolution::Pending
                        };

                        let child_blob = uuid_to_blob(&child.id);
                        match decision {
                            ConditionResolution::Pending => {}
                            ConditionResolution::Release => {
                                match release(conn, child, &parent_blob, now)? {
                                    ReleaseResult::Released => resolution.released.push(child.id),
                                    ReleaseResult::Superseded => resolution.skipped.push(child.id),
                                    ReleaseResult::Unchanged => {}
                                }
                            }
                            ConditionResolution::Skip(reason) => {
                                if skip_unresolved(conn, &child_blob, &reason)? == 1 {
                                    resolution.skipped.push(child.id);
                                }
                            }
                        }
                    }
                    Ok(resolution)
                })
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        if !resolution.is_empty() {
            info!(
                "Resolved batch {}: {} released, {} skipped",
                parent_id,
                resolution.released.len(),
                resolution.skipped.len()
            );
        }
        Ok(resolution)
    }

    /// Parents that still have children waiting for resolution.
    pub async fn parents_with_unresolved_children(
        &self,
    ) -> Result<Vec<UniversalUuid>, ValidationError> {
        let conn = self.dal.database.get_connection().await?;

        let parents: Vec<Option<Vec<u8>>> = conn
            .interact(|conn| {
                time_tickers::table
                    .filter(time_tickers::status.eq(TickerStatus::Idle.as_str()))
                    .filter(time_tickers::execution_time.is_null())
                    .filter(time_tickers::parent_id.is_not_null())
                    .select(time_tickers::parent_id)
                    .distinct()
                    .load(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        parents
            .into_iter()
            .flatten()
            .map(|blob| blob_to_uuid(&blob, "time_tickers", "parent_id"))
            .collect()
    }

    /// Removes a ticker that is not executing.
    ///
    /// Unresolved children of a removed parent are skipped first so none is
    /// left without a way to become due.
    pub async fn remove(&self, id: UniversalUuid) -> Result<(), RegistrationError> {
        let conn = self.dal.database.get_connection().await?;
        let id_blob = uuid_to_blob(&id);

        let orphaned = conn
            .interact(move |conn| {
                conn.immediate_transaction::<_, RegistrationError, _>(|conn| {
                    let row = load(conn, &id_blob)
                        .optional()?
                        .ok_or(RegistrationError::NotFound(id))?;
                    if row.status == TickerStatus::Locked.as_str() {
                        return Err(RegistrationError::Locked(id));
                    }

                    let orphaned = diesel::update(
                        time_tickers::table
                            .filter(time_tickers::parent_id.eq(&id_blob))
                            .filter(time_tickers::status.eq(TickerStatus::Idle.as_str()))
                            .filter(time_tickers::execution_time.is_null()),
                    )
                    .set((
                        time_tickers::status.eq(TickerStatus::Skipped.as_str()),
                        time_tickers::skipped_reason.eq(Some(PARENT_REMOVED_REASON)),
                        time_tickers::version.eq(time_tickers::version + 1),
                        time_tickers::updated_at.eq(current_timestamp_string()),
                    ))
                    .execute(conn)?;

                    diesel::delete(
                        time_tickers::table
                            .filter(time_tickers::id.eq(&id_blob))
                            .filter(time_tickers::status.ne(TickerStatus::Locked.as_str())),
                    )
                    .execute(conn)?;
                    Ok(orphaned)
                })
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        info!("Removed time ticker {} ({} child(ren) skipped)", id, orphaned);
        Ok(())
    }

    /// Deletes terminal tickers last touched before `cutoff` that have no
    /// pending children.
    pub async fn delete_terminal_before(
        &self,
        cutoff: UniversalTimestamp,
    ) -> Result<usize, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let cutoff_str = timestamp_to_string(&cutoff);

        let deleted = conn
            .interact(move |conn| {
                diesel::sql_query(format!("DELETE FROM time_tickers WHERE {}", PRUNABLE_FILTER))
                    .bind::<Text, _>(cutoff_str)
                    .execute(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(deleted)
    }

    pub async fn count_terminal_before(
        &self,
        cutoff: UniversalTimestamp,
    ) -> Result<i64, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let cutoff_str = timestamp_to_string(&cutoff);

        let row: CountRow = conn
            .interact(move |conn| {
                diesel::sql_query(format!(
                    "SELECT COUNT(*) AS count FROM time_tickers WHERE {}",
                    PRUNABLE_FILTER
                ))
                .bind::<Text, _>(cutoff_str)
                .get_result(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(row.count)
    }
}

fn new_row(
    id: &UniversalUuid,
    ticker: &NewTimeTicker,
    retry_intervals: String,
    execution_time: Option<String>,
    parent_id: Option<Vec<u8>>,
    run_condition: Option<RunCondition>,
) -> NewSqliteTimeTicker {
    let now = current_timestamp_string();
    NewSqliteTimeTicker {
        id: uuid_to_blob(id),
        function: ticker.function.clone(),
        request: ticker.request.clone(),
        retries: ticker.retries,
        retry_intervals,
        description: ticker.description.clone(),
        init_identifier: ticker.init_identifier.clone(),
        status: TickerStatus::Idle.as_str().to_string(),
        execution_time,
        parent_id,
        run_condition: run_condition.map(|c| c.as_str().to_string()),
        created_at: now.clone(),
        updated_at: now,
    }
}

fn load(conn: &mut SqliteConnection, id_blob: &[u8]) -> QueryResult<SqliteTimeTicker> {
    time_tickers::table
        .filter(time_tickers::id.eq(id_blob))
        .select(SqliteTimeTicker::as_select())
        .first(conn)
}

fn by_init_identifier(
    conn: &mut SqliteConnection,
    identifier: &str,
) -> QueryResult<Option<SqliteTimeTicker>> {
    time_tickers::table
        .filter(time_tickers::init_identifier.eq(identifier))
        .select(SqliteTimeTicker::as_select())
        .first(conn)
        .optional()
}

fn children_of(
    conn: &mut SqliteConnection,
    parent_blob: &[u8],
) -> QueryResult<Vec<SqliteTimeTicker>> {
    time_tickers::table
        .filter(time_tickers::parent_id.eq(parent_blob))
        .select(SqliteTimeTicker::as_select())
        .order(time_tickers::created_at.asc())
        .load(conn)
}

fn pending_duplicate(
    conn: &mut SqliteConnection,
    execution_time: Option<&str>,
    function: &str,
    request: &[u8],
) -> QueryResult<Option<SqliteTimeTicker>> {
    let Some(execution_time) = execution_time else {
        return Ok(None);
    };
    time_tickers::table
        .filter(time_tickers::status.eq(TickerStatus::Idle.as_str()))
        .filter(time_tickers::execution_time.eq(execution_time))
        .filter(time_tickers::function.eq(function))
        .filter(time_tickers::request.eq(request))
        .select(SqliteTimeTicker::as_select())
        .first(conn)
        .optional()
}

/// Maps a violation of the pending-ticker key to `DuplicatePending`.
fn pending_conflict_or(
    conn: &mut SqliteConnection,
    err: diesel::result::Error,
    execution_time: Option<&str>,
    function: &str,
    request: &[u8],
) -> RegistrationError {
    if !is_unique_violation(&err) {
        return err.into();
    }
    match pending_duplicate(conn, execution_time, function, request) {
        Ok(Some(row)) => match blob_to_uuid(&row.id, "time_tickers", "id") {
            Ok(existing) => RegistrationError::DuplicatePending {
                existing,
                function: row.function,
            },
            Err(e) => e.into(),
        },
        Ok(None) => err.into(),
        Err(lookup) => lookup.into(),
    }
}

fn insert_checked(
    conn: &mut SqliteConnection,
    row: &NewSqliteTimeTicker,
) -> Result<(), RegistrationError> {
    match diesel::insert_into(time_tickers::table).values(row).execute(conn) {
        Ok(_) => Ok(()),
        Err(e) => Err(pending_conflict_or(
            conn,
            e,
            row.execution_time.as_deref(),
            &row.function,
            &row.request,
        )),
    }
}

fn skip_unresolved(
    conn: &mut SqliteConnection,
    child_blob: &[u8],
    reason: &str,
) -> QueryResult<usize> {
    diesel::update(
        time_tickers::table
            .filter(time_tickers::id.eq(child_blob))
            .filter(time_tickers::status.eq(TickerStatus::Idle.as_str()))
            .filter(time_tickers::execution_time.is_null()),
    )
    .set((
        time_tickers::status.eq(TickerStatus::Skipped.as_str()),
        time_tickers::skipped_reason.eq(Some(reason.to_string())),
        time_tickers::version.eq(time_tickers::version + 1),
        time_tickers::updated_at.eq(current_timestamp_string()),
    ))
    .execute(conn)
}

/// Assigns `now` to an unresolved child inside a savepoint.
///
/// An identical sibling already released at the same instant moves the
/// child one microsecond later; any other pending duplicate supersedes it.
fn release(
    conn: &mut SqliteConnection,
    child: &TimeTicker,
    parent_blob: &[u8],
    now: UniversalTimestamp,
) -> QueryResult<ReleaseResult> {
    let child_blob = uuid_to_blob(&child.id);

    for offset in 0..MAX_SIBLING_OFFSETS {
        let at = timestamp_to_string(&UniversalTimestamp(
            now.0 + chrono::Duration::microseconds(offset),
        ));
        let attempt = conn.transaction::<usize, diesel::result::Error, _>(|conn| {
            diesel::update(
                time_tickers::table
                    .filter(time_tickers::id.eq(&child_blob))
                    .filter(time_tickers::status.eq(TickerStatus::Idle.as_str()))
                    .filter(time_tickers::execution_time.is_null()),
            )
            .set((
                time_tickers::execution_time.eq(Some(at.clone())),
                time_tickers::version.eq(time_tickers::version + 1),
                time_tickers::updated_at.eq(current_timestamp_string()),
            ))
            .execute(conn)
        });

        match attempt {
            Ok(1) => return Ok(ReleaseResult::Released),
            Ok(_) => return Ok(ReleaseResult::Unchanged),
            Err(e) if is_unique_violation(&e) => {
                let holder =
                    pending_duplicate(conn, Some(at.as_str()), &child.function, &child.request)?;
                let sibling = holder
                    .as_ref()
                    .is_some_and(|row| row.parent_id.as_deref() == Some(parent_blob));
                if !sibling {
                    break;
                }
            }
            Err(e) => return Err(e),
        }
    }

    skip_unresolved(conn, &child_blob, SUPERSEDED_REASON)?;
    Ok(ReleaseResult::Superseded)
}
