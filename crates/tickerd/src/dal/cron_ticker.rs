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

//! Cron Ticker Data Access Layer
//!
//! Stores recurring job definitions. Registration is idempotent in two ways:
//!
//! - the `(function, expression, request)` triple is unique, so registering
//!   the same job twice returns the stored definition;
//! - a definition carrying an `init_identifier` is upserted by that
//!   identifier, which lets code or config seed definitions on every start.
//!
//! Changing a definition's expression deletes its pending first-attempt
//! occurrences in the same transaction; the expansion engine then
//! re-materializes them from the new expression.

use super::models::{
    convert_all, current_timestamp_string, intervals_to_json, uuid_to_blob, NewSqliteCronTicker,
    SqliteCronTicker,
};
use super::{is_unique_violation, DAL};
use crate::database::schema::{cron_ticker_occurrences, cron_tickers};
use crate::database::universal_types::UniversalUuid;
use crate::error::{RegistrationError, ValidationError};
use crate::models::{
    CronTicker, CronTickerUpdate, NewCronTicker, RegistrationOutcome, TickerStatus,
};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use tracing::{debug, info};

/// Data Access Layer for recurring job definitions.
pub struct CronTickerDAL<'a> {
    dal: &'a DAL,
}

impl<'a> CronTickerDAL<'a> {
    pub fn new(dal: &'a DAL) -> Self {
        Self { dal }
    }

    /// Stores a definition, or returns the one it duplicates.
    ///
    /// # Returns
    /// * `Created` - a new row was inserted
    /// * `Existing` - the triple (or the init identifier with an identical
    ///   definition) already existed
    /// * `Updated` - a row with the same init identifier was rewritten
    ///
    /// # Errors
    /// `RegistrationError::Duplicate` if rewriting an init-identified row
    /// would collide with another definition's triple.
    pub async fn create(
        &self,
        new_ticker: NewCronTicker,
    ) -> Result<RegistrationOutcome<CronTicker>, RegistrationError> {
        let conn = self.dal.database.get_connection().await?;
        let intervals_json = intervals_to_json(&new_ticker.retry_intervals)?;

        let outcome = conn
            .interact(move |conn| {
                conn.immediate_transaction::<_, RegistrationError, _>(|conn| {
                    if let Some(identifier) = new_ticker.init_identifier.as_deref() {
                        let existing: Option<SqliteCronTicker> = cron_tickers::table
                            .filter(cron_tickers::init_identifier.eq(identifier))
                            .select(SqliteCronTicker::as_select())
                            .first(conn)
                            .optional()?;

                        if let Some(row) = existing {
                            let current = CronTicker::try_from(row)?;
                            if current.same_definition(&new_ticker) {
                                return Ok(RegistrationOutcome::Existing(current));
                            }

                            let id_blob = uuid_to_blob(&current.id);
                            let result = diesel::update(
                                cron_tickers::table.filter(cron_tickers::id.eq(&id_blob)),
                            )
                            .set((
                                cron_tickers::expression.eq(&new_ticker.expression),
                                cron_tickers::function.eq(&new_ticker.function),
                                cron_tickers::request.eq(&new_ticker.request),
                                cron_tickers::retries.eq(new_ticker.retries),
                                cron_tickers::retry_intervals.eq(&intervals_json),
                                cron_tickers::description.eq(&new_ticker.description),
                                cron_tickers::updated_at.eq(current_timestamp_string()),
                            ))
                            .execute(conn);

                            if let Err(e) = result {
                                return Err(conflict_or(
                                    conn,
                                    e,
                                    &new_ticker.function,
                                    &new_ticker.expression,
                                    &new_ticker.request,
                                ));
                            }

                            if current.expression != new_ticker.expression {
                                let removed = delete_pending_occurrences(conn, &id_blob)?;
                                debug!(
                                    "Removed {} pending occurrence(s) of cron ticker {}",
                                    removed, current.id
                                );
                            }

                            let row = load(conn, &id_blob)?;
                            return Ok(RegistrationOutcome::Updated(CronTicker::try_from(row)?));
                        }
                    }

                    if let Some(row) = find_by_definition(
                        conn,
                        &new_ticker.function,
                        &new_ticker.expression,
                        &new_ticker.request,
                    )? {
                        return Ok(RegistrationOutcome::Existing(CronTicker::try_from(row)?));
                    }

                    let id = UniversalUuid::new_v4();
                    let now = current_timestamp_string();
                    let row = NewSqliteCronTicker {
                        id: uuid_to_blob(&id),
                        expression: new_ticker.expression.clone(),
                        function: new_ticker.function.clone(),
                        request: new_ticker.request.clone(),
                        retries: new_ticker.retries,
                        retry_intervals: intervals_json.clone(),
                        description: new_ticker.description.clone(),
                        init_identifier: new_ticker.init_identifier.clone(),
                        created_at: now.clone(),
                        updated_at: now,
                    };
                    diesel::insert_into(cron_tickers::table)
                        .values(&row)
                        .execute(conn)?;

                    let stored = load(conn, &row.id)?;
                    Ok(RegistrationOutcome::Created(CronTicker::try_from(stored)?))
                })
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        match &outcome {
            RegistrationOutcome::Created(t) => info!(
                "Registered cron ticker {} ('{}' -> {})",
                t.id, t.expression, t.function
            ),
            RegistrationOutcome::Updated(t) => info!(
                "Updated cron ticker {} ('{}' -> {})",
                t.id, t.expression, t.function
            ),
            RegistrationOutcome::Existing(t) => {
                debug!("Cron ticker {} already registered", t.id)
            }
        }
        Ok(outcome)
    }

    /// Retrieves a definition by id.
    pub async fn get(&self, id: UniversalUuid) -> Result<Option<CronTicker>, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let id_blob = uuid_to_blob(&id);

        let row: Option<SqliteCronTicker> = conn
            .interact(move |conn| {
                cron_tickers::table
                    .filter(cron_tickers::id.eq(&id_blob))
                    .select(SqliteCronTicker::as_select())
                    .first(conn)
                    .optional()
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        row.map(CronTicker::try_from).transpose()
    }

    /// Retrieves a definition by its init identifier.
    pub async fn get_by_init_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<CronTicker>, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let identifier = identifier.to_string();

        let row: Option<SqliteCronTicker> = conn
            .interact(move |conn| {
                cron_tickers::table
                    .filter(cron_tickers::init_identifier.eq(identifier))
                    .select(SqliteCronTicker::as_select())
                    .first(conn)
                    .optional()
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        row.map(CronTicker::try_from).transpose()
    }

    /// Lists definitions ordered by creation time.
    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<CronTicker>, ValidationError> {
        let conn = self.dal.database.get_connection().await?;

        let rows: Vec<SqliteCronTicker> = conn
            .interact(move |conn| {
                cron_tickers::table
                    .select(SqliteCronTicker::as_select())
                    .order((cron_tickers::created_at.asc(), cron_tickers::id.asc()))
                    .limit(limit)
                    .offset(offset)
                    .load(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        convert_all(rows)
    }

    /// Every definition; used by the expansion sweep.
    pub async fn list_all(&self) -> Result<Vec<CronTicker>, ValidationError> {
        self.list(i64::MAX, 0).await
    }

    /// Applies an operator edit.
    ///
    /// Pending first-attempt occurrences are deleted when the expression
    /// changes; retrying occurrences keep their slot.
    pub async fn update(
        &self,
        id: UniversalUuid,
        update: CronTickerUpdate,
    ) -> Result<CronTicker, RegistrationError> {
        let conn = self.dal.database.get_connection().await?;
        let id_blob = uuid_to_blob(&id);
        let new_intervals = update
            .retry_intervals
            .as_deref()
            .map(intervals_to_json)
            .transpose()?;

        let updated = conn
            .interact(move |conn| {
                conn.immediate_transaction::<_, RegistrationError, _>(|conn| {
                    let current: SqliteCronTicker = cron_tickers::table
                        .filter(cron_tickers::id.eq(&id_blob))
                        .select(SqliteCronTicker::as_select())
                        .first(conn)
                        .optional()?
                        .ok_or(RegistrationError::NotFound(id))?;

                    let expression = update.expression.unwrap_or(current.expression.clone());
                    let request = update.request.unwrap_or(current.request.clone());
                    let retries = update.retries.unwrap_or(current.retries);
                    let retry_intervals =
                        new_intervals.unwrap_or(current.retry_intervals.clone());
                    let description = update.description.unwrap_or(current.description.clone());

                    let result =
                        diesel::update(cron_tickers::table.filter(cron_tickers::id.eq(&id_blob)))
                            .set((
                                cron_tickers::expression.eq(&expression),
                                cron_tickers::request.eq(&request),
                                cron_tickers::retries.eq(retries),
                                cron_tickers::retry_intervals.eq(&retry_intervals),
                                cron_tickers::description.eq(&description),
                                cron_tickers::updated_at.eq(current_timestamp_string()),
                            ))
                            .execute(conn);

                    if let Err(e) = result {
                        return Err(conflict_or(
                            conn,
                            e,
                            &current.function,
                            &expression,
                            &request,
                        ));
                    }

                    if expression != current.expression {
                        delete_pending_occurrences(conn, &id_blob)?;
                    }

                    let row = load(conn, &id_blob)?;
                    Ok(CronTicker::try_from(row)?)
                })
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        info!("Updated cron ticker {} ('{}')", updated.id, updated.expression);
        Ok(updated)
    }

    /// Deletes a definition and, by cascade, all of its occurrences.
    ///
    /// Returns `false` when no such definition exists. An occurrence that is
    /// executing at the time loses its row; its outcome write is fenced out.
    pub async fn delete(&self, id: UniversalUuid) -> Result<bool, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let id_blob = uuid_to_blob(&id);

        let deleted = conn
            .interact(move |conn| {
                diesel::delete(cron_tickers::table.filter(cron_tickers::id.eq(&id_blob)))
                    .execute(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        if deleted > 0 {
            info!("Removed cron ticker {}", id);
        }
        Ok(deleted > 0)
    }

    pub async fn count(&self) -> Result<i64, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let count = conn
            .interact(|conn| cron_tickers::table.count().get_result::<i64>(conn))
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;
        Ok(count)
    }
}

fn load(conn: &mut SqliteConnection, id_blob: &[u8]) -> QueryResult<SqliteCronTicker> {
    cron_tickers::table
        .filter(cron_tickers::id.eq(id_blob))
        .select(SqliteCronTicker::as_select())
        .first(conn)
}

fn find_by_definition(
    conn: &mut SqliteConnection,
    function: &str,
    expression: &str,
    request: &[u8],
) -> QueryResult<Option<SqliteCronTicker>> {
    cron_tickers::table
        .filter(cron_tickers::function.eq(function))
        .filter(cron_tickers::expression.eq(expression))
        .filter(cron_tickers::request.eq(request))
        .select(SqliteCronTicker::as_select())
        .first(conn)
        .optional()
}

/// Maps a unique violation on the definition triple to `Duplicate`.
fn conflict_or(
    conn: &mut SqliteConnection,
    err: diesel::result::Error,
    function: &str,
    expression: &str,
    request: &[u8],
) -> RegistrationError {
    if !is_unique_violation(&err) {
        return err.into();
    }
    match find_by_definition(conn, function, expression, request) {
        Ok(Some(row)) => match super::models::blob_to_uuid(&row.id, "cron_tickers", "id") {
            Ok(other) => RegistrationError::Duplicate(other),
            Err(e) => e.into(),
        },
        Ok(None) => err.into(),
        Err(lookup) => lookup.into(),
    }
}

fn delete_pending_occurrences(conn: &mut SqliteConnection, id_blob: &[u8]) -> QueryResult<usize> {
    diesel::delete(
        cron_ticker_occurrences::table
            .filter(cron_ticker_occurrences::cron_ticker_id.eq(id_blob))
            .filter(cron_ticker_occurrences::status.eq(TickerStatus::Idle.as_str()))
            .filter(cron_ticker_occurrences::retry_count.eq(0)),
    )
    .execute(conn)
}
