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

//! Cron Occurrence Data Access Layer
//!
//! Occurrences are only ever inserted by the expansion engine and only ever
//! transitioned by the execution DAL. The `(cron_ticker_id, execution_time)`
//! unique constraint is what makes expansion idempotent: inserts use
//! `INSERT OR IGNORE`, and an ignored insert reports
//! [`InsertOutcome::AlreadyScheduled`].

use super::models::{
    convert_all, current_timestamp_string, timestamp_to_string, uuid_to_blob,
    NewSqliteCronOccurrence, SqliteCronOccurrence,
};
use super::DAL;
use crate::database::schema::cron_ticker_occurrences;
use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use crate::error::ValidationError;
use crate::models::{CronTickerOccurrence, InsertOutcome, TickerStatus};
use diesel::prelude::*;

const TERMINAL: [&str; 3] = ["Executed", "Failed", "Skipped"];

pub struct CronOccurrenceDAL<'a> {
    dal: &'a DAL,
}

impl<'a> CronOccurrenceDAL<'a> {
    pub fn new(dal: &'a DAL) -> Self {
        Self { dal }
    }

    /// Inserts an Idle occurrence unless one already exists for the instant.
    pub async fn insert_if_absent(
        &self,
        cron_ticker_id: UniversalUuid,
        execution_time: UniversalTimestamp,
    ) -> Result<InsertOutcome<CronTickerOccurrence>, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let id = UniversalUuid::new_v4();
        let now = current_timestamp_string();
        let row = NewSqliteCronOccurrence {
            id: uuid_to_blob(&id),
            cron_ticker_id: uuid_to_blob(&cron_ticker_id),
            status: TickerStatus::Idle.as_str().to_string(),
            execution_time: timestamp_to_string(&execution_time),
            created_at: now.clone(),
            updated_at: now,
        };

        let inserted = conn
            .interact(move |conn| -> QueryResult<Option<SqliteCronOccurrence>> {
                let affected = diesel::insert_or_ignore_into(cron_ticker_occurrences::table)
                    .values(&row)
                    .execute(conn)?;
                if affected == 0 {
                    return Ok(None);
                }
                cron_ticker_occurrences::table
                    .filter(cron_ticker_occurrences::id.eq(&row.id))
                    .select(SqliteCronOccurrence::as_select())
                    .first(conn)
                    .map(Some)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        match inserted {
            Some(row) => Ok(InsertOutcome::Inserted(row.try_into()?)),
            None => Ok(InsertOutcome::AlreadyScheduled),
        }
    }

    pub async fn get(
        &self,
        id: UniversalUuid,
    ) -> Result<Option<CronTickerOccurrence>, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let id_blob = uuid_to_blob(&id);

        let row: Option<SqliteCronOccurrence> = conn
            .interact(move |conn| {
                cron_ticker_occurrences::table
                    .filter(cron_ticker_occurrences::id.eq(&id_blob))
                    .select(SqliteCronOccurrence::as_select())
                    .first(conn)
                    .optional()
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        row.map(CronTickerOccurrence::try_from).transpose()
    }

    /// Occurrences of one ticker ordered by execution time, optionally
    /// filtered by status.
    pub async fn list_for_ticker(
        &self,
        cron_ticker_id: UniversalUuid,
        status: Option<TickerStatus>,
        limit: i64,
    ) -> Result<Vec<CronTickerOccurrence>, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let ticker_blob = uuid_to_blob(&cron_ticker_id);

        let rows: Vec<SqliteCronOccurrence> = conn
            .interact(move |conn| {
                let mut query = cron_ticker_occurrences::table
                    .filter(cron_ticker_occurrences::cron_ticker_id.eq(ticker_blob))
                    .into_boxed();

                if let Some(status) = status {
                    query = query.filter(cron_ticker_occurrences::status.eq(status.as_str()));
                }

                query
                    .select(SqliteCronOccurrence::as_select())
                    .order(cron_ticker_occurrences::execution_time.asc())
                    .limit(limit)
                    .load(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        convert_all(rows)
    }

    /// Number of occurrences of a ticker still waiting to run.
    pub async fn count_pending(&self, cron_ticker_id: UniversalUuid) -> Result<i64, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let ticker_blob = uuid_to_blob(&cron_ticker_id);

        let count = conn
            .interact(move |conn| {
                cron_ticker_occurrences::table
                    .filter(cron_ticker_occurrences::cron_ticker_id.eq(ticker_blob))
                    .filter(
                        cron_ticker_occurrences::status
                            .eq_any([TickerStatus::Idle.as_str(), TickerStatus::Locked.as_str()]),
                    )
                    .count()
                    .get_result::<i64>(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(count)
    }

    /// Deletes terminal occurrences last touched before `cutoff`.
    pub async fn delete_terminal_before(
        &self,
        cutoff: UniversalTimestamp,
    ) -> Result<usize, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let cutoff_str = timestamp_to_string(&cutoff);

        let deleted = conn
            .interact(move |conn| {
                diesel::delete(
                    cron_ticker_occurrences::table
                        .filter(cron_ticker_occurrences::status.eq_any(TERMINAL))
                        .filter(cron_ticker_occurrences::updated_at.lt(cutoff_str)),
                )
                .execute(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(deleted)
    }

    /// Number of rows [`delete_terminal_before`](Self::delete_terminal_before) would remove.
    pub async fn count_terminal_before(
        &self,
        cutoff: UniversalTimestamp,
    ) -> Result<i64, ValidationError> {
        let conn = self.dal.database.get_connection().await?;
        let cutoff_str = timestamp_to_string(&cutoff);

        let count = conn
            .interact(move |conn| {
                cron_ticker_occurrences::table
                    .filter(cron_ticker_occurrences::status.eq_any(TERMINAL))
                    .filter(cron_ticker_occurrences::updated_at.lt(cutoff_str))
                    .count()
                    .get_result::<i64>(conn)
            })
            .await
            .map_err(|e| ValidationError::ConnectionPool(e.to_string()))??;

        Ok(count)
    }
}
