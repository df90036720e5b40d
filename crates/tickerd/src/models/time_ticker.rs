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

//! One-shot and batch jobs.
//!
//! A batch is a parent ticker plus children pointing at it through
//! `parent_id`. Each child carries a [`RunCondition`]; conditional children
//! have no execution time until the batch engine resolves them.

use super::status::{RunCondition, TickerStatus};
use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use serde::{Deserialize, Serialize};

/// A one-shot or batch-member job (domain type).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeTicker {
    pub id: UniversalUuid,
    pub function: String,
    pub request: Vec<u8>,
    pub retries: i32,
    pub retry_intervals: Vec<u64>,
    pub description: Option<String>,
    pub init_identifier: Option<String>,
    pub status: TickerStatus,
    pub lock_holder: Option<String>,
    /// `None` until a conditional batch child is resolved
    pub execution_time: Option<UniversalTimestamp>,
    pub locked_at: Option<UniversalTimestamp>,
    pub executed_at: Option<UniversalTimestamp>,
    pub skipped_reason: Option<String>,
    pub exception_message: Option<String>,
    pub elapsed_time: i64,
    pub retry_count: i32,
    pub version: i32,
    pub parent_id: Option<UniversalUuid>,
    pub run_condition: Option<RunCondition>,
    pub created_at: UniversalTimestamp,
    pub updated_at: UniversalTimestamp,
}

impl TimeTicker {
    /// Batch members whose outcome gates conditional siblings.
    pub fn is_gating(&self) -> bool {
        self.parent_id.is_none()
            || matches!(self.run_condition, None | Some(RunCondition::Unconditional))
    }
}

/// Structure for scheduling a one-shot job or a batch parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTimeTicker {
    pub function: String,
    pub request: Vec<u8>,
    /// Defaults to "now" for standalone tickers
    pub execution_time: Option<UniversalTimestamp>,
    pub retries: i32,
    pub retry_intervals: Vec<u64>,
    pub description: Option<String>,
    pub init_identifier: Option<String>,
}

impl NewTimeTicker {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            request: Vec::new(),
            execution_time: None,
            retries: 0,
            retry_intervals: Vec::new(),
            description: None,
            init_identifier: None,
        }
    }

    pub fn at(mut self, execution_time: impl Into<UniversalTimestamp>) -> Self {
        self.execution_time = Some(execution_time.into());
        self
    }

    pub fn with_request(mut self, request: impl Into<Vec<u8>>) -> Self {
        self.request = request.into();
        self
    }

    pub fn with_retries(mut self, retries: i32, intervals: Vec<u64>) -> Self {
        self.retries = retries;
        self.retry_intervals = intervals;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_init_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.init_identifier = Some(identifier.into());
        self
    }
}

/// A child entry of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBatchChild {
    pub ticker: NewTimeTicker,
    pub run_condition: RunCondition,
}

impl NewBatchChild {
    /// Runs at the ticker's own time, or right after the parent settles when
    /// no time is given.
    pub fn unconditional(ticker: NewTimeTicker) -> Self {
        Self {
            ticker,
            run_condition: RunCondition::Unconditional,
        }
    }

    pub fn all_succeeded(ticker: NewTimeTicker) -> Self {
        Self {
            ticker,
            run_condition: RunCondition::AllSucceeded,
        }
    }

    pub fn any_succeeded(ticker: NewTimeTicker) -> Self {
        Self {
            ticker,
            run_condition: RunCondition::AnySucceeded,
        }
    }
}

/// A persisted batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeTickerBatch {
    pub parent: TimeTicker,
    pub children: Vec<TimeTicker>,
}

/// What a batch resolution pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResolution {
    /// Children given an execution time
    pub released: Vec<UniversalUuid>,
    /// Children whose run condition can no longer be met
    pub skipped: Vec<UniversalUuid>,
}

impl BatchResolution {
    pub fn is_empty(&self) -> bool {
        self.released.is_empty() && self.skipped.is_empty()
    }
}
