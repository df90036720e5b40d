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

//! Recurring job definitions.

use crate::database::universal_types::{UniversalTimestamp, UniversalUuid};
use serde::{Deserialize, Serialize};

/// A recurring job definition (domain type).
///
/// `(function, expression, request)` is unique: registering the same triple
/// twice yields the existing definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronTicker {
    pub id: UniversalUuid,
    /// Cron expression, five or six fields
    pub expression: String,
    /// Handler name looked up in the registry
    pub function: String,
    /// Opaque payload handed to the handler; empty when absent
    pub request: Vec<u8>,
    /// Maximum retry attempts per occurrence
    pub retries: i32,
    /// Delay in seconds before each retry; the last entry is reused
    pub retry_intervals: Vec<u64>,
    pub description: Option<String>,
    /// Stable key for seeding definitions from code or config
    pub init_identifier: Option<String>,
    pub created_at: UniversalTimestamp,
    pub updated_at: UniversalTimestamp,
}

impl CronTicker {
    /// Whether `other` describes the same job as this definition.
    pub fn same_definition(&self, other: &NewCronTicker) -> bool {
        self.expression == other.expression
            && self.function == other.function
            && self.request == other.request
            && self.retries == other.retries
            && self.retry_intervals == other.retry_intervals
            && self.description == other.description
    }
}

/// Structure for registering a cron ticker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCronTicker {
    pub expression: String,
    pub function: String,
    pub request: Vec<u8>,
    pub retries: i32,
    pub retry_intervals: Vec<u64>,
    pub description: Option<String>,
    pub init_identifier: Option<String>,
}

impl NewCronTicker {
    pub fn new(expression: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            function: function.into(),
            request: Vec::new(),
            retries: 0,
            retry_intervals: Vec::new(),
            description: None,
            init_identifier: None,
        }
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

/// Operator edit of an existing definition. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronTickerUpdate {
    pub expression: Option<String>,
    pub request: Option<Vec<u8>>,
    pub retries: Option<i32>,
    pub retry_intervals: Option<Vec<u64>>,
    pub description: Option<Option<String>>,
}
