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

//! # Cron
//!
//! Parsing and evaluation of cron expressions, and the engine that turns
//! [`CronTicker`](crate::models::CronTicker) definitions into occurrence rows.
//!
//! Expressions use five fields (`minute hour day month weekday`) or six with
//! a leading seconds field. All evaluation happens in UTC.
//!
//! ```rust,ignore
//! use tickerd::cron::CronExpression;
//!
//! let every_five = CronExpression::parse("*/5 * * * *")?;
//! let next = every_five.next_after(UniversalTimestamp::now())?;
//! ```

pub mod expansion;

pub use expansion::{CronExpansionEngine, ExpansionReport};

use crate::database::universal_types::UniversalTimestamp;
use crate::error::ValidationError;
use chrono::Utc;
use croner::Cron;

/// A validated cron expression.
pub struct CronExpression {
    source: String,
    cron: Cron,
}

impl std::fmt::Debug for CronExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CronExpression").field(&self.source).finish()
    }
}

impl CronExpression {
    /// Parses and validates an expression.
    ///
    /// # Errors
    /// `ValidationError::InvalidCronExpression` for anything `croner`
    /// rejects, including empty input.
    pub fn parse(expression: &str) -> Result<Self, ValidationError> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(invalid(expression, "expression is empty"));
        }

        let cron = Cron::new(trimmed)
            .with_seconds_optional()
            .parse()
            .map_err(|e| invalid(expression, e))?;

        Ok(Self {
            source: trimmed.to_string(),
            cron,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// First instant strictly after `after`.
    pub fn next_after(&self, after: UniversalTimestamp) -> Result<UniversalTimestamp, ValidationError> {
        self.cron
            .find_next_occurrence(&after.into_inner(), false)
            .map(|dt| UniversalTimestamp(dt.with_timezone(&Utc)))
            .map_err(|e| invalid(&self.source, e))
    }

    /// The next `count` instants strictly after `after`, ascending.
    pub fn upcoming(
        &self,
        after: UniversalTimestamp,
        count: usize,
    ) -> Result<Vec<UniversalTimestamp>, ValidationError> {
        let mut instants = Vec::with_capacity(count);
        let mut cursor = after;
        for _ in 0..count {
            cursor = self.next_after(cursor)?;
            instants.push(cursor);
        }
        Ok(instants)
    }
}

fn invalid(expression: &str, message: impl ToString) -> ValidationError {
    ValidationError::InvalidCronExpression {
        expression: expression.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> UniversalTimestamp {
        UniversalTimestamp(Utc.with_ymd_and_hms(2025, 6, 1, h, m, s).unwrap())
    }

    #[test]
    fn test_five_field_expression() {
        let expr = CronExpression::parse("*/15 * * * *").unwrap();
        assert_eq!(expr.next_after(at(12, 0, 0)).unwrap(), at(12, 15, 0));
        assert_eq!(expr.next_after(at(12, 7, 30)).unwrap(), at(12, 15, 0));
    }

    #[test]
    fn test_six_field_expression_with_seconds() {
        let expr = CronExpression::parse("*/10 * * * * *").unwrap();
        assert_eq!(expr.next_after(at(12, 0, 0)).unwrap(), at(12, 0, 10));
    }

    #[test]
    fn test_next_after_is_strict() {
        let expr = CronExpression::parse("0 * * * *").unwrap();
        assert_eq!(expr.next_after(at(13, 0, 0)).unwrap(), at(14, 0, 0));
    }

    #[test]
    fn test_upcoming_is_ascending() {
        let expr = CronExpression::parse("0 */6 * * *").unwrap();
        let next = expr.upcoming(at(1, 0, 0), 3).unwrap();
        assert_eq!(next, vec![at(6, 0, 0), at(12, 0, 0), at(18, 0, 0)]);
        assert!(expr.upcoming(at(1, 0, 0), 0).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_malformed_expressions() {
        for bad in ["", "   ", "* *", "61 * * * *", "not a cron", "* * * * * * * *"] {
            let err = CronExpression::parse(bad).unwrap_err();
            assert!(
                matches!(err, ValidationError::InvalidCronExpression { .. }),
                "expected rejection of {:?}",
                bad
            );
        }
    }
}
