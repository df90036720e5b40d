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

//! Status state machine and the enums stored as TEXT columns.
//!
//! ```text
//! Idle ──lease──▶ Locked ──success──▶ Executed
//!  ▲                │ ├──retries exhausted / terminal──▶ Failed
//!  └──retry/reclaim─┘ └──reschedule conflict──▶ Skipped
//! Idle ──operator / run condition──▶ Skipped
//! ```
//!
//! `Skipped` means the work was never attempted because of policy or operator
//! action. `Failed` means it was attempted and retries ran out (or the handler
//! reported a terminal error).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution status shared by cron occurrences and time tickers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TickerStatus {
    /// Waiting for its execution time
    Idle,
    /// Leased by a worker
    Locked,
    /// Handler succeeded
    Executed,
    /// Attempted and gave up
    Failed,
    /// Never attempted
    Skipped,
}

impl TickerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickerStatus::Idle => "Idle",
            TickerStatus::Locked => "Locked",
            TickerStatus::Executed => "Executed",
            TickerStatus::Failed => "Failed",
            TickerStatus::Skipped => "Skipped",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Idle" => Some(TickerStatus::Idle),
            "Locked" => Some(TickerStatus::Locked),
            "Executed" => Some(TickerStatus::Executed),
            "Failed" => Some(TickerStatus::Failed),
            "Skipped" => Some(TickerStatus::Skipped),
            _ => None,
        }
    }

    /// True once no further transition can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TickerStatus::Executed | TickerStatus::Failed | TickerStatus::Skipped
        )
    }
}

impl fmt::Display for TickerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy deciding whether a batch child runs, based on its gating set.
///
/// The gating set is the batch parent plus every `Unconditional` sibling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunCondition {
    /// Runs at its own execution time regardless of siblings
    Unconditional,
    /// Runs only if every gating member executed successfully
    AllSucceeded,
    /// Runs if at least one gating member executed successfully
    AnySucceeded,
}

/// Result of evaluating a run condition against a settled gating set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionResolution {
    /// Some gating member has not reached a terminal state yet
    Pending,
    /// The child becomes due now
    Release,
    /// The child will never run
    Skip(String),
}

impl RunCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunCondition::Unconditional => "unconditional",
            RunCondition::AllSucceeded => "all_succeeded",
            RunCondition::AnySucceeded => "any_succeeded",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "unconditional" => Some(RunCondition::Unconditional),
            "all_succeeded" => Some(RunCondition::AllSucceeded),
            "any_succeeded" => Some(RunCondition::AnySucceeded),
            _ => None,
        }
    }

    /// Whether the child must wait for its siblings before it can be timed.
    pub fn is_conditional(&self) -> bool {
        !matches!(self, RunCondition::Unconditional)
    }

    /// Evaluates the condition against the statuses of the gating set.
    pub fn evaluate(&self, gating: &[TickerStatus]) -> ConditionResolution {
        if gating.iter().any(|s| !s.is_terminal()) {
            return ConditionResolution::Pending;
        }

        let succeeded = gating
            .iter()
            .filter(|s| **s == TickerStatus::Executed)
            .count();
        let total = gating.len();

        match self {
            RunCondition::Unconditional => ConditionResolution::Release,
            RunCondition::AllSucceeded if succeeded == total => ConditionResolution::Release,
            RunCondition::AllSucceeded => ConditionResolution::Skip(format!(
                "run condition all_succeeded not met: {} of {} batch members did not succeed",
                total - succeeded,
                total
            )),
            RunCondition::AnySucceeded if succeeded > 0 => ConditionResolution::Release,
            RunCondition::AnySucceeded => ConditionResolution::Skip(format!(
                "run condition any_succeeded not met: none of {} batch members succeeded",
                total
            )),
        }
    }
}

impl fmt::Display for RunCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which table a schedulable row lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickerKind {
    CronOccurrence,
    Time,
}

impl TickerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickerKind::CronOccurrence => "cron_occurrence",
            TickerKind::Time => "time",
        }
    }

    /// Backing table; only ever interpolated from this fixed set.
    pub(crate) fn table_name(&self) -> &'static str {
        match self {
            TickerKind::CronOccurrence => "cron_ticker_occurrences",
            TickerKind::Time => "time_tickers",
        }
    }
}

impl fmt::Display for TickerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
