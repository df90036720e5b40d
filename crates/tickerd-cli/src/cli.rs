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

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tickerd::TickerStatus;

#[derive(Parser)]
#[command(
    name = "tickerctl",
    version,
    about = "Command-line interface for the tickerd job scheduler",
    long_about = "Register cron and one-shot jobs, inspect their state, run a scheduler node, and prune history"
)]
pub struct Cli {
    /// Configuration file (defaults to tickerd.toml, then the user and system config dirs)
    #[arg(short, long, global = true, env = "TICKERD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Overrides the database URL from the configuration file
    #[arg(long, global = true, env = "TICKERD_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply pending database migrations
    Migrate,

    /// Run a scheduler node until interrupted
    Run {
        /// Worker id recorded as lease holder (random when omitted)
        #[arg(long)]
        worker_id: Option<String>,
    },

    /// Recurring job definitions
    #[command(subcommand)]
    Cron(CronCommands),

    /// One-shot jobs
    #[command(subcommand)]
    Time(TimeCommands),

    /// Show any ticker, occurrence or cron definition by id
    Status {
        id: String,

        #[arg(long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Maintenance operations
    #[command(subcommand)]
    Admin(AdminCommands),

    /// Configuration file helpers
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
pub enum CronCommands {
    /// Register a cron ticker (no-op when an identical one exists)
    Add {
        /// Five- or six-field cron expression
        expression: String,

        /// Handler name
        function: String,

        /// Request payload handed to the handler
        #[arg(long)]
        request: Option<String>,

        #[arg(long, default_value_t = 0)]
        retries: i32,

        /// Retry delays in seconds, comma separated
        #[arg(long, value_delimiter = ',')]
        intervals: Vec<u64>,

        #[arg(long)]
        description: Option<String>,

        /// Stable key; re-registering with the same key updates in place
        #[arg(long)]
        init_identifier: Option<String>,
    },
    /// List cron tickers
    List {
        #[arg(long, default_value_t = 50)]
        limit: i64,

        #[arg(long, default_value_t = 0)]
        offset: i64,

        #[arg(long, value_enum, default_value_t)]
        format: OutputFormat,
    },
    /// Delete a cron ticker and its occurrences
    Remove { id: String },
}

#[derive(Subcommand)]
pub enum TimeCommands {
    /// Schedule a one-shot job
    Add {
        /// Handler name
        function: String,

        /// RFC 3339 execution time
        #[arg(long, conflicts_with = "after")]
        at: Option<String>,

        /// Delay from now, e.g. 30s, 15m, 2h
        #[arg(long = "in", value_parser = parse_duration)]
        after: Option<Duration>,

        #[arg(long)]
        request: Option<String>,

        #[arg(long, default_value_t = 0)]
        retries: i32,

        #[arg(long, value_delimiter = ',')]
        intervals: Vec<u64>,

        #[arg(long)]
        description: Option<String>,
    },
    /// List time tickers
    List {
        #[arg(long, value_parser = parse_status)]
        status: Option<TickerStatus>,

        #[arg(long, default_value_t = 50)]
        limit: i64,

        #[arg(long, default_value_t = 0)]
        offset: i64,

        #[arg(long, value_enum, default_value_t)]
        format: OutputFormat,
    },
    /// Skip an Idle time ticker
    Skip {
        id: String,

        #[arg(long, default_value = "skipped by operator")]
        reason: String,
    },
}

#[derive(Subcommand)]
pub enum AdminCommands {
    /// Delete settled tickers, delivered outboxes and expired inbox rows
    Cleanup {
        /// Retention window, e.g. 7d, 12h
        #[arg(long, value_parser = parse_duration)]
        older_than: Duration,

        /// Count matching rows without deleting them
        #[arg(long)]
        dry_run: bool,

        #[arg(long, value_enum, default_value_t)]
        format: OutputFormat,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Write a default configuration file
    Init {
        #[arg(short, long, default_value = "tickerd.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Parses `45s`, `30m`, `12h`, `7d` or `250ms`; a bare number is seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (digits, unit) = input.split_at(split);

    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration '{}': expected a number and a unit", input))?;

    let seconds = match unit {
        "ms" => return Ok(Duration::from_millis(value)),
        "" | "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        other => {
            return Err(format!(
                "invalid duration unit '{}' (use ms, s, m, h or d)",
                other
            ))
        }
    };

    value
        .checked_mul(seconds)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{}' is too large", input))
}

fn parse_status(input: &str) -> Result<TickerStatus, String> {
    let mut chars = input.chars();
    let normalized: String = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    };
    TickerStatus::from_str(&normalized).ok_or_else(|| {
        format!(
            "unknown status '{}' (idle, locked, executed, failed, skipped)",
            input
        )
    })
}
