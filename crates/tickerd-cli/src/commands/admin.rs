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

use super::{connect, print_json};
use crate::cli::{AdminCommands, OutputFormat};
use crate::config::TickerdConfig;
use anyhow::{Context, Result};
use tickerd::CleanupReport;

pub async fn execute(config: &TickerdConfig, command: AdminCommands) -> Result<()> {
    match command {
        AdminCommands::Cleanup {
            older_than,
            dry_run,
            format,
        } => {
            let scheduler = connect(config).await?;
            let report = scheduler
                .cleanup(older_than, dry_run)
                .await
                .context("cleanup failed")?;
            match format {
                OutputFormat::Json => print_json(&report)?,
                OutputFormat::Human => print_report(&report),
            }
        }
    }
    Ok(())
}

/// Applies pending migrations; building the scheduler does the work.
pub async fn migrate(config: &TickerdConfig) -> Result<()> {
    connect(config).await?;
    println!("Database {} is up to date", config.database.url);
    Ok(())
}

fn print_report(report: &CleanupReport) {
    let verb = if report.dry_run { "Would delete" } else { "Deleted" };
    println!("{} {} row(s):", verb, report.total());
    println!("  cron occurrences  {}", report.occurrences);
    println!("  time tickers      {}", report.time_tickers);
    println!("  outboxes          {}", report.outboxes);
    println!("  inbox entries     {}", report.inbox_rows);
}
