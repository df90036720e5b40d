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

use super::{connect, display_opt, display_payload, parse_id, payload, print_json};
use crate::cli::{OutputFormat, TimeCommands};
use crate::config::TickerdConfig;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use tickerd::{NewTimeTicker, TimeTicker, UniversalTimestamp};

pub async fn execute(config: &TickerdConfig, command: TimeCommands) -> Result<()> {
    let scheduler = connect(config).await?;

    match command {
        TimeCommands::Add {
            function,
            at,
            after,
            request,
            retries,
            intervals,
            description,
        } => {
            let mut ticker = NewTimeTicker::new(function)
                .with_request(payload(request))
                .with_retries(retries, intervals);
            if let Some(at) = at {
                let when = DateTime::parse_from_rfc3339(&at)
                    .with_context(|| format!("'{}' is not an RFC 3339 timestamp", at))?;
                ticker = ticker.at(UniversalTimestamp(when.with_timezone(&Utc)));
            } else if let Some(after) = after {
                let delay = chrono::Duration::from_std(after).context("delay out of range")?;
                ticker = ticker.at(UniversalTimestamp(Utc::now() + delay));
            }
            if let Some(description) = description {
                ticker = ticker.with_description(description);
            }

            let ticker = scheduler
                .schedule_time(ticker)
                .await
                .context("failed to schedule time ticker")?
                .into_inner();
            println!(
                "Scheduled time ticker {} at {}",
                ticker.id,
                display_opt(ticker.execution_time)
            );
        }
        TimeCommands::List {
            status,
            limit,
            offset,
            format,
        } => {
            let tickers = scheduler
                .list_time_tickers(status, limit, offset)
                .await
                .context("failed to list time tickers")?;
            match format {
                OutputFormat::Json => print_json(&tickers)?,
                OutputFormat::Human => print_table(&tickers),
            }
        }
        TimeCommands::Skip { id, reason } => {
            let id = parse_id(&id)?;
            if !scheduler
                .skip_time_ticker(id, &reason)
                .await
                .context("failed to skip time ticker")?
            {
                bail!("time ticker {} is not waiting to run", id);
            }
            println!("Skipped time ticker {}", id);
        }
    }

    Ok(())
}

fn print_table(tickers: &[TimeTicker]) {
    if tickers.is_empty() {
        println!("No time tickers found");
        return;
    }
    println!(
        "{:<36}  {:<20}  {:<9}  {:<32}  {:<7}  REQUEST",
        "ID", "FUNCTION", "STATUS", "EXECUTION TIME", "RETRIES"
    );
    for ticker in tickers {
        println!(
            "{:<36}  {:<20}  {:<9}  {:<32}  {:<7}  {}",
            ticker.id,
            ticker.function,
            ticker.status,
            display_opt(ticker.execution_time),
            format!("{}/{}", ticker.retry_count, ticker.retries),
            display_payload(&ticker.request)
        );
    }
}
