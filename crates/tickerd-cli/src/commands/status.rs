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

use super::{connect, display_opt, display_payload, parse_id, print_json};
use crate::cli::OutputFormat;
use crate::config::TickerdConfig;
use anyhow::{bail, Context, Result};
use tickerd::TickerRecord;

pub async fn execute(config: &TickerdConfig, id: &str, format: OutputFormat) -> Result<()> {
    let id = parse_id(id)?;
    let scheduler = connect(config).await?;

    let Some(record) = scheduler
        .find(id)
        .await
        .with_context(|| format!("failed to look up {}", id))?
    else {
        bail!("no ticker, occurrence or cron definition with id {}", id);
    };

    match format {
        OutputFormat::Json => print_json(&record),
        OutputFormat::Human => {
            print_record(&record);
            Ok(())
        }
    }
}

fn print_record(record: &TickerRecord) {
    match record {
        TickerRecord::Cron(ticker) => {
            println!("Cron ticker   {}", ticker.id);
            println!("  expression  {}", ticker.expression);
            println!("  function    {}", ticker.function);
            println!("  request     {}", display_payload(&ticker.request));
            println!("  retries     {} {:?}", ticker.retries, ticker.retry_intervals);
            println!("  updated     {}", ticker.updated_at);
        }
        TickerRecord::Occurrence(occurrence) => {
            println!("Occurrence    {}", occurrence.id);
            println!("  cron        {}", occurrence.cron_ticker_id);
            println!("  status      {}", occurrence.status);
            println!("  due         {}", occurrence.execution_time);
            println!("  lock holder {}", display_opt(occurrence.lock_holder.as_deref()));
            println!("  retries     {}", occurrence.retry_count);
            println!("  executed    {}", display_opt(occurrence.executed_at));
            println!("  error       {}", display_opt(occurrence.exception_message.as_deref()));
            println!("  skipped     {}", display_opt(occurrence.skipped_reason.as_deref()));
        }
        TickerRecord::Time(ticker) => {
            println!("Time ticker   {}", ticker.id);
            println!("  function    {}", ticker.function);
            println!("  status      {}", ticker.status);
            println!("  due         {}", display_opt(ticker.execution_time));
            println!("  parent      {}", display_opt(ticker.parent_id));
            println!("  condition   {}", display_opt(ticker.run_condition));
            println!("  lock holder {}", display_opt(ticker.lock_holder.as_deref()));
            println!("  retries     {}/{}", ticker.retry_count, ticker.retries);
            println!("  executed    {}", display_opt(ticker.executed_at));
            println!("  elapsed     {}ms", ticker.elapsed_time);
            println!("  error       {}", display_opt(ticker.exception_message.as_deref()));
            println!("  skipped     {}", display_opt(ticker.skipped_reason.as_deref()));
        }
    }
}
