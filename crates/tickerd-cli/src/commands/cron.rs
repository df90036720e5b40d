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
use crate::cli::{CronCommands, OutputFormat};
use crate::config::TickerdConfig;
use anyhow::{bail, Context, Result};
use tickerd::{CronTicker, NewCronTicker, RegistrationOutcome};

pub async fn execute(config: &TickerdConfig, command: CronCommands) -> Result<()> {
    let scheduler = connect(config).await?;

    match command {
        CronCommands::Add {
            expression,
            function,
            request,
            retries,
            intervals,
            description,
            init_identifier,
        } => {
            let mut ticker = NewCronTicker::new(expression, function)
                .with_request(payload(request))
                .with_retries(retries, intervals);
            if let Some(description) = description {
                ticker = ticker.with_description(description);
            }
            if let Some(identifier) = init_identifier {
                ticker = ticker.with_init_identifier(identifier);
            }

            let outcome = scheduler
                .register_cron(ticker)
                .await
                .context("failed to register cron ticker")?;
            let verb = match &outcome {
                RegistrationOutcome::Created(_) => "Registered",
                RegistrationOutcome::Existing(_) => "Already registered",
                RegistrationOutcome::Updated(_) => "Updated",
            };
            let ticker = outcome.into_inner();
            println!("{} cron ticker {} ({})", verb, ticker.id, ticker.expression);
        }
        CronCommands::List {
            limit,
            offset,
            format,
        } => {
            let tickers = scheduler
                .list_cron_tickers(limit, offset)
                .await
                .context("failed to list cron tickers")?;
            match format {
                OutputFormat::Json => print_json(&tickers)?,
                OutputFormat::Human => print_table(&tickers),
            }
        }
        CronCommands::Remove { id } => {
            let id = parse_id(&id)?;
            if !scheduler
                .remove_cron(id)
                .await
                .context("failed to remove cron ticker")?
            {
                bail!("cron ticker {} not found", id);
            }
            println!("Removed cron ticker {}", id);
        }
    }

    Ok(())
}

fn print_table(tickers: &[CronTicker]) {
    if tickers.is_empty() {
        println!("No cron tickers registered");
        return;
    }
    println!(
        "{:<36}  {:<20}  {:<20}  {:<7}  REQUEST",
        "ID", "EXPRESSION", "FUNCTION", "RETRIES"
    );
    for ticker in tickers {
        println!(
            "{:<36}  {:<20}  {:<20}  {:<7}  {}",
            ticker.id,
            ticker.expression,
            ticker.function,
            ticker.retries,
            display_payload(&ticker.request)
        );
        if ticker.description.is_some() || ticker.init_identifier.is_some() {
            println!(
                "    description: {}  init: {}",
                display_opt(ticker.description.as_deref()),
                display_opt(ticker.init_identifier.as_deref())
            );
        }
    }
}
