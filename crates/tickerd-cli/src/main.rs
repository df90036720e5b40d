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

mod cli;
mod commands;
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use config::{ConfigLoader, TickerdConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // `config init` must work without a readable configuration
    if let Commands::Config(command) = &cli.command {
        init_logging(&cli, "info");
        return commands::config::execute(command);
    }

    let config = load_config(&cli)?;
    init_logging(&cli, &config.logging.level);

    match cli.command {
        Commands::Migrate => commands::admin::migrate(&config).await,
        Commands::Run { worker_id } => commands::run::execute(&config, worker_id).await,
        Commands::Cron(command) => commands::cron::execute(&config, command).await,
        Commands::Time(command) => commands::time::execute(&config, command).await,
        Commands::Status { ref id, format } => {
            commands::status::execute(&config, id, format).await
        }
        Commands::Admin(command) => commands::admin::execute(&config, command).await,
        Commands::Config(command) => commands::config::execute(&command),
    }
}

fn load_config(cli: &Cli) -> Result<TickerdConfig> {
    let mut config = ConfigLoader::new()
        .load_or_default(cli.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(url) = &cli.database_url {
        config.database.url = url.clone();
    }
    Ok(config)
}

/// `RUST_LOG` wins; otherwise `--verbose`/`--quiet`, then the configured level.
fn init_logging(cli: &Cli, configured: &str) {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        configured
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(cli.verbose)
        .with_writer(std::io::stderr)
        .init();
}
