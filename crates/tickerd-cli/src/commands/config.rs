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

use crate::cli::ConfigCommands;
use crate::config::generate_default_config_toml;
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

pub fn execute(command: &ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Init { output, force } => {
            write_default_config(output, *force)?;
            println!("Wrote default configuration to {}", output.display());
            Ok(())
        }
    }
}

fn write_default_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let content = generate_default_config_toml().context("failed to render default config")?;
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
}
