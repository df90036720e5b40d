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

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No tickerd configuration file found")]
    ConfigNotFound,

    #[error("Cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed TOML: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("{0}")]
    EnvSubstitutionError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] ValidationError),

    #[error("Configuration files must be TOML, not .{extension}")]
    UnsupportedFormat { extension: String },
}

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("database.url must name a SQLite database, got {url:?}")]
    InvalidDatabaseUrl { url: String },

    #[error("database.pool_size must be 1..=100, got {size}")]
    InvalidPoolSize { size: u32 },

    #[error("logging.level {level:?} is not one of error, warn, info, debug, trace")]
    InvalidLogLevel { level: String },

    #[error("{field} must be greater than zero")]
    NonPositive { field: &'static str },

    #[error("scheduler.lease_timeout_secs ({lease}) must exceed scheduler.handler_timeout_secs ({handler})")]
    LeaseTooShort { lease: u64, handler: u64 },

    #[error("outbox.notification_address must not be blank, got {address:?}")]
    InvalidAddress { address: String },

    #[error("{} problems: {errors:?}", errors.len())]
    Multiple { errors: Vec<ValidationError> },
}
