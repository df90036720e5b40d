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

use crate::config::{types::*, ValidationError};

pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

impl Validate for TickerdConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut errors: Vec<ValidationError> = [
            self.database.validate(),
            self.scheduler.validate(),
            self.outbox.validate(),
            self.maintenance.validate(),
            self.logging.validate(),
        ]
        .into_iter()
        .filter_map(Result::err)
        .collect();

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ValidationError::Multiple { errors }),
        }
    }
}

fn positive(field: &'static str, value: u64) -> Result<(), ValidationError> {
    if value == 0 {
        return Err(ValidationError::NonPositive { field });
    }
    Ok(())
}

impl Validate for DatabaseConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        let url = self.url.trim();
        let is_other_backend = url.contains("://") && !url.starts_with("sqlite://");
        if url.is_empty() || is_other_backend {
            return Err(ValidationError::InvalidDatabaseUrl {
                url: self.url.clone(),
            });
        }

        if self.pool_size == 0 || self.pool_size > 100 {
            return Err(ValidationError::InvalidPoolSize {
                size: self.pool_size,
            });
        }

        Ok(())
    }
}

impl Validate for SchedulerSection {
    fn validate(&self) -> Result<(), ValidationError> {
        positive("poll_interval_ms", self.poll_interval_ms)?;
        positive("max_concurrent_jobs", self.max_concurrent_jobs as u64)?;
        positive("handler_timeout_secs", self.handler_timeout_secs)?;
        positive("cron_horizon", self.cron_horizon as u64)?;
        positive("expansion_interval_secs", self.expansion_interval_secs)?;

        if self.lease_timeout_secs <= self.handler_timeout_secs {
            return Err(ValidationError::LeaseTooShort {
                lease: self.lease_timeout_secs,
                handler: self.handler_timeout_secs,
            });
        }
        Ok(())
    }
}

impl Validate for OutboxConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        positive("relay_poll_interval_ms", self.relay_poll_interval_ms)?;
        positive("relay_batch_size", self.relay_batch_size as u64)?;
        positive("relay_lock_timeout_secs", self.relay_lock_timeout_secs)?;

        if let Some(address) = &self.notification_address {
            if address.trim().is_empty() {
                return Err(ValidationError::InvalidAddress {
                    address: address.clone(),
                });
            }
        }
        Ok(())
    }
}

impl Validate for MaintenanceConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        positive("cleanup_interval_secs", self.cleanup_interval_secs)
    }
}

impl Validate for LoggingConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        match self.level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => Ok(()),
            _ => Err(ValidationError::InvalidLogLevel {
                level: self.level.clone(),
            }),
        }
    }
}
