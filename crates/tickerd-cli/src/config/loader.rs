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

use crate::config::{generate_default_config_toml, ConfigError, TickerdConfig, Validate};
use regex::Regex;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV: &str = "TICKERD_CONFIG";

pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Loader over `./tickerd.toml`, the user config directory, and
    /// `/etc/tickerd/`.
    pub fn new() -> Self {
        let mut search_paths = vec![PathBuf::from("./tickerd.toml")];

        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("tickerd").join("config.toml"));
        }

        search_paths.push(PathBuf::from("/etc/tickerd/config.toml"));

        Self { search_paths }
    }

    #[cfg(test)]
    pub fn with_search_paths(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    /// Loads the given file, the file named by `TICKERD_CONFIG`, or the
    /// first file found in the search paths.
    pub fn load_config(&self, config_file: Option<&Path>) -> Result<TickerdConfig, ConfigError> {
        let config_path = if let Some(path) = config_file {
            path.to_path_buf()
        } else if let Ok(env_config) = env::var(CONFIG_ENV) {
            PathBuf::from(env_config)
        } else {
            self.find_config_file().ok_or(ConfigError::ConfigNotFound)?
        };

        self.load_config_from_file(&config_path)
    }

    /// Like [`load_config`](Self::load_config), falling back to the built-in
    /// defaults when no file exists anywhere.
    pub fn load_or_default(&self, config_file: Option<&Path>) -> Result<TickerdConfig, ConfigError> {
        match self.load_config(config_file) {
            Err(ConfigError::ConfigNotFound) => {
                debug!("No configuration file found; using defaults");
                self.defaults()
            }
            other => other,
        }
    }

    /// Built-in defaults with environment substitution applied.
    pub fn defaults(&self) -> Result<TickerdConfig, ConfigError> {
        let text = generate_default_config_toml()
            .map_err(|e| ConfigError::EnvSubstitutionError(e.to_string()))?;
        self.parse(&text)
    }

    pub fn load_config_from_file(&self, path: &Path) -> Result<TickerdConfig, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") | None => {}
            Some(ext) => {
                return Err(ConfigError::UnsupportedFormat {
                    extension: ext.to_string(),
                })
            }
        }

        debug!("Loading configuration from {}", path.display());
        self.parse(&content)
    }

    fn parse(&self, content: &str) -> Result<TickerdConfig, ConfigError> {
        let substituted = self.substitute_env_vars(content)?;
        let config = toml::from_str::<TickerdConfig>(&substituted)?;
        config.validate()?;
        Ok(config)
    }

    pub fn find_config_file(&self) -> Option<PathBuf> {
        self.search_paths
            .iter()
            .find(|path| path.is_file())
            .cloned()
    }

    /// Substitutes `${VAR}`, `${VAR:-default}` and `${VAR:?message}`.
    fn substitute_env_vars(&self, content: &str) -> Result<String, ConfigError> {
        let re = Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| ConfigError::EnvSubstitutionError(e.to_string()))?;
        let mut result = content.to_string();

        for cap in re.captures_iter(content) {
            let replacement = self.process_var_expression(&cap[1])?;
            result = result.replace(&cap[0], &replacement);
        }

        Ok(result)
    }

    fn process_var_expression(&self, expr: &str) -> Result<String, ConfigError> {
        if let Some((var_name, default_value)) = expr.split_once(":-") {
            Ok(env::var(var_name).unwrap_or_else(|_| default_value.to_string()))
        } else if let Some((var_name, error_msg)) = expr.split_once(":?") {
            env::var(var_name).map_err(|_| {
                ConfigError::EnvSubstitutionError(format!(
                    "Required environment variable '{}' is not set: {}",
                    var_name, error_msg
                ))
            })
        } else {
            env::var(expr).map_err(|_| {
                ConfigError::EnvSubstitutionError(format!(
                    "Required environment variable '{}' is not set",
                    expr
                ))
            })
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    #[serial]
    fn test_env_substitution_with_default() {
        let loader = ConfigLoader::new();
        env::remove_var("TICKERD_TEST_DEFAULT");

        let content = "url = \"${TICKERD_TEST_DEFAULT:-sqlite://local.db}\"";
        let result = loader.substitute_env_vars(content).unwrap();
        assert_eq!(result, "url = \"sqlite://local.db\"");
    }

    #[test]
    #[serial]
    fn test_env_substitution_with_existing_var() {
        let loader = ConfigLoader::new();
        env::set_var("TICKERD_TEST_VAR", "custom_value");

        let content = "url = \"${TICKERD_TEST_VAR:-sqlite://local.db}\"";
        let result = loader.substitute_env_vars(content).unwrap();
        assert_eq!(result, "url = \"custom_value\"");

        env::remove_var("TICKERD_TEST_VAR");
    }

    #[test]
    #[serial]
    fn test_required_var_missing() {
        let loader = ConfigLoader::new();
        env::remove_var("TICKERD_REQUIRED");

        assert!(loader.substitute_env_vars("url = \"${TICKERD_REQUIRED}\"").is_err());

        let err = loader
            .substitute_env_vars("url = \"${TICKERD_REQUIRED:?set the store path}\"")
            .unwrap_err();
        assert!(err.to_string().contains("set the store path"));
    }

    #[test]
    #[serial]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tickerd.toml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[database]\nurl = \"sqlite://{}/jobs.db\"\n\n[scheduler]\nworker_id = \"node-1\"\nmax_concurrent_jobs = 16",
            dir.path().display()
        )
        .unwrap();

        let loader = ConfigLoader::with_search_paths(vec![path]);
        let config = loader.load_config(None).unwrap();
        assert_eq!(config.scheduler.worker_id.as_deref(), Some("node-1"));
        assert_eq!(config.scheduler.max_concurrent_jobs, 16);
        assert_eq!(config.scheduler.handler_timeout_secs, 300);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    #[serial]
    fn test_missing_file_falls_back_to_defaults() {
        env::remove_var(CONFIG_ENV);
        env::remove_var("TICKERD_DATABASE_URL");
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::with_search_paths(vec![dir.path().join("absent.toml")]);

        assert!(matches!(loader.load_config(None), Err(ConfigError::ConfigNotFound)));
        let config = loader.load_or_default(None).unwrap();
        assert_eq!(config.database.url, "sqlite://tickerd.db");
    }

    #[test]
    fn test_rejects_other_formats() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tickerd.yaml");
        fs::write(&path, "database: {}").unwrap();

        let err = ConfigLoader::new().load_config_from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat { .. }));
    }
}
