// Copyright 2025-Present logship contributors
// SPDX-License-Identifier: Apache-2.0

use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::ConfigError;

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:9880";
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
/// One millisecond between posts gives every record its own timestamp in
/// millisecond-resolution search stores.
pub const DEFAULT_POST_INTERVAL_MS: u64 = 1;

/// One log file to tail and the tag/platform it is shipped under.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TargetConfig {
    pub tag: String,
    pub path: PathBuf,
    pub platform: String,
}

impl TargetConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tag.is_empty() {
            return Err(ConfigError::MissingField { field: "tag" });
        }
        if self.platform.is_empty() {
            return Err(ConfigError::MissingField { field: "platform" });
        }
        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::MissingField { field: "path" });
        }
        Ok(())
    }
}

/// Connection parameters of the remote collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkConfig {
    /// Base URL; records are posted to `<endpoint>/<tag>`.
    pub endpoint: String,
    /// Timeout of each post request.
    pub timeout: Duration,
    pub https_proxy: Option<String>,
    /// Pause after each successful post.
    pub post_interval: Duration,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            https_proxy: None,
            post_interval: Duration::from_millis(DEFAULT_POST_INTERVAL_MS),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    #[serde(default = "default_endpoint")]
    endpoint: String,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
    #[serde(default)]
    https_proxy: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    poll_interval_ms: u64,
    #[serde(default = "default_post_interval_ms")]
    post_interval_ms: u64,
    #[serde(default)]
    targets: Vec<TargetConfig>,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_post_interval_ms() -> u64 {
    DEFAULT_POST_INTERVAL_MS
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub sink: SinkConfig,
    /// How often each line source checks its file for new data.
    pub poll_interval: Duration,
    pub targets: Vec<TargetConfig>,
}

impl Config {
    /// Loads the JSON config file, then applies `LOGSHIP_*` environment
    /// overrides.
    pub fn from_file(path: &Path) -> Result<Config, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Config::from_json(&raw)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn from_json(raw: &str) -> Result<Config, ConfigError> {
        let file: FileConfig = serde_json::from_str(raw)?;

        if file.targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }

        let config = Config {
            sink: SinkConfig {
                endpoint: parse_endpoint(&file.endpoint)?,
                timeout: Duration::from_millis(file.timeout_ms),
                https_proxy: file.https_proxy,
                post_interval: Duration::from_millis(file.post_interval_ms),
            },
            poll_interval: Duration::from_millis(file.poll_interval_ms),
            targets: file.targets,
        };
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(endpoint) = env::var("LOGSHIP_ENDPOINT") {
            self.sink.endpoint = parse_endpoint(&endpoint)?;
        }

        if let Ok(value) = env::var("LOGSHIP_POLL_INTERVAL_MS") {
            let millis = value
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidEnv {
                    name: "LOGSHIP_POLL_INTERVAL_MS",
                    value: value.clone(),
                })?;
            self.poll_interval = Duration::from_millis(millis);
        }

        if let Ok(proxy) = env::var("LOGSHIP_HTTPS_PROXY").or_else(|_| env::var("HTTPS_PROXY")) {
            self.sink.https_proxy = Some(proxy);
        }

        Ok(())
    }
}

fn parse_endpoint(endpoint: &str) -> Result<String, ConfigError> {
    let trimmed = endpoint.trim().trim_end_matches('/');
    match reqwest::Url::parse(trimmed) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(trimmed.to_string()),
        _ => Err(ConfigError::InvalidEndpoint(endpoint.to_string())),
    }
}
