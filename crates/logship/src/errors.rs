// Copyright 2025-Present logship contributors
// SPDX-License-Identifier: Apache-2.0

//! Error types for the shipping pipeline.

use std::io;
use std::path::PathBuf;

/// Final outcome of a target that did not end cleanly.
#[derive(Debug, thiserror::Error)]
pub enum ShipperError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to stat {}: {source}", path.display())]
    PathStat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed session marker {marker:?}: {reason}")]
    MalformedSessionMarker { marker: String, reason: String },

    #[error("delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("line source failed: {0}")]
    Source(#[from] SourceError),

    #[error("canceled")]
    Canceled,

    #[error("pipeline task failed: {0}")]
    Task(String),
}

impl ShipperError {
    /// Cancellation is a clean shutdown, not a failure.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, ShipperError::Canceled)
    }
}

/// Problems found while loading configuration or building a target.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} is empty")]
    MissingField { field: &'static str },

    #[error("targets is empty")]
    NoTargets,

    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid collector endpoint {0:?}")]
    InvalidEndpoint(String),

    #[error("invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("local hostname is not valid UTF-8")]
    Hostname,

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

/// A handler could not deliver a record.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("request to collector failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("collector responded with {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("sink is closed")]
    Closed,

    #[error("{0}")]
    Handler(String),
}

/// Terminal signals of one line source lifetime.
///
/// `Removed` is the expected end of a lifetime when the producing process
/// restarts; the supervisor waits for the file to come back.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source file was removed")]
    Removed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("record consumer stopped")]
    Closed,
}

/// Aggregate outcome of running every configured target.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("{failed} of {total} targets failed")]
    TargetsFailed { failed: usize, total: usize },
}
