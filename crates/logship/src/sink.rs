// Copyright 2025-Present logship contributors
// SPDX-License-Identifier: Apache-2.0

//! Delivery of correlated records to the remote collector.
//!
//! Every record is posted on its own as a JSON object to `<endpoint>/<tag>`,
//! the HTTP input convention of Fluentd-style collectors where the URL path
//! is the routing tag. There is no batching and no retry: a failed post is
//! returned as is and ends the target.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error};

use crate::config::SinkConfig;
use crate::errors::{ConfigError, DeliveryError};
use crate::handler::LogHandler;
use crate::record::CorrelatedRecord;

/// Body of one post.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct LogPayload<'a> {
    pub host: &'a str,
    pub platform: &'a str,
    pub file_open_at_unix_milli: i64,
    pub frame: Option<u64>,
    pub log: &'a str,
    pub category: &'a str,
    pub verbosity: &'a str,
    #[serde(rename = "LogID")]
    pub log_id: String,
}

#[derive(Debug)]
pub struct DeliverySink {
    client: reqwest::Client,
    url: String,
    tag: String,
    platform: String,
    /// Resolved once at construction.
    host: String,
    post_interval: Duration,
    closed: AtomicBool,
}

impl DeliverySink {
    /// Builds a sink identified by the local hostname.
    pub fn new(config: &SinkConfig, tag: &str, platform: &str) -> Result<Self, ConfigError> {
        let host = local_hostname()?;
        Self::with_host(config, tag, platform, host)
    }

    pub fn with_host(
        config: &SinkConfig,
        tag: &str,
        platform: &str,
        host: String,
    ) -> Result<Self, ConfigError> {
        let client = build_client(config)?;
        Ok(DeliverySink {
            client,
            url: format!("{}/{}", config.endpoint.trim_end_matches('/'), tag),
            tag: tag.to_string(),
            platform: platform.to_string(),
            host,
            post_interval: config.post_interval,
            closed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    #[must_use]
    pub fn payload<'a>(&'a self, record: &'a CorrelatedRecord) -> LogPayload<'a> {
        LogPayload {
            host: &self.host,
            platform: &self.platform,
            file_open_at_unix_milli: record.session_open_at_unix_millis(),
            frame: record.raw.frame,
            log: &record.raw.text,
            category: &record.raw.category,
            verbosity: &record.raw.verbosity,
            log_id: record.log_id(&self.host, &self.platform).to_string(),
        }
    }

    pub async fn post(&self, record: &CorrelatedRecord) -> Result<(), DeliveryError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DeliveryError::Closed);
        }

        let payload = self.payload(record);
        let resp = self.client.post(&self.url).json(&payload).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = response_body(resp.text().await, &self.tag);
            error!(
                "SINK | {}: collector rejected record for tag {}: {:?}",
                status, self.tag, body
            );
            return Err(DeliveryError::Status { status, body });
        }

        if !self.post_interval.is_zero() {
            tokio::time::sleep(self.post_interval).await;
        }
        Ok(())
    }

    /// Stops the sink; later posts fail with [`DeliveryError::Closed`].
    /// Pooled connections are released when the sink is dropped.
    ///
    /// Returns `false` if the sink was already closed.
    pub fn close(&self) -> bool {
        let was_open = !self.closed.swap(true, Ordering::AcqRel);
        if was_open {
            debug!("SINK | Closed sink for tag {}", self.tag);
        }
        was_open
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl LogHandler for DeliverySink {
    async fn handle(&self, record: &CorrelatedRecord) -> Result<(), DeliveryError> {
        self.post(record).await
    }
}

/// The body only decorates a rejection; failing to read it is not fatal.
fn response_body(body: Result<String, reqwest::Error>, tag: &str) -> String {
    match body {
        Ok(body) => body,
        Err(e) => {
            debug!(
                "SINK | Failed to read collector response body for tag {}: {}",
                tag, e
            );
            String::new()
        }
    }
}

fn local_hostname() -> Result<String, ConfigError> {
    gethostname::gethostname()
        .into_string()
        .map_err(|_| ConfigError::Hostname)
}

fn build_client(config: &SinkConfig) -> Result<reqwest::Client, ConfigError> {
    let mut builder = reqwest::Client::builder()
        .timeout(config.timeout)
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)));

    if let Some(proxy) = &config.https_proxy {
        let proxy = reqwest::Proxy::https(proxy).map_err(ConfigError::HttpClient)?;
        builder = builder.proxy(proxy);
    }

    builder.build().map_err(ConfigError::HttpClient)
}
