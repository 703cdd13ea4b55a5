// Copyright 2025-Present logship contributors
// SPDX-License-Identifier: Apache-2.0

//! Runs every configured target side by side.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{Config, SinkConfig, TargetConfig};
use crate::errors::{RunError, ShipperError};
use crate::line_source::LineSourceFactory;
use crate::supervisor::DEFAULT_EXISTS_INTERVAL;
use crate::tail::PollingLineSourceFactory;
use crate::target::Target;

/// Final result of one target.
#[derive(Debug)]
pub struct TargetOutcome {
    pub config: TargetConfig,
    pub result: Result<(), ShipperError>,
}

impl TargetOutcome {
    /// Cancellation counts as a clean end.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(&self.result, Err(e) if !e.is_canceled())
    }
}

pub struct TargetRunner {
    sink: SinkConfig,
    poll_interval: Duration,
    exists_interval: Duration,
    targets: Vec<TargetConfig>,
    factory: Arc<dyn LineSourceFactory>,
}

impl TargetRunner {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            sink: config.sink.clone(),
            poll_interval: config.poll_interval,
            exists_interval: DEFAULT_EXISTS_INTERVAL,
            targets: config.targets.clone(),
            factory: Arc::new(PollingLineSourceFactory),
        }
    }

    #[must_use]
    pub fn with_factory(mut self, factory: Arc<dyn LineSourceFactory>) -> Self {
        self.factory = factory;
        self
    }

    #[must_use]
    pub fn with_exists_interval(mut self, exists_interval: Duration) -> Self {
        self.exists_interval = exists_interval;
        self
    }

    /// Runs all targets until each one is done and reports whether any of
    /// them failed. Every failure is logged with its target.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<(), RunError> {
        let outcomes = self.run_targets(cancel).await;
        let total = outcomes.len();
        let mut failed = 0;

        for outcome in outcomes.iter().filter(|o| o.is_failure()) {
            failed += 1;
            if let Err(e) = &outcome.result {
                error!(
                    "TARGET | tag={} platform={} path={} failed: {}",
                    outcome.config.tag,
                    outcome.config.platform,
                    outcome.config.path.display(),
                    e
                );
            }
        }

        if failed > 0 {
            return Err(RunError::TargetsFailed { failed, total });
        }
        info!("TARGET | All {} targets finished", total);
        Ok(())
    }

    /// Runs all targets and returns their outcomes in configuration order.
    ///
    /// A target that cannot be built fails on its own; the others still run.
    pub async fn run_targets(&self, cancel: &CancellationToken) -> Vec<TargetOutcome> {
        let mut running: Vec<(TargetConfig, Result<JoinHandle<_>, ShipperError>)> =
            Vec::with_capacity(self.targets.len());

        for config in &self.targets {
            let target = Target::new(
                config.clone(),
                &self.sink,
                self.poll_interval,
                Arc::clone(&self.factory),
            )
            .map(|target| target.with_exists_interval(self.exists_interval));

            let handle = target.map(|target| {
                let cancel = cancel.clone();
                tokio::spawn(async move { target.run(&cancel).await })
            });
            running.push((config.clone(), handle));
        }

        let mut outcomes = Vec::with_capacity(running.len());
        for (config, handle) in running {
            let result = match handle {
                Ok(handle) => match handle.await {
                    Ok(result) => result,
                    Err(e) => Err(ShipperError::Task(e.to_string())),
                },
                Err(e) => Err(e),
            };
            outcomes.push(TargetOutcome { config, result });
        }
        outcomes
    }
}
