// Copyright 2025-Present logship contributors
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{SinkConfig, TargetConfig};
use crate::errors::ShipperError;
use crate::handler::{HandlerChain, LogHandler};
use crate::line_source::LineSourceFactory;
use crate::sink::DeliverySink;
use crate::supervisor::{WatchSupervisor, DEFAULT_EXISTS_INTERVAL};

/// One configured log file, its sink and the handlers its records go
/// through.
///
/// The sink is always the first handler. Extra handlers are registered with
/// [`Target::add_handler`] before [`Target::run`], which consumes the target
/// and closes the sink once the watch loop is done.
pub struct Target {
    config: TargetConfig,
    sink: Arc<DeliverySink>,
    chain: HandlerChain,
    poll_interval: Duration,
    exists_interval: Duration,
    factory: Arc<dyn LineSourceFactory>,
}

impl Target {
    pub fn new(
        config: TargetConfig,
        sink_config: &SinkConfig,
        poll_interval: Duration,
        factory: Arc<dyn LineSourceFactory>,
    ) -> Result<Self, ShipperError> {
        config.validate()?;
        let sink = DeliverySink::new(sink_config, &config.tag, &config.platform)?;
        Ok(Self::with_sink(config, Arc::new(sink), poll_interval, factory))
    }

    /// Builds a target around an existing sink. The descriptor is not
    /// validated.
    pub fn with_sink(
        config: TargetConfig,
        sink: Arc<DeliverySink>,
        poll_interval: Duration,
        factory: Arc<dyn LineSourceFactory>,
    ) -> Self {
        let mut chain = HandlerChain::new();
        chain.add_handler(Arc::clone(&sink) as Arc<dyn LogHandler>);
        Self {
            config,
            sink,
            chain,
            poll_interval,
            exists_interval: DEFAULT_EXISTS_INTERVAL,
            factory,
        }
    }

    #[must_use]
    pub fn with_exists_interval(mut self, exists_interval: Duration) -> Self {
        self.exists_interval = exists_interval;
        self
    }

    /// Appends a handler that runs after the ones already registered.
    pub fn add_handler(&mut self, handler: Arc<dyn LogHandler>) {
        self.chain.add_handler(handler);
    }

    #[must_use]
    pub fn config(&self) -> &TargetConfig {
        &self.config
    }

    #[must_use]
    pub fn sink(&self) -> &Arc<DeliverySink> {
        &self.sink
    }

    pub async fn run(self, cancel: &CancellationToken) -> Result<(), ShipperError> {
        info!(
            "TARGET | Starting tag={} platform={} path={}",
            self.config.tag,
            self.config.platform,
            self.config.path.display()
        );

        let supervisor = WatchSupervisor::new(
            self.config.path.clone(),
            self.poll_interval,
            self.factory,
            Arc::new(self.chain),
        )
        .with_exists_interval(self.exists_interval);

        let result = supervisor.run(cancel).await;
        self.sink.close();

        match &result {
            Ok(()) => info!("TARGET | {} finished", self.config.tag),
            Err(e) if e.is_canceled() => debug!("TARGET | {} canceled", self.config.tag),
            Err(e) => debug!("TARGET | {} stopped: {}", self.config.tag, e),
        }
        result
    }
}
