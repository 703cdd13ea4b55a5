// Copyright 2025-Present logship contributors
// SPDX-License-Identifier: Apache-2.0

//! Ordered, fail-fast delivery of correlated records.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::errors::DeliveryError;
use crate::record::CorrelatedRecord;

#[async_trait]
pub trait LogHandler: Send + Sync {
    /// Delivers one record. An error stops the chain for this record and
    /// ends the target.
    async fn handle(&self, record: &CorrelatedRecord) -> Result<(), DeliveryError>;
}

/// Handlers run in registration order for every record.
///
/// The list is built before the pipeline starts and is read-only while it
/// runs. There is no rollback: if a later handler fails, earlier handlers
/// have already seen the record.
#[derive(Clone, Default)]
pub struct HandlerChain {
    handlers: Vec<Arc<dyn LogHandler>>,
}

impl HandlerChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&mut self, handler: Arc<dyn LogHandler>) {
        self.handlers.push(handler);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub async fn dispatch(&self, record: &CorrelatedRecord) -> Result<(), DeliveryError> {
        for handler in &self.handlers {
            handler.handle(record).await?;
        }
        Ok(())
    }
}

impl fmt::Debug for HandlerChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerChain")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
