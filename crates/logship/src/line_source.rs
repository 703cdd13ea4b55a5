// Copyright 2025-Present logship contributors
// SPDX-License-Identifier: Apache-2.0

//! The seam between the pipeline and whatever produces raw lines.
//!
//! A line source is used for exactly one lifetime: it is opened when the
//! watched file exists, `watch` runs until the file goes away (or an error,
//! or cancellation), and `flush` hands over whatever partial line is left.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::errors::SourceError;
use crate::record::RawLineRecord;

#[async_trait]
pub trait LineSource: Send {
    /// Sends records, in file order, until the source ends.
    ///
    /// Returns `Ok(())` when `cancel` fires, [`SourceError::Removed`] when the
    /// file disappears, and any other error when reading fails.
    async fn watch(
        &mut self,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<RawLineRecord>,
    ) -> Result<(), SourceError>;

    /// Sends any buffered partial line.
    async fn flush(&mut self, tx: &mpsc::Sender<RawLineRecord>) -> Result<(), SourceError>;
}

/// Creates a fresh line source for each lifetime.
pub trait LineSourceFactory: Send + Sync {
    fn open(&self, path: &Path, poll_interval: Duration) -> Box<dyn LineSource>;
}
