// Copyright 2025-Present logship contributors
// SPDX-License-Identifier: Apache-2.0

//! Polling tailer for engine log files.
//!
//! The file is read from the beginning, then checked every poll interval for
//! appended bytes. Complete lines are parsed into [`RawLineRecord`]s; a
//! trailing partial line waits for its terminator or for [`LineSource::flush`].
//! When the path disappears (or is replaced by a new file) the remaining
//! bytes of the old file are emitted and the lifetime ends with
//! [`SourceError::Removed`].

use async_trait::async_trait;
use regex::Regex;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::SourceError;
use crate::line_source::{LineSource, LineSourceFactory};
use crate::record::RawLineRecord;

/// Upper bound on the bytes read from the file in one go.
const READ_CHUNK_SIZE: usize = 64 * 1024;

// `[2023.01.02-15.04.05:123][ 12]`
#[allow(clippy::expect_used)]
fn line_prefix() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\[\d{4}\.\d{2}\.\d{2}-\d{2}\.\d{2}\.\d{2}:\d{3}\]\[\s*(\d+)\]")
            .expect("line prefix pattern is valid")
    })
}

// `LogTemp: Display: `
#[allow(clippy::expect_used)]
fn category_prefix() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^([A-Za-z_][A-Za-z0-9_]*):\s(?:(Fatal|Error|Warning|Display|Log|Verbose|VeryVerbose):\s)?",
        )
        .expect("category pattern is valid")
    })
}

/// Splits an engine log line into frame, category and verbosity. The text
/// is kept whole.
#[must_use]
pub fn parse_line(text: String) -> RawLineRecord {
    let mut record = RawLineRecord::default();
    let mut rest = text.trim_start_matches('\u{feff}');

    if let Some(captures) = line_prefix().captures(rest) {
        record.frame = captures.get(1).and_then(|m| m.as_str().parse().ok());
        let prefix_len = captures.get(0).map_or(0, |m| m.end());
        rest = &rest[prefix_len..];
    }

    if let Some(captures) = category_prefix().captures(rest) {
        if let Some(category) = captures.get(1) {
            record.category = category.as_str().to_string();
        }
        if let Some(verbosity) = captures.get(2) {
            record.verbosity = verbosity.as_str().to_string();
        }
    }

    record.text = text;
    record
}

pub struct PollingLineSource {
    path: PathBuf,
    poll_interval: Duration,
    file: Option<File>,
    offset: u64,
    pending: Vec<u8>,
}

impl PollingLineSource {
    #[must_use]
    pub fn new(path: &Path, poll_interval: Duration) -> Self {
        Self {
            path: path.to_path_buf(),
            poll_interval,
            file: None,
            offset: 0,
            pending: Vec::new(),
        }
    }

    async fn poll(
        &mut self,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<RawLineRecord>,
    ) -> Result<(), SourceError> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("TAIL | {} was removed", self.path.display());
                self.drain_open_file(cancel, tx).await?;
                return Err(SourceError::Removed);
            }
            Err(e) => return Err(e.into()),
        };

        if self.file.is_none() {
            match File::open(&self.path).await {
                Ok(file) => {
                    self.file = Some(file);
                    self.offset = 0;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => return Err(SourceError::Removed),
                Err(e) => return Err(e.into()),
            }
        }

        if let Some(file) = self.file.as_mut() {
            if !same_file(&file.metadata().await?, &metadata) {
                debug!("TAIL | {} was replaced", self.path.display());
                self.drain_open_file(cancel, tx).await?;
                return Err(SourceError::Removed);
            }

            if metadata.len() < self.offset {
                debug!(
                    "TAIL | {} was truncated, reading from the start",
                    self.path.display()
                );
                file.seek(SeekFrom::Start(0)).await?;
                self.offset = 0;
                self.pending.clear();
            }
        }

        if metadata.len() > self.offset {
            self.read_available(cancel, tx).await?;
        }
        Ok(())
    }

    /// Reads up to the end of the file one chunk at a time and sends every
    /// complete line. Stops early when `cancel` fires; unread bytes stay in
    /// the file and unsent lines are dropped.
    async fn read_available(
        &mut self,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<RawLineRecord>,
    ) -> Result<(), SourceError> {
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];

        while !cancel.is_cancelled() {
            let Some(file) = self.file.as_mut() else {
                return Ok(());
            };
            let read = file.read(&mut chunk).await?;
            if read == 0 {
                return Ok(());
            }
            self.offset += read as u64;
            self.pending.extend_from_slice(&chunk[..read]);

            let mut consumed = 0;
            let mut sent = Ok(true);
            while let Some(pos) = self.pending[consumed..].iter().position(|b| *b == b'\n') {
                let end = consumed + pos + 1;
                sent = send_line(cancel, tx, &self.pending[consumed..end]).await;
                consumed = end;
                if !matches!(sent, Ok(true)) {
                    break;
                }
            }
            self.pending.drain(..consumed);
            if !sent? {
                self.pending.clear();
                return Ok(());
            }
        }
        Ok(())
    }

    /// The path is gone but the handle still reads the old file.
    async fn drain_open_file(
        &mut self,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<RawLineRecord>,
    ) -> Result<(), SourceError> {
        if self.file.is_some() {
            self.read_available(cancel, tx).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl LineSource for PollingLineSource {
    async fn watch(
        &mut self,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<RawLineRecord>,
    ) -> Result<(), SourceError> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }
            self.poll(cancel, tx).await?;
        }
    }

    async fn flush(&mut self, tx: &mpsc::Sender<RawLineRecord>) -> Result<(), SourceError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let line = std::mem::take(&mut self.pending);
        tx.send(record_from(&line))
            .await
            .map_err(|_| SourceError::Closed)
    }
}

fn record_from(line: &[u8]) -> RawLineRecord {
    parse_line(String::from_utf8_lossy(line).into_owned())
}

/// Returns `Ok(false)` if `cancel` fired before the consumer took the line.
async fn send_line(
    cancel: &CancellationToken,
    tx: &mpsc::Sender<RawLineRecord>,
    line: &[u8],
) -> Result<bool, SourceError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Ok(false),
        sent = tx.send(record_from(line)) => sent.map(|()| true).map_err(|_| SourceError::Closed),
    }
}

#[cfg(unix)]
fn same_file(a: &std::fs::Metadata, b: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

#[cfg(not(unix))]
fn same_file(_a: &std::fs::Metadata, _b: &std::fs::Metadata) -> bool {
    true
}

/// Opens a [`PollingLineSource`] per lifetime.
#[derive(Debug, Default, Clone, Copy)]
pub struct PollingLineSourceFactory;

impl LineSourceFactory for PollingLineSourceFactory {
    fn open(&self, path: &Path, poll_interval: Duration) -> Box<dyn LineSource> {
        Box::new(PollingLineSource::new(path, poll_interval))
    }
}
