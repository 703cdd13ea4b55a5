// Copyright 2025-Present logship contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-target watch loop.
//!
//! ```text
//!   WaitExists ──found──> Watching ──source removed──> WaitExists
//!       |                    |
//!       └──── anything else ─┴──> done
//! ```
//!
//! Each `Watching` pass is one line source lifetime run by two tasks. The
//! driver owns the line source: it watches, flushes, closes the record
//! channel and then signals the consumer. The consumer correlates and
//! dispatches every record it receives, drains whatever is still queued
//! once signalled, and cancels the lifetime on its first error. Both tasks
//! are joined before the outcome of the lifetime is decided.
//!
//! On cancellation both tasks stop at their next suspension point; records
//! still queued are dropped.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::{ShipperError, SourceError};
use crate::handler::HandlerChain;
use crate::line_source::LineSourceFactory;
use crate::record::RawLineRecord;
use crate::session::SessionCorrelator;

pub const DEFAULT_EXISTS_INTERVAL: Duration = Duration::from_secs(1);
const RECORD_CHANNEL_CAPACITY: usize = 1024;

/// How one `Watching` pass ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifetimeOutcome {
    /// The file went away; wait for it to come back.
    SourceRemoved,
    /// The line source ended on its own.
    Completed,
}

pub struct WatchSupervisor {
    path: PathBuf,
    poll_interval: Duration,
    exists_interval: Duration,
    factory: Arc<dyn LineSourceFactory>,
    chain: Arc<HandlerChain>,
}

impl WatchSupervisor {
    pub fn new(
        path: PathBuf,
        poll_interval: Duration,
        factory: Arc<dyn LineSourceFactory>,
        chain: Arc<HandlerChain>,
    ) -> Self {
        Self {
            path,
            poll_interval,
            exists_interval: DEFAULT_EXISTS_INTERVAL,
            factory,
            chain,
        }
    }

    /// Overrides how often a missing file is looked for.
    #[must_use]
    pub fn with_exists_interval(mut self, exists_interval: Duration) -> Self {
        self.exists_interval = exists_interval;
        self
    }

    /// Runs until the target is done.
    ///
    /// Returns [`ShipperError::Canceled`] when `cancel` fires, `Ok(())` when
    /// a line source ends on its own, and the first fatal error otherwise.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<(), ShipperError> {
        loop {
            self.wait_exists(cancel).await?;
            debug!("WATCH | Watching {}", self.path.display());

            match self.watch_once(cancel).await? {
                LifetimeOutcome::SourceRemoved => {
                    info!(
                        "WATCH | {} was removed, waiting for it to be recreated",
                        self.path.display()
                    );
                }
                LifetimeOutcome::Completed => return Ok(()),
            }
        }
    }

    async fn wait_exists(&self, cancel: &CancellationToken) -> Result<(), ShipperError> {
        let mut ticker = tokio::time::interval(self.exists_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut reported = false;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ShipperError::Canceled),
                _ = ticker.tick() => {}
            }

            match tokio::fs::metadata(&self.path).await {
                Ok(_) => {
                    if reported {
                        info!("WATCH | Found {}", self.path.display());
                    }
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    if !reported {
                        info!(
                            "WATCH | {} not found, checking again every {:?}",
                            self.path.display(),
                            self.exists_interval
                        );
                        reported = true;
                    }
                }
                Err(source) => {
                    return Err(ShipperError::PathStat {
                        path: self.path.clone(),
                        source,
                    })
                }
            }
        }
    }

    /// One line source lifetime.
    pub async fn watch_once(
        &self,
        cancel: &CancellationToken,
    ) -> Result<LifetimeOutcome, ShipperError> {
        let lifetime = cancel.child_token();
        let (tx, rx) = mpsc::channel(RECORD_CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = oneshot::channel();
        let mut source = self.factory.open(&self.path, self.poll_interval);

        let driver_token = lifetime.clone();
        let driver = tokio::spawn(async move {
            let watched = source.watch(&driver_token, &tx).await;
            let flushed = source.flush(&tx).await;
            drop(tx);
            let _ = stop_tx.send(());
            watched.and(flushed)
        });

        let chain = Arc::clone(&self.chain);
        let consumer_token = lifetime.clone();
        let consumer = tokio::spawn(async move {
            let consumed = consume(rx, stop_rx, &chain, &consumer_token).await;
            if consumed.is_err() {
                consumer_token.cancel();
            }
            consumed
        });

        let (driven, consumed) = tokio::join!(driver, consumer);
        let delivered = consumed.map_err(|e| ShipperError::Task(e.to_string()))??;
        let driven = driven.map_err(|e| ShipperError::Task(e.to_string()))?;
        debug!(
            "WATCH | Lifetime of {} ended after {} records",
            self.path.display(),
            delivered
        );

        // A canceled driver may also report the closed channel.
        if cancel.is_cancelled() {
            return Err(ShipperError::Canceled);
        }
        match driven {
            Err(SourceError::Removed) => Ok(LifetimeOutcome::SourceRemoved),
            Err(e) => Err(e.into()),
            Ok(()) => Ok(LifetimeOutcome::Completed),
        }
    }
}

/// Correlates and dispatches records until the driver is done or `cancel`
/// fires, returning how many were delivered.
async fn consume(
    mut rx: mpsc::Receiver<RawLineRecord>,
    mut stop: oneshot::Receiver<()>,
    chain: &HandlerChain,
    cancel: &CancellationToken,
) -> Result<u64, ShipperError> {
    let mut correlator = SessionCorrelator::new();
    let mut delivered = 0;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            raw = rx.recv() => match raw {
                Some(raw) => {
                    if !deliver_unless_cancelled(cancel, &mut correlator, chain, raw).await? {
                        break;
                    }
                    delivered += 1;
                }
                None => break,
            },
            _ = &mut stop => {
                while let Ok(raw) = rx.try_recv() {
                    if !deliver_unless_cancelled(cancel, &mut correlator, chain, raw).await? {
                        break;
                    }
                    delivered += 1;
                }
                break;
            }
        }
    }

    Ok(delivered)
}

/// Returns `Ok(false)` if `cancel` fired before the record was delivered.
async fn deliver_unless_cancelled(
    cancel: &CancellationToken,
    correlator: &mut SessionCorrelator,
    chain: &HandlerChain,
    raw: RawLineRecord,
) -> Result<bool, ShipperError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Ok(false),
        delivered = deliver(correlator, chain, raw) => delivered.map(|()| true),
    }
}

async fn deliver(
    correlator: &mut SessionCorrelator,
    chain: &HandlerChain,
    raw: RawLineRecord,
) -> Result<(), ShipperError> {
    let record = correlator.correlate(raw)?;
    chain.dispatch(&record).await?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::errors::DeliveryError;
    use crate::handler::LogHandler;
    use crate::line_source::LineSource;
    use crate::record::CorrelatedRecord;
    use crate::tail::PollingLineSourceFactory;
    use async_trait::async_trait;
    use chrono::{Local, TimeZone};
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Mutex;
    use tokio::time::timeout;
    use tracing_test::traced_test;

    const TICK: Duration = Duration::from_millis(10);

    #[derive(Debug, Clone, Copy)]
    enum End {
        Removed,
        Finished,
        WaitForCancel,
    }

    struct ScriptedSource {
        lines: Vec<&'static str>,
        partial: Option<&'static str>,
        end: End,
        delete_on_removal: Option<PathBuf>,
    }

    impl ScriptedSource {
        fn new(lines: Vec<&'static str>, end: End) -> Self {
            Self {
                lines,
                partial: None,
                end,
                delete_on_removal: None,
            }
        }
    }

    #[async_trait]
    impl LineSource for ScriptedSource {
        async fn watch(
            &mut self,
            cancel: &CancellationToken,
            tx: &mpsc::Sender<RawLineRecord>,
        ) -> Result<(), SourceError> {
            for line in self.lines.drain(..) {
                tx.send(RawLineRecord::new(line))
                    .await
                    .map_err(|_| SourceError::Closed)?;
            }
            match self.end {
                End::Removed => {
                    if let Some(path) = &self.delete_on_removal {
                        std::fs::remove_file(path).unwrap();
                    }
                    Err(SourceError::Removed)
                }
                End::Finished => Ok(()),
                End::WaitForCancel => {
                    cancel.cancelled().await;
                    Ok(())
                }
            }
        }

        async fn flush(&mut self, tx: &mpsc::Sender<RawLineRecord>) -> Result<(), SourceError> {
            if let Some(partial) = self.partial.take() {
                tx.send(RawLineRecord::new(partial))
                    .await
                    .map_err(|_| SourceError::Closed)?;
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct ScriptedFactory {
        lifetimes: Mutex<VecDeque<ScriptedSource>>,
        opened: Mutex<usize>,
    }

    impl ScriptedFactory {
        fn new(lifetimes: Vec<ScriptedSource>) -> Arc<Self> {
            Arc::new(Self {
                lifetimes: Mutex::new(lifetimes.into()),
                opened: Mutex::new(0),
            })
        }

        fn opened(&self) -> usize {
            *self.opened.lock().unwrap()
        }
    }

    impl LineSourceFactory for ScriptedFactory {
        fn open(&self, _path: &Path, _poll_interval: Duration) -> Box<dyn LineSource> {
            *self.opened.lock().unwrap() += 1;
            let next = self.lifetimes.lock().unwrap().pop_front();
            Box::new(next.unwrap_or_else(|| ScriptedSource::new(vec![], End::WaitForCancel)))
        }
    }

    /// Keeps every record it accepts; rejects the record at `fail_at`
    /// (1-based) if set.
    #[derive(Default)]
    struct CollectingHandler {
        fail_at: Option<usize>,
        seen: Mutex<usize>,
        accepted: Mutex<Vec<CorrelatedRecord>>,
    }

    impl CollectingHandler {
        fn failing_at(n: usize) -> Self {
            Self {
                fail_at: Some(n),
                ..Default::default()
            }
        }

        fn texts(&self) -> Vec<String> {
            self.accepted
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.raw.text.clone())
                .collect()
        }
    }

    #[async_trait]
    impl LogHandler for CollectingHandler {
        async fn handle(&self, record: &CorrelatedRecord) -> Result<(), DeliveryError> {
            let seen = {
                let mut seen = self.seen.lock().unwrap();
                *seen += 1;
                *seen
            };
            if self.fail_at == Some(seen) {
                return Err(DeliveryError::Handler(format!("rejected record {seen}")));
            }
            self.accepted.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    fn supervisor(
        path: &Path,
        factory: Arc<ScriptedFactory>,
        handler: Arc<CollectingHandler>,
    ) -> WatchSupervisor {
        let mut chain = HandlerChain::new();
        chain.add_handler(handler);
        WatchSupervisor::new(path.to_path_buf(), TICK, factory, Arc::new(chain))
            .with_exists_interval(TICK)
    }

    fn existing_file() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Game.log");
        std::fs::write(&path, "").unwrap();
        (dir, path)
    }

    #[tokio::test]
    async fn test_session_is_stamped_on_marker_and_following_lines() {
        let (_dir, path) = existing_file();
        let factory = ScriptedFactory::new(vec![ScriptedSource::new(
            vec!["Log file open, 01/02/23 15:04:05\r\n", "LogTemp: Display: hello\r\n"],
            End::Finished,
        )]);
        let handler = Arc::new(CollectingHandler::default());

        supervisor(&path, factory, Arc::clone(&handler))
            .run(&CancellationToken::new())
            .await
            .unwrap();

        let expected = Local.with_ymd_and_hms(2023, 1, 2, 15, 4, 5).earliest();
        let accepted = handler.accepted.lock().unwrap();
        assert_eq!(accepted.len(), 2);
        assert_eq!(accepted[0].raw.text, "Log file open, 01/02/23 15:04:05\n");
        assert_eq!(accepted[1].raw.text, "LogTemp: Display: hello\n");
        assert!(accepted.iter().all(|r| r.session_open_at == expected));
    }

    #[tokio::test]
    async fn test_reconnect_resets_session_and_keeps_order() {
        let (_dir, path) = existing_file();
        let factory = ScriptedFactory::new(vec![
            ScriptedSource::new(
                vec!["Log file open, 01/02/23 15:04:05", "one", "two"],
                End::Removed,
            ),
            ScriptedSource::new(vec!["three", "four"], End::Finished),
        ]);
        let handler = Arc::new(CollectingHandler::default());

        supervisor(&path, Arc::clone(&factory), Arc::clone(&handler))
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(factory.opened(), 2);
        assert_eq!(
            handler.texts(),
            vec!["Log file open, 01/02/23 15:04:05", "one", "two", "three", "four"]
        );
        let accepted = handler.accepted.lock().unwrap();
        assert!(accepted[..3].iter().all(|r| r.session_open_at.is_some()));
        assert!(accepted[3..].iter().all(|r| r.session_open_at.is_none()));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_reconnect_waits_for_file_to_reappear() {
        let (_dir, path) = existing_file();
        let mut first = ScriptedSource::new(vec!["before"], End::Removed);
        first.delete_on_removal = Some(path.clone());
        let factory = ScriptedFactory::new(vec![
            first,
            ScriptedSource::new(vec!["after"], End::Finished),
        ]);
        let handler = Arc::new(CollectingHandler::default());

        let recreate = {
            let path = path.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                std::fs::write(&path, "").unwrap();
            })
        };

        let result = timeout(
            Duration::from_secs(2),
            supervisor(&path, Arc::clone(&factory), Arc::clone(&handler))
                .run(&CancellationToken::new()),
        )
        .await
        .unwrap();
        recreate.await.unwrap();

        assert!(result.is_ok());
        assert_eq!(factory.opened(), 2);
        assert_eq!(handler.texts(), vec!["before", "after"]);
        assert!(logs_contain("was removed, waiting for it to be recreated"));
        assert!(logs_contain("not found, checking again"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_cancel_while_waiting_for_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.log");
        let factory = ScriptedFactory::new(vec![]);
        let handler = Arc::new(CollectingHandler::default());
        let supervisor = supervisor(&path, Arc::clone(&factory), handler)
            .with_exists_interval(DEFAULT_EXISTS_INTERVAL);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = timeout(DEFAULT_EXISTS_INTERVAL, supervisor.run(&cancel))
            .await
            .unwrap();

        assert!(matches!(result, Err(ShipperError::Canceled)));
        assert_eq!(factory.opened(), 0);
        assert!(logs_contain("not found, checking again"));
    }

    #[tokio::test]
    async fn test_cancel_while_watching() {
        let (_dir, path) = existing_file();
        let factory = ScriptedFactory::new(vec![ScriptedSource::new(
            vec!["one"],
            End::WaitForCancel,
        )]);
        let handler = Arc::new(CollectingHandler::default());
        let supervisor = supervisor(&path, factory, Arc::clone(&handler));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = timeout(Duration::from_secs(1), supervisor.run(&cancel))
            .await
            .unwrap();

        assert!(matches!(result, Err(ShipperError::Canceled)));
        assert_eq!(handler.texts(), vec!["one"]);
    }

    #[tokio::test]
    async fn test_handler_error_stops_the_target() {
        let (_dir, path) = existing_file();
        let lines = vec!["1", "2", "3", "4", "5", "6", "7", "8", "9", "10"];
        let factory = ScriptedFactory::new(vec![ScriptedSource::new(lines, End::WaitForCancel)]);
        let handler = Arc::new(CollectingHandler::failing_at(5));
        let cancel = CancellationToken::new();

        let result = timeout(
            Duration::from_secs(1),
            supervisor(&path, Arc::clone(&factory), Arc::clone(&handler)).run(&cancel),
        )
        .await
        .unwrap();

        match result {
            Err(ShipperError::Delivery(DeliveryError::Handler(message))) => {
                assert_eq!(message, "rejected record 5");
            }
            other => panic!("expected delivery error, got {other:?}"),
        }
        assert_eq!(handler.texts(), vec!["1", "2", "3", "4"]);
        assert_eq!(*handler.seen.lock().unwrap(), 5);
        assert_eq!(factory.opened(), 1);
        // Only the lifetime was canceled, not the caller's scope.
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_malformed_marker_stops_the_target() {
        let (_dir, path) = existing_file();
        let factory = ScriptedFactory::new(vec![ScriptedSource::new(
            vec!["ok", "Log file open, 13/45/23 99:99:99", "never"],
            End::Removed,
        )]);
        let handler = Arc::new(CollectingHandler::default());

        let result = supervisor(&path, Arc::clone(&factory), Arc::clone(&handler))
            .run(&CancellationToken::new())
            .await;

        assert!(matches!(
            result,
            Err(ShipperError::MalformedSessionMarker { .. })
        ));
        assert_eq!(handler.texts(), vec!["ok"]);
        assert_eq!(factory.opened(), 1);
    }

    #[tokio::test]
    async fn test_flushed_partial_line_is_delivered_before_removal() {
        let (_dir, path) = existing_file();
        let mut first = ScriptedSource::new(vec!["a", "b"], End::Removed);
        first.partial = Some("c");
        let factory = ScriptedFactory::new(vec![first]);
        let handler = Arc::new(CollectingHandler::default());
        let supervisor = supervisor(&path, factory, Arc::clone(&handler));

        let outcome = supervisor
            .watch_once(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, LifetimeOutcome::SourceRemoved);
        assert_eq!(handler.texts(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_stat_error_stops_the_target() {
        let (_dir, file) = existing_file();
        // A path below a regular file cannot be stat'ed.
        let path = file.join("Game.log");
        let factory = ScriptedFactory::new(vec![]);
        let handler = Arc::new(CollectingHandler::default());

        let result = supervisor(&path, Arc::clone(&factory), handler)
            .run(&CancellationToken::new())
            .await;

        assert!(matches!(result, Err(ShipperError::PathStat { .. })));
        assert_eq!(factory.opened(), 0);
    }

    /// Sleeps before accepting each record, like a collector round trip.
    struct SlowHandler {
        delay: Duration,
        accepted: Mutex<usize>,
    }

    #[async_trait]
    impl LogHandler for SlowHandler {
        async fn handle(&self, _record: &CorrelatedRecord) -> Result<(), DeliveryError> {
            tokio::time::sleep(self.delay).await;
            *self.accepted.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_cancel_with_backlog_stops_within_a_tick() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Game.log");
        let backlog: String = (0..3000)
            .map(|i| format!("[2023.01.02-15.04.05:000][{i:3}]LogTemp: Display: line {i}\n"))
            .collect();
        std::fs::write(&path, backlog).unwrap();

        let handler = Arc::new(SlowHandler {
            delay: Duration::from_millis(2),
            accepted: Mutex::new(0),
        });
        let mut chain = HandlerChain::new();
        chain.add_handler(Arc::clone(&handler) as Arc<dyn LogHandler>);
        let supervisor = WatchSupervisor::new(
            path,
            TICK,
            Arc::new(PollingLineSourceFactory),
            Arc::new(chain),
        )
        .with_exists_interval(TICK);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        let result = timeout(Duration::from_millis(500), supervisor.run(&cancel))
            .await
            .unwrap();

        assert!(matches!(result, Err(ShipperError::Canceled)));
        assert!(started.elapsed() < Duration::from_millis(500));
        let accepted = *handler.accepted.lock().unwrap();
        assert!(accepted > 0);
        assert!(accepted < 3000, "backlog was drained before stopping");
    }
}
