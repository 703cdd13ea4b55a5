// Copyright 2025-Present logship contributors
// SPDX-License-Identifier: Apache-2.0

//! Records flowing through the pipeline.

use chrono::{DateTime, Local};
use std::fmt;

/// Epoch milliseconds reported for records seen before any session marker.
///
/// This is `0001-01-01T00:00:00Z`, the zero time of the collectors that
/// already index these logs, so pre-marker records keep a stable `LogID`.
pub const UNSET_SESSION_UNIX_MILLIS: i64 = -62_135_596_800_000;

/// One line as produced by a line source.
///
/// Empty `category` / `verbosity` mean the line carried none, which is
/// different from carrying an empty value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawLineRecord {
    pub text: String,
    pub category: String,
    pub verbosity: String,
    pub frame: Option<u64>,
}

impl RawLineRecord {
    /// A line without category, verbosity or frame.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    #[must_use]
    pub fn with_verbosity(mut self, verbosity: impl Into<String>) -> Self {
        self.verbosity = verbosity.into();
        self
    }

    #[must_use]
    pub fn with_frame(mut self, frame: u64) -> Self {
        self.frame = Some(frame);
        self
    }
}

/// A raw record stamped with the open time of the session it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelatedRecord {
    pub raw: RawLineRecord,
    /// `None` until the first session marker of the lifetime is seen.
    pub session_open_at: Option<DateTime<Local>>,
}

impl CorrelatedRecord {
    #[must_use]
    pub fn session_open_at_unix_millis(&self) -> i64 {
        self.session_open_at
            .map_or(UNSET_SESSION_UNIX_MILLIS, |open_at| open_at.timestamp_millis())
    }

    /// Identity of the session this record belongs to, as seen from `host`.
    #[must_use]
    pub fn log_id<'a>(&self, host: &'a str, platform: &'a str) -> LogId<'a> {
        LogId {
            host,
            platform,
            file_open_at_unix_milli: self.session_open_at_unix_millis(),
        }
    }
}

/// `host_platform_openAtMillis`, shared by every record of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogId<'a> {
    pub host: &'a str,
    pub platform: &'a str,
    pub file_open_at_unix_milli: i64,
}

impl fmt::Display for LogId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}",
            self.host, self.platform, self.file_open_at_unix_milli
        )
    }
}
