// Copyright 2025-Present logship contributors
// SPDX-License-Identifier: Apache-2.0

//! Session correlation.
//!
//! The producing process writes `Log file open, 01/02/23 15:04:05` whenever it
//! (re)opens its log. Every record after such a marker belongs to that
//! session until the next marker, and is stamped with its open time.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use regex::Regex;
use std::sync::OnceLock;

use crate::errors::ShipperError;
use crate::record::{CorrelatedRecord, RawLineRecord};

/// Layout of the timestamp carried by a session marker (`MM/DD/YY hh:mm:ss`).
pub const SESSION_OPEN_TIME_FORMAT: &str = "%m/%d/%y %H:%M:%S";

const BYTE_ORDER_MARK: char = '\u{feff}';

#[allow(clippy::expect_used)]
fn session_marker() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"Log\sfile\sopen,\s+(\S+\s+\S+)").expect("session marker pattern is valid")
    })
}

/// Engine logs are UTF-8 with BOM and CRLF line ends; records are shipped as
/// plain UTF-8 with LF.
///
/// Carriage returns are removed first so that a BOM hidden behind one is
/// still stripped, which keeps the function idempotent.
#[must_use]
pub fn normalize_line(text: &str) -> String {
    let without_cr = if text.contains('\r') {
        text.replace('\r', "")
    } else {
        text.to_string()
    };
    match without_cr.strip_prefix(BYTE_ORDER_MARK) {
        Some(_) => without_cr.trim_start_matches(BYTE_ORDER_MARK).to_string(),
        None => without_cr,
    }
}

/// Returns the open time if `text` is a session marker.
///
/// A line that looks like a marker but whose timestamp does not parse is an
/// error: from then on session correlation can no longer be trusted.
pub fn parse_session_marker(text: &str) -> Result<Option<DateTime<Local>>, ShipperError> {
    let Some(captures) = session_marker().captures(text) else {
        return Ok(None);
    };
    let Some(open_time) = captures.get(1).map(|m| m.as_str()) else {
        return Ok(None);
    };

    let malformed = |reason: String| ShipperError::MalformedSessionMarker {
        marker: open_time.to_string(),
        reason,
    };

    let naive = NaiveDateTime::parse_from_str(open_time, SESSION_OPEN_TIME_FORMAT)
        .map_err(|e| malformed(e.to_string()))?;
    let open_at = Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| malformed("time does not exist in the local time zone".to_string()))?;

    Ok(Some(open_at))
}

/// Open time of the session currently being read. Lives for one line source
/// lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    pub open_at: Option<DateTime<Local>>,
}

/// Stamps records with the session they belong to.
///
/// A fresh correlator is created for every line source lifetime, so nothing
/// leaks from the session of a previous file.
#[derive(Debug, Default)]
pub struct SessionCorrelator {
    state: SessionState,
}

impl SessionCorrelator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Normalizes the record text, tracks session markers and stamps the
    /// record. Marker lines are forwarded too, carrying their own open time.
    pub fn correlate(&mut self, mut raw: RawLineRecord) -> Result<CorrelatedRecord, ShipperError> {
        raw.text = normalize_line(&raw.text);

        if raw.category.is_empty() {
            if let Some(open_at) = parse_session_marker(&raw.text)? {
                self.state.open_at = Some(open_at);
            }
        }

        Ok(CorrelatedRecord {
            raw,
            session_open_at: self.state.open_at,
        })
    }
}
